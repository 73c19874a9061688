// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline: a dedicated worker thread draining a FIFO queue of posted
//! jobs in program order (component 4.D).
//!
//! Mirrors the single-thread-owns-everything discipline this codebase's
//! libcamera capture thread already uses: one thread, a blocking receive
//! loop gated on an atomic stop flag, and an explicit teardown that drains
//! then joins rather than detaching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single dedicated worker thread with a FIFO job queue.
///
/// Jobs posted via [`Pipeline::post`] run strictly in the order they were
/// posted, each to completion before the next starts, on one background
/// thread.
pub struct Pipeline {
    name: &'static str,
    tx: Option<Sender<Job>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawns the worker thread.
    pub fn spawn(name: &'static str) -> Self {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, rx, stop_thread))
            .expect("failed to spawn pipeline worker thread");

        info!(pipeline = name, "spawned worker thread");
        Pipeline {
            name,
            tx: Some(tx),
            stop,
            handle: Some(handle),
        }
    }

    /// Enqueues `job` to run on the worker thread after every
    /// previously-posted job. Silently dropped if the worker has already
    /// stopped.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(tx) = &self.tx {
            if tx.send(Box::new(job)).is_err() {
                warn!(pipeline = self.name, "post to a dead worker thread");
            }
        }
    }

    /// A cloneable handle that can post jobs from other threads, without
    /// sharing ownership of the `Pipeline` itself (used to hand a
    /// `process` poster into the `capture` thread's frame-ready
    /// callback).
    pub fn poster(&self) -> Poster {
        Poster {
            name: self.name,
            tx: self.tx.clone(),
        }
    }

    /// Drains any queued jobs, signals the worker to stop after the
    /// current job, and joins. Idempotent.
    pub fn free(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.free();
    }
}

/// A cloneable sending handle onto a [`Pipeline`]'s job queue.
#[derive(Clone)]
pub struct Poster {
    name: &'static str,
    tx: Option<Sender<Job>>,
}

impl Poster {
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(tx) = &self.tx {
            if tx.send(Box::new(job)).is_err() {
                warn!(pipeline = self.name, "post to a dead worker thread");
            }
        }
    }
}

fn worker_loop(name: &'static str, rx: Receiver<Job>, stop: Arc<AtomicBool>) {
    loop {
        match rx.recv() {
            Ok(job) => {
                job();
                if stop.load(Ordering::Acquire) {
                    debug!(pipeline = name, "stop observed after draining posted job");
                }
            }
            Err(_) => {
                debug!(pipeline = name, "job channel disconnected, exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn jobs_run_in_posted_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::spawn("test-pipeline");
        for i in 0..10 {
            let order = order.clone();
            pipeline.post(move || order.lock().unwrap().push(i));
        }
        pipeline.free();
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn free_is_idempotent() {
        let mut pipeline = Pipeline::spawn("idempotent");
        pipeline.post(|| {});
        pipeline.free();
        pipeline.free();
    }
}
