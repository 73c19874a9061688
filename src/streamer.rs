// SPDX-License-Identifier: GPL-3.0-only

//! Streamer: mmap buffer queue/dequeue loop over a configured video node
//! (component 4.C).
//!
//! Built on the `v4l` crate the same way the kernel-depth capture loops
//! already in this codebase do: `Device::with_path` + `Format::new` +
//! `Stream::with_buffers`, read in a loop via `CaptureStream::next`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

use crate::errors::StreamError;
use crate::sensor::PixelFormat;

/// Minimum buffer count this engine requires; below this, frame delivery
/// stutters under the two-stage pipeline's processing latency.
const MIN_BUFFER_COUNT: u32 = 4;

/// A single dequeued frame, borrowed from the mmap ring for the duration
/// of the callback.
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub timestamp_us: i64,
}

/// Owns the open video node and its mmap buffer ring.
pub struct Streamer {
    dev: Device,
    width: u32,
    height: u32,
    stop: Arc<AtomicBool>,
}

impl Streamer {
    /// Opens `path` and negotiates `pixel_format` at `width`x`height`. The
    /// driver may return a different actual size; callers should read
    /// `width()`/`height()` after construction.
    pub fn open(
        path: &str,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Result<Self, StreamError> {
        let dev = Device::with_path(path).map_err(|_| StreamError::IoctlFailed {
            name: "open",
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        })?;

        let fourcc = FourCC::new(&pixel_format.fourcc().to_le_bytes());
        let format = Format::new(width, height, fourcc);
        let actual = dev.set_format(&format).map_err(|_| StreamError::IoctlFailed {
            name: "VIDIOC_S_FMT",
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        })?;

        debug!(path, width = actual.width, height = actual.height, "video node format set");

        Ok(Streamer {
            dev,
            width: actual.width,
            height: actual.height,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// A handle that, when dropped or told to `store(true)`, cooperatively
    /// stops `run`'s dequeue loop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Requests `REQBUFS`/mmap of `buffer_count` buffers (at least 4, per
    /// the minimum this engine requires), `STREAMON`s, then dequeues
    /// frames in a loop, invoking `on_frame` for each until `stop()` is
    /// set or an unrecoverable ioctl error occurs. `STREAMOFF` runs on
    /// every exit path, including error returns.
    pub fn run<F>(&self, buffer_count: u32, mut on_frame: F) -> Result<(), StreamError>
    where
        F: FnMut(Frame<'_>),
    {
        let requested = buffer_count.max(MIN_BUFFER_COUNT);
        let mut stream = Stream::with_buffers(&self.dev, Type::VideoCapture, requested)
            .map_err(|_| StreamError::MmapFailed)?;

        let mut sequence: u32 = 0;
        while !self.stop.load(Ordering::Acquire) {
            let (buf, meta) = match stream.next() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "dequeue failed");
                    return Err(StreamError::IoctlFailed {
                        name: "VIDIOC_DQBUF",
                        errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
                    });
                }
            };

            let timestamp_us =
                (meta.timestamp.sec as i64) * 1_000_000 + meta.timestamp.usec as i64;

            on_frame(Frame {
                data: buf,
                width: self.width,
                height: self.height,
                sequence,
                timestamp_us,
            });
            sequence = sequence.wrapping_add(1);
        }
        Ok(())
    }

    /// Idempotent: signals the running `run` loop to exit after its
    /// current dequeue. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent() {
        let stop = Arc::new(AtomicBool::new(false));
        stop.store(true, Ordering::Release);
        stop.store(true, Ordering::Release);
        assert!(stop.load(Ordering::Acquire));
    }

    #[test]
    fn minimum_buffer_count_is_enforced() {
        assert_eq!(0u32.max(MIN_BUFFER_COUNT), MIN_BUFFER_COUNT);
        assert_eq!(8u32.max(MIN_BUFFER_COUNT), 8);
    }
}
