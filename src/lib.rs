// SPDX-License-Identifier: GPL-3.0-only

//! Capture engine driving Linux V4L2 sensors through the Media Controller
//! graph: a two-stage capture/process pipeline producing a decimated RGB
//! preview and DNG burst captures.
//!
//! # Architecture
//!
//! - [`media_graph`]: Media Controller graph discovery and link setup (4.A)
//! - [`sensor`]: V4L2 subdevice mode-set and control probing (4.B)
//! - [`streamer`]: mmap buffer queue/dequeue loop (4.C)
//! - [`pipeline`]: dedicated worker-thread job queues (4.D)
//! - [`coordinator`]: wires the two pipelines, drop policy, burst state (4.E)
//! - [`debayer`]: decimating BGGR preview filter (4.F)
//! - [`dng`]: DNG/TIFF-EP writer (4.G)
//! - [`config`]: per-device INI configuration loader (4.H)

pub mod config;
pub mod coordinator;
pub mod debayer;
pub mod dng;
pub mod errors;
pub mod ioctl_util;
pub mod media_graph;
pub mod pipeline;
pub mod sensor;
pub mod streamer;

pub use config::Config;
pub use coordinator::{Coordinator, HostHooks, OwnedImage};
pub use errors::{AppError, AppResult};
