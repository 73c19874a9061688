// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture engine.

use std::fmt;
use std::path::PathBuf;

/// Result type alias using [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

/// Top-level error type, wrapping each subsystem's error enum.
#[derive(Debug, Clone)]
pub enum AppError {
    MediaGraph(MediaGraphError),
    Sensor(SensorError),
    Stream(StreamError),
    Dng(DngError),
    Config(ConfigError),
    Io(String),
}

/// Media Controller graph errors (4.A).
#[derive(Debug, Clone)]
pub enum MediaGraphError {
    /// No `/dev/mediaN` node reports this driver name.
    NotFound { driver: String },
    /// No entity in the topology matches the given name substring.
    EntityNotFound { name: String },
    /// `resolve_devnode` could not find `/dev/*` for this major:minor pair.
    DevnodeNotFound { major: u32, minor: u32 },
    /// A media-controller ioctl failed.
    IoctlFailed { name: &'static str, errno: i32 },
}

/// Sensor device errors (4.B).
#[derive(Debug, Clone)]
pub enum SensorError {
    /// The driver rejected the requested resolution/format/frame-interval.
    UnsupportedMode,
    /// The requested pixel format has no fast-path support.
    UnsupportedPixelFormat,
    /// A V4L2 ioctl failed.
    IoctlFailed { name: &'static str, errno: i32 },
}

/// Streamer errors (4.C).
#[derive(Debug, Clone)]
pub enum StreamError {
    /// A streaming ioctl failed.
    IoctlFailed { name: &'static str, errno: i32 },
    /// The driver granted fewer than the minimum 4 buffers.
    BufferCountTooLow { requested: u32, granted: u32 },
    /// `mmap` of a queried buffer failed.
    MmapFailed,
}

/// DNG writer errors (4.G).
#[derive(Debug, Clone)]
pub enum DngError {
    FileIoError(String),
    EncodingFailed(String),
}

/// Config loader errors (4.H).
#[derive(Debug, Clone)]
pub enum ConfigError {
    NotFound(PathBuf),
    Malformed { section: String, key: String },
    Io(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MediaGraph(e) => write!(f, "media graph error: {e}"),
            AppError::Sensor(e) => write!(f, "sensor error: {e}"),
            AppError::Stream(e) => write!(f, "stream error: {e}"),
            AppError::Dng(e) => write!(f, "DNG error: {e}"),
            AppError::Config(e) => write!(f, "config error: {e}"),
            AppError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl fmt::Display for MediaGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaGraphError::NotFound { driver } => {
                write!(f, "no media device found for driver '{driver}'")
            }
            MediaGraphError::EntityNotFound { name } => {
                write!(f, "no entity matching '{name}'")
            }
            MediaGraphError::DevnodeNotFound { major, minor } => {
                write!(f, "no devnode for {major}:{minor}")
            }
            MediaGraphError::IoctlFailed { name, errno } => {
                write!(f, "{name} failed (errno {errno})")
            }
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::UnsupportedMode => write!(f, "unsupported mode"),
            SensorError::UnsupportedPixelFormat => write!(f, "unsupported pixel format"),
            SensorError::IoctlFailed { name, errno } => {
                write!(f, "{name} failed (errno {errno})")
            }
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::IoctlFailed { name, errno } => {
                write!(f, "{name} failed (errno {errno})")
            }
            StreamError::BufferCountTooLow { requested, granted } => {
                write!(f, "requested {requested} buffers, driver granted {granted}")
            }
            StreamError::MmapFailed => write!(f, "mmap of buffer failed"),
        }
    }
}

impl fmt::Display for DngError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DngError::FileIoError(msg) => write!(f, "{msg}"),
            DngError::EncodingFailed(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotFound(path) => write!(f, "config file not found: {}", path.display()),
            ConfigError::Malformed { section, key } => {
                write!(f, "unknown key '{key}' in section '{section}'")
            }
            ConfigError::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for MediaGraphError {}
impl std::error::Error for SensorError {}
impl std::error::Error for StreamError {}
impl std::error::Error for DngError {}
impl std::error::Error for ConfigError {}

impl From<MediaGraphError> for AppError {
    fn from(err: MediaGraphError) -> Self {
        AppError::MediaGraph(err)
    }
}

impl From<SensorError> for AppError {
    fn from(err: SensorError) -> Self {
        AppError::Sensor(err)
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        AppError::Stream(err)
    }
}

impl From<DngError> for AppError {
    fn from(err: DngError) -> Self {
        AppError::Dng(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}
