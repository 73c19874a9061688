// SPDX-License-Identifier: GPL-3.0-only

//! Process entry point (4.K): argument parsing, process-wide setup order,
//! and coordinator wiring for the long-running capture daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use megapixels_engine::config::{self, Config};
use megapixels_engine::coordinator::{Coordinator, HostHooks};
use megapixels_engine::debayer::RgbImage;
use megapixels_engine::sensor::{Fraction, SensorMode};

/// Default sysconfdir/datadir used by the config and post-processor
/// discovery orders (§6) when no packaging override is baked in.
const SYSCONFDIR: &str = "/etc";
const DATADIR: &str = "/usr/share";

/// Decimated preview width this process requests from the coordinator.
const PREVIEW_WIDTH: u32 = 320;

#[derive(Parser)]
#[command(name = "megapixels-engine")]
#[command(about = "Capture engine driving Linux phone camera sensors")]
#[command(version)]
struct Cli {
    /// Path to a megapixels INI config, overriding discovery (§6).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run a single three-frame burst then exit, for scripting and
    /// integration tests.
    #[arg(long)]
    once: bool,
}

static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_quit_signal(_signum: libc::c_int) {
    QUIT_REQUESTED.store(true, Ordering::Release);
}

fn install_quit_handler() {
    unsafe {
        libc::signal(libc::SIGINT, on_quit_signal as usize);
        libc::signal(libc::SIGTERM, on_quit_signal as usize);
    }
}

/// Pins the decimal separator to `.` before the config loader runs (§6).
fn pin_locale() {
    let c_locale = std::ffi::CString::new("C").expect("no interior NUL");
    unsafe {
        libc::setlocale(libc::LC_NUMERIC, c_locale.as_ptr());
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();
}

fn load_config(override_path: Option<&PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = override_path {
        return Ok(config::load(path)?);
    }

    let dt_compatible = config::device_tree_compatible().unwrap_or_else(|| "generic".to_string());
    let path = config::discover_config_path(&dt_compatible, std::path::Path::new(SYSCONFDIR), std::path::Path::new(DATADIR))
        .ok_or("no megapixels config found (see discovery order in the docs)")?;
    Ok(config::load(&path)?)
}

fn sensor_mode_from(info: &config::SensorInfo) -> SensorMode {
    SensorMode {
        width: info.width,
        height: info.height,
        pixel_format: info
            .pixel_format
            .unwrap_or(megapixels_engine::sensor::PixelFormat::Bggr8),
        frame_interval: Fraction {
            numerator: 1,
            denominator: info.rate.max(1),
        },
    }
}

fn spawn_postprocessor(burst_dir: PathBuf, prefix: String) {
    let Some(script) = config::discover_postprocessor_path(
        std::path::Path::new(SYSCONFDIR),
        std::path::Path::new(DATADIR),
    ) else {
        info!("no postprocess.sh found, leaving burst frames in place");
        return;
    };

    match std::process::Command::new(&script)
        .arg(&burst_dir)
        .arg(&prefix)
        .spawn()
    {
        Ok(child) => {
            info!(script = %script.display(), pid = child.id(), "post-processor spawned");
        }
        Err(e) => error!(script = %script.display(), error = %e, "failed to spawn post-processor"),
    }
}

fn main() -> ExitCode {
    init_logging();
    pin_locale();
    install_quit_handler();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "fatal: config load failed");
            return ExitCode::FAILURE;
        }
    };

    let hooks = HostHooks {
        preview_ready: Box::new(on_preview_ready),
        burst_finalized: Box::new(spawn_postprocessor),
        show_error: Box::new(|msg| error!(%msg, "capture engine error")),
    };

    let mut coordinator = Coordinator::new(hooks, PREVIEW_WIDTH);
    let rear_mode = sensor_mode_from(&config.rear);
    coordinator.setup(
        config.device.csi.clone(),
        config.device.clone(),
        config.rear.clone(),
        config.front.clone(),
        rear_mode,
    );

    if cli.once {
        // Give the capture pipeline a moment to finish device/link setup
        // before the burst lands on the process pipeline.
        std::thread::sleep(Duration::from_millis(500));
        coordinator.request_burst(3);
        std::thread::sleep(Duration::from_secs(2));
        coordinator.shutdown();
        return ExitCode::SUCCESS;
    }

    info!("capture engine running, send SIGINT/SIGTERM to quit");
    while !QUIT_REQUESTED.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("quit requested, shutting down pipelines");
    coordinator.shutdown();
    ExitCode::SUCCESS
}

fn on_preview_ready(_image: RgbImage) {
    // No GUI is wired in this binary; a host embedding this engine
    // replaces this hook with its own preview sink.
}
