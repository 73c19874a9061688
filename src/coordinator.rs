// SPDX-License-Identifier: GPL-3.0-only

//! Capture coordinator: wires the capture and process pipelines together,
//! implements the drop policy and the burst state machine (component
//! 4.E).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::{DeviceInfo, SensorInfo};
use crate::debayer::{self, RgbImage, Rotation};
use crate::dng::{self, DngCalibration, FrameExposure};
use crate::errors::AppError;
use crate::media_graph;
use crate::pipeline::{Pipeline, Poster};
use crate::sensor::{GainControl, SensorDevice, SensorMode};
use crate::streamer::Streamer;

/// The active sensor device handle and its selected gain control, shared
/// so a later burst request can latch auto-gain/auto-exposure without the
/// caller needing to have kept its own reference (§5: only the capture
/// pipeline opens sensor devnodes; everyone else sees this handle).
type ActiveSensor = (Arc<Mutex<SensorDevice>>, Option<GainControl>);

/// Two monotonic counters visible to the drop decision (3.).
#[derive(Default)]
pub struct PipelineCounters {
    pub received: AtomicU64,
    pub processed: AtomicU64,
}

/// `{remaining, total, temp_dir}` (3.), plus the pre-burst auto-gain/
/// auto-exposure control values latched at burst start so they can be
/// restored once the burst finishes (4.E burst-end step 2).
pub struct BurstState {
    pub remaining: u32,
    pub total: u32,
    pub temp_dir: PathBuf,
    prev_autogain: i32,
    prev_exposure_auto: i32,
}

/// The capture loop's cooperative stop flag and any pending camera swap
/// request, set from outside the capture pipeline thread and observed by
/// it between streamer runs (§5: only the capture thread may swap
/// cameras, but the request to do so may come from anywhere).
#[derive(Default)]
struct CaptureControl {
    stop_handle: Option<Arc<std::sync::atomic::AtomicBool>>,
    pending_swap: Option<(SensorInfo, SensorMode)>,
}

/// An immutable snapshot of the active sensor's identity and runtime
/// state, embedded in every frame's payload so the process pipeline never
/// reads shared mutable sensor state (Open Question #2 in the design
/// notes).
#[derive(Debug, Clone)]
pub struct SensorSnapshot {
    pub info: SensorInfo,
    pub calibration: DngCalibration,
    pub mode: SensorMode,
    pub gain: i32,
    pub gain_max: i32,
    pub auto_exposure: bool,
    pub orientation_degrees: u32,
    /// Live `V4L2_CID_EXPOSURE_ABSOLUTE` reading at frame-ready time, in
    /// sensor exposure rows.
    pub exposure_rows: u32,
}

/// A frame copied off the kernel buffer by the capture callback, ready to
/// cross into the process pipeline (3. `OwnedImage`).
pub struct OwnedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub row_stride: u32,
    pub sequence: u32,
    pub snapshot: SensorSnapshot,
}

/// Host-supplied sinks the coordinator invokes; never coupled to any GUI
/// framework (§9 design notes).
pub struct HostHooks {
    pub preview_ready: Box<dyn Fn(RgbImage) + Send + Sync>,
    pub burst_finalized: Box<dyn Fn(PathBuf, String) + Send + Sync>,
    pub show_error: Box<dyn Fn(String) + Send + Sync>,
}

struct SharedState {
    counters: PipelineCounters,
    burst: Mutex<Option<BurstState>>,
    preview_skip: AtomicU64,
    active_sensor: Mutex<Option<ActiveSensor>>,
    capture_control: Mutex<CaptureControl>,
}

/// Wires together the capture pipeline (owns device/streamer) and the
/// process pipeline (owns debayer + DNG writer).
pub struct Coordinator {
    capture_pipeline: Pipeline,
    process_pipeline: Pipeline,
    shared: Arc<SharedState>,
    hooks: Arc<HostHooks>,
}

impl Coordinator {
    pub fn new(hooks: HostHooks, preview_width: u32) -> Self {
        Coordinator {
            capture_pipeline: Pipeline::spawn("capture"),
            process_pipeline: Pipeline::spawn("process"),
            shared: Arc::new(SharedState {
                counters: PipelineCounters::default(),
                burst: Mutex::new(None),
                preview_skip: AtomicU64::new(preview_width as u64),
                active_sensor: Mutex::new(None),
                capture_control: Mutex::new(CaptureControl::default()),
            }),
            hooks: Arc::new(hooks),
        }
    }

    /// Setup (4.E step 1-3), posted onto the capture pipeline: open the
    /// Media Controller graph, resolve sensors, swap to the default
    /// (rear) sensor and begin streaming. The streamer's dequeue loop
    /// then runs for the lifetime of the capture pipeline thread,
    /// handing every frame to [`on_frame_ready`]'s drop policy via the
    /// process pipeline's poster.
    pub fn setup(
        &self,
        driver_name: String,
        device: DeviceInfo,
        rear: SensorInfo,
        front: SensorInfo,
        rear_mode: SensorMode,
    ) {
        let shared = self.shared.clone();
        let hooks = self.hooks.clone();
        let process_poster = self.process_pipeline.poster();
        self.capture_pipeline.post(move || {
            if let Err(e) = run_capture_loop(
                &driver_name,
                &device,
                &rear,
                &rear_mode,
                Some(&front),
                &shared,
                &hooks,
                &process_poster,
            ) {
                (hooks.show_error)(format!("setup failed: {e}"));
            }
        });
    }

    /// Requests a swap to `to` at `mode`, reusing the capture loop already
    /// running from [`setup`] (4.E camera swap): sets the pending target,
    /// then signals the running streamer's cooperative stop flag so the
    /// capture loop observes it between frames and reconfigures before
    /// restarting streaming. A no-op if [`setup`] hasn't been called yet.
    pub fn swap_camera(&self, to: SensorInfo, mode: SensorMode) {
        let mut control = self.shared.capture_control.lock().unwrap();
        control.pending_swap = Some((to, mode));
        if let Some(stop_handle) = &control.stop_handle {
            stop_handle.store(true, Ordering::Release);
        }
    }

    /// Frame-ready callback (4.E): implements the drop policy
    /// `received - 1 != processed && burst.remaining == 0`. Exposed
    /// directly (in addition to being wired from the live streamer loop
    /// in [`setup`]) so synthetic sources can drive the same policy in
    /// tests (S2).
    pub fn on_frame_ready(&self, image: OwnedImage) {
        apply_drop_policy_and_post(image, &self.shared, &self.hooks, &self.process_pipeline.poster());
    }

    /// Burst start (4.E), posted onto the process pipeline so it
    /// serializes against frame processing.
    pub fn start_burst(&self, total: u32, sensor: Arc<Mutex<SensorDevice>>, gain_ctrl: Option<GainControl>) {
        let shared = self.shared.clone();
        self.process_pipeline
            .post(move || run_burst_start(total, sensor, gain_ctrl, &shared));
    }

    /// Burst start using the sensor handle captured during [`setup`]'s
    /// streaming loop, so external callers (the CLI's `--once` flag, a
    /// UI shutter button) never need to hold their own `SensorDevice`
    /// reference.
    pub fn request_burst(&self, total: u32) {
        let shared = self.shared.clone();
        let hooks = self.hooks.clone();
        self.process_pipeline.post(move || {
            let active = shared.active_sensor.lock().unwrap().clone();
            match active {
                Some((sensor, gain_ctrl)) => run_burst_start(total, sensor, gain_ctrl, &shared),
                None => (hooks.show_error)("burst requested before sensor setup completed".to_string()),
            }
        });
    }

    /// Posts a control set onto the process pipeline against the sensor
    /// handle captured during [`setup`]'s streaming loop. Posting onto the
    /// capture pipeline would never run: that pipeline's single worker
    /// thread is parked inside the streamer's dequeue loop for the
    /// lifetime of the stream (see [`run_capture_loop`]), the same reason
    /// [`request_burst`] already locks the sensor from here rather than
    /// from the capture pipeline (§5: sensor ioctls outside the capture
    /// thread's own mode-set are safe as long as they go through this
    /// shared handle, including the tap-to-focus single-shot trigger since
    /// this codebase declines the low-latency exception the spec allows —
    /// see the Open Question decisions).
    pub fn set_control(&self, id: u32, value: i32) {
        let shared = self.shared.clone();
        let hooks = self.hooks.clone();
        self.process_pipeline.post(move || {
            let active = shared.active_sensor.lock().unwrap().clone();
            match active {
                Some((sensor, _gain_ctrl)) => {
                    if let Ok(dev) = sensor.lock() {
                        if let Err(e) = dev.set_control(id, value) {
                            (hooks.show_error)(format!("set_control failed: {e}"));
                        }
                    }
                }
                None => (hooks.show_error)("control set requested before sensor setup completed".to_string()),
            }
        });
    }

    pub fn received(&self) -> u64 {
        self.shared.counters.received.load(Ordering::Acquire)
    }

    pub fn processed(&self) -> u64 {
        self.shared.counters.processed.load(Ordering::Acquire)
    }

    /// Shuts down both pipelines in reverse of startup order (§6). The
    /// capture pipeline's worker thread is parked inside the streamer's
    /// dequeue loop for as long as it runs, so its stop flag has to be
    /// signalled before `free()` can join it.
    pub fn shutdown(&mut self) {
        if let Some(stop_handle) = self.shared.capture_control.lock().unwrap().stop_handle.clone() {
            stop_handle.store(true, Ordering::Release);
        }
        self.process_pipeline.free();
        self.capture_pipeline.free();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shared body of [`Coordinator::start_burst`]/[`Coordinator::request_burst`]:
/// latches auto-gain/auto-exposure off and opens the burst state (4.E
/// burst-start steps 1-3).
fn run_burst_start(
    total: u32,
    sensor: Arc<Mutex<SensorDevice>>,
    gain_ctrl: Option<GainControl>,
    shared: &Arc<SharedState>,
) {
    let temp_dir = match create_burst_dir() {
        Ok(dir) => dir,
        Err(e) => {
            warn!(error = %e, "failed to create burst directory");
            return;
        }
    };

    let (prev_autogain, prev_exposure_auto) = if let Ok(dev) = sensor.lock() {
        let prev_autogain = dev.get_control(crate::sensor::V4L2_CID_AUTOGAIN).unwrap_or(1);
        let prev_exposure_auto = dev.get_control(crate::sensor::V4L2_CID_EXPOSURE_AUTO).unwrap_or(3);
        let _ = dev.set_control(crate::sensor::V4L2_CID_AUTOGAIN, 0);
        let _ = dev.set_control(crate::sensor::V4L2_CID_EXPOSURE_AUTO, 1);
        let _ = gain_ctrl; // gain control id recorded via SensorSnapshot at capture time
        (prev_autogain, prev_exposure_auto)
    } else {
        (1, 3)
    };

    *shared.burst.lock().unwrap() = Some(BurstState {
        remaining: total,
        total,
        temp_dir,
        prev_autogain,
        prev_exposure_auto,
    });
    info!(total, "burst started");
}

fn create_burst_dir() -> std::io::Result<PathBuf> {
    let unique = uuid::Uuid::new_v4();
    let dir = std::env::temp_dir().join(format!("megapixels.{unique}"));
    std::fs::create_dir(&dir)?;
    Ok(dir)
}

/// Drop policy (4.E frame-ready callback): drops unless this is the
/// single frame allowed in flight outside a burst, or a burst is active.
fn apply_drop_policy_and_post(
    image: OwnedImage,
    shared: &Arc<SharedState>,
    hooks: &Arc<HostHooks>,
    process_poster: &Poster,
) {
    let received = shared.counters.received.fetch_add(1, Ordering::Release) + 1;
    let processed = shared.counters.processed.load(Ordering::Acquire);
    let burst_remaining = shared
        .burst
        .lock()
        .unwrap()
        .as_ref()
        .map(|b| b.remaining)
        .unwrap_or(0);

    if received - 1 != processed && burst_remaining == 0 {
        // Drop: free the buffer (it goes out of scope here) and do not
        // post.
        return;
    }

    let shared = shared.clone();
    let hooks = hooks.clone();
    process_poster.post(move || {
        process_image(image, &shared, &hooks);
    });
}

/// The pair of pads an entity's sensor link runs over, found by locating
/// whichever known link touches one of the entity's own pads.
fn sensor_link_pads(graph: &media_graph::Device, entity_id: u32) -> Option<(u32, u32)> {
    let pad_ids: Vec<u32> = graph.pad_of_entity(entity_id).iter().map(|p| p.id).collect();
    graph
        .links
        .iter()
        .find(|l| pad_ids.contains(&l.source_pad) || pad_ids.contains(&l.sink_pad))
        .map(|l| (l.source_pad, l.sink_pad))
}

/// Resolves `info`'s devnode via the Media Controller graph and opens it,
/// returning everything the capture loop needs to start streaming: the
/// devnode, the link pads that were enabled to reach it, the opened
/// sensor, its calibration, and the frame-ready snapshot to stamp onto
/// every `OwnedImage`.
#[allow(clippy::type_complexity)]
fn resolve_and_open_sensor(
    graph: &mut media_graph::Device,
    device: &DeviceInfo,
    info: &SensorInfo,
    mode: &SensorMode,
) -> Result<(PathBuf, (u32, u32), SensorDevice, Option<GainControl>, SensorSnapshot), AppError> {
    let entity = graph
        .find_entity(&info.driver)
        .ok_or_else(|| AppError::MediaGraph(crate::errors::MediaGraphError::EntityNotFound {
            name: info.driver.clone(),
        }))?
        .clone();
    let pads_to_enable = sensor_link_pads(graph, entity.id).ok_or_else(|| {
        AppError::MediaGraph(crate::errors::MediaGraphError::EntityNotFound {
            name: info.driver.clone(),
        })
    })?;
    let iface = graph.interface_of_entity(entity.id).ok_or_else(|| {
        AppError::MediaGraph(crate::errors::MediaGraphError::DevnodeNotFound { major: 0, minor: 0 })
    })?;
    let devnode = media_graph::Device::resolve_devnode(iface.devnode_major, iface.devnode_minor)?;

    let sensor = SensorDevice::open(devnode.to_string_lossy().as_ref())?;
    sensor.apply_mode(mode)?;
    info!(driver = %info.driver, entity_id = entity.id, "sensor configured");

    let calibration = DngCalibration {
        make: device.make.clone(),
        model: device.model.clone(),
        color_matrix: info.color_matrix.unwrap_or(crate::dng::SRGB_FALLBACK_MATRIX),
        forward_matrix: info.forward_matrix,
        black_level: info.black_level,
        white_level: info.white_level,
        focal_length_mm: info.focal_length_mm,
        crop_factor: info.crop_factor,
        f_number: info.f_number,
    };
    let gain_ctrl = sensor.probe_gain_control();
    let gain = gain_ctrl.map(|g| sensor.get_control(g.control_id()).unwrap_or(0)).unwrap_or(0);
    let gain_max = gain_ctrl.and_then(|g| sensor.control_max(g.control_id())).unwrap_or(0);
    let exposure_rows = sensor
        .get_control(crate::sensor::V4L2_CID_EXPOSURE_ABSOLUTE)
        .unwrap_or(mode.height as i32)
        .max(0) as u32;

    let snapshot = SensorSnapshot {
        info: info.clone(),
        calibration,
        mode: *mode,
        gain,
        gain_max,
        auto_exposure: true,
        orientation_degrees: info.rotate,
        exposure_rows,
    };

    Ok((devnode, pads_to_enable, sensor, gain_ctrl, snapshot))
}

/// Runs the capture pipeline's whole lifetime: resolves and streams the
/// initial sensor, then loops back to reconfigure and restream whenever a
/// camera swap is requested (4.E setup + camera swap). Returns once
/// [`Coordinator::shutdown`] signals the stop flag with no swap pending —
/// this is the capture pipeline's one suspension point (§5).
fn run_capture_loop(
    driver_name: &str,
    device: &DeviceInfo,
    initial: &SensorInfo,
    initial_mode: &SensorMode,
    initial_other: Option<&SensorInfo>,
    shared: &Arc<SharedState>,
    hooks: &Arc<HostHooks>,
    process_poster: &Poster,
) -> Result<(), AppError> {
    let mut graph = media_graph::Device::open_graph(driver_name)?;

    // Disable the opposite sensor's link up front so only one link is ever
    // enabled (testable property 1), even before the first swap.
    if let Some(other) = initial_other {
        if let Some(entity) = graph.find_entity(&other.driver).cloned() {
            if let Some(pads) = sensor_link_pads(&graph, entity.id) {
                let _ = graph.set_link(pads.0, pads.1, false);
            }
        }
    }

    let mut target_info = initial.clone();
    let mut target_mode = *initial_mode;
    let mut active_pads: Option<(u32, u32)> = None;

    loop {
        let (devnode, pads_to_enable, sensor, gain_ctrl, snapshot) =
            resolve_and_open_sensor(&mut graph, device, &target_info, &target_mode)?;

        if let Some(old_pads) = active_pads.take() {
            if old_pads != pads_to_enable {
                graph.set_link(old_pads.0, old_pads.1, false)?;
            }
        }
        graph.set_link(pads_to_enable.0, pads_to_enable.1, true)?;
        active_pads = Some(pads_to_enable);

        let sensor = Arc::new(Mutex::new(sensor));
        *shared.active_sensor.lock().unwrap() = Some((sensor.clone(), gain_ctrl));

        let streamer = Streamer::open(
            devnode.to_string_lossy().as_ref(),
            target_mode.width,
            target_mode.height,
            target_mode.pixel_format,
        )?;

        {
            let mut control = shared.capture_control.lock().unwrap();
            control.stop_handle = Some(streamer.stop_handle());
            control.pending_swap = None;
        }

        let shared_loop = shared.clone();
        let hooks_loop = hooks.clone();
        let poster_loop = process_poster.clone();
        streamer.run(4, move |frame| {
            let image = OwnedImage {
                data: frame.data.to_vec(),
                width: frame.width,
                height: frame.height,
                row_stride: frame.width,
                sequence: frame.sequence,
                snapshot: snapshot.clone(),
            };
            apply_drop_policy_and_post(image, &shared_loop, &hooks_loop, &poster_loop);
        })?;

        let pending = shared.capture_control.lock().unwrap().pending_swap.take();
        match pending {
            Some((next_info, next_mode)) => {
                info!(driver = %next_info.driver, "camera swap");
                target_info = next_info;
                target_mode = next_mode;
            }
            None => break,
        }
    }

    Ok(())
}

/// Process callback (4.E), invoked on the process pipeline for every
/// posted frame.
fn process_image(image: OwnedImage, shared: &Arc<SharedState>, hooks: &Arc<HostHooks>) {
    let mut finalize: Option<(PathBuf, String)> = None;
    let mut restore_auto: Option<(i32, i32)> = None;

    {
        let mut burst_guard = shared.burst.lock().unwrap();
        if let Some(burst) = burst_guard.as_mut() {
            if burst.remaining > 0 {
                let index = burst.total - burst.remaining;
                if let Err(e) = write_burst_frame(&image, burst.total, index, &burst.temp_dir) {
                    (hooks.show_error)(format!("DNG write failed: {e}"));
                }
                burst.remaining -= 1;

                if burst.remaining == 0 {
                    let prefix = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
                    finalize = Some((burst.temp_dir.clone(), prefix));
                    restore_auto = Some((burst.prev_autogain, burst.prev_exposure_auto));
                }
            }
        }
        if finalize.is_some() {
            *burst_guard = None;
        }
    }

    // 4.E burst-end step 2: restore the pre-burst auto-gain/auto-exposure
    // state that `run_burst_start` latched and disabled.
    if let Some((prev_autogain, prev_exposure_auto)) = restore_auto {
        if let Some((sensor, _)) = shared.active_sensor.lock().unwrap().clone() {
            if let Ok(dev) = sensor.lock() {
                let _ = dev.set_control(crate::sensor::V4L2_CID_AUTOGAIN, prev_autogain);
                let _ = dev.set_control(crate::sensor::V4L2_CID_EXPOSURE_AUTO, prev_exposure_auto);
            }
        }
    }

    if let Some((temp_dir, prefix)) = finalize {
        (hooks.burst_finalized)(temp_dir, prefix);
    }

    let skip = debayer::clamp_skip(image.width, shared.preview_skip.load(Ordering::Relaxed) as u32);
    let black_level = image.snapshot.calibration.black_level.unwrap_or(0) as i32;
    let rgb = debayer::debayer_bggr8(
        &image.data,
        image.width,
        image.height,
        image.row_stride,
        skip,
        black_level,
    );
    let rotation = Rotation::from_degrees(image.snapshot.orientation_degrees);
    let rotated = debayer::rotate(&rgb, rotation);
    (hooks.preview_ready)(rotated);

    shared.counters.processed.fetch_add(1, Ordering::Release);
}

fn write_burst_frame(
    image: &OwnedImage,
    total: u32,
    index: u32,
    temp_dir: &std::path::Path,
) -> std::io::Result<()> {
    let exposure = FrameExposure {
        frame_interval_s: image.snapshot.mode.frame_interval.numerator as f64
            / image.snapshot.mode.frame_interval.denominator.max(1) as f64,
        exposure_rows: image.snapshot.exposure_rows,
        sensor_height: image.height,
        gain: image.snapshot.gain,
        gain_max: image.snapshot.gain_max,
        iso_min: image.snapshot.info.iso_min.unwrap_or(100),
        iso_max: image.snapshot.info.iso_max.unwrap_or(1600),
    };

    let mut buffer = Vec::new();
    if dng::write_dng(
        &mut buffer,
        &image.data,
        image.width,
        image.height,
        &image.snapshot.calibration,
        &exposure,
        image.snapshot.auto_exposure,
    )
    .is_err()
    {
        return Err(std::io::Error::other("DNG encoding failed"));
    }
    let _ = total;
    std::fs::write(temp_dir.join(format!("{index}.dng")), buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_policy_drops_outside_burst() {
        let received: u64 = 5;
        let processed: u64 = 3;
        let burst_remaining: u32 = 0;
        let should_drop = received - 1 != processed && burst_remaining == 0;
        assert!(should_drop);
    }

    #[test]
    fn drop_policy_never_drops_during_burst() {
        let received: u64 = 5;
        let processed: u64 = 3;
        let burst_remaining: u32 = 2;
        let should_drop = received - 1 != processed && burst_remaining == 0;
        assert!(!should_drop);
    }

    #[test]
    fn drop_policy_keeps_single_in_flight_frame() {
        let received: u64 = 1;
        let processed: u64 = 0;
        let burst_remaining: u32 = 0;
        let should_drop = received - 1 != processed && burst_remaining == 0;
        assert!(!should_drop);
    }
}
