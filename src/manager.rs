//! Owns the camera handle and coordinates its lifecycle: open/close, preview
//! start/stop, parameter pushes with safe-mode rollback, torch and exposure
//! control, and the autofocus scheduler bound to the preview session.

use crate::autofocus::{AutoFocusScheduler, DEFAULT_AUTOFOCUS_INTERVAL_MS};
use crate::device::{
    open_camera, CameraDevice, CameraProvider, CameraSelection, FlashMode, FocusMode, OpenCamera,
};
use crate::error::{QrcamError, Result};
use crate::selector::{select_configuration, PreviewGeometry};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exposure target when the torch is lit, in EV.
const EXPOSURE_WHEN_LIT: f32 = 0.0;
/// Exposure target when the torch is off, in EV.
const EXPOSURE_WHEN_DARK: f32 = 1.5;

struct ManagerState {
    camera: Option<OpenCamera>,
    geometry: Option<PreviewGeometry>,
    previewing: bool,
    autofocus: Option<AutoFocusScheduler>,
    selection: CameraSelection,
    autofocus_interval_ms: u64,
    display_orientation: Option<u32>,
}

/// Exclusive owner of the capture device. All mutating operations serialize
/// through one mutex; no two may race on the same handle.
pub struct CameraManager {
    provider: Arc<dyn CameraProvider>,
    state: Mutex<ManagerState>,
}

impl CameraManager {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(ManagerState {
                camera: None,
                geometry: None,
                previewing: false,
                autofocus: None,
                selection: CameraSelection::NoPreference,
                autofocus_interval_ms: DEFAULT_AUTOFOCUS_INTERVAL_MS,
                display_orientation: None,
            }),
        }
    }

    /// Which camera the next `open` uses.
    pub fn set_camera_selection(&self, selection: CameraSelection) {
        self.state.lock().selection = selection;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().camera.is_some()
    }

    pub fn is_previewing(&self) -> bool {
        self.state.lock().previewing
    }

    /// Raw sensor-facing preview resolution of the current session.
    pub fn preview_size(&self) -> Option<(u32, u32)> {
        self.state.lock().geometry.map(|g| g.camera_resolution)
    }

    pub fn geometry(&self) -> Option<PreviewGeometry> {
        self.state.lock().geometry
    }

    /// Open the camera driver and configure it for the given screen size and
    /// display rotation. Idempotent while already open; geometry is computed
    /// on the first open of a session and cached until `close`.
    pub async fn open(&self, width: u32, height: u32, display_rotation: i32) -> Result<()> {
        let mut state = self.state.lock();
        let device = match &state.camera {
            Some(camera) => Arc::clone(&camera.device),
            None => {
                let camera = open_camera(self.provider.as_ref(), state.selection)?;
                let device = Arc::clone(&camera.device);
                state.camera = Some(camera);
                device
            }
        };
        if let Some(degrees) = state.display_orientation {
            if let Err(e) = device.lock().set_display_orientation(degrees) {
                warn!("Could not apply display orientation {}: {}", degrees, e);
            }
        }

        if state.geometry.is_none() {
            let geometry = {
                let guard = device.lock();
                select_configuration(guard.as_ref(), (width, height), display_rotation)?
            };
            info!(
                "Configured preview: {}x{} (rotation {}, mirrored {})",
                geometry.camera_resolution.0,
                geometry.camera_resolution.1,
                geometry.rotation_to_apply,
                geometry.mirrored
            );
            state.geometry = Some(geometry);
        }

        Self::apply_parameters_locked(&mut state, false);
        Ok(())
    }

    /// Recompute geometry for a changed surface and re-push parameters.
    /// No-op while closed.
    pub async fn reconfigure(&self, width: u32, height: u32, display_rotation: i32) -> Result<()> {
        let mut state = self.state.lock();
        let device = match &state.camera {
            Some(camera) => Arc::clone(&camera.device),
            None => return Ok(()),
        };
        let geometry = {
            let guard = device.lock();
            select_configuration(guard.as_ref(), (width, height), display_rotation)?
        };
        state.geometry = Some(geometry);
        Self::apply_parameters_locked(&mut state, false);
        Ok(())
    }

    /// Push preview-size and focus-mode parameters to the device. A hardware
    /// rejection rolls back to the last known-good snapshot and retries once
    /// in safe mode; a second rejection is logged and the device keeps
    /// whatever it retained. Never fatal.
    pub fn apply_parameters(&self, safe_mode: bool) {
        let mut state = self.state.lock();
        Self::apply_parameters_locked(&mut state, safe_mode);
    }

    fn apply_parameters_locked(state: &mut ManagerState, safe_mode: bool) {
        let device = match &state.camera {
            Some(camera) => Arc::clone(&camera.device),
            None => return,
        };
        let geometry = match state.geometry.as_mut() {
            Some(geometry) => geometry,
            None => return,
        };

        if safe_mode {
            warn!("In camera config safe mode -- most settings will not be honored");
        }

        let mut guard = device.lock();
        let snapshot = guard.snapshot_parameters();
        if let Err(e) = Self::push_parameters(guard.as_mut(), geometry, safe_mode) {
            warn!("Camera rejected parameters, resetting and retrying in safe mode: {}", e);
            if let Err(e) = guard.restore_parameters(&snapshot) {
                warn!("Could not restore saved camera parameters: {}", e);
            }
            if let Err(e) = Self::push_parameters(guard.as_mut(), geometry, true) {
                warn!("Camera rejected even safe-mode parameters! No configuration: {}", e);
                return;
            }
        }

        // The hardware may quietly adjust the size it accepted; adopt it so
        // the decode path works with real dimensions.
        let actual = guard.preview_size();
        if actual != geometry.camera_resolution {
            warn!(
                "Camera said it supported preview size {}x{}, but after setting it, preview size is {}x{}",
                geometry.camera_resolution.0,
                geometry.camera_resolution.1,
                actual.0,
                actual.1
            );
            geometry.camera_resolution = actual;
            let screen_portrait = geometry.screen_size.0 < geometry.screen_size.1;
            let preview_portrait = actual.0 < actual.1;
            geometry.preview_size_on_screen = if screen_portrait == preview_portrait {
                actual
            } else {
                (actual.1, actual.0)
            };
        }
    }

    fn push_parameters(
        device: &mut (dyn CameraDevice + '_),
        geometry: &PreviewGeometry,
        safe_mode: bool,
    ) -> std::result::Result<(), crate::error::CameraError> {
        if !safe_mode {
            // Maybe auto-focus was selected but is not available; fall
            // through without a focus mode in that case.
            let supported = device.supported_focus_modes();
            if let Some(mode) = find_settable_value("focus mode", &supported, &[FocusMode::Auto]) {
                device.set_focus_mode(mode)?;
            }
        }
        device.set_preview_size(geometry.camera_resolution)?;
        device.set_display_orientation(geometry.rotation_to_apply)?;
        Ok(())
    }

    /// Begin drawing preview frames and spin up the autofocus cycle.
    /// Idempotent.
    pub async fn start_preview(&self) -> Result<()> {
        let mut state = self.state.lock();
        let device = match &state.camera {
            Some(camera) => Arc::clone(&camera.device),
            None => return Ok(()),
        };
        if state.previewing {
            return Ok(());
        }
        device
            .lock()
            .start_preview()
            .map_err(QrcamError::Camera)?;
        state.previewing = true;
        state.autofocus = Some(AutoFocusScheduler::new(
            device,
            state.autofocus_interval_ms,
        ));
        Ok(())
    }

    /// Stop preview frames and tear down the autofocus cycle. Idempotent.
    pub async fn stop_preview(&self) {
        let mut state = self.state.lock();
        Self::stop_preview_locked(&mut state);
    }

    fn stop_preview_locked(state: &mut ManagerState) {
        if let Some(scheduler) = state.autofocus.take() {
            scheduler.stop();
        }
        if state.previewing {
            if let Some(camera) = &state.camera {
                if let Err(e) = camera.device.lock().stop_preview() {
                    warn!("Error stopping preview: {}", e);
                }
            }
            state.previewing = false;
        }
    }

    /// Release the camera driver. Idempotent; clears cached geometry so the
    /// next `open` recomputes it.
    pub async fn close(&self) {
        let mut state = self.state.lock();
        Self::stop_preview_locked(&mut state);
        if let Some(camera) = state.camera.take() {
            camera.device.lock().release();
            info!("Camera #{} released", camera.index);
        }
        state.geometry = None;
    }

    /// Switch the torch. No-op when already in the requested state. The
    /// autofocus cycle is paused around the flash/exposure changes and
    /// restarted afterwards if it had been running.
    pub async fn set_torch(&self, enabled: bool) {
        let mut state = self.state.lock();
        let device = match &state.camera {
            Some(camera) => Arc::clone(&camera.device),
            None => return,
        };

        if torch_state(device.lock().as_ref()) == enabled {
            return;
        }

        let was_running = state.autofocus.is_some();
        if let Some(scheduler) = state.autofocus.take() {
            scheduler.stop();
        }

        {
            let mut guard = device.lock();
            let supported = guard.supported_flash_modes();
            let desired: &[FlashMode] = if enabled {
                &[FlashMode::Torch, FlashMode::On]
            } else {
                &[FlashMode::Off]
            };
            if let Some(mode) = find_settable_value("flash mode", &supported, desired) {
                if guard.flash_mode() == Some(mode) {
                    debug!("Flash mode already set to {:?}", mode);
                } else if let Err(e) = guard.set_flash_mode(mode) {
                    warn!("Could not set flash mode {:?}: {}", mode, e);
                }
            }
            set_best_exposure(guard.as_mut(), enabled);
        }

        if was_running {
            state.autofocus = Some(AutoFocusScheduler::new(
                device,
                state.autofocus_interval_ms,
            ));
        }
    }

    /// Whether the torch is currently lit, per the device's flash mode.
    pub fn torch_enabled(&self) -> bool {
        let state = self.state.lock();
        match &state.camera {
            Some(camera) => torch_state(camera.device.lock().as_ref()),
            None => false,
        }
    }

    /// Change the autofocus cadence. Rejects zero; forwarded to a live
    /// scheduler, otherwise takes effect when the next preview starts.
    pub fn set_autofocus_interval(&self, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            return Err(QrcamError::invalid_argument(
                "Autofocus interval must be greater than 0",
            ));
        }
        let mut state = self.state.lock();
        state.autofocus_interval_ms = interval_ms;
        if let Some(scheduler) = &state.autofocus {
            scheduler.set_interval(interval_ms)?;
        }
        Ok(())
    }

    /// Trigger a focus cycle now, if the preview is running.
    pub fn force_auto_focus(&self) {
        let state = self.state.lock();
        if let Some(scheduler) = &state.autofocus {
            scheduler.start();
        }
    }

    /// Rotation pushed to the driver for drawing preview frames. Remembered
    /// and re-applied on the next open.
    pub fn set_display_orientation(&self, degrees: u32) {
        let mut state = self.state.lock();
        state.display_orientation = Some(degrees);
        if let Some(camera) = &state.camera {
            if let Err(e) = camera.device.lock().set_display_orientation(degrees) {
                warn!("Could not set display orientation {}: {}", degrees, e);
            }
        }
    }
}

fn torch_state(device: &(dyn CameraDevice + '_)) -> bool {
    matches!(
        device.flash_mode(),
        Some(FlashMode::On) | Some(FlashMode::Torch)
    )
}

/// First desired value the device actually supports, if any.
fn find_settable_value<T: PartialEq + Copy + Debug>(
    name: &str,
    supported: &[T],
    desired: &[T],
) -> Option<T> {
    for &value in desired {
        if supported.contains(&value) {
            debug!("Can set {} to {:?}", name, value);
            return Some(value);
        }
    }
    debug!("No supported {} values match {:?}", name, desired);
    None
}

/// Nudge exposure compensation down when the light is on and up when it is
/// off, within the device's reported bounds.
fn set_best_exposure(device: &mut (dyn CameraDevice + '_), light_on: bool) {
    let range = device.exposure_range();
    if !range.is_supported() {
        debug!("Camera does not support exposure compensation");
        return;
    }

    let target_ev = if light_on {
        EXPOSURE_WHEN_LIT
    } else {
        EXPOSURE_WHEN_DARK
    };
    let steps = (target_ev / range.step_ev).round() as i32;
    let actual_ev = range.step_ev * steps as f32;
    let steps = steps.clamp(range.min_steps, range.max_steps);

    if device.exposure_compensation() == steps {
        debug!(
            "Exposure compensation already set to {} / {}",
            steps, actual_ev
        );
    } else {
        info!("Setting exposure compensation to {} / {}", steps, actual_ev);
        if let Err(e) = device.set_exposure_compensation(steps) {
            warn!("Could not set exposure compensation: {}", e);
        }
    }
}
