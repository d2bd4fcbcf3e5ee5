//! Scriptable in-memory camera used by the test suite and `scan_sim`.

use super::{
    CameraDescriptor, CameraDevice, CameraFacing, CameraProvider, ExposureRange, FlashMode,
    FocusMode, ParameterSnapshot,
};
use crate::error::CameraError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Static description of a simulated camera.
#[derive(Debug, Clone)]
pub struct MockCameraSpec {
    pub facing: CameraFacing,
    pub sensor_orientation: u32,
    /// `None` simulates a driver that reports no supported-size data.
    pub supported_sizes: Option<Vec<(u32, u32)>>,
    pub default_size: (u32, u32),
    pub focus_modes: Vec<FocusMode>,
    pub flash_modes: Vec<FlashMode>,
    pub exposure: ExposureRange,
    /// Number of upcoming preview-size pushes the simulated hardware rejects.
    pub reject_preview_pushes: u32,
}

impl Default for MockCameraSpec {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Back,
            sensor_orientation: 90,
            supported_sizes: Some(vec![(1280, 720), (800, 480), (640, 480), (320, 240)]),
            default_size: (640, 480),
            focus_modes: vec![FocusMode::Auto, FocusMode::Fixed],
            flash_modes: vec![FlashMode::Off, FlashMode::On, FlashMode::Torch],
            exposure: ExposureRange {
                min_steps: -12,
                max_steps: 12,
                step_ev: 1.0 / 6.0,
            },
            reject_preview_pushes: 0,
        }
    }
}

/// Observable state of a simulated camera, shared between the device handle
/// and the test that scripted it.
#[derive(Debug)]
pub struct MockState {
    pub preview_size: (u32, u32),
    pub focus_mode: Option<FocusMode>,
    pub flash_mode: Option<FlashMode>,
    pub exposure_compensation: i32,
    pub display_orientation: u32,
    pub previewing: bool,
    pub released: bool,
    pub focus_calls: u32,
    pub cancel_focus_calls: u32,
    pub restore_calls: u32,
    reject_preview_pushes: u32,
}

pub type SharedMockState = Arc<Mutex<MockState>>;

pub struct MockCamera {
    descriptor: CameraDescriptor,
    spec: MockCameraSpec,
    state: SharedMockState,
}

impl CameraDevice for MockCamera {
    fn descriptor(&self) -> CameraDescriptor {
        self.descriptor
    }

    fn supported_preview_sizes(&self) -> Option<Vec<(u32, u32)>> {
        self.spec.supported_sizes.clone()
    }

    fn default_preview_size(&self) -> (u32, u32) {
        self.spec.default_size
    }

    fn preview_size(&self) -> (u32, u32) {
        self.state.lock().preview_size
    }

    fn set_preview_size(&mut self, size: (u32, u32)) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if state.reject_preview_pushes > 0 {
            state.reject_preview_pushes -= 1;
            return Err(CameraError::Rejected {
                details: format!("preview size {}x{} refused", size.0, size.1),
            });
        }
        state.preview_size = size;
        Ok(())
    }

    fn supported_focus_modes(&self) -> Vec<FocusMode> {
        self.spec.focus_modes.clone()
    }

    fn focus_mode(&self) -> Option<FocusMode> {
        self.state.lock().focus_mode
    }

    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<(), CameraError> {
        self.state.lock().focus_mode = Some(mode);
        Ok(())
    }

    fn supported_flash_modes(&self) -> Vec<FlashMode> {
        self.spec.flash_modes.clone()
    }

    fn flash_mode(&self) -> Option<FlashMode> {
        self.state.lock().flash_mode
    }

    fn set_flash_mode(&mut self, mode: FlashMode) -> Result<(), CameraError> {
        self.state.lock().flash_mode = Some(mode);
        Ok(())
    }

    fn exposure_range(&self) -> ExposureRange {
        self.spec.exposure
    }

    fn exposure_compensation(&self) -> i32 {
        self.state.lock().exposure_compensation
    }

    fn set_exposure_compensation(&mut self, steps: i32) -> Result<(), CameraError> {
        self.state.lock().exposure_compensation = steps;
        Ok(())
    }

    fn set_display_orientation(&mut self, degrees: u32) -> Result<(), CameraError> {
        self.state.lock().display_orientation = degrees;
        Ok(())
    }

    fn start_preview(&mut self) -> Result<(), CameraError> {
        self.state.lock().previewing = true;
        Ok(())
    }

    fn stop_preview(&mut self) -> Result<(), CameraError> {
        self.state.lock().previewing = false;
        Ok(())
    }

    fn auto_focus(&mut self) -> Result<bool, CameraError> {
        let mut state = self.state.lock();
        state.focus_calls += 1;
        debug!("Mock focus cycle #{}", state.focus_calls);
        Ok(true)
    }

    fn cancel_auto_focus(&mut self) -> Result<(), CameraError> {
        self.state.lock().cancel_focus_calls += 1;
        Ok(())
    }

    fn snapshot_parameters(&self) -> ParameterSnapshot {
        let state = self.state.lock();
        ParameterSnapshot {
            preview_size: state.preview_size,
            focus_mode: state.focus_mode,
            flash_mode: state.flash_mode,
            exposure_compensation: state.exposure_compensation,
        }
    }

    fn restore_parameters(&mut self, snapshot: &ParameterSnapshot) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        state.preview_size = snapshot.preview_size;
        state.focus_mode = snapshot.focus_mode;
        state.flash_mode = snapshot.flash_mode;
        state.exposure_compensation = snapshot.exposure_compensation;
        state.restore_calls += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.state.lock().released = true;
    }
}

/// Provider over a fixed set of simulated cameras. Tests keep the shared
/// state handles and inspect them after the pipeline takes the device.
pub struct MockProvider {
    specs: Vec<MockCameraSpec>,
    states: Vec<SharedMockState>,
}

impl MockProvider {
    pub fn new(specs: Vec<MockCameraSpec>) -> Self {
        let states = specs
            .iter()
            .map(|spec| {
                Arc::new(Mutex::new(MockState {
                    preview_size: spec.default_size,
                    focus_mode: spec.focus_modes.first().copied(),
                    flash_mode: Some(FlashMode::Off),
                    exposure_compensation: 0,
                    display_orientation: 0,
                    previewing: false,
                    released: false,
                    focus_calls: 0,
                    cancel_focus_calls: 0,
                    restore_calls: 0,
                    reject_preview_pushes: spec.reject_preview_pushes,
                }))
            })
            .collect();
        Self { specs, states }
    }

    /// One default camera per facing, in order.
    pub fn with_facings(facings: &[CameraFacing]) -> Self {
        Self::new(
            facings
                .iter()
                .map(|&facing| MockCameraSpec {
                    facing,
                    ..MockCameraSpec::default()
                })
                .collect(),
        )
    }

    /// Shared state of camera `index`, for post-hoc assertions.
    pub fn state(&self, index: usize) -> SharedMockState {
        Arc::clone(&self.states[index])
    }
}

impl CameraProvider for MockProvider {
    fn enumerate(&self) -> Vec<CameraDescriptor> {
        self.specs
            .iter()
            .enumerate()
            .map(|(index, spec)| CameraDescriptor {
                index,
                facing: spec.facing,
                sensor_orientation: spec.sensor_orientation,
            })
            .collect()
    }

    fn open(&self, index: usize) -> Result<Box<dyn CameraDevice>, CameraError> {
        let spec = self
            .specs
            .get(index)
            .cloned()
            .ok_or_else(|| CameraError::DeviceOpen {
                index,
                details: "no such mock camera".to_string(),
            })?;
        Ok(Box::new(MockCamera {
            descriptor: CameraDescriptor {
                index,
                facing: spec.facing,
                sensor_orientation: spec.sensor_orientation,
            },
            state: Arc::clone(&self.states[index]),
            spec,
        }))
    }
}
