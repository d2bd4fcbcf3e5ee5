//! Traits abstracting the physical capture device and its driver.
//!
//! Everything the pipeline knows about camera hardware goes through
//! [`CameraProvider`] (enumeration and opening) and [`CameraDevice`]
//! (capability queries and control). Platform backends implement these; the
//! [`mock`] module provides a scriptable in-memory implementation used by the
//! test suite and the simulation binary.

pub mod mock;

use crate::error::CameraError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Which way the physical camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraFacing {
    Back,
    Front,
}

/// Focus modes a device may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    Auto,
    Macro,
    Fixed,
    Infinity,
    Continuous,
}

impl FocusMode {
    /// Whether this mode needs the autofocus scheduler to re-trigger focus
    /// cycles. Fixed, infinity and continuous modes manage themselves.
    pub fn requires_focus_cycles(&self) -> bool {
        matches!(self, FocusMode::Auto | FocusMode::Macro)
    }
}

/// Flash modes a device may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    On,
    Torch,
    Auto,
}

/// Metadata for an enumerated physical camera.
#[derive(Debug, Clone, Copy)]
pub struct CameraDescriptor {
    pub index: usize,
    pub facing: CameraFacing,
    /// Clockwise rotation from the device's natural orientation to the
    /// sensor, in degrees.
    pub sensor_orientation: u32,
}

/// Exposure compensation capability as reported by the device.
#[derive(Debug, Clone, Copy)]
pub struct ExposureRange {
    pub min_steps: i32,
    pub max_steps: i32,
    /// EV per compensation step.
    pub step_ev: f32,
}

impl ExposureRange {
    pub fn is_supported(&self) -> bool {
        (self.min_steps != 0 || self.max_steps != 0) && self.step_ev > 0.0
    }
}

/// A restorable snapshot of the mutable device parameters, used to roll back
/// after the hardware rejects a parameter push.
#[derive(Debug, Clone)]
pub struct ParameterSnapshot {
    pub preview_size: (u32, u32),
    pub focus_mode: Option<FocusMode>,
    pub flash_mode: Option<FlashMode>,
    pub exposure_compensation: i32,
}

/// Control surface of an opened capture device.
///
/// Implementations are not required to be thread safe; the pipeline wraps the
/// handle in a [`SharedDevice`] mutex and serializes access through it.
pub trait CameraDevice: Send {
    fn descriptor(&self) -> CameraDescriptor;

    /// Preview sizes the device supports, or `None` when the driver reports
    /// no size data at all.
    fn supported_preview_sizes(&self) -> Option<Vec<(u32, u32)>>;
    fn default_preview_size(&self) -> (u32, u32);
    fn preview_size(&self) -> (u32, u32);
    fn set_preview_size(&mut self, size: (u32, u32)) -> Result<(), CameraError>;

    fn supported_focus_modes(&self) -> Vec<FocusMode>;
    fn focus_mode(&self) -> Option<FocusMode>;
    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<(), CameraError>;

    fn supported_flash_modes(&self) -> Vec<FlashMode>;
    fn flash_mode(&self) -> Option<FlashMode>;
    fn set_flash_mode(&mut self, mode: FlashMode) -> Result<(), CameraError>;

    fn exposure_range(&self) -> ExposureRange;
    fn exposure_compensation(&self) -> i32;
    fn set_exposure_compensation(&mut self, steps: i32) -> Result<(), CameraError>;

    /// Rotation the driver applies when drawing preview frames.
    fn set_display_orientation(&mut self, degrees: u32) -> Result<(), CameraError>;

    fn start_preview(&mut self) -> Result<(), CameraError>;
    fn stop_preview(&mut self) -> Result<(), CameraError>;

    /// Run a single blocking focus cycle. Returns whether focus was achieved.
    fn auto_focus(&mut self) -> Result<bool, CameraError>;
    fn cancel_auto_focus(&mut self) -> Result<(), CameraError>;

    fn snapshot_parameters(&self) -> ParameterSnapshot;
    fn restore_parameters(&mut self, snapshot: &ParameterSnapshot) -> Result<(), CameraError>;

    /// Release the underlying driver handle. Further calls are undefined;
    /// the lifecycle manager drops the handle right after.
    fn release(&mut self);
}

/// Shared, serialized access to an opened device for the schedulers.
pub type SharedDevice = Arc<Mutex<Box<dyn CameraDevice>>>;

/// Enumerates and opens physical cameras.
pub trait CameraProvider: Send + Sync {
    fn enumerate(&self) -> Vec<CameraDescriptor>;
    fn open(&self, index: usize) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Which camera the host wants for the preview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSelection {
    NoPreference,
    Back,
    Front,
    Index(usize),
}

impl Default for CameraSelection {
    fn default() -> Self {
        CameraSelection::NoPreference
    }
}

/// An opened camera: the enumeration index plus the owned driver handle.
/// Facing and sensor orientation stay with [`CameraDevice::descriptor`].
pub struct OpenCamera {
    pub index: usize,
    pub device: SharedDevice,
}

/// Open a camera honoring the host's selection.
///
/// An explicit index must exist. Back and no-preference take the first
/// back-facing camera, else camera 0. Front takes the first front-facing
/// camera, else camera 0.
pub fn open_camera(
    provider: &dyn CameraProvider,
    selection: CameraSelection,
) -> Result<OpenCamera, CameraError> {
    let descriptors = provider.enumerate();
    if descriptors.is_empty() {
        warn!("No cameras reported by provider");
        return Err(CameraError::NoCamera);
    }

    let descriptor = match selection {
        CameraSelection::Index(index) => {
            descriptors
                .iter()
                .find(|d| d.index == index)
                .copied()
                .ok_or_else(|| CameraError::DeviceOpen {
                    index,
                    details: "requested camera does not exist".to_string(),
                })?
        }
        CameraSelection::Back | CameraSelection::NoPreference => {
            match descriptors
                .iter()
                .find(|d| d.facing == CameraFacing::Back)
                .copied()
            {
                Some(d) => d,
                None => {
                    info!("No back-facing camera; using camera #0");
                    descriptors[0]
                }
            }
        }
        CameraSelection::Front => {
            match descriptors
                .iter()
                .find(|d| d.facing == CameraFacing::Front)
                .copied()
            {
                Some(d) => d,
                None => {
                    warn!("No front-facing camera; using camera #0");
                    descriptors[0]
                }
            }
        }
    };

    info!("Opening camera #{} ({:?})", descriptor.index, descriptor.facing);
    let device = provider.open(descriptor.index)?;

    Ok(OpenCamera {
        index: descriptor.index,
        device: Arc::new(Mutex::new(device)),
    })
}
