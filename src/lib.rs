//! Live camera QR scanning pipeline.
//!
//! The pipeline owns a capture device behind the [`device::CameraDevice`]
//! trait, configures it with the best-fitting preview geometry, keeps it
//! focused on a repeating cadence, and feeds preview frames to an external
//! [`decode::QrDecoder`] one at a time. The capture path never blocks: frames
//! arriving while a decode is in flight are dropped. Results are published as
//! [`events::ScanEvent`]s with symbol corners mapped into view coordinates.
//!
//! [`scanner::QrScanner`] ties the pieces into a single session handle;
//! the components underneath are usable on their own.

pub mod autofocus;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod events;
pub mod geometry;
pub mod manager;
pub mod scanner;
pub mod selector;

pub use config::ScanConfig;
pub use decode::{DecodeFailure, DecodeHints, Decoded, LuminanceGrid, QrDecoder};
pub use device::{CameraDevice, CameraProvider, CameraSelection};
pub use error::{CameraError, QrcamError, Result};
pub use events::{EventBus, ScanEvent};
pub use geometry::{Orientation, Point, ViewPoint};
pub use manager::CameraManager;
pub use scanner::{FrameDecoder, QrScanner};
pub use selector::PreviewGeometry;
