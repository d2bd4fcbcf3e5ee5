//! The external decoder seam: luminance input, hints, and outcomes.

use crate::geometry::Point;
use std::collections::HashMap;
use thiserror::Error;

/// Opaque key/value hints forwarded verbatim to the decoder.
pub type DecodeHints = HashMap<String, String>;

/// A 2D grid of brightness values derived from a preview frame.
#[derive(Debug, Clone)]
pub struct LuminanceGrid {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl LuminanceGrid {
    /// Build a grid from raw preview samples. For planar YUV formats the
    /// luminance plane is the first `width * height` bytes; anything after it
    /// (chroma planes) is ignored.
    pub fn from_preview_frame(data: &[u8], width: u32, height: u32) -> Option<Self> {
        let pixels = width as usize * height as usize;
        if data.len() < pixels {
            return None;
        }
        Some(Self {
            data: data[..pixels].to_vec(),
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn luminance(&self) -> &[u8] {
        &self.data
    }

    /// Luminance samples of row `y`, or `None` past the bottom of the grid.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.width as usize;
        Some(&self.data[start..start + self.width as usize])
    }
}

/// Non-result outcomes of a decode attempt. These are normal — most frames
/// contain no symbol — and are never escalated as pipeline errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    #[error("no symbol found")]
    NotFound,
    #[error("checksum mismatch")]
    Checksum,
    #[error("malformed symbol")]
    Format,
}

/// A successfully decoded symbol: its text and corner points in decoder
/// (sensor) space.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub points: Vec<Point>,
}

/// Black-box symbol reader. `reset` is called after every attempt, success
/// or not, so implementations may keep per-attempt scratch state.
pub trait QrDecoder: Send {
    fn decode(
        &mut self,
        grid: &LuminanceGrid,
        hints: &DecodeHints,
    ) -> Result<Decoded, DecodeFailure>;

    fn reset(&mut self);
}
