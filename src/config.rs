//! Scanner configuration, loadable from a TOML file and `QRCAM_*`
//! environment variables.

use crate::device::CameraSelection;
use crate::error::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::autofocus::DEFAULT_AUTOFOCUS_INTERVAL_MS;
use crate::error::QrcamError;

fn default_camera() -> CameraSelection {
    CameraSelection::NoPreference
}

fn default_autofocus_interval_ms() -> u64 {
    DEFAULT_AUTOFOCUS_INTERVAL_MS
}

fn default_decode_enabled() -> bool {
    true
}

fn default_torch() -> bool {
    false
}

fn default_decode_hints() -> HashMap<String, String> {
    HashMap::new()
}

fn default_event_capacity() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Which camera to open.
    #[serde(default = "default_camera")]
    pub camera: CameraSelection,
    /// Cadence of the repeating autofocus cycle.
    #[serde(default = "default_autofocus_interval_ms")]
    pub autofocus_interval_ms: u64,
    /// Whether admitted frames are handed to the decoder.
    #[serde(default = "default_decode_enabled")]
    pub decode_enabled: bool,
    /// Light the torch when the preview starts.
    #[serde(default = "default_torch")]
    pub torch: bool,
    /// Opaque hints forwarded to the decoder.
    #[serde(default = "default_decode_hints")]
    pub decode_hints: HashMap<String, String>,
    /// Buffered events per subscriber before old ones are overwritten.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            camera: default_camera(),
            autofocus_interval_ms: default_autofocus_interval_ms(),
            decode_enabled: default_decode_enabled(),
            torch: default_torch(),
            decode_hints: default_decode_hints(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from an optional file with `QRCAM_*` environment
    /// overrides on top. Missing file and missing keys fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("QRCAM"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.autofocus_interval_ms == 0 {
            return Err(QrcamError::invalid_argument(
                "Autofocus interval must be greater than 0",
            ));
        }
        if self.event_capacity == 0 {
            return Err(QrcamError::invalid_argument(
                "Event capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = ScanConfig::default();
        assert_eq!(config.camera, CameraSelection::NoPreference);
        assert_eq!(config.autofocus_interval_ms, 5000);
        assert!(config.decode_enabled);
        assert!(!config.torch);
        assert!(config.decode_hints.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "camera = \"front\"\nautofocus_interval_ms = 2000\n\n[decode_hints]\ntry_harder = \"true\"\n"
        )
        .unwrap();

        let config = ScanConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.camera, CameraSelection::Front);
        assert_eq!(config.autofocus_interval_ms, 2000);
        // Untouched keys keep their defaults.
        assert!(config.decode_enabled);
        assert_eq!(config.decode_hints.get("try_harder").map(String::as_str), Some("true"));
    }

    #[test]
    fn zero_interval_fails_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "autofocus_interval_ms = 0").unwrap();
        assert!(ScanConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn zero_event_capacity_fails_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "event_capacity = 0").unwrap();
        assert!(ScanConfig::load(Some(file.path())).is_err());

        let config = ScanConfig {
            event_capacity: 0,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
