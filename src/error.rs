use thiserror::Error;

/// Driver-level camera failures.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("No camera available")]
    NoCamera,

    #[error("Failed to open camera {index}: {details}")]
    DeviceOpen { index: usize, details: String },

    #[error("Camera rejected parameters: {details}")]
    Rejected { details: String },
}

#[derive(Error, Debug)]
pub enum QrcamError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl QrcamError {
    pub fn invalid_argument<S: Into<String>>(details: S) -> Self {
        Self::InvalidArgument {
            details: details.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QrcamError>;
