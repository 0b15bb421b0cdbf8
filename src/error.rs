//! Error Types
//!
//! Every failure is scoped to the request that produced it. Each variant maps
//! to one distinct failure kind on the wire.

use thiserror::Error;

/// Main error type
#[derive(Debug, Clone, Error)]
pub enum WorldBridgeError {
    #[error("Malformed tensor: {message}")]
    MalformedTensor { message: String },
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },
    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },
    #[error("Unsupported format: {message}")]
    UnsupportedFormat { message: String },
    #[error("Corrupt audio: {message}")]
    CorruptAudio { message: String },
    #[error("Invalid sample data: {message}")]
    InvalidSampleData { message: String },
    #[error("Missing parameter: {name}")]
    MissingParameter { name: String },
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },
    #[error("Invalid feature shape: {message}")]
    InvalidFeatureShape { message: String },
    #[error("Invalid rank: {message}")]
    InvalidRank { message: String },
    #[error("Inconsistent rank: {message}")]
    InconsistentRank { message: String },
    #[error("Render error: {message}")]
    Render { message: String },
    #[error("Config error: {message}")]
    Config { message: String },
    #[error("IO error: {message}")]
    Io { message: String },
}

impl WorldBridgeError {
    pub fn malformed_tensor<S: Into<String>>(msg: S) -> Self { Self::MalformedTensor { message: msg.into() } }
    pub fn malformed_request<S: Into<String>>(msg: S) -> Self { Self::MalformedRequest { message: msg.into() } }
    pub fn payload_too_large<S: Into<String>>(msg: S) -> Self { Self::PayloadTooLarge { message: msg.into() } }
    pub fn unsupported_format<S: Into<String>>(msg: S) -> Self { Self::UnsupportedFormat { message: msg.into() } }
    pub fn corrupt_audio<S: Into<String>>(msg: S) -> Self { Self::CorruptAudio { message: msg.into() } }
    pub fn invalid_sample_data<S: Into<String>>(msg: S) -> Self { Self::InvalidSampleData { message: msg.into() } }
    pub fn missing_parameter<S: Into<String>>(name: S) -> Self { Self::MissingParameter { name: name.into() } }
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self { Self::InvalidParameter { message: msg.into() } }
    pub fn invalid_feature_shape<S: Into<String>>(msg: S) -> Self { Self::InvalidFeatureShape { message: msg.into() } }
    pub fn invalid_rank<S: Into<String>>(msg: S) -> Self { Self::InvalidRank { message: msg.into() } }
    pub fn inconsistent_rank<S: Into<String>>(msg: S) -> Self { Self::InconsistentRank { message: msg.into() } }
    pub fn render<S: Into<String>>(msg: S) -> Self { Self::Render { message: msg.into() } }
    pub fn config<S: Into<String>>(msg: S) -> Self { Self::Config { message: msg.into() } }
    pub fn io<S: Into<String>>(msg: S) -> Self { Self::Io { message: msg.into() } }

    /// Stable kind name carried in failure responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedTensor { .. } => "MalformedTensor",
            Self::MalformedRequest { .. } => "MalformedRequest",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::UnsupportedFormat { .. } => "UnsupportedFormat",
            Self::CorruptAudio { .. } => "CorruptAudio",
            Self::InvalidSampleData { .. } => "InvalidSampleData",
            Self::MissingParameter { .. } => "MissingParameter",
            Self::InvalidParameter { .. } => "InvalidParameter",
            Self::InvalidFeatureShape { .. } => "InvalidFeatureShape",
            Self::InvalidRank { .. } => "InvalidRank",
            Self::InconsistentRank { .. } => "InconsistentRank",
            Self::Render { .. } => "Render",
            Self::Config { .. } => "Config",
            Self::Io { .. } => "Io",
        }
    }

    /// Transport status code for this error kind
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MalformedTensor { .. } | Self::MalformedRequest { .. } => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::UnsupportedFormat { .. } => 415,
            Self::Render { .. } | Self::Config { .. } | Self::Io { .. } => 500,
            _ => 422,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorldBridgeError>;

impl From<std::io::Error> for WorldBridgeError {
    fn from(err: std::io::Error) -> Self {
        // The spool reports an exceeded ceiling through io::Error
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<WorldBridgeError>()) {
            return inner.clone();
        }
        Self::io(err.to_string())
    }
}
