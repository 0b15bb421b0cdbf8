//! WorldBridge - Vocoder Analysis over a Binary Tensor Protocol
//!
//! Exposes pitch extraction, spectral envelope and aperiodicity estimation,
//! resynthesis and audio container conversion as stateless request/response
//! operations on msgpack-encoded tensors.

pub mod audio;
pub mod config;
pub mod error;
pub mod invocation;
pub mod processing;
pub mod render;
pub mod server;
pub mod service;
pub mod spool;
pub mod tensor;

pub use config::{Config, Args};
pub use error::{WorldBridgeError, Result};
pub use service::Service;
pub use tensor::Tensor;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Initialise `env_logger`; `RUST_LOG` wins over the verbose flag
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .try_init()
        .ok();
}

pub fn get_library_info() -> LibraryInfo {
    LibraryInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl std::fmt::Display for LibraryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{} - {}", self.name, self.version, self.description)
    }
}
