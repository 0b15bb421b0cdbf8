//! Audio Processing Module
//!
//! Decodes arbitrary containers into a channel-major sample matrix and writes
//! sample matrices back into containers.

pub mod codec;
pub mod formats;
pub mod matrix;

pub use codec::AudioCodec;
pub use formats::{FormatEntry, FormatTable, SubtypeEntry};
pub use matrix::{AudioInfo, AudioMatrix};
