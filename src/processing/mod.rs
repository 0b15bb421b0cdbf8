//! Vocoder Analysis Pipeline

pub mod aperiodicity;
pub mod common;
pub mod envelope;
pub mod pipeline;
pub mod pitch;
pub mod refine;
pub mod synthesis;

pub use common::{FrameGrid, PitchRange};
pub use pipeline::{AnalysisPipeline, PitchTrack, VocoderFeatureSet};
