//! Analysis pipeline
//!
//! Sequences the DSP stages: pitch, refinement, then envelope and
//! aperiodicity side by side, and the inverse synthesis. Every call is a pure
//! function of its inputs and the read-only analysis settings.

use std::time::Instant;

use ndarray::{Array1, Array2};

use super::aperiodicity::estimate_aperiodicity;
use super::common::{fft_size_for, FrameGrid, PitchRange, Spectrum};
use super::envelope::estimate_envelope;
use super::pitch::{track_fast, track_precise};
use super::refine::refine;
use super::synthesis;
use crate::audio::AudioMatrix;
use crate::config::AnalysisConfig;
use crate::error::{WorldBridgeError, Result};

/// Time axis and f0 of a pitch-only analysis
#[derive(Debug, Clone, PartialEq)]
pub struct PitchTrack {
    pub time_axis: Array1<f64>,
    pub f0: Array1<f64>,
}

/// Vocoder features; envelope and aperiodicity are absent for pitch-only analyses
#[derive(Debug, Clone, PartialEq)]
pub struct VocoderFeatureSet {
    pub time_axis: Array1<f64>,
    pub f0: Array1<f64>,
    pub spectral_envelope: Option<Array2<f64>>,
    pub aperiodicity: Option<Array2<f64>>,
}

impl VocoderFeatureSet {
    pub fn frames(&self) -> usize {
        self.f0.len()
    }

    pub fn is_complete(&self) -> bool {
        self.spectral_envelope.is_some() && self.aperiodicity.is_some()
    }
}

impl From<PitchTrack> for VocoderFeatureSet {
    fn from(track: PitchTrack) -> Self {
        Self {
            time_axis: track.time_axis,
            f0: track.f0,
            spectral_envelope: None,
            aperiodicity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tracker {
    Fast,
    Precise,
}

#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn range(&self) -> PitchRange {
        PitchRange {
            floor: self.config.f0_floor,
            ceil: self.config.f0_ceil,
        }
    }

    /// FFT size of the envelope at a sample rate; bins are `fft_size / 2 + 1`
    pub fn fft_size(&self, sample_rate: f64) -> Result<usize> {
        fft_size_for(sample_rate, self.config.f0_floor).ok_or_else(|| {
            WorldBridgeError::invalid_parameter(format!("No FFT size fits a sample rate of {} Hz", sample_rate))
        })
    }

    fn check_rate_bounds(&self, sample_rate: f64) -> Result<()> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(WorldBridgeError::invalid_parameter(format!(
                "Sample rate must be a positive finite number, got {}",
                sample_rate
            )));
        }
        if sample_rate > self.config.max_sample_rate {
            return Err(WorldBridgeError::invalid_parameter(format!(
                "Sample rate {} Hz exceeds the maximum of {} Hz",
                sample_rate, self.config.max_sample_rate
            )));
        }
        Ok(())
    }

    /// Reject outputs larger than `max_output_values`
    fn check_output_size(&self, values: usize, what: &str) -> Result<()> {
        if values > self.config.max_output_values {
            return Err(WorldBridgeError::invalid_parameter(format!(
                "{} would hold {} values, the limit is {}",
                what, values, self.config.max_output_values
            )));
        }
        Ok(())
    }

    fn validate_sample_rate(&self, sample_rate: f64) -> Result<()> {
        self.check_rate_bounds(sample_rate)?;
        if sample_rate / 2.0 <= self.config.f0_floor {
            return Err(WorldBridgeError::invalid_parameter(format!(
                "Sample rate {} Hz is too low for an f0 floor of {} Hz",
                sample_rate, self.config.f0_floor
            )));
        }
        Ok(())
    }

    /// Mono analysis signal; channels are averaged
    fn prepare(&self, audio: &AudioMatrix, sample_rate: f64) -> Result<(Vec<f64>, FrameGrid)> {
        self.validate_sample_rate(sample_rate)?;
        if audio.samples().iter().any(|x| !x.is_finite()) {
            return Err(WorldBridgeError::invalid_parameter("Samples contain NaN or infinity"));
        }
        let mono = audio.to_mono().to_vec();
        let grid = FrameGrid::for_signal(mono.len(), sample_rate, self.config.frame_period_ms);
        self.check_output_size(grid.frames, "Pitch track")?;
        Ok((mono, grid))
    }

    fn track(&self, x: &[f64], grid: &FrameGrid, tracker: Tracker) -> Vec<f64> {
        let raw = match tracker {
            Tracker::Fast => track_fast(x, grid, self.range()),
            Tracker::Precise => track_precise(x, grid, self.range()),
        };
        refine(x, grid, &raw, self.range())
    }

    fn extract_pitch(&self, audio: &AudioMatrix, sample_rate: f64, tracker: Tracker) -> Result<PitchTrack> {
        let start = Instant::now();
        let (x, grid) = self.prepare(audio, sample_rate)?;
        let f0 = self.track(&x, &grid, tracker);
        log::debug!(
            "{:?} pitch: {} samples -> {} frames in {:.1}ms",
            tracker,
            x.len(),
            grid.frames,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(PitchTrack {
            time_axis: grid.time_axis(),
            f0: Array1::from(f0),
        })
    }

    /// Fast tracker followed by refinement
    pub fn extract_pitch_fast(&self, audio: &AudioMatrix, sample_rate: f64) -> Result<PitchTrack> {
        self.extract_pitch(audio, sample_rate, Tracker::Fast)
    }

    /// Precise tracker followed by refinement
    pub fn extract_pitch_precise(&self, audio: &AudioMatrix, sample_rate: f64) -> Result<PitchTrack> {
        self.extract_pitch(audio, sample_rate, Tracker::Precise)
    }

    /// Pitch, envelope and aperiodicity
    ///
    /// Envelope and aperiodicity both read the refined pitch track and run
    /// concurrently; the call returns once both are done.
    pub fn extract_full(&self, audio: &AudioMatrix, sample_rate: f64) -> Result<VocoderFeatureSet> {
        let start = Instant::now();
        let (x, grid) = self.prepare(audio, sample_rate)?;
        let fft_size = self.fft_size(sample_rate)?;
        let cells = grid.frames.checked_mul(fft_size / 2 + 1).unwrap_or(usize::MAX);
        self.check_output_size(cells, "Spectral envelope")?;

        let f0 = self.track(&x, &grid, Tracker::Fast);
        let pitch_ms = start.elapsed().as_secs_f64() * 1000.0;

        let spectrum = Spectrum::new(fft_size);
        let floor = self.config.f0_floor;
        let (envelope, aperiodicity) = rayon::join(
            || estimate_envelope(&x, &grid, &f0, &spectrum, floor),
            || estimate_aperiodicity(&x, &grid, &f0, fft_size, floor),
        );

        log::debug!(
            "Full analysis: {} frames x {} bins, pitch {:.1}ms, total {:.1}ms",
            grid.frames,
            spectrum.bins(),
            pitch_ms,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(VocoderFeatureSet {
            time_axis: grid.time_axis(),
            f0: Array1::from(f0),
            spectral_envelope: Some(envelope),
            aperiodicity: Some(aperiodicity),
        })
    }

    /// Mono signal of `(frames - 1) * frame_period * fs / 1000 + 1` samples
    pub fn synthesize(&self, features: &VocoderFeatureSet, sample_rate: f64) -> Result<AudioMatrix> {
        self.check_rate_bounds(sample_rate)?;
        let envelope = features
            .spectral_envelope
            .as_ref()
            .ok_or_else(|| WorldBridgeError::missing_parameter("sp"))?;
        let aperiodicity = features
            .aperiodicity
            .as_ref()
            .ok_or_else(|| WorldBridgeError::missing_parameter("ap"))?;
        validate_features(&features.f0, envelope, aperiodicity)?;
        let len = synthesis::output_len(features.frames(), sample_rate, self.config.frame_period_ms);
        self.check_output_size(len, "Synthesized signal")?;

        let start = Instant::now();
        let f0 = features.f0.to_vec();
        let signal = synthesis::synthesize(
            &f0,
            envelope.view(),
            aperiodicity.view(),
            sample_rate,
            self.config.frame_period_ms,
        );
        log::debug!(
            "Synthesized {} frames -> {} samples in {:.1}ms",
            f0.len(),
            signal.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(AudioMatrix::from_mono(signal))
    }
}

fn validate_features(f0: &Array1<f64>, envelope: &Array2<f64>, aperiodicity: &Array2<f64>) -> Result<()> {
    let frames = f0.len();
    if envelope.nrows() != frames || aperiodicity.nrows() != frames {
        return Err(WorldBridgeError::invalid_feature_shape(format!(
            "f0 has {} frames, sp has {}, ap has {}",
            frames,
            envelope.nrows(),
            aperiodicity.nrows()
        )));
    }
    if envelope.ncols() != aperiodicity.ncols() {
        return Err(WorldBridgeError::invalid_feature_shape(format!(
            "sp has {} bins but ap has {}",
            envelope.ncols(),
            aperiodicity.ncols()
        )));
    }
    if frames > 0 && envelope.ncols() < 2 {
        return Err(WorldBridgeError::invalid_feature_shape(format!(
            "Feature rows need at least 2 bins, got {}",
            envelope.ncols()
        )));
    }
    if f0.iter().any(|f| !f.is_finite() || *f < 0.0) {
        return Err(WorldBridgeError::invalid_parameter("f0 must be finite and non-negative"));
    }
    if envelope.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(WorldBridgeError::invalid_parameter("sp must be finite and non-negative"));
    }
    if aperiodicity.iter().any(|v| !v.is_finite()) {
        return Err(WorldBridgeError::invalid_parameter("ap must be finite"));
    }
    Ok(())
}
