//! Shared DSP helpers: frame grid, FFT plans, windows and interpolation

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::Array1;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

/// Floor applied to power values before taking logarithms
pub const POWER_FLOOR: f64 = 1e-12;

/// Analysis frames placed every `frame_period_ms`, starting at t = 0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGrid {
    pub sample_rate: f64,
    pub frame_period_ms: f64,
    pub frames: usize,
}

impl FrameGrid {
    /// Grid covering a signal of `len` samples; an empty signal has no frames
    pub fn for_signal(len: usize, sample_rate: f64, frame_period_ms: f64) -> Self {
        let frames = if len == 0 {
            0
        } else {
            ((len as f64 * 1000.0 / (sample_rate * frame_period_ms)).floor() as usize).saturating_add(1)
        };
        Self { sample_rate, frame_period_ms, frames }
    }

    pub fn with_frames(frames: usize, sample_rate: f64, frame_period_ms: f64) -> Self {
        Self { sample_rate, frame_period_ms, frames }
    }

    pub fn time(&self, frame: usize) -> f64 {
        frame as f64 * self.frame_period_ms / 1000.0
    }

    /// Sample index nearest to the frame centre
    pub fn center(&self, frame: usize) -> isize {
        (self.time(frame) * self.sample_rate).round() as isize
    }

    pub fn time_axis(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.frames, |i| self.time(i))
    }

    /// Fractional frame position of a time in seconds, clamped to the grid
    pub fn position(&self, seconds: f64) -> f64 {
        let last = self.frames.saturating_sub(1) as f64;
        (seconds * 1000.0 / self.frame_period_ms).clamp(0.0, last)
    }

    /// Output length of a signal resynthesised from this grid, saturating at `usize::MAX`
    pub fn signal_len(&self) -> usize {
        if self.frames == 0 {
            return 0;
        }
        let span = (self.frames - 1) as f64 * self.frame_period_ms * self.sample_rate / 1000.0;
        (span as usize).saturating_add(1)
    }
}

/// Search range of the fundamental frequency in Hz
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchRange {
    pub floor: f64,
    pub ceil: f64,
}

impl PitchRange {
    pub fn contains(&self, f0: f64) -> bool {
        f0 >= self.floor && f0 <= self.ceil
    }
}

/// FFT size used for envelope and aperiodicity at a given rate
///
/// `None` when the size does not fit in a `usize`.
pub fn fft_size_for(sample_rate: f64, f0_floor: f64) -> Option<usize> {
    let span = 3.0 * sample_rate / f0_floor;
    if !(span.is_finite() && span >= 1.0) {
        return None;
    }
    let exponent = (span.log2().floor() as u32).checked_add(1)?;
    1usize.checked_shl(exponent)
}

/// Forward/inverse plans of one size, shareable across threads
#[derive(Clone)]
pub struct Spectrum {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Spectrum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spectrum").field("size", &self.size).finish()
    }
}

impl Spectrum {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Full complex spectrum of a real frame, zero padded to the FFT size
    pub fn forward_real(&self, frame: &[f64]) -> Vec<Complex64> {
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.size];
        for (slot, &x) in buffer.iter_mut().zip(frame) {
            slot.re = x;
        }
        self.forward.process(&mut buffer);
        buffer
    }

    /// Power of the non-negative frequency bins
    pub fn power(&self, frame: &[f64]) -> Vec<f64> {
        self.forward_real(frame)
            .iter()
            .take(self.bins())
            .map(|c| c.norm_sqr())
            .collect()
    }

    /// In-place forward transform of a full-length buffer
    pub fn forward_in_place(&self, buffer: &mut [Complex64]) {
        self.forward.process(buffer);
    }

    /// Real signal from non-negative bins, scaled by 1/N
    pub fn inverse_real(&self, half: &[Complex64]) -> Vec<f64> {
        let n = self.size;
        let mut buffer = vec![Complex64::new(0.0, 0.0); n];
        for (k, &value) in half.iter().enumerate().take(self.bins()) {
            buffer[k] = value;
            if k > 0 && k < n - k {
                buffer[n - k] = value.conj();
            }
        }
        if n % 2 == 0 {
            buffer[n / 2].im = 0.0;
        }
        buffer[0].im = 0.0;
        self.inverse.process(&mut buffer);
        let scale = 1.0 / n as f64;
        buffer.iter().map(|c| c.re * scale).collect()
    }
}

/// Sample at a possibly out-of-range index, zero outside the signal
#[inline]
pub fn sample_at(x: &[f64], index: isize) -> f64 {
    if index < 0 {
        0.0
    } else {
        x.get(index as usize).copied().unwrap_or(0.0)
    }
}

/// Copy of `x[start..start + len]` with zeros outside the signal
pub fn segment(x: &[f64], start: isize, len: usize) -> Vec<f64> {
    (0..len).map(|i| sample_at(x, start + i as isize)).collect()
}

pub fn blackman(len: usize) -> Vec<f64> {
    if len < 2 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / denom;
            0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
        })
        .collect()
}

pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

/// Vertex offset of a parabola through three equally spaced points, in [-0.5, 0.5]
pub fn parabolic_offset(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Linear interpolation of `values` sampled at increasing `positions`, held at the ends
pub fn interp_linear(positions: &[f64], values: &[f64], at: f64) -> f64 {
    match positions.len() {
        0 => 0.0,
        1 => values[0],
        n => {
            if at <= positions[0] {
                return values[0];
            }
            if at >= positions[n - 1] {
                return values[n - 1];
            }
            let upper = positions.partition_point(|&p| p <= at);
            let lower = upper - 1;
            let span = positions[upper] - positions[lower];
            if span <= 0.0 {
                return values[lower];
            }
            let w = (at - positions[lower]) / span;
            values[lower] * (1.0 - w) + values[upper] * w
        }
    }
}

/// Index into `0..len` mirrored at both ends without repeating the edge
pub fn reflect_index(index: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let period = (2 * (len - 1)) as isize;
    let mut x = index.rem_euclid(period);
    if x >= len as isize {
        x = period - x;
    }
    x as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_grid() {
        let grid = FrameGrid::for_signal(16000, 16000.0, 5.0);
        assert_eq!(grid.frames, 201);
        assert_eq!(grid.signal_len(), 16001);
        assert!((grid.time(200) - 1.0).abs() < 1e-12);
        assert_eq!(grid.center(1), 80);

        let empty = FrameGrid::for_signal(0, 16000.0, 5.0);
        assert_eq!(empty.frames, 0);
        assert_eq!(empty.signal_len(), 0);
        assert_eq!(empty.time_axis().len(), 0);
    }

    #[test]
    fn test_fft_size() {
        assert_eq!(fft_size_for(16000.0, 71.0), Some(1024));
        assert_eq!(fft_size_for(44100.0, 71.0), Some(2048));
        assert_eq!(fft_size_for(48000.0, 71.0), Some(2048));
        assert_eq!(fft_size_for(96000.0, 71.0), Some(4096));
    }

    #[test]
    fn test_fft_size_out_of_range() {
        assert_eq!(fft_size_for(1e30, 71.0), None);
        assert_eq!(fft_size_for(f64::INFINITY, 71.0), None);
        assert_eq!(fft_size_for(f64::NAN, 71.0), None);
    }

    #[test]
    fn test_huge_grid_saturates() {
        let grid = FrameGrid::with_frames(3, 1e300, 5.0);
        assert_eq!(grid.signal_len(), usize::MAX);
        assert_eq!(FrameGrid::for_signal(10, 1e-300, 5.0).frames, usize::MAX);
    }

    #[test]
    fn test_spectrum_inverse_roundtrip() {
        let spectrum = Spectrum::new(16);
        let frame: Vec<f64> = (0..16).map(|i| (i as f64 * 0.7).sin()).collect();
        let full = spectrum.forward_real(&frame);
        let back = spectrum.inverse_real(&full[..spectrum.bins()]);
        for (a, b) in frame.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_interp_and_median() {
        let positions = [0.0, 1.0, 3.0];
        let values = [0.0, 2.0, 6.0];
        assert_eq!(interp_linear(&positions, &values, -1.0), 0.0);
        assert_eq!(interp_linear(&positions, &values, 0.5), 1.0);
        assert_eq!(interp_linear(&positions, &values, 2.0), 4.0);
        assert_eq!(interp_linear(&positions, &values, 9.0), 6.0);

        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn test_reflect_and_parabola() {
        assert_eq!(reflect_index(-1, 5), 1);
        assert_eq!(reflect_index(5, 5), 3);
        assert_eq!(reflect_index(2, 5), 2);
        assert!((parabolic_offset(1.0, 2.0, 1.0)).abs() < 1e-12);
        assert!(parabolic_offset(1.0, 2.0, 1.5) > 0.0);
    }
}
