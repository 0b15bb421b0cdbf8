//! Pitch-adaptive spectral envelope
//!
//! A three-period Hann window removes most of the harmonic ripple; linear
//! smoothing over 2/3 of f0 and cepstral liftering remove the rest.

use std::f64::consts::PI;

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use rustfft::num_complex::Complex64;

use super::common::{reflect_index, sample_at, FrameGrid, Spectrum, POWER_FLOOR};

/// f0 assumed for unvoiced frames
pub const UNVOICED_F0: f64 = 500.0;
const LIFTER_Q1: f64 = -0.15;

/// f0 the analysis window is sized for
pub fn analysis_f0(f0: f64, f0_floor: f64) -> f64 {
    if f0 > 0.0 { f0.max(f0_floor) } else { UNVOICED_F0 }
}

/// Envelope of every frame, shape `[frames, fft_size / 2 + 1]`
pub fn estimate_envelope(
    x: &[f64],
    grid: &FrameGrid,
    f0: &[f64],
    spectrum: &Spectrum,
    f0_floor: f64,
) -> Array2<f64> {
    let rows: Vec<Vec<f64>> = (0..grid.frames)
        .into_par_iter()
        .map(|frame| {
            let f = analysis_f0(f0[frame], f0_floor);
            frame_envelope(x, grid.sample_rate, grid.center(frame), f, spectrum)
        })
        .collect();

    let mut envelope = Array2::zeros((grid.frames, spectrum.bins()));
    for (mut row, values) in envelope.rows_mut().into_iter().zip(rows.iter()) {
        row.assign(&ArrayView1::from(values.as_slice()));
    }
    envelope
}

fn frame_envelope(x: &[f64], fs: f64, centre: isize, f0: f64, spectrum: &Spectrum) -> Vec<f64> {
    let half = (1.5 * fs / f0).round() as isize;
    let mut window: Vec<f64> = (-half..=half)
        .map(|n| 0.5 * (PI * n as f64 / fs * f0 / 1.5).cos() + 0.5)
        .collect();
    let window_sum: f64 = window.iter().sum();
    window.iter_mut().for_each(|w| *w /= window_sum);

    let mut waveform: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, &w)| w * sample_at(x, centre - half + i as isize))
        .collect();
    // Remove the windowed DC component
    let dc: f64 = waveform.iter().sum::<f64>() / window.iter().sum::<f64>();
    for (sample, &w) in waveform.iter_mut().zip(&window) {
        *sample -= w * dc;
    }

    let power = spectrum.power(&waveform);
    let smoothed: Vec<f64> = linear_smoothing(&power, 2.0 * f0 / 3.0, fs, spectrum.size())
        .into_iter()
        .map(|p| p.max(POWER_FLOOR))
        .collect();
    lifter(&smoothed, f0, fs, spectrum)
}

/// Moving average over `width_hz`, mirrored at DC and Nyquist
pub fn linear_smoothing(power: &[f64], width_hz: f64, fs: f64, fft_size: usize) -> Vec<f64> {
    let bins = power.len();
    let half_width = 0.5 * width_hz * fft_size as f64 / fs;
    if bins < 2 || half_width < 1e-9 {
        return power.to_vec();
    }

    let pad = half_width.ceil() as usize + 2;
    let extended: Vec<f64> = (0..bins + 2 * pad)
        .map(|j| power[reflect_index(j as isize - pad as isize, bins)])
        .collect();
    let mut prefix = vec![0.0; extended.len() + 1];
    for (j, &value) in extended.iter().enumerate() {
        prefix[j + 1] = prefix[j] + value;
    }

    // Integral of the piecewise-constant spectrum up to position u
    let integral = |u: f64| {
        let shifted = u + 0.5;
        let cell = (shifted.floor() as usize).min(extended.len() - 1);
        prefix[cell] + (shifted - cell as f64) * extended[cell]
    };

    (0..bins)
        .map(|k| {
            let centre = (k + pad) as f64;
            (integral(centre + half_width) - integral(centre - half_width)) / (2.0 * half_width)
        })
        .collect()
}

/// Cepstral smoothing with q1 compensation
fn lifter(power: &[f64], f0: f64, fs: f64, spectrum: &Spectrum) -> Vec<f64> {
    let n = spectrum.size();
    let bins = spectrum.bins();
    let mut buffer: Vec<Complex64> = (0..n)
        .map(|k| {
            let bin = if k < bins { k } else { n - k };
            Complex64::new(power[bin].ln(), 0.0)
        })
        .collect();

    spectrum.forward_in_place(&mut buffer);
    for (q, value) in buffer.iter_mut().enumerate() {
        let quefrency = q.min(n - q) as f64 / fs;
        let arg = PI * f0 * quefrency;
        let smoothing = if quefrency == 0.0 { 1.0 } else { arg.sin() / arg };
        let compensation = (1.0 - 2.0 * LIFTER_Q1) + 2.0 * LIFTER_Q1 * (2.0 * arg).cos();
        *value *= smoothing * compensation / n as f64;
    }
    spectrum.forward_in_place(&mut buffer);

    buffer.iter().take(bins).map(|c| c.re.exp()).collect()
}
