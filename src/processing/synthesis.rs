//! Source-filter resynthesis
//!
//! Pulses are placed by integrating the f0 contour sample by sample. Each
//! pulse contributes a zero-phase periodic response shaped by the periodic
//! share of the envelope, and the interval up to the next pulse is filled with
//! noise shaped by the aperiodic share.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex64;

use super::common::{FrameGrid, Spectrum};
use super::envelope::UNVOICED_F0;

const NOISE_SEED: u64 = 0x5EED_F0F0;

#[derive(Debug, Clone, Copy)]
struct Pulse {
    /// Fractional sample position
    position: f64,
    /// Pitch the pulse period was generated with
    f0: f64,
    voiced: bool,
}

/// Per-sample f0 contour; unvoiced samples carry 0.0
fn sample_f0(f0: &[f64], grid: &FrameGrid, len: usize) -> Vec<f64> {
    (0..len)
        .map(|s| {
            let position = grid.position(s as f64 / grid.sample_rate);
            let nearest = position.round() as usize;
            if f0[nearest] <= 0.0 {
                return 0.0;
            }
            let lower = position.floor() as usize;
            let upper = (lower + 1).min(f0.len() - 1);
            if f0[lower] > 0.0 && f0[upper] > 0.0 {
                let w = position - lower as f64;
                f0[lower] * (1.0 - w) + f0[upper] * w
            } else {
                f0[nearest]
            }
        })
        .collect()
}

fn place_pulses(contour: &[f64], sample_rate: f64) -> Vec<Pulse> {
    let mut pulses = Vec::new();
    let Some(&first) = contour.first() else {
        return pulses;
    };
    pulses.push(Pulse {
        position: 0.0,
        f0: if first > 0.0 { first } else { UNVOICED_F0 },
        voiced: first > 0.0,
    });

    let mut cycle = 0.0;
    for (s, &f) in contour.iter().enumerate().skip(1) {
        let (freq, voiced) = if f > 0.0 { (f, true) } else { (UNVOICED_F0, false) };
        let step = freq / sample_rate;
        cycle += step;
        if cycle >= 1.0 {
            cycle -= 1.0;
            pulses.push(Pulse {
                position: s as f64 - cycle / step,
                f0: freq,
                voiced,
            });
        }
    }
    pulses
}

/// Envelope row linearly interpolated between the frames around `seconds`
fn interpolate_row(features: ArrayView2<f64>, grid: &FrameGrid, seconds: f64) -> Vec<f64> {
    let position = grid.position(seconds);
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(features.nrows() - 1);
    let w = position - lower as f64;
    features
        .row(lower)
        .iter()
        .zip(features.row(upper).iter())
        .map(|(a, b)| a * (1.0 - w) + b * w)
        .collect()
}

/// Overlap-add a circular `response` so that its index 0 lands on `origin`
/// and its second half precedes it
fn add_centred(output: &mut [f64], response: &[f64], origin: isize) {
    let size = response.len();
    let half = size / 2;
    for n in 0..size {
        let index = origin + n as isize - half as isize;
        if index >= 0 && (index as usize) < output.len() {
            output[index as usize] += response[(n + half) % size];
        }
    }
}

/// Resynthesise a mono signal from f0, envelope and aperiodicity
///
/// Inputs must already share one frame count and bin count.
pub fn synthesize(
    f0: &[f64],
    envelope: ArrayView2<f64>,
    aperiodicity: ArrayView2<f64>,
    sample_rate: f64,
    frame_period_ms: f64,
) -> Array1<f64> {
    let grid = FrameGrid::with_frames(f0.len(), sample_rate, frame_period_ms);
    let len = grid.signal_len();
    let mut output = vec![0.0; len];
    if len == 0 {
        return Array1::from(output);
    }

    let bins = envelope.ncols();
    let fft_size = (bins - 1) * 2;
    let spectrum = Spectrum::new(fft_size);
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    let noise_amplitude = 3f64.sqrt();

    let contour = sample_f0(f0, &grid, len);
    let pulses = place_pulses(&contour, sample_rate);

    for (index, pulse) in pulses.iter().enumerate() {
        let seconds = pulse.position / sample_rate;
        let sp = interpolate_row(envelope, &grid, seconds);
        let ap = interpolate_row(aperiodicity, &grid, seconds);
        let origin = pulse.position.floor();
        let fraction = pulse.position - origin;

        if pulse.voiced {
            let period = sample_rate / pulse.f0;
            let response: Vec<Complex64> = (0..bins)
                .map(|k| {
                    if k == 0 {
                        return Complex64::new(0.0, 0.0);
                    }
                    let ratio = ap[k].clamp(0.0, 1.0);
                    let magnitude = (sp[k] * (1.0 - ratio * ratio)).max(0.0).sqrt() * period;
                    Complex64::from_polar(magnitude, -2.0 * PI * k as f64 * fraction / fft_size as f64)
                })
                .collect();
            add_centred(&mut output, &spectrum.inverse_real(&response), origin as isize);
        }

        let end = pulses
            .get(index + 1)
            .map(|next| next.position.floor() as usize)
            .unwrap_or(len)
            .min(len);
        let start = origin.max(0.0) as usize;
        let noise_len = end.saturating_sub(start).clamp(1, fft_size / 2);
        let mut noise: Vec<Complex64> = (0..fft_size)
            .map(|n| {
                let value = if n < noise_len {
                    rng.gen_range(-noise_amplitude..noise_amplitude)
                } else {
                    0.0
                };
                Complex64::new(value, 0.0)
            })
            .collect();
        spectrum.forward_in_place(&mut noise);

        let gain_scale = 2.0 * sample_rate / pulse.f0;
        let shaped: Vec<Complex64> = noise
            .iter()
            .take(bins)
            .enumerate()
            .map(|(k, &value)| {
                let ratio = ap[k].clamp(0.0, 1.0);
                value * (sp[k] * ratio * ratio * gain_scale).max(0.0).sqrt()
            })
            .collect();
        // Segment sample j sits at index j, the filter's leading tail wraps to the end
        add_centred(&mut output, &spectrum.inverse_real(&shaped), start as isize);
    }

    Array1::from(output)
}

/// Output length for a feature set of `frames` frames
pub fn output_len(frames: usize, sample_rate: f64, frame_period_ms: f64) -> usize {
    FrameGrid::with_frames(frames, sample_rate, frame_period_ms).signal_len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(frames: usize, bins: usize, value: f64) -> Array2<f64> {
        Array2::from_elem((frames, bins), value)
    }

    #[test]
    fn test_pulse_spacing_follows_f0() {
        let contour = vec![100.0; 1600];
        let pulses = place_pulses(&contour, 16000.0);
        assert_eq!(pulses.len(), 10);
        for pair in pulses.windows(2) {
            assert!((pair[1].position - pair[0].position - 160.0).abs() < 1e-6);
        }
        assert!(pulses.iter().all(|p| p.voiced));

        let unvoiced = place_pulses(&vec![0.0; 320], 16000.0);
        assert_eq!(unvoiced.len(), 10);
        assert!(unvoiced.iter().all(|p| !p.voiced && p.f0 == UNVOICED_F0));
    }

    #[test]
    fn test_output_length() {
        let f0 = vec![0.0; 201];
        let sp = flat(201, 513, 1e-12);
        let ap = flat(201, 513, 1.0);
        let y = synthesize(&f0, sp.view(), ap.view(), 16000.0, 5.0);
        assert_eq!(y.len(), 16001);
        assert_eq!(output_len(201, 16000.0, 5.0), 16001);
        assert_eq!(output_len(0, 16000.0, 5.0), 0);
    }

    #[test]
    fn test_floor_envelope_is_near_silent() {
        let f0 = vec![0.0; 50];
        let sp = flat(50, 513, 1e-12);
        let ap = flat(50, 513, 1.0 - 1e-12);
        let y = synthesize(&f0, sp.view(), ap.view(), 16000.0, 5.0);
        assert!(y.iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn test_deterministic() {
        let f0: Vec<f64> = (0..40).map(|i| if i % 10 < 7 { 150.0 } else { 0.0 }).collect();
        let sp = flat(40, 257, 1e-4);
        let ap = flat(40, 257, 0.3);
        let a = synthesize(&f0, sp.view(), ap.view(), 8000.0, 5.0);
        let b = synthesize(&f0, sp.view(), ap.view(), 8000.0, 5.0);
        assert_eq!(a, b);
        assert!(a.iter().any(|v| v.abs() > 1e-4));
    }
}
