//! Pitch refinement
//!
//! Corrects a raw track against the signal it came from: each voiced frame is
//! re-estimated from the instantaneous frequency of its first harmonics, then
//! octave jumps are folded back and voicing islands and gaps are cleaned up.

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use super::common::{blackman, median, sample_at, FrameGrid, PitchRange};

const HARMONICS: usize = 3;
const WINDOW_PERIODS: f64 = 4.0;
const MAX_DEVIATION: f64 = 0.2;
const OCTAVE_NEIGHBOURHOOD: usize = 5;
const OCTAVE_TOLERANCE: f64 = 0.1;

pub fn refine(x: &[f64], grid: &FrameGrid, f0: &[f64], range: PitchRange) -> Vec<f64> {
    let corrected: Vec<f64> = f0
        .iter()
        .enumerate()
        .map(|(frame, &estimate)| {
            if estimate <= 0.0 {
                return 0.0;
            }
            match instantaneous_frequency(x, grid.sample_rate, grid.center(frame), estimate) {
                Some(refined)
                    if (refined - estimate).abs() <= MAX_DEVIATION * estimate && range.contains(refined) =>
                {
                    refined
                }
                _ => estimate,
            }
        })
        .collect();

    let folded = fold_octaves(&corrected, range);
    bridge_gaps(&drop_islands(&folded))
}

/// Magnitude-weighted instantaneous frequency of the first harmonics, divided by harmonic number
fn instantaneous_frequency(x: &[f64], sample_rate: f64, centre: isize, f0: f64) -> Option<f64> {
    let len = ((WINDOW_PERIODS * sample_rate / f0).round() as usize).max(8);
    let window = blackman(len);
    let start = centre - (len / 2) as isize;

    let mut weighted = 0.0;
    let mut total = 0.0;
    for harmonic in 1..=HARMONICS {
        let freq = f0 * harmonic as f64;
        if freq >= sample_rate / 2.0 {
            break;
        }
        let omega = 2.0 * PI * freq / sample_rate;
        let mut current = Complex64::new(0.0, 0.0);
        let mut shifted = Complex64::new(0.0, 0.0);
        for (n, &w) in window.iter().enumerate() {
            let rotation = Complex64::from_polar(w, -omega * n as f64);
            let index = start + n as isize;
            current += rotation * sample_at(x, index);
            shifted += rotation * sample_at(x, index + 1);
        }

        let magnitude = current.norm();
        if magnitude <= f64::EPSILON {
            continue;
        }
        let frequency = (shifted * current.conj()).arg() * sample_rate / (2.0 * PI);
        weighted += magnitude * frequency / harmonic as f64;
        total += magnitude;
    }

    if total > 0.0 { Some(weighted / total) } else { None }
}

/// Halve or double frames that sit an octave away from their voiced neighbourhood
fn fold_octaves(f0: &[f64], range: PitchRange) -> Vec<f64> {
    let mut out = f0.to_vec();
    for (i, &value) in f0.iter().enumerate() {
        if value <= 0.0 {
            continue;
        }
        let lo = i.saturating_sub(OCTAVE_NEIGHBOURHOOD);
        let hi = (i + OCTAVE_NEIGHBOURHOOD + 1).min(f0.len());
        let mut neighbours: Vec<f64> = (lo..hi)
            .filter(|&j| j != i && f0[j] > 0.0)
            .map(|j| f0[j])
            .collect();
        if neighbours.len() < 2 {
            continue;
        }
        let local = median(&mut neighbours);
        let ratio = value / local;

        let candidate = if (ratio - 2.0).abs() <= 2.0 * OCTAVE_TOLERANCE {
            value / 2.0
        } else if (ratio - 0.5).abs() <= 0.5 * OCTAVE_TOLERANCE {
            value * 2.0
        } else {
            continue;
        };
        if range.contains(candidate) {
            out[i] = candidate;
        }
    }
    out
}

/// Unvoice frames whose neighbours are both unvoiced
fn drop_islands(f0: &[f64]) -> Vec<f64> {
    if f0.len() < 3 {
        return f0.to_vec();
    }
    let voiced = |i: Option<usize>| i.and_then(|i| f0.get(i)).is_some_and(|&f| f > 0.0);
    f0.iter()
        .enumerate()
        .map(|(i, &value)| {
            if value > 0.0 && !voiced(i.checked_sub(1)) && !voiced(Some(i + 1)) {
                0.0
            } else {
                value
            }
        })
        .collect()
}

/// Fill single unvoiced frames between two voiced ones
fn bridge_gaps(f0: &[f64]) -> Vec<f64> {
    let mut out = f0.to_vec();
    for i in 1..f0.len().saturating_sub(1) {
        if f0[i] <= 0.0 && f0[i - 1] > 0.0 && f0[i + 1] > 0.0 {
            out[i] = 0.5 * (f0[i - 1] + f0[i + 1]);
        }
    }
    out
}
