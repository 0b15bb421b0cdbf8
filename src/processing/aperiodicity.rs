//! Band aperiodicity
//!
//! For every harmonic band the ratio of inter-harmonic energy to total energy
//! is measured on a six-period Blackman window, then interpolated onto the
//! envelope's frequency bins.

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

use super::common::{blackman, interp_linear, sample_at, FrameGrid, Spectrum};

/// Aperiodicity of unvoiced frames
pub const UNVOICED_APERIODICITY: f64 = 1.0 - 1e-12;
const MIN_APERIODICITY: f64 = 0.001;
const MAX_APERIODICITY: f64 = 0.999;
const WINDOW_PERIODS: f64 = 6.0;
/// Half-width of the harmonic peak region, as a share of f0
const HARMONIC_HALF_WIDTH: f64 = 0.3;

/// Aperiodicity of every frame, shape `[frames, fft_size / 2 + 1]`
///
/// `fft_size` is the envelope's FFT size; the analysis itself runs at twice
/// that to fit the longer window.
pub fn estimate_aperiodicity(
    x: &[f64],
    grid: &FrameGrid,
    f0: &[f64],
    fft_size: usize,
    f0_floor: f64,
) -> Array2<f64> {
    let bins = fft_size / 2 + 1;
    let analysis = Spectrum::new(fft_size * 2);
    let bin_freqs: Vec<f64> = (0..bins)
        .map(|k| k as f64 * grid.sample_rate / fft_size as f64)
        .collect();

    let rows: Vec<Vec<f64>> = (0..grid.frames)
        .into_par_iter()
        .map(|frame| {
            if f0[frame] <= 0.0 {
                return vec![UNVOICED_APERIODICITY; bins];
            }
            let f = f0[frame].max(f0_floor);
            let (centres, ratios) = band_ratios(x, grid.sample_rate, grid.center(frame), f, &analysis);
            if centres.is_empty() {
                return vec![MAX_APERIODICITY; bins];
            }
            bin_freqs
                .iter()
                .map(|&freq| interp_linear(&centres, &ratios, freq))
                .collect()
        })
        .collect();

    let mut aperiodicity = Array2::zeros((grid.frames, bins));
    for (mut row, values) in aperiodicity.rows_mut().into_iter().zip(rows.iter()) {
        row.assign(&ArrayView1::from(values.as_slice()));
    }
    aperiodicity
}

/// Harmonic centre frequencies and their band aperiodicity
fn band_ratios(x: &[f64], fs: f64, centre: isize, f0: f64, analysis: &Spectrum) -> (Vec<f64>, Vec<f64>) {
    let len = ((WINDOW_PERIODS * fs / f0).round() as usize).clamp(8, analysis.size());
    let window = blackman(len);
    let start = centre - (len / 2) as isize;
    let waveform: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, &w)| w * sample_at(x, start + i as isize))
        .collect();
    let power = analysis.power(&waveform);
    let bin_width = fs / analysis.size() as f64;
    let nyquist = fs / 2.0;

    let mut centres = Vec::new();
    let mut ratios = Vec::new();
    let mut harmonic = 1usize;
    loop {
        let centre_freq = harmonic as f64 * f0;
        let lo = centre_freq - 0.5 * f0;
        let hi = (centre_freq + 0.5 * f0).min(nyquist);
        if centre_freq >= nyquist || hi <= lo {
            break;
        }

        let first = (lo / bin_width).ceil() as usize;
        let last = ((hi / bin_width).floor() as usize).min(power.len() - 1);
        let mut total = 0.0;
        let mut noise = 0.0;
        for bin in first..=last {
            let freq = bin as f64 * bin_width;
            total += power[bin];
            if (freq - centre_freq).abs() > HARMONIC_HALF_WIDTH * f0 {
                noise += power[bin];
            }
        }

        let ratio = if total > f64::MIN_POSITIVE {
            (noise / total).sqrt()
        } else {
            MAX_APERIODICITY
        };
        centres.push(centre_freq);
        ratios.push(ratio.clamp(MIN_APERIODICITY, MAX_APERIODICITY));
        harmonic += 1;
    }
    (centres, ratios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn mean(row: ArrayView1<f64>) -> f64 {
        row.sum() / row.len() as f64
    }

    #[test]
    fn test_periodic_signal_has_low_aperiodicity() {
        let fs = 16000.0;
        let x: Vec<f64> = (0..8000)
            .map(|i| {
                let t = i as f64 / fs;
                (1..=10).map(|h| (2.0 * PI * 200.0 * h as f64 * t).sin() / h as f64).sum()
            })
            .collect();
        let grid = FrameGrid::for_signal(x.len(), fs, 5.0);
        let ap = estimate_aperiodicity(&x, &grid, &vec![200.0; grid.frames], 1024, 71.0);
        assert_eq!(ap.dim(), (grid.frames, 513));
        let row = ap.row(grid.frames / 2);
        assert!(mean(row.slice(ndarray::s![..100])) < 0.2);
    }

    #[test]
    fn test_noise_has_high_aperiodicity() {
        let fs = 16000.0;
        let mut rng = StdRng::seed_from_u64(7);
        let x: Vec<f64> = (0..8000).map(|_| rng.gen_range(-0.5..0.5)).collect();
        let grid = FrameGrid::for_signal(x.len(), fs, 5.0);
        let ap = estimate_aperiodicity(&x, &grid, &vec![200.0; grid.frames], 1024, 71.0);
        assert!(mean(ap.row(grid.frames / 2)) > 0.5);
    }

    #[test]
    fn test_unvoiced_frames_are_aperiodic() {
        let x = vec![0.1; 1600];
        let grid = FrameGrid::for_signal(x.len(), 16000.0, 5.0);
        let ap = estimate_aperiodicity(&x, &grid, &vec![0.0; grid.frames], 1024, 71.0);
        assert!(ap.iter().all(|&v| v == UNVOICED_APERIODICITY));
    }
}
