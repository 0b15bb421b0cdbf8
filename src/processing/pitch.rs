//! Frame-wise fundamental frequency trackers
//!
//! Both trackers return one value per grid frame, 0.0 for unvoiced frames.

use super::common::{median, parabolic_offset, segment, FrameGrid, PitchRange};

/// Rate the fast tracker analyses at
const FAST_TARGET_RATE: f64 = 8000.0;
/// Peak of the normalised correlation required for a voiced decision
const FAST_VOICING_THRESHOLD: f64 = 0.5;
/// Candidate peaks within this share of the global maximum count as strong
const FAST_PEAK_RATIO: f64 = 0.85;

const PRECISE_THRESHOLD: f64 = 0.15;
const PRECISE_FALLBACK_THRESHOLD: f64 = 0.35;

/// Per-sample energy under which a frame is treated as silent
const SILENCE_ENERGY: f64 = 1e-12;

/// Box-filter decimation to roughly [`FAST_TARGET_RATE`]
fn decimate(x: &[f64], sample_rate: f64) -> (Vec<f64>, f64) {
    let factor = ((sample_rate / FAST_TARGET_RATE).floor() as usize).max(1);
    if factor == 1 {
        return (x.to_vec(), sample_rate);
    }
    let decimated = x
        .chunks(factor)
        .map(|chunk| chunk.iter().sum::<f64>() / chunk.len() as f64)
        .collect();
    (decimated, sample_rate / factor as f64)
}

fn lag_bounds(sample_rate: f64, range: PitchRange) -> (usize, usize) {
    let max_lag = (sample_rate / range.floor).ceil() as usize;
    let min_lag = ((sample_rate / range.ceil).floor() as usize).max(2);
    (min_lag, max_lag.max(min_lag + 2))
}

/// Normalised cross-correlation tracker on a decimated signal
pub fn track_fast(x: &[f64], grid: &FrameGrid, range: PitchRange) -> Vec<f64> {
    let (y, rate) = decimate(x, grid.sample_rate);
    let (min_lag, max_lag) = lag_bounds(rate, range);
    let window = max_lag;
    let scale = rate / grid.sample_rate;

    let mut correlation = vec![0.0; max_lag + 2];
    (0..grid.frames)
        .map(|frame| {
            let centre = (grid.center(frame) as f64 * scale).round() as isize;
            let start = centre - ((window + max_lag) / 2) as isize;
            let seg = segment(&y, start, window + max_lag + 1);

            let reference = &seg[..window];
            let e0: f64 = reference.iter().map(|v| v * v).sum();
            if e0 <= SILENCE_ENERGY * window as f64 {
                return 0.0;
            }

            // Energy of the lagged window, updated incrementally
            let mut e_lag: f64 = seg[min_lag - 1..min_lag - 1 + window].iter().map(|v| v * v).sum();
            let mut global = f64::MIN;
            for lag in (min_lag - 1)..=(max_lag + 1) {
                if lag > min_lag - 1 {
                    let leaving = seg[lag - 1];
                    let entering = seg[lag - 1 + window];
                    e_lag += entering * entering - leaving * leaving;
                }
                let dot: f64 = reference
                    .iter()
                    .zip(&seg[lag..lag + window])
                    .map(|(a, b)| a * b)
                    .sum();
                let denom = (e0 * e_lag.max(0.0)).sqrt();
                correlation[lag] = if denom > 0.0 { dot / denom } else { 0.0 };
                if (min_lag..=max_lag).contains(&lag) {
                    global = global.max(correlation[lag]);
                }
            }
            if global < FAST_VOICING_THRESHOLD {
                return 0.0;
            }

            let best = (min_lag..=max_lag)
                .find(|&lag| {
                    correlation[lag] >= FAST_PEAK_RATIO * global
                        && correlation[lag] >= correlation[lag - 1]
                        && correlation[lag] >= correlation[lag + 1]
                })
                .unwrap_or_else(|| {
                    (min_lag..=max_lag)
                        .max_by(|&a, &b| correlation[a].total_cmp(&correlation[b]))
                        .unwrap_or(min_lag)
                });

            let offset = parabolic_offset(correlation[best - 1], correlation[best], correlation[best + 1]);
            let f0 = rate / (best as f64 + offset);
            if range.contains(f0) { f0 } else { 0.0 }
        })
        .collect()
}

/// Cumulative-mean-normalised difference tracker on the full-rate signal
pub fn track_precise(x: &[f64], grid: &FrameGrid, range: PitchRange) -> Vec<f64> {
    let rate = grid.sample_rate;
    let (min_lag, max_lag) = lag_bounds(rate, range);
    let window = max_lag;

    let mut difference = vec![0.0; max_lag + 2];
    let mut normalised = vec![1.0; max_lag + 2];
    let raw: Vec<f64> = (0..grid.frames)
        .map(|frame| {
            let start = grid.center(frame) - ((window + max_lag) / 2) as isize;
            let seg = segment(x, start, window + max_lag + 2);

            let energy: f64 = seg[..window].iter().map(|v| v * v).sum();
            if energy <= SILENCE_ENERGY * window as f64 {
                return 0.0;
            }

            let mut running = 0.0;
            normalised[0] = 1.0;
            for lag in 1..=(max_lag + 1) {
                difference[lag] = (0..window)
                    .map(|j| {
                        let d = seg[j] - seg[j + lag];
                        d * d
                    })
                    .sum();
                running += difference[lag];
                normalised[lag] = if running > 0.0 {
                    difference[lag] * lag as f64 / running
                } else {
                    1.0
                };
            }

            let below = (min_lag..=max_lag).find(|&lag| normalised[lag] < PRECISE_THRESHOLD);
            let best = match below {
                Some(mut lag) => {
                    while lag < max_lag && normalised[lag + 1] < normalised[lag] {
                        lag += 1;
                    }
                    lag
                }
                None => {
                    let lag = (min_lag..=max_lag)
                        .min_by(|&a, &b| normalised[a].total_cmp(&normalised[b]))
                        .unwrap_or(min_lag);
                    if normalised[lag] >= PRECISE_FALLBACK_THRESHOLD {
                        return 0.0;
                    }
                    lag
                }
            };

            let offset = parabolic_offset(normalised[best - 1], normalised[best], normalised[best + 1]);
            let f0 = rate / (best as f64 + offset);
            if range.contains(f0) { f0 } else { 0.0 }
        })
        .collect();

    smooth_voiced_runs(&raw)
}

/// Three-point median inside voiced runs; run edges are kept
fn smooth_voiced_runs(f0: &[f64]) -> Vec<f64> {
    let mut out = f0.to_vec();
    for i in 1..f0.len().saturating_sub(1) {
        if f0[i - 1] > 0.0 && f0[i] > 0.0 && f0[i + 1] > 0.0 {
            out[i] = median(&mut [f0[i - 1], f0[i], f0[i + 1]]);
        }
    }
    out
}
