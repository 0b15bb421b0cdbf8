//! Analysis and resynthesis through the public pipeline API

use std::f64::consts::PI;

use ndarray::Array1;
use worldbridge::audio::AudioMatrix;
use worldbridge::config::AnalysisConfig;
use worldbridge::processing::AnalysisPipeline;

const FS: f64 = 16000.0;

fn pipeline() -> AnalysisPipeline {
    AnalysisPipeline::new(AnalysisConfig::default())
}

fn sine(freq: f64, seconds: f64, amplitude: f64) -> AudioMatrix {
    AudioMatrix::from_mono(Array1::from_shape_fn((FS * seconds) as usize, |i| {
        amplitude * (2.0 * PI * freq * i as f64 / FS).sin()
    }))
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

#[test]
fn test_resynthesised_sine_keeps_its_pitch() {
    let pipeline = pipeline();
    let features = pipeline.extract_full(&sine(220.0, 0.6, 0.5), FS).unwrap();
    let resynthesised = pipeline.synthesize(&features, FS).unwrap();
    assert_eq!(resynthesised.channels(), 1);

    let track = pipeline.extract_pitch_fast(&resynthesised, FS).unwrap();
    let frames = track.f0.len();
    let middle: Vec<f64> = track.f0.iter().copied().skip(frames / 5).take(frames * 3 / 5).collect();
    let voiced: Vec<f64> = middle.iter().copied().filter(|f| *f > 0.0).collect();
    assert!(voiced.len() * 2 > middle.len(), "only {} of {} frames voiced", voiced.len(), middle.len());

    let estimate = median(voiced);
    assert!((estimate - 220.0).abs() / 220.0 < 0.02, "estimated {} Hz", estimate);
}

#[test]
fn test_silence_resynthesises_to_near_silence() {
    let pipeline = pipeline();
    let silence = AudioMatrix::from_mono(Array1::zeros(8000));
    let features = pipeline.extract_full(&silence, FS).unwrap();
    assert!(features.f0.iter().all(|f| *f == 0.0));

    let signal = pipeline.synthesize(&features, FS).unwrap();
    assert_eq!(signal.frames(), 8001);
    let peak = signal.samples().iter().fold(0.0f64, |m, v| m.max(v.abs()));
    assert!(peak < 1e-3, "peak {}", peak);
}

#[test]
fn test_pitch_trackers_are_pure() {
    let pipeline = pipeline();
    let audio = sine(150.0, 0.4, 0.3);
    assert_eq!(
        pipeline.extract_pitch_fast(&audio, FS).unwrap(),
        pipeline.extract_pitch_fast(&audio, FS).unwrap()
    );
    assert_eq!(
        pipeline.extract_pitch_precise(&audio, FS).unwrap(),
        pipeline.extract_pitch_precise(&audio, FS).unwrap()
    );
}

#[test]
fn test_concurrent_analyses_match_sequential() {
    let pipeline = pipeline();
    let inputs: Vec<AudioMatrix> = [110.0, 165.0, 247.0, 330.0]
        .iter()
        .map(|&f| sine(f, 0.3, 0.4))
        .collect();

    let sequential: Vec<_> = inputs
        .iter()
        .map(|x| pipeline.extract_full(x, FS).unwrap())
        .collect();

    let shared = &pipeline;
    let concurrent: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|x| scope.spawn(move || shared.extract_full(x, FS).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(sequential, concurrent);
}
