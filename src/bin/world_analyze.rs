//! Offline vocoder analysis of one audio file
//!
//! Decodes the file, runs the full analysis, prints a summary and optionally
//! writes the resynthesised signal as WAV.

use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use worldbridge::audio::AudioCodec;
use worldbridge::config::{AnalysisConfig, LimitsConfig};
use worldbridge::init_logging;
use worldbridge::invocation::Timing;
use worldbridge::processing::AnalysisPipeline;

#[derive(Debug, Parser)]
#[command(name = "world_analyze", about = "Analyse an audio file and optionally resynthesise it", version)]
struct Cli {
    #[arg(help = "Input audio file")]
    input: PathBuf,

    #[arg(short = 'o', long = "output", help = "Write the resynthesised signal to this WAV file")]
    output: Option<PathBuf>,

    #[arg(long = "subtype", default_value = "PCM_16", help = "WAV subtype of the output")]
    subtype: String,

    #[arg(long = "frame-period", default_value_t = 5.0, help = "Analysis frame period (ms)")]
    frame_period: f64,

    #[arg(long = "f0-floor", default_value_t = 71.0, help = "Lowest detectable F0 (Hz)")]
    f0_floor: f64,

    #[arg(long = "f0-ceil", default_value_t = 800.0, help = "Highest detectable F0 (Hz)")]
    f0_ceil: f64,

    #[arg(long = "precise", help = "Also run the precise pitch tracker and compare")]
    precise: bool,

    #[arg(short = 'v', long = "verbose", help = "Enable verbose output mode")]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = worldbridge::Config::default();
    config.analysis = AnalysisConfig {
        frame_period_ms: cli.frame_period,
        f0_floor: cli.f0_floor,
        f0_ceil: cli.f0_ceil,
        ..AnalysisConfig::default()
    };
    // Local files are trusted; only the spool threshold matters here
    config.limits = LimitsConfig {
        max_payload_bytes: usize::MAX,
        ..LimitsConfig::default()
    };
    config.validate()?;

    let codec = AudioCodec::new(config.limits.clone());
    let pipeline = AnalysisPipeline::new(config.analysis.clone());

    let file = File::open(&cli.input).with_context(|| format!("Cannot open {}", cli.input.display()))?;
    let (audio, info) = codec
        .decode_reader(file)
        .with_context(|| format!("Cannot decode {}", cli.input.display()))?;

    println!("=== WorldBridge Offline Analysis ===");
    println!("Input: {}", cli.input.display());
    println!(
        "Format: {}/{}, {} Hz, {} ch, {:.2}s",
        info.format, info.subtype, info.sample_rate, info.channels, info.duration_seconds
    );

    let fs = info.sample_rate as f64;
    let start = Instant::now();
    let features = pipeline.extract_full(&audio, fs)?;
    let timing = Timing { elapsed: start.elapsed() };

    let voiced: Vec<f64> = features.f0.iter().copied().filter(|f| *f > 0.0).collect();
    println!("Frames: {} ({} voiced)", features.frames(), voiced.len());
    if !voiced.is_empty() {
        let mean = voiced.iter().sum::<f64>() / voiced.len() as f64;
        let (low, high) = voiced
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &f| (lo.min(f), hi.max(f)));
        println!("F0: mean {:.1} Hz, range {:.1}-{:.1} Hz", mean, low, high);
    }
    println!("FFT size: {}", pipeline.fft_size(fs)?);
    println!("Analysis: {}", timing.server_timing_header());

    if cli.precise {
        let start = Instant::now();
        let precise = pipeline.extract_pitch_precise(&audio, fs)?;
        let timing = Timing { elapsed: start.elapsed() };
        let agree = precise
            .f0
            .iter()
            .zip(features.f0.iter())
            .filter(|(a, b)| (**a > 0.0) == (**b > 0.0))
            .count();
        println!(
            "Precise tracker: {}/{} frames agree on voicing ({})",
            agree,
            features.frames(),
            timing.server_timing_header()
        );
    }

    if let Some(output) = &cli.output {
        let start = Instant::now();
        let signal = pipeline.synthesize(&features, fs)?;
        let timing = Timing { elapsed: start.elapsed() };
        let bytes = codec.encode(&signal, info.sample_rate, Some("WAV"), Some(&cli.subtype))?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, bytes).with_context(|| format!("Cannot write {}", output.display()))?;
        println!(
            "Output: {} ({} samples, {})",
            output.display(),
            signal.frames(),
            timing.server_timing_header()
        );
    }

    Ok(())
}
