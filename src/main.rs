//! WorldBridge - Vocoder Analysis Service

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use worldbridge::{init_logging, Args, Config, Service};

fn main() {
    let args = Args::parse();

    init_logging(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.verbose {
        println!("{}", worldbridge::get_library_info());
        println!();
    }

    let check_only = args.check_only;
    let config = Config::from_args_and_config(args)?;

    if check_only {
        return run_check(&config);
    }

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;

    println!("=== WorldBridge Vocoder Service ===");
    println!("Address: http://{}", addr);
    println!("Max payload: {} bytes", config.max_payload_bytes());
    println!("Frame period: {} ms", config.frame_period_ms());
    println!("Workers: {}", config.server.worker_threads);
    println!("===================================\n");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads)
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let service = Arc::new(Service::new(Arc::new(config)));
    runtime
        .block_on(worldbridge::server::serve(service, addr))
        .with_context(|| format!("Server on {} failed", addr))?;

    Ok(())
}

fn run_check(config: &Config) -> anyhow::Result<()> {
    println!("=== Configuration Check ===");
    config.validate()?;
    println!("✅ Config OK");
    println!("✅ CPU cores: {}", num_cpus::get());

    let codec = worldbridge::audio::AudioCodec::new(config.limits.clone());
    let formats = codec.list_formats();
    println!(
        "✅ Formats: {}",
        formats.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    println!("✅ Ready to serve on {}", config.bind_address());
    Ok(())
}
