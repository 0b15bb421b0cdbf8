//! Configuration management for the service

use crate::error::{WorldBridgeError, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub analysis: AnalysisConfig,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Request body ceiling, also the hard cap of every spool
    pub max_payload_bytes: usize,
    /// Bytes a spool keeps in memory before moving to a temp file
    pub spool_memory_bytes: usize,
    /// Most panels a single plot may stack
    pub max_plot_panels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub frame_period_ms: f64,
    pub f0_floor: f64,
    pub f0_ceil: f64,
    /// Highest sampling rate accepted by analysis and synthesis (Hz)
    pub max_sample_rate: f64,
    /// Most f64 values a single output array may hold
    pub max_output_values: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            analysis: AnalysisConfig::default(),
            verbose: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6701,
            worker_threads: num_cpus::get(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 128 * MIB,
            spool_memory_bytes: 8 * MIB,
            max_plot_panels: 64,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_period_ms: 5.0,
            f0_floor: 71.0,
            f0_ceil: 800.0,
            max_sample_rate: 384_000.0,
            max_output_values: 32 * MIB,
        }
    }
}

impl Config {
    /// Get bind address (convenience method)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.limits.max_payload_bytes
    }

    pub fn spool_memory_bytes(&self) -> usize {
        self.limits.spool_memory_bytes
    }

    pub fn frame_period_ms(&self) -> f64 {
        self.analysis.frame_period_ms
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "worldbridge", about = "Vocoder analysis and audio conversion service", version, author)]
pub struct Args {
    #[arg(long = "host", help = "Address to bind")]
    pub host: Option<String>,

    #[arg(short = 'p', long = "port", help = "Port to listen on")]
    pub port: Option<u16>,

    #[arg(long = "max-payload-mb", help = "Maximum request body size (MiB)")]
    pub max_payload_mb: Option<usize>,

    #[arg(long = "frame-period", help = "Analysis frame period (ms)")]
    pub frame_period: Option<f64>,

    #[arg(long = "f0-floor", help = "Lowest detectable F0 (Hz)")]
    pub f0_floor: Option<f64>,

    #[arg(long = "f0-ceil", help = "Highest detectable F0 (Hz)")]
    pub f0_ceil: Option<f64>,

    #[arg(long = "worker-threads", help = "Runtime worker thread count")]
    pub worker_threads: Option<usize>,

    #[arg(short = 'v', long = "verbose", help = "Enable verbose output mode")]
    pub verbose: bool,

    #[arg(short = 'c', long = "config", help = "Config file path (TOML format)")]
    pub config_file: Option<PathBuf>,

    #[arg(long = "check-only", help = "Validate configuration and exit")]
    pub check_only: bool,
}

impl Config {
    /// Create config from command line arguments and config file
    pub fn from_args_and_config(args: Args) -> Result<Self> {
        let mut config = if let Some(config_path) = &args.config_file {
            Self::from_file(config_path)?
        } else {
            Self::default()
        };

        // Command line arguments override config file settings
        if let Some(host) = args.host {
            config.server.host = host;
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(threads) = args.worker_threads {
            config.server.worker_threads = threads;
        }
        if let Some(mb) = args.max_payload_mb {
            config.limits.max_payload_bytes = mb.saturating_mul(MIB);
            config.limits.spool_memory_bytes =
                config.limits.spool_memory_bytes.min(config.limits.max_payload_bytes);
        }
        if let Some(period) = args.frame_period {
            config.analysis.frame_period_ms = period;
        }
        if let Some(floor) = args.f0_floor {
            config.analysis.f0_floor = floor;
        }
        if let Some(ceil) = args.f0_ceil {
            config.analysis.f0_ceil = ceil;
        }
        config.verbose = config.verbose || args.verbose;

        config.validate()?;

        Ok(config)
    }

    /// Load config from TOML config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorldBridgeError::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| WorldBridgeError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Validate configuration parameter validity
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(WorldBridgeError::config("Host cannot be empty"));
        }

        if self.server.worker_threads == 0 {
            return Err(WorldBridgeError::config("Worker thread count must be greater than 0"));
        }
        if self.server.worker_threads > num_cpus::get() * 2 {
            return Err(WorldBridgeError::config("Worker thread count cannot exceed 2x logical CPU cores"));
        }

        if self.limits.max_payload_bytes == 0 {
            return Err(WorldBridgeError::config("Maximum payload size must be greater than 0"));
        }
        if self.limits.spool_memory_bytes > self.limits.max_payload_bytes {
            return Err(WorldBridgeError::config("Spool memory threshold cannot exceed the payload ceiling"));
        }
        if self.limits.max_plot_panels == 0 {
            return Err(WorldBridgeError::config("Plot panel limit must be greater than 0"));
        }

        let analysis = &self.analysis;
        if !(analysis.frame_period_ms.is_finite() && analysis.frame_period_ms > 0.0) {
            return Err(WorldBridgeError::config("Frame period must be a positive number of milliseconds"));
        }
        if !(analysis.f0_floor.is_finite() && analysis.f0_floor > 0.0) {
            return Err(WorldBridgeError::config("F0 floor must be greater than 0"));
        }
        if !(analysis.f0_ceil.is_finite() && analysis.f0_ceil > analysis.f0_floor) {
            return Err(WorldBridgeError::config("F0 ceiling must be greater than F0 floor"));
        }
        if !(analysis.max_sample_rate.is_finite() && analysis.max_sample_rate > 2.0 * analysis.f0_ceil) {
            return Err(WorldBridgeError::config("Maximum sample rate must exceed twice the F0 ceiling"));
        }
        if analysis.max_output_values == 0 {
            return Err(WorldBridgeError::config("Output value limit must be greater than 0"));
        }

        Ok(())
    }

    /// Save config to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| WorldBridgeError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| WorldBridgeError::config(format!("Failed to write config file: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["worldbridge"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 6701);
        assert_eq!(config.max_payload_bytes(), 128 * 1024 * 1024);
        assert_eq!(config.frame_period_ms(), 5.0);
        assert_eq!(config.analysis.f0_floor, 71.0);
        assert_eq!(config.analysis.f0_ceil, 800.0);
        assert_eq!(config.analysis.max_sample_rate, 384_000.0);
        assert_eq!(config.limits.max_plot_panels, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.analysis.frame_period_ms = 0.0;
        assert!(config.validate().is_err());
        config.analysis.frame_period_ms = 5.0;

        config.analysis.f0_ceil = 50.0;
        assert!(config.validate().is_err());
        config.analysis.f0_ceil = 800.0;

        config.limits.spool_memory_bytes = config.limits.max_payload_bytes + 1;
        assert!(config.validate().is_err());
        config.limits.spool_memory_bytes = 1024;

        config.limits.max_plot_panels = 0;
        assert!(config.validate().is_err());
        config.limits.max_plot_panels = 64;

        config.analysis.max_sample_rate = f64::INFINITY;
        assert!(config.validate().is_err());
        config.analysis.max_sample_rate = 1000.0;
        assert!(config.validate().is_err());
        config.analysis.max_sample_rate = 384_000.0;

        config.analysis.max_output_values = 0;
        assert!(config.validate().is_err());
        config.analysis.max_output_values = 1024;

        config.server.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_file_keeps_limit_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        std::fs::write(
            &config_path,
            "verbose = false\n\n[server]\nhost = \"127.0.0.1\"\nport = 7000\nworker_threads = 1\n\n\
             [limits]\nmax_payload_bytes = 1048576\nspool_memory_bytes = 1024\n\n\
             [analysis]\nframe_period_ms = 5.0\nf0_floor = 71.0\nf0_ceil = 800.0\n",
        )
        .unwrap();

        let loaded = Config::from_file(&config_path).unwrap();
        assert_eq!(loaded.limits.max_plot_panels, 64);
        assert_eq!(loaded.analysis.max_sample_rate, 384_000.0);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_args_override_defaults() {
        let config = Config::from_args_and_config(args(&["--port", "9000", "--max-payload-mb", "4"])).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.max_payload_bytes(), 4 * 1024 * 1024);
        assert!(config.spool_memory_bytes() <= config.max_payload_bytes());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.analysis.frame_period_ms = 10.0;

        assert!(config.save_to_file(&config_path).is_ok());
        assert!(config_path.exists());

        let loaded = Config::from_file(&config_path).unwrap();
        assert_eq!(loaded.frame_period_ms(), 10.0);
        assert_eq!(loaded.server.port, config.server.port);

        let from_args = Config::from_args_and_config(args(&[
            "--config",
            config_path.to_str().unwrap(),
            "--f0-ceil",
            "600",
        ]))
        .unwrap();
        assert_eq!(from_args.frame_period_ms(), 10.0);
        assert_eq!(from_args.analysis.f0_ceil, 600.0);
    }
}
