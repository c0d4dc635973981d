//! Command line and environment configuration.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result};
use antifoley::DetectorConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "antifoley")]
#[command(about = "Detect synthetic (foley) environmental sound", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API (`GET /health`, `POST /analyze`).
    Serve(ServeArgs),
    /// Analyze one audio file and print the JSON report.
    Analyze(AnalyzeArgs),
    /// Check a weights file against the classifier architecture.
    InspectWeights(InspectArgs),
}

/// Compute device. Only the CPU backend is built in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Device {
    #[default]
    Cpu,
}

impl Device {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Classifier weights (safetensors). Without it the detector runs untrained.
    /// Blocks are read as conv, BN, ReLU unless params.json sets
    /// `"block_order": "relu_then_norm"`, which checkpoints from the
    /// reference training script need.
    #[arg(long, env = "ANTIFOLEY_WEIGHTS")]
    pub weights: Option<PathBuf>,

    /// Optional params.json overriding the default architecture.
    #[arg(long, env = "ANTIFOLEY_PARAMS")]
    pub params: Option<PathBuf>,
}

impl ModelArgs {
    #[must_use]
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            weights_path: self.weights.clone(),
            params_path: self.params.clone(),
            ..DetectorConfig::default()
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "ANTIFOLEY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "ANTIFOLEY_PORT", default_value_t = 5000)]
    pub port: u16,

    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, env = "ANTIFOLEY_DEVICE", value_enum, default_value = "cpu")]
    pub device: Device,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "ANTIFOLEY_MAX_UPLOAD_MB", default_value_t = 64)]
    pub max_upload_mb: usize,
}

impl ServeArgs {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("resolve {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("no address for {}:{}", self.host, self.port))
    }

    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Args)]
pub struct AnalyzeArgs {
    /// Audio file (.wav, .mp3, .flac, .ogg, .m4a, .aac).
    pub file: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Safetensors checkpoint. Checkpoints from the reference training
    /// script also need `"block_order": "relu_then_norm"` in params.json.
    #[arg(long, env = "ANTIFOLEY_WEIGHTS")]
    pub weights: PathBuf,

    #[arg(long, env = "ANTIFOLEY_PARAMS")]
    pub params: Option<PathBuf>,
}
