use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use antifoley::weights::WeightStore;
use antifoley::{AntiFoleyNet, ClassifierParams, Detector};
use antifoley_cli::config::{AnalyzeArgs, Cli, Command, InspectArgs, ServeArgs};
use antifoley_cli::server::{self, AppState};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Analyze(args) => run_analyze(&args),
        Command::InspectWeights(args) => inspect_weights(&args),
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let addr = args.socket_addr()?;
    let cfg = args.model.detector_config();
    let detector = tokio::task::spawn_blocking(move || Detector::load(&cfg))
        .await
        .context("join detector loader")?
        .context("initialize detector")?;

    tracing::info!(
        device = args.device.as_str(),
        weights = detector.provenance().as_str(),
        max_upload_mb = args.max_upload_mb,
        "model initialized"
    );

    let state = Arc::new(AppState {
        detector: Arc::new(detector),
        device: args.device,
        max_upload_bytes: args.max_upload_bytes(),
    });
    server::serve(state, addr)
        .await
        .with_context(|| format!("serve on {addr}"))
}

fn run_analyze(args: &AnalyzeArgs) -> Result<()> {
    let path = &args.file;
    let bytes = std::fs::read(path).with_context(|| format!("read file {path:?}"))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("no file name in {path:?}"))?;

    let detector = Detector::load(&args.model.detector_config()).context("initialize detector")?;
    let report = detector
        .analyze_upload(file_name, bytes)
        .with_context(|| format!("analyze {path:?}"))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_params(path: Option<&Path>) -> Result<ClassifierParams> {
    match path {
        Some(p) => ClassifierParams::from_path(p).context("load params.json"),
        None => Ok(ClassifierParams::default()),
    }
}

fn inspect_weights(args: &InspectArgs) -> Result<()> {
    let params = load_params(args.params.as_deref())?;
    let store = WeightStore::open(&args.weights)
        .with_context(|| format!("open weights {:?}", args.weights))?;
    let names = store.names().context("list tensor names")?;

    AntiFoleyNet::load(&args.weights, params.clone())
        .context("weights do not match the classifier architecture")?;
    eprintln!(
        "weights ok: tensor_count={} conv_blocks={} d_model={} encoder_layers={} block_order={:?}",
        names.len(),
        params.conv_channels.len(),
        params.d_model,
        params.n_layers,
        params.block_order
    );
    Ok(())
}
