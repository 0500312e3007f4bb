//! ChunkFerry command-line uploader.

mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chunkferry_transfer::DEFAULT_CHUNK_SIZE;
use chunkferry_uploader::{RetryConfig, UploadConfig, UploadOrchestrator, WsClient};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkferry-upload")]
#[command(about = "Upload files to a ChunkFerry assembler in resumable chunks")]
struct Cli {
    /// Assembler WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:7001")]
    server: String,

    /// Bytes per chunk
    #[arg(short = 'c', long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Chunks in flight per file
    #[arg(short = 'j', long, default_value_t = 1)]
    concurrency: usize,

    /// Attempts per chunk before the file fails
    #[arg(short = 'a', long, default_value_t = 5)]
    max_attempts: u32,

    /// Per-attempt timeout in seconds
    #[arg(long, default_value_t = 30)]
    attempt_timeout: u64,

    /// Skip the SHA-256 comparison of the assembled file
    #[arg(long)]
    no_verify: bool,

    /// Files to upload
    #[arg(value_name = "FILE", required = true, num_args = 1..)]
    files: Vec<PathBuf>,
}

impl Cli {
    fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            concurrency: self.concurrency,
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                attempt_timeout: Duration::from_secs(self.attempt_timeout),
                ..RetryConfig::default()
            },
            verify_digest: !self.no_verify,
            ..UploadConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    let failed = rt.block_on(run(cli))?;

    if failed > 0 {
        anyhow::bail!("{failed} upload(s) did not complete");
    }
    Ok(())
}

/// Uploads every file and returns how many did not complete.
async fn run(cli: Cli) -> anyhow::Result<usize> {
    let config = cli.upload_config();
    config.validate()?;

    let client = WsClient::connect(&cli.server)
        .await
        .with_context(|| format!("connecting to {}", cli.server))?;
    let client = Arc::new(client);
    tracing::info!(server = %cli.server, files = cli.files.len(), "connected");

    let mut orchestrator = UploadOrchestrator::new(config);
    let mut events = orchestrator
        .take_events()
        .context("event receiver already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = output::format_event(&event) {
                println!("{line}");
            }
        }
    });

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("SIGINT received, cancelling uploads");
            cancel.cancel();
        }
    });

    let sources = cli.files.into_iter().map(Into::into).collect();
    let results = orchestrator.upload(client.clone(), sources).await;
    drop(orchestrator);
    let _ = printer.await;
    client.close().await;

    println!("{}", output::summary(&results));
    Ok(results.iter().filter(|r| !r.is_success()).count())
}
