use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{ExtractorConfig, Threshold, DEFAULT_THRESHOLD};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod roster;
mod watch;

use roster::Roster;
use watch::{SnapshotSource, WatchConfig};

#[derive(Parser)]
#[command(name = "facegate-kiosk", about = "Roster-based live face recognition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a directory of one-face images into a roster file
    Encode {
        /// Directory of images; each file's stem becomes its label
        #[arg(long)]
        images: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Watch a snapshot file and report who appears in it
    Watch {
        #[arg(long)]
        roster: PathBuf,
        /// File the camera process keeps overwriting
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let extractor_config = ExtractorConfig::from_env();
    let extractor = extractor_config.build();
    let extract_timeout = extractor_config.timeout();

    match cli.command {
        Commands::Encode { images, out } => {
            let roster = roster::encode_dir(&extractor, &images, extract_timeout)
                .await
                .with_context(|| format!("failed to encode {}", images.display()))?;
            roster.save(&out).await?;
            for entry in roster.entries() {
                println!("  {} ({} components)", entry.label, entry.signature.dimension());
            }
            println!("{} entries written to {}", roster.len(), out.display());
        }
        Commands::Watch { roster, snapshot, interval_ms, threshold } => {
            let roster = Roster::load(&roster)
                .await
                .with_context(|| format!("failed to load roster {}", roster.display()))?;
            let config = WatchConfig {
                interval: Duration::from_millis(interval_ms.max(1)),
                threshold: Threshold::new(threshold).context("invalid --threshold")?,
                extract_timeout,
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let mut source = SnapshotSource::new(snapshot);
            let frames = watch::run_watch(&mut source, &extractor, &roster, &config, cancel, |report| {
                match &report.label {
                    Some(label) => println!(
                        "frame {}: {label} (distance {:.3})",
                        report.frame, report.decision.distance
                    ),
                    None => println!("frame {}: unknown", report.frame),
                }
            })
            .await?;
            tracing::info!(frames, "watch finished");
        }
    }

    Ok(())
}
