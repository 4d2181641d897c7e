use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod proxy;

use proxy::FaceGateProxy;

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face authentication CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account from credentials and one face image
    Register {
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Image containing exactly one face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Add another face signature to an existing identity
    Enroll {
        identity: i64,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Check a face against one claimed identity
    Verify {
        identity: i64,
        #[arg(short, long)]
        image: PathBuf,
        /// Distance threshold (daemon default when omitted)
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Find who a face belongs to
    Identify {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Password login
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// List registered accounts
    List,
    /// Allow an account to authenticate again
    Enable { identity: i64 },
    /// Block an account from authenticating
    Disable { identity: i64 },
    /// Delete an identity and all of its signatures
    Remove { identity: i64 },
    /// Show daemon status
    Status,
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
}

/// Pretty-print a JSON reply and report whether it carried an authentication.
fn print_reply(reply: &str) -> Result<bool> {
    let value: serde_json::Value = serde_json::from_str(reply).context("daemon sent invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(value.get("authenticated").and_then(|v| v.as_bool()).unwrap_or(true))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = FaceGateProxy::new(&connection)
        .await
        .context("facegated is not reachable")?;
    tracing::debug!(session = cli.session, "connected to facegated");

    let ok = match cli.command {
        Commands::Register { username, email, password, image } => {
            let image = read_image(&image)?;
            print_reply(&proxy.register(&username, &email, &password, &image).await?)?
        }
        Commands::Enroll { identity, image } => {
            let image = read_image(&image)?;
            print_reply(&proxy.enroll(identity, &image).await?)?
        }
        Commands::Verify { identity, image, threshold } => {
            let image = read_image(&image)?;
            print_reply(&proxy.verify(identity, &image, threshold.unwrap_or(-1.0)).await?)?
        }
        Commands::Identify { image, threshold } => {
            let image = read_image(&image)?;
            print_reply(&proxy.identify(&image, threshold.unwrap_or(-1.0)).await?)?
        }
        Commands::Login { username, password } => {
            print_reply(&proxy.login(&username, &password).await?)?
        }
        Commands::List => print_reply(&proxy.list_accounts().await?)?,
        Commands::Enable { identity } => report(identity, proxy.set_enabled(identity, true).await?),
        Commands::Disable { identity } => {
            report(identity, proxy.set_enabled(identity, false).await?)
        }
        Commands::Remove { identity } => report(identity, proxy.remove_identity(identity).await?),
        Commands::Status => print_reply(&proxy.status().await?)?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn report(identity: i64, found: bool) -> bool {
    if found {
        println!("identity {identity}: done");
    } else {
        eprintln!("identity {identity}: not found");
    }
    found
}
