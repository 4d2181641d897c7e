use std::path::PathBuf;
use std::str::FromStr;
use facegate_core::{ExtractorConfig, DEFAULT_THRESHOLD};
use facegate_store::{DEFAULT_DIMENSION, DEFAULT_READ_CONNECTIONS};

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance at or below which two signatures match.
    pub match_threshold: f64,
    /// Signature dimensionality the store enforces.
    pub signature_dim: usize,
    pub extractor: ExtractorConfig,
    pub read_connections: usize,
    /// Passphrase for at-rest payload encryption. Unset stores plaintext.
    pub store_key: Option<String>,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("facegate.db"));

        Self {
            db_path,
            match_threshold: parsed(&var, "FACEGATE_MATCH_THRESHOLD", DEFAULT_THRESHOLD),
            signature_dim: parsed(&var, "FACEGATE_SIGNATURE_DIM", DEFAULT_DIMENSION),
            extractor: ExtractorConfig::from_lookup(&var),
            read_connections: parsed(&var, "FACEGATE_READ_CONNECTIONS", DEFAULT_READ_CONNECTIONS),
            store_key: var("FACEGATE_STORE_KEY").filter(|k| !k.is_empty()),
            session_bus: var("FACEGATE_SESSION_BUS").map(|v| v == "1").unwrap_or(false),
        }
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
