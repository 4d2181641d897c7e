//! Face feature extraction as an injected capability.
//!
//! The embedding model itself lives outside this crate. Anything that turns
//! image bytes into one signature per detected face can implement
//! [`SignatureExtractor`]; tests substitute deterministic fakes.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::types::Signature;
use crate::ErrorKind;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image is not in a recognized format: {0}")]
    MalformedImage(String),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor failed: {0}")]
    Failed(String),
    #[error("extractor produced invalid output: {0}")]
    InvalidOutput(String),
    #[error("extractor I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Only an unreadable image is the caller's fault; everything else is the
    /// extractor's.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::MalformedImage(_) => ErrorKind::Input,
            ExtractError::Timeout(_)
            | ExtractError::Failed(_)
            | ExtractError::InvalidOutput(_)
            | ExtractError::Io(_) => ErrorKind::Unavailable,
        }
    }
}

/// Produces zero, one, or many signatures (one per detected face) from an image.
pub trait SignatureExtractor: Send + Sync {
    fn extract(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<Signature>, ExtractError>> + Send;
}

/// Reject bytes that are not a known image container before paying for inference.
pub fn validate_image(image: &[u8]) -> Result<image::ImageFormat, ExtractError> {
    if image.is_empty() {
        return Err(ExtractError::MalformedImage("empty image".into()));
    }
    image::guess_format(image).map_err(|e| ExtractError::MalformedImage(e.to_string()))
}

/// Validate the image, then run `extractor` under `timeout`.
///
/// Abandoning a stuck extraction has nothing to roll back: extraction only
/// ever produces read-only signatures.
pub async fn extract_with_timeout<E: SignatureExtractor>(
    extractor: &E,
    image: &[u8],
    timeout: Duration,
) -> Result<Vec<Signature>, ExtractError> {
    let format = validate_image(image)?;
    tracing::debug!(?format, bytes = image.len(), "extracting signatures");

    match tokio::time::timeout(timeout, extractor.extract(image)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(?timeout, "signature extraction timed out");
            Err(ExtractError::Timeout(timeout))
        }
    }
}

#[derive(Deserialize)]
struct ExtractorOutput {
    faces: Vec<Vec<f64>>,
}

/// Runs an external extractor program per image.
///
/// The image is written to the program's stdin; the program prints
/// `{"faces": [[...], ...]}` on stdout with one descriptor per detected face.
/// The child is killed if the returned future is dropped.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    async fn run(&self, image: &[u8]) -> Result<Vec<Signature>, ExtractError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        parse_output(&output.stdout)
    }
}

impl SignatureExtractor for CommandExtractor {
    fn extract(
        &self,
        image: &[u8],
    ) -> impl std::future::Future<Output = Result<Vec<Signature>, ExtractError>> + Send {
        self.run(image)
    }
}

pub const DEFAULT_EXTRACTOR_PROGRAM: &str = "facegate-extract";
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 10;

/// How to launch the external extractor, read from `FACEGATE_EXTRACTOR_*`.
///
/// Every binary that runs the extractor loads it through here so they agree
/// on variable names and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Extractor program; reads an image on stdin, prints signatures as JSON.
    pub program: PathBuf,
    /// Extra arguments, whitespace separated in the environment.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_EXTRACTOR_PROGRAM),
            args: Vec::new(),
            timeout_secs: DEFAULT_EXTRACT_TIMEOUT_SECS,
        }
    }
}

impl ExtractorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values keep their defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            program: var("FACEGATE_EXTRACTOR_CMD")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.program),
            args: var("FACEGATE_EXTRACTOR_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.args),
            timeout_secs: var("FACEGATE_EXTRACT_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn build(&self) -> CommandExtractor {
        CommandExtractor::new(&self.program, self.args.clone())
    }
}

fn parse_output(stdout: &[u8]) -> Result<Vec<Signature>, ExtractError> {
    let parsed: ExtractorOutput =
        serde_json::from_slice(stdout).map_err(|e| ExtractError::InvalidOutput(e.to_string()))?;

    parsed
        .faces
        .into_iter()
        .enumerate()
        .map(|(i, values)| {
            Signature::new(values)
                .map_err(|e| ExtractError::InvalidOutput(format!("face {i}: {e}")))
        })
        .collect()
}
