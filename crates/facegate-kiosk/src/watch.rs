//! Live recognition: poll a frame source on a fixed cadence and match every
//! face in each new frame against the roster.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use facegate_core::extractor::{extract_with_timeout, SignatureExtractor};
use facegate_core::{EuclideanMatcher, MatchDecision, Matcher, Threshold};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::roster::Roster;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("roster is empty")]
    EmptyRoster,
}

/// Where frames come from. `Ok(None)` means nothing new since the last call.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> impl Future<Output = std::io::Result<Option<Vec<u8>>>> + Send;
}

/// A file some camera process keeps overwriting; a frame is new when its
/// modification time or size changes.
pub struct SnapshotSource {
    path: PathBuf,
    last_seen: Option<(SystemTime, u64)>,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), last_seen: None }
    }
}

impl FrameSource for SnapshotSource {
    async fn next_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let stamp = (metadata.modified()?, metadata.len());
        if self.last_seen == Some(stamp) {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&self.path).await?;
        self.last_seen = Some(stamp);
        Ok(Some(bytes))
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval: Duration,
    pub threshold: Threshold,
    pub extract_timeout: Duration,
}

/// One face seen in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceReport {
    pub frame: u64,
    /// Roster label of the match, `None` when the face is unknown.
    pub label: Option<String>,
    pub decision: MatchDecision,
}

/// Run until `cancel` fires. Returns the number of frames processed.
///
/// Ticks missed while a frame is being processed are skipped rather than
/// replayed. A failed read or a frame that fails extraction is logged and
/// dropped; the next tick tries again.
pub async fn run_watch<S, E, K>(
    source: &mut S,
    extractor: &E,
    roster: &Roster,
    config: &WatchConfig,
    cancel: CancellationToken,
    mut sink: K,
) -> Result<u64, WatchError>
where
    S: FrameSource,
    E: SignatureExtractor,
    K: FnMut(FaceReport),
{
    if roster.is_empty() {
        return Err(WatchError::EmptyRoster);
    }
    let gallery = roster.gallery();
    let matcher = EuclideanMatcher;

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = source.next_frame() => read,
        };
        let image = match read {
            Ok(Some(image)) => image,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "frame source read failed");
                continue;
            }
        };
        frames += 1;

        let faces = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = extract_with_timeout(extractor, &image, config.extract_timeout) => result,
        };
        let faces = match faces {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(frame = frames, error = %e, "frame skipped");
                continue;
            }
        };
        tracing::debug!(frame = frames, faces = faces.len(), "frame extracted");

        for face in &faces {
            let decision = match matcher.compare(face, &gallery, config.threshold) {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(frame = frames, error = %e, "face not comparable with roster");
                    continue;
                }
            };
            let label = decision
                .identity
                .and_then(|id| roster.label(id))
                .map(str::to_string);
            tracing::info!(
                frame = frames,
                label = label.as_deref().unwrap_or("unknown"),
                distance = decision.distance,
                "face seen"
            );
            sink(FaceReport { frame: frames, label, decision });
        }
    }

    tracing::info!(frames, "watch stopped");
    Ok(frames)
}
