use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::MatchError;

/// Handle of an enrolled account. Backed by the store's row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of one stored signature row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureId(pub i64);

impl fmt::Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("signature has no components")]
    Empty,
    #[error("signature component {index} is not a finite number")]
    NonFinite { index: usize },
}

/// Fixed-length face descriptor produced by the external extractor
/// (typically 128-dimensional).
///
/// Every component is finite; construction rejects NaN and infinities so
/// distances are always totally ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    values: Vec<f64>,
}

impl Signature {
    pub fn new(values: Vec<f64>) -> Result<Self, SignatureError> {
        if values.is_empty() {
            return Err(SignatureError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(SignatureError::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Euclidean distance to `other`.
    ///
    /// Lengths must agree; a mismatch is an error, never a truncated comparison.
    pub fn euclidean_distance(&self, other: &Signature) -> Result<f64, MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::DimensionMismatch {
                expected: other.values.len(),
                found: self.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt())
    }
}

/// One (identity, signature) pair materialized for a matching pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity: IdentityId,
    pub signature_id: SignatureId,
    pub signature: Signature,
}

/// Outcome of one matching operation.
///
/// `matched` is true iff the smallest gallery distance is within the threshold;
/// `identity` is present iff `matched`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDecision {
    pub matched: bool,
    pub identity: Option<IdentityId>,
    /// Smallest distance observed, whether or not it matched.
    pub distance: f64,
}

impl MatchDecision {
    /// `1 - distance` clamped to [0, 1]. Display only; decisions use raw distance.
    pub fn confidence(&self) -> f64 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// A registered account. Signatures hang off it in the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: IdentityId,
    pub username: String,
    pub email: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_authenticated_at: Option<DateTime<Utc>>,
}

/// Account row to insert at registration. `password_hash` is a PHC string.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}
