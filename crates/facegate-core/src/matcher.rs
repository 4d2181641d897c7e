//! Gallery matching: closed-set verification and open-set identification.

use std::sync::Arc;

use thiserror::Error;

use crate::store::{SignatureStore, StoreError};
use crate::types::{GalleryEntry, IdentityId, MatchDecision, Signature, SignatureId};

/// Maximum Euclidean distance still treated as the same face.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("identity {0} has no enrolled signatures")]
    NoEnrollment(IdentityId),
    #[error("gallery is empty")]
    EmptyGallery,
    #[error("signature dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid threshold {0}: must be finite and non-negative")]
    InvalidThreshold(f64),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Distance threshold, inclusive: a distance equal to the threshold matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> Result<Self, MatchError> {
        if value.is_finite() && value >= 0.0 {
            Ok(Self(value))
        } else {
            Err(MatchError::InvalidThreshold(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn admits(self, distance: f64) -> bool {
        distance <= self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

/// Strategy for comparing a query signature against a gallery.
pub trait Matcher {
    fn compare(
        &self,
        query: &Signature,
        gallery: &[GalleryEntry],
        threshold: Threshold,
    ) -> Result<MatchDecision, MatchError>;
}

/// Euclidean best-of matcher.
///
/// Always visits every gallery entry. Only a strictly smaller distance
/// replaces the running best, so ties resolve to the entry seen first in
/// gallery order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Signature,
        gallery: &[GalleryEntry],
        threshold: Threshold,
    ) -> Result<MatchDecision, MatchError> {
        let mut best: Option<(f64, IdentityId, SignatureId)> = None;

        for entry in gallery {
            let distance = query.euclidean_distance(&entry.signature)?;
            let better = match best {
                None => true,
                Some((best_distance, _, _)) => distance < best_distance,
            };
            if better {
                best = Some((distance, entry.identity, entry.signature_id));
            }
        }

        let (distance, identity, signature_id) = best.ok_or(MatchError::EmptyGallery)?;
        let matched = threshold.admits(distance);

        tracing::debug!(
            candidates = gallery.len(),
            distance,
            threshold = threshold.value(),
            best_identity = %identity,
            best_signature = %signature_id,
            matched,
            "gallery compared"
        );

        Ok(MatchDecision {
            matched,
            identity: matched.then_some(identity),
            distance,
        })
    }
}

/// Runs a [`Matcher`] against signatures read from a store.
pub struct GalleryMatcher<S, M = EuclideanMatcher> {
    store: Arc<S>,
    matcher: M,
}

impl<S: SignatureStore> GalleryMatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, matcher: EuclideanMatcher }
    }
}

impl<S: SignatureStore, M: Matcher> GalleryMatcher<S, M> {
    pub fn with_matcher(store: Arc<S>, matcher: M) -> Self {
        Self { store, matcher }
    }

    /// Closed-set verification against one claimed identity.
    pub async fn verify(
        &self,
        identity: IdentityId,
        query: &Signature,
        threshold: Threshold,
    ) -> Result<MatchDecision, MatchError> {
        let enrolled = self.store.all_for_identity(identity).await?;
        if enrolled.is_empty() {
            return Err(MatchError::NoEnrollment(identity));
        }

        // Verification compares against one identity only; signature ids
        // carry no meaning in the decision.
        let gallery: Vec<GalleryEntry> = enrolled
            .into_iter()
            .enumerate()
            .map(|(i, signature)| GalleryEntry {
                identity,
                signature_id: SignatureId(i as i64),
                signature,
            })
            .collect();

        let decision = self.matcher.compare(query, &gallery, threshold)?;
        tracing::info!(
            identity = %identity,
            enrolled = gallery.len(),
            distance = decision.distance,
            matched = decision.matched,
            "verify complete"
        );
        Ok(decision)
    }

    /// Open-set identification over the whole gallery.
    pub async fn identify(
        &self,
        query: &Signature,
        threshold: Threshold,
    ) -> Result<MatchDecision, MatchError> {
        let gallery = self.store.all_entries().await?;
        if gallery.is_empty() {
            return Err(MatchError::EmptyGallery);
        }

        let decision = self.matcher.compare(query, &gallery, threshold)?;
        tracing::info!(
            gallery = gallery.len(),
            distance = decision.distance,
            matched = decision.matched,
            identity = ?decision.identity,
            "identify complete"
        );
        Ok(decision)
    }
}
