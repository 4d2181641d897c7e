//! Authentication: password fallback, closed-set verify, open-set identify.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::enrollment::{single_face, EnrollmentError, DEFAULT_EXTRACT_TIMEOUT};
use crate::extractor::{extract_with_timeout, ExtractError, SignatureExtractor};
use crate::matcher::{GalleryMatcher, MatchError, Threshold};
use crate::password::verify_password_blocking;
use crate::store::{AccountStore, SignatureStore, StoreError};
use crate::types::{Account, IdentityId, MatchDecision, Signature};
use crate::ErrorKind;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("unknown identity {0}")]
    UnknownIdentity(IdentityId),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{count} faces detected; authentication needs exactly one")]
    MultipleFacesDetected { count: usize },
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractError),
    #[error("match: {0}")]
    Match(MatchError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl From<MatchError> for AuthError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Store(store) => AuthError::Store(store),
            other => AuthError::Match(other),
        }
    }
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::NoFaceDetected | AuthError::MultipleFacesDetected { .. } => ErrorKind::Input,
            AuthError::Extraction(e) => e.kind(),
            AuthError::Match(MatchError::DimensionMismatch { .. })
            | AuthError::Match(MatchError::InvalidThreshold(_)) => ErrorKind::Input,
            AuthError::UnknownIdentity(_)
            | AuthError::Match(MatchError::NoEnrollment(_))
            | AuthError::Match(MatchError::EmptyGallery) => ErrorKind::Precondition,
            AuthError::Store(_) | AuthError::Match(MatchError::Store(_)) => ErrorKind::Storage,
        }
    }
}

/// Why an otherwise well-formed attempt was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidCredentials,
    AccountDisabled,
    FaceNotRecognized,
}

/// Result of an authentication attempt that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated {
        account: Account,
        /// Absent for password logins.
        decision: Option<MatchDecision>,
    },
    Rejected {
        reason: RejectReason,
        decision: Option<MatchDecision>,
    },
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated { .. })
    }

    pub fn decision(&self) -> Option<&MatchDecision> {
        match self {
            AuthOutcome::Authenticated { decision, .. } | AuthOutcome::Rejected { decision, .. } => {
                decision.as_ref()
            }
        }
    }
}

pub struct Authenticator<S, E> {
    store: Arc<S>,
    extractor: Arc<E>,
    matcher: GalleryMatcher<S>,
    default_threshold: Threshold,
    extract_timeout: Duration,
}

impl<S, E> Authenticator<S, E>
where
    S: SignatureStore + AccountStore,
    E: SignatureExtractor,
{
    pub fn new(store: Arc<S>, extractor: Arc<E>) -> Self {
        Self {
            matcher: GalleryMatcher::new(Arc::clone(&store)),
            store,
            extractor,
            default_threshold: Threshold::default(),
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    pub fn default_threshold(&self) -> Threshold {
        self.default_threshold
    }

    async fn extract_one(&self, image: &[u8]) -> Result<Signature, AuthError> {
        let faces = extract_with_timeout(self.extractor.as_ref(), image, self.extract_timeout).await?;
        single_face(faces).map_err(|e| match e {
            EnrollmentError::MultipleFacesDetected { count } => {
                AuthError::MultipleFacesDetected { count }
            }
            _ => AuthError::NoFaceDetected,
        })
    }

    async fn accept(
        &self,
        account: Account,
        decision: Option<MatchDecision>,
    ) -> Result<AuthOutcome, AuthError> {
        let now = Utc::now();
        self.store.touch_last_authenticated(account.id, now).await?;
        let account = Account { last_authenticated_at: Some(now), ..account };
        tracing::info!(identity = %account.id, username = %account.username, "authenticated");
        Ok(AuthOutcome::Authenticated { account, decision })
    }

    /// Password login. Unknown users and wrong passwords are indistinguishable,
    /// including in the Argon2 work spent on them.
    pub async fn login_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthOutcome, AuthError> {
        let (account, stored_hash) = self.store.account_by_username(username.trim()).await?.unzip();
        let verified = verify_password_blocking(password.to_string(), stored_hash).await;

        let Some(account) = account.filter(|_| verified) else {
            tracing::info!("password login rejected");
            return Ok(AuthOutcome::Rejected { reason: RejectReason::InvalidCredentials, decision: None });
        };
        if !account.enabled {
            tracing::info!(identity = %account.id, "password login for disabled account");
            return Ok(AuthOutcome::Rejected { reason: RejectReason::AccountDisabled, decision: None });
        }

        self.accept(account, None).await
    }

    /// Closed-set verification of a claimed identity.
    pub async fn verify(
        &self,
        identity: IdentityId,
        image: &[u8],
        threshold: Option<Threshold>,
    ) -> Result<AuthOutcome, AuthError> {
        let account = self
            .store
            .account(identity)
            .await?
            .ok_or(AuthError::UnknownIdentity(identity))?;

        if !account.enabled {
            tracing::info!(identity = %identity, "verify for disabled account");
            return Ok(AuthOutcome::Rejected { reason: RejectReason::AccountDisabled, decision: None });
        }

        let query = self.extract_one(image).await?;
        let threshold = threshold.unwrap_or(self.default_threshold);
        let decision = self.matcher.verify(identity, &query, threshold).await?;

        if decision.matched {
            self.accept(account, Some(decision)).await
        } else {
            Ok(AuthOutcome::Rejected {
                reason: RejectReason::FaceNotRecognized,
                decision: Some(decision),
            })
        }
    }

    /// Open-set identification: the closest enrolled identity within the
    /// threshold becomes the authenticated principal.
    pub async fn identify(
        &self,
        image: &[u8],
        threshold: Option<Threshold>,
    ) -> Result<AuthOutcome, AuthError> {
        let query = self.extract_one(image).await?;
        let threshold = threshold.unwrap_or(self.default_threshold);
        let decision = self.matcher.identify(&query, threshold).await?;

        let Some(identity) = decision.identity.filter(|_| decision.matched) else {
            return Ok(AuthOutcome::Rejected {
                reason: RejectReason::FaceNotRecognized,
                decision: Some(decision),
            });
        };

        // The gallery scan and this lookup are separate reads; the identity
        // may have been deleted in between.
        let Some(account) = self.store.account(identity).await? else {
            tracing::warn!(identity = %identity, "matched identity vanished before login");
            return Ok(AuthOutcome::Rejected {
                reason: RejectReason::FaceNotRecognized,
                decision: Some(decision),
            });
        };

        if !account.enabled {
            tracing::info!(identity = %identity, "identified disabled account");
            return Ok(AuthOutcome::Rejected {
                reason: RejectReason::AccountDisabled,
                decision: Some(decision),
            });
        }

        self.accept(account, Some(decision)).await
    }
}
