//! Enrollment: turn exactly one detected face into a stored signature.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::extractor::{extract_with_timeout, ExtractError, SignatureExtractor};
use crate::password::{hash_password_blocking, PasswordError};
use crate::store::{AccountStore, ConflictField, SignatureStore, StoreError};
use crate::types::{Account, IdentityId, NewAccount, Signature, SignatureId};
use crate::ErrorKind;

pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{count} faces detected; enrollment needs exactly one")]
    MultipleFacesDetected { count: usize },
    #[error("unknown identity {0}")]
    UnknownIdentity(IdentityId),
    #[error("{0} is already registered")]
    DuplicateAccount(ConflictField),
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
    #[error("password: {0}")]
    Password(#[from] PasswordError),
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractError),
    #[error("signature rejected by store: {0}")]
    InvalidSignature(String),
    #[error("store: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EnrollmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownIdentity(id) => EnrollmentError::UnknownIdentity(id),
            StoreError::Conflict(field) => EnrollmentError::DuplicateAccount(field),
            StoreError::InvalidSignature(reason) => EnrollmentError::InvalidSignature(reason),
            other => EnrollmentError::Store(other),
        }
    }
}

impl EnrollmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnrollmentError::NoFaceDetected
            | EnrollmentError::MultipleFacesDetected { .. }
            | EnrollmentError::InvalidRegistration(_)
            | EnrollmentError::InvalidSignature(_) => ErrorKind::Input,
            EnrollmentError::Extraction(e) => e.kind(),
            EnrollmentError::Password(PasswordError::TooShort) => ErrorKind::Input,
            EnrollmentError::Password(PasswordError::Hash(_)) => ErrorKind::Internal,
            EnrollmentError::UnknownIdentity(_) | EnrollmentError::DuplicateAccount(_) => {
                ErrorKind::Precondition
            }
            EnrollmentError::Store(_) => ErrorKind::Storage,
        }
    }
}

/// Exactly one face, or the matching refusal.
pub fn single_face(mut faces: Vec<Signature>) -> Result<Signature, EnrollmentError> {
    match faces.len() {
        0 => Err(EnrollmentError::NoFaceDetected),
        1 => Ok(faces.remove(0)),
        count => Err(EnrollmentError::MultipleFacesDetected { count }),
    }
}

/// Credentials submitted at registration, before validation.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub struct Enroller<S, E> {
    store: Arc<S>,
    extractor: Arc<E>,
    extract_timeout: Duration,
}

impl<S, E> Enroller<S, E>
where
    S: SignatureStore + AccountStore,
    E: SignatureExtractor,
{
    pub fn new(store: Arc<S>, extractor: Arc<E>) -> Self {
        Self { store, extractor, extract_timeout: DEFAULT_EXTRACT_TIMEOUT }
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    async fn extract_one(&self, image: &[u8]) -> Result<Signature, EnrollmentError> {
        let faces = extract_with_timeout(self.extractor.as_ref(), image, self.extract_timeout).await?;
        single_face(faces)
    }

    /// Add a signature for an existing identity.
    ///
    /// Nothing is written unless the image holds exactly one face.
    pub async fn enroll(
        &self,
        identity: IdentityId,
        image: &[u8],
    ) -> Result<SignatureId, EnrollmentError> {
        let signature = match self.extract_one(image).await {
            Ok(signature) => signature,
            Err(e) => {
                tracing::info!(identity = %identity, error = %e, "enroll refused");
                return Err(e);
            }
        };

        let id = self.store.add(identity, &signature).await?;
        tracing::info!(identity = %identity, signature = %id, "signature enrolled");
        Ok(id)
    }

    /// Create an account from credentials plus one face image.
    ///
    /// The account and its first signature are written in one transaction.
    pub async fn register(
        &self,
        registration: Registration,
        image: &[u8],
    ) -> Result<Account, EnrollmentError> {
        let username = registration.username.trim().to_string();
        let email = registration.email.trim().to_string();
        if username.is_empty() {
            return Err(EnrollmentError::InvalidRegistration("username is required".into()));
        }
        if email.is_empty() {
            return Err(EnrollmentError::InvalidRegistration("email is required".into()));
        }
        if !email.contains('@') {
            return Err(EnrollmentError::InvalidRegistration(format!(
                "'{email}' is not an email address"
            )));
        }
        let password_hash = hash_password_blocking(registration.password).await?;

        let signature = self.extract_one(image).await?;
        let (account, signature_id) = self
            .store
            .create_account_with_signature(
                NewAccount { username, email, password_hash },
                &signature,
            )
            .await?;

        tracing::info!(
            identity = %account.id,
            username = %account.username,
            signature = %signature_id,
            "account registered"
        );
        Ok(account)
    }
}
