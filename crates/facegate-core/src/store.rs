//! Storage seams used by the matcher and workflows.
//!
//! Implementations must make every write atomic: an identity is never visible
//! without the signature written alongside it, and a reader never sees half
//! of an `add`.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::codec::CodecError;
use crate::types::{Account, GalleryEntry, IdentityId, NewAccount, Signature, SignatureId};

/// The unique account column a new account collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictField {
    Username,
    Email,
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictField::Username => "username",
            ConflictField::Email => "email",
        })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown identity {0}")]
    UnknownIdentity(IdentityId),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("{0} is already registered")]
    Conflict(ConflictField),
    #[error("stored signature {id} is corrupt: {reason}")]
    CorruptSignature { id: SignatureId, reason: String },
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        StoreError::InvalidSignature(err.to_string())
    }
}

/// Append-only store of facial signatures.
pub trait SignatureStore: Send + Sync {
    /// Append a signature for an existing identity.
    fn add(
        &self,
        identity: IdentityId,
        signature: &Signature,
    ) -> impl Future<Output = Result<SignatureId, StoreError>> + Send;

    /// Every signature enrolled for `identity`; empty when none.
    fn all_for_identity(
        &self,
        identity: IdentityId,
    ) -> impl Future<Output = Result<Vec<Signature>, StoreError>> + Send;

    /// Full gallery scan from one consistent snapshot, ordered by signature id.
    fn all_entries(&self) -> impl Future<Output = Result<Vec<GalleryEntry>, StoreError>> + Send;
}

/// Account rows that own signatures.
pub trait AccountStore: Send + Sync {
    /// Insert an account together with its first signature in one transaction.
    ///
    /// A taken username is reported ahead of a taken email.
    fn create_account_with_signature(
        &self,
        account: NewAccount,
        signature: &Signature,
    ) -> impl Future<Output = Result<(Account, SignatureId), StoreError>> + Send;

    fn account(
        &self,
        identity: IdentityId,
    ) -> impl Future<Output = Result<Option<Account>, StoreError>> + Send;

    /// Account plus its stored password hash.
    fn account_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<(Account, String)>, StoreError>> + Send;

    fn list_accounts(&self) -> impl Future<Output = Result<Vec<Account>, StoreError>> + Send;

    /// Returns false when the identity does not exist.
    fn set_enabled(
        &self,
        identity: IdentityId,
        enabled: bool,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn touch_last_authenticated(
        &self,
        identity: IdentityId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove an identity and, atomically, all of its signatures.
    fn delete_identity(
        &self,
        identity: IdentityId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
