//! facegate-core: Face signature matching and the workflows around it.
//!
//! Signatures come from an external extractor (see [`extractor`]); this crate
//! stores them through the [`store`] traits, matches them with [`matcher`],
//! and turns match decisions into enrollment and authentication outcomes.

pub mod auth;
pub mod codec;
pub mod enrollment;
pub mod extractor;
pub mod matcher;
pub mod password;
pub mod store;
pub mod types;

pub use auth::{AuthError, AuthOutcome, Authenticator, RejectReason};
pub use codec::CodecError;
pub use enrollment::{Enroller, EnrollmentError, Registration};
pub use extractor::{CommandExtractor, ExtractError, ExtractorConfig, SignatureExtractor};
pub use matcher::{EuclideanMatcher, GalleryMatcher, MatchError, Matcher, Threshold, DEFAULT_THRESHOLD};
pub use store::{AccountStore, ConflictField, SignatureStore, StoreError};
pub use types::{
    Account, GalleryEntry, IdentityId, MatchDecision, NewAccount, Signature, SignatureError,
    SignatureId,
};

/// Which side of the caller/callee boundary a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad image, wrong-length signature, zero or several faces. Retry with different input.
    Input,
    /// Unknown identity, empty gallery, no enrollment.
    Precondition,
    /// Storage unavailable or a transaction failed. Never retried internally.
    Storage,
    /// The extractor is missing, crashed, timed out or spoke garbage.
    Unavailable,
    Internal,
}
