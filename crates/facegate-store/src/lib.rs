//! facegate-store: SQLite persistence for accounts and facial signatures.
//!
//! Implements the `facegate-core` store traits. Identities and their
//! signatures live in two tables joined by a cascading foreign key.

pub mod cipher;
mod schema;
pub mod sqlite;

pub use cipher::{CipherError, PayloadCipher};
pub use sqlite::{SqliteStore, StoreConfig, DEFAULT_DIMENSION, DEFAULT_READ_CONNECTIONS};
