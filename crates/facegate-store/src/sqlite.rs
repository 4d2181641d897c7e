//! SQLite-backed account and signature store.
//!
//! One writer connection serializes all writes in `BEGIN IMMEDIATE`
//! transactions; a small pool of read-only connections serves matching
//! scans from WAL snapshots. Each connection lives on its own thread
//! (`tokio_rusqlite`), so a caller that drops a request future mid-flight
//! cannot interrupt a transaction half way.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use facegate_core::codec;
use facegate_core::{
    Account, AccountStore, ConflictField, GalleryEntry, IdentityId, NewAccount, Signature, SignatureId,
    SignatureStore, StoreError,
};
use rusqlite::{params, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::cipher::PayloadCipher;
use crate::schema::{ACCOUNT_COLUMNS, SCHEMA};

pub const DEFAULT_DIMENSION: usize = 128;
pub const DEFAULT_READ_CONNECTIONS: usize = 4;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How to open a [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Number of pooled read connections (at least one is always opened).
    pub read_connections: usize,
    /// Signature dimensionality enforced on every write.
    pub dimension: usize,
    /// Encrypt payloads at rest with a key derived from this passphrase.
    pub key_passphrase: Option<String>,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_connections: DEFAULT_READ_CONNECTIONS,
            dimension: DEFAULT_DIMENSION,
            key_passphrase: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

fn backend(err: tokio_rusqlite::Error) -> StoreError {
    match err {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Backend(Box::new(e)),
        other => StoreError::Backend(other.to_string().into()),
    }
}

/// Which unique account column a constraint failure names, if any.
fn constraint_conflict(err: &rusqlite::Error) -> Option<ConflictField> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) if e.code == ErrorCode::ConstraintViolation => {
            conflict_field(msg)
        }
        _ => None,
    }
}

fn conflict_field(message: &str) -> Option<ConflictField> {
    if message.contains("identities.username") {
        Some(ConflictField::Username)
    } else if message.contains("identities.email") {
        Some(ConflictField::Email)
    } else {
        None
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: IdentityId(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        enabled: row.get(3)?,
        created_at: row.get(4)?,
        last_authenticated_at: row.get(5)?,
    })
}

fn configure(conn: &rusqlite::Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub struct SqliteStore {
    writer: Connection,
    readers: Vec<Connection>,
    next_reader: AtomicUsize,
    cipher: Option<PayloadCipher>,
    dimension: usize,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database and its schema.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(Box::new(e)))?;
            }
        }

        let cipher = config
            .key_passphrase
            .as_deref()
            .map(PayloadCipher::from_passphrase)
            .transpose()
            .map_err(|e| StoreError::Backend(Box::new(e)))?;

        let busy_timeout = config.busy_timeout;
        let writer = Connection::open(&config.path).await.map_err(backend)?;
        let journal_mode = writer
            .call(move |conn| {
                configure(conn, busy_timeout)?;
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                conn.execute_batch(SCHEMA)?;
                Ok(mode)
            })
            .await
            .map_err(backend)?;

        let mut readers = Vec::with_capacity(config.read_connections.max(1));
        for _ in 0..config.read_connections.max(1) {
            let reader = Connection::open(&config.path).await.map_err(backend)?;
            reader
                .call(move |conn| {
                    configure(conn, busy_timeout)?;
                    conn.pragma_update(None, "query_only", "ON")?;
                    Ok(())
                })
                .await
                .map_err(backend)?;
            readers.push(reader);
        }

        tracing::info!(
            path = %config.path.display(),
            journal_mode = %journal_mode,
            readers = readers.len(),
            dimension = config.dimension,
            encrypted = cipher.is_some(),
            "signature store opened"
        );

        Ok(Self {
            writer,
            readers,
            next_reader: AtomicUsize::new(0),
            cipher,
            dimension: config.dimension,
            path: config.path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn reader(&self) -> &Connection {
        let i = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        &self.readers[i]
    }

    /// Validate and serialize a signature for storage.
    fn seal(&self, signature: &Signature) -> Result<Vec<u8>, StoreError> {
        if signature.dimension() != self.dimension {
            return Err(StoreError::InvalidSignature(format!(
                "expected {} components, got {}",
                self.dimension,
                signature.dimension()
            )));
        }
        let bytes = codec::encode(signature);
        match &self.cipher {
            Some(cipher) => cipher
                .seal(&bytes)
                .map_err(|e| StoreError::InvalidSignature(e.to_string())),
            None => Ok(bytes),
        }
    }

    fn unseal(&self, id: SignatureId, payload: &[u8]) -> Result<Signature, StoreError> {
        let corrupt = |reason: String| {
            tracing::error!(signature = %id, reason = %reason, "corrupt signature payload");
            StoreError::CorruptSignature { id, reason }
        };
        let plain;
        let bytes = match &self.cipher {
            Some(cipher) => {
                plain = cipher.open(payload).map_err(|e| corrupt(e.to_string()))?;
                plain.as_slice()
            }
            None => payload,
        };
        codec::decode(bytes).map_err(|e| corrupt(e.to_string()))
    }

    /// Counts of (identities, signatures).
    pub async fn counts(&self) -> Result<(u64, u64), StoreError> {
        self.reader()
            .call(|conn| {
                let counts = conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM identities), (SELECT COUNT(*) FROM signatures)",
                    [],
                    |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
                )?;
                Ok(counts)
            })
            .await
            .map_err(backend)
    }
}

impl SignatureStore for SqliteStore {
    async fn add(
        &self,
        identity: IdentityId,
        signature: &Signature,
    ) -> Result<SignatureId, StoreError> {
        let payload = self.seal(signature)?;
        let now = Utc::now();

        let inserted = self
            .writer
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM identities WHERE id = ?1)",
                    [identity.0],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(None);
                }
                tx.execute(
                    "INSERT INTO signatures (identity_id, payload, created_at) VALUES (?1, ?2, ?3)",
                    params![identity.0, payload, now],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(Some(id))
            })
            .await
            .map_err(backend)?;

        let id = inserted.map(SignatureId).ok_or(StoreError::UnknownIdentity(identity))?;
        tracing::debug!(identity = %identity, signature = %id, "signature row inserted");
        Ok(id)
    }

    async fn all_for_identity(&self, identity: IdentityId) -> Result<Vec<Signature>, StoreError> {
        let rows = self
            .reader()
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, payload FROM signatures WHERE identity_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([identity.0], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|(id, payload)| self.unseal(SignatureId(id), &payload))
            .collect()
    }

    async fn all_entries(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let rows = self
            .reader()
            .call(|conn| {
                // One read transaction pins a single WAL snapshot for the scan.
                let tx = conn.transaction()?;
                let rows = {
                    let mut stmt = tx.prepare_cached(
                        "SELECT s.id, s.identity_id, s.payload
                         FROM signatures s JOIN identities i ON i.id = s.identity_id
                         ORDER BY s.id",
                    )?;
                    let rows = stmt
                        .query_map([], |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, Vec<u8>>(2)?,
                            ))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                tx.commit()?;
                Ok(rows)
            })
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|(id, identity, payload)| {
                let signature_id = SignatureId(id);
                Ok(GalleryEntry {
                    identity: IdentityId(identity),
                    signature_id,
                    signature: self.unseal(signature_id, &payload)?,
                })
            })
            .collect()
    }
}

impl AccountStore for SqliteStore {
    async fn create_account_with_signature(
        &self,
        account: NewAccount,
        signature: &Signature,
    ) -> Result<(Account, SignatureId), StoreError> {
        let payload = self.seal(signature)?;
        let now = Utc::now();
        let NewAccount { username, email, password_hash } = account;

        let created = self
            .writer
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                // SQLite names whichever unique index it trips first, so
                // look the clash up explicitly to report username first.
                let taken: Option<bool> = tx
                    .query_row(
                        "SELECT username = ?1 FROM identities
                         WHERE username = ?1 OR email = ?2
                         ORDER BY username = ?1 DESC LIMIT 1",
                        params![username, email],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(username_taken) = taken {
                    return Ok(Err(if username_taken {
                        ConflictField::Username
                    } else {
                        ConflictField::Email
                    }));
                }

                let inserted = tx.execute(
                    "INSERT INTO identities (username, email, password_hash, enabled, created_at)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![username, email, password_hash, now],
                );
                if let Err(e) = inserted {
                    return match constraint_conflict(&e) {
                        Some(field) => Ok(Err(field)),
                        None => Err(e.into()),
                    };
                }
                let identity = tx.last_insert_rowid();

                tx.execute(
                    "INSERT INTO signatures (identity_id, payload, created_at) VALUES (?1, ?2, ?3)",
                    params![identity, payload, now],
                )?;
                let signature_id = tx.last_insert_rowid();
                tx.commit()?;

                Ok(Ok((
                    Account {
                        id: IdentityId(identity),
                        username,
                        email,
                        enabled: true,
                        created_at: now,
                        last_authenticated_at: None,
                    },
                    SignatureId(signature_id),
                )))
            })
            .await
            .map_err(backend)?;

        let (account, signature_id) = created.map_err(StoreError::Conflict)?;
        tracing::debug!(identity = %account.id, signature = %signature_id, "identity row inserted");
        Ok((account, signature_id))
    }

    async fn account(&self, identity: IdentityId) -> Result<Option<Account>, StoreError> {
        self.reader()
            .call(move |conn| {
                let account = conn
                    .query_row(
                        &format!("SELECT {ACCOUNT_COLUMNS} FROM identities WHERE id = ?1"),
                        [identity.0],
                        account_from_row,
                    )
                    .optional()?;
                Ok(account)
            })
            .await
            .map_err(backend)
    }

    async fn account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<(Account, String)>, StoreError> {
        let username = username.to_string();
        self.reader()
            .call(move |conn| {
                let found = conn
                    .query_row(
                        &format!(
                            "SELECT {ACCOUNT_COLUMNS}, password_hash FROM identities WHERE username = ?1"
                        ),
                        [username],
                        |row| Ok((account_from_row(row)?, row.get::<_, String>(6)?)),
                    )
                    .optional()?;
                Ok(found)
            })
            .await
            .map_err(backend)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.reader()
            .call(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM identities ORDER BY created_at DESC, id DESC"
                ))?;
                let accounts = stmt
                    .query_map([], account_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(accounts)
            })
            .await
            .map_err(backend)
    }

    async fn set_enabled(&self, identity: IdentityId, enabled: bool) -> Result<bool, StoreError> {
        let changed = self
            .writer
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE identities SET enabled = ?1 WHERE id = ?2",
                    params![enabled, identity.0],
                )?)
            })
            .await
            .map_err(backend)?;
        tracing::info!(identity = %identity, enabled, found = changed > 0, "account enabled flag set");
        Ok(changed > 0)
    }

    async fn touch_last_authenticated(
        &self,
        identity: IdentityId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.writer
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET last_authenticated_at = ?1 WHERE id = ?2",
                    params![at, identity.0],
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    async fn delete_identity(&self, identity: IdentityId) -> Result<bool, StoreError> {
        // Signatures go with the identity through ON DELETE CASCADE inside the
        // same statement.
        let deleted = self
            .writer
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let n = tx.execute("DELETE FROM identities WHERE id = ?1", [identity.0])?;
                tx.commit()?;
                Ok(n)
            })
            .await
            .map_err(backend)?;
        tracing::info!(identity = %identity, deleted = deleted > 0, "identity removed");
        Ok(deleted > 0)
    }
}
