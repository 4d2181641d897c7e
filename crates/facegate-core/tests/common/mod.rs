#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use facegate_core::{
    Account, AccountStore, ConflictField, ExtractError, GalleryEntry, IdentityId, NewAccount, Signature,
    SignatureExtractor, SignatureId, SignatureStore, StoreError,
};

/// PNG signature bytes; enough for format sniffing.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub fn sig(values: &[f64]) -> Signature {
    Signature::new(values.to_vec()).unwrap()
}

/// Signature of dimension 4 with `x` in the first component.
pub fn at(x: f64) -> Signature {
    sig(&[x, 0.0, 0.0, 0.0])
}

/// Extractor returning a fixed list of faces for every image.
pub struct FixedExtractor {
    faces: Mutex<Vec<Signature>>,
}

impl FixedExtractor {
    pub fn new(faces: Vec<Signature>) -> Self {
        Self { faces: Mutex::new(faces) }
    }

    pub fn set(&self, faces: Vec<Signature>) {
        *self.faces.lock().unwrap() = faces;
    }
}

impl SignatureExtractor for FixedExtractor {
    async fn extract(&self, _image: &[u8]) -> Result<Vec<Signature>, ExtractError> {
        Ok(self.faces.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct State {
    accounts: Vec<(Account, String)>,
    signatures: Vec<(SignatureId, IdentityId, Signature)>,
    next_id: i64,
}

/// In-memory store counting writes.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn signature_count(&self) -> usize {
        self.state.lock().unwrap().signatures.len()
    }

    pub fn insert_account(&self, username: &str, password_hash: &str, enabled: bool) -> IdentityId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = IdentityId(state.next_id);
        state.accounts.push((
            Account {
                id,
                username: username.to_string(),
                email: format!("{username}@example.com"),
                enabled,
                created_at: Utc::now(),
                last_authenticated_at: None,
            },
            password_hash.to_string(),
        ));
        id
    }
}

impl SignatureStore for MemoryStore {
    async fn add(&self, identity: IdentityId, signature: &Signature) -> Result<SignatureId, StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.accounts.iter().any(|(a, _)| a.id == identity) {
            return Err(StoreError::UnknownIdentity(identity));
        }
        state.next_id += 1;
        let id = SignatureId(state.next_id);
        state.signatures.push((id, identity, signature.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn all_for_identity(&self, identity: IdentityId) -> Result<Vec<Signature>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .signatures
            .iter()
            .filter(|(_, owner, _)| *owner == identity)
            .map(|(_, _, s)| s.clone())
            .collect())
    }

    async fn all_entries(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .signatures
            .iter()
            .map(|(id, owner, s)| GalleryEntry {
                identity: *owner,
                signature_id: *id,
                signature: s.clone(),
            })
            .collect())
    }
}

impl AccountStore for MemoryStore {
    async fn create_account_with_signature(
        &self,
        account: NewAccount,
        signature: &Signature,
    ) -> Result<(Account, SignatureId), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.accounts.iter().any(|(a, _)| a.username == account.username) {
            return Err(StoreError::Conflict(ConflictField::Username));
        }
        if state.accounts.iter().any(|(a, _)| a.email == account.email) {
            return Err(StoreError::Conflict(ConflictField::Email));
        }
        state.next_id += 1;
        let identity = IdentityId(state.next_id);
        let created = Account {
            id: identity,
            username: account.username,
            email: account.email,
            enabled: true,
            created_at: Utc::now(),
            last_authenticated_at: None,
        };
        state.accounts.push((created.clone(), account.password_hash));
        state.next_id += 1;
        let signature_id = SignatureId(state.next_id);
        state.signatures.push((signature_id, identity, signature.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok((created, signature_id))
    }

    async fn account(&self, identity: IdentityId) -> Result<Option<Account>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.iter().find(|(a, _)| a.id == identity).map(|(a, _)| a.clone()))
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<(Account, String)>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.iter().find(|(a, _)| a.username == username).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.iter().rev().map(|(a, _)| a.clone()).collect())
    }

    async fn set_enabled(&self, identity: IdentityId, enabled: bool) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.accounts.iter_mut().find(|(a, _)| a.id == identity) {
            Some((a, _)) => {
                a.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_last_authenticated(&self, identity: IdentityId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some((a, _)) = state.accounts.iter_mut().find(|(a, _)| a.id == identity) {
            a.last_authenticated_at = Some(at);
        }
        Ok(())
    }

    async fn delete_identity(&self, identity: IdentityId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let before = state.accounts.len();
        state.accounts.retain(|(a, _)| a.id != identity);
        state.signatures.retain(|(_, owner, _)| *owner != identity);
        Ok(state.accounts.len() != before)
    }
}
