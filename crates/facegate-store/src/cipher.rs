//! At-rest encryption of signature payloads (AES-256-GCM).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("invalid AES-GCM key length")]
    InvalidKey,
    #[error("payload shorter than nonce and tag ({0} bytes)")]
    Truncated(usize),
    #[error("encryption failed")]
    Encrypt,
    #[error("payload failed authentication")]
    Decrypt,
}

/// Seals codec bytes as `nonce || ciphertext+tag`.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl PayloadCipher {
    /// Derive the 256-bit key as SHA-256 of the passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CipherError> {
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let cipher = PayloadCipher::from_passphrase("correct horse").unwrap();
        let sealed = cipher.seal(b"signature bytes").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"signature bytes");
        assert_eq!(cipher.open(&sealed).unwrap(), b"signature bytes");
    }

    #[test]
    fn test_nonces_are_fresh() {
        let cipher = PayloadCipher::from_passphrase("k").unwrap();
        assert_ne!(cipher.seal(b"x").unwrap(), cipher.seal(b"x").unwrap());
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let sealed = PayloadCipher::from_passphrase("a").unwrap().seal(b"payload").unwrap();
        let other = PayloadCipher::from_passphrase("b").unwrap();
        assert!(matches!(other.open(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn test_tampered_payload_fails_authentication() {
        let cipher = PayloadCipher::from_passphrase("a").unwrap();
        let mut sealed = cipher.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(cipher.open(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn test_truncated_payload() {
        let cipher = PayloadCipher::from_passphrase("a").unwrap();
        assert!(matches!(cipher.open(&[0u8; 10]), Err(CipherError::Truncated(10))));
    }
}
