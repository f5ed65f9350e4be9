//! Authenticated encryption for records in transit.
//!
//! Messages are sealed with AES-256-GCM. The key is derived from the
//! configured passphrase with SHA-256, so both ends of the pipeline only
//! need to share the passphrase. Each message gets a fresh 12-byte nonce,
//! prepended to the ciphertext.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// AES-256-GCM sealer/opener keyed from a passphrase.
pub struct CryptoMachine {
    cipher: Aes256Gcm,
}

impl CryptoMachine {
    /// Create a machine from a shared passphrase.
    ///
    /// The passphrase is hashed with SHA-256 to derive the 32-byte key.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Seal `plaintext`, returning the nonce followed by ciphertext+tag.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a nonce-prefixed message produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails when the data is truncated, tampered with, or sealed under a
    /// different passphrase.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::TooShort);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let machine = CryptoMachine::from_passphrase("correct horse battery staple");
        let plaintext = b"the quick brown fox";

        let sealed = machine.encrypt(plaintext).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], plaintext.as_slice());

        let opened = machine.decrypt(&sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let machine = CryptoMachine::from_passphrase("key");
        let a = machine.encrypt(b"same input").unwrap();
        let b = machine.encrypt(b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealer = CryptoMachine::from_passphrase("alpha");
        let opener = CryptoMachine::from_passphrase("beta");

        let sealed = sealer.encrypt(b"secret").unwrap();
        assert!(matches!(opener.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let machine = CryptoMachine::from_passphrase("key");
        let mut sealed = machine.encrypt(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(machine.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_truncated_input() {
        let machine = CryptoMachine::from_passphrase("key");
        assert!(matches!(
            machine.decrypt(&[0u8; 5]),
            Err(CryptoError::TooShort)
        ));
    }
}
