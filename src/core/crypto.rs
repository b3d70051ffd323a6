//! Credential-blob encryption at rest (spec §6).
//!
//! Layout: `nonce (12 bytes) || tag (16 bytes) || ciphertext`, base64-encoded.
//! `aes-gcm` appends the tag to the end of the ciphertext; we rearrange it
//! into the layout the spec requires so the on-disk/on-wire format is
//! pinned regardless of crate internals.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;

use super::errors::CryptoError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A ready-to-use AES-256-GCM credential cipher, derived once from
/// `SESSION_ENCRYPTION_KEY` at startup.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build a cipher from a 32-byte key. Accepts the raw key bytes; callers
    /// decode `SESSION_ENCRYPTION_KEY` (base64 or hex) before calling this.
    pub fn new(key_bytes: &[u8]) -> Result<Self, CryptoError> {
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength);
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`, returning the base64 of `nonce || tag || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm returns ciphertext with the 16-byte tag appended at the end.
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("AES-GCM encryption is infallible for in-memory buffers");
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(tag);
        out.extend_from_slice(ciphertext);

        base64::engine::general_purpose::STANDARD.encode(out)
    }

    /// Decrypt a base64 blob previously produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce_bytes, rest) = raw.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        // Reassemble into the ciphertext||tag order aes-gcm expects.
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> CredentialCipher {
        CredentialCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let cipher = test_cipher();
        for plaintext in [&b""[..], b"x", b"a credential blob with \0 bytes \xff"] {
            let encoded = cipher.encrypt(plaintext);
            let decoded = cipher.decrypt(&encoded).unwrap();
            assert_eq!(decoded, plaintext);
        }
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            CredentialCipher::new(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let cipher = test_cipher();
        let mut encoded = cipher.encrypt(b"root identity bytes");
        encoded.pop();
        encoded.push(if encoded.ends_with('A') { 'B' } else { 'A' });
        assert!(cipher.decrypt(&encoded).is_err());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let cipher_a = CredentialCipher::new(&[1u8; 32]).unwrap();
        let cipher_b = CredentialCipher::new(&[2u8; 32]).unwrap();
        let encoded = cipher_a.encrypt(b"secret");
        assert!(cipher_b.decrypt(&encoded).is_err());
    }
}
