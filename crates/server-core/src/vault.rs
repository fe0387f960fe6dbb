//! Credential vault: password-based encryption of target credentials.
//!
//! Neither party alone can decrypt a stored credential. The encryption key
//! is derived from the user's key material concatenated with the server
//! secret, so the server cannot open the vault without the user present and
//! a stolen database is useless without the server secret.
//!
//! Wire format per blob: fresh 16-byte salt, fresh 96-bit nonce, AES-256-GCM
//! ciphertext. The key is PBKDF2-HMAC-SHA256 over the combined secret with
//! 100 000 iterations.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sg_types::{Credential, EncryptedCredential};
use sha2::Sha256;
use thiserror::Error;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Wrong key material or a tampered blob. The two cases are
    /// deliberately indistinguishable.
    #[error("credential decryption failed")]
    AuthenticationFailed,

    /// The stored envelope is structurally invalid (wrong salt or nonce
    /// length). Distinct from a failed authentication: this blob could
    /// never have been produced by the vault.
    #[error("malformed credential envelope: {0}")]
    Malformed(&'static str),

    #[error("credential serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Encrypts and decrypts credentials with keys derived from the user's
/// key material and the server secret together.
pub struct Vault {
    server_secret: SecretString,
}

impl Vault {
    pub fn new(server_secret: SecretString) -> Self {
        Self { server_secret }
    }

    /// Encrypt an opaque payload under the given user key material.
    ///
    /// Salt and nonce are freshly random per call, so identical payloads
    /// never produce identical envelopes.
    pub fn encrypt(&self, user_key: &str, plaintext: &[u8]) -> Result<EncryptedCredential, VaultError> {
        let mut salt = vec![0u8; SALT_LEN];
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = self.derive_key(user_key, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| VaultError::AuthenticationFailed)?;

        Ok(EncryptedCredential { salt, nonce, ciphertext })
    }

    /// Decrypt an envelope. Fails with [`VaultError::AuthenticationFailed`]
    /// when the key material is wrong or any byte of the envelope has been
    /// altered.
    pub fn decrypt(&self, user_key: &str, envelope: &EncryptedCredential) -> Result<Vec<u8>, VaultError> {
        if envelope.salt.len() != SALT_LEN {
            return Err(VaultError::Malformed("bad salt length"));
        }
        if envelope.nonce.len() != NONCE_LEN {
            return Err(VaultError::Malformed("bad nonce length"));
        }

        let key = self.derive_key(user_key, &envelope.salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_ref())
            .map_err(|_| VaultError::AuthenticationFailed)
    }

    pub fn encrypt_credential(
        &self,
        user_key: &str,
        credential: &Credential,
    ) -> Result<EncryptedCredential, VaultError> {
        let plaintext = serde_json::to_vec(credential)?;
        self.encrypt(user_key, &plaintext)
    }

    pub fn decrypt_credential(
        &self,
        user_key: &str,
        envelope: &EncryptedCredential,
    ) -> Result<Credential, VaultError> {
        let plaintext = self.decrypt(user_key, envelope)?;
        // A decrypted-but-unparseable payload means the blob was written by
        // something other than this vault; treat it as malformed.
        serde_json::from_slice(&plaintext).map_err(|_| VaultError::Malformed("unparseable payload"))
    }

    fn derive_key(&self, user_key: &str, salt: &[u8]) -> [u8; KEY_LEN] {
        let combined = format!("{user_key}{}", self.server_secret.expose_secret());
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(combined.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(secret: &str) -> Vault {
        Vault::new(SecretString::from(secret.to_string()))
    }

    #[test]
    fn round_trips_a_credential() {
        let v = vault("server-secret");
        let cred = Credential::password("hunter2");
        let envelope = v.encrypt_credential("user-key", &cred).unwrap();
        let back = v.decrypt_credential("user-key", &envelope).unwrap();
        assert_eq!(back, cred);
    }

    #[test]
    fn wrong_user_key_fails() {
        let v = vault("server-secret");
        let envelope = v.encrypt("right-key", b"payload").unwrap();
        assert!(matches!(
            v.decrypt("wrong-key", &envelope),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_server_secret_fails() {
        let envelope = vault("secret-a").encrypt("user-key", b"payload").unwrap();
        assert!(matches!(
            vault("secret-b").decrypt("user-key", &envelope),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let v = vault("server-secret");
        let mut envelope = v.encrypt("user-key", b"payload").unwrap();
        envelope.ciphertext[0] ^= 0x01;
        assert!(matches!(
            v.decrypt("user-key", &envelope),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_nonce_fails() {
        let v = vault("server-secret");
        let mut envelope = v.encrypt("user-key", b"payload").unwrap();
        envelope.nonce[3] ^= 0x80;
        assert!(matches!(
            v.decrypt("user-key", &envelope),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let v = vault("server-secret");
        let mut envelope = v.encrypt("user-key", b"payload").unwrap();
        envelope.nonce.truncate(4);
        assert!(matches!(
            v.decrypt("user-key", &envelope),
            Err(VaultError::Malformed(_))
        ));
    }

    #[test]
    fn identical_payloads_encrypt_differently() {
        let v = vault("server-secret");
        let a = v.encrypt("user-key", b"payload").unwrap();
        let b = v.encrypt("user-key", b"payload").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
