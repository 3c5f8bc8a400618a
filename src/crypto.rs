//! Low-level cryptographic operations.
//!
//! This is the only module in the crate that imports `ring`. Scalar
//! column values are never encrypted here; the database's
//! `pgp_sym_*` functions do that. What lives here is:
//!
//! - **Random key bytes** for per-row key material (`generate_random_key`).
//! - **The file-blob side channel**: a password-derived AES-256-GCM cipher
//!   used to seal whole binary payloads with a record's key material.
//!
//! Primitive choices:
//! - **KDF**: PBKDF2-HMAC-SHA256, 100 000 iterations, application-wide salt
//! - **Cipher**: AES-256-GCM
//! - **Nonce**: 96-bit, fresh per operation via `SystemRandom`

use std::num::NonZeroU32;

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use crate::error::RowvaultError;

/// The AEAD algorithm used for file envelopes.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Number of PBKDF2 rounds.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a per-row key or derived cipher key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Leading byte of every envelope. Bound into the tag as associated data.
const ENVELOPE_VERSION: u8 = 0x80;

/// Size of the fixed envelope header: version byte plus nonce.
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// A nonce generated for a single encryption operation.
/// Newtype to prevent accidental reuse; each `Nonce` is consumed on use.
struct OwnedNonce(Nonce);

fn generate_nonce() -> Result<OwnedNonce, RowvaultError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf).map_err(|_| RowvaultError::RandomnessFailure)?;
    Ok(OwnedNonce(Nonce::assume_unique_for_key(buf)))
}

/// Generate 32 cryptographically secure random bytes.
///
/// The only function in the crate that produces raw key material from
/// scratch. `keys::generate_key` encodes its output for storage.
pub fn generate_random_key() -> Result<[u8; KEY_LEN], RowvaultError> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key).map_err(|_| RowvaultError::RandomnessFailure)?;
    Ok(key)
}

/// A ready-to-use authenticated cipher derived from a password.
pub struct FileCipher {
    key: LessSafeKey,
}

impl FileCipher {
    /// Derive a cipher from `password` and `salt` with PBKDF2-HMAC-SHA256.
    pub fn derive(password: &[u8], salt: &[u8]) -> Result<Self, RowvaultError> {
        let iterations =
            NonZeroU32::new(PBKDF2_ITERATIONS).ok_or(RowvaultError::KeyDerivationFailure)?;

        let mut derived = [0u8; KEY_LEN];
        pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, password, &mut derived);

        let unbound = UnboundKey::new(ALGORITHM, &derived);
        derived.zeroize();

        let key = LessSafeKey::new(unbound.map_err(|_| RowvaultError::InvalidKey)?);
        Ok(Self { key })
    }

    /// Seal `plaintext` into a versioned envelope.
    ///
    /// # Layout of returned bytes
    /// ```text
    /// [ version (1) ][ nonce (12) ][ ciphertext + GCM tag ]
    /// ```
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, RowvaultError> {
        let nonce = generate_nonce()?;
        let header = [ENVELOPE_VERSION];

        let mut output = Vec::with_capacity(HEADER_LEN + plaintext.len() + ALGORITHM.tag_len());
        output.push(ENVELOPE_VERSION);
        output.extend_from_slice(nonce.0.as_ref());

        // Only the body is sealed; the header stays in the clear.
        let mut body = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce.0, aead::Aad::from(header), &mut body)
            .map_err(|_| RowvaultError::EncryptionFailure)?;
        output.extend_from_slice(&body);

        Ok(output)
    }

    /// Open an envelope produced by [`FileCipher::encrypt`].
    ///
    /// Any tag mismatch, truncation, or unknown version is a
    /// `DecryptionFailure`; no partial plaintext is ever returned.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, RowvaultError> {
        if envelope.len() < HEADER_LEN + ALGORITHM.tag_len() {
            return Err(RowvaultError::DecryptionFailure);
        }
        if envelope[0] != ENVELOPE_VERSION {
            return Err(RowvaultError::DecryptionFailure);
        }

        let nonce_bytes: [u8; NONCE_LEN] = envelope[1..HEADER_LEN]
            .try_into()
            .map_err(|_| RowvaultError::DecryptionFailure)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut payload = envelope[HEADER_LEN..].to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, aead::Aad::from([ENVELOPE_VERSION]), &mut payload)
            .map_err(|_| RowvaultError::DecryptionFailure)?;

        Ok(plaintext.to_vec())
    }
}

/// Password-based encryption bound to one application-wide salt.
#[derive(Clone)]
pub struct Cryptographer {
    salt: Vec<u8>,
}

impl Cryptographer {
    pub fn new(salt: impl Into<Vec<u8>>) -> Self {
        Self { salt: salt.into() }
    }

    /// Derive the cipher for `password` under this cryptographer's salt.
    pub fn derive_cipher(&self, password: &[u8]) -> Result<FileCipher, RowvaultError> {
        FileCipher::derive(password, &self.salt)
    }

    pub fn encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, RowvaultError> {
        self.derive_cipher(password)?.encrypt(plaintext)
    }

    pub fn decrypt(&self, password: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, RowvaultError> {
        self.derive_cipher(password)?.decrypt(ciphertext)
    }
}

impl std::fmt::Debug for Cryptographer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cryptographer").field("salt", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let crypt = Cryptographer::new(b"pepper".to_vec());
        let sealed = crypt.encrypt(b"row-key", b"file contents").unwrap();
        assert_eq!(sealed[0], ENVELOPE_VERSION);
        assert_eq!(crypt.decrypt(b"row-key", &sealed).unwrap(), b"file contents");
    }

    #[test]
    fn test_envelope_header_is_version_then_nonce() {
        let cipher = FileCipher::derive(b"pw", b"salt").unwrap();
        let first = cipher.encrypt(b"payload").unwrap();
        let second = cipher.encrypt(b"payload").unwrap();

        assert_eq!(first.len(), HEADER_LEN + b"payload".len() + ALGORITHM.tag_len());
        assert_eq!(first[0], ENVELOPE_VERSION);
        assert_ne!(first[1..HEADER_LEN], second[1..HEADER_LEN]);
        assert!(!first.windows(7).any(|w| w == b"payload"));

        // The nonce read back from the header is the one the body was sealed with.
        let mut forged = first.clone();
        forged[1..HEADER_LEN].copy_from_slice(&second[1..HEADER_LEN]);
        assert!(cipher.decrypt(&forged).is_err());
        assert_eq!(cipher.decrypt(&first).unwrap(), b"payload");
    }

    #[test]
    fn test_wrong_password_or_salt_fails() {
        let crypt = Cryptographer::new(b"pepper".to_vec());
        let sealed = crypt.encrypt(b"row-key", b"file contents").unwrap();

        assert!(crypt.decrypt(b"other-key", &sealed).is_err());
        assert!(Cryptographer::new(b"salt2".to_vec())
            .decrypt(b"row-key", &sealed)
            .is_err());
    }

    #[test]
    fn test_tampered_and_truncated_envelopes_rejected() {
        let cipher = FileCipher::derive(b"pw", b"salt").unwrap();
        let mut sealed = cipher.encrypt(b"payload").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(cipher.decrypt(&sealed), Err(RowvaultError::DecryptionFailure)));

        assert!(cipher.decrypt(&sealed[..HEADER_LEN]).is_err());
        assert!(cipher.decrypt(&[]).is_err());

        let mut wrong_version = cipher.encrypt(b"payload").unwrap();
        wrong_version[0] = 0x01;
        assert!(cipher.decrypt(&wrong_version).is_err());
    }

    #[test]
    fn test_random_keys_differ() {
        assert_ne!(generate_random_key().unwrap(), generate_random_key().unwrap());
    }
}
