//! Error types for rowvault.
//!
//! Every variant is a distinct failure mode of the key lifecycle or the
//! encryption pipeline. Messages signal *what* failed and never carry key
//! material.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RowvaultError>;

/// The single error type for all rowvault operations.
#[derive(Debug, Error)]
pub enum RowvaultError {
    /// The target record of a statement could not be determined, so no key
    /// can be selected. Retrying without new information fails the same way.
    #[error("identity resolution failed: {0}")]
    IdentityResolution(String),

    /// The external key store could not be reached or returned an error.
    #[error("key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    /// Wrong key, tampered ciphertext, or a malformed envelope.
    #[error("decryption failed")]
    DecryptionFailure,

    /// The AEAD seal operation failed.
    #[error("encryption failed")]
    EncryptionFailure,

    /// Key material was malformed (bad encoding or wrong length).
    #[error("invalid key")]
    InvalidKey,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// PBKDF2 produced no usable key.
    #[error("key derivation failed")]
    KeyDerivationFailure,

    /// A value of the wrong logical type was bound to an encrypted column.
    #[error("type mismatch on column {column}: expected {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
    },

    /// A value could not be rendered or parsed for its column type.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Settings could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for RowvaultError {
    fn from(err: rusqlite::Error) -> Self {
        RowvaultError::KeyStoreUnavailable(err.to_string())
    }
}
