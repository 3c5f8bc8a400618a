//! Record identity and per-row key material.
//!
//! Every encrypted row is protected by its own 256-bit key. The key is held
//! as base64 text (the form it takes in the key store and in SQL) inside a
//! type that is redacted in `Debug` output and zeroised on drop.
//!
//! ```text
//! generate_random_key() -> 32 bytes -> base64 -> KeyMaterial
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN};
use crate::error::RowvaultError;

// ---------------------------------------------------------------------------
// Record identity
// ---------------------------------------------------------------------------

/// The stable primary-key value of one row.
///
/// Opaque to this crate: it is compared, hashed, and rendered as text for
/// the key store, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random (v4 UUID) identity, the default for new records.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Base64-encoded symmetric key bytes for one record.
///
/// - Always decodes to exactly 32 bytes. Anything else is rejected at
///   construction, so the text is safe to embed in a quoted SQL literal.
/// - Zeroised on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    encoded: String,
}

impl KeyMaterial {
    /// Wrap key text fetched from a key store, validating its encoding.
    pub fn parse(encoded: impl Into<String>) -> Result<Self, RowvaultError> {
        let encoded = encoded.into();
        let mut decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| RowvaultError::InvalidKey)?;
        let len = decoded.len();
        decoded.zeroize();

        if len != KEY_LEN {
            return Err(RowvaultError::InvalidKey);
        }
        Ok(Self { encoded })
    }

    fn from_bytes(bytes: &[u8; KEY_LEN]) -> Self {
        Self {
            encoded: STANDARD.encode(bytes),
        }
    }

    /// Borrow the encoded key text.
    ///
    /// Used to parameterise SQL and as the password of the file channel.
    /// Callers must not log or persist the returned value anywhere other
    /// than the key store.
    pub fn expose(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED])")
    }
}

/// Generate fresh key material for a record.
///
/// Every call draws new bytes; the output is never reused.
pub fn generate_key() -> Result<KeyMaterial, RowvaultError> {
    let mut bytes = crypto::generate_random_key()?;
    let key = KeyMaterial::from_bytes(&bytes);
    bytes.zeroize();
    Ok(key)
}

// ---------------------------------------------------------------------------
// Per-row key
// ---------------------------------------------------------------------------

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrigin {
    /// Found in the cache or the key store.
    Existing,
    /// Minted by this resolver and persisted by it.
    NewlyGenerated,
}

/// The authoritative key of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerRowKey {
    pub record_id: RecordId,
    pub key_material: KeyMaterial,
    pub origin: KeyOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_is_valid_base64_of_32_bytes() {
        let key = generate_key().unwrap();
        let decoded = STANDARD.decode(key.expose()).unwrap();
        assert_eq!(decoded.len(), KEY_LEN);
        assert!(KeyMaterial::parse(key.expose()).is_ok());
    }

    #[test]
    fn test_generated_keys_are_fresh() {
        assert_ne!(generate_key().unwrap(), generate_key().unwrap());
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        assert!(KeyMaterial::parse("not base64!").is_err());
        assert!(KeyMaterial::parse("x'); DROP TABLE t; --").is_err());
        // Valid base64, wrong length.
        assert!(KeyMaterial::parse(STANDARD.encode([7u8; 16])).is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = generate_key().unwrap();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(key.expose()));
    }

    #[test]
    fn test_record_id_conversions() {
        let uuid = Uuid::new_v4();
        assert_eq!(RecordId::from(uuid).as_str(), uuid.to_string());
        assert_eq!(RecordId::from(42i64).to_string(), "42");
        assert_ne!(RecordId::generate(), RecordId::generate());
    }
}
