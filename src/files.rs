//! Whole-file encryption keyed by record identity.
//!
//! Binary payloads (uploads) are not encrypted by the database. They are
//! sealed here with the owning record's key material as the password of
//! the PBKDF2/AES-GCM cryptographer, and are served through a URL that
//! names the record and field, never the storage location of the
//! ciphertext. Whoever serves that URL must run its own authorization
//! check before calling [`FileSealer::open`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::Cryptographer;
use crate::error::{Result, RowvaultError};
use crate::keys::RecordId;
use crate::resolver::KeyResolver;
use crate::store::KeyStore;

/// An encrypted file attached to one field of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFile {
    pub record_id: RecordId,
    pub field: String,
    pub ciphertext: Vec<u8>,
}

impl EncryptedFile {
    /// Protected fetch path: `/<url_name>/<record_id>/<field>/`.
    pub fn fetch_url(&self, url_name: &str) -> Result<String> {
        fetch_url(url_name, &self.record_id, &self.field)
    }
}

/// Build `/<url_name>/<record_id>/<field>/`.
///
/// Each part must be a single path segment of unreserved URL characters
/// (`A-Z a-z 0-9 - . _ ~`), and neither `.` nor `..`, so no identity can
/// point the route anywhere else.
pub fn fetch_url(url_name: &str, record_id: &RecordId, field: &str) -> Result<String> {
    for segment in [url_name, record_id.as_str(), field] {
        if !is_path_segment(segment) {
            return Err(RowvaultError::InvalidValue(format!(
                "{:?} is not a plain URL path segment",
                segment
            )));
        }
    }
    Ok(format!("/{}/{}/{}/", url_name, record_id, field))
}

pub(crate) fn is_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Seals and opens files with per-row keys.
pub struct FileSealer<'a, S: KeyStore> {
    resolver: &'a KeyResolver<S>,
    cryptographer: Cryptographer,
}

impl<'a, S: KeyStore> FileSealer<'a, S> {
    pub fn new(resolver: &'a KeyResolver<S>, cryptographer: Cryptographer) -> Self {
        Self {
            resolver,
            cryptographer,
        }
    }

    /// Encrypt `contents` for `field` of `record_id`, minting the record's
    /// key if it has none yet.
    pub fn seal(&self, record_id: &RecordId, field: &str, contents: &[u8]) -> Result<EncryptedFile> {
        let key = self.resolver.resolve(record_id)?;
        let ciphertext = self
            .cryptographer
            .encrypt(key.key_material.expose().as_bytes(), contents)?;
        debug!(%record_id, field, bytes = contents.len(), "sealed file");

        Ok(EncryptedFile {
            record_id: record_id.clone(),
            field: field.to_string(),
            ciphertext,
        })
    }

    /// Decrypt `file` with its record's key.
    ///
    /// Opening never creates a key: a record without one cannot have
    /// sealed anything, so the file is rejected as undecryptable.
    pub fn open(&self, file: &EncryptedFile) -> Result<Vec<u8>> {
        let Some(key) = self.resolver.lookup(&file.record_id)? else {
            warn!(record_id = %file.record_id, field = %file.field, "no key held for file");
            return Err(RowvaultError::DecryptionFailure);
        };
        self.cryptographer
            .decrypt(key.expose().as_bytes(), &file.ciphertext)
    }
}
