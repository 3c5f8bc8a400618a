//! Settings for the encryption layer.
//!
//! Read from `DEFF_*` environment variables or a TOML file:
//!
//! ```toml
//! salt = "application-wide-salt"
//! fetch_url_name = "fetch"
//! key_store_table = "key_store"
//! identity_column = "id"
//! key_store_path = "/var/lib/app/keys.sqlite"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::column::KeyStoreBridge;
use crate::crypto::Cryptographer;
use crate::error::{Result, RowvaultError};
use crate::resolver::DEFAULT_IDENTITY_COLUMN;
use crate::store::SqliteKeyStore;

const ENV_PREFIX: &str = "DEFF_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Application-wide PBKDF2 salt for the file side channel.
    pub salt: String,
    /// Route name under which encrypted files are fetched.
    #[serde(default = "default_fetch_url_name")]
    pub fetch_url_name: String,
    #[serde(default = "default_key_store_table")]
    pub key_store_table: String,
    #[serde(default = "default_identity_column")]
    pub identity_column: String,
    /// SQLite key store file, when keys are kept locally.
    #[serde(default)]
    pub key_store_path: Option<PathBuf>,
}

fn default_fetch_url_name() -> String {
    "fetch".to_string()
}

fn default_key_store_table() -> String {
    SqliteKeyStore::DEFAULT_TABLE.to_string()
}

fn default_identity_column() -> String {
    DEFAULT_IDENTITY_COLUMN.to_string()
}

impl Settings {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            fetch_url_name: default_fetch_url_name(),
            key_store_table: default_key_store_table(),
            identity_column: default_identity_column(),
            key_store_path: None,
        }
    }

    /// Load from `DEFF_SALT`, `DEFF_FETCH_URL_NAME`, `DEFF_KEY_STORE_TABLE`,
    /// `DEFF_IDENTITY_COLUMN` and `DEFF_KEY_STORE_PATH`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Load through an arbitrary variable lookup (unprefixed names).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let salt = lookup("SALT")
            .ok_or_else(|| RowvaultError::Config(format!("{ENV_PREFIX}SALT is not set")))?;

        let mut settings = Self::new(salt);
        if let Some(name) = lookup("FETCH_URL_NAME") {
            settings.fetch_url_name = name;
        }
        if let Some(table) = lookup("KEY_STORE_TABLE") {
            settings.key_store_table = table;
        }
        if let Some(column) = lookup("IDENTITY_COLUMN") {
            settings.identity_column = column;
        }
        settings.key_store_path = lookup("KEY_STORE_PATH").map(PathBuf::from);

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents)
            .map_err(|e| RowvaultError::Config(format!("failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RowvaultError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.salt.is_empty() {
            return Err(RowvaultError::Config("salt must not be empty".to_string()));
        }
        for (field, value) in [
            ("key_store_table", &self.key_store_table),
            ("identity_column", &self.identity_column),
        ] {
            if !is_identifier(value) {
                return Err(RowvaultError::Config(format!(
                    "{} is not a plain identifier: {:?}",
                    field, value
                )));
            }
        }
        if !crate::files::is_path_segment(&self.fetch_url_name) {
            return Err(RowvaultError::Config(format!(
                "fetch_url_name must be a single path segment: {:?}",
                self.fetch_url_name
            )));
        }
        Ok(())
    }

    pub fn cryptographer(&self) -> Cryptographer {
        Cryptographer::new(self.salt.as_bytes().to_vec())
    }

    pub fn bridge(&self) -> KeyStoreBridge {
        KeyStoreBridge {
            table: self.key_store_table.clone(),
            identity_column: self.identity_column.clone(),
        }
    }

    /// Open the configured SQLite key store, if one is configured.
    pub fn open_key_store(&self) -> Result<Option<SqliteKeyStore>> {
        let Some(path) = &self.key_store_path else {
            return Ok(None);
        };
        let conn = rusqlite::Connection::open(path)?;
        SqliteKeyStore::with_connection(conn, &self.key_store_table).map(Some)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_defaults() {
        let vars = HashMap::from([("SALT", "pepper")]);
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings, Settings::new("pepper"));
        assert_eq!(settings.bridge(), KeyStoreBridge::default());
    }

    #[test]
    fn test_missing_salt_is_config_error() {
        let err = Settings::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, RowvaultError::Config(_)));
    }

    #[test]
    fn test_toml_overrides() {
        let settings = Settings::from_toml_str(
            r#"
            salt = "s"
            fetch_url_name = "files"
            key_store_table = "row_keys"
            identity_column = "pk"
            "#,
        )
        .unwrap();
        assert_eq!(settings.fetch_url_name, "files");
        assert_eq!(settings.bridge().table, "row_keys");
        assert_eq!(settings.bridge().identity_column, "pk");
        assert!(settings.open_key_store().unwrap().is_none());
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let mut settings = Settings::new("s");
        settings.key_store_table = "key_store; DROP TABLE x".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::new("s");
        settings.identity_column = "1id".to_string();
        assert!(settings.validate().is_err());

        assert!(Settings::new("").validate().is_err());
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("key_store"));
        assert!(is_identifier("_id2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
