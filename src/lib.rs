//! # rowvault
//!
//! Transparent per-row encryption of database column values.
//!
//! Every row gets its own 256-bit key, kept in an external key store keyed
//! by the row's identity. Values are encrypted by the database's
//! `pgp_sym_encrypt` under that key on write, and decrypted and cast back
//! to their logical type by `pgp_sym_decrypt` on read, with the database
//! joining the key store itself.
//!
//! This crate owns the key lifecycle and the SQL around it:
//!
//! - [`resolver::KeyResolver`] works out which row a statement targets and
//!   returns its key (cache, then store, then mint).
//! - [`column::EncryptedColumn`] builds encrypt fragments and casts.
//! - [`projection::DecryptingProjection`] rewrites column references into
//!   decrypting SQL for selects, joins, filters, and aggregates.
//! - [`files::FileSealer`] encrypts whole files with the same row keys.
//!
//! The cipher for column values is the database's, never this crate's.

pub mod cache;
pub mod column;
pub mod config;
pub mod crypto;
pub mod error;
pub mod files;
pub mod keys;
pub mod pipeline;
pub mod projection;
pub mod resolver;
pub mod store;

pub use cache::KeyCache;
pub use column::{
    ColumnType, ColumnValue, EncryptedColumn, KeyStoreBridge, Lookup, ParamStyle, SqlFragment,
};
pub use config::Settings;
pub use crypto::Cryptographer;
pub use error::{Result, RowvaultError};
pub use files::{EncryptedFile, FileSealer};
pub use keys::{generate_key, KeyMaterial, KeyOrigin, PerRowKey, RecordId};
pub use pipeline::{encrypt_write, EncryptedWrite, EncryptionRequest};
pub use projection::{Aggregate, ColumnRef, DecryptingProjection};
pub use resolver::{Comparison, KeyResolver, Operand, Predicate, StatementContext};
pub use store::{KeyStore, MemoryKeyStore, SqliteKeyStore};
