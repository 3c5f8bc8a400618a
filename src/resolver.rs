//! Per-statement key resolution.
//!
//! Given the context of a statement being built, the resolver works out
//! which record the statement targets and returns that record's key:
//!
//! ```text
//! StatementContext -> RecordId -> cache? -> store? -> mint + set_if_absent
//! ```
//!
//! Only a closed set of statement shapes is understood. Anything else fails
//! with `IdentityResolution`; the resolver never guesses a target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::KeyCache;
use crate::error::{Result, RowvaultError};
use crate::keys::{self, KeyMaterial, KeyOrigin, PerRowKey, RecordId};
use crate::store::KeyStore;

/// Identity column name used when none is configured.
pub const DEFAULT_IDENTITY_COLUMN: &str = "id";

// ---------------------------------------------------------------------------
// Statement shapes
// ---------------------------------------------------------------------------

/// One side of a filter predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// A column reference, optionally qualified (`"table.column"`).
    Column(String),
    Text(String),
    Integer(i64),
    Uuid(Uuid),
    Null,
}

impl Operand {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    /// The identity this literal names, if it is a usable literal.
    fn as_identity(&self) -> Option<RecordId> {
        match self {
            Self::Text(text) => Some(RecordId::new(text.clone())),
            Self::Integer(value) => Some(RecordId::from(*value)),
            Self::Uuid(uuid) => Some(RecordId::from(*uuid)),
            Self::Column(_) | Self::Null => None,
        }
    }

    fn is_column_named(&self, name: &str) -> bool {
        match self {
            Self::Column(column) => column.rsplit('.').next() == Some(name),
            _ => false,
        }
    }
}

/// Comparison operator of a filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A top-level `lhs <op> rhs` clause of a filter (clauses are AND-ed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub lhs: Operand,
    pub op: Comparison,
    pub rhs: Operand,
}

impl Predicate {
    pub fn new(lhs: Operand, op: Comparison, rhs: Operand) -> Self {
        Self { lhs, op, rhs }
    }

    pub fn equals(lhs: Operand, rhs: Operand) -> Self {
        Self::new(lhs, Comparison::Eq, rhs)
    }

    /// The identity this clause pins the statement to, if any.
    ///
    /// Recognised shapes (either orientation):
    /// - `<identity column> = <literal>`
    /// - `<any column> = <uuid literal>`
    fn identity(&self, identity_column: &str) -> Option<RecordId> {
        if self.op != Comparison::Eq {
            return None;
        }
        for (column, literal) in [(&self.lhs, &self.rhs), (&self.rhs, &self.lhs)] {
            if column.is_column_named(identity_column) {
                if let Some(id) = literal.as_identity() {
                    return Some(id);
                }
            }
            if let (Operand::Column(_), Operand::Uuid(uuid)) = (column, literal) {
                return Some(RecordId::from(*uuid));
            }
        }
        None
    }
}

/// Anything about to be written that may carry its record identity.
pub trait Identified {
    fn record_id(&self) -> Option<&RecordId>;
}

impl Identified for RecordId {
    fn record_id(&self) -> Option<&RecordId> {
        Some(self)
    }
}

impl Identified for Option<RecordId> {
    fn record_id(&self) -> Option<&RecordId> {
        self.as_ref()
    }
}

/// What is known about a statement's target at SQL-build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementContext {
    /// The caller threads the identity through directly. Always resolvable.
    Explicit(RecordId),
    /// Objects about to be inserted, in statement order.
    Insert(Vec<Option<RecordId>>),
    /// The top-level AND-ed clauses of a filter or update.
    Filter(Vec<Predicate>),
    /// Nothing is known about the target.
    Unknown,
}

impl StatementContext {
    pub fn insert<I: Identified>(objects: &[I]) -> Self {
        Self::Insert(objects.iter().map(|o| o.record_id().cloned()).collect())
    }

    /// Recover the target identity, or fail loudly.
    pub fn extract_identity(&self, identity_column: &str) -> Result<RecordId> {
        match self {
            Self::Explicit(id) => Ok(id.clone()),
            Self::Insert(objects) => match objects.first() {
                Some(Some(id)) => Ok(id.clone()),
                Some(None) => Err(RowvaultError::IdentityResolution(
                    "object to insert has no identity".to_string(),
                )),
                None => Err(RowvaultError::IdentityResolution(
                    "insert carries no objects".to_string(),
                )),
            },
            Self::Filter(predicates) => {
                let mut found: Option<RecordId> = None;
                for id in predicates.iter().filter_map(|p| p.identity(identity_column)) {
                    match &found {
                        Some(existing) if *existing != id => {
                            return Err(RowvaultError::IdentityResolution(format!(
                                "filter names conflicting identities {} and {}",
                                existing, id
                            )));
                        }
                        Some(_) => {}
                        None => found = Some(id),
                    }
                }
                found.ok_or_else(|| {
                    RowvaultError::IdentityResolution(format!(
                        "filter has no equality clause on {}",
                        identity_column
                    ))
                })
            }
            Self::Unknown => Err(RowvaultError::IdentityResolution(
                "statement carries no identity".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves, mints, and memoises per-row keys.
pub struct KeyResolver<S: KeyStore> {
    store: S,
    cache: Arc<KeyCache>,
    identity_column: String,
}

impl<S: KeyStore> KeyResolver<S> {
    /// A resolver with its own empty cache.
    pub fn new(store: S) -> Self {
        Self::with_cache(store, Arc::new(KeyCache::new()))
    }

    /// A resolver sharing `cache` with other resolvers in this process.
    pub fn with_cache(store: S, cache: Arc<KeyCache>) -> Self {
        Self {
            store,
            cache,
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
        }
    }

    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_column = column.into();
        self
    }

    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve the key for the record a statement targets.
    pub fn resolve_key_for_statement(&self, context: &StatementContext) -> Result<PerRowKey> {
        let record_id = context
            .extract_identity(&self.identity_column)
            .inspect_err(|err| warn!(?context, %err, "cannot resolve statement identity"))?;
        self.resolve(&record_id)
    }

    /// Resolve the key for `record_id`: cache, then store, then mint.
    pub fn resolve(&self, record_id: &RecordId) -> Result<PerRowKey> {
        match self.lookup(record_id)? {
            Some(key) => Ok(existing(record_id, key)),
            None => self.mint(record_id),
        }
    }

    /// The key already held for `record_id`, from the cache or the store.
    ///
    /// Never mints: read paths use this so that looking at a record cannot
    /// create a key for it.
    pub fn lookup(&self, record_id: &RecordId) -> Result<Option<KeyMaterial>> {
        if let Some(key) = self.cache.get(record_id) {
            debug!(%record_id, "key cache hit");
            return Ok(Some(key));
        }

        match self.store.get(record_id)? {
            Some(key) => {
                debug!(%record_id, "key store hit");
                Ok(Some(self.cache.insert_if_absent(record_id, key)))
            }
            None => {
                debug!(%record_id, "no key held");
                Ok(None)
            }
        }
    }

    fn mint(&self, record_id: &RecordId) -> Result<PerRowKey> {
        let minted = keys::generate_key()?;

        if self.store.set_if_absent(record_id, &minted)? {
            info!(%record_id, "minted new row key");
            self.cache.insert(record_id, minted.clone());
            return Ok(PerRowKey {
                record_id: record_id.clone(),
                key_material: minted,
                origin: KeyOrigin::NewlyGenerated,
            });
        }

        // Another writer persisted a key first; theirs is authoritative.
        warn!(%record_id, "lost key mint race, adopting persisted key");
        let persisted = self.store.get(record_id)?.ok_or_else(|| {
            RowvaultError::KeyStoreUnavailable(format!(
                "key for {} rejected as present but not readable",
                record_id
            ))
        })?;
        let key = self.cache.insert_if_absent(record_id, persisted);
        Ok(existing(record_id, key))
    }
}

fn existing(record_id: &RecordId, key: KeyMaterial) -> PerRowKey {
    PerRowKey {
        record_id: record_id.clone(),
        key_material: key,
        origin: KeyOrigin::Existing,
    }
}

impl<S: KeyStore + std::fmt::Debug> std::fmt::Debug for KeyResolver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("store", &self.store)
            .field("cache", &self.cache)
            .field("identity_column", &self.identity_column)
            .finish()
    }
}
