//! Decrypt-on-read column references.
//!
//! Whenever an encrypted column is selected, filtered, joined, or
//! aggregated, its reference is rewritten so the database decrypts and
//! casts it. The key is found by the database through the key store
//! bridge, so reading a related row never requires the application to
//! have resolved that row's key first.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use crate::column::{ColumnType, EncryptedColumn, Lookup, ParamStyle, SqlFragment};
use crate::error::Result;

/// A reference to an encrypted column as it appears in one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Table alias the column is read through.
    pub alias: String,
    /// Logical type the expression must yield, when it differs from the
    /// column's own (annotations, expressions over the column).
    pub output: Option<ColumnType>,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            output: None,
        }
    }

    pub fn with_output(mut self, output: ColumnType) -> Self {
        self.output = Some(output);
        self
    }
}

/// Aggregates that can run over a decrypted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Min,
    Max,
}

impl Aggregate {
    fn sql_name(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// Rewrites references to one encrypted column into decrypting SQL.
#[derive(Debug)]
pub struct DecryptingProjection {
    column: Arc<EncryptedColumn>,
    cached: OnceLock<String>,
}

impl DecryptingProjection {
    pub fn new(column: Arc<EncryptedColumn>) -> Self {
        Self {
            column,
            cached: OnceLock::new(),
        }
    }

    pub fn column(&self) -> &EncryptedColumn {
        &self.column
    }

    /// Whether `reference` differs from the plain same-table read, i.e.
    /// comes through a join alias or yields a different output type.
    pub fn is_foreign(&self, reference: &ColumnRef) -> bool {
        reference.alias != self.column.table()
            || reference
                .output
                .is_some_and(|output| output != *self.column.column_type())
    }

    /// Decrypt-and-cast SQL for `reference`.
    ///
    /// The plain same-table read is built once and reused.
    pub fn project(&self, reference: &ColumnRef) -> Cow<'_, str> {
        if !self.is_foreign(reference) {
            return Cow::Borrowed(self.cached.get_or_init(|| {
                self.column
                    .decrypt_sql(self.column.table(), &self.column.cast_fragment())
            }));
        }

        let cast = reference
            .output
            .map_or_else(|| self.column.cast_fragment(), |output| output.cast_sql());
        Cow::Owned(self.column.decrypt_sql(&reference.alias, &cast))
    }

    /// `SELECT`-list expression with a stable alias, e.g. for `only()`-style
    /// partial loads.
    pub fn select(&self, reference: &ColumnRef) -> String {
        format!(
            "{} AS {}",
            self.project(reference),
            crate::column::quote_ident(self.column.name())
        )
    }

    pub fn aggregate(&self, aggregate: Aggregate, reference: &ColumnRef) -> String {
        format!("{}({})", aggregate.sql_name(), self.project(reference))
    }

    /// A filter on the decrypted value.
    pub fn filter(
        &self,
        reference: &ColumnRef,
        lookup: &Lookup,
        style: ParamStyle,
    ) -> Result<SqlFragment> {
        self.column
            .build_lookup_fragment(&self.project(reference), lookup, style)
    }
}
