//! Encrypted column descriptors.
//!
//! One generic descriptor covers every logical type. The type only decides
//! three things: which encrypt template is used, which SQL type the
//! decrypted text is cast back to, and how values are rendered to and
//! parsed from text. Storage is always `bytea`.
//!
//! Write path:
//!
//! ```text
//! pgp_sym_encrypt($1, '<key>')                    -- text, email, char, decimal
//! pgp_sym_encrypt(nullif($1, NULL)::text, '<key>') -- integer, date, time, ...
//! ```
//!
//! Read path (see `projection`):
//!
//! ```text
//! pgp_sym_decrypt("t"."col", (SELECT key FROM key_store WHERE id = "t"."id"::text))::<cast>
//! ```

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RowvaultError};
use crate::keys::KeyMaterial;
use crate::resolver::DEFAULT_IDENTITY_COLUMN;
use crate::store::SqliteKeyStore;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

// ---------------------------------------------------------------------------
// Types and values
// ---------------------------------------------------------------------------

/// Logical type of an encrypted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ColumnType {
    Text,
    Email,
    Char { max_length: Option<usize> },
    Integer,
    Date,
    DateTime,
    Time,
    Decimal { max_digits: u32, decimal_places: u32 },
    Float,
}

impl ColumnType {
    /// SQL type the decrypted text is cast to.
    pub fn cast_sql(&self) -> String {
        match self {
            Self::Text | Self::Email | Self::Char { .. } => "TEXT".to_string(),
            Self::Integer => "INT4".to_string(),
            Self::Date => "DATE".to_string(),
            Self::DateTime => "TIMESTAMP".to_string(),
            Self::Time => "TIME".to_string(),
            Self::Decimal {
                max_digits,
                decimal_places,
            } => format!("NUMERIC({}, {})", max_digits, decimal_places),
            Self::Float => "DOUBLE PRECISION".to_string(),
        }
    }

    /// Non-text scalars are coerced to text inside the encrypt call.
    fn encrypts_through_nullif(&self) -> bool {
        matches!(
            self,
            Self::Integer | Self::Date | Self::DateTime | Self::Time | Self::Float
        )
    }

    fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Email | Self::Char { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Email => "email",
            Self::Char { .. } => "char",
            Self::Integer => "integer",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Decimal { .. } => "decimal",
            Self::Float => "float",
        }
    }
}

/// A logical (plaintext) column value.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i32),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Decimal(Decimal),
    Float(f64),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<NaiveDate> for ColumnValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for ColumnValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<NaiveTime> for ColumnValue {
    fn from(value: NaiveTime) -> Self {
        Self::Time(value)
    }
}

impl From<Decimal> for ColumnValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// SQL fragments
// ---------------------------------------------------------------------------

/// How bound parameters are written into SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `$1`, `$2`, ... starting at the given index.
    Numbered { start: usize },
    /// `%s` for every parameter.
    Format,
}

impl Default for ParamStyle {
    fn default() -> Self {
        Self::Numbered { start: 1 }
    }
}

/// SQL text plus its bound parameters (`None` binds SQL `NULL`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

struct Binder {
    style: ParamStyle,
    params: Vec<Option<String>>,
}

impl Binder {
    fn new(style: ParamStyle) -> Self {
        Self {
            style,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: Option<String>) -> String {
        self.params.push(value);
        match self.style {
            ParamStyle::Numbered { start } => format!("${}", start + self.params.len() - 1),
            ParamStyle::Format => "%s".to_string(),
        }
    }

    fn finish(self, sql: String) -> SqlFragment {
        SqlFragment {
            sql,
            params: self.params,
        }
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Where the database finds row keys when decrypting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStoreBridge {
    /// Table (or foreign table) mapping `id text -> key text`.
    pub table: String,
    /// Identity column of the encrypted tables.
    pub identity_column: String,
}

impl Default for KeyStoreBridge {
    fn default() -> Self {
        Self {
            table: SqliteKeyStore::DEFAULT_TABLE.to_string(),
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
        }
    }
}

/// A predicate on the decrypted value of an encrypted column.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Exact(ColumnValue),
    Gt(ColumnValue),
    Gte(ColumnValue),
    Lt(ColumnValue),
    Lte(ColumnValue),
    /// Inclusive on both ends. A `Null` bound matches nothing.
    Range(ColumnValue, ColumnValue),
    StartsWith(String),
    IsNull(bool),
}

// ---------------------------------------------------------------------------
// Column descriptor
// ---------------------------------------------------------------------------

/// Descriptor of one encrypted column on one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedColumn {
    table: String,
    name: String,
    column_type: ColumnType,
    #[serde(default)]
    bridge: KeyStoreBridge,
}

impl EncryptedColumn {
    pub fn new(table: impl Into<String>, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            column_type,
            bridge: KeyStoreBridge::default(),
        }
    }

    pub fn with_bridge(mut self, bridge: KeyStoreBridge) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    pub fn bridge(&self) -> &KeyStoreBridge {
        &self.bridge
    }

    /// Storage type, whatever the logical type.
    pub fn db_type(&self) -> &'static str {
        "bytea"
    }

    pub fn cast_fragment(&self) -> String {
        self.column_type.cast_sql()
    }

    fn mismatch(&self) -> RowvaultError {
        RowvaultError::TypeMismatch {
            column: self.name.clone(),
            expected: self.column_type.name(),
        }
    }

    /// Render `value` as the text handed to the encrypt function.
    ///
    /// `Null` renders as `None`. Decimals are rounded half away from zero
    /// to the declared scale.
    pub fn encode(&self, value: &ColumnValue) -> Result<Option<String>> {
        let text = match (&self.column_type, value) {
            (_, ColumnValue::Null) => return Ok(None),
            (ColumnType::Char { max_length: Some(max) }, ColumnValue::Text(text)) => {
                if text.chars().count() > *max {
                    return Err(RowvaultError::InvalidValue(format!(
                        "{} exceeds {} characters",
                        self.name, max
                    )));
                }
                text.clone()
            }
            (ty, ColumnValue::Text(text)) if ty.is_textual() => text.clone(),
            (ColumnType::Integer, ColumnValue::Integer(value)) => value.to_string(),
            (ColumnType::Date, ColumnValue::Date(value)) => value.format(DATE_FORMAT).to_string(),
            (ColumnType::DateTime, ColumnValue::DateTime(value)) => {
                value.format(DATETIME_FORMAT).to_string()
            }
            (ColumnType::Time, ColumnValue::Time(value)) => value.format(TIME_FORMAT).to_string(),
            (
                ColumnType::Decimal {
                    max_digits,
                    decimal_places,
                },
                ColumnValue::Decimal(value),
            ) => fit_decimal(*value, *max_digits, *decimal_places)?.to_string(),
            (ColumnType::Float, ColumnValue::Float(value)) => format_float(*value),
            _ => return Err(self.mismatch()),
        };
        Ok(Some(text))
    }

    /// Parse the text of a decrypted, cast value back into a logical value.
    pub fn decode(&self, text: Option<&str>) -> Result<ColumnValue> {
        let Some(text) = text else {
            return Ok(ColumnValue::Null);
        };
        let invalid = || {
            RowvaultError::InvalidValue(format!(
                "cannot read {:?} as {} for {}",
                text,
                self.column_type.name(),
                self.name
            ))
        };

        let value = match self.column_type {
            ColumnType::Text | ColumnType::Email | ColumnType::Char { .. } => {
                ColumnValue::Text(text.to_string())
            }
            ColumnType::Integer => ColumnValue::Integer(text.trim().parse().map_err(|_| invalid())?),
            ColumnType::Date => ColumnValue::Date(
                NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).map_err(|_| invalid())?,
            ),
            ColumnType::DateTime => {
                let text = text.trim().replacen('T', " ", 1);
                ColumnValue::DateTime(
                    NaiveDateTime::parse_from_str(&text, DATETIME_FORMAT).map_err(|_| invalid())?,
                )
            }
            ColumnType::Time => ColumnValue::Time(
                NaiveTime::parse_from_str(text.trim(), TIME_FORMAT).map_err(|_| invalid())?,
            ),
            ColumnType::Decimal {
                max_digits,
                decimal_places,
            } => {
                let value = Decimal::from_str(text.trim()).map_err(|_| invalid())?;
                ColumnValue::Decimal(fit_decimal(value, max_digits, decimal_places)?)
            }
            ColumnType::Float => ColumnValue::Float(parse_float(text.trim()).ok_or_else(invalid)?),
        };
        Ok(value)
    }

    /// SQL that encrypts one bound value under `key`.
    ///
    /// `key` is always resolver-produced material, validated as base64 at
    /// construction, so quoting it as a literal cannot break out of the
    /// string.
    pub fn build_write_fragment(
        &self,
        value: &ColumnValue,
        key: &KeyMaterial,
        style: ParamStyle,
    ) -> Result<SqlFragment> {
        let mut binder = Binder::new(style);
        let placeholder = binder.bind(self.encode(value)?);

        let sql = if self.column_type.encrypts_through_nullif() {
            format!(
                "pgp_sym_encrypt(nullif({}, NULL)::text, '{}')",
                placeholder,
                key.expose()
            )
        } else {
            format!("pgp_sym_encrypt({}, '{}')", placeholder, key.expose())
        };
        Ok(binder.finish(sql))
    }

    /// Decrypt-and-cast expression for this column as seen through `alias`.
    ///
    /// The key is looked up by the database in the key store bridge using
    /// the row's own identity column, so no key is passed from here.
    pub fn decrypt_sql(&self, alias: &str, cast: &str) -> String {
        let alias = quote_ident(alias);
        format!(
            "pgp_sym_decrypt({alias}.{col}, (SELECT key FROM {store} WHERE id = {alias}.{id}::text))::{cast}",
            col = quote_ident(&self.name),
            store = quote_ident(&self.bridge.table),
            id = quote_ident(&self.bridge.identity_column),
        )
    }

    /// Filter SQL comparing `lhs` (a decrypting projection) against `lookup`.
    pub fn build_lookup_fragment(
        &self,
        lhs: &str,
        lookup: &Lookup,
        style: ParamStyle,
    ) -> Result<SqlFragment> {
        let mut binder = Binder::new(style);
        let compare = |op: &str, value: &ColumnValue, binder: &mut Binder| -> Result<String> {
            let placeholder = binder.bind(self.encode(value)?);
            Ok(format!("{} {} {}", lhs, op, placeholder))
        };

        let sql = match lookup {
            Lookup::Exact(ColumnValue::Null) => format!("{} IS NULL", lhs),
            Lookup::Exact(value) => compare("=", value, &mut binder)?,
            Lookup::Gt(value) => compare(">", value, &mut binder)?,
            Lookup::Gte(value) => compare(">=", value, &mut binder)?,
            Lookup::Lt(value) => compare("<", value, &mut binder)?,
            Lookup::Lte(value) => compare("<=", value, &mut binder)?,
            Lookup::Range(low, high) => {
                let low = binder.bind(self.encode(low)?);
                let high = binder.bind(self.encode(high)?);
                format!("{} BETWEEN {} AND {}", lhs, low, high)
            }
            Lookup::StartsWith(prefix) => {
                if !self.column_type.is_textual() {
                    return Err(self.mismatch());
                }
                let pattern = binder.bind(Some(format!("{}%", escape_like(prefix))));
                format!("{} LIKE {}", lhs, pattern)
            }
            Lookup::IsNull(true) => format!("{} IS NULL", lhs),
            Lookup::IsNull(false) => format!("{} IS NOT NULL", lhs),
        };
        Ok(binder.finish(sql))
    }
}

/// Round to `scale` places and check the result fits `NUMERIC(precision, scale)`.
fn fit_decimal(value: Decimal, precision: u32, scale: u32) -> Result<Decimal> {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);

    let digits = rounded.mantissa().unsigned_abs().to_string().len() as u32;
    if digits > precision {
        return Err(RowvaultError::InvalidValue(format!(
            "{} does not fit NUMERIC({}, {})",
            value, precision, scale
        )));
    }
    Ok(rounded)
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
