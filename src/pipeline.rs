//! Write-path composition.
//!
//! Turns a pending write into encrypted SQL fragments:
//! 1. Resolve the target record's key (once per statement)
//! 2. Render each value into an encrypt call under that key
//!
//! Either every fragment is produced or an error is returned; nothing is
//! emitted for a statement whose key could not be resolved.

use crate::column::{ColumnValue, EncryptedColumn, ParamStyle, SqlFragment};
use crate::error::Result;
use crate::keys::PerRowKey;
use crate::resolver::{KeyResolver, StatementContext};
use crate::store::KeyStore;

/// One value to encrypt, alive only while its SQL is being produced.
#[derive(Debug, Clone)]
pub struct EncryptionRequest<'a> {
    pub column: &'a EncryptedColumn,
    pub value: ColumnValue,
}

impl<'a> EncryptionRequest<'a> {
    pub fn new(column: &'a EncryptedColumn, value: impl Into<ColumnValue>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

/// Encrypted SQL for one statement, plus the key it was built under.
#[derive(Debug, Clone)]
pub struct EncryptedWrite {
    pub key: PerRowKey,
    pub fragments: Vec<SqlFragment>,
}

impl EncryptedWrite {
    /// All bound parameters, in placeholder order.
    pub fn params(&self) -> Vec<Option<String>> {
        self.fragments
            .iter()
            .flat_map(|fragment| fragment.params.iter().cloned())
            .collect()
    }
}

/// Build the encrypt fragments of every value written by one statement.
///
/// With numbered parameters, placeholders continue across fragments so
/// the fragments can be joined into one statement as-is.
pub fn encrypt_write<S: KeyStore>(
    resolver: &KeyResolver<S>,
    context: &StatementContext,
    requests: &[EncryptionRequest<'_>],
    style: ParamStyle,
) -> Result<EncryptedWrite> {
    let key = resolver.resolve_key_for_statement(context)?;

    let mut fragments = Vec::with_capacity(requests.len());
    let mut next_style = style;
    for request in requests {
        let fragment =
            request
                .column
                .build_write_fragment(&request.value, &key.key_material, next_style)?;
        if let ParamStyle::Numbered { start } = next_style {
            next_style = ParamStyle::Numbered {
                start: start + fragment.params.len(),
            };
        }
        fragments.push(fragment);
    }

    Ok(EncryptedWrite { key, fragments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::error::RowvaultError;
    use crate::keys::RecordId;
    use crate::store::MemoryKeyStore;

    #[test]
    fn test_placeholders_continue_across_fragments() {
        let resolver = KeyResolver::new(MemoryKeyStore::new());
        let text = EncryptedColumn::new("t", "pgp_sym_field", ColumnType::Text);
        let int = EncryptedColumn::new("t", "integer_pgp_sym_field", ColumnType::Integer);
        let id = RecordId::generate();

        let write = encrypt_write(
            &resolver,
            &StatementContext::insert(&[id.clone()]),
            &[
                EncryptionRequest::new(&text, "bonjour"),
                EncryptionRequest::new(&int, -1),
            ],
            ParamStyle::Numbered { start: 2 },
        )
        .unwrap();

        assert_eq!(write.key.record_id, id);
        assert!(write.fragments[0].sql.starts_with("pgp_sym_encrypt($2,"));
        assert!(write.fragments[1].sql.starts_with("pgp_sym_encrypt(nullif($3,"));
        assert_eq!(
            write.params(),
            vec![Some("bonjour".to_string()), Some("-1".to_string())]
        );
    }

    #[test]
    fn test_unresolvable_statement_emits_nothing() {
        let resolver = KeyResolver::new(MemoryKeyStore::new());
        let text = EncryptedColumn::new("t", "pgp_sym_field", ColumnType::Text);

        let result = encrypt_write(
            &resolver,
            &StatementContext::Unknown,
            &[EncryptionRequest::new(&text, "bonjour")],
            ParamStyle::default(),
        );
        assert!(matches!(result, Err(RowvaultError::IdentityResolution(_))));
        assert!(resolver.store().is_empty());
    }
}
