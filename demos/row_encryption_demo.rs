//! Minimal example: per-row encryption of an `encrypted_model` table.
//!
//! Shows the SQL produced for an insert, an update by identity, and a
//! decrypting filter, plus a file sealed under the same row key.
//! Run with: `cargo run --example row_encryption_demo`
//!
//! Set `RUST_LOG=rowvault=debug` to watch the key lifecycle.

use std::sync::Arc;

use rowvault::projection::Aggregate;
use rowvault::{
    encrypt_write, ColumnRef, ColumnType, DecryptingProjection, EncryptedColumn,
    EncryptionRequest, FileSealer, KeyResolver, Lookup, Operand, ParamStyle, Predicate, RecordId,
    Settings, StatementContext,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. Setup: keys kept in a local SQLite store.
    let key_path = std::env::temp_dir().join("rowvault_demo_keys.sqlite");
    let mut settings = Settings::new("demo-salt");
    settings.key_store_path = Some(key_path.clone());
    let store = settings
        .open_key_store()?
        .ok_or("key store path not configured")?;
    let resolver = KeyResolver::new(store).with_identity_column(&settings.identity_column);

    let name = EncryptedColumn::new("encrypted_model", "pgp_sym_field", ColumnType::Text)
        .with_bridge(settings.bridge());
    let visits = EncryptedColumn::new(
        "encrypted_model",
        "integer_pgp_sym_field",
        ColumnType::Integer,
    )
    .with_bridge(settings.bridge());

    // 2. Insert a new row: its key is minted here.
    let id = RecordId::generate();
    let insert = encrypt_write(
        &resolver,
        &StatementContext::insert(&[id.clone()]),
        &[
            EncryptionRequest::new(&name, "bonjour"),
            EncryptionRequest::new(&visits, 1),
        ],
        ParamStyle::Numbered { start: 2 },
    )?;
    println!(
        "INSERT INTO encrypted_model (id, {}, {}) VALUES ($1, {}, {})",
        name.name(),
        visits.name(),
        insert.fragments[0].sql,
        insert.fragments[1].sql
    );
    println!("  key origin: {:?}", insert.key.origin);

    // 3. Update by identity: the same key is reused.
    let update = encrypt_write(
        &resolver,
        &StatementContext::Filter(vec![Predicate::equals(
            Operand::column(&settings.identity_column),
            Operand::Text(id.to_string()),
        )]),
        &[EncryptionRequest::new(&visits, 2)],
        ParamStyle::default(),
    )?;
    println!(
        "UPDATE encrypted_model SET {} = {} WHERE id = $2",
        visits.name(),
        update.fragments[0].sql
    );
    println!("  key origin: {:?}", update.key.origin);

    // 4. Read side: decrypted select list, filter, and aggregate.
    let projection = DecryptingProjection::new(Arc::new(visits.clone()));
    let reference = ColumnRef::new("encrypted_model");
    let filter = projection.filter(&reference, &Lookup::Gte(2.into()), ParamStyle::default())?;
    println!(
        "SELECT {} FROM encrypted_model WHERE {}",
        projection.select(&reference),
        filter.sql
    );
    println!(
        "SELECT {} FROM encrypted_model",
        projection.aggregate(Aggregate::Max, &reference)
    );

    // 5. A file attached to the row, sealed with the row's key.
    let sealer = FileSealer::new(&resolver, settings.cryptographer());
    let file = sealer.seal(&id, "upload", b"%PDF-1.4 ...")?;
    println!(
        "Sealed {} bytes, fetch at {}",
        file.ciphertext.len(),
        file.fetch_url(&settings.fetch_url_name)?
    );
    assert_eq!(sealer.open(&file)?, b"%PDF-1.4 ...");

    std::fs::remove_file(&key_path).ok();
    Ok(())
}
