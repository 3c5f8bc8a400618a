//! Key resolution cost: cache hit vs. key store round trip.
//!
//! Every encrypted write resolves a row key. A cache hit is a local map
//! lookup; a miss pays a round trip to the external key store. This
//! benchmark simulates the store's RTT (configurable sleep) to show what
//! the per-process cache saves.
//!
//! Run with: `cargo bench --bench key_resolution_benchmark`

use criterion::{black_box, criterion_group, criterion_main, Criterion, SamplingMode};
use rowvault::{
    ColumnType, ColumnValue, EncryptedColumn, KeyMaterial, KeyResolver, KeyStore, MemoryKeyStore,
    ParamStyle, RecordId, StatementContext,
};
use std::thread;
use std::time::Duration;

/// Simulated key store RTT per call. Results scale linearly.
const STORE_SIMULATED_RTT_MS: u64 = 1;

/// A memory store behind a simulated network hop.
struct RemoteStore(MemoryKeyStore);

impl KeyStore for RemoteStore {
    fn get(&self, record_id: &RecordId) -> rowvault::Result<Option<KeyMaterial>> {
        thread::sleep(Duration::from_millis(STORE_SIMULATED_RTT_MS));
        self.0.get(record_id)
    }

    fn set_if_absent(&self, record_id: &RecordId, key: &KeyMaterial) -> rowvault::Result<bool> {
        thread::sleep(Duration::from_millis(STORE_SIMULATED_RTT_MS));
        self.0.set_if_absent(record_id, key)
    }
}

fn bench_key_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_resolution");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    let resolver = KeyResolver::new(RemoteStore(MemoryKeyStore::new()));
    let id = RecordId::generate();
    resolver.resolve(&id).unwrap();
    let ctx = StatementContext::Explicit(id.clone());

    group.bench_function("cache_hit", |b| {
        b.iter(|| resolver.resolve_key_for_statement(black_box(&ctx)).unwrap());
    });

    group.bench_function("store_round_trip", |b| {
        b.iter(|| {
            resolver.cache().clear();
            resolver.resolve_key_for_statement(black_box(&ctx)).unwrap()
        });
    });

    group.finish();
}

fn bench_write_fragment(c: &mut Criterion) {
    let resolver = KeyResolver::new(MemoryKeyStore::new());
    let key = resolver.resolve(&RecordId::generate()).unwrap().key_material;
    let column = EncryptedColumn::new("encrypted_model", "pgp_sym_field", ColumnType::Text);
    let value: ColumnValue = "bonjour".into();

    c.bench_function("build_write_fragment", |b| {
        b.iter(|| {
            column
                .build_write_fragment(black_box(&value), &key, ParamStyle::default())
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_key_resolution, bench_write_fragment);
criterion_main!(benches);
