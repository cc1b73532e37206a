// benches/admission_bench.rs
//! Admission path benchmarks.
//!
//! Measures the cost of recording a request: the bare store append and the
//! full gate decision through the engine facade.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use netpanel_engine::events::EventBus;
use netpanel_engine::interception::InterceptMode;
use netpanel_engine::network::{NetworkStack, ScriptedNetwork};
use netpanel_engine::record::{Origin, OutboundRequest};
use netpanel_engine::store::{RecordDraft, RequestStore};
use netpanel_engine::utils::config::{EngineConfig, StoreConfig};
use netpanel_engine::Engine;
use std::sync::Arc;

fn request(n: u64) -> OutboundRequest {
    OutboundRequest::get(format!("http://bench.test/asset/{}", n))
}

/// Benchmark raw appends at a few history capacities.
fn bench_store_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/append");

    for capacity in [100usize, 1_000, 10_000] {
        let store = RequestStore::new(
            StoreConfig {
                capacity,
                evict_batch: 64,
            },
            Arc::new(EventBus::new(1024)),
        );
        let mut n = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| {
                n += 1;
                black_box(store.append(RecordDraft::new(Origin::tab(1), request(n))));
            });
        });
    }

    group.finish();
}

/// Benchmark `Engine::observe` with every request parked, so the network
/// stack stays out of the measurement.
fn bench_observe_hold(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();

    let mut config = EngineConfig::default();
    config.store.capacity = 100_000;
    let network: Arc<dyn NetworkStack> = Arc::new(ScriptedNetwork::new());
    let engine = Engine::new(config, network).unwrap();
    engine.set_mode(InterceptMode::All);

    let mut n = 0u64;
    c.bench_function("engine/observe_hold", |b| {
        b.iter(|| {
            n += 1;
            black_box(engine.observe(Origin::tab(1), request(n)).unwrap());
        });
    });

    engine.close_tab(1);
}

criterion_group!(benches, bench_store_append, bench_observe_hold);
criterion_main!(benches);
