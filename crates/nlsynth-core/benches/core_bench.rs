//! Criterion benchmarks for nlsynth-core.
//!
//! Everything here runs without a Python runtime; the `python` feature only
//! adds the binding layer on top of these functions.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init + migration overhead.
//! 2. **intent**: Specification extraction at various text sizes.
//! 3. **templates**: Template scoring over the built-in table.
//! 4. **fallback**: Placeholder generation and syntax validation.
//! 5. **corpus_search**: Similarity ranking and adaptation on a seeded corpus.
//! 6. **orchestrator**: End-to-end runs against the in-memory store.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/nlsynth-core/Cargo.toml
//! # Run only the orchestrator group:
//! cargo bench --manifest-path crates/nlsynth-core/Cargo.toml -- orchestrator
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;

// The lib target is called `_nlsynth_core` (matching the Python extension
// module name).
use _nlsynth_core::config::SynthConfig;
use _nlsynth_core::intent::extract;
use _nlsynth_core::learn::bias::{BiasHandle, BiasState};
use _nlsynth_core::models::{now_utc, NewCorpusEntry, Origin};
use _nlsynth_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};
use _nlsynth_core::store::{CorpusStore, MemoryCorpusStore};
use _nlsynth_core::synth::adapter::CorpusGuidedSynthesizer;
use _nlsynth_core::synth::fallback::generate_fallback;
use _nlsynth_core::synth::orchestrator::{Orchestrator, RunOptions};
use _nlsynth_core::synth::syntax::is_valid_python;
use _nlsynth_core::synth::templates::TemplateMatcher;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SUBJECTS: &[&str] = &[
    "numbers", "prices", "scores", "weights", "ages", "distances", "temperatures", "votes",
];
const VERBS: &[&str] = &["compute the sum of", "find the total of", "count the", "filter the"];

/// Seed `n` template-origin entries with single-list-parameter signatures so
/// that corpus search has real candidates to rank.
fn seeded_store(n: usize) -> MemoryCorpusStore {
    let store = MemoryCorpusStore::new();
    for i in 0..n {
        let text = format!(
            "{} a list of {} batch {i}",
            VERBS[i % VERBS.len()],
            SUBJECTS[i % SUBJECTS.len()]
        );
        let spec = extract(&text);
        store.put_specification(&spec).unwrap();
        store
            .put(NewCorpusEntry {
                spec_id: spec.id.clone(),
                implementation: format!(
                    "def {}(items: list) -> int:\n    total = 0\n    for v in items:\n        total += v\n    return total\n",
                    spec.name
                ),
                origin: Origin::Template,
                outcome_score: 0.5 + (i % 5) as f64 / 10.0,
                created_at: now_utc(),
            })
            .unwrap();
    }
    store
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema/init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            migrate_schema(&conn).unwrap();
            black_box(&conn);
        });
    });
}

fn bench_intent(c: &mut Criterion) {
    let mut group = c.benchmark_group("intent");

    group.bench_function("short_request", |b| {
        b.iter(|| extract(black_box("find the largest number in a list")));
    });

    for size in [256usize, 4096, 10_240] {
        let text = "sort the strings by length and count vowels ".repeat(size / 44 + 1);
        group.bench_with_input(BenchmarkId::new("long_request", size), &text, |b, text| {
            b.iter(|| extract(black_box(text)));
        });
    }

    group.finish();
}

fn bench_templates(c: &mut Criterion) {
    let mut group = c.benchmark_group("templates");
    let matcher = TemplateMatcher::new(0.75);
    let hit = extract("reverse a string");
    let miss = extract("perform quantum entanglement calculation");

    group.bench_function("match_hit", |b| {
        b.iter(|| matcher.find_match(black_box(&hit)));
    });
    group.bench_function("match_miss", |b| {
        b.iter(|| matcher.find_match(black_box(&miss)));
    });

    group.finish();
}

fn bench_fallback(c: &mut Criterion) {
    let mut group = c.benchmark_group("fallback");
    let spec = extract("perform \"quantum\" entanglement \\ calculation\n\u{7}");

    group.bench_function("generate", |b| {
        b.iter(|| generate_fallback(black_box(&spec)));
    });

    let source = generate_fallback(&spec);
    group.bench_function("syntax_check", |b| {
        b.iter(|| is_valid_python(black_box(&source)));
    });

    group.finish();
}

fn bench_corpus_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("corpus_search");
    let config = SynthConfig {
        search_budget_ms: 10_000,
        ..SynthConfig::default()
    };
    let synthesizer = CorpusGuidedSynthesizer::from_config(&config);
    let bias = BiasState::neutral();
    let target = extract("compute the sum of a list of salaries");

    for n in [50usize, 500, 2000] {
        let store = seeded_store(n);
        group.bench_with_input(BenchmarkId::new("find_similar", n), &store, |b, store| {
            b.iter(|| store.find_similar(black_box(&target), 0.3, 8).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("synthesize", n), &store, |b, store| {
            b.iter(|| synthesizer.synthesize(store, black_box(&target), &bias).unwrap());
        });
    }

    group.finish();
}

fn bench_orchestrator(c: &mut Criterion) {
    let mut group = c.benchmark_group("orchestrator");
    let store = Arc::new(seeded_store(200));
    let orch = Orchestrator::new(store, BiasHandle::default(), SynthConfig::default());
    let dry = RunOptions {
        auto_persist: false,
    };

    for (label, text) in [
        ("template", "reverse a string"),
        ("corpus_adapted", "compute the sum of a list of salaries"),
        ("fallback", "perform quantum entanglement calculation"),
    ] {
        group.bench_function(BenchmarkId::new("dry_run", label), |b| {
            b.iter(|| orch.run_with(black_box(text), dry).unwrap());
        });
    }

    group.bench_function("persisted_repeat", |b| {
        b.iter(|| orch.run(black_box("reverse a string")).unwrap());
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Register all benchmark groups
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_schema_init,
    bench_intent,
    bench_templates,
    bench_fallback,
    bench_corpus_search,
    bench_orchestrator,
);
criterion_main!(benches);
