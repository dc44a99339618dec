//! Synthesis orchestrator: extract, then template, then corpus adaptation,
//! then fallback, then persist.
//!
//! Stages run in strict priority order and each failure below the persist
//! step is recovered by falling through to the next stage, so a request
//! only fails when even the fallback cannot be persisted. Corpus writes are
//! serialized per Specification id through [`SpecLocks`]; all computation
//! happens outside the lock. A run that loses the race to another run of
//! the same spec returns the winner's entry instead of adding its own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::config::SynthConfig;
use crate::errors::{SynthError, SynthResult};
use crate::intent::extract;
use crate::learn::bias::BiasHandle;
use crate::models::{now_utc, NewCorpusEntry, Origin, RunRecord, Specification, SynthesisResult};
use crate::store::snapshot::{JsonlJournal, SnapshotRecord};
use crate::store::CorpusStore;
use crate::synth::adapter::CorpusGuidedSynthesizer;
use crate::synth::fallback::generate_fallback;
use crate::synth::guards::{clamp_limit, MAX_BATCH_WORKERS};
use crate::synth::syntax::is_valid_python;
use crate::synth::templates::TemplateMatcher;

// ---------------------------------------------------------------------------
// Per-spec write locks
// ---------------------------------------------------------------------------

/// Lock map keyed by Specification id. Unused locks are pruned once the
/// map grows past `PRUNE_THRESHOLD`.
#[derive(Default)]
pub struct SpecLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

const PRUNE_THRESHOLD: usize = 1024;

impl SpecLocks {
    pub fn acquire(&self, spec_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(spec_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Write the spec, entry, run record and artifact. `false` is a dry run.
    pub auto_persist: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { auto_persist: true }
    }
}

/// Implementation chosen by the priority chain, before persistence.
#[derive(Clone, Debug)]
struct Chosen {
    implementation: String,
    origin: Origin,
    confidence: f64,
}

struct Persisted {
    entry_id: i64,
    artifact_location: Option<String>,
    /// What was actually stored; differs from the request's own choice when
    /// a concurrent run for the same spec persisted first.
    chosen: Chosen,
}

pub struct Orchestrator {
    store: Arc<dyn CorpusStore>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    journal: Option<Arc<JsonlJournal>>,
    bias: BiasHandle,
    matcher: TemplateMatcher,
    synthesizer: CorpusGuidedSynthesizer,
    config: SynthConfig,
    locks: SpecLocks,
}

impl Orchestrator {
    /// Integer knobs in `config` are clamped to the guard limits.
    pub fn new(store: Arc<dyn CorpusStore>, bias: BiasHandle, config: SynthConfig) -> Self {
        let config = config.clamped();
        Self {
            store,
            artifacts: None,
            journal: None,
            bias,
            matcher: TemplateMatcher::new(config.template_threshold),
            synthesizer: CorpusGuidedSynthesizer::from_config(&config),
            config,
            locks: SpecLocks::default(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_journal(mut self, journal: Arc<JsonlJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn store(&self) -> &Arc<dyn CorpusStore> {
        &self.store
    }

    pub fn bias(&self) -> &BiasHandle {
        &self.bias
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub(crate) fn spec_lock(&self, spec_id: &str) -> Arc<Mutex<()>> {
        self.locks.acquire(spec_id)
    }

    /// Synthesize and persist.
    pub fn run(&self, text: &str) -> SynthResult<SynthesisResult> {
        self.run_with(text, RunOptions::default())
    }

    pub fn run_with(&self, text: &str, options: RunOptions) -> SynthResult<SynthesisResult> {
        let run_id = Uuid::new_v4().to_string();
        let spec = extract(text);

        if !options.auto_persist {
            let chosen = self.choose(&spec);
            debug!(run_id = %run_id, spec_id = %spec.id, origin = %chosen.origin, "dry run");
            return Ok(Self::result(run_id, spec, chosen, None, now_utc()));
        }

        let watermark = self.entry_watermark(&spec.id);
        let chosen = self.choose(&spec);
        let created_at = now_utc();

        match self.persist(&run_id, &spec, &chosen, watermark) {
            Ok(persisted) => {
                let chosen = persisted.chosen.clone();
                info!(
                    run_id = %run_id,
                    spec_id = %spec.id,
                    origin = %chosen.origin,
                    confidence = chosen.confidence,
                    "synthesis complete"
                );
                Ok(Self::result(run_id, spec, chosen, Some(persisted), created_at))
            }
            Err(e) if chosen.origin != Origin::Fallback => {
                error!(
                    run_id = %run_id,
                    spec_id = %spec.id,
                    origin = %chosen.origin,
                    error = %e,
                    "persisting result failed; persisting fallback instead"
                );
                let fallback = Self::fallback(&spec);
                let persisted = self
                    .persist(&run_id, &spec, &fallback, watermark)
                    .map_err(|e2| {
                        error!(run_id = %run_id, error = %e2, "fallback persistence failed");
                        SynthError::Persistence(format!("{e}; fallback: {e2}"))
                    })?;
                let chosen = persisted.chosen.clone();
                Ok(Self::result(run_id, spec, chosen, Some(persisted), created_at))
            }
            Err(e) => {
                error!(run_id = %run_id, spec_id = %spec.id, error = %e, "fallback persistence failed");
                Err(SynthError::Persistence(e.to_string()))
            }
        }
    }

    /// Run independent requests concurrently on a worker pool of `workers`
    /// threads (`0` uses the configured pool size). Results keep input order.
    pub fn run_batch(&self, texts: &[String], workers: usize) -> Vec<SynthResult<SynthesisResult>> {
        let requested = if workers == 0 { self.config.batch_workers } else { workers };
        let workers = clamp_limit(requested as i64, MAX_BATCH_WORKERS) as usize;
        let options = RunOptions::default();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build();
        match pool {
            Ok(pool) => pool.install(|| {
                texts
                    .par_iter()
                    .map(|text| self.run_with(text, options))
                    .collect()
            }),
            Err(e) => {
                warn!(error = %e, "worker pool unavailable; running batch sequentially");
                texts
                    .iter()
                    .map(|text| self.run_with(text, options))
                    .collect()
            }
        }
    }

    fn result(
        run_id: String,
        spec: Specification,
        chosen: Chosen,
        persisted: Option<Persisted>,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> SynthesisResult {
        let (entry_id, artifact_location) = match persisted {
            Some(p) => (Some(p.entry_id), p.artifact_location),
            None => (None, None),
        };
        SynthesisResult {
            run_id,
            spec,
            implementation: chosen.implementation,
            origin: chosen.origin,
            confidence: chosen.confidence,
            persisted: entry_id.is_some(),
            entry_id,
            artifact_location,
            created_at,
        }
    }

    fn fallback(spec: &Specification) -> Chosen {
        Chosen {
            implementation: generate_fallback(spec),
            origin: Origin::Fallback,
            confidence: 0.0,
        }
    }

    /// Walk the priority chain. Never fails.
    fn choose(&self, spec: &Specification) -> Chosen {
        if let Some(matched) = self.matcher.find_match(spec) {
            let implementation = matched.template.render(spec);
            if !self.config.validate_syntax || is_valid_python(&implementation) {
                return Chosen {
                    implementation,
                    origin: Origin::Template,
                    confidence: 1.0,
                };
            }
            warn!(
                template = matched.template.name,
                spec_id = %spec.id,
                "template output failed syntax check"
            );
        }

        if self.config.corpus_search_enabled {
            let bias = self.bias.snapshot();
            match self.synthesizer.synthesize(self.store.as_ref(), spec, &bias) {
                Ok(Some(adaptation)) => {
                    return Chosen {
                        implementation: adaptation.implementation,
                        origin: Origin::CorpusAdapted,
                        confidence: adaptation.confidence,
                    };
                }
                Ok(None) => debug!(spec_id = %spec.id, "no corpus adaptation"),
                Err(e @ SynthError::SynthesisTimeout { .. }) => {
                    warn!(spec_id = %spec.id, error = %e, "corpus search timed out");
                }
                Err(e) => {
                    warn!(spec_id = %spec.id, error = %e, "corpus search failed");
                }
            }
        }

        Self::fallback(spec)
    }

    /// Highest entry id stored for `spec_id`. Entries above it at persist
    /// time were written by runs that raced this one.
    fn entry_watermark(&self, spec_id: &str) -> i64 {
        match self.store.entries_for(spec_id) {
            Ok(entries) => entries.iter().map(|e| e.id).max().unwrap_or(0),
            Err(e) => {
                warn!(spec_id = %spec_id, error = %e, "entry watermark unavailable");
                0
            }
        }
    }

    fn persist(
        &self,
        run_id: &str,
        spec: &Specification,
        chosen: &Chosen,
        watermark: i64,
    ) -> SynthResult<Persisted> {
        let now = now_utc();
        let (entry_id, chosen, journal_records) = {
            let lock = self.spec_lock(&spec.id);
            let _guard = lock.lock();

            self.store.put_specification(spec)?;
            let entries = self.store.entries_for(&spec.id)?;
            let raced = entries.iter().find(|e| e.id > watermark);
            let identical = || {
                entries
                    .iter()
                    .find(|e| e.origin == chosen.origin && e.implementation == chosen.implementation)
            };
            // A placeholder never shadows a real implementation of the same spec.
            let better_than_fallback = || {
                if chosen.origin == Origin::Fallback {
                    entries.iter().find(|e| e.origin != Origin::Fallback)
                } else {
                    None
                }
            };
            match raced.or_else(identical).or_else(better_than_fallback) {
                Some(entry) => {
                    self.store.touch(entry.id, now)?;
                    let reused = if entry.origin == chosen.origin
                        && entry.implementation == chosen.implementation
                    {
                        chosen.clone()
                    } else {
                        debug!(
                            run_id = %run_id,
                            entry_id = entry.id,
                            origin = %entry.origin,
                            "reusing stored entry"
                        );
                        Chosen {
                            implementation: entry.implementation.clone(),
                            origin: entry.origin,
                            confidence: match entry.origin {
                                Origin::Template => 1.0,
                                Origin::Fallback => 0.0,
                                Origin::CorpusAdapted => entry.outcome_score,
                            },
                        }
                    };
                    (entry.id, reused, Vec::new())
                }
                None => {
                    let entry = self.store.put(NewCorpusEntry {
                        spec_id: spec.id.clone(),
                        implementation: chosen.implementation.clone(),
                        origin: chosen.origin,
                        outcome_score: chosen.confidence,
                        created_at: now,
                    })?;
                    (
                        entry.id,
                        chosen.clone(),
                        vec![
                            SnapshotRecord::specification(spec.clone()),
                            SnapshotRecord::corpus_entry(entry),
                        ],
                    )
                }
            }
        };

        let artifact_location = match &self.artifacts {
            Some(artifacts) => match artifacts.write(run_id, &chosen.implementation) {
                Ok(location) => Some(location),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "artifact write failed");
                    None
                }
            },
            None => None,
        };

        self.store.record_run(&RunRecord {
            run_id: run_id.to_string(),
            spec_id: spec.id.clone(),
            entry_id,
            origin: chosen.origin,
            confidence: chosen.confidence,
            artifact_location: artifact_location.clone(),
            created_at: now,
        })?;

        if let Some(journal) = &self.journal {
            if !journal_records.is_empty() {
                if let Err(e) = journal.append(&journal_records) {
                    warn!(path = %journal.path().display(), error = %e, "journal append failed");
                }
            }
        }

        Ok(Persisted {
            entry_id,
            artifact_location,
            chosen,
        })
    }
}
