//! Corpus storage: the `CorpusStore` seam plus SQLite and in-memory backends.
//!
//! Implementations must allow concurrent readers; writers are serialized
//! per Specification id by the orchestrator, so a store only needs each
//! individual call to be atomic.

pub mod database;
pub mod memory;
pub mod schema;
pub mod snapshot;

use chrono::{DateTime, Utc};

use crate::errors::SynthResult;
use crate::models::{
    CorpusEntry, FeedbackRecord, FeedbackSample, NewCorpusEntry, RunRecord, SimilarEntry,
    Specification,
};

pub use database::SqliteCorpusStore;
pub use memory::MemoryCorpusStore;

/// Meta key under which the learning loop snapshots its state.
pub const BIAS_STATE_META_KEY: &str = "bias_state";

/// Repository of specifications, implementations, runs and feedback.
pub trait CorpusStore: Send + Sync {
    /// Insert the spec unless one with the same id exists; never overwrites.
    fn put_specification(&self, spec: &Specification) -> SynthResult<()>;

    fn get_specification(&self, spec_id: &str) -> SynthResult<Option<Specification>>;

    /// Current entry for a spec (best outcome score, then most recent use).
    fn get(&self, spec_id: &str) -> SynthResult<Option<CorpusEntry>>;

    /// All entries for a spec in current-entry order.
    fn entries_for(&self, spec_id: &str) -> SynthResult<Vec<CorpusEntry>>;

    fn put(&self, entry: NewCorpusEntry) -> SynthResult<CorpusEntry>;

    /// Record another use of an existing entry.
    fn touch(&self, entry_id: i64, at: DateTime<Utc>) -> SynthResult<()>;

    fn set_outcome_score(&self, entry_id: i64, score: f64) -> SynthResult<()>;

    /// Current entries of other specs with the same arity and a non-fallback
    /// origin whose description similarity reaches `min_similarity`,
    /// best first, at most `limit`.
    fn find_similar(
        &self,
        spec: &Specification,
        min_similarity: f64,
        limit: usize,
    ) -> SynthResult<Vec<SimilarEntry>>;

    /// Entries of every spec whose canonical signature key equals
    /// `signature_key`, best outcome score first, at most `limit`.
    fn find_by_signature(&self, signature_key: &str, limit: usize) -> SynthResult<Vec<CorpusEntry>>;

    /// Entries across all specs ordered by outcome score, best first.
    fn list_entries(&self, limit: usize) -> SynthResult<Vec<CorpusEntry>>;

    fn list_specifications(&self) -> SynthResult<Vec<Specification>>;

    fn entry_count(&self) -> SynthResult<usize>;

    /// Re-insert an entry verbatim (snapshot import). Returns false when an
    /// entry with the same id already exists.
    fn restore_entry(&self, entry: &CorpusEntry) -> SynthResult<bool>;

    fn record_run(&self, run: &RunRecord) -> SynthResult<()>;

    fn get_run(&self, run_id: &str) -> SynthResult<Option<RunRecord>>;

    /// Append a feedback event and return it with its assigned sequence.
    fn record_feedback(
        &self,
        run_id: &str,
        outcome_score: f64,
        at: DateTime<Utc>,
    ) -> SynthResult<FeedbackRecord>;

    /// The most recent `limit` feedback events with `seq > after_seq`,
    /// returned oldest first.
    fn feedback_since(&self, after_seq: i64, limit: usize) -> SynthResult<Vec<FeedbackSample>>;

    fn get_meta(&self, key: &str) -> SynthResult<Option<String>>;

    fn set_meta(&self, key: &str, value: &str) -> SynthResult<()>;
}

// ---------------------------------------------------------------------------
// Shared ranking for find_similar
// ---------------------------------------------------------------------------

/// Score prefiltered `(spec, current entry)` pairs against `target` by
/// description keyword overlap, keep those at or above `min_similarity`,
/// and return the best `limit`.
pub(crate) fn rank_similar(
    target: &Specification,
    candidates: Vec<(Specification, CorpusEntry)>,
    min_similarity: f64,
    limit: usize,
) -> Vec<SimilarEntry> {
    use crate::intent::tokenizer::keyword_set;
    use crate::synth::scoring::jaccard;

    let target_tokens = keyword_set(&target.description);
    if target_tokens.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<SimilarEntry> = candidates
        .into_iter()
        .filter_map(|(spec, entry)| {
            let similarity = jaccard(&target_tokens, &keyword_set(&spec.description));
            (similarity > 0.0 && similarity >= min_similarity).then_some(SimilarEntry {
                spec,
                entry,
                similarity,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.entry
                    .outcome_score
                    .partial_cmp(&a.entry.outcome_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.entry.last_used_at.cmp(&a.entry.last_used_at))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    ranked.truncate(limit);
    ranked
}
