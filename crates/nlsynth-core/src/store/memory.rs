//! In-memory corpus store, used by tests and ephemeral engines.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::errors::{SynthError, SynthResult};
use crate::models::{
    current_entry_order, CorpusEntry, FeedbackRecord, FeedbackSample, NewCorpusEntry, Origin,
    RunRecord, SimilarEntry, Specification,
};
use crate::store::{rank_similar, CorpusStore};

#[derive(Default)]
struct MemoryState {
    specs: IndexMap<String, Specification>,
    entries: IndexMap<i64, CorpusEntry>,
    runs: IndexMap<String, RunRecord>,
    feedback: Vec<FeedbackRecord>,
    meta: HashMap<String, String>,
    next_entry_id: i64,
    next_seq: i64,
}

impl MemoryState {
    fn entries_for(&self, spec_id: &str) -> Vec<CorpusEntry> {
        let mut out: Vec<CorpusEntry> = self
            .entries
            .values()
            .filter(|e| e.spec_id == spec_id)
            .cloned()
            .collect();
        out.sort_by(current_entry_order);
        out
    }

    fn entry_mut(&mut self, entry_id: i64) -> SynthResult<&mut CorpusEntry> {
        self.entries
            .get_mut(&entry_id)
            .ok_or_else(|| SynthError::Store(format!("no corpus entry with id {entry_id}")))
    }
}

/// Corpus store held behind a single reader/writer lock.
#[derive(Default)]
pub struct MemoryCorpusStore {
    state: RwLock<MemoryState>,
}

impl MemoryCorpusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorpusStore for MemoryCorpusStore {
    fn put_specification(&self, spec: &Specification) -> SynthResult<()> {
        let mut state = self.state.write();
        state
            .specs
            .entry(spec.id.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    fn get_specification(&self, spec_id: &str) -> SynthResult<Option<Specification>> {
        Ok(self.state.read().specs.get(spec_id).cloned())
    }

    fn get(&self, spec_id: &str) -> SynthResult<Option<CorpusEntry>> {
        Ok(self.state.read().entries_for(spec_id).into_iter().next())
    }

    fn entries_for(&self, spec_id: &str) -> SynthResult<Vec<CorpusEntry>> {
        Ok(self.state.read().entries_for(spec_id))
    }

    fn put(&self, entry: NewCorpusEntry) -> SynthResult<CorpusEntry> {
        let mut state = self.state.write();
        if !state.specs.contains_key(&entry.spec_id) {
            return Err(SynthError::Store(format!(
                "unknown specification {}",
                entry.spec_id
            )));
        }
        state.next_entry_id += 1;
        let stored = entry.into_entry(state.next_entry_id);
        state.entries.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn touch(&self, entry_id: i64, at: DateTime<Utc>) -> SynthResult<()> {
        let mut state = self.state.write();
        let entry = state.entry_mut(entry_id)?;
        entry.usage_count += 1;
        entry.last_used_at = at;
        Ok(())
    }

    fn set_outcome_score(&self, entry_id: i64, score: f64) -> SynthResult<()> {
        let mut state = self.state.write();
        state.entry_mut(entry_id)?.outcome_score = score.clamp(0.0, 1.0);
        Ok(())
    }

    fn find_similar(
        &self,
        spec: &Specification,
        min_similarity: f64,
        limit: usize,
    ) -> SynthResult<Vec<SimilarEntry>> {
        let candidates: Vec<(Specification, CorpusEntry)> = {
            let state = self.state.read();
            state
                .specs
                .values()
                .filter(|s| s.id != spec.id && s.arity() == spec.arity())
                .filter_map(|s| {
                    let current = state.entries_for(&s.id).into_iter().next()?;
                    (current.origin != Origin::Fallback).then(|| (s.clone(), current))
                })
                .collect()
        };
        Ok(rank_similar(spec, candidates, min_similarity, limit))
    }

    fn find_by_signature(&self, signature_key: &str, limit: usize) -> SynthResult<Vec<CorpusEntry>> {
        let state = self.state.read();
        let mut out: Vec<CorpusEntry> = state
            .entries
            .values()
            .filter(|e| {
                state
                    .specs
                    .get(&e.spec_id)
                    .is_some_and(|s| s.signature_key() == signature_key)
            })
            .cloned()
            .collect();
        out.sort_by(current_entry_order);
        out.truncate(limit);
        Ok(out)
    }

    fn list_entries(&self, limit: usize) -> SynthResult<Vec<CorpusEntry>> {
        let mut all: Vec<CorpusEntry> = self.state.read().entries.values().cloned().collect();
        all.sort_by(|a, b| {
            b.outcome_score
                .partial_cmp(&a.outcome_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.last_used_at.cmp(&a.last_used_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        all.truncate(limit);
        Ok(all)
    }

    fn list_specifications(&self) -> SynthResult<Vec<Specification>> {
        Ok(self.state.read().specs.values().cloned().collect())
    }

    fn entry_count(&self) -> SynthResult<usize> {
        Ok(self.state.read().entries.len())
    }

    fn restore_entry(&self, entry: &CorpusEntry) -> SynthResult<bool> {
        let mut state = self.state.write();
        if state.entries.contains_key(&entry.id) {
            return Ok(false);
        }
        if !state.specs.contains_key(&entry.spec_id) {
            return Err(SynthError::Store(format!(
                "unknown specification {}",
                entry.spec_id
            )));
        }
        state.next_entry_id = state.next_entry_id.max(entry.id);
        state.entries.insert(entry.id, entry.clone());
        Ok(true)
    }

    fn record_run(&self, run: &RunRecord) -> SynthResult<()> {
        let mut state = self.state.write();
        if state.runs.contains_key(&run.run_id) {
            return Err(SynthError::Store(format!("duplicate run id {}", run.run_id)));
        }
        state.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> SynthResult<Option<RunRecord>> {
        Ok(self.state.read().runs.get(run_id).cloned())
    }

    fn record_feedback(
        &self,
        run_id: &str,
        outcome_score: f64,
        at: DateTime<Utc>,
    ) -> SynthResult<FeedbackRecord> {
        let mut state = self.state.write();
        if !state.runs.contains_key(run_id) {
            return Err(SynthError::Store(format!("unknown run {run_id}")));
        }
        state.next_seq += 1;
        let record = FeedbackRecord {
            seq: state.next_seq,
            run_id: run_id.to_string(),
            outcome_score,
            created_at: at,
        };
        state.feedback.push(record.clone());
        Ok(record)
    }

    fn feedback_since(&self, after_seq: i64, limit: usize) -> SynthResult<Vec<FeedbackSample>> {
        let state = self.state.read();
        let mut out: Vec<FeedbackSample> = state
            .feedback
            .iter()
            .rev()
            .filter(|f| f.seq > after_seq)
            .filter_map(|f| {
                let run = state.runs.get(&f.run_id)?;
                Some(FeedbackSample {
                    seq: f.seq,
                    run_id: f.run_id.clone(),
                    origin: run.origin.as_str().to_string(),
                    outcome_score: f.outcome_score,
                })
            })
            .take(limit)
            .collect();
        out.reverse();
        Ok(out)
    }

    fn get_meta(&self, key: &str) -> SynthResult<Option<String>> {
        Ok(self.state.read().meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> SynthResult<()> {
        self.state
            .write()
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::extract;
    use crate::models::now_utc;

    fn seed(store: &MemoryCorpusStore, text: &str, origin: Origin, score: f64) -> CorpusEntry {
        let spec = extract(text);
        store.put_specification(&spec).unwrap();
        store
            .put(NewCorpusEntry {
                spec_id: spec.id,
                implementation: format!("def {}():\n    return 0\n", spec.name),
                origin,
                outcome_score: score,
                created_at: now_utc(),
            })
            .unwrap()
    }

    #[test]
    fn put_requires_known_specification() {
        let store = MemoryCorpusStore::new();
        let err = store
            .put(NewCorpusEntry {
                spec_id: "nope".into(),
                implementation: String::new(),
                origin: Origin::Fallback,
                outcome_score: 0.0,
                created_at: now_utc(),
            })
            .unwrap_err();
        assert!(err.is_storage());
    }

    #[test]
    fn specs_are_never_overwritten() {
        let store = MemoryCorpusStore::new();
        let spec = extract("reverse a string");
        store.put_specification(&spec).unwrap();
        let mut changed = spec.clone();
        changed.name = "other".into();
        store.put_specification(&changed).unwrap();
        assert_eq!(store.get_specification(&spec.id).unwrap().unwrap().name, spec.name);
    }

    #[test]
    fn find_similar_uses_current_entry_only() {
        let store = MemoryCorpusStore::new();
        let good = seed(&store, "sum the values in a list", Origin::Template, 0.5);
        // A better-scored fallback becomes the current entry and hides the spec.
        store
            .put(NewCorpusEntry {
                spec_id: good.spec_id.clone(),
                implementation: "def x():\n    return 0\n".into(),
                origin: Origin::Fallback,
                outcome_score: 0.9,
                created_at: now_utc(),
            })
            .unwrap();
        let target = extract("sum the numbers in a list");
        assert!(store.find_similar(&target, 0.1, 4).unwrap().is_empty());

        store.set_outcome_score(good.id, 1.0).unwrap();
        let found = store.find_similar(&target, 0.1, 4).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry.id, good.id);
    }

    #[test]
    fn find_by_signature_matches_only_that_key() {
        let store = MemoryCorpusStore::new();
        let reverse = seed(&store, "reverse a string", Origin::Template, 0.7);
        seed(&store, "add two numbers", Origin::Template, 1.0);
        let key = store
            .get_specification(&reverse.spec_id)
            .unwrap()
            .unwrap()
            .signature_key();
        let found = store.find_by_signature(&key, 5).unwrap();
        assert_eq!(found, vec![reverse]);
        assert!(store.find_by_signature(&key, 0).unwrap().is_empty());
    }

    #[test]
    fn feedback_requires_known_run_and_is_windowed() {
        let store = MemoryCorpusStore::new();
        let entry = seed(&store, "reverse a string", Origin::Template, 1.0);
        assert!(store.record_feedback("ghost", 0.5, now_utc()).is_err());
        store
            .record_run(&RunRecord {
                run_id: "r".into(),
                spec_id: entry.spec_id.clone(),
                entry_id: entry.id,
                origin: Origin::Template,
                confidence: 1.0,
                artifact_location: None,
                created_at: now_utc(),
            })
            .unwrap();
        for score in [0.1, 0.2, 0.3] {
            store.record_feedback("r", score, now_utc()).unwrap();
        }
        let window = store.feedback_since(0, 2).unwrap();
        assert_eq!(window.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.feedback_since(3, 10).unwrap().len(), 0);
    }

    #[test]
    fn restore_keeps_ids_and_advances_counter() {
        let store = MemoryCorpusStore::new();
        let spec = extract("add two numbers");
        store.put_specification(&spec).unwrap();
        let restored = NewCorpusEntry {
            spec_id: spec.id.clone(),
            implementation: "def a():\n    return 1\n".into(),
            origin: Origin::Template,
            outcome_score: 1.0,
            created_at: now_utc(),
        }
        .into_entry(41);
        assert!(store.restore_entry(&restored).unwrap());
        assert!(!store.restore_entry(&restored).unwrap());
        let next = seed(&store, "add two numbers", Origin::Template, 0.5);
        assert_eq!(next.id, 42);
    }
}
