//! Learned selection preferences, one weight per implementation origin.
//!
//! The state is replaced wholesale under a write lock, so readers always see
//! either the previous or the next complete set of weights.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::SynthResult;
use crate::models::Origin;
use crate::store::{CorpusStore, BIAS_STATE_META_KEY};

pub const NEUTRAL_WEIGHT: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasState {
    pub weights: BTreeMap<Origin, f64>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub drift_accumulator: f64,
    pub updates: u64,
}

impl Default for BiasState {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Aggregate view of a state, for logs and status endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasSummary {
    pub mean_weight: f64,
    pub min_weight: f64,
    pub max_weight: f64,
    pub updates: u64,
    pub drift_accumulator: f64,
}

impl BiasState {
    pub fn neutral() -> Self {
        Self {
            weights: Origin::ALL.iter().map(|o| (*o, NEUTRAL_WEIGHT)).collect(),
            last_update_at: None,
            drift_accumulator: 0.0,
            updates: 0,
        }
    }

    pub fn weight(&self, origin: Origin) -> f64 {
        self.weights.get(&origin).copied().unwrap_or(NEUTRAL_WEIGHT)
    }

    pub fn within_bounds(&self, w_min: f64, w_max: f64) -> bool {
        self.weights
            .values()
            .all(|w| w.is_finite() && *w >= w_min && *w <= w_max)
    }

    /// Clamp every weight into `[w_min, w_max]` and fill missing origins.
    pub fn clamped(mut self, w_min: f64, w_max: f64) -> Self {
        for origin in Origin::ALL {
            let w = self.weights.entry(origin).or_insert(NEUTRAL_WEIGHT);
            *w = if w.is_finite() {
                w.clamp(w_min, w_max)
            } else {
                NEUTRAL_WEIGHT
            };
        }
        self
    }

    pub fn summary(&self) -> BiasSummary {
        let values: Vec<f64> = self.weights.values().copied().collect();
        let n = values.len().max(1) as f64;
        BiasSummary {
            mean_weight: values.iter().sum::<f64>() / n,
            min_weight: values.iter().copied().fold(f64::INFINITY, f64::min),
            max_weight: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            updates: self.updates,
            drift_accumulator: self.drift_accumulator,
        }
    }
}

/// Shared handle to the live bias state. Cloning shares the state.
#[derive(Clone, Debug, Default)]
pub struct BiasHandle {
    inner: Arc<RwLock<BiasState>>,
}

impl BiasHandle {
    pub fn new(state: BiasState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> BiasState {
        self.inner.read().clone()
    }

    pub fn weight(&self, origin: Origin) -> f64 {
        self.inner.read().weight(origin)
    }

    /// Install a complete new state. Only the learning loop calls this.
    pub(crate) fn replace(&self, next: BiasState) {
        *self.inner.write() = next;
    }

    /// Load a state snapshotted in the store's meta table, clamped to the
    /// given band. Missing or unreadable snapshots yield a neutral state.
    pub fn load_from(store: &dyn CorpusStore, w_min: f64, w_max: f64) -> SynthResult<Self> {
        let state = match store.get_meta(BIAS_STATE_META_KEY)? {
            Some(raw) => match serde_json::from_str::<BiasState>(&raw) {
                Ok(state) => {
                    debug!(updates = state.updates, "restored bias state");
                    state.clamped(w_min, w_max)
                }
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable bias snapshot");
                    BiasState::neutral()
                }
            },
            None => BiasState::neutral(),
        };
        Ok(Self::new(state))
    }

    pub fn save_to(&self, store: &dyn CorpusStore) -> SynthResult<()> {
        let raw = serde_json::to_string(&self.snapshot())?;
        store.set_meta(BIAS_STATE_META_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCorpusStore;

    #[test]
    fn neutral_state_covers_every_origin() {
        let state = BiasState::neutral();
        for origin in Origin::ALL {
            assert_eq!(state.weight(origin), NEUTRAL_WEIGHT);
        }
        assert!(state.within_bounds(0.1, 3.0));
        let summary = state.summary();
        assert_eq!(summary.mean_weight, 1.0);
        assert_eq!(summary.updates, 0);
    }

    #[test]
    fn clamped_repairs_out_of_band_weights() {
        let mut state = BiasState::neutral();
        state.weights.insert(Origin::Template, 9.0);
        state.weights.insert(Origin::Fallback, f64::NAN);
        state.weights.remove(&Origin::CorpusAdapted);
        let fixed = state.clamped(0.1, 3.0);
        assert_eq!(fixed.weight(Origin::Template), 3.0);
        assert_eq!(fixed.weight(Origin::Fallback), NEUTRAL_WEIGHT);
        assert_eq!(fixed.weights.len(), Origin::ALL.len());
    }

    #[test]
    fn handle_persists_through_store_meta() {
        let store = MemoryCorpusStore::new();
        let handle = BiasHandle::default();
        let mut next = handle.snapshot();
        next.weights.insert(Origin::CorpusAdapted, 1.4);
        next.updates = 3;
        handle.replace(next);
        handle.save_to(&store).unwrap();

        let restored = BiasHandle::load_from(&store, 0.1, 3.0).unwrap();
        assert_eq!(restored.weight(Origin::CorpusAdapted), 1.4);
        assert_eq!(restored.snapshot().updates, 3);

        store.set_meta(BIAS_STATE_META_KEY, "garbage").unwrap();
        let fallback = BiasHandle::load_from(&store, 0.1, 3.0).unwrap();
        assert_eq!(fallback.snapshot(), BiasState::neutral());
    }

    #[test]
    fn clones_share_state() {
        let a = BiasHandle::default();
        let b = a.clone();
        let mut next = a.snapshot();
        next.weights.insert(Origin::Template, 2.0);
        a.replace(next);
        assert_eq!(b.weight(Origin::Template), 2.0);
    }
}
