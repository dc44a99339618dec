//! Corpus-guided synthesis: adapt the closest prior implementations to a new
//! specification.
//!
//! The search is a bounded beam over at most `beam_width` candidates from
//! `CorpusStore::find_similar`. Each candidate is retargeted (function and
//! parameters renamed, header rewritten with the new types), scored, and
//! the best one at or above the confidence floor wins. The wall-clock budget
//! is checked before each candidate; running out aborts the search.

use std::cmp::Ordering;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, trace};

use crate::config::SynthConfig;
use crate::errors::{SynthError, SynthResult};
use crate::learn::bias::BiasState;
use crate::models::{Origin, SimilarEntry, Specification};
use crate::store::CorpusStore;
use crate::synth::scoring::{adaptation_confidence, structural_similarity};
use crate::synth::syntax::is_valid_python;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^def[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]*\(([^)]*)\)[ \t]*(?:->[ \t]*([^:\n]+?))?[ \t]*:")
        .unwrap()
});

pub const PROVENANCE_PREFIX: &str = "# adapted from corpus entry";

/// A successful adaptation.
#[derive(Clone, Debug, PartialEq)]
pub struct Adaptation {
    pub implementation: String,
    pub confidence: f64,
    pub similarity: f64,
    pub source_entry_id: i64,
    pub source_spec_id: String,
    pub source_origin: Origin,
}

/// Bounded adaptation search over the corpus.
#[derive(Clone, Debug)]
pub struct CorpusGuidedSynthesizer {
    pub similarity_threshold: f64,
    pub beam_width: usize,
    pub confidence_floor: f64,
    pub similarity_weight: f64,
    pub budget: Duration,
    pub validate_syntax: bool,
}

impl CorpusGuidedSynthesizer {
    pub fn from_config(cfg: &SynthConfig) -> Self {
        Self {
            similarity_threshold: cfg.similarity_threshold,
            beam_width: cfg.beam_width,
            confidence_floor: cfg.confidence_floor,
            similarity_weight: cfg.similarity_weight,
            budget: Duration::from_millis(cfg.search_budget_ms),
            validate_syntax: cfg.validate_syntax,
        }
    }

    /// Best adaptation for `spec`, `Ok(None)` on a miss, or
    /// `SynthesisTimeout` when the budget runs out mid-search.
    pub fn synthesize(
        &self,
        store: &dyn CorpusStore,
        spec: &Specification,
        bias: &BiasState,
    ) -> SynthResult<Option<Adaptation>> {
        let started = Instant::now();
        let candidates =
            store.find_similar(spec, self.similarity_threshold, self.beam_width)?;
        if candidates.is_empty() {
            trace!(spec_id = %spec.id, "no corpus candidates");
            return Ok(None);
        }

        let adapted_weight = bias.weight(Origin::CorpusAdapted);
        let mut best: Option<Adaptation> = None;
        let mut best_candidate: Option<&SimilarEntry> = None;

        for candidate in candidates.iter().take(self.beam_width) {
            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                return Err(SynthError::SynthesisTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    budget_ms: self.budget.as_millis() as u64,
                });
            }

            let Some(implementation) = retarget(&candidate.entry.implementation, spec) else {
                trace!(entry_id = candidate.entry.id, "candidate header not adaptable");
                continue;
            };
            let implementation = with_provenance(&implementation, candidate.entry.id);
            if self.validate_syntax && !is_valid_python(&implementation) {
                debug!(entry_id = candidate.entry.id, "adapted candidate failed syntax check");
                continue;
            }

            let structural = structural_similarity(spec, &candidate.spec, candidate.similarity);
            let confidence = adaptation_confidence(
                structural,
                candidate.entry.outcome_score,
                self.similarity_weight,
                adapted_weight,
            );
            let adaptation = Adaptation {
                implementation,
                confidence,
                similarity: candidate.similarity,
                source_entry_id: candidate.entry.id,
                source_spec_id: candidate.spec.id.clone(),
                source_origin: candidate.entry.origin,
            };

            let replace = match (&best, best_candidate) {
                (Some(current), Some(current_candidate)) => {
                    compare_candidates(&adaptation, candidate, current, current_candidate, bias)
                        == Ordering::Greater
                }
                _ => true,
            };
            if replace {
                best = Some(adaptation);
                best_candidate = Some(candidate);
            }
        }

        match best {
            Some(adaptation) if adaptation.confidence >= self.confidence_floor => {
                debug!(
                    spec_id = %spec.id,
                    source_entry = adaptation.source_entry_id,
                    confidence = adaptation.confidence,
                    "corpus adaptation selected"
                );
                Ok(Some(adaptation))
            }
            Some(adaptation) => {
                trace!(
                    spec_id = %spec.id,
                    confidence = adaptation.confidence,
                    floor = self.confidence_floor,
                    "best adaptation below floor"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Higher confidence wins; ties go to the origin the learned bias prefers,
/// then the better outcome score, then the more recent use, then the lower
/// entry id.
fn compare_candidates(
    a: &Adaptation,
    a_src: &SimilarEntry,
    b: &Adaptation,
    b_src: &SimilarEntry,
    bias: &BiasState,
) -> Ordering {
    a.confidence
        .partial_cmp(&b.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            bias.weight(a_src.entry.origin)
                .partial_cmp(&bias.weight(b_src.entry.origin))
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| {
            a_src
                .entry
                .outcome_score
                .partial_cmp(&b_src.entry.outcome_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a_src.entry.last_used_at.cmp(&b_src.entry.last_used_at))
        .then_with(|| b_src.entry.id.cmp(&a_src.entry.id))
}

// ---------------------------------------------------------------------------
// Retargeting
// ---------------------------------------------------------------------------

/// Split a parameter list on top-level commas and keep the bare names.
fn parameter_names(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in raw.chars() {
        match ch {
            '[' | '(' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
        .iter()
        .map(|p| {
            p.split([':', '='])
                .next()
                .unwrap_or("")
                .trim()
                .trim_start_matches('*')
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Replace every identifier equal to `from` with `to`.
fn replace_word(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut ident = String::new();
    let flush = |ident: &mut String, out: &mut String| {
        if ident.as_str() == from {
            out.push_str(to);
        } else {
            out.push_str(ident.as_str());
        }
        ident.clear();
    };
    for ch in text.chars() {
        if is_ident_char(ch) {
            ident.push(ch);
        } else {
            flush(&mut ident, &mut out);
            out.push(ch);
        }
    }
    flush(&mut ident, &mut out);
    out
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|ch: char| !is_ident_char(ch)).any(|part| part == word)
}

/// Rewrite the first top-level `def` in `source` so it implements `target`:
/// rename the function and its parameters throughout, and re-annotate the
/// header with the target's types. Returns `None` when the source has no
/// parsable header or its arity differs from the target's.
pub fn retarget(source: &str, target: &Specification) -> Option<String> {
    let caps = HEADER_RE.captures(source)?;
    let whole = caps.get(0)?;
    let old_name = caps.get(1)?.as_str();
    let old_params = parameter_names(caps.get(2)?.as_str());
    if old_params.len() != target.arity() {
        return None;
    }

    let prefix = &source[..whole.start()];
    let mut body = source[whole.end()..].to_string();

    // Two-phase rename so swaps like (a, b) -> (b, a) cannot collide.
    let mut final_names = Vec::with_capacity(old_params.len());
    for (idx, (old, param)) in old_params.iter().zip(&target.parameters).enumerate() {
        let new = param.name.as_str();
        let clashes =
            old != new && !old_params.iter().any(|p| p == new) && contains_word(&body, new);
        let chosen = if clashes { old.as_str() } else { new };
        body = replace_word(&body, old, &format!("__nlsynth_param_{idx}__"));
        final_names.push(chosen.to_string());
    }
    for (idx, name) in final_names.iter().enumerate() {
        body = replace_word(&body, &format!("__nlsynth_param_{idx}__"), name);
    }
    body = replace_word(&body, old_name, &target.name);

    let params = final_names
        .iter()
        .zip(&target.parameters)
        .map(|(name, p)| format!("{name}: {}", p.type_hint.python_annotation()))
        .collect::<Vec<_>>()
        .join(", ");
    let header = format!(
        "def {}({}) -> {}:",
        target.name,
        params,
        target.return_type.python_annotation()
    );

    let prefix = replace_word(prefix, old_name, &target.name);
    let mut out = String::new();
    if target.uses_any() && !prefix.contains("from typing import Any") {
        out.push_str("from typing import Any\n\n\n");
    }
    out.push_str(&prefix);
    out.push_str(&header);
    out.push_str(&body);
    Some(out)
}

/// Replace any earlier provenance line with one naming `entry_id`.
fn with_provenance(source: &str, entry_id: i64) -> String {
    let mut out = String::with_capacity(source.len() + 40);
    let mut placed = false;
    for line in source.split_inclusive('\n') {
        if line.starts_with(PROVENANCE_PREFIX) {
            continue;
        }
        if !placed && line.starts_with("def ") {
            out.push_str(&format!("{PROVENANCE_PREFIX} {entry_id}\n"));
            placed = true;
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::extract;
    use crate::models::{now_utc, NewCorpusEntry, Parameter, TypeHint};
    use crate::store::MemoryCorpusStore;

    fn synthesizer() -> CorpusGuidedSynthesizer {
        CorpusGuidedSynthesizer::from_config(&SynthConfig {
            search_budget_ms: 5_000,
            ..SynthConfig::default()
        })
    }

    fn seed(store: &MemoryCorpusStore, text: &str, code: &str, origin: Origin, score: f64) -> i64 {
        let spec = extract(text);
        store.put_specification(&spec).unwrap();
        store
            .put(NewCorpusEntry {
                spec_id: spec.id.clone(),
                implementation: code.replace("${name}", &spec.name),
                origin,
                outcome_score: score,
                created_at: now_utc(),
            })
            .unwrap()
            .id
    }

    const SUM_LIST: &str = "def ${name}(nums: list) -> int:\n    \"\"\"Sum nums.\"\"\"\n    total = 0\n    for v in nums:\n        total += v\n    return total\n";

    #[test]
    fn parameter_names_handles_nested_annotations() {
        assert_eq!(
            parameter_names("a: dict[str, int], *args, b=3, **kw"),
            vec!["a", "args", "b", "kw"]
        );
        assert!(parameter_names("  ").is_empty());
    }

    #[test]
    fn retarget_renames_function_and_parameters() {
        let spec = Specification {
            id: "t".into(),
            name: "sum_prices_abc123".into(),
            parameters: vec![Parameter::new("items", TypeHint::List)],
            return_type: TypeHint::Float,
            description: "sum prices".into(),
            created_at: now_utc(),
        };
        let source = "def total_of(nums: list[int]) -> int:\n    return sum(nums) if nums else total_of([0])\n";
        let out = retarget(source, &spec).unwrap();
        assert!(out.starts_with("def sum_prices_abc123(items: list) -> float:\n"));
        assert!(out.contains("sum(items) if items else sum_prices_abc123([0])"));
        assert!(!out.contains("nums"));
        assert!(is_valid_python(&out));
    }

    #[test]
    fn retarget_keeps_name_that_would_collide() {
        let spec = Specification {
            id: "t".into(),
            name: "g".into(),
            parameters: vec![Parameter::new("items", TypeHint::List)],
            return_type: TypeHint::Int,
            description: String::new(),
            created_at: now_utc(),
        };
        let source = "def f(xs: list) -> int:\n    items = len(xs)\n    return items\n";
        let out = retarget(source, &spec).unwrap();
        assert!(out.starts_with("def g(xs: list) -> int:"));
        assert!(out.contains("items = len(xs)"));
    }

    #[test]
    fn retarget_rejects_arity_mismatch_and_garbage() {
        let spec = extract("add two numbers");
        assert!(retarget("def f(x):\n    return x\n", &spec).is_none());
        assert!(retarget("not python at all", &spec).is_none());
    }

    #[test]
    fn retarget_adds_any_import() {
        let spec = Specification {
            id: "t".into(),
            name: "h".into(),
            parameters: vec![Parameter::new("value", TypeHint::Any)],
            return_type: TypeHint::Any,
            description: String::new(),
            created_at: now_utc(),
        };
        let out = retarget("def f(v):\n    return v\n", &spec).unwrap();
        assert!(out.starts_with("from typing import Any\n"));
        assert!(out.contains("def h(value: Any) -> Any:\n    return value\n"));
    }

    #[test]
    fn adapts_similar_entry() {
        let store = MemoryCorpusStore::new();
        let source_id = seed(&store, "compute the sum of a list of numbers", SUM_LIST, Origin::Template, 1.0);
        let spec = extract("compute the sum of a list of prices");
        let adaptation = synthesizer()
            .synthesize(&store, &spec, &BiasState::neutral())
            .unwrap()
            .unwrap();
        assert_eq!(adaptation.source_entry_id, source_id);
        assert!(adaptation.confidence >= 0.35 && adaptation.confidence <= 1.0);
        assert!(adaptation
            .implementation
            .contains(&format!("def {}(items: list) -> int:", spec.name)));
        assert!(adaptation
            .implementation
            .starts_with(&format!("{PROVENANCE_PREFIX} {source_id}\n")));
        assert!(is_valid_python(&adaptation.implementation));
    }

    #[test]
    fn empty_store_and_low_similarity_miss() {
        let store = MemoryCorpusStore::new();
        let spec = extract("compute the sum of a list of prices");
        assert!(synthesizer()
            .synthesize(&store, &spec, &BiasState::neutral())
            .unwrap()
            .is_none());

        seed(&store, "tokenize a list of sentences into words", SUM_LIST, Origin::Template, 1.0);
        assert!(synthesizer()
            .synthesize(&store, &spec, &BiasState::neutral())
            .unwrap()
            .is_none());
    }

    #[test]
    fn low_bias_weight_pushes_below_floor() {
        let store = MemoryCorpusStore::new();
        seed(&store, "compute the sum of a list of numbers", SUM_LIST, Origin::Template, 0.2);
        let spec = extract("compute the sum of a list of prices");
        let mut bias = BiasState::neutral();
        bias.weights.insert(Origin::CorpusAdapted, 0.1);
        assert!(synthesizer().synthesize(&store, &spec, &bias).unwrap().is_none());
    }

    #[test]
    fn zero_budget_times_out_when_candidates_exist() {
        let store = MemoryCorpusStore::new();
        seed(&store, "compute the sum of a list of numbers", SUM_LIST, Origin::Template, 1.0);
        let spec = extract("compute the sum of a list of prices");
        let synth = CorpusGuidedSynthesizer {
            budget: Duration::ZERO,
            ..synthesizer()
        };
        let err = synth
            .synthesize(&store, &spec, &BiasState::neutral())
            .unwrap_err();
        assert!(matches!(err, SynthError::SynthesisTimeout { .. }));
    }

    #[test]
    fn equal_confidence_prefers_biased_origin() {
        let store = MemoryCorpusStore::new();
        let template_id = seed(&store, "compute the sum of a list of numbers", SUM_LIST, Origin::Template, 1.0);
        let adapted_id = seed(&store, "compute the sum of a list of values", SUM_LIST, Origin::CorpusAdapted, 1.0);
        let spec = extract("compute the sum of a list of prices");

        let mut bias = BiasState::neutral();
        bias.weights.insert(Origin::Template, 2.0);
        let pick = synthesizer().synthesize(&store, &spec, &bias).unwrap().unwrap();
        assert_eq!(pick.source_entry_id, template_id);

        bias.weights.insert(Origin::Template, 0.5);
        let pick = synthesizer().synthesize(&store, &spec, &bias).unwrap().unwrap();
        assert_eq!(pick.source_entry_id, adapted_id);
    }

    #[test]
    fn provenance_line_is_replaced_not_stacked() {
        let once = with_provenance("def f():\n    return 1\n", 3);
        let twice = with_provenance(&once, 7);
        assert_eq!(twice, format!("{PROVENANCE_PREFIX} 7\ndef f():\n    return 1\n"));
    }
}
