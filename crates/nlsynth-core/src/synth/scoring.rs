//! Scoring helpers for template matching and corpus candidate ranking.

use std::collections::BTreeSet;

use crate::models::Specification;
use crate::synth::guards::clamp_unit;

/// Fraction of `pattern` covered by `tokens`. An empty pattern scores 0.
pub fn keyword_overlap(tokens: &BTreeSet<String>, pattern: &[&str]) -> f64 {
    if pattern.is_empty() {
        return 0.0;
    }
    let hits = pattern.iter().filter(|kw| tokens.contains(**kw)).count();
    hits as f64 / pattern.len() as f64
}

/// Jaccard similarity of two token sets; two empty sets score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Fraction of positional parameter types that agree. Arity mismatches
/// score 0; two zero-arity specs agree fully.
pub fn param_type_agreement(target: &Specification, candidate: &Specification) -> f64 {
    if target.arity() != candidate.arity() {
        return 0.0;
    }
    if target.arity() == 0 {
        return 1.0;
    }
    let agreeing = target
        .parameters
        .iter()
        .zip(&candidate.parameters)
        .filter(|(a, b)| a.type_hint == b.type_hint)
        .count();
    agreeing as f64 / target.arity() as f64
}

/// Structural similarity between a target spec and a candidate's spec:
/// description overlap dominates, signature agreement refines.
pub fn structural_similarity(
    target: &Specification,
    candidate: &Specification,
    description_similarity: f64,
) -> f64 {
    let return_match = if target.return_type == candidate.return_type {
        1.0
    } else {
        0.0
    };
    clamp_unit(
        (description_similarity * 0.6)
            + (param_type_agreement(target, candidate) * 0.2)
            + (return_match * 0.2),
    )
}

/// Weighted average of structural similarity and prior outcome, scaled by
/// the learned bias weight for adapted results.
pub fn adaptation_confidence(
    structural: f64,
    outcome_score: f64,
    similarity_weight: f64,
    bias_weight: f64,
) -> f64 {
    let w = clamp_unit(similarity_weight);
    let base = (structural * w) + (clamp_unit(outcome_score) * (1.0 - w));
    clamp_unit(base * bias_weight.max(0.0))
}
