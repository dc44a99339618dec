//! Heuristic conversion of a free-text request into a [`Specification`].
//!
//! Extraction is deterministic and total: every field except the description
//! is a function of the normalized text alone, and no input makes it fail.
//! Text that carries no usable words produces a placeholder spec with zero
//! parameters.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::errors::SynthError;
use crate::intent::tokenizer::{is_plural, is_stopword, tokenize};
use crate::models::{normalize_text, normalized_spec_id, now_utc, Parameter, Specification, TypeHint};
use crate::synth::guards::{truncate_chars, MAX_ANALYSIS_CHARS, MAX_NAME_CHARS, MAX_NAME_TOKENS};

static FLOAT_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.\d+").unwrap());

const NAME_HASH_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Cue vocabularies
// ---------------------------------------------------------------------------

const LIST_WORDS: &[&str] = &[
    "list", "lists", "array", "arrays", "sequence", "sequences", "collection", "items", "elements",
    "values", "vector",
];
const PAIR_WORDS: &[&str] = &["two", "both", "pair", "2"];
const STRING_WORDS: &[&str] = &[
    "string", "strings", "text", "word", "words", "sentence", "str", "character", "characters",
    "letter", "letters", "phrase", "name", "vowel", "vowels", "palindrome",
];
const NUMERIC_WORDS: &[&str] = &[
    "number", "numbers", "integer", "integers", "int", "digit", "digits", "n", "factorial",
    "fibonacci", "prime", "square", "squares",
];
const FLOAT_WORDS: &[&str] = &[
    "float", "floats", "decimal", "decimals", "real", "fraction", "average", "mean", "ratio",
    "percentage", "celsius", "fahrenheit",
];
const BOOL_WORDS: &[&str] = &["boolean", "booleans", "bool", "flag", "flags"];

const LIST_VERBS: &[&str] = &["list", "filter", "sort", "collect", "split", "flatten", "dedupe"];
const BOOL_LEADS: &[&str] = &[
    "is", "are", "check", "checks", "validate", "verify", "whether", "has", "contains", "determine",
    "does",
];
const BOOL_ANYWHERE: &[&str] = &["check", "validate", "verify", "whether"];
const NUMERIC_STEMS: &[&str] = &[
    "count", "find", "calculat", "comput", "sum", "total", "add", "multiply", "product",
    "largest", "smallest", "max", "min", "how", "factorial", "fibonacci", "gcd", "average", "mean",
];

fn contains_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.as_str()))
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Convert free text into a Specification. Never fails.
pub fn extract(text: &str) -> Specification {
    // Every derived field reads the normalized text, the same string the id
    // hashes, so one id never maps to two different specifications.
    let normalized = normalize_text(text);
    let id = normalized_spec_id(&normalized);
    let hash_suffix = id[..NAME_HASH_LEN].to_string();

    let analysis = truncate_chars(&normalized, MAX_ANALYSIS_CHARS);
    let tokens = tokenize(analysis);
    let significant: Vec<String> = tokens
        .iter()
        .filter(|t| !is_stopword(t))
        .cloned()
        .collect();

    if significant.is_empty() {
        let err = SynthError::InvalidInput(format!(
            "no usable words in {} chars of input",
            text.chars().count()
        ));
        debug!(spec_id = %id, error = %err, "placeholder specification");
        return Specification {
            id,
            name: format!("synthesized_function_{hash_suffix}"),
            parameters: Vec::new(),
            return_type: TypeHint::String,
            description: text.to_string(),
            created_at: now_utc(),
        };
    }

    let name = derive_name(&significant, &hash_suffix);
    let parameters = infer_parameters(&tokens, analysis);
    let return_type = infer_return_type(&tokens, analysis, &parameters);

    debug!(
        spec_id = %id,
        name = %name,
        arity = parameters.len(),
        return_type = %return_type,
        "extracted specification"
    );

    Specification {
        id,
        name,
        parameters,
        return_type,
        description: text.to_string(),
        created_at: now_utc(),
    }
}

/// Slug of the first few significant tokens plus a short hash suffix.
fn derive_name(significant: &[String], hash_suffix: &str) -> String {
    let mut base = significant
        .iter()
        .take(MAX_NAME_TOKENS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("_");
    if base.len() > MAX_NAME_CHARS {
        // Tokens are ASCII, so byte truncation is char-safe.
        base.truncate(MAX_NAME_CHARS);
        while base.ends_with('_') {
            base.pop();
        }
    }
    if base.starts_with(|c: char| c.is_ascii_digit()) {
        base = format!("fn_{base}");
    }
    format!("{base}_{hash_suffix}")
}

fn infer_parameters(tokens: &[String], analysis: &str) -> Vec<Parameter> {
    let has_digit_token = tokens.iter().any(|t| t.chars().all(|c| c.is_ascii_digit()));
    let float_cue = contains_any(tokens, FLOAT_WORDS) || FLOAT_LITERAL_RE.is_match(analysis);
    let numeric_cue = contains_any(tokens, NUMERIC_WORDS) || has_digit_token;
    let pair_cue = contains_any(tokens, PAIR_WORDS);

    if contains_any(tokens, LIST_WORDS) {
        return vec![Parameter::new("items", TypeHint::List)];
    }
    if pair_cue && (numeric_cue || float_cue) {
        let hint = if float_cue { TypeHint::Float } else { TypeHint::Int };
        return vec![Parameter::new("a", hint), Parameter::new("b", hint)];
    }
    if contains_any(tokens, STRING_WORDS) {
        return vec![Parameter::new("text", TypeHint::String)];
    }
    if tokens.iter().any(|t| !is_stopword(t) && is_plural(t)) {
        return vec![Parameter::new("items", TypeHint::List)];
    }
    if float_cue {
        return vec![Parameter::new("x", TypeHint::Float)];
    }
    if numeric_cue {
        return vec![Parameter::new("n", TypeHint::Int)];
    }
    if contains_any(tokens, BOOL_WORDS) {
        return vec![Parameter::new("flag", TypeHint::Bool)];
    }
    vec![Parameter::new("value", TypeHint::Any)]
}

fn infer_return_type(tokens: &[String], analysis: &str, parameters: &[Parameter]) -> TypeHint {
    let find_all = tokens.windows(2).any(|w| w[0] == "find" && w[1] == "all");
    let first_significant = tokens.iter().find(|t| !is_stopword(t));
    let leads_with_list_verb = first_significant
        .map(|t| LIST_VERBS.contains(&t.as_str()))
        .unwrap_or(false);
    if find_all || leads_with_list_verb {
        return TypeHint::List;
    }

    let leads_with_bool = tokens
        .first()
        .map(|t| BOOL_LEADS.contains(&t.as_str()))
        .unwrap_or(false);
    if leads_with_bool || contains_any(tokens, BOOL_ANYWHERE) {
        return TypeHint::Bool;
    }

    let numeric_verb = tokens
        .iter()
        .any(|t| NUMERIC_STEMS.iter().any(|stem| t.starts_with(stem)));
    if numeric_verb {
        let float_cue = contains_any(tokens, FLOAT_WORDS) || FLOAT_LITERAL_RE.is_match(analysis);
        return if float_cue { TypeHint::Float } else { TypeHint::Int };
    }

    match parameters.first().map(|p| p.type_hint) {
        Some(hint) if hint != TypeHint::Any => hint,
        _ => TypeHint::String,
    }
}
