//! Word tokenization shared by intent extraction, template matching, and
//! corpus similarity.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::normalize_text;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").unwrap());

/// Words that carry no intent on their own.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "to", "for", "of", "with", "by", "from", "in", "on", "at", "me", "you", "i",
    "we", "my", "your", "please", "can", "could", "would", "that", "this", "and", "or", "it",
    "its", "is", "are", "be", "given", "some", "which", "should", "will", "function", "write",
    "create", "make", "return", "returns",
];

/// Words ending in `s` that are not plurals.
const NON_PLURAL_S: &[&str] = &[
    "is", "has", "was", "does", "this", "its", "his", "yes", "less", "class", "pass", "process",
    "address", "access", "analysis", "bus", "gas", "plus", "minus", "status", "cross", "bonus",
    "always", "perhaps", "thus", "as", "us", "focus", "corpus",
];

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Lowercased alphanumeric tokens in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// Tokens with stopwords removed, order preserved.
pub fn significant_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .collect()
}

/// True when `token` looks like a plural noun.
pub fn is_plural(token: &str) -> bool {
    token.len() > 3
        && token.ends_with('s')
        && !token.ends_with("ss")
        && !token.ends_with("us")
        && !token.chars().all(|c| c.is_ascii_digit())
        && !NON_PLURAL_S.contains(&token)
}

/// Naive English singularization: `numbers -> number`, `entries -> entry`,
/// `boxes -> box`. Unknown shapes are returned unchanged.
pub fn singularize(token: &str) -> String {
    if !is_plural(token) {
        return token.to_string();
    }
    if let Some(stem) = token.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["ches", "shes", "xes", "zes", "sses"] {
        if token.ends_with(suffix) {
            return token[..token.len() - 2].to_string();
        }
    }
    token[..token.len() - 1].to_string()
}

/// Singularized significant tokens of the normalized text as a set, used
/// for overlap scoring.
pub fn keyword_set(text: &str) -> BTreeSet<String> {
    significant_tokens(&normalize_text(text))
        .iter()
        .map(|t| singularize(t))
        .collect()
}
