//! Shared typed models used across intent analysis, synthesis, storage, and
//! the learning loop.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Contract constants
// ---------------------------------------------------------------------------

/// Version stamped on every JSONL snapshot record.
pub const SNAPSHOT_SCHEMA_VERSION: i64 = 1;

/// Length of the hex prefix used as a Specification id.
pub const SPEC_ID_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 hex digest of `input`.
pub fn content_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Specification id: first 16 hex chars of the digest of the normalized text.
pub fn spec_id_for(text: &str) -> String {
    normalized_spec_id(&normalize_text(text))
}

/// Id for text that has already been through [`normalize_text`].
pub fn normalized_spec_id(normalized: &str) -> String {
    let digest = content_hash(normalized);
    digest[..SPEC_ID_LEN].to_string()
}

/// CRC32 of an implementation body, stored alongside corpus entries.
pub fn implementation_checksum(implementation: &str) -> u32 {
    crc32fast::hash(implementation.as_bytes())
}

/// Current UTC time truncated to microseconds so it survives a round trip
/// through the SQLite text representation unchanged.
pub fn now_utc() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// TypeHint
// ---------------------------------------------------------------------------

/// Coarse type lattice inferred from natural language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeHint {
    Int,
    Float,
    String,
    Bool,
    List,
    Any,
}

impl TypeHint {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeHint::Int => "int",
            TypeHint::Float => "float",
            TypeHint::String => "string",
            TypeHint::Bool => "bool",
            TypeHint::List => "list",
            TypeHint::Any => "any",
        }
    }

    /// Annotation used in emitted Python source.
    pub fn python_annotation(self) -> &'static str {
        match self {
            TypeHint::Int => "int",
            TypeHint::Float => "float",
            TypeHint::String => "str",
            TypeHint::Bool => "bool",
            TypeHint::List => "list",
            TypeHint::Any => "Any",
        }
    }

    /// Python literal returned by placeholder implementations.
    pub fn default_literal(self) -> &'static str {
        match self {
            TypeHint::Int => "0",
            TypeHint::Float => "0.0",
            TypeHint::String => "\"\"",
            TypeHint::Bool => "False",
            TypeHint::List => "[]",
            TypeHint::Any => "None",
        }
    }

    /// Single-letter code used by signature keys.
    pub fn canonical_code(self) -> char {
        match self {
            TypeHint::Int => 'I',
            TypeHint::Float => 'F',
            TypeHint::String => 'S',
            TypeHint::Bool => 'B',
            TypeHint::List => 'L',
            TypeHint::Any => 'A',
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeHint {
    type Err = String;

    /// Accepts both the lattice names and Python annotations (`str`,
    /// `list[int]`, `Any`, ...).
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_lowercase();
        let base = lowered.split('[').next().unwrap_or("").trim();
        match base {
            "int" | "integer" => Ok(TypeHint::Int),
            "float" | "double" => Ok(TypeHint::Float),
            "string" | "str" => Ok(TypeHint::String),
            "bool" | "boolean" => Ok(TypeHint::Bool),
            "list" | "sequence" => Ok(TypeHint::List),
            "any" | "" => Ok(TypeHint::Any),
            other => Err(format!("unknown type hint: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Specification
// ---------------------------------------------------------------------------

/// A single named, typed parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: TypeHint,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_hint: TypeHint) -> Self {
        Self {
            name: name.into(),
            type_hint,
        }
    }
}

/// Structured description of a desired function. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub id: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeHint,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Specification {
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Python header line, e.g. `def add_a1b2c3(a: int, b: int) -> int:`.
    pub fn python_header(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.type_hint.python_annotation()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "def {}({}) -> {}:",
            self.name,
            params,
            self.return_type.python_annotation()
        )
    }

    /// True when the header annotation needs `from typing import Any`.
    pub fn uses_any(&self) -> bool {
        self.return_type == TypeHint::Any
            || self.parameters.iter().any(|p| p.type_hint == TypeHint::Any)
    }

    pub fn signature_key(&self) -> String {
        let types: Vec<TypeHint> = self.parameters.iter().map(|p| p.type_hint).collect();
        normalize_signature(&self.name, &types, self.return_type)
    }
}

/// Canonical signature key such as `reverse_string(S)->S`.
pub fn normalize_signature(name: &str, params: &[TypeHint], return_type: TypeHint) -> String {
    let codes: Vec<String> = params
        .iter()
        .map(|hint| hint.canonical_code().to_string())
        .collect();
    format!(
        "{}({})->{}",
        name.trim(),
        codes.join(","),
        return_type.canonical_code()
    )
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Which pipeline stage produced an implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Template,
    CorpusAdapted,
    Fallback,
}

impl Origin {
    pub const ALL: [Origin; 3] = [Origin::Template, Origin::CorpusAdapted, Origin::Fallback];

    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Template => "template",
            Origin::CorpusAdapted => "corpus_adapted",
            Origin::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "template" => Ok(Origin::Template),
            "corpus_adapted" => Ok(Origin::CorpusAdapted),
            "fallback" => Ok(Origin::Fallback),
            other => Err(format!("unknown origin: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Corpus records
// ---------------------------------------------------------------------------

/// A stored implementation for a Specification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: i64,
    pub spec_id: String,
    pub implementation: String,
    pub origin: Origin,
    pub outcome_score: f64,
    pub usage_count: i64,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub checksum: u32,
}

impl CorpusEntry {
    pub fn checksum_matches(&self) -> bool {
        self.checksum == implementation_checksum(&self.implementation)
    }
}

/// Insert payload for a new corpus entry; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewCorpusEntry {
    pub spec_id: String,
    pub implementation: String,
    pub origin: Origin,
    pub outcome_score: f64,
    pub created_at: DateTime<Utc>,
}

impl NewCorpusEntry {
    pub fn into_entry(self, id: i64) -> CorpusEntry {
        let checksum = implementation_checksum(&self.implementation);
        CorpusEntry {
            id,
            spec_id: self.spec_id,
            implementation: self.implementation,
            origin: self.origin,
            outcome_score: self.outcome_score.clamp(0.0, 1.0),
            usage_count: 1,
            last_used_at: self.created_at,
            created_at: self.created_at,
            checksum,
        }
    }
}

/// A prior entry considered for adaptation, with its own specification.
#[derive(Clone, Debug)]
pub struct SimilarEntry {
    pub spec: Specification,
    pub entry: CorpusEntry,
    pub similarity: f64,
}

/// Ordering used to pick the current entry for a spec: highest outcome
/// score, then most recent use, then highest id.
pub fn current_entry_order(a: &CorpusEntry, b: &CorpusEntry) -> std::cmp::Ordering {
    b.outcome_score
        .partial_cmp(&a.outcome_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.last_used_at.cmp(&a.last_used_at))
        .then_with(|| b.id.cmp(&a.id))
}

// ---------------------------------------------------------------------------
// Synthesis results and audit trail
// ---------------------------------------------------------------------------

/// Outcome of one orchestrator run. Immutable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub run_id: String,
    pub spec: Specification,
    pub implementation: String,
    pub origin: Origin,
    pub confidence: f64,
    pub entry_id: Option<i64>,
    pub artifact_location: Option<String>,
    pub persisted: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted audit-trail row for a synthesis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub spec_id: String,
    pub entry_id: i64,
    pub origin: Origin,
    pub confidence: f64,
    pub artifact_location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored feedback event. `seq` is monotonic across the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub seq: i64,
    pub run_id: String,
    pub outcome_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Feedback event joined with the run it refers to, as sampled by the
/// learning loop. The origin stays raw so malformed rows can be skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedbackSample {
    pub seq: i64,
    pub run_id: String,
    pub origin: String,
    pub outcome_score: f64,
}
