//! Shared guardrails for request payload bounds and search limits.

// Intent analysis
pub const MAX_ANALYSIS_CHARS: usize = 4096;
pub const MAX_NAME_TOKENS: usize = 4;
pub const MAX_NAME_CHARS: usize = 40;

// Corpus-guided search
pub const MAX_BEAM_WIDTH: i64 = 64;
pub const MAX_SEARCH_BUDGET_MS: i64 = 10_000;

// Batch execution and learning
pub const MAX_BATCH_WORKERS: i64 = 64;
pub const MAX_LEARNING_BATCH: i64 = 1024;
pub const MIN_LEARNING_INTERVAL_MS: i64 = 10;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_limit(value: i64, maximum: i64) -> i64 {
    clamp_int(value, 1, maximum)
}

/// Clamp into `[0, 1]`; NaN maps to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Trim and keep at most `max_chars` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    let stripped = text.trim();
    match stripped.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &stripped[..byte_idx],
        None => stripped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_respect_bounds() {
        assert_eq!(clamp_limit(0, 10), 1);
        assert_eq!(clamp_limit(99, 10), 10);
        assert_eq!(clamp_int(-5, -3, 3), -3);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
    }

    #[test]
    fn truncation_is_char_safe() {
        let text = "héllo wörld";
        assert_eq!(truncate_chars(text, 2), "hé");
        assert_eq!(truncate_chars("  short  ", 100), "short");
        let long: String = "€".repeat(5000);
        assert_eq!(truncate_chars(&long, MAX_ANALYSIS_CHARS).chars().count(), MAX_ANALYSIS_CHARS);
    }
}
