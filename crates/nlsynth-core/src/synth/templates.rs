//! Static template table and keyword-overlap matcher.
//!
//! Templates are plain data: an ordered flat table scored by overlap between
//! the request's keyword set and each template's pattern keywords. Code
//! bodies are parameterized only by `${name}`, the target function name.

use tracing::{debug, trace};

use crate::intent::tokenizer::keyword_set;
use crate::models::Specification;
use crate::synth::scoring::keyword_overlap;

pub const NAME_PLACEHOLDER: &str = "${name}";

/// A pre-written, known-correct implementation pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Template {
    pub id: u32,
    pub version: u32,
    pub name: &'static str,
    pub pattern_keywords: &'static [&'static str],
    pub signature_template: &'static str,
    pub code_template: &'static str,
}

impl Template {
    pub fn render(&self, spec: &Specification) -> String {
        self.code_template.replace(NAME_PLACEHOLDER, &spec.name)
    }

    pub fn render_signature(&self, spec: &Specification) -> String {
        self.signature_template.replace(NAME_PLACEHOLDER, &spec.name)
    }
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

pub static BUILTIN_TEMPLATES: &[Template] = &[
    Template {
        id: 1,
        version: 1,
        name: "reverse_string",
        pattern_keywords: &["reverse", "string"],
        signature_template: "def ${name}(s: str) -> str",
        code_template: r#"def ${name}(s: str) -> str:
    """Return the characters of s in reverse order."""
    return s[::-1]
"#,
    },
    Template {
        id: 2,
        version: 1,
        name: "max_in_list",
        pattern_keywords: &["largest", "list"],
        signature_template: "def ${name}(nums: list) -> int",
        code_template: r#"def ${name}(nums: list) -> int:
    """Return the largest element of nums, or 0 for an empty list."""
    if not nums:
        return 0
    best = nums[0]
    for value in nums[1:]:
        if value > best:
            best = value
    return best
"#,
    },
    Template {
        id: 3,
        version: 1,
        name: "sum_of_squares",
        pattern_keywords: &["sum", "square"],
        signature_template: "def ${name}(nums: list) -> int",
        code_template: r#"def ${name}(nums: list) -> int:
    """Return the sum of the squares of nums."""
    return sum(value * value for value in nums)
"#,
    },
    Template {
        id: 4,
        version: 1,
        name: "add_two_numbers",
        pattern_keywords: &["add", "two", "number"],
        signature_template: "def ${name}(a: int, b: int) -> int",
        code_template: r#"def ${name}(a: int, b: int) -> int:
    """Return a + b."""
    return a + b
"#,
    },
    Template {
        id: 5,
        version: 1,
        name: "factorial",
        pattern_keywords: &["factorial"],
        signature_template: "def ${name}(n: int) -> int",
        code_template: r#"def ${name}(n: int) -> int:
    """Return n! for n >= 0; negative inputs yield 0."""
    if n < 0:
        return 0
    result = 1
    for k in range(2, n + 1):
        result *= k
    return result
"#,
    },
    Template {
        id: 6,
        version: 1,
        name: "is_palindrome",
        pattern_keywords: &["palindrome"],
        signature_template: "def ${name}(s: str) -> bool",
        code_template: r#"def ${name}(s: str) -> bool:
    """Return True if s reads the same forwards and backwards, ignoring case and non-alphanumerics."""
    cleaned = [ch.lower() for ch in s if ch.isalnum()]
    return cleaned == cleaned[::-1]
"#,
    },
    Template {
        id: 7,
        version: 1,
        name: "fibonacci",
        pattern_keywords: &["fibonacci"],
        signature_template: "def ${name}(n: int) -> int",
        code_template: r#"def ${name}(n: int) -> int:
    """Return the n-th Fibonacci number (fib(0) == 0); negative inputs yield 0."""
    if n <= 0:
        return 0
    previous, current = 0, 1
    for _ in range(n - 1):
        previous, current = current, previous + current
    return current
"#,
    },
    Template {
        id: 8,
        version: 1,
        name: "is_prime",
        pattern_keywords: &["prime", "check"],
        signature_template: "def ${name}(n: int) -> bool",
        code_template: r#"def ${name}(n: int) -> bool:
    """Return True if n is a prime number."""
    if n < 2:
        return False
    if n % 2 == 0:
        return n == 2
    k = 3
    while k * k <= n:
        if n % k == 0:
            return False
        k += 2
    return True
"#,
    },
    Template {
        id: 9,
        version: 1,
        name: "sort_list",
        pattern_keywords: &["sort", "list"],
        signature_template: "def ${name}(items: list) -> list",
        code_template: r#"def ${name}(items: list) -> list:
    """Return a new list with the items in ascending order."""
    try:
        return sorted(items)
    except TypeError:
        return sorted(items, key=repr)
"#,
    },
    Template {
        id: 10,
        version: 1,
        name: "count_vowels",
        pattern_keywords: &["count", "vowel"],
        signature_template: "def ${name}(s: str) -> int",
        code_template: r#"def ${name}(s: str) -> int:
    """Return the number of vowels in s."""
    return sum(1 for ch in s.lower() if ch in "aeiou")
"#,
    },
    Template {
        id: 11,
        version: 1,
        name: "gcd",
        pattern_keywords: &["greatest", "common", "divisor"],
        signature_template: "def ${name}(a: int, b: int) -> int",
        code_template: r#"def ${name}(a: int, b: int) -> int:
    """Return the greatest common divisor of a and b."""
    a, b = abs(a), abs(b)
    while b:
        a, b = b, a % b
    return a
"#,
    },
    Template {
        id: 12,
        version: 1,
        name: "gcd_short",
        pattern_keywords: &["gcd"],
        signature_template: "def ${name}(a: int, b: int) -> int",
        code_template: r#"def ${name}(a: int, b: int) -> int:
    """Return gcd(a, b)."""
    a, b = abs(a), abs(b)
    while b:
        a, b = b, a % b
    return a
"#,
    },
    Template {
        id: 13,
        version: 1,
        name: "count_words",
        pattern_keywords: &["count", "word"],
        signature_template: "def ${name}(text: str) -> int",
        code_template: r#"def ${name}(text: str) -> int:
    """Return the number of whitespace-separated words in text."""
    return len(text.split())
"#,
    },
    Template {
        id: 14,
        version: 1,
        name: "average",
        pattern_keywords: &["average", "list"],
        signature_template: "def ${name}(nums: list) -> float",
        code_template: r#"def ${name}(nums: list) -> float:
    """Return the arithmetic mean of nums, or 0.0 for an empty list."""
    if not nums:
        return 0.0
    return sum(nums) / len(nums)
"#,
    },
];

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// A template accepted for a spec, with its overlap score.
#[derive(Clone, Copy, Debug)]
pub struct TemplateMatch {
    pub template: &'static Template,
    pub score: f64,
}

/// Pure matcher over a static table.
#[derive(Clone, Debug)]
pub struct TemplateMatcher {
    templates: &'static [Template],
    threshold: f64,
}

impl TemplateMatcher {
    pub fn new(threshold: f64) -> Self {
        Self::with_table(BUILTIN_TEMPLATES, threshold)
    }

    pub fn with_table(templates: &'static [Template], threshold: f64) -> Self {
        Self {
            templates,
            threshold,
        }
    }

    pub fn templates(&self) -> &'static [Template] {
        self.templates
    }

    /// Best template for `spec`, or `None` when nothing reaches the
    /// threshold. Ties go to the higher score, then the longer keyword set,
    /// then the lowest id.
    pub fn find_match(&self, spec: &Specification) -> Option<TemplateMatch> {
        let tokens = keyword_set(&spec.description);
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<TemplateMatch> = None;
        for template in self.templates {
            let score = keyword_overlap(&tokens, template.pattern_keywords);
            if score < self.threshold {
                continue;
            }
            let candidate = TemplateMatch { template, score };
            best = match best {
                None => Some(candidate),
                Some(current) if Self::outranks(&candidate, &current) => Some(candidate),
                keep => keep,
            };
        }

        match &best {
            Some(m) => debug!(
                spec_id = %spec.id,
                template = m.template.name,
                score = m.score,
                "template matched"
            ),
            None => trace!(spec_id = %spec.id, "no template above threshold"),
        }
        best
    }

    fn outranks(a: &TemplateMatch, b: &TemplateMatch) -> bool {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.template
                    .pattern_keywords
                    .len()
                    .cmp(&b.template.pattern_keywords.len())
            })
            .then_with(|| b.template.id.cmp(&a.template.id))
            .is_gt()
    }
}
