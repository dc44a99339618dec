//! Placeholder generator used when no template or corpus adaptation applies.
//!
//! Output is a syntactically valid, type-annotated Python function for every
//! Specification: the description is escaped into a docstring and the body
//! returns the default value of the declared return type.

use crate::models::Specification;

/// Marker line that identifies placeholder bodies.
pub const PLACEHOLDER_MARKER: &str = "# nlsynth: placeholder implementation";

/// Escape arbitrary text for a double-quoted Python docstring line.
///
/// Backslashes and quotes are escaped; control characters (including
/// newlines, tabs and Unicode line separators) become `\xNN` / `\uNNNN`
/// escapes so the docstring stays on one physical line.
pub fn escape_docstring(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if c.is_control() || matches!(c, '\u{2028}' | '\u{2029}' | '\u{85}') => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Render the placeholder implementation for `spec`.
pub fn generate_fallback(spec: &Specification) -> String {
    let mut code = String::new();
    if spec.uses_any() {
        code.push_str("from typing import Any\n\n\n");
    }
    code.push_str(&spec.python_header());
    code.push('\n');
    code.push_str(&format!(
        "    \"\"\"Placeholder for: {} \"\"\"\n",
        escape_docstring(&spec.description)
    ));
    code.push_str(&format!("    {PLACEHOLDER_MARKER} (spec {})\n", spec.id));
    for param in &spec.parameters {
        code.push_str(&format!("    del {}\n", param.name));
    }
    code.push_str(&format!(
        "    return {}\n",
        spec.return_type.default_literal()
    ));
    code
}
