//! Syntax validation of emitted Python artifacts via tree-sitter.

use tree_sitter::{Node, Parser};

use crate::errors::{SynthError, SynthResult};

/// Result of parsing one artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntaxReport {
    pub error_nodes: usize,
    /// Names of top-level `def` statements, in source order.
    pub functions: Vec<String>,
}

impl SyntaxReport {
    pub fn is_valid(&self) -> bool {
        self.error_nodes == 0
    }
}

fn python_parser() -> SynthResult<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| SynthError::Config(format!("python grammar unavailable: {e}")))?;
    Ok(parser)
}

fn count_errors(node: Node<'_>) -> usize {
    let own = usize::from(node.is_error() || node.is_missing());
    if !node.has_error() {
        return own;
    }
    let mut cursor = node.walk();
    own + node
        .children(&mut cursor)
        .map(count_errors)
        .sum::<usize>()
}

/// Parse `source` as Python and report error nodes and top-level functions.
pub fn check_python(source: &str) -> SynthResult<SyntaxReport> {
    let mut parser = python_parser()?;
    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| SynthError::Config("python parse was cancelled".into()))?;
    let root = tree.root_node();

    let mut functions = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if child.kind() != "function_definition" {
            continue;
        }
        if let Some(name) = child.child_by_field_name("name") {
            if let Ok(text) = name.utf8_text(source.as_bytes()) {
                functions.push(text.to_string());
            }
        }
    }

    Ok(SyntaxReport {
        error_nodes: count_errors(root),
        functions,
    })
}

/// Convenience wrapper: true only when parsing succeeds without error nodes.
pub fn is_valid_python(source: &str) -> bool {
    check_python(source)
        .map(|report| report.is_valid())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_function() {
        let report = check_python("def add(a: int, b: int) -> int:\n    return a + b\n").unwrap();
        assert!(report.is_valid());
        assert_eq!(report.functions, vec!["add".to_string()]);
    }

    #[test]
    fn rejects_broken_source() {
        assert!(!is_valid_python("def broken(:\n    return\n"));
        assert!(!is_valid_python("def f() -> int:\n    return (1\n"));
    }

    #[test]
    fn ignores_nested_definitions_in_function_list() {
        let src = "def outer():\n    def inner():\n        return 1\n    return inner()\n";
        let report = check_python(src).unwrap();
        assert_eq!(report.functions, vec!["outer".to_string()]);
    }
}
