//! Python syntax tree access.
//!
//! Thin layer over tree-sitter-python used by the classifier, the parameter
//! extractor and the partitioner. Nodes borrow from a `ParsedSource`, which
//! in turn borrows the submission text.

use std::collections::HashMap;

use tree_sitter::{Node, Parser, Tree};

use crate::error::{Result, ScannerError};

/// A parsed Python module.
pub struct ParsedSource<'a> {
    source: &'a str,
    tree: Tree,
}

impl<'a> ParsedSource<'a> {
    /// Parse and reject sources containing syntax errors.
    pub fn parse(source: &'a str) -> Result<Self> {
        let parsed = Self::parse_lenient(source)?;
        if let Some((line, message)) = parsed.first_error() {
            return Err(ScannerError::Parse { line, message });
        }
        Ok(parsed)
    }

    /// Parse without rejecting syntax errors; error regions show up as
    /// `ERROR` nodes.
    pub fn parse_lenient(source: &'a str) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| ScannerError::Syntax(format!("python grammar init failed: {e}")))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ScannerError::Syntax("parser produced no tree".to_string()))?;
        Ok(Self { source, tree })
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source text covered by a node.
    pub fn text(&self, node: Node<'_>) -> &'a str {
        self.source.get(node.byte_range()).unwrap_or("")
    }

    pub fn has_errors(&self) -> bool {
        self.root().has_error()
    }

    /// Line (1-based) and description of the first syntax error, if any.
    pub fn first_error(&self) -> Option<(usize, String)> {
        let root = self.root();
        if !root.has_error() {
            return None;
        }

        let mut found: Option<(usize, String)> = None;
        walk(root, |node| {
            if found.is_some() {
                return false;
            }
            if node.is_missing() {
                found = Some((line_of(node), format!("missing `{}`", node.kind())));
                return false;
            }
            if node.is_error() {
                let snippet: String = self.text(node).chars().take(40).collect();
                found = Some((line_of(node), format!("invalid syntax near `{}`", snippet.trim())));
                return false;
            }
            node.has_error()
        });

        found.or_else(|| Some((1, "invalid syntax".to_string())))
    }

    /// Statements directly under the module, comments excluded.
    pub fn top_level(&self) -> Vec<Node<'_>> {
        named_children(self.root())
            .into_iter()
            .filter(|n| n.kind() != "comment")
            .collect()
    }
}

// ============================================================================
// Traversal
// ============================================================================

/// Pre-order traversal in source order. `visit` returns whether to descend
/// into the node's children.
pub fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>) -> bool) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !visit(node) {
            continue;
        }
        let mut children = self::children(node);
        children.reverse();
        stack.extend(children);
    }
}

pub fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// 1-based first line of a node.
pub fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

/// 1-based last line of a node.
pub fn end_line_of(node: Node<'_>) -> usize {
    node.end_position().row + 1
}

/// Nodes that open a new Python scope.
pub fn is_scope_boundary(kind: &str) -> bool {
    matches!(kind, "function_definition" | "class_definition" | "lambda")
}

/// Unwrap `expression_statement` to the expression it holds.
pub fn statement_expression(node: Node<'_>) -> Node<'_> {
    if node.kind() == "expression_statement" {
        if let Some(inner) = node.named_child(0) {
            return inner;
        }
    }
    node
}

/// The function definition behind a statement, looking through decorators.
pub fn function_definition(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "function_definition" => Some(node),
        "decorated_definition" => node
            .child_by_field_name("definition")
            .filter(|d| d.kind() == "function_definition"),
        _ => None,
    }
}

pub fn is_async_function(node: Node<'_>) -> bool {
    node.kind() == "function_definition"
        && children(node).first().is_some_and(|c| c.kind() == "async")
}

/// Nearest enclosing function definition.
pub fn enclosing_function(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if parent.kind() == "function_definition" {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

/// Whether a statement sits directly in the module body.
pub fn is_module_level(statement: Node<'_>) -> bool {
    statement.parent().is_some_and(|p| p.kind() == "module")
}

// ============================================================================
// Literals
// ============================================================================

/// A literal value found in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(String),
    Float(String),
    Boolean(bool),
    Str(String),
}

impl Literal {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    /// Literal as it would be written back into source.
    pub fn raw(&self) -> String {
        match self {
            Self::Integer(s) | Self::Float(s) => s.clone(),
            Self::Boolean(true) => "True".to_string(),
            Self::Boolean(false) => "False".to_string(),
            Self::Str(s) => s.clone(),
        }
    }
}

/// Numeric literal, including a leading sign.
pub fn numeric_literal(parsed: &ParsedSource<'_>, node: Node<'_>) -> Option<Literal> {
    match node.kind() {
        "integer" => Some(Literal::Integer(parsed.text(node).to_string())),
        "float" => Some(Literal::Float(parsed.text(node).to_string())),
        "unary_operator" => {
            let operator = node.child_by_field_name("operator")?;
            let sign = parsed.text(operator);
            if sign != "-" && sign != "+" {
                return None;
            }
            let argument = node.child_by_field_name("argument")?;
            match numeric_literal(parsed, argument)? {
                Literal::Integer(v) if sign == "-" => Some(Literal::Integer(format!("-{v}"))),
                Literal::Float(v) if sign == "-" => Some(Literal::Float(format!("-{v}"))),
                other => Some(other),
            }
        }
        "parenthesized_expression" => numeric_literal(parsed, node.named_child(0)?),
        _ => None,
    }
}

/// Any scalar literal: numbers, booleans and plain strings.
pub fn literal(parsed: &ParsedSource<'_>, node: Node<'_>) -> Option<Literal> {
    match node.kind() {
        "true" => Some(Literal::Boolean(true)),
        "false" => Some(Literal::Boolean(false)),
        "string" => string_value(parsed.text(node)).map(Literal::Str),
        _ => numeric_literal(parsed, node),
    }
}

/// Content of a plain (non f-) string literal.
pub fn string_value(text: &str) -> Option<String> {
    let prefix_len = text
        .find(|c: char| c == '\'' || c == '"')
        .filter(|&i| i <= 2)?;
    let prefix = text[..prefix_len].to_ascii_lowercase();
    if prefix.contains('f') {
        return None;
    }
    let body = &text[prefix_len..];
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= quote.len() * 2 && body.starts_with(quote) && body.ends_with(quote) {
            return Some(body[quote.len()..body.len() - quote.len()].to_string());
        }
    }
    None
}

// ============================================================================
// Bindings
// ============================================================================

/// Last line (1-based) on which each name is assigned anywhere in the source.
pub fn binding_lines(parsed: &ParsedSource<'_>) -> HashMap<String, usize> {
    let mut lines = HashMap::new();
    walk(parsed.root(), |node| {
        let target = match node.kind() {
            "assignment" | "augmented_assignment" | "for_statement" => {
                node.child_by_field_name("left")
            }
            "named_expression" => node.child_by_field_name("name"),
            _ => None,
        };
        if let Some(target) = target {
            let line = line_of(node);
            for name in target_names(parsed, target) {
                lines
                    .entry(name)
                    .and_modify(|l: &mut usize| *l = (*l).max(line))
                    .or_insert(line);
            }
        }
        true
    });
    lines
}

/// Names bound by an assignment target.
pub fn target_names(parsed: &ParsedSource<'_>, target: Node<'_>) -> Vec<String> {
    match target.kind() {
        "identifier" => vec![parsed.text(target).to_string()],
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
        | "parenthesized_expression" => named_children(target)
            .into_iter()
            .flat_map(|child| target_names(parsed, child))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let parsed = ParsedSource::parse("x = 1\ndef f():\n    return x\n").unwrap();
        assert!(!parsed.has_errors());
        assert_eq!(parsed.top_level().len(), 2);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = ParsedSource::parse("x = 1\ndef broken(:\n    pass\n").err().unwrap();
        match err {
            ScannerError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_lenient_parse_keeps_tree() {
        let parsed = ParsedSource::parse_lenient("x = = 2\ny = 3\n").unwrap();
        assert!(parsed.has_errors());
    }

    #[test]
    fn test_async_detection() {
        let parsed = ParsedSource::parse("async def main():\n    pass\ndef helper():\n    pass\n").unwrap();
        let top = parsed.top_level();
        assert!(is_async_function(top[0]));
        assert!(!is_async_function(top[1]));
    }

    #[test]
    fn test_decorated_function_is_found() {
        let parsed = ParsedSource::parse("@cache\ndef scan():\n    return 1\n").unwrap();
        let def = function_definition(parsed.top_level()[0]).unwrap();
        let name = def.child_by_field_name("name").unwrap();
        assert_eq!(parsed.text(name), "scan");
    }

    #[test]
    fn test_negative_numeric_literal() {
        let parsed = ParsedSource::parse("x = -0.5\n").unwrap();
        let assignment = statement_expression(parsed.top_level()[0]);
        let right = assignment.child_by_field_name("right").unwrap();
        assert_eq!(numeric_literal(&parsed, right), Some(Literal::Float("-0.5".into())));
    }

    #[test]
    fn test_string_value() {
        assert_eq!(string_value("'2020-01-01'"), Some("2020-01-01".into()));
        assert_eq!(string_value("r\"raw\""), Some("raw".into()));
        assert_eq!(string_value("f\"{x}\""), None);
        assert_eq!(string_value("\"\"\"doc\"\"\""), Some("doc".into()));
    }

    #[test]
    fn test_binding_lines_track_latest_assignment() {
        let source = "df = load()\nresults = []\ndf = df.dropna()\nfor results in []:\n    pass\n";
        let parsed = ParsedSource::parse(source).unwrap();
        let lines = binding_lines(&parsed);
        assert_eq!(lines["df"], 3);
        assert_eq!(lines["results"], 4);
    }

    #[test]
    fn test_tuple_targets() {
        let parsed = ParsedSource::parse("a, (b, c) = 1, (2, 3)\n").unwrap();
        let lines = binding_lines(&parsed);
        assert!(lines.contains_key("a"));
        assert!(lines.contains_key("b"));
        assert!(lines.contains_key("c"));
    }
}
