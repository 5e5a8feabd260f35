//! Confidence-scored parameter extraction.
//!
//! Three passes over one scanner:
//!
//! 1. scalar assignments, keyword arguments, parameter defaults and dict
//!    literal entries
//! 2. filter comparisons against numeric literals (`gap >= 0.05`)
//! 3. a line-oriented pattern fallback for regions the syntax tree could
//!    not make sense of
//!
//! Results are merged by name. The source is parsed leniently: a scanner
//! with a syntax error still yields whatever parameters can be found.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use tree_sitter::Node;

use super::policy::ParameterPolicy;
use super::{
    ExtractionPass, InferredType, ParameterDescriptor, SourceSpan, CONFIDENCE_COMPARISON,
    CONFIDENCE_DICT_ENTRY, CONFIDENCE_KEYWORD_ARGUMENT, CONFIDENCE_MODULE_ASSIGNMENT,
    CONFIDENCE_NESTED_ASSIGNMENT, CONFIDENCE_TEXT_PATTERN,
};
use crate::error::Result;
use crate::syntax::{self, Literal, ParsedSource};

static ASSIGN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([-+]?(?:\d[\d_]*\.[\d_]*|\.\d[\d_]*|\d[\d_]*)(?:[eE][-+]?\d+)?)\s*,?\s*$")
        .unwrap()
});
static DICT_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]([A-Za-z_][A-Za-z0-9_]*)['"]\s*:\s*([-+]?(?:\d[\d_]*\.[\d_]*|\.\d[\d_]*|\d[\d_]*)(?:[eE][-+]?\d+)?)"#)
        .unwrap()
});
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Extracts tunable parameters from scanner source.
#[derive(Debug, Clone, Default)]
pub struct ParameterExtractor {
    policy: ParameterPolicy,
}

impl ParameterExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ParameterPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ParameterPolicy {
        &self.policy
    }

    /// Extract parameters, ordered by source position then name.
    ///
    /// Deterministic: identical source yields an identical list.
    pub fn extract(&self, source: &str) -> Result<Vec<ParameterDescriptor>> {
        let parsed = ParsedSource::parse_lenient(source)?;
        let mut run = ExtractionRun::new(self, &parsed);

        run.syntax_passes();
        run.text_pass();

        let mut descriptors: Vec<ParameterDescriptor> = run.merged.into_values().collect();
        descriptors.sort_by(|a, b| {
            a.source_span
                .start_byte
                .cmp(&b.source_span.start_byte)
                .then_with(|| a.name.cmp(&b.name))
        });

        debug!(
            parameters = descriptors.len(),
            syntax_errors = parsed.has_errors(),
            "Extracted scanner parameters"
        );
        Ok(descriptors)
    }
}

/// State of one `extract` call.
struct ExtractionRun<'e, 'p, 's> {
    extractor: &'e ParameterExtractor,
    parsed: &'p ParsedSource<'s>,
    merged: HashMap<String, ParameterDescriptor>,
    /// Descriptors from pass 1, kept for the comparison boost
    assignments: Vec<ParameterDescriptor>,
    /// Identifiers used as operands of ordering comparisons
    compared: HashSet<String>,
    /// Lines the syntax passes already looked at
    covered: BTreeSet<usize>,
}

impl<'e, 'p, 's> ExtractionRun<'e, 'p, 's> {
    fn new(extractor: &'e ParameterExtractor, parsed: &'p ParsedSource<'s>) -> Self {
        Self {
            extractor,
            parsed,
            merged: HashMap::new(),
            assignments: Vec::new(),
            compared: HashSet::new(),
            covered: BTreeSet::new(),
        }
    }

    fn offer(&mut self, descriptor: ParameterDescriptor) {
        let replace = self
            .merged
            .get(&descriptor.name)
            .map_or(true, |existing| descriptor.outranks(existing));
        if replace {
            self.merged.insert(descriptor.name.clone(), descriptor);
        }
    }

    fn descriptor(
        &self,
        name: String,
        literal: &Literal,
        node: Node<'_>,
        confidence: f64,
        pass: ExtractionPass,
    ) -> ParameterDescriptor {
        let inferred_type = inferred_type(literal);
        ParameterDescriptor {
            category: self.extractor.policy.categorize(&name, inferred_type),
            name,
            raw_value: literal.raw(),
            inferred_type,
            confidence,
            source_span: span_of(node),
            pass,
        }
    }

    fn cover(&mut self, node: Node<'_>) {
        self.covered
            .extend(syntax::line_of(node)..=syntax::end_line_of(node));
    }

    // ------------------------------------------------------------------
    // Passes 1 and 2
    // ------------------------------------------------------------------

    fn syntax_passes(&mut self) {
        let parsed = self.parsed;
        let mut nodes = Vec::new();
        syntax::walk(parsed.root(), |node| {
            nodes.push(node);
            true
        });

        let mut comparisons = Vec::new();
        for node in nodes {
            match node.kind() {
                "assignment" => self.visit_assignment(node),
                "keyword_argument" | "default_parameter" | "typed_default_parameter" => {
                    self.visit_keyword(node)
                }
                "pair" => self.visit_pair(node),
                "comparison_operator" => comparisons.push(node),
                "string" => {
                    if syntax::end_line_of(node) > syntax::line_of(node) {
                        self.cover(node);
                    }
                }
                _ => {}
            }
        }

        let assignments = std::mem::take(&mut self.assignments);
        for descriptor in &assignments {
            self.offer(descriptor.clone());
        }

        for node in comparisons {
            self.visit_comparison(node);
        }

        // an assigned constant used as a filter operand is a filter threshold
        for descriptor in assignments {
            if self.compared.contains(&descriptor.name) {
                self.offer(ParameterDescriptor {
                    confidence: CONFIDENCE_COMPARISON,
                    pass: ExtractionPass::Comparison,
                    ..descriptor
                });
            }
        }
    }

    fn visit_assignment(&mut self, node: Node<'_>) {
        self.cover(node);
        let (Some(left), Some(right)) = (
            node.child_by_field_name("left"),
            node.child_by_field_name("right"),
        ) else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = self.parsed.text(left);
        if is_dunder(name) {
            return;
        }

        let module_scope = node
            .parent()
            .is_some_and(|p| p.kind() == "expression_statement" && syntax::is_module_level(p));
        let literal = if module_scope {
            syntax::literal(self.parsed, right)
        } else {
            syntax::numeric_literal(self.parsed, right)
        };
        let Some(literal) = literal else {
            return;
        };

        let confidence = if module_scope {
            CONFIDENCE_MODULE_ASSIGNMENT
        } else {
            CONFIDENCE_NESTED_ASSIGNMENT
        };
        let descriptor = self.descriptor(
            name.to_string(),
            &literal,
            node,
            confidence,
            ExtractionPass::Assignment,
        );
        self.assignments.push(descriptor);
    }

    fn visit_keyword(&mut self, node: Node<'_>) {
        self.cover(node);
        let (Some(name), Some(value)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("value"),
        ) else {
            return;
        };
        if name.kind() != "identifier" {
            return;
        }
        let name = self.parsed.text(name);
        if self.extractor.policy.is_ignored_keyword(name) {
            return;
        }
        let Some(literal) = syntax::numeric_literal(self.parsed, value) else {
            return;
        };
        let descriptor = self.descriptor(
            name.to_string(),
            &literal,
            node,
            CONFIDENCE_KEYWORD_ARGUMENT,
            ExtractionPass::Assignment,
        );
        self.assignments.push(descriptor);
    }

    fn visit_pair(&mut self, node: Node<'_>) {
        self.cover(node);
        let (Some(key), Some(value)) = (
            node.child_by_field_name("key"),
            node.child_by_field_name("value"),
        ) else {
            return;
        };
        if key.kind() != "string" {
            return;
        }
        let Some(name) = syntax::string_value(self.parsed.text(key)) else {
            return;
        };
        if !IDENTIFIER.is_match(&name) {
            return;
        }
        let Some(literal) = syntax::numeric_literal(self.parsed, value) else {
            return;
        };
        let descriptor =
            self.descriptor(name, &literal, node, CONFIDENCE_DICT_ENTRY, ExtractionPass::Dict);
        self.offer(descriptor);
    }

    fn visit_comparison(&mut self, node: Node<'_>) {
        self.cover(node);
        let operands: Vec<Node<'_>> = syntax::named_children(node)
            .into_iter()
            .filter(|n| n.kind() != "comment")
            .collect();
        let operators: Vec<&str> = syntax::children(node)
            .into_iter()
            .filter(|n| !n.is_named())
            .map(|n| self.parsed.text(n))
            .collect();

        for operand in &operands {
            if operand.kind() == "identifier" {
                self.compared.insert(self.parsed.text(*operand).to_string());
            }
        }
        // `not in` and `is not` span two tokens
        if operators.len() + 1 != operands.len() {
            return;
        }

        for (i, op) in operators.iter().enumerate() {
            let (Some(&left), Some(&right)) = (operands.get(i), operands.get(i + 1)) else {
                break;
            };
            let Some(lower_bound) = (match *op {
                ">" | ">=" => Some(true),
                "<" | "<=" => Some(false),
                _ => None,
            }) else {
                continue;
            };

            // `x > 5` bounds x from below, `5 > x` from above
            let (operand, literal, is_min) =
                if let Some(literal) = syntax::numeric_literal(self.parsed, right) {
                    (left, literal, lower_bound)
                } else if let Some(literal) = syntax::numeric_literal(self.parsed, left) {
                    (right, literal, !lower_bound)
                } else {
                    continue;
                };
            let Some(base) = operand_name(self.parsed, operand) else {
                continue;
            };
            let name = format!("{base}_{}", if is_min { "min" } else { "max" });
            let descriptor = self.descriptor(
                name,
                &literal,
                node,
                CONFIDENCE_COMPARISON,
                ExtractionPass::Comparison,
            );
            self.offer(descriptor);
        }
    }

    // ------------------------------------------------------------------
    // Pass 3
    // ------------------------------------------------------------------

    fn text_pass(&mut self) {
        let source = self.parsed.source();
        let mut offset = 0;

        for (index, raw_line) in source.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            let line_start = offset;
            offset += raw_line.len();

            if self.covered.contains(&line_no) {
                continue;
            }
            let line = strip_comment(raw_line.trim_end_matches(['\n', '\r']));
            if line.trim().is_empty() {
                continue;
            }

            let mut hits: Vec<(String, String, usize, usize)> = Vec::new();
            if let Some(caps) = ASSIGN_LINE.captures(line) {
                if let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) {
                    hits.push((
                        name.as_str().to_string(),
                        value.as_str().to_string(),
                        name.start(),
                        value.end(),
                    ));
                }
            }
            for caps in DICT_ENTRY.captures_iter(line) {
                if let (Some(whole), Some(name), Some(value)) = (caps.get(0), caps.get(1), caps.get(2)) {
                    hits.push((
                        name.as_str().to_string(),
                        value.as_str().to_string(),
                        whole.start(),
                        value.end(),
                    ));
                }
            }

            for (name, value, start, end) in hits {
                if is_dunder(&name) || self.extractor.policy.is_ignored_keyword(&name) {
                    continue;
                }
                let inferred_type = if value.contains(['.', 'e', 'E']) {
                    InferredType::Float
                } else {
                    InferredType::Integer
                };
                self.offer(ParameterDescriptor {
                    category: self.extractor.policy.categorize(&name, inferred_type),
                    name,
                    raw_value: value,
                    inferred_type,
                    confidence: CONFIDENCE_TEXT_PATTERN,
                    source_span: SourceSpan {
                        start_line: line_no,
                        end_line: line_no,
                        start_byte: line_start + start,
                        end_byte: line_start + end,
                    },
                    pass: ExtractionPass::Text,
                });
            }
        }
    }
}

fn inferred_type(literal: &Literal) -> InferredType {
    match literal {
        Literal::Integer(_) => InferredType::Integer,
        Literal::Float(_) => InferredType::Float,
        Literal::Boolean(_) => InferredType::Boolean,
        Literal::Str(_) => InferredType::String,
    }
}

fn span_of(node: Node<'_>) -> SourceSpan {
    SourceSpan {
        start_line: syntax::line_of(node),
        end_line: syntax::end_line_of(node),
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Name a comparison operand stands for: `gap`, `df.gap` and `df['gap']`
/// all name `gap`.
fn operand_name(parsed: &ParsedSource<'_>, node: Node<'_>) -> Option<String> {
    let raw = match node.kind() {
        "identifier" => parsed.text(node).to_string(),
        "attribute" => parsed.text(node.child_by_field_name("attribute")?).to_string(),
        "subscript" => {
            let index = node.child_by_field_name("subscript")?;
            if index.kind() != "string" {
                return None;
            }
            syntax::string_value(parsed.text(index))?
        }
        "parenthesized_expression" => return operand_name(parsed, node.named_child(0)?),
        _ => return None,
    };
    sanitize(&raw)
}

/// Lowercase identifier form of a column label such as `Gap %`.
fn sanitize(raw: &str) -> Option<String> {
    if IDENTIFIER.is_match(raw) {
        return Some(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        None
    } else if out.starts_with(|c: char| c.is_ascii_digit()) {
        Some(format!("_{out}"))
    } else {
        Some(out)
    }
}

/// Drop a trailing `#` comment, ignoring `#` inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(ch),
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterCategory;

    fn extract(source: &str) -> Vec<ParameterDescriptor> {
        ParameterExtractor::new().extract(source).unwrap()
    }

    fn find<'a>(params: &'a [ParameterDescriptor], name: &str) -> &'a ParameterDescriptor {
        params
            .iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("missing {name}: {params:?}"))
    }

    #[test]
    fn test_module_constants() {
        let params = extract("MIN_VOLUME = 500000\nGAP_PCT = 0.05\nAPI_KEY = \"abc\"\nUSE_CACHE = True\n");
        let volume = find(&params, "MIN_VOLUME");
        assert_eq!(volume.raw_value, "500000");
        assert_eq!(volume.inferred_type, InferredType::Integer);
        assert_eq!(volume.category, ParameterCategory::TradingFilter);
        assert!((volume.confidence - CONFIDENCE_MODULE_ASSIGNMENT).abs() < 1e-9);
        assert_eq!(find(&params, "API_KEY").category, ParameterCategory::Configuration);
        assert_eq!(find(&params, "USE_CACHE").inferred_type, InferredType::Boolean);
    }

    #[test]
    fn test_nested_numeric_only() {
        let params = extract("def scan():\n    lookback = 20\n    label = \"gap\"\n    return lookback\n");
        let lookback = find(&params, "lookback");
        assert!((lookback.confidence - CONFIDENCE_NESTED_ASSIGNMENT).abs() < 1e-9);
        assert!(params.iter().all(|p| p.name != "label"));
    }

    #[test]
    fn test_keyword_arguments_and_defaults() {
        let params = extract(
            "def scan(window=14, *, ratio: float = 1.5):\n    return df.rolling(window=20).mean().round(decimals=2)\n",
        );
        assert_eq!(find(&params, "ratio").raw_value, "1.5");
        assert!(params.iter().any(|p| p.name == "window"));
        assert!(params.iter().all(|p| p.name != "decimals"));
    }

    #[test]
    fn test_dict_entries() {
        let params = extract("CONFIG = {\"min_price\": 5, 'max_price': 500.0, \"label\": \"x\"}\n");
        let min_price = find(&params, "min_price");
        assert_eq!(min_price.pass, ExtractionPass::Dict);
        assert!((min_price.confidence - CONFIDENCE_DICT_ENTRY).abs() < 1e-9);
        assert!(params.iter().any(|p| p.name == "max_price"));
        assert!(params.iter().all(|p| p.name != "label"));
    }

    #[test]
    fn test_comparisons() {
        let params = extract("hits = df[(df['gap_pct'] >= 0.05) & (df.volume > 1_000_000) & (df['rsi'] < 30)]\n");
        let gap = find(&params, "gap_pct_min");
        assert_eq!(gap.raw_value, "0.05");
        assert!((gap.confidence - CONFIDENCE_COMPARISON).abs() < 1e-9);
        assert_eq!(gap.pass, ExtractionPass::Comparison);
        assert!(params.iter().any(|p| p.name == "volume_min"));
        assert_eq!(find(&params, "rsi_max").raw_value, "30");
    }

    #[test]
    fn test_reversed_and_chained_comparisons() {
        let params = extract("ok = 2.0 < atr\nband = 10 <= price <= 50\n");
        assert_eq!(find(&params, "atr_min").raw_value, "2.0");
        assert_eq!(find(&params, "price_min").raw_value, "10");
        assert_eq!(find(&params, "price_max").raw_value, "50");
    }

    #[test]
    fn test_compared_constant_is_boosted() {
        let params = extract("MIN_GAP = 0.04\nresults = df[df['gap'] > MIN_GAP]\n");
        let min_gap = find(&params, "MIN_GAP");
        assert!((min_gap.confidence - CONFIDENCE_COMPARISON).abs() < 1e-9);
        assert_eq!(min_gap.raw_value, "0.04");
        assert_eq!(min_gap.source_span.start_line, 1);
    }

    #[test]
    fn test_text_fallback_in_broken_region() {
        let source = "THRESHOLD = 3\ndef broken(:\n    pass\n";
        let params = extract(source);
        assert!(params.iter().any(|p| p.name == "THRESHOLD"));

        let source = "def oops(\n    min_score = 7  # tuned\n";
        let params = extract(source);
        assert_eq!(find(&params, "min_score").raw_value, "7");
    }

    #[test]
    fn test_docstrings_are_not_scanned() {
        let source = "\"\"\"\nUsage:\n    threshold = 5\n\"\"\"\nx = compute()\n";
        assert!(extract(source).is_empty());
    }

    #[test]
    fn test_unique_names_and_order() {
        let params = extract("A_MIN = 1\nB_MAX = 2\nA_MIN = 3\n");
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A_MIN", "B_MAX"]);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let source = "import pandas as pd\nVOL = 2.5\ncfg = {'gap': 0.1}\ndef scan(period=14):\n    x = df[df.close > 5]\n    return x[x.rsi < VOL]\n";
        let first = serde_json::to_string(&extract(source)).unwrap();
        let second = serde_json::to_string(&extract(source)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_dunders_skipped() {
        assert!(extract("__version__ = 2\n").is_empty());
    }

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("x = 1  # note"), "x = 1  ");
        assert_eq!(strip_comment("s = '#not'"), "s = '#not'");
    }

    #[test]
    fn test_sanitize_column_labels() {
        assert_eq!(sanitize("Gap %").as_deref(), Some("gap"));
        assert_eq!(sanitize("5d return").as_deref(), Some("_5d_return"));
        assert_eq!(sanitize("%"), None);
    }
}
