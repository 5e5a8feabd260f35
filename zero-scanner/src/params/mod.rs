//! Tunable parameter discovery.
//!
//! The extractor finds numeric thresholds and configuration constants in a
//! scanner without executing it; the partitioner splits multi-scanner files
//! into units whose parameter namespaces never overlap.

pub mod extractor;
pub mod partition;
pub mod policy;

use serde::{Deserialize, Serialize};

pub use extractor::ParameterExtractor;
pub use partition::{
    Boundary, BoundaryDetector, FixedBoundaries, PatternColumnDetector, Partitioner,
    ScannerPartition,
};
pub use policy::ParameterPolicy;

/// Confidence of a module-scope scalar assignment.
pub const CONFIDENCE_MODULE_ASSIGNMENT: f64 = 0.85;
/// Confidence of an assignment nested in a function or class body.
pub const CONFIDENCE_NESTED_ASSIGNMENT: f64 = 0.80;
/// Confidence of a numeric keyword argument or parameter default.
pub const CONFIDENCE_KEYWORD_ARGUMENT: f64 = 0.80;
/// Confidence of a string-keyed numeric entry in a dict literal.
pub const CONFIDENCE_DICT_ENTRY: f64 = 0.85;
/// Confidence of an explicit filter comparison against a literal.
pub const CONFIDENCE_COMPARISON: f64 = 0.95;
/// Confidence of a textual match the syntax tree did not cover.
pub const CONFIDENCE_TEXT_PATTERN: f64 = 0.60;

/// Type inferred from a parameter's literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    Integer,
    Float,
    Boolean,
    String,
}

impl InferredType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// What a parameter controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterCategory {
    TradingFilter,
    Configuration,
    Unknown,
}

/// Extraction pass that produced a descriptor. Declaration order is the
/// tie-break order on equal confidence: later passes win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPass {
    Text,
    Assignment,
    Dict,
    Comparison,
}

/// Location of a parameter in the source it was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// 1-based
    pub start_line: usize,
    /// 1-based, inclusive
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl SourceSpan {
    /// Move the span by a line and byte offset.
    pub fn shifted(self, lines: usize, bytes: usize) -> Self {
        Self {
            start_line: self.start_line + lines,
            end_line: self.end_line + lines,
            start_byte: self.start_byte + bytes,
            end_byte: self.end_byte + bytes,
        }
    }
}

/// A tunable value found in a scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Unique within one scanner (or partition)
    pub name: String,
    /// Literal exactly as written
    pub raw_value: String,
    pub inferred_type: InferredType,
    pub category: ParameterCategory,
    /// In `[0, 1]`
    pub confidence: f64,
    pub source_span: SourceSpan,
    pub pass: ExtractionPass,
}

impl ParameterDescriptor {
    /// Whether `self` should replace `other` when both carry the same name.
    pub(crate) fn outranks(&self, other: &Self) -> bool {
        const EPSILON: f64 = 1e-9;
        if (self.confidence - other.confidence).abs() > EPSILON {
            return self.confidence > other.confidence;
        }
        self.pass > other.pass
    }
}
