//! Multi-scanner partitioning.
//!
//! A file may hold several independent pattern definitions, each producing
//! its own boolean match column. The partitioner cuts the file at the
//! boundaries a [`BoundaryDetector`] reports, extracts parameters from each
//! slice alone, and prefixes every name with the partition's name so two
//! scans never share a tunable, even when their literals are identical.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tree_sitter::Node;

use super::{ParameterDescriptor, ParameterExtractor};
use crate::error::{Result, ScannerError};
use crate::syntax::{self, ParsedSource};
use crate::types::ScannerSubmission;

/// Name given to the partition of a file that cannot be split.
pub const WHOLE_FILE_PARTITION: &str = "scanner";

/// How a detected block exposes its matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    /// Module-level statements ending in `<frame>['<column>'] = (...).astype(int)`
    Module { frame: String, column: String },
    /// A top-level function whose body defines the pattern column
    Function { name: String, callable_without_args: bool },
    /// Ranges from an external detector; nothing is appended
    Opaque,
}

/// A 1-based inclusive line range holding one scan definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: BlockKind,
}

impl Boundary {
    pub fn new(name: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            name: name.into(),
            start_line,
            end_line,
            kind: BlockKind::Opaque,
        }
    }
}

/// Finds the independent scan blocks of a file.
pub trait BoundaryDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, source: &str) -> Result<Vec<Boundary>>;
}

/// Ranges decided elsewhere, e.g. by an interactive or model-assisted splitter.
#[derive(Debug, Clone, Default)]
pub struct FixedBoundaries {
    boundaries: Vec<Boundary>,
}

impl FixedBoundaries {
    pub fn new(boundaries: Vec<Boundary>) -> Self {
        Self { boundaries }
    }
}

impl BoundaryDetector for FixedBoundaries {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect(&self, _source: &str) -> Result<Vec<Boundary>> {
        Ok(self.boundaries.clone())
    }
}

// ============================================================================
// Pattern column detector
// ============================================================================

/// Detects blocks by their `.astype(int)` / `.astype(bool)` match columns.
///
/// Top-level functions that assign a match column are blocks on their own.
/// Otherwise module-level markers segment the top-level statements: the
/// shared preamble runs through the last import, definition or
/// call-assignment before the first marker, and each block ends at its
/// marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternColumnDetector;

struct Marker {
    frame: String,
    column: String,
}

impl BoundaryDetector for PatternColumnDetector {
    fn name(&self) -> &str {
        "pattern_column"
    }

    fn detect(&self, source: &str) -> Result<Vec<Boundary>> {
        let parsed = ParsedSource::parse(source)?;
        let statements = parsed.top_level();

        let function_blocks: Vec<Boundary> = statements
            .iter()
            .filter_map(|stmt| function_block(&parsed, *stmt))
            .collect();
        if !function_blocks.is_empty() {
            return Ok(function_blocks);
        }

        let markers: Vec<(usize, Marker)> = statements
            .iter()
            .enumerate()
            .filter_map(|(i, stmt)| module_marker(&parsed, *stmt).map(|m| (i, m)))
            .collect();
        let Some(&(first_marker, _)) = markers.first() else {
            return Ok(Vec::new());
        };

        let preamble_end = statements[..first_marker]
            .iter()
            .rposition(|stmt| is_preamble_statement(&parsed, *stmt));
        let mut block_start = preamble_end.map_or(0, |i| i + 1);

        let mut boundaries = Vec::with_capacity(markers.len());
        for (index, marker) in markers {
            boundaries.push(Boundary {
                name: marker.column.clone(),
                start_line: syntax::line_of(statements[block_start]),
                end_line: syntax::end_line_of(statements[index]),
                kind: BlockKind::Module {
                    frame: marker.frame,
                    column: marker.column,
                },
            });
            block_start = index + 1;
        }
        Ok(boundaries)
    }
}

fn function_block(parsed: &ParsedSource<'_>, stmt: Node<'_>) -> Option<Boundary> {
    let def = syntax::function_definition(stmt)?;
    let mut has_marker = false;
    syntax::walk(def, |node| {
        if has_marker {
            return false;
        }
        if node.kind() == "assignment" && marker_of(parsed, node).is_some() {
            has_marker = true;
        }
        true
    });
    if !has_marker {
        return None;
    }
    let name = parsed.text(def.child_by_field_name("name")?).to_string();
    let callable_without_args = !syntax::is_async_function(def)
        && def
            .child_by_field_name("parameters")
            .is_some_and(|params| !has_required_parameters(params));
    Some(Boundary {
        name: name.clone(),
        start_line: syntax::line_of(stmt),
        end_line: syntax::end_line_of(stmt),
        kind: BlockKind::Function {
            name,
            callable_without_args,
        },
    })
}

fn has_required_parameters(params: Node<'_>) -> bool {
    syntax::named_children(params)
        .into_iter()
        .any(|p| matches!(p.kind(), "identifier" | "typed_parameter"))
}

fn module_marker(parsed: &ParsedSource<'_>, stmt: Node<'_>) -> Option<Marker> {
    let expr = syntax::statement_expression(stmt);
    if expr.kind() != "assignment" {
        return None;
    }
    marker_of(parsed, expr)
}

/// `<frame>['<column>'] = <expr containing .astype(int|bool)>`
fn marker_of(parsed: &ParsedSource<'_>, assignment: Node<'_>) -> Option<Marker> {
    let left = assignment.child_by_field_name("left")?;
    let right = assignment.child_by_field_name("right")?;
    if left.kind() != "subscript" {
        return None;
    }
    let index = left.child_by_field_name("subscript")?;
    if index.kind() != "string" {
        return None;
    }
    let column = syntax::string_value(parsed.text(index))?;
    let frame = parsed.text(left.child_by_field_name("value")?).to_string();

    let mut casts_to_flag = false;
    syntax::walk(right, |node| {
        if casts_to_flag {
            return false;
        }
        if node.kind() == "call" && is_flag_cast(parsed, node) {
            casts_to_flag = true;
        }
        true
    });
    casts_to_flag.then_some(Marker { frame, column })
}

fn is_flag_cast(parsed: &ParsedSource<'_>, call: Node<'_>) -> bool {
    let Some(function) = call.child_by_field_name("function") else {
        return false;
    };
    if function.kind() != "attribute"
        || function
            .child_by_field_name("attribute")
            .map(|a| parsed.text(a))
            != Some("astype")
    {
        return false;
    }
    call.child_by_field_name("arguments")
        .and_then(|args| syntax::named_children(args).into_iter().next())
        .is_some_and(|arg| {
            let text = parsed.text(arg);
            matches!(text, "int" | "bool")
                || syntax::string_value(text).is_some_and(|s| matches!(s.as_str(), "int" | "bool"))
        })
}

fn is_preamble_statement(parsed: &ParsedSource<'_>, stmt: Node<'_>) -> bool {
    if is_shared_definition(stmt) {
        return true;
    }
    let expr = syntax::statement_expression(stmt);
    expr.kind() == "assignment"
        && expr
            .child_by_field_name("right")
            .is_some_and(|right| right.kind() == "call" || right.kind() == "await")
        && module_marker(parsed, stmt).is_none()
}

fn is_shared_definition(stmt: Node<'_>) -> bool {
    matches!(
        stmt.kind(),
        "import_statement"
            | "import_from_statement"
            | "future_import_statement"
            | "function_definition"
            | "class_definition"
            | "decorated_definition"
    )
}

// ============================================================================
// Partitions
// ============================================================================

/// One independently executable scan cut from a larger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerPartition {
    /// Unique among the partitions of one file
    pub name: String,
    /// Exactly the detected line range
    pub source_slice: String,
    /// Shared preamble, the slice and a harvest tail; runnable on its own
    pub source: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Extracted from the slice only, names prefixed `<name>.`
    pub parameters: Vec<ParameterDescriptor>,
}

impl ScannerPartition {
    /// The partition as a submission of its own.
    pub fn submission(&self, base: &ScannerSubmission) -> ScannerSubmission {
        ScannerSubmission::new(self.source.clone(), format!("{}__{}.py", base.stem(), self.name))
    }
}

/// Splits multi-scanner files into parameter-disjoint partitions.
#[derive(Clone)]
pub struct Partitioner {
    extractor: ParameterExtractor,
    detector: Arc<dyn BoundaryDetector>,
}

impl Partitioner {
    pub fn new(extractor: ParameterExtractor) -> Self {
        Self {
            extractor,
            detector: Arc::new(PatternColumnDetector),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn BoundaryDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Split `source` into partitions.
    ///
    /// Whatever the detector, the returned partitions have pairwise
    /// disjoint parameter names.
    pub fn partition(&self, source: &str) -> Result<Vec<ScannerPartition>> {
        let boundaries = self.detector.detect(source)?;
        let lines = LineIndex::new(source);

        if boundaries.len() < 2 {
            debug!(
                detector = self.detector.name(),
                blocks = boundaries.len(),
                "Fewer than two blocks, keeping file whole"
            );
            let partition = self.build(
                WHOLE_FILE_PARTITION.to_string(),
                source,
                source.to_string(),
                1,
                lines.count().max(1),
                0,
                0,
            )?;
            return Ok(vec![partition]);
        }

        validate(&boundaries, &lines, source)?;
        let (shared, shared_ranges) = shared_preamble(source, &lines, &boundaries)?;
        let names = unique_names(&boundaries);

        let mut partitions = Vec::with_capacity(boundaries.len());
        for (boundary, name) in boundaries.iter().zip(names) {
            let (start_byte, end_byte) = lines.byte_range(boundary.start_line, boundary.end_line);
            let slice = &source[start_byte..end_byte];
            let executable = compose(&shared, slice, &boundary.kind);
            partitions.push(self.build(
                name,
                slice,
                executable,
                boundary.start_line,
                boundary.end_line,
                boundary.start_line - 1,
                start_byte,
            )?);
        }

        self.adopt_shared_parameters(source, &lines, &shared_ranges, &mut partitions)?;
        check_disjoint(&partitions)?;
        info!(
            detector = self.detector.name(),
            partitions = partitions.len(),
            parameters = partitions.iter().map(|p| p.parameters.len()).sum::<usize>(),
            "Partitioned scanner file"
        );
        Ok(partitions)
    }

    /// Give each parameter of the shared preamble to exactly one partition:
    /// the first whose slice mentions it, else the first partition. Every
    /// partition runs its own copy of the preamble, so the owner's copy is
    /// the one the tunable applies to.
    fn adopt_shared_parameters(
        &self,
        source: &str,
        lines: &LineIndex,
        shared_ranges: &[(usize, usize)],
        partitions: &mut [ScannerPartition],
    ) -> Result<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        for &(start_line, end_line) in shared_ranges {
            let (start_byte, end_byte) = lines.byte_range(start_line, end_line);
            for parameter in self.extractor.extract(&source[start_byte..end_byte])? {
                let owner = partitions
                    .iter()
                    .position(|p| mentions(&p.source_slice, &parameter.name))
                    .unwrap_or(0);
                let partition = &mut partitions[owner];
                let name = format!("{}.{}", partition.name, parameter.name);
                if partition.parameters.iter().any(|p| p.name == name) {
                    continue;
                }
                debug!(parameter = %name, "Shared preamble parameter assigned");
                partition.parameters.push(ParameterDescriptor {
                    name,
                    source_span: parameter.source_span.shifted(start_line - 1, start_byte),
                    ..parameter
                });
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        name: String,
        slice: &str,
        executable: String,
        start_line: usize,
        end_line: usize,
        line_offset: usize,
        byte_offset: usize,
    ) -> Result<ScannerPartition> {
        let parameters = self
            .extractor
            .extract(slice)?
            .into_iter()
            .map(|p| ParameterDescriptor {
                name: format!("{name}.{}", p.name),
                source_span: p.source_span.shifted(line_offset, byte_offset),
                ..p
            })
            .collect();
        Ok(ScannerPartition {
            name,
            source_slice: slice.to_string(),
            source: executable,
            start_line,
            end_line,
            parameters,
        })
    }
}

/// Byte offsets of line starts.
struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1).filter(|&i| i < source.len()));
        Self {
            starts,
            len: source.len(),
        }
    }

    fn count(&self) -> usize {
        if self.len == 0 {
            0
        } else {
            self.starts.len()
        }
    }

    /// Byte range of 1-based inclusive lines, trailing newline included.
    fn byte_range(&self, start_line: usize, end_line: usize) -> (usize, usize) {
        let start = self.starts[start_line - 1];
        let end = self.starts.get(end_line).copied().unwrap_or(self.len);
        (start, end)
    }
}

fn validate(boundaries: &[Boundary], lines: &LineIndex, source: &str) -> Result<()> {
    let count = lines.count();
    let mut previous_end = 0;
    for boundary in boundaries {
        if boundary.start_line == 0 || boundary.end_line < boundary.start_line {
            return Err(ScannerError::InvalidBoundaries(format!(
                "`{}` has an empty or inverted range {}..{}",
                boundary.name, boundary.start_line, boundary.end_line
            )));
        }
        if boundary.end_line > count {
            return Err(ScannerError::InvalidBoundaries(format!(
                "`{}` ends at line {} but the file has {count} lines",
                boundary.name, boundary.end_line
            )));
        }
        if boundary.start_line <= previous_end {
            return Err(ScannerError::InvalidBoundaries(format!(
                "`{}` starts at line {} inside or before the previous block",
                boundary.name, boundary.start_line
            )));
        }
        let (start, end) = lines.byte_range(boundary.start_line, boundary.end_line);
        if source[start..end].trim().is_empty() {
            return Err(ScannerError::InvalidBoundaries(format!(
                "`{}` covers only blank lines",
                boundary.name
            )));
        }
        previous_end = boundary.end_line;
    }
    Ok(())
}

/// Everything before the first block, plus imports and definitions found
/// outside every block further down. Also returns the line ranges copied.
fn shared_preamble(
    source: &str,
    lines: &LineIndex,
    boundaries: &[Boundary],
) -> Result<(String, Vec<(usize, usize)>)> {
    let first_start = boundaries.first().map_or(1, |b| b.start_line);
    let mut shared = String::new();
    let mut ranges = Vec::new();
    if first_start > 1 {
        let (start, end) = lines.byte_range(1, first_start - 1);
        shared.push_str(&source[start..end]);
        ranges.push((1, first_start - 1));
    }

    let parsed = ParsedSource::parse_lenient(source)?;
    for stmt in parsed.top_level() {
        let (start, end) = (syntax::line_of(stmt), syntax::end_line_of(stmt));
        if start < first_start || !is_shared_definition(stmt) {
            continue;
        }
        let inside_block = boundaries
            .iter()
            .any(|b| start <= b.end_line && end >= b.start_line);
        if inside_block {
            continue;
        }
        let (start_byte, end_byte) = lines.byte_range(start, end);
        ensure_newline(&mut shared);
        shared.push('\n');
        shared.push_str(&source[start_byte..end_byte]);
        ranges.push((start, end));
    }
    Ok((shared, ranges))
}

/// Whether `name` occurs in `text` as a whole identifier.
fn mentions(text: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(name).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + name.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

fn compose(shared: &str, slice: &str, kind: &BlockKind) -> String {
    let mut out = String::with_capacity(shared.len() + slice.len() + 96);
    out.push_str(shared);
    ensure_newline(&mut out);
    out.push_str(slice);
    ensure_newline(&mut out);

    match kind {
        BlockKind::Module { frame, column } => {
            let quoted = serde_json::to_string(column).unwrap_or_else(|_| format!("'{column}'"));
            out.push_str(&format!("\nresults = {frame}[{frame}[{quoted}] == 1]\n"));
        }
        BlockKind::Function {
            name,
            callable_without_args: true,
        } => {
            out.push_str(&format!(
                "\n\nif __name__ == \"__main__\":\n    results = {name}()\n"
            ));
        }
        BlockKind::Function { .. } | BlockKind::Opaque => {}
    }
    out
}

fn ensure_newline(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

/// Identifier-safe, unique partition names: `gap`, `gap_2`, ...
fn unique_names(boundaries: &[Boundary]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(boundaries.len());
    for (i, boundary) in boundaries.iter().enumerate() {
        let base = partition_name(&boundary.name).unwrap_or_else(|| format!("block_{}", i + 1));
        let mut candidate = base.clone();
        let mut n = 1;
        while names.contains(&candidate) {
            n += 1;
            candidate = format!("{base}_{n}");
        }
        names.push(candidate);
    }
    names
}

fn partition_name(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_end_matches('_').to_string();
    (!out.is_empty()).then_some(out)
}

fn check_disjoint(partitions: &[ScannerPartition]) -> Result<()> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for partition in partitions {
        for parameter in &partition.parameters {
            if let Some(first) = owners.insert(&parameter.name, &partition.name) {
                if first != partition.name {
                    return Err(ScannerError::Contamination {
                        name: parameter.name.clone(),
                        first: first.to_string(),
                        second: partition.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TWO_PATTERNS: &str = r#"import pandas as pd

def load():
    return pd.read_parquet("bars.parquet")

df = load()

df['gap_up'] = (df['gap'] >= 0.05).astype(int)

threshold = 0.5
df['vol_spike'] = (df['volume_ratio'] > threshold).astype(int)

print(df.tail())
"#;

    fn partitioner() -> Partitioner {
        Partitioner::new(ParameterExtractor::new())
    }

    #[test]
    fn test_detects_module_markers() {
        let boundaries = PatternColumnDetector.detect(TWO_PATTERNS).unwrap();
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].name, "gap_up");
        assert_eq!((boundaries[0].start_line, boundaries[0].end_line), (8, 8));
        assert_eq!((boundaries[1].start_line, boundaries[1].end_line), (10, 11));
        assert_eq!(
            boundaries[1].kind,
            BlockKind::Module {
                frame: "df".into(),
                column: "vol_spike".into()
            }
        );
    }

    #[test]
    fn test_partition_sources_are_independent() {
        let partitions = partitioner().partition(TWO_PATTERNS).unwrap();
        assert_eq!(partitions.len(), 2);

        let gap = &partitions[0];
        assert!(gap.source.starts_with("import pandas as pd\n"));
        assert!(gap.source.contains("df = load()"));
        assert!(gap.source.contains("df['gap_up']"));
        assert!(!gap.source.contains("vol_spike"));
        assert!(gap.source.contains("results = df[df[\"gap_up\"] == 1]"));
        assert!(crate::syntax::ParsedSource::parse(&gap.source).is_ok());

        let vol = &partitions[1];
        assert!(vol.source_slice.starts_with("threshold = 0.5"));
        assert!(!vol.source.contains("gap_up"));
    }

    #[test]
    fn test_parameters_prefixed_and_shifted() {
        let partitions = partitioner().partition(TWO_PATTERNS).unwrap();
        let gap = &partitions[0].parameters;
        assert_eq!(gap.len(), 1);
        assert_eq!(gap[0].name, "gap_up.gap_min");
        assert_eq!(gap[0].source_span.start_line, 8);

        let names: Vec<&str> = partitions[1].parameters.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"vol_spike.threshold"));
        let threshold = partitions[1]
            .parameters
            .iter()
            .find(|p| p.name == "vol_spike.threshold")
            .unwrap();
        assert_eq!(threshold.source_span.start_line, 10);
        let offset = TWO_PATTERNS.find("threshold = 0.5").unwrap();
        assert_eq!(threshold.source_span.start_byte, offset);
    }

    #[test]
    fn test_function_blocks_preferred() {
        let source = r#"import pandas as pd

def fetch():
    return pd.DataFrame()

def gap_scan():
    df = fetch()
    df['gap_flag'] = (df['gap'] > 0.03).astype(int)
    return df[df['gap_flag'] == 1]

def rsi_scan(df, limit=30):
    df['rsi_flag'] = (df['rsi'] < limit).astype(bool)
    return df[df['rsi_flag']]
"#;
        let partitions = partitioner().partition(source).unwrap();
        let names: Vec<&str> = partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["gap_scan", "rsi_scan"]);
        assert!(partitions[0].source.contains("def fetch():"));
        assert!(partitions[0].source.contains("results = gap_scan()"));
        assert!(!partitions[1].source.contains("results = rsi_scan()"));
    }

    #[test]
    fn test_preamble_parameter_goes_to_first_partition_using_it() {
        let source = r#"LOOKBACK = 20
MAX_RSI = 30

def gap_scan():
    df = load(LOOKBACK)
    df['gap_flag'] = (df['gap'] > 0.03).astype(int)
    return df

def rsi_scan():
    df = load(LOOKBACK)
    df['rsi_flag'] = (df['rsi'] < MAX_RSI).astype(int)
    return df
"#;
        let partitions = partitioner().partition(source).unwrap();
        let owned = |i: usize| -> Vec<&str> {
            partitions[i].parameters.iter().map(|p| p.name.as_str()).collect()
        };
        assert!(owned(0).contains(&"gap_scan.LOOKBACK"));
        assert!(!owned(1).contains(&"rsi_scan.LOOKBACK"));
        assert!(owned(1).contains(&"rsi_scan.MAX_RSI"));

        let max_rsi = partitions[1]
            .parameters
            .iter()
            .find(|p| p.name == "rsi_scan.MAX_RSI")
            .unwrap();
        assert_eq!(max_rsi.source_span.start_line, 2);
        assert_eq!(max_rsi.source_span.start_byte, source.find("MAX_RSI").unwrap());
    }

    #[test]
    fn test_mentions_whole_identifiers_only() {
        assert!(mentions("x = MIN_VOL * 2", "MIN_VOL"));
        assert!(!mentions("x = MIN_VOLUME", "MIN_VOL"));
        assert!(!mentions("x = OLD_MIN_VOL", "MIN_VOL"));
    }

    #[test]
    fn test_single_block_keeps_whole_file() {
        let source = "import pandas as pd\ndf = pd.DataFrame()\ndf['x'] = (df.a > 1).astype(int)\n";
        let partitions = partitioner().partition(source).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].name, WHOLE_FILE_PARTITION);
        assert_eq!(partitions[0].source, source);
        assert_eq!(partitions[0].parameters[0].name, "scanner.a_min");
    }

    #[test]
    fn test_invalid_boundaries_rejected() {
        let source = "a = 1\nb = 2\nc = 3\n";
        let overlapping = Partitioner::new(ParameterExtractor::new()).with_detector(Arc::new(
            FixedBoundaries::new(vec![Boundary::new("x", 1, 2), Boundary::new("y", 2, 3)]),
        ));
        assert!(matches!(
            overlapping.partition(source),
            Err(ScannerError::InvalidBoundaries(_))
        ));

        let out_of_file = Partitioner::new(ParameterExtractor::new()).with_detector(Arc::new(
            FixedBoundaries::new(vec![Boundary::new("x", 1, 1), Boundary::new("y", 2, 9)]),
        ));
        assert!(matches!(
            out_of_file.partition(source),
            Err(ScannerError::InvalidBoundaries(_))
        ));
    }

    #[test]
    fn test_external_boundaries_keep_disjointness() {
        let source = "threshold = 0.5\nx = 1\nthreshold = 0.5\n";
        let partitioner = Partitioner::new(ParameterExtractor::new()).with_detector(Arc::new(
            FixedBoundaries::new(vec![Boundary::new("scan", 1, 1), Boundary::new("scan", 3, 3)]),
        ));
        let partitions = partitioner.partition(source).unwrap();
        assert_eq!(partitions[0].name, "scan");
        assert_eq!(partitions[1].name, "scan_2");
        let a: HashSet<&str> = partitions[0].parameters.iter().map(|p| p.name.as_str()).collect();
        let b: HashSet<&str> = partitions[1].parameters.iter().map(|p| p.name.as_str()).collect();
        assert!(a.is_disjoint(&b));
        assert_eq!(partitions[0].parameters[0].raw_value, partitions[1].parameters[0].raw_value);
    }

    #[test]
    fn test_partition_submission_name() {
        let partitions = partitioner().partition(TWO_PATTERNS).unwrap();
        let base = ScannerSubmission::new(TWO_PATTERNS, "combo.py");
        assert_eq!(partitions[1].submission(&base).filename(), "combo__vol_spike.py");
    }

    #[test]
    fn test_unique_names() {
        let boundaries = vec![
            Boundary::new("Gap Up", 1, 1),
            Boundary::new("gap_up", 2, 2),
            Boundary::new("%%", 3, 3),
            Boundary::new("gap_up", 4, 4),
        ];
        assert_eq!(unique_names(&boundaries), vec!["gap_up", "gap_up_2", "block_3", "gap_up_3"]);
    }
}
