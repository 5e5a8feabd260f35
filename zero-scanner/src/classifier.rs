//! Structural classification of scanner entry points.
//!
//! Decides, from the syntax tree alone, how a scanner expects to be run.
//! The decision order is fixed:
//!
//! 1. async `main` plus a module-scope `asyncio.run(main(...))` → `AsyncMainBlock`
//! 2. exactly one top-level async function → `AsyncFunction`
//! 3. a sync function from the conventional-name registry, or the sole
//!    top-level function → `SyncFunction`
//! 4. anything else → `BareScript`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::Node;

use crate::error::Result;
use crate::syntax::{self, ParsedSource};

/// Conventional names of synchronous scanner entry points, in priority order.
pub const SYNC_ENTRY_REGISTRY: &[&str] = &["main", "run_scan", "scan", "execute"];

/// How a scanner expects to be invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum EntryPointShape {
    SyncFunction(String),
    AsyncFunction(String),
    AsyncMainBlock,
    BareScript,
    /// Placeholder before classification; `classify` never returns it.
    Unknown,
}

impl EntryPointShape {
    /// Whether the entry point needs an event loop.
    pub fn is_async(&self) -> bool {
        matches!(self, Self::AsyncFunction(_) | Self::AsyncMainBlock)
    }

    /// Name of the callable the adapter invokes, if any.
    pub fn callable(&self) -> Option<&str> {
        match self {
            Self::SyncFunction(name) | Self::AsyncFunction(name) => Some(name),
            Self::AsyncMainBlock => Some("main"),
            Self::BareScript | Self::Unknown => None,
        }
    }

    /// Whether the callable's return value can stand in for a result variable.
    pub fn returns_results(&self) -> bool {
        matches!(self, Self::SyncFunction(_) | Self::AsyncFunction(_))
    }
}

impl std::fmt::Display for EntryPointShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyncFunction(name) => write!(f, "sync function `{name}`"),
            Self::AsyncFunction(name) => write!(f, "async function `{name}`"),
            Self::AsyncMainBlock => write!(f, "async main block"),
            Self::BareScript => write!(f, "bare script"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub shape: EntryPointShape,
    /// `asyncio.run(main(...))` sits directly in the module body, so it runs
    /// while the module itself is executed.
    pub runs_main_on_import: bool,
    /// Last assignment line of every bound name
    #[serde(skip)]
    pub binding_lines: HashMap<String, usize>,
}

struct TopLevelFunction {
    name: String,
    is_async: bool,
}

/// Classify a scanner's entry point.
///
/// Fails only when the source is not valid Python.
pub fn classify(source: &str) -> Result<Classification> {
    let parsed = ParsedSource::parse(source)?;
    let functions = top_level_functions(&parsed);
    let main_run = find_main_run(&parsed);
    let binding_lines = syntax::binding_lines(&parsed);

    let has_async_main = functions.iter().any(|f| f.is_async && f.name == "main");
    let async_functions: Vec<&TopLevelFunction> = functions.iter().filter(|f| f.is_async).collect();

    let shape = if has_async_main && main_run.is_some() {
        EntryPointShape::AsyncMainBlock
    } else if async_functions.len() == 1 {
        EntryPointShape::AsyncFunction(async_functions[0].name.clone())
    } else if let Some(name) = SYNC_ENTRY_REGISTRY.iter().find(|candidate| {
        functions
            .iter()
            .any(|f| !f.is_async && f.name.as_str() == **candidate)
    }) {
        EntryPointShape::SyncFunction((*name).to_string())
    } else if functions.len() == 1 && !functions[0].is_async {
        EntryPointShape::SyncFunction(functions[0].name.clone())
    } else {
        EntryPointShape::BareScript
    };

    let runs_main_on_import = shape == EntryPointShape::AsyncMainBlock && main_run == Some(true);

    debug!(
        shape = %shape,
        functions = functions.len(),
        async_functions = async_functions.len(),
        runs_main_on_import,
        "Classified scanner"
    );

    Ok(Classification {
        shape,
        runs_main_on_import,
        binding_lines,
    })
}

fn top_level_functions(parsed: &ParsedSource<'_>) -> Vec<TopLevelFunction> {
    parsed
        .top_level()
        .into_iter()
        .filter_map(syntax::function_definition)
        .filter_map(|def| {
            let name = def.child_by_field_name("name")?;
            Some(TopLevelFunction {
                name: parsed.text(name).to_string(),
                is_async: syntax::is_async_function(def),
            })
        })
        .collect()
}

/// Finds `asyncio.run(main(...))` outside any function or class body.
///
/// Returns `Some(true)` when the call is a direct module statement,
/// `Some(false)` when it is nested in a guard such as
/// `if __name__ == "__main__":`, `None` when absent.
fn find_main_run(parsed: &ParsedSource<'_>) -> Option<bool> {
    let mut found: Option<bool> = None;
    syntax::walk(parsed.root(), |node| {
        if syntax::is_scope_boundary(node.kind()) {
            return false;
        }
        if node.kind() == "call" && is_asyncio_run_of_main(parsed, node) {
            let direct = module_statement_of(node).is_some_and(syntax::is_module_level);
            found = Some(found.unwrap_or(false) || direct);
            return false;
        }
        true
    });
    found
}

fn is_asyncio_run_of_main(parsed: &ParsedSource<'_>, call: Node<'_>) -> bool {
    let Some(function) = call.child_by_field_name("function") else {
        return false;
    };
    if parsed.text(function) != "asyncio.run" {
        return false;
    }
    let Some(arguments) = call.child_by_field_name("arguments") else {
        return false;
    };
    syntax::named_children(arguments)
        .into_iter()
        .next()
        .filter(|arg| arg.kind() == "call")
        .and_then(|arg| arg.child_by_field_name("function"))
        .is_some_and(|f| parsed.text(f) == "main")
}

/// The statement containing a node: the ancestor whose parent is a block or
/// the module.
fn module_statement_of(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node;
    loop {
        let parent = current.parent()?;
        if matches!(parent.kind(), "module" | "block") {
            return Some(current);
        }
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(source: &str) -> EntryPointShape {
        classify(source).unwrap().shape
    }

    #[test]
    fn test_async_main_block_guarded() {
        let source = r#"
import asyncio

async def main():
    return [{"date": "2025-01-02", "ticker": "AAPL"}]

if __name__ == "__main__":
    asyncio.run(main())
"#;
        let classification = classify(source).unwrap();
        assert_eq!(classification.shape, EntryPointShape::AsyncMainBlock);
        assert!(!classification.runs_main_on_import);
    }

    #[test]
    fn test_async_main_block_at_module_scope() {
        let source = "import asyncio\nasync def main(days=5):\n    return []\nresults = asyncio.run(main(days=10))\n";
        let classification = classify(source).unwrap();
        assert_eq!(classification.shape, EntryPointShape::AsyncMainBlock);
        assert!(classification.runs_main_on_import);
    }

    #[test]
    fn test_async_main_without_run_is_async_function() {
        let source = "async def main():\n    results = []\n    return results\n";
        assert_eq!(shape(source), EntryPointShape::AsyncFunction("main".into()));
    }

    #[test]
    fn test_single_async_function() {
        let source = "import aiohttp\ndef helper(x):\n    return x\nasync def fetch_and_scan(symbols):\n    return []\n";
        assert_eq!(shape(source), EntryPointShape::AsyncFunction("fetch_and_scan".into()));
    }

    #[test]
    fn test_asyncio_run_inside_function_is_not_main_block() {
        let source = "import asyncio\nasync def main():\n    pass\nasync def other():\n    pass\ndef go():\n    asyncio.run(main())\n";
        // nested run does not count, and three functions leave no sole entry point
        assert_eq!(shape(source), EntryPointShape::BareScript);
    }

    #[test]
    fn test_registry_name_wins() {
        let source = "def load():\n    pass\ndef run_scan():\n    pass\ndef report():\n    pass\n";
        assert_eq!(shape(source), EntryPointShape::SyncFunction("run_scan".into()));
    }

    #[test]
    fn test_registry_priority() {
        let source = "def execute():\n    pass\ndef main():\n    pass\n";
        assert_eq!(shape(source), EntryPointShape::SyncFunction("main".into()));
    }

    #[test]
    fn test_sole_function() {
        let source = "import pandas as pd\ndef find_gappers():\n    return pd.DataFrame()\n";
        assert_eq!(shape(source), EntryPointShape::SyncFunction("find_gappers".into()));
    }

    #[test]
    fn test_bare_script() {
        let source = "import pandas as pd\ndf = pd.read_csv('x.csv')\nresults = df[df.close > 5]\n";
        assert_eq!(shape(source), EntryPointShape::BareScript);
    }

    #[test]
    fn test_multiple_unregistered_functions_are_bare() {
        let source = "def a():\n    pass\ndef b():\n    pass\nresults = a()\n";
        assert_eq!(shape(source), EntryPointShape::BareScript);
    }

    #[test]
    fn test_two_async_functions_without_main_run() {
        let source = "async def a():\n    pass\nasync def b():\n    pass\n";
        assert_eq!(shape(source), EntryPointShape::BareScript);
    }

    #[test]
    fn test_empty_source_is_bare_script() {
        assert_eq!(shape(""), EntryPointShape::BareScript);
    }

    #[test]
    fn test_parse_failure_is_error_not_panic() {
        assert!(classify("def main(:\n    pass\n").is_err());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let source = "async def main():\n    return 1\n";
        assert_eq!(classify(source).unwrap(), classify(source).unwrap());
    }

    #[test]
    fn test_shape_serialization() {
        let json = serde_json::to_value(EntryPointShape::SyncFunction("scan".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "sync_function", "name": "scan"}));
        let json = serde_json::to_value(EntryPointShape::BareScript).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "bare_script"}));
    }
}
