//! Rewriting of `asyncio.run` calls that would re-enter a running loop.
//!
//! The only textual change ever made to a submission. An `asyncio.run(...)`
//! lexically inside an `async def` always runs while that function's loop is
//! live, so it is redirected to a harness helper that drives the coroutine
//! on a private loop in its own thread. Every other call is left alone.

use tracing::debug;

use crate::error::Result;
use crate::syntax::{self, ParsedSource};

/// Name of the harness helper bound in every execution namespace.
pub const RUN_HELPER: &str = "__scanner_run_coroutine__";

/// Source after neutralization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neutralized {
    pub source: String,
    /// 1-based lines where a call was rewritten
    pub lines: Vec<usize>,
}

impl Neutralized {
    pub fn changed(&self) -> bool {
        !self.lines.is_empty()
    }
}

/// Redirect `asyncio.run` calls nested in `async def` bodies.
pub fn neutralize_nested_runs(source: &str) -> Result<Neutralized> {
    let parsed = ParsedSource::parse(source)?;

    let mut targets: Vec<(usize, usize, usize)> = Vec::new();
    syntax::walk(parsed.root(), |node| {
        if node.kind() != "call" {
            return true;
        }
        let Some(function) = node.child_by_field_name("function") else {
            return true;
        };
        if parsed.text(function) == "asyncio.run"
            && syntax::enclosing_function(node).is_some_and(syntax::is_async_function)
        {
            targets.push((function.start_byte(), function.end_byte(), syntax::line_of(node)));
        }
        true
    });

    if targets.is_empty() {
        return Ok(Neutralized {
            source: source.to_string(),
            lines: Vec::new(),
        });
    }

    let mut rewritten = source.to_string();
    for (start, end, _) in targets.iter().rev() {
        rewritten.replace_range(*start..*end, RUN_HELPER);
    }
    let lines: Vec<usize> = targets.iter().map(|(_, _, line)| *line).collect();

    debug!(rewritten = lines.len(), ?lines, "Neutralized nested asyncio.run calls");
    Ok(Neutralized {
        source: rewritten,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_run_rewritten() {
        let source = "import asyncio\nasync def fetch():\n    return 1\nasync def scan():\n    x = asyncio.run(fetch())\n    return x\n";
        let out = neutralize_nested_runs(source).unwrap();
        assert_eq!(out.lines, vec![5]);
        assert!(out.source.contains("x = __scanner_run_coroutine__(fetch())"));
        assert!(out.source.starts_with("import asyncio\n"));
    }

    #[test]
    fn test_module_level_run_untouched() {
        let source = "import asyncio\nasync def main():\n    return []\nresults = asyncio.run(main())\n";
        let out = neutralize_nested_runs(source).unwrap();
        assert!(!out.changed());
        assert_eq!(out.source, source);
    }

    #[test]
    fn test_sync_function_run_untouched() {
        let source = "import asyncio\nasync def go():\n    pass\ndef helper():\n    return asyncio.run(go())\n";
        assert!(!neutralize_nested_runs(source).unwrap().changed());
    }

    #[test]
    fn test_multiple_rewrites_keep_offsets() {
        let source = "import asyncio\nasync def a():\n    asyncio.run(b())\n    asyncio.run(c())\n";
        let out = neutralize_nested_runs(source).unwrap();
        assert_eq!(out.lines, vec![3, 4]);
        assert_eq!(out.source.matches(RUN_HELPER).count(), 2);
        assert!(!out.source.contains("asyncio.run"));
    }
}
