//! Result harvesting.
//!
//! Scanners store their output under whatever name their author liked. The
//! harvester looks through a fixed, ordered table of conventional names and
//! picks the best-ranked binding present in the namespace. New conventions
//! are new rows in [`HARVEST_TABLE`].

use std::cmp::Reverse;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::EntryPointShape;
use crate::namespace::{CapturedValue, Namespace};
use crate::types::ResultRecord;

/// Value shape a harvest candidate may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedShape {
    Table,
    List,
    Either,
}

impl ExpectedShape {
    fn accepts(self, value: &CapturedValue) -> bool {
        match self {
            Self::Table => value.is_table(),
            Self::List => value.is_list(),
            Self::Either => value.is_table() || value.is_list(),
        }
    }
}

/// One row of the harvest table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestEntry {
    pub name: &'static str,
    pub expected: ExpectedShape,
    /// Lower tiers are stronger result conventions
    pub tier: u8,
}

const fn entry(name: &'static str, expected: ExpectedShape, tier: u8) -> HarvestEntry {
    HarvestEntry {
        name,
        expected,
        tier,
    }
}

/// Conventional result variable names, strongest first.
pub const HARVEST_TABLE: &[HarvestEntry] = &[
    entry("results", ExpectedShape::Either, 0),
    entry("result", ExpectedShape::Either, 0),
    entry("scan_results", ExpectedShape::Either, 0),
    entry("signals", ExpectedShape::Either, 0),
    entry("matches", ExpectedShape::Either, 0),
    entry("filtered_results", ExpectedShape::Either, 0),
    entry("hits", ExpectedShape::Either, 0),
    entry("results_df", ExpectedShape::Table, 1),
    entry("df_results", ExpectedShape::Table, 1),
    entry("filtered_df", ExpectedShape::Table, 1),
    entry("df_filtered", ExpectedShape::Table, 1),
    entry("final_df", ExpectedShape::Table, 1),
    entry("output", ExpectedShape::Either, 1),
    entry("output_df", ExpectedShape::Table, 1),
    entry("signals_df", ExpectedShape::Table, 1),
    entry("df", ExpectedShape::Table, 2),
    entry("data", ExpectedShape::Either, 2),
];

/// Names the worker should capture.
pub fn candidate_names() -> Vec<&'static str> {
    HARVEST_TABLE.iter().map(|e| e.name).collect()
}

/// Where harvested records came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestSource {
    Variable(String),
    ReturnValue,
}

impl fmt::Display for HarvestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(name) => f.write_str(name),
            Self::ReturnValue => f.write_str("<return>"),
        }
    }
}

/// Records recovered from a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Harvest {
    pub source: HarvestSource,
    pub table_like: bool,
    pub records: Vec<ResultRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HarvestOutcome {
    Found(Harvest),
    NotFound,
}

impl HarvestOutcome {
    pub fn record_count(&self) -> usize {
        match self {
            Self::Found(harvest) => harvest.records.len(),
            Self::NotFound => 0,
        }
    }
}

/// Recover the result set from an execution namespace.
///
/// Ranking: table-like before list-like, then lower tier, then the name
/// bound latest in source order, then table order. Function shapes fall
/// back to the callable's return value when no conventional name matches.
pub fn harvest(namespace: &Namespace, shape: &EntryPointShape) -> HarvestOutcome {
    let best = HARVEST_TABLE
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let binding = namespace.get(entry.name)?;
            if !entry.expected.accepts(&binding.value) {
                return None;
            }
            let rank = (
                !binding.value.is_table(),
                entry.tier,
                Reverse(binding.bound_at.unwrap_or(0)),
                index,
            );
            Some((rank, binding))
        })
        .min_by_key(|(rank, _)| *rank);

    if let Some((_, binding)) = best {
        debug!(
            variable = %binding.name,
            type_name = %binding.value.type_name(),
            "Harvested result variable"
        );
        return HarvestOutcome::Found(Harvest {
            source: HarvestSource::Variable(binding.name.clone()),
            table_like: binding.value.is_table(),
            records: binding.value.records(),
        });
    }

    if shape.returns_results() {
        if let Some(value) = namespace.return_value() {
            if value.is_table() || value.is_list() {
                debug!(type_name = %value.type_name(), "Harvested callable return value");
                return HarvestOutcome::Found(Harvest {
                    source: HarvestSource::ReturnValue,
                    table_like: value.is_table(),
                    records: value.records(),
                });
            }
        }
    }

    HarvestOutcome::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(tickers: &[&str]) -> Vec<serde_json::Value> {
        tickers.iter().map(|t| json!({"ticker": t})).collect()
    }

    fn tickers(outcome: &HarvestOutcome) -> Vec<String> {
        match outcome {
            HarvestOutcome::Found(h) => h
                .records
                .iter()
                .map(|r| r["ticker"].as_str().unwrap().to_string())
                .collect(),
            HarvestOutcome::NotFound => panic!("nothing harvested"),
        }
    }

    #[test]
    fn test_table_preferred_over_list() {
        let mut ns = Namespace::new();
        ns.bind("results", CapturedValue::list(rows(&["A"])), Some(10));
        ns.bind("df", CapturedValue::table(rows(&["B"])), Some(2));
        assert_eq!(tickers(&harvest(&ns, &EntryPointShape::BareScript)), vec!["B"]);
    }

    #[test]
    fn test_lower_tier_wins_among_tables() {
        let mut ns = Namespace::new();
        ns.bind("df", CapturedValue::table(rows(&["raw"])), Some(20));
        ns.bind("filtered_df", CapturedValue::table(rows(&["kept"])), Some(5));
        assert_eq!(tickers(&harvest(&ns, &EntryPointShape::BareScript)), vec!["kept"]);
    }

    #[test]
    fn test_latest_binding_breaks_tier_ties() {
        let mut ns = Namespace::new();
        ns.bind("results", CapturedValue::table(rows(&["early"])), Some(3));
        ns.bind("signals", CapturedValue::table(rows(&["late"])), Some(9));
        assert_eq!(tickers(&harvest(&ns, &EntryPointShape::BareScript)), vec!["late"]);
    }

    #[test]
    fn test_df_rows_in_native_order() {
        let mut ns = Namespace::new();
        ns.bind("df", CapturedValue::table(rows(&["NVDA", "AAPL", "TSLA"])), Some(4));
        ns.bind("data", CapturedValue::other("dict"), Some(8));
        let outcome = harvest(&ns, &EntryPointShape::BareScript);
        assert_eq!(tickers(&outcome), vec!["NVDA", "AAPL", "TSLA"]);
        match outcome {
            HarvestOutcome::Found(h) => assert_eq!(h.source, HarvestSource::Variable("df".into())),
            HarvestOutcome::NotFound => unreachable!(),
        }
    }

    #[test]
    fn test_table_only_entry_rejects_list() {
        let mut ns = Namespace::new();
        ns.bind("df", CapturedValue::list(rows(&["X"])), Some(1));
        assert_eq!(harvest(&ns, &EntryPointShape::BareScript), HarvestOutcome::NotFound);
    }

    #[test]
    fn test_return_value_fallback_for_functions() {
        let mut ns = Namespace::new();
        ns.set_return_value(CapturedValue::list(rows(&["AMD"])));
        let outcome = harvest(&ns, &EntryPointShape::AsyncFunction("main".into()));
        assert_eq!(tickers(&outcome), vec!["AMD"]);
        assert_eq!(outcome.record_count(), 1);
    }

    #[test]
    fn test_no_return_fallback_for_bare_scripts() {
        let mut ns = Namespace::new();
        ns.set_return_value(CapturedValue::list(rows(&["AMD"])));
        assert_eq!(harvest(&ns, &EntryPointShape::BareScript), HarvestOutcome::NotFound);
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let mut ns = Namespace::new();
        ns.bind("my_custom_output", CapturedValue::table(rows(&["Q"])), Some(1));
        assert_eq!(harvest(&ns, &EntryPointShape::BareScript), HarvestOutcome::NotFound);
    }

    #[test]
    fn test_table_names_are_unique() {
        let mut names = candidate_names();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
