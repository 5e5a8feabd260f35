//! Execution namespace.
//!
//! A scanner's module globals after it ran, as an explicit value. One is
//! built per execution from the worker snapshot and dropped after
//! harvesting; nothing outlives the execution that produced it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::ResultRecord;

/// A value captured from the scanner's namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapturedValue {
    /// DataFrame-like value, rows in native order
    Table {
        #[serde(default)]
        rows: Vec<serde_json::Value>,
        #[serde(default)]
        type_name: String,
    },
    /// List or tuple of mappings
    List {
        #[serde(default)]
        rows: Vec<serde_json::Value>,
        #[serde(default)]
        type_name: String,
    },
    /// Anything else; only the type is recorded
    Other {
        #[serde(default)]
        type_name: String,
    },
}

impl CapturedValue {
    pub fn table(rows: Vec<serde_json::Value>) -> Self {
        Self::Table {
            rows,
            type_name: "DataFrame".to_string(),
        }
    }

    pub fn list(rows: Vec<serde_json::Value>) -> Self {
        Self::List {
            rows,
            type_name: "list".to_string(),
        }
    }

    pub fn other(type_name: impl Into<String>) -> Self {
        Self::Other {
            type_name: type_name.into(),
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List { .. })
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Table { type_name, .. } | Self::List { type_name, .. } | Self::Other { type_name } => {
                type_name
            }
        }
    }

    /// Rows as records. Non-mapping rows are wrapped as `{"value": row}`.
    pub fn records(&self) -> Vec<ResultRecord> {
        let rows = match self {
            Self::Table { rows, .. } | Self::List { rows, .. } => rows,
            Self::Other { .. } => return Vec::new(),
        };
        rows.iter()
            .map(|row| match row {
                serde_json::Value::Object(map) => map.clone(),
                other => {
                    let mut map = ResultRecord::new();
                    map.insert("value".to_string(), other.clone());
                    map
                }
            })
            .collect()
    }
}

/// A name bound in the namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: CapturedValue,
    /// Last source line assigning the name, when known
    pub bound_at: Option<usize>,
}

/// Binding as reported by the worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotBinding {
    pub name: String,
    pub value: CapturedValue,
}

/// Module globals of one finished (or aborted) execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    bindings: Vec<Binding>,
    return_value: Option<CapturedValue>,
    names: Vec<String>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a worker snapshot, attaching source binding lines.
    pub fn from_snapshot(
        bindings: Vec<SnapshotBinding>,
        return_value: Option<CapturedValue>,
        names: Vec<String>,
        binding_lines: &HashMap<String, usize>,
    ) -> Self {
        let mut namespace = Self {
            bindings: Vec::with_capacity(bindings.len()),
            return_value,
            names,
        };
        for binding in bindings {
            let line = binding_lines.get(&binding.name).copied();
            namespace.bind(binding.name, binding.value, line);
        }
        namespace
    }

    /// Bind a name, replacing an earlier binding of the same name.
    pub fn bind(&mut self, name: impl Into<String>, value: CapturedValue, bound_at: Option<usize>) {
        let name = name.into();
        self.bindings.retain(|b| b.name != name);
        if !self.names.contains(&name) {
            self.names.push(name.clone());
        }
        self.bindings.push(Binding {
            name,
            value,
            bound_at,
        });
    }

    pub fn set_return_value(&mut self, value: CapturedValue) {
        self.return_value = Some(value);
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn return_value(&self) -> Option<&CapturedValue> {
        self.return_value.as_ref()
    }

    /// Every user-visible name the scanner bound, captured or not.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.return_value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_binding_deserialization() {
        let raw = json!({
            "name": "results",
            "value": {"kind": "table", "rows": [{"ticker": "AAPL"}], "type_name": "DataFrame"}
        });
        let binding: SnapshotBinding = serde_json::from_value(raw).unwrap();
        assert_eq!(binding.name, "results");
        assert!(binding.value.is_table());
        assert_eq!(binding.value.records().len(), 1);
    }

    #[test]
    fn test_other_value_has_no_records() {
        let value: CapturedValue =
            serde_json::from_value(json!({"kind": "other", "type_name": "dict"})).unwrap();
        assert!(value.records().is_empty());
        assert_eq!(value.type_name(), "dict");
    }

    #[test]
    fn test_scalar_rows_are_wrapped() {
        let value = CapturedValue::list(vec![json!("AAPL")]);
        let records = value.records();
        assert_eq!(records[0]["value"], json!("AAPL"));
    }

    #[test]
    fn test_from_snapshot_attaches_lines() {
        let mut lines = HashMap::new();
        lines.insert("df".to_string(), 7);
        let namespace = Namespace::from_snapshot(
            vec![SnapshotBinding {
                name: "df".into(),
                value: CapturedValue::table(vec![]),
            }],
            None,
            vec!["df".into(), "pd".into()],
            &lines,
        );
        assert_eq!(namespace.get("df").unwrap().bound_at, Some(7));
        assert_eq!(namespace.names().len(), 2);
    }

    #[test]
    fn test_rebinding_replaces() {
        let mut namespace = Namespace::new();
        namespace.bind("results", CapturedValue::list(vec![]), Some(1));
        namespace.bind("results", CapturedValue::table(vec![json!({"a": 1})]), Some(4));
        assert_eq!(namespace.bindings().len(), 1);
        assert!(namespace.get("results").unwrap().value.is_table());
    }
}
