//! JQL results: raw payload plus a best-effort tabular view.

use super::{TableCache, impl_dict};
use mp_core::Table;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JqlResult {
    pub script: String,
    pub raw: Value,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(JqlResult);

impl JqlResult {
    pub(crate) fn from_wire(script: &str, payload: Value) -> Self {
        JqlResult { script: script.to_string(), raw: payload, table: TableCache::default() }
    }

    /// Arrays of objects become labeled columns (union of keys, sorted);
    /// arrays of scalars become a single `value` column; anything else is
    /// one row with the raw payload.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| match self.raw.as_array() {
            Some(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
                let keys: BTreeSet<&str> = items
                    .iter()
                    .filter_map(Value::as_object)
                    .flat_map(|o| o.keys().map(String::as_str))
                    .collect();
                let columns: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                let rows = items
                    .iter()
                    .map(|item| {
                        columns
                            .iter()
                            .map(|k| item.get(k).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect();
                Table::new(columns, rows)
            }
            Some(items) => Table::new(
                vec!["value".to_string()],
                items.iter().map(|v| vec![v.clone()]).collect(),
            ),
            None => Table::new(vec!["result".to_string()], vec![vec![self.raw.clone()]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_rows_get_union_columns() {
        let result = JqlResult::from_wire(
            "function main() {}",
            json!([{"a": 1, "b": 2}, {"a": 3, "c": 4}]),
        );
        let table = result.to_table();
        assert_eq!(table.columns, vec!["a", "b", "c"]);
        assert_eq!(table.rows[1], vec![json!(3), json!(null), json!(4)]);
    }

    #[test]
    fn scalar_rows_get_value_column() {
        let result = JqlResult::from_wire("x", json!([1, 2, 3]));
        let table = result.to_table();
        assert_eq!(table.columns, vec!["value"]);
        assert_eq!(table.rows.len(), 3);
    }

    #[test]
    fn non_array_payload_is_one_row() {
        let result = JqlResult::from_wire("x", json!({"count": 7}));
        assert_eq!(result.to_table().rows.len(), 1);
    }

    #[test]
    fn dict_roundtrip() {
        let result = JqlResult::from_wire("x", json!([{"a": 1}]));
        assert_eq!(JqlResult::from_dict(&result.to_dict()).unwrap(), result);
    }
}
