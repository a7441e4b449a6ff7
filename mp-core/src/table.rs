//! The columns-plus-rows shape shared by SQL results and tabular views.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Labeled columns and row tuples. Cells are JSON scalars; timestamps are
/// rendered as ISO-8601 strings before they reach a `Table`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Table { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// RFC 4180 CSV with a header row.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_row(&mut out, self.columns.iter().map(String::as_str));
        for row in &self.rows {
            let rendered: Vec<String> = row.iter().map(cell_to_string).collect();
            push_csv_row(&mut out, rendered.iter().map(String::as_str));
        }
        // No trailing newline on the final row.
        out.truncate(out.trim_end_matches('\n').len());
        out
    }
}

/// A cell rendered for text output: bare strings and numbers, empty for null.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_csv_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(',');
        }
        first = false;
        if cell.contains([',', '"', '\n']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_matches_canonical_shape() {
        let table = Table::new(
            vec!["name".into(), "count".into()],
            vec![vec![json!("foo"), json!(123)]],
        );
        assert_eq!(table.to_csv(), "name,count\nfoo,123");
    }

    #[test]
    fn csv_quotes_cells_with_separators() {
        let table = Table::new(
            vec!["note".into()],
            vec![vec![json!("a,b")], vec![json!("say \"hi\"")]],
        );
        assert_eq!(table.to_csv(), "note\n\"a,b\"\n\"say \"\"hi\"\"\"");
    }

    #[test]
    fn null_cells_render_empty() {
        let table = Table::new(vec!["a".into(), "b".into()], vec![vec![json!(null), json!(1)]]);
        assert_eq!(table.to_csv(), "a,b\n,1");
    }
}
