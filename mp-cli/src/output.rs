//! Plain-text rendering for CLI output.

use mp_core::Table;
use mp_core::table::cell_to_string;

/// Render a table with padded columns and a header separator.
pub fn render_table(table: &Table) -> String {
    if table.columns.is_empty() {
        return String::new();
    }
    let mut widths: Vec<usize> = table.columns.iter().map(String::len).collect();
    let rendered_rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, cell)| {
                    let s = cell_to_string(cell);
                    if i < widths.len() {
                        widths[i] = widths[i].max(s.len());
                    }
                    s
                })
                .collect()
        })
        .collect();

    let mut out = String::new();
    for (i, column) in table.columns.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&format!("{column:<width$}", width = widths[i]));
    }
    out.push('\n');
    for (i, _) in table.columns.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&"-".repeat(widths[i]));
    }
    out.push('\n');
    for row in rendered_rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            out.push_str(&format!("{cell:<width$}", width = widths.get(i).copied().unwrap_or(0)));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "({} row{})\n",
        table.rows.len(),
        if table.rows.len() == 1 { "" } else { "s" }
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_padded_columns() {
        let table = Table::new(
            vec!["name".into(), "count".into()],
            vec![vec![json!("checkout"), json!(12)]],
        );
        let rendered = render_table(&table);
        assert!(rendered.contains("name      count"));
        assert!(rendered.contains("checkout  12"));
        assert!(rendered.contains("(1 row)"));
    }
}
