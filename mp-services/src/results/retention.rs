//! Retention cohorts and the frequency ("addiction") family.

use super::{TableCache, impl_dict, number_cell};
use chrono::NaiveDate;
use mp_client::{FrequencyParams, RetentionParams};
use mp_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One birth cohort with per-period retention fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionCohort {
    pub date: String,
    pub size: u64,
    /// Fraction of the cohort returning in each period, in `[0, 1]`.
    pub retention: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionResult {
    pub born_event: String,
    pub return_event: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    pub cohorts: Vec<RetentionCohort>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(RetentionResult);

impl RetentionResult {
    /// Wire shape: `{date: {"counts": [...], "first": n}}`. Counts are
    /// absolute; they are normalized to fractions of the cohort size.
    pub(crate) fn from_wire(params: &RetentionParams, payload: &Value) -> Result<Self> {
        let by_date = payload
            .as_object()
            .ok_or_else(|| Error::query("retention payload is not an object"))?;
        let mut cohorts: Vec<RetentionCohort> = by_date
            .iter()
            .map(|(date, cohort)| {
                let size = cohort.get("first").and_then(Value::as_u64).unwrap_or(0);
                let retention = cohort
                    .get("counts")
                    .and_then(Value::as_array)
                    .map(|counts| {
                        counts
                            .iter()
                            .map(|c| {
                                let count = c.as_f64().unwrap_or(0.0);
                                if size == 0 { 0.0 } else { count / size as f64 }
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                RetentionCohort { date: date.clone(), size, retention }
            })
            .collect();
        cohorts.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(RetentionResult {
            born_event: params.born_event.clone(),
            return_event: params.return_event.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            cohorts,
            table: TableCache::default(),
        })
    }

    /// Wide view: `{cohort_date, cohort_size, period_0, period_1, ...}`,
    /// short cohorts padded with nulls.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            let periods = self.cohorts.iter().map(|c| c.retention.len()).max().unwrap_or(0);
            let mut columns = vec!["cohort_date".to_string(), "cohort_size".to_string()];
            columns.extend((0..periods).map(|i| format!("period_{i}")));
            let rows = self
                .cohorts
                .iter()
                .map(|cohort| {
                    let mut row = vec![Value::String(cohort.date.clone()), Value::from(cohort.size)];
                    for i in 0..periods {
                        row.push(
                            cohort
                                .retention
                                .get(i)
                                .map(|f| number_cell(*f))
                                .unwrap_or(Value::Null),
                        );
                    }
                    row
                })
                .collect();
            Table::new(columns, rows)
        })
    }
}

/// Frequency of use: per cohort date, how many users were active in
/// 1, 2, 3, ... sub-periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResult {
    pub event: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    pub addiction_unit: String,
    /// date -> counts per number of active sub-periods
    pub series: BTreeMap<String, Vec<f64>>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(FrequencyResult);

impl FrequencyResult {
    pub(crate) fn from_wire(params: &FrequencyParams, payload: &Value) -> Result<Self> {
        let data = payload
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::query("frequency payload is missing 'data'"))?;
        let series = data
            .iter()
            .map(|(date, counts)| {
                let counts = counts
                    .as_array()
                    .map(|a| a.iter().map(|c| c.as_f64().unwrap_or(0.0)).collect())
                    .unwrap_or_default();
                (date.clone(), counts)
            })
            .collect();
        Ok(FrequencyResult {
            event: params.event.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            addiction_unit: params.addiction_unit.to_string(),
            series,
            table: TableCache::default(),
        })
    }

    /// Columns `{date, periods_active, count}`.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            let mut rows = Vec::new();
            for (date, counts) in &self.series {
                for (i, count) in counts.iter().enumerate() {
                    rows.push(vec![
                        Value::String(date.clone()),
                        Value::from(i as u64 + 1),
                        number_cell(*count),
                    ]);
                }
            }
            Table::new(
                vec!["date".into(), "periods_active".into(), "count".into()],
                rows,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mp_client::Unit;
    use serde_json::json;

    fn params() -> RetentionParams {
        RetentionParams {
            born_event: "Signup".into(),
            return_event: Some("Login".into()),
            from_date: "2024-01-01".parse().unwrap(),
            to_date: "2024-01-31".parse().unwrap(),
            unit: Unit::Week,
            born_where: None,
            where_expr: None,
            interval_count: None,
        }
    }

    fn wire() -> Value {
        json!({
            "2024-01-08": {"counts": [50, 25], "first": 100},
            "2024-01-01": {"counts": [80, 40, 20], "first": 160}
        })
    }

    #[test]
    fn cohorts_sorted_and_normalized() {
        let result = RetentionResult::from_wire(&params(), &wire()).unwrap();
        assert_eq!(result.cohorts[0].date, "2024-01-01");
        assert_eq!(result.cohorts[0].size, 160);
        assert_eq!(result.cohorts[0].retention, vec![0.5, 0.25, 0.125]);
        assert_eq!(result.cohorts[1].retention, vec![0.5, 0.25]);
    }

    #[test]
    fn table_is_wide_and_padded() {
        let result = RetentionResult::from_wire(&params(), &wire()).unwrap();
        let table = result.to_table();
        assert_eq!(
            table.columns,
            vec!["cohort_date", "cohort_size", "period_0", "period_1", "period_2"]
        );
        // The shorter cohort is padded with a trailing null.
        assert_eq!(table.rows[1][4], Value::Null);
    }

    #[test]
    fn zero_size_cohort_yields_zero_fractions() {
        let payload = json!({"2024-01-01": {"counts": [5], "first": 0}});
        let result = RetentionResult::from_wire(&params(), &payload).unwrap();
        assert_eq!(result.cohorts[0].retention, vec![0.0]);
    }

    #[test]
    fn frequency_decodes_and_tabulates() {
        let params = FrequencyParams {
            event: Some("Play".into()),
            from_date: "2024-01-01".parse().unwrap(),
            to_date: "2024-01-07".parse().unwrap(),
            unit: Unit::Week,
            addiction_unit: Unit::Day,
            where_expr: None,
        };
        let payload = json!({"data": {"2024-01-01": [30, 12, 4]}});
        let result = FrequencyResult::from_wire(&params, &payload).unwrap();
        let table = result.to_table();
        assert_eq!(table.columns, vec!["date", "periods_active", "count"]);
        assert_eq!(table.rows[1], vec![json!("2024-01-01"), json!(2), json!(12)]);
    }

    #[test]
    fn dict_roundtrip() {
        let result = RetentionResult::from_wire(&params(), &wire()).unwrap();
        result.to_table();
        assert_eq!(RetentionResult::from_dict(&result.to_dict()).unwrap(), result);
    }

    #[test]
    fn frequency_dict_roundtrip() {
        let params = FrequencyParams {
            event: None,
            from_date: "2024-01-01".parse().unwrap(),
            to_date: "2024-01-07".parse().unwrap(),
            unit: Unit::Week,
            addiction_unit: Unit::Day,
            where_expr: None,
        };
        let payload = json!({"data": {"2024-01-01": [10, 5]}});
        let result = FrequencyResult::from_wire(&params, &payload).unwrap();
        result.to_table();
        assert_eq!(FrequencyResult::from_dict(&result.to_dict()).unwrap(), result);
    }
}
