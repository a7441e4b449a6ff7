//! Saved-funnel query results.

use super::{TableCache, impl_dict, number_cell};
use chrono::NaiveDate;
use mp_client::FunnelParams;
use mp_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One funnel step, aggregated over the queried date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub event: String,
    pub count: u64,
    /// Conversion from the previous step, in `[0, 1]`.
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelResult {
    pub funnel_id: i64,
    pub funnel_name: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    /// Overall conversion (last step over first step), in `[0, 1]`.
    pub conversion_rate: f64,
    pub steps: Vec<FunnelStep>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(FunnelResult);

impl FunnelResult {
    /// The wire shape is per-date: `{"meta": {"dates": [...]}, "data":
    /// {date: {"steps": [...], "analysis": {...}}}}`. Steps are summed
    /// across dates and conversion ratios recomputed from the totals.
    pub(crate) fn from_wire(params: &FunnelParams, payload: &Value) -> Result<Self> {
        let data = payload
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::query("funnel payload is missing 'data'"))?;

        let mut events: Vec<String> = Vec::new();
        let mut counts: Vec<u64> = Vec::new();
        let mut funnel_name = None;
        for day in data.values() {
            let Some(steps) = day.get("steps").and_then(Value::as_array) else { continue };
            for (i, step) in steps.iter().enumerate() {
                let event = step
                    .get("goal")
                    .or_else(|| step.get("event"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let count = step.get("count").and_then(Value::as_u64).unwrap_or(0);
                if i >= events.len() {
                    events.push(event);
                    counts.push(count);
                } else {
                    counts[i] += count;
                }
            }
            if funnel_name.is_none() {
                funnel_name = day
                    .get("analysis")
                    .and_then(|a| a.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from);
            }
        }
        if funnel_name.is_none() {
            funnel_name = payload
                .get("meta")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .map(String::from);
        }

        let steps: Vec<FunnelStep> = events
            .into_iter()
            .zip(counts.iter().copied())
            .enumerate()
            .map(|(i, (event, count))| FunnelStep {
                event,
                count,
                conversion_rate: if i == 0 {
                    1.0
                } else if counts[i - 1] == 0 {
                    0.0
                } else {
                    count as f64 / counts[i - 1] as f64
                },
            })
            .collect();

        let conversion_rate = match (counts.first(), counts.last()) {
            (Some(&first), Some(&last)) if first > 0 => last as f64 / first as f64,
            _ => 0.0,
        };

        Ok(FunnelResult {
            funnel_id: params.funnel_id,
            funnel_name,
            from_date: params.from_date,
            to_date: params.to_date,
            conversion_rate,
            steps,
            table: TableCache::default(),
        })
    }

    /// Columns `{step, event, count, conversion_rate}`.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            let rows = self
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    vec![
                        Value::from(i as u64),
                        Value::String(step.event.clone()),
                        Value::from(step.count),
                        number_cell(step.conversion_rate),
                    ]
                })
                .collect();
            Table::new(
                vec!["step".into(), "event".into(), "count".into(), "conversion_rate".into()],
                rows,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> FunnelParams {
        FunnelParams {
            funnel_id: 42,
            from_date: "2024-01-01".parse().unwrap(),
            to_date: "2024-01-02".parse().unwrap(),
            unit: None,
        }
    }

    fn wire() -> Value {
        json!({
            "meta": {"dates": ["2024-01-01", "2024-01-02"]},
            "data": {
                "2024-01-01": {
                    "steps": [
                        {"goal": "Signup", "count": 100, "step_conv_ratio": 1.0},
                        {"goal": "Purchase", "count": 40, "step_conv_ratio": 0.4}
                    ],
                    "analysis": {"completion": 40, "starting_amount": 100}
                },
                "2024-01-02": {
                    "steps": [
                        {"goal": "Signup", "count": 100, "step_conv_ratio": 1.0},
                        {"goal": "Purchase", "count": 10, "step_conv_ratio": 0.1}
                    ],
                    "analysis": {"completion": 10, "starting_amount": 100}
                }
            }
        })
    }

    #[test]
    fn sums_steps_across_dates() {
        let result = FunnelResult::from_wire(&params(), &wire()).unwrap();
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].count, 200);
        assert_eq!(result.steps[1].count, 50);
        assert!((result.conversion_rate - 0.25).abs() < 1e-9);
        assert!((result.steps[1].conversion_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn empty_funnel_has_zero_conversion() {
        let result = FunnelResult::from_wire(&params(), &json!({"data": {}})).unwrap();
        assert!(result.steps.is_empty());
        assert_eq!(result.conversion_rate, 0.0);
    }

    #[test]
    fn dict_roundtrip() {
        let result = FunnelResult::from_wire(&params(), &wire()).unwrap();
        let back = FunnelResult::from_dict(&result.to_dict()).unwrap();
        assert_eq!(back, result);
    }
}
