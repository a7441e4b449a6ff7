//! Segmentation-family results: general, numeric buckets, sums, averages.

use super::{TableCache, impl_dict, number_cell};
use chrono::NaiveDate;
use mp_client::SegmentationParams;
use mp_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

type SeriesMap = BTreeMap<String, BTreeMap<String, f64>>;

/// Counts per segment per date bucket. Without an `on` expression the
/// series collapses to a single segment key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub event: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    pub segment_property: Option<String>,
    pub total: f64,
    /// segment -> date -> count
    pub series: SeriesMap,
    /// Date buckets in server order.
    pub dates: Vec<String>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(SegmentationResult);

impl SegmentationResult {
    pub(crate) fn from_wire(params: &SegmentationParams, payload: &Value) -> Result<Self> {
        let (dates, series) = decode_series(payload)?;
        let total = series.values().flat_map(|by_date| by_date.values()).sum();
        Ok(SegmentationResult {
            event: params.event.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            segment_property: params.on.clone(),
            total,
            series,
            dates,
            table: TableCache::default(),
        })
    }

    /// Columns `{date, segment, count}`, date-major, segments alphabetical.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            series_table(&self.dates, &self.series, &["date", "segment", "count"])
        })
    }
}

/// Counts per numeric bucket of the `on` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericBucketResult {
    pub event: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    pub on: String,
    /// bucket label -> date -> count
    pub series: SeriesMap,
    pub dates: Vec<String>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(NumericBucketResult);

impl NumericBucketResult {
    pub(crate) fn from_wire(params: &SegmentationParams, payload: &Value) -> Result<Self> {
        let (dates, series) = decode_series(payload)?;
        Ok(NumericBucketResult {
            event: params.event.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            on: params.on.clone().unwrap_or_default(),
            series,
            dates,
            table: TableCache::default(),
        })
    }

    pub fn to_table(&self) -> &Table {
        self.table
            .get_or_init(|| series_table(&self.dates, &self.series, &["date", "bucket", "count"]))
    }
}

/// Per-date sums of the `on` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSumResult {
    pub event: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    pub on: String,
    /// date -> sum
    pub series: BTreeMap<String, f64>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(NumericSumResult);

impl NumericSumResult {
    pub(crate) fn from_wire(params: &SegmentationParams, payload: &Value) -> Result<Self> {
        Ok(NumericSumResult {
            event: params.event.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            on: params.on.clone().unwrap_or_default(),
            series: decode_flat_results(payload)?,
            table: TableCache::default(),
        })
    }

    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| flat_table(&self.series, &["date", "sum"]))
    }
}

/// Per-date averages of the `on` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericAverageResult {
    pub event: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    pub on: String,
    /// date -> average
    pub series: BTreeMap<String, f64>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(NumericAverageResult);

impl NumericAverageResult {
    pub(crate) fn from_wire(params: &SegmentationParams, payload: &Value) -> Result<Self> {
        Ok(NumericAverageResult {
            event: params.event.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            on: params.on.clone().unwrap_or_default(),
            series: decode_flat_results(payload)?,
            table: TableCache::default(),
        })
    }

    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| flat_table(&self.series, &["date", "average"]))
    }
}

/// Decode the `{"data": {"series": [...], "values": {...}}}` wire shape.
pub(crate) fn decode_series(payload: &Value) -> Result<(Vec<String>, SeriesMap)> {
    let data = payload
        .get("data")
        .ok_or_else(|| Error::query("segmentation payload is missing 'data'"))?;
    let dates: Vec<String> = data
        .get("series")
        .and_then(Value::as_array)
        .map(|series| {
            series.iter().filter_map(|v| v.as_str().map(String::from)).collect()
        })
        .unwrap_or_default();
    let mut series = SeriesMap::new();
    if let Some(values) = data.get("values").and_then(Value::as_object) {
        for (segment, by_date) in values {
            let Some(by_date) = by_date.as_object() else { continue };
            let decoded = by_date
                .iter()
                .filter_map(|(date, count)| count.as_f64().map(|c| (date.clone(), c)))
                .collect();
            series.insert(segment.clone(), decoded);
        }
    }
    Ok((dates, series))
}

/// Decode the `{"results": {date: number}}` wire shape of sum/average.
fn decode_flat_results(payload: &Value) -> Result<BTreeMap<String, f64>> {
    let results = payload
        .get("results")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::query("numeric payload is missing 'results'"))?;
    Ok(results
        .iter()
        .filter_map(|(date, value)| value.as_f64().map(|v| (date.clone(), v)))
        .collect())
}

pub(crate) fn series_table(dates: &[String], series: &SeriesMap, columns: &[&str]) -> Table {
    let mut rows = Vec::new();
    let dates: Vec<&String> = if dates.is_empty() {
        // Fall back to the union of dates observed in the series.
        let mut all: Vec<&String> = series.values().flat_map(|m| m.keys()).collect();
        all.sort();
        all.dedup();
        all
    } else {
        dates.iter().collect()
    };
    for date in dates {
        for (segment, by_date) in series {
            if let Some(count) = by_date.get(date.as_str()) {
                rows.push(vec![
                    Value::String(date.clone()),
                    Value::String(segment.clone()),
                    number_cell(*count),
                ]);
            }
        }
    }
    Table::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

fn flat_table(series: &BTreeMap<String, f64>, columns: &[&str]) -> Table {
    let rows = series
        .iter()
        .map(|(date, value)| vec![Value::String(date.clone()), number_cell(*value)])
        .collect();
    Table::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> SegmentationParams {
        let mut p = SegmentationParams::new(
            "Purchase",
            "2024-01-01".parse().unwrap(),
            "2024-01-02".parse().unwrap(),
        );
        p.on = Some("properties[\"country\"]".to_string());
        p
    }

    fn wire() -> Value {
        json!({
            "data": {
                "series": ["2024-01-01", "2024-01-02"],
                "values": {"US": {"2024-01-01": 10, "2024-01-02": 20}}
            },
            "legend_size": 1
        })
    }

    #[test]
    fn normalizes_series_and_total() {
        let result = SegmentationResult::from_wire(&params(), &wire()).unwrap();
        assert_eq!(result.total, 30.0);
        assert_eq!(result.series["US"]["2024-01-02"], 20.0);
        assert_eq!(result.dates, vec!["2024-01-01", "2024-01-02"]);
    }

    #[test]
    fn table_is_date_major() {
        let result = SegmentationResult::from_wire(&params(), &wire()).unwrap();
        let table = result.to_table();
        assert_eq!(table.columns, vec!["date", "segment", "count"]);
        assert_eq!(
            table.rows,
            vec![
                vec![json!("2024-01-01"), json!("US"), json!(10)],
                vec![json!("2024-01-02"), json!("US"), json!(20)],
            ]
        );
    }

    #[test]
    fn dict_roundtrip() {
        let result = SegmentationResult::from_wire(&params(), &wire()).unwrap();
        result.to_table();
        let back = SegmentationResult::from_dict(&result.to_dict()).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn sum_decodes_flat_results() {
        let mut p = params();
        p.on = Some("properties[\"amount\"]".to_string());
        let payload = json!({"results": {"2024-01-01": 12.5, "2024-01-02": 7.0}, "status": "ok"});
        let result = NumericSumResult::from_wire(&p, &payload).unwrap();
        assert_eq!(result.series["2024-01-01"], 12.5);
        let table = result.to_table();
        assert_eq!(table.columns, vec!["date", "sum"]);
        assert_eq!(table.rows[0], vec![json!("2024-01-01"), json!(12.5)]);
    }

    #[test]
    fn missing_data_key_is_rejected() {
        let err = SegmentationResult::from_wire(&params(), &json!({})).unwrap_err();
        assert_eq!(err.code(), "QUERY_FAILED");
    }

    #[test]
    fn bucket_result_tabulates_and_roundtrips() {
        let mut p = params();
        p.on = Some("properties[\"amount\"]".to_string());
        let payload = json!({
            "data": {
                "series": ["2024-01-01"],
                "values": {"0 - 10": {"2024-01-01": 4}, "10 - 20": {"2024-01-01": 2}}
            }
        });
        let result = NumericBucketResult::from_wire(&p, &payload).unwrap();
        let table = result.to_table();
        assert_eq!(table.columns, vec!["date", "bucket", "count"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(NumericBucketResult::from_dict(&result.to_dict()).unwrap(), result);
    }

    #[test]
    fn average_result_roundtrips() {
        let mut p = params();
        p.on = Some("properties[\"amount\"]".to_string());
        let payload = json!({"results": {"2024-01-01": 3.5}, "status": "ok"});
        let result = NumericAverageResult::from_wire(&p, &payload).unwrap();
        assert_eq!(result.to_table().columns, vec!["date", "average"]);
        assert_eq!(NumericAverageResult::from_dict(&result.to_dict()).unwrap(), result);
    }
}
