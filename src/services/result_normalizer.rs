use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::config::NormalizerConfig;
use crate::models::{ErrorKind, ExecutionResult, ExecutionState, ResultEnvelope, ResultTable, ResultType};

/// Converts executor output into the caller-facing envelope.
///
/// Shape mapping:
/// - 1 row, 1 column: `scalar`
/// - 1 row, several columns: `record` keyed by column name
/// - several rows, 1 column: `list`
/// - anything else, including no rows: `table`
///
/// Lists and tables keep at most `row_cap` rows and set `truncated` when
/// rows were dropped. `row_count` always reports the full count.
#[derive(Debug, Clone)]
pub struct ResultNormalizer {
    row_cap: usize,
}

impl Default for ResultNormalizer {
    fn default() -> Self {
        Self { row_cap: 50 }
    }
}

impl From<&NormalizerConfig> for ResultNormalizer {
    fn from(config: &NormalizerConfig) -> Self {
        Self::new(config.row_cap)
    }
}

impl ResultNormalizer {
    pub fn new(row_cap: usize) -> Self {
        Self { row_cap: row_cap.max(1) }
    }

    pub fn row_cap(&self) -> usize {
        self.row_cap
    }

    pub fn normalize(&self, result: &ExecutionResult) -> ResultEnvelope {
        if let Some(error) = &result.error {
            return ResultEnvelope::error(error.kind, error.message.clone());
        }
        match (&result.state, &result.table) {
            (ExecutionState::Completed, Some(table)) => self.shape(table),
            (state, _) => ResultEnvelope::error(
                ErrorKind::ExecutionFailure,
                format!("execution ended in state {:?} without a result", state),
            ),
        }
    }

    fn shape(&self, table: &ResultTable) -> ResultEnvelope {
        let rows = table.row_count();
        let columns = table.column_count();
        let truncated = rows > self.row_cap;
        let kept = &table.rows[..rows.min(self.row_cap)];
        debug!("Normalizing {}x{} result (truncated: {})", rows, columns, truncated);

        match (rows, columns) {
            (1, 1) => ResultEnvelope::ok(ResultType::Scalar, round(&table.rows[0][0]), 1, false),
            (1, _) => {
                let record: Map<String, Value> = table
                    .columns
                    .iter()
                    .cloned()
                    .zip(table.rows[0].iter().map(round))
                    .collect();
                ResultEnvelope::ok(ResultType::Record, Value::Object(record), 1, false)
            }
            (r, 1) if r > 1 => {
                let values = kept
                    .iter()
                    .map(|row| row.first().map(round).unwrap_or(Value::Null))
                    .collect();
                ResultEnvelope::ok(ResultType::List, Value::Array(values), rows, truncated)
            }
            _ => {
                let payload = serde_json::json!({
                    "columns": table.columns,
                    "rows": kept
                        .iter()
                        .map(|row| Value::Array(row.iter().map(round).collect()))
                        .collect::<Vec<_>>(),
                });
                ResultEnvelope::ok(ResultType::Table, payload, rows, truncated)
            }
        }
    }
}

/// Fractional numbers are rounded to two decimals; everything else passes through
fn round(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .and_then(|f| Number::from_f64((f * 100.0).round() / 100.0))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PipelineError;
    use serde_json::json;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> ExecutionResult {
        let table = ResultTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        };
        ExecutionResult::completed(table, vec![], 1)
    }

    #[test]
    fn test_scalar() {
        let envelope = ResultNormalizer::default().normalize(&table(&["wickets"], vec![vec![json!(5)]]));
        assert_eq!(envelope.result_type, Some(ResultType::Scalar));
        assert_eq!(envelope.payload, Some(json!(5)));
        assert_eq!(envelope.row_count, 1);
    }

    #[test]
    fn test_zero_is_a_result() {
        let envelope = ResultNormalizer::default().normalize(&table(&["wickets"], vec![vec![json!(0)]]));
        assert!(envelope.is_ok());
        assert_eq!(envelope.payload, Some(json!(0)));
    }

    #[test]
    fn test_record_rounds_floats() {
        let envelope = ResultNormalizer::default().normalize(&table(
            &["runs", "strike_rate"],
            vec![vec![json!(120), json!(133.33333)]],
        ));
        assert_eq!(envelope.result_type, Some(ResultType::Record));
        assert_eq!(envelope.payload, Some(json!({"runs": 120, "strike_rate": 133.33})));
    }

    #[test]
    fn test_list_truncation() {
        let rows = (0..5).map(|i| vec![json!(i)]).collect();
        let envelope = ResultNormalizer::new(3).normalize(&table(&["season"], rows));
        assert_eq!(envelope.result_type, Some(ResultType::List));
        assert_eq!(envelope.payload, Some(json!([0, 1, 2])));
        assert_eq!(envelope.row_count, 5);
        assert!(envelope.truncated);
    }

    #[test]
    fn test_table_and_empty_table() {
        let rows = vec![vec![json!("A"), json!(3)], vec![json!("B"), json!(2)]];
        let envelope = ResultNormalizer::default().normalize(&table(&["bowler", "wickets"], rows));
        assert_eq!(envelope.result_type, Some(ResultType::Table));
        assert_eq!(envelope.payload.as_ref().unwrap()["rows"][1], json!(["B", 2]));
        assert!(!envelope.truncated);

        let empty = ResultNormalizer::default().normalize(&table(&["bowler", "wickets"], vec![]));
        assert!(empty.is_ok());
        assert_eq!(empty.result_type, Some(ResultType::Table));
        assert_eq!(empty.row_count, 0);
        assert_eq!(empty.payload.unwrap()["rows"], json!([]));
    }

    #[test]
    fn test_failure_keeps_kind() {
        let failed = ExecutionResult::failed(&PipelineError::ResourceExceeded { stage: 2, limit: 10 }, vec![], 4);
        let envelope = ResultNormalizer::default().normalize(&failed);
        assert!(!envelope.is_ok());
        assert!(envelope.payload.is_none());
        assert_eq!(envelope.error_kind(), Some(ErrorKind::ResourceExceeded));
    }
}
