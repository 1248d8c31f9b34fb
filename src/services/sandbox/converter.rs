// Result conversion
//
// Converts the final stage's RecordBatches into a ResultTable of JSON values.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate};
use datafusion::arrow::array::*;
use datafusion::arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use serde_json::{json, Value as JsonValue};

use crate::models::ResultTable;

/// Converts Arrow batches to JSON rows
pub struct ResultTableConverter;

macro_rules! downcast {
    ($array:expr, $ty:ty) => {
        $array
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| anyhow!("Failed to downcast to {}", stringify!($ty)))?
    };
}

impl ResultTableConverter {
    pub fn convert(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<ResultTable> {
        let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

        let mut rows = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
        for batch in batches {
            for row_idx in 0..batch.num_rows() {
                let mut row = Vec::with_capacity(batch.num_columns());
                for column in batch.columns() {
                    row.push(Self::array_value_to_json(column, row_idx)?);
                }
                rows.push(row);
            }
        }

        Ok(ResultTable { columns, rows })
    }

    fn array_value_to_json(array: &ArrayRef, row_idx: usize) -> Result<JsonValue> {
        if array.is_null(row_idx) {
            return Ok(JsonValue::Null);
        }

        let value = match array.data_type() {
            DataType::Boolean => json!(downcast!(array, BooleanArray).value(row_idx)),

            DataType::Int8 => json!(downcast!(array, Int8Array).value(row_idx)),
            DataType::Int16 => json!(downcast!(array, Int16Array).value(row_idx)),
            DataType::Int32 => json!(downcast!(array, Int32Array).value(row_idx)),
            DataType::Int64 => json!(downcast!(array, Int64Array).value(row_idx)),
            DataType::UInt8 => json!(downcast!(array, UInt8Array).value(row_idx)),
            DataType::UInt16 => json!(downcast!(array, UInt16Array).value(row_idx)),
            DataType::UInt32 => json!(downcast!(array, UInt32Array).value(row_idx)),
            DataType::UInt64 => json!(downcast!(array, UInt64Array).value(row_idx)),

            // Non-finite floats have no JSON form
            DataType::Float32 => float(f64::from(downcast!(array, Float32Array).value(row_idx))),
            DataType::Float64 => float(downcast!(array, Float64Array).value(row_idx)),

            DataType::Decimal128(_, scale) => {
                let value = downcast!(array, Decimal128Array).value(row_idx);
                let divisor = 10_f64.powi(i32::from(*scale));
                float(value as f64 / divisor)
            }

            DataType::Utf8 => json!(downcast!(array, StringArray).value(row_idx)),
            DataType::LargeUtf8 => json!(downcast!(array, LargeStringArray).value(row_idx)),
            DataType::Utf8View => json!(downcast!(array, StringViewArray).value(row_idx)),

            DataType::Date32 => {
                let days = downcast!(array, Date32Array).value(row_idx);
                // Date32 counts days since the Unix epoch
                let date = NaiveDate::from_num_days_from_ce_opt(days + 719_163)
                    .ok_or_else(|| anyhow!("Invalid date value"))?;
                json!(date.format("%Y-%m-%d").to_string())
            }
            DataType::Date64 => {
                let millis = downcast!(array, Date64Array).value(row_idx);
                let datetime = DateTime::from_timestamp_millis(millis).ok_or_else(|| anyhow!("Invalid date value"))?;
                json!(datetime.format("%Y-%m-%d").to_string())
            }
            DataType::Timestamp(unit, _) => {
                let timestamp = match unit {
                    TimeUnit::Second => DateTime::from_timestamp(downcast!(array, TimestampSecondArray).value(row_idx), 0),
                    TimeUnit::Millisecond => {
                        DateTime::from_timestamp_millis(downcast!(array, TimestampMillisecondArray).value(row_idx))
                    }
                    TimeUnit::Microsecond => {
                        DateTime::from_timestamp_micros(downcast!(array, TimestampMicrosecondArray).value(row_idx))
                    }
                    TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(
                        downcast!(array, TimestampNanosecondArray).value(row_idx),
                    )),
                };
                let dt = timestamp.ok_or_else(|| anyhow!("Invalid timestamp value"))?;
                json!(dt.to_rfc3339())
            }

            other => {
                tracing::warn!("Unsupported Arrow data type in result: {:?}", other);
                json!(format!("UNSUPPORTED_TYPE_{:?}", other))
            }
        };

        Ok(value)
    }
}

fn float(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}
