use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ErrorKind, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Ok,
    Error,
}

/// Shape of a successful payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// Bare JSON value
    Scalar,
    /// Object keyed by column name
    Record,
    /// Array of values from a single column
    List,
    /// `{columns, rows}` object
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Caller-facing outcome of one query. Either `payload` is present and
/// `status` is ok, or `error` is present and `status` is error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: EnvelopeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type: Option<ResultType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Rows produced by the routine, before the row cap
    pub row_count: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl ResultEnvelope {
    pub fn ok(result_type: ResultType, payload: Value, row_count: usize, truncated: bool) -> Self {
        Self {
            status: EnvelopeStatus::Ok,
            result_type: Some(result_type),
            payload: Some(payload),
            row_count,
            truncated,
            error: None,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            result_type: None,
            payload: None,
            row_count: 0,
            truncated: false,
            error: Some(EnvelopeError {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == EnvelopeStatus::Ok
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

impl From<&PipelineError> for ResultEnvelope {
    fn from(err: &PipelineError) -> Self {
        ResultEnvelope::error(err.kind(), err.to_string())
    }
}
