use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::EnvelopeError;
use super::error::PipelineError;
use super::routine::StageKind;

/// Executor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Validating,
    Running,
    Completed,
    Failed,
    TimedOut,
    ResourceExceeded,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed
                | ExecutionState::Failed
                | ExecutionState::TimedOut
                | ExecutionState::ResourceExceeded
        )
    }

    /// Terminal state a failure lands in
    pub fn for_error(err: &PipelineError) -> Self {
        match err {
            PipelineError::TimedOut { .. } => ExecutionState::TimedOut,
            PipelineError::ResourceExceeded { .. } => ExecutionState::ResourceExceeded,
            _ => ExecutionState::Failed,
        }
    }
}

/// Final table of a routine, values already converted to JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub index: usize,
    pub op: StageKind,
    pub rows_out: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub state: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<ResultTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    pub stages: Vec<StageReport>,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn completed(table: ResultTable, stages: Vec<StageReport>, elapsed_ms: u64) -> Self {
        Self {
            state: ExecutionState::Completed,
            table: Some(table),
            error: None,
            stages,
            elapsed_ms,
        }
    }

    pub fn failed(err: &PipelineError, stages: Vec<StageReport>, elapsed_ms: u64) -> Self {
        Self {
            state: ExecutionState::for_error(err),
            table: None,
            error: Some(EnvelopeError {
                kind: err.kind(),
                message: err.to_string(),
            }),
            stages,
            elapsed_ms,
        }
    }

    /// Shape of the final table as (rows, columns)
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.table
            .as_ref()
            .map(|t| (t.row_count(), t.column_count()))
    }
}
