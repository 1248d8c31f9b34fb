use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::ResultEnvelope;
use super::execution::ExecutionResult;
use super::intent::QueryIntent;
use super::routine::Routine;

/// How a routine was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisPath {
    Template,
    Generative,
}

impl SynthesisPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisPath::Template => "template",
            SynthesisPath::Generative => "generative",
        }
    }
}

/// Every intermediate artifact of one pipeline run, for external logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTrace {
    pub id: String,
    pub question: String,
    pub dataset_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<QueryIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routine: Option<Routine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_path: Option<SynthesisPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    pub envelope: ResultEnvelope,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl PipelineTrace {
    pub fn new(question: impl Into<String>, dataset_version: impl Into<String>, envelope: ResultEnvelope) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            dataset_version: dataset_version.into(),
            intent: None,
            routine: None,
            synthesis_path: None,
            execution: None,
            envelope,
            elapsed_ms: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct InteractionListParams {
    pub limit: Option<usize>,
}

/// One logged pipeline run as stored by the interaction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub question: String,
    pub dataset_version: String,
    pub synthesis_path: Option<SynthesisPath>,
    pub stage_count: usize,
    pub envelope: ResultEnvelope,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}
