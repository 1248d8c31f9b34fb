use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::intent::Metric;

/// Stable name of a pipeline failure, as carried in result envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnresolvedEntity,
    UnsupportedQueryType,
    AmbiguousMetric,
    SynthesisFailure,
    SchemaDrift,
    CapabilityViolation,
    TimedOut,
    ResourceExceeded,
    ExecutionFailure,
}

/// Pipeline stage that raised a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Intent,
    Synthesis,
    Execution,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnresolvedEntity => "UnresolvedEntity",
            ErrorKind::UnsupportedQueryType => "UnsupportedQueryType",
            ErrorKind::AmbiguousMetric => "AmbiguousMetric",
            ErrorKind::SynthesisFailure => "SynthesisFailure",
            ErrorKind::SchemaDrift => "SchemaDrift",
            ErrorKind::CapabilityViolation => "CapabilityViolation",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::ResourceExceeded => "ResourceExceeded",
            ErrorKind::ExecutionFailure => "ExecutionFailure",
        }
    }

    pub fn stage(&self) -> PipelineStage {
        match self {
            ErrorKind::UnresolvedEntity
            | ErrorKind::UnsupportedQueryType
            | ErrorKind::AmbiguousMetric => PipelineStage::Intent,
            ErrorKind::SynthesisFailure => PipelineStage::Synthesis,
            ErrorKind::SchemaDrift
            | ErrorKind::CapabilityViolation
            | ErrorKind::TimedOut
            | ErrorKind::ResourceExceeded
            | ErrorKind::ExecutionFailure => PipelineStage::Execution,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn metric_list(metrics: &[Metric]) -> String {
    metrics
        .iter()
        .map(Metric::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classified failure of one pipeline run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Could not find {} in the dataset", .mentions.join(", "))]
    UnresolvedEntity { mentions: Vec<String> },

    #[error("Unsupported query: {0}")]
    UnsupportedQueryType(String),

    #[error("Ambiguous metric, could be any of: {}", metric_list(.candidates))]
    AmbiguousMetric { candidates: Vec<Metric> },

    #[error("Could not build an analysis routine: {0}")]
    SynthesisFailure(String),

    #[error("Dataset schema changed: {0}")]
    SchemaDrift(String),

    #[error("Operation not permitted: {0}")]
    CapabilityViolation(String),

    #[error("Execution timed out after {elapsed_ms} ms")]
    TimedOut { elapsed_ms: u64 },

    #[error("Intermediate result exceeded {limit} rows at stage {stage}")]
    ResourceExceeded { stage: usize, limit: usize },

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UnresolvedEntity { .. } => ErrorKind::UnresolvedEntity,
            PipelineError::UnsupportedQueryType(_) => ErrorKind::UnsupportedQueryType,
            PipelineError::AmbiguousMetric { .. } => ErrorKind::AmbiguousMetric,
            PipelineError::SynthesisFailure(_) => ErrorKind::SynthesisFailure,
            PipelineError::SchemaDrift(_) => ErrorKind::SchemaDrift,
            PipelineError::CapabilityViolation(_) => ErrorKind::CapabilityViolation,
            PipelineError::TimedOut { .. } => ErrorKind::TimedOut,
            PipelineError::ResourceExceeded { .. } => ErrorKind::ResourceExceeded,
            PipelineError::ExecutionFailure(_) => ErrorKind::ExecutionFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_projection() {
        let err = PipelineError::UnresolvedEntity {
            mentions: vec!["Player Z".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::UnresolvedEntity);
        assert_eq!(err.kind().stage(), PipelineStage::Intent);
        assert_eq!(err.to_string(), "Could not find Player Z in the dataset");
    }

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = PipelineError::AmbiguousMetric {
            candidates: vec![Metric::Runs, Metric::Wickets],
        };
        assert!(err.to_string().ends_with("runs, wickets"));
    }

    #[test]
    fn test_kind_serializes_pascal_case() {
        let value = serde_json::to_value(ErrorKind::ResourceExceeded).unwrap();
        assert_eq!(value, serde_json::json!("ResourceExceeded"));
    }
}
