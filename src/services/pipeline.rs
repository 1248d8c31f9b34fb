use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::code_synthesizer::CodeSynthesizer;
use super::dataset::DatasetSnapshot;
use super::intent_resolver::{IntentResolver, ResolverSettings};
use super::llm_service::{GenerationPolicy, TextGenerator};
use super::result_normalizer::ResultNormalizer;
use super::sandbox::{ExecutionLimits, SandboxSessionManager, SandboxedExecutor};
use crate::config::{Config, ExecutorConfig};
use crate::models::{ErrorKind, OperationVocabulary, PipelineError, PipelineTrace, ResultEnvelope};

/// Envelope of one run plus every artifact that produced it
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub envelope: ResultEnvelope,
    pub trace: PipelineTrace,
}

/// resolve → synthesize → execute → normalize
///
/// Holds no per-query state; the snapshot is passed into every run so
/// concurrent queries and tests can use different datasets.
pub struct QueryPipeline {
    resolver: IntentResolver,
    synthesizer: CodeSynthesizer,
    executor: SandboxedExecutor,
    normalizer: ResultNormalizer,
    executor_config: ExecutorConfig,
}

impl QueryPipeline {
    pub fn new(
        resolver: IntentResolver,
        synthesizer: CodeSynthesizer,
        executor: SandboxedExecutor,
        normalizer: ResultNormalizer,
        executor_config: ExecutorConfig,
    ) -> Self {
        Self {
            resolver,
            synthesizer,
            executor,
            normalizer,
            executor_config,
        }
    }

    /// Wire every component from configuration
    pub fn from_config(config: &Config, generator: Option<Arc<dyn TextGenerator>>) -> Result<Self, regex::Error> {
        let vocabulary = OperationVocabulary::default();
        let policy = GenerationPolicy::new(config.llm.timeout(), config.llm.max_retries);
        Ok(Self::new(
            IntentResolver::new(ResolverSettings::from(&config.resolver))?,
            CodeSynthesizer::new(vocabulary.clone(), generator, policy),
            SandboxedExecutor::new(SandboxSessionManager::default(), vocabulary),
            ResultNormalizer::from(&config.normalizer),
            config.executor.clone(),
        ))
    }

    pub async fn run(&self, query: &str, snapshot: &DatasetSnapshot) -> PipelineOutcome {
        let started = Instant::now();
        info!("Pipeline run on dataset {}: {:?}", snapshot.version(), query);

        let pending = ResultEnvelope::error(ErrorKind::ExecutionFailure, "pipeline did not complete");
        let mut trace = PipelineTrace::new(query, snapshot.version(), pending);
        let envelope = match self.run_stages(query, snapshot, &mut trace).await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Pipeline stopped at {:?}: {}", err.kind().stage(), err);
                ResultEnvelope::from(&err)
            }
        };

        trace.envelope = envelope.clone();
        trace.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Pipeline finished in {} ms with status {:?}",
            trace.elapsed_ms, envelope.status
        );
        PipelineOutcome { envelope, trace }
    }

    async fn run_stages(
        &self,
        query: &str,
        snapshot: &DatasetSnapshot,
        trace: &mut PipelineTrace,
    ) -> Result<ResultEnvelope, PipelineError> {
        let registry = snapshot.registry();

        let intent = self.resolver.resolve(query, registry)?;
        info!(
            "Resolved {} intent: {} subjects, metrics {:?}, phase {}",
            intent.query_type.as_str(),
            intent.subject_entities.len(),
            intent.metric.metrics(),
            intent.phase_scope.as_str()
        );
        trace.intent = Some(intent.clone());

        let synthesis = self.synthesizer.synthesize(&intent, registry).await?;
        trace.routine = Some(synthesis.routine.clone());
        trace.synthesis_path = Some(synthesis.path);

        let limits = ExecutionLimits::for_snapshot(&self.executor_config, snapshot);
        let result = self.executor.execute(&synthesis.routine, snapshot, &limits).await;
        let envelope = self.normalizer.normalize(&result);
        trace.execution = Some(result);
        Ok(envelope)
    }
}
