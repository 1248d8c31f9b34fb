// Sandbox sessions
//
// One DataFusion SessionContext per execution. Tables are registered as
// in-memory batches; nothing outside the snapshot is reachable.

use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::Result as DataFusionResult;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use std::sync::Arc;

/// Configuration for sandbox sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Batch size for query execution
    pub batch_size: usize,
    /// Kept at 1 so stage output order does not depend on scheduling
    pub target_partitions: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            target_partitions: 1,
        }
    }
}

/// Creates the isolated SessionContext each routine runs in
#[derive(Debug, Clone, Default)]
pub struct SandboxSessionManager {
    settings: SessionSettings,
}

impl SandboxSessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    pub fn create_session(&self) -> SessionContext {
        let config = SessionConfig::new()
            .with_batch_size(self.settings.batch_size)
            .with_target_partitions(self.settings.target_partitions);
        SessionContext::new_with_config(config)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}

/// Wrap materialised batches as a DataFrame in the given session
pub fn frame_from_batches(ctx: &SessionContext, schema: SchemaRef, batches: Vec<RecordBatch>) -> DataFusionResult<DataFrame> {
    let table = MemTable::try_new(schema, vec![batches])?;
    ctx.read_table(Arc::new(table))
}
