// Sandboxed executor
//
// Runs a validated Routine against a DatasetSnapshot with a wall-clock
// timeout, an intermediate row ceiling and a capability allowlist.

use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::*;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::converter::ResultTableConverter;
use super::plan;
use super::session::{frame_from_batches, SandboxSessionManager};
use crate::config::ExecutorConfig;
use crate::models::{
    ExecutionResult, ExecutionState, Measure, OperationVocabulary, PipelineError, Routine, Stage, StageKind,
    StageReport,
};
use crate::services::dataset::DatasetSnapshot;
use crate::validation::{disallowed_stages, RoutineValidator};

/// Resource and capability bounds for one execution
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_intermediate_rows: usize,
    pub allowed_stages: Vec<StageKind>,
    pub allowed_entities: BTreeSet<String>,
}

impl ExecutionLimits {
    /// Every stage kind, every entity of the snapshot
    pub fn for_snapshot(config: &ExecutorConfig, snapshot: &DatasetSnapshot) -> Self {
        Self {
            timeout: config.timeout(),
            max_intermediate_rows: config.max_intermediate_rows,
            allowed_stages: StageKind::ALL.to_vec(),
            allowed_entities: snapshot.entity_names().map(str::to_string).collect(),
        }
    }
}

/// Materialised output of one stage
struct Materialized {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    rows: usize,
}

pub struct SandboxedExecutor {
    sessions: SandboxSessionManager,
    vocabulary: OperationVocabulary,
}

impl SandboxedExecutor {
    pub fn new(sessions: SandboxSessionManager, vocabulary: OperationVocabulary) -> Self {
        Self { sessions, vocabulary }
    }

    /// Run the routine to a terminal state. Never panics on bad input; every
    /// failure is reported through the returned result.
    pub async fn execute(&self, routine: &Routine, snapshot: &DatasetSnapshot, limits: &ExecutionLimits) -> ExecutionResult {
        let started = Instant::now();
        let mut stages = Vec::with_capacity(routine.stages.len());
        let mut state = ExecutionState::Pending;
        debug!("Execution state: {:?}", state);

        let outcome = self.run(routine, snapshot, limits, started, &mut stages, &mut state).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(table) => {
                info!(
                    "Routine completed: {} stages, {} rows in {} ms",
                    stages.len(),
                    table.row_count(),
                    elapsed_ms
                );
                ExecutionResult::completed(table, stages, elapsed_ms)
            }
            Err(err) => {
                warn!("Routine ended in {:?} from {:?}: {}", ExecutionState::for_error(&err), state, err);
                ExecutionResult::failed(&err, stages, elapsed_ms)
            }
        }
    }

    async fn run(
        &self,
        routine: &Routine,
        snapshot: &DatasetSnapshot,
        limits: &ExecutionLimits,
        started: Instant,
        reports: &mut Vec<StageReport>,
        state: &mut ExecutionState,
    ) -> Result<crate::models::ResultTable, PipelineError> {
        *state = ExecutionState::Validating;
        check_capabilities(routine, limits)?;
        RoutineValidator::new(snapshot, &self.vocabulary)
            .validate(routine)
            .map_err(|e| {
                if e.is_schema_reference() {
                    PipelineError::SchemaDrift(e.to_string())
                } else {
                    PipelineError::ExecutionFailure(e.to_string())
                }
            })?;

        *state = ExecutionState::Running;
        let ctx = self.sessions.create_session();
        let source = snapshot
            .table(&routine.source)
            .ok_or_else(|| PipelineError::SchemaDrift(format!("entity '{}' is not loaded", routine.source)))?;

        let mut current = Materialized {
            schema: source.schema.clone(),
            batches: source.batches.clone(),
            rows: source.row_count(),
        };
        let mut group_keys: Option<Vec<String>> = None;

        for (index, stage) in routine.stages.iter().enumerate() {
            let remaining = remaining(limits.timeout, started)?;

            if let Stage::GroupBy { keys } = stage {
                // Consumed by the aggregate that must follow
                group_keys = Some(keys.clone());
                reports.push(StageReport {
                    index,
                    op: stage.kind(),
                    rows_out: current.rows,
                });
                continue;
            }

            let input = frame_from_batches(&ctx, current.schema.clone(), std::mem::take(&mut current.batches))
                .map_err(failure)?;
            let df = match stage {
                Stage::Aggregate { measures } => aggregate(input, group_keys.take(), measures)?,
                _ => self.lower(input, stage, &ctx, snapshot)?,
            };

            current = materialize(df, limits.max_intermediate_rows, remaining, index, limits.timeout, started).await?;
            debug!("Stage {} ({}) produced {} rows", index, stage.kind().as_str(), current.rows);
            reports.push(StageReport {
                index,
                op: stage.kind(),
                rows_out: current.rows,
            });
        }

        ResultTableConverter::convert(&current.schema, &current.batches)
            .map_err(|e| PipelineError::ExecutionFailure(e.to_string()))
    }

    fn lower(&self, df: DataFrame, stage: &Stage, ctx: &SessionContext, snapshot: &DatasetSnapshot) -> Result<DataFrame, PipelineError> {
        let lowered = match stage {
            Stage::Filter { predicate } => df.filter(plan::predicate(predicate)),
            Stage::Join {
                entity,
                left_on,
                right_on,
                columns,
            } => {
                let table = snapshot
                    .table(entity)
                    .ok_or_else(|| PipelineError::SchemaDrift(format!("entity '{}' is not loaded", entity)))?;
                let right = frame_from_batches(ctx, table.schema.clone(), table.batches.clone()).map_err(failure)?;
                plan::apply_join(df, right, left_on, right_on, columns)
            }
            Stage::DeriveColumn { name, expr } => plan::derived(expr).and_then(|e| df.with_column(name, e)),
            Stage::Select { columns } => df.select(columns.iter().map(|c| plan::column(c)).collect::<Vec<_>>()),
            Stage::Sort { keys } => df.sort(plan::sort(keys)),
            Stage::Limit { count } => df.limit(0, Some(*count)),
            Stage::GroupBy { .. } | Stage::Aggregate { .. } => {
                return Err(PipelineError::ExecutionFailure(format!(
                    "'{}' cannot be lowered on its own",
                    stage.kind().as_str()
                )))
            }
        };
        lowered.map_err(failure)
    }
}

fn failure(err: datafusion::error::DataFusionError) -> PipelineError {
    PipelineError::ExecutionFailure(err.to_string())
}

fn check_capabilities(routine: &Routine, limits: &ExecutionLimits) -> Result<(), PipelineError> {
    if let Some((index, kind)) = disallowed_stages(routine, &limits.allowed_stages).into_iter().next() {
        return Err(PipelineError::CapabilityViolation(format!(
            "stage {} uses '{}'",
            index,
            kind.as_str()
        )));
    }
    for entity in routine.entities() {
        if !limits.allowed_entities.contains(entity) {
            return Err(PipelineError::CapabilityViolation(format!(
                "entity '{}' is outside the permitted dataset",
                entity
            )));
        }
    }
    Ok(())
}

fn remaining(budget: Duration, started: Instant) -> Result<Duration, PipelineError> {
    let elapsed = started.elapsed();
    if elapsed >= budget {
        return Err(PipelineError::TimedOut {
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }
    Ok(budget - elapsed)
}

fn aggregate(df: DataFrame, keys: Option<Vec<String>>, measures: &[Measure]) -> Result<DataFrame, PipelineError> {
    let keys = keys.unwrap_or_default();
    let group: Vec<Expr> = keys.iter().map(|k| plan::column(k)).collect();
    let aggregates = measures.iter().map(plan::measure).collect::<Result<Vec<_>, _>>().map_err(failure)?;
    let grouped = !group.is_empty();
    let df = df.aggregate(group, aggregates).map_err(failure)?;
    if grouped || !measures.iter().any(plan::null_on_empty) {
        return Ok(df);
    }

    let mut projection = Vec::with_capacity(measures.len());
    for m in measures {
        let expr = if plan::null_on_empty(m) {
            plan::zero_if_null(&m.name).map_err(failure)?
        } else {
            plan::column(&m.name)
        };
        projection.push(expr);
    }
    df.select(projection).map_err(failure)
}

async fn materialize(
    df: DataFrame,
    max_rows: usize,
    remaining: Duration,
    index: usize,
    budget: Duration,
    started: Instant,
) -> Result<Materialized, PipelineError> {
    let logical_schema: SchemaRef = df.schema().inner().clone();
    // One row past the ceiling is enough to detect the overflow
    let bounded = df.limit(0, Some(max_rows.saturating_add(1))).map_err(failure)?;
    let batches = match timeout(remaining, bounded.collect()).await {
        Ok(result) => result.map_err(failure)?,
        Err(_) => {
            return Err(PipelineError::TimedOut {
                elapsed_ms: started.elapsed().max(budget).as_millis() as u64,
            })
        }
    };

    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    if rows > max_rows {
        return Err(PipelineError::ResourceExceeded {
            stage: index,
            limit: max_rows,
        });
    }
    let schema = batches.first().map(|b| b.schema()).unwrap_or(logical_schema);
    Ok(Materialized { schema, batches, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AggFunc, CompareOp, DerivedExpr, ErrorKind, Literal, Predicate, Relationship, SortKey,
    };
    use crate::services::dataset::{BALL_EVENTS, MATCHES};
    use datafusion::arrow::array::{BooleanArray, Int64Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use serde_json::json;
    use std::sync::Arc;

    fn snapshot() -> DatasetSnapshot {
        let events = Arc::new(Schema::new(vec![
            Field::new("match_id", DataType::Utf8, false),
            Field::new("bowler", DataType::Utf8, false),
            Field::new("runs_conceded", DataType::Int64, false),
            Field::new("is_legal", DataType::Boolean, false),
            Field::new("is_bowler_wicket", DataType::Boolean, false),
        ]));
        let batch = RecordBatch::try_new(
            events.clone(),
            vec![
                Arc::new(StringArray::from(vec!["m1", "m1", "m1", "m2", "m2", "m2"])),
                Arc::new(StringArray::from(vec!["Zed", "Amy", "Zed", "Amy", "Zed", "Amy"])),
                Arc::new(Int64Array::from(vec![4, 0, 6, 1, 0, 2])),
                Arc::new(BooleanArray::from(vec![true, true, false, true, true, true])),
                Arc::new(BooleanArray::from(vec![false, true, false, false, true, false])),
            ],
        )
        .unwrap();
        let matches = Arc::new(Schema::new(vec![
            Field::new("match_id", DataType::Utf8, false),
            Field::new("season", DataType::Int64, false),
        ]));
        let match_batch = RecordBatch::try_new(
            matches.clone(),
            vec![
                Arc::new(StringArray::from(vec!["m1", "m2"])),
                Arc::new(Int64Array::from(vec![2023, 2024])),
            ],
        )
        .unwrap();
        DatasetSnapshot::builder("test")
            .relationship(Relationship::new(BALL_EVENTS, "match_id", MATCHES, "match_id"))
            .table(BALL_EVENTS, events, vec![batch])
            .unwrap()
            .table(MATCHES, matches, vec![match_batch])
            .unwrap()
            .build()
            .unwrap()
    }

    fn limits(snapshot: &DatasetSnapshot) -> ExecutionLimits {
        ExecutionLimits {
            timeout: Duration::from_secs(10),
            max_intermediate_rows: 1_000,
            allowed_stages: StageKind::ALL.to_vec(),
            allowed_entities: snapshot.entity_names().map(str::to_string).collect(),
        }
    }

    fn executor() -> SandboxedExecutor {
        SandboxedExecutor::new(SandboxSessionManager::default(), OperationVocabulary::default())
    }

    fn wickets_by_bowler() -> Routine {
        let mut routine = Routine::new(BALL_EVENTS);
        routine
            .push(Stage::GroupBy {
                keys: vec!["bowler".to_string()],
            })
            .push(Stage::Aggregate {
                measures: vec![
                    Measure::new("wickets", AggFunc::CountTrue, "is_bowler_wicket"),
                    Measure::new("runs_conceded", AggFunc::Sum, "runs_conceded"),
                    Measure::new("balls", AggFunc::CountTrue, "is_legal"),
                ],
            })
            .push(Stage::DeriveColumn {
                name: "economy".to_string(),
                expr: DerivedExpr::Ratio {
                    numerator: "runs_conceded".to_string(),
                    denominator: "balls".to_string(),
                    scale: 6.0,
                },
            })
            .push(Stage::Sort {
                keys: vec![SortKey::desc("wickets"), SortKey::asc("bowler")],
            })
            .push(Stage::Select {
                columns: vec!["bowler".to_string(), "wickets".to_string(), "economy".to_string()],
            });
        routine
    }

    #[tokio::test]
    async fn test_grouped_routine_with_tie_break() {
        let snapshot = snapshot();
        let result = executor().execute(&wickets_by_bowler(), &snapshot, &limits(&snapshot)).await;
        assert_eq!(result.state, ExecutionState::Completed);
        let table = result.table.unwrap();
        // Both bowlers took one wicket; name breaks the tie
        assert_eq!(table.rows[0][0], json!("Amy"));
        assert_eq!(table.rows[1][0], json!("Zed"));
        assert_eq!(table.rows[0][1], json!(1));
        // Amy: 3 runs off 3 legal balls
        assert_eq!(table.rows[0][2], json!(6.0));
        assert_eq!(result.stages.len(), 5);
    }

    #[tokio::test]
    async fn test_join_and_global_aggregate() {
        let snapshot = snapshot();
        let mut routine = Routine::new(BALL_EVENTS);
        routine
            .push(Stage::Join {
                entity: MATCHES.to_string(),
                left_on: "match_id".to_string(),
                right_on: "match_id".to_string(),
                columns: vec!["season".to_string()],
            })
            .push(Stage::Filter {
                predicate: Predicate::All {
                    predicates: vec![
                        Predicate::eq("season", Literal::Int(2030)),
                        Predicate::eq("bowler", Literal::text("Zed")),
                    ],
                },
            })
            .push(Stage::Aggregate {
                measures: vec![
                    Measure::new("runs", AggFunc::Sum, "runs_conceded"),
                    Measure::row_count("deliveries"),
                ],
            });
        let result = executor().execute(&routine, &snapshot, &limits(&snapshot)).await;
        let table = result.table.unwrap();
        // No rows match, yet the totals are zero rather than null
        assert_eq!(table.rows, vec![vec![json!(0), json!(0)]]);
    }

    #[tokio::test]
    async fn test_filter_then_sum() {
        let snapshot = snapshot();
        let mut routine = Routine::new(BALL_EVENTS);
        routine
            .push(Stage::Filter {
                predicate: Predicate::compare("runs_conceded", CompareOp::Gt, Literal::Int(0)),
            })
            .push(Stage::Aggregate {
                measures: vec![Measure::new("runs", AggFunc::Sum, "runs_conceded")],
            });
        let result = executor().execute(&routine, &snapshot, &limits(&snapshot)).await;
        assert_eq!(result.table.unwrap().rows, vec![vec![json!(13)]]);
        assert_eq!(result.stages[0].rows_out, 4);
    }

    #[tokio::test]
    async fn test_row_ceiling() {
        let snapshot = snapshot();
        let mut limits = limits(&snapshot);
        limits.max_intermediate_rows = 3;
        let mut routine = Routine::new(BALL_EVENTS);
        routine.push(Stage::Filter {
            predicate: Predicate::eq("is_legal", Literal::Bool(true)),
        });
        let result = executor().execute(&routine, &snapshot, &limits).await;
        assert_eq!(result.state, ExecutionState::ResourceExceeded);
        assert_eq!(result.error.unwrap().kind, ErrorKind::ResourceExceeded);
    }

    #[tokio::test]
    async fn test_zero_timeout() {
        let snapshot = snapshot();
        let mut limits = limits(&snapshot);
        limits.timeout = Duration::ZERO;
        let result = executor().execute(&wickets_by_bowler(), &snapshot, &limits).await;
        assert_eq!(result.state, ExecutionState::TimedOut);
        assert!(result.table.is_none());
    }

    #[tokio::test]
    async fn test_capability_allowlist() {
        let snapshot = snapshot();
        let mut limits = limits(&snapshot);
        limits.allowed_stages.retain(|k| *k != StageKind::DeriveColumn);
        let result = executor().execute(&wickets_by_bowler(), &snapshot, &limits).await;
        assert_eq!(result.state, ExecutionState::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::CapabilityViolation);

        let mut limits = self::limits(&snapshot);
        limits.allowed_entities.remove(MATCHES);
        let mut routine = Routine::new(BALL_EVENTS);
        routine.push(Stage::Join {
            entity: MATCHES.to_string(),
            left_on: "match_id".to_string(),
            right_on: "match_id".to_string(),
            columns: vec!["season".to_string()],
        });
        let result = executor().execute(&routine, &snapshot, &limits).await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::CapabilityViolation);
    }

    #[tokio::test]
    async fn test_schema_drift() {
        let snapshot = snapshot();
        let mut routine = Routine::new(BALL_EVENTS);
        routine.push(Stage::Select {
            columns: vec!["over_num".to_string()],
        });
        let result = executor().execute(&routine, &snapshot, &limits(&snapshot)).await;
        assert_eq!(result.state, ExecutionState::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::SchemaDrift);
    }

    #[tokio::test]
    async fn test_snapshot_is_untouched() {
        let snapshot = snapshot();
        let before = snapshot.table(BALL_EVENTS).unwrap().row_count();
        let _ = executor().execute(&wickets_by_bowler(), &snapshot, &limits(&snapshot)).await;
        assert_eq!(snapshot.table(BALL_EVENTS).unwrap().row_count(), before);
    }
}
