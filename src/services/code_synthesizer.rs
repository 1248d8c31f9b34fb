// Code synthesizer
//
// Builds a Routine for a QueryIntent. Common intent shapes use fixed
// templates; anything else is handed to the text generator and the reply is
// validated like any other routine.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::dataset::{BALL_EVENTS, MATCHES};
use super::llm_service::{strip_code_fences, GenerationPolicy, TextGenerator};
use super::metric_catalogue::{subject_column, MetricPlan};
use crate::models::{
    AggFunc, CompareOp, DerivedExpr, Granularity, Literal, Measure, Metric, MetricRole,
    OperationVocabulary, Phase, PipelineError, Predicate, QueryIntent, QueryType, Routine, SchemaRegistry, SeasonScope,
    SortDirection, SortKey, Stage, SubjectKind, SynthesisPath,
};
use crate::validation::RoutineValidator;

/// Extra filters beyond which an intent is no longer templated
const MAX_TEMPLATE_FILTERS: usize = 2;

/// A validated routine and how it was produced
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub routine: Routine,
    pub path: SynthesisPath,
}

pub struct CodeSynthesizer {
    vocabulary: OperationVocabulary,
    generator: Option<Arc<dyn TextGenerator>>,
    policy: GenerationPolicy,
}

impl CodeSynthesizer {
    pub fn new(vocabulary: OperationVocabulary, generator: Option<Arc<dyn TextGenerator>>, policy: GenerationPolicy) -> Self {
        Self {
            vocabulary,
            generator,
            policy,
        }
    }

    pub fn vocabulary(&self) -> &OperationVocabulary {
        &self.vocabulary
    }

    pub async fn synthesize(&self, intent: &QueryIntent, registry: &SchemaRegistry) -> Result<Synthesis, PipelineError> {
        let metrics = intent.metric.metrics();
        if intent.metric.is_ambiguous() {
            let mixed_roles = metrics.windows(2).any(|w| w[0].role() != w[1].role());
            if intent.query_type == QueryType::Leaderboard || mixed_roles {
                return Err(PipelineError::AmbiguousMetric { candidates: metrics });
            }
        }

        let (routine, path) = match template(intent, &metrics) {
            Some(routine) => (routine, SynthesisPath::Template),
            None => (self.generate(intent, registry).await?, SynthesisPath::Generative),
        };

        RoutineValidator::new(registry, &self.vocabulary)
            .validate(&routine)
            .map_err(|e| {
                warn!("{} routine rejected: {}", path.as_str(), e);
                PipelineError::SynthesisFailure(format!("routine failed validation: {}", e))
            })?;

        info!(
            "Synthesized {} routine with {} stages over {}",
            path.as_str(),
            routine.stages.len(),
            routine.source
        );
        Ok(Synthesis { routine, path })
    }

    async fn generate(&self, intent: &QueryIntent, registry: &SchemaRegistry) -> Result<Routine, PipelineError> {
        let generator = self.generator.as_ref().ok_or_else(|| {
            PipelineError::SynthesisFailure("no template covers this question and no text generator is configured".to_string())
        })?;

        let prompt = build_prompt(intent, registry, &self.vocabulary)?;
        let text = self
            .policy
            .run(generator.as_ref(), &prompt, &self.vocabulary)
            .await
            .map_err(|e| PipelineError::SynthesisFailure(e.to_string()))?;

        let cleaned = strip_code_fences(&text);
        debug!("Generated routine text: {}", cleaned);
        serde_json::from_str::<Routine>(&cleaned)
            .map_err(|e| PipelineError::SynthesisFailure(format!("generated routine is not a valid routine: {}", e)))
    }
}

fn build_prompt(
    intent: &QueryIntent,
    registry: &SchemaRegistry,
    vocabulary: &OperationVocabulary,
) -> Result<String, PipelineError> {
    let intent_json = serde_json::to_string_pretty(intent)
        .map_err(|e| PipelineError::SynthesisFailure(format!("failed to encode intent: {}", e)))?;

    let mut schema = String::new();
    for entity in registry.entities() {
        let columns: Vec<String> = entity
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.semantic_type.as_str()))
            .collect();
        schema.push_str(&format!("- {}: {}\n", entity.entity_name, columns.join(", ")));
        for rel in &entity.relationships {
            schema.push_str(&format!(
                "  join {}.{} -> {}.{}\n",
                rel.from_entity, rel.from_column, rel.to_entity, rel.to_column
            ));
        }
    }

    Ok(format!(
        "Tables:\n{}\nOperations:\n{}\n\nEvery group_by must be followed by aggregate and sorted by all of its keys. \
         A limit must follow a sort. Over numbers are 0-indexed.\n\nIntent:\n{}\n",
        schema,
        vocabulary.describe(),
        intent_json
    ))
}

/// Template routine for the intent, or None when no template applies
fn template(intent: &QueryIntent, metrics: &[Metric]) -> Option<Routine> {
    if intent.filters.len() > MAX_TEMPLATE_FILTERS {
        return None;
    }
    let role = metrics.first()?.role();
    match (intent.query_type, role) {
        (QueryType::MatchAnalysis, _) => head_to_head(intent),
        (QueryType::Leaderboard, MetricRole::Results) => wins_leaderboard(intent, metrics),
        (QueryType::TeamStats, MetricRole::Results) => team_results(intent, metrics),
        (QueryType::Comparison, _) if intent.subject_entities.len() > 2 => None,
        (_, MetricRole::Results) => None,
        _ => deliveries(intent, metrics, role),
    }
}

fn text(value: &str) -> Literal {
    Literal::text(value)
}

fn season_predicate(scope: &SeasonScope) -> Predicate {
    match scope {
        SeasonScope::Single(season) => Predicate::eq("season", Literal::Int(*season)),
        SeasonScope::Range { from, to } => Predicate::All {
            predicates: vec![
                Predicate::compare("season", CompareOp::GtEq, Literal::Int(*from)),
                Predicate::compare("season", CompareOp::LtEq, Literal::Int(*to)),
            ],
        },
    }
}

/// Predicates of the intent that read match columns
fn match_predicates(intent: &QueryIntent) -> Vec<Predicate> {
    let mut predicates: Vec<Predicate> = intent
        .filters
        .iter()
        .filter(|f| f.entity == MATCHES)
        .map(|f| Predicate::compare(f.column.clone(), f.op, f.value.clone()))
        .collect();
    if let Some(scope) = &intent.season_scope {
        predicates.push(season_predicate(scope));
    }
    predicates
}

fn push_filter(routine: &mut Routine, predicates: Vec<Predicate>) {
    if !predicates.is_empty() {
        routine.push(Stage::Filter {
            predicate: Predicate::all(predicates),
        });
    }
}

fn granularity_key(granularity: Granularity) -> Option<&'static str> {
    match granularity {
        Granularity::PerMatch => Some("match_id"),
        Granularity::PerSeason => Some("season"),
        Granularity::Overall => None,
    }
}

fn sort_key(column: &str, direction: SortDirection) -> SortKey {
    match direction {
        SortDirection::Ascending => SortKey::asc(column),
        SortDirection::Descending => SortKey::desc(column),
    }
}

fn push_derived(routine: &mut Routine, plan: &MetricPlan) {
    for (name, expr) in &plan.derived {
        routine.push(Stage::DeriveColumn {
            name: name.clone(),
            expr: expr.clone(),
        });
    }
}

/// Ball-by-ball aggregate for players or teams, ranked or not
fn deliveries(intent: &QueryIntent, metrics: &[Metric], role: MetricRole) -> Option<Routine> {
    let plan = MetricPlan::for_metrics(metrics);
    let mut routine = Routine::new(BALL_EVENTS);

    let mut ball = Vec::new();
    if !intent.include_super_overs {
        ball.push(Predicate::eq("is_super_over", Literal::Bool(false)));
    }

    let subject_key = match (&intent.ranking, intent.subject_entities.first()) {
        (Some(ranking), _) if intent.query_type == QueryType::Leaderboard => {
            subject_column(role, ranking.subject_kind)?
        }
        (_, Some(first)) => {
            let column = subject_column(role, first.kind)?;
            let names: BTreeSet<&str> = intent.subject_entities.iter().map(|s| s.name.as_str()).collect();
            if names.len() == 1 {
                ball.push(Predicate::eq(column, text(&first.name)));
            } else {
                ball.push(Predicate::InList {
                    column: column.to_string(),
                    values: names.into_iter().map(text).collect(),
                });
            }
            column
        }
        _ => return None,
    };

    if let Some((from, to)) = intent.phase_scope.overs() {
        // Spoken overs are 1-indexed, over_num is 0-indexed
        ball.push(Predicate::compare("over_num", CompareOp::GtEq, Literal::Int(i64::from(from) - 1)));
        ball.push(Predicate::compare("over_num", CompareOp::LtEq, Literal::Int(i64::from(to) - 1)));
    }

    ball.extend(
        intent
            .filters
            .iter()
            .filter(|f| f.entity == BALL_EVENTS)
            .map(|f| Predicate::compare(f.column.clone(), f.op, f.value.clone())),
    );
    push_filter(&mut routine, ball);

    let leaderboard = intent.query_type == QueryType::Leaderboard;
    let granularity = if leaderboard {
        None
    } else {
        granularity_key(intent.aggregation_granularity)
    };

    let matched = match_predicates(intent);
    let mut joined: Vec<String> = intent
        .filters
        .iter()
        .filter(|f| f.entity == MATCHES)
        .map(|f| f.column.clone())
        .collect();
    if intent.season_scope.is_some() || granularity == Some("season") {
        joined.push("season".to_string());
    }
    joined.dedup();
    if !joined.is_empty() {
        routine.push(Stage::Join {
            entity: MATCHES.to_string(),
            left_on: "match_id".to_string(),
            right_on: "match_id".to_string(),
            columns: joined,
        });
    }
    push_filter(&mut routine, matched);

    let mut keys: Vec<String> = Vec::new();
    if leaderboard || intent.query_type == QueryType::Comparison {
        keys.push(subject_key.to_string());
    }
    if let Some(key) = granularity {
        keys.push(key.to_string());
    }
    if !keys.is_empty() {
        routine.push(Stage::GroupBy { keys: keys.clone() });
    }
    routine.push(Stage::Aggregate {
        measures: plan.measures.clone(),
    });
    push_derived(&mut routine, &plan);

    if let Some(ranking) = intent.ranking.as_ref().filter(|_| leaderboard) {
        let metric = plan.outputs.first()?;
        if let (Some(min), Some(balls)) = (ranking.min_balls, plan.balls_measure()) {
            routine.push(Stage::Filter {
                predicate: Predicate::compare(balls, CompareOp::GtEq, Literal::Int(min)),
            });
        }
        routine.push(Stage::Sort {
            keys: vec![sort_key(metric, ranking.direction), SortKey::asc(subject_key)],
        });
        routine.push(Stage::Limit { count: ranking.limit });
    } else if !keys.is_empty() {
        routine.push(Stage::Sort {
            keys: keys.iter().map(SortKey::asc).collect(),
        });
    }

    let mut columns = keys;
    columns.extend(plan.outputs.iter().cloned());
    routine.push(Stage::Select { columns });
    Some(routine)
}

/// Match results of one team: matches played, wins, win percentage
fn team_results(intent: &QueryIntent, metrics: &[Metric]) -> Option<Routine> {
    let team = intent.subject_entities.first().filter(|s| s.kind == SubjectKind::Team)?;
    let key = match intent.aggregation_granularity {
        Granularity::Overall => None,
        Granularity::PerSeason => Some("season"),
        Granularity::PerMatch => return None,
    };
    let plan = MetricPlan::for_metrics(metrics);
    let mut routine = Routine::new(MATCHES);

    let mut predicates = vec![Predicate::Any {
        predicates: vec![
            Predicate::eq("team1", text(&team.name)),
            Predicate::eq("team2", text(&team.name)),
        ],
    }];
    predicates.extend(match_predicates(intent));
    push_filter(&mut routine, predicates);

    routine.push(Stage::DeriveColumn {
        name: "won".to_string(),
        expr: DerivedExpr::Flag {
            predicate: Predicate::eq("outcome_winner", text(&team.name)),
        },
    });
    if let Some(key) = key {
        routine.push(Stage::GroupBy {
            keys: vec![key.to_string()],
        });
    }
    routine.push(Stage::Aggregate {
        measures: plan.measures.clone(),
    });
    push_derived(&mut routine, &plan);

    let mut columns = Vec::new();
    if let Some(key) = key {
        routine.push(Stage::Sort {
            keys: vec![SortKey::asc(key)],
        });
        columns.push(key.to_string());
    }
    columns.extend(plan.outputs.iter().cloned());
    routine.push(Stage::Select { columns });
    Some(routine)
}

/// Teams ranked by matches won
fn wins_leaderboard(intent: &QueryIntent, metrics: &[Metric]) -> Option<Routine> {
    if metrics != [Metric::Wins] {
        return None;
    }
    let ranking = intent.ranking.as_ref()?;
    let mut routine = Routine::new(MATCHES);

    // Null winners (no result) fail the comparison and drop out
    let mut predicates = vec![Predicate::compare("outcome_winner", CompareOp::NotEq, text(""))];
    predicates.extend(match_predicates(intent));
    push_filter(&mut routine, predicates);

    routine
        .push(Stage::GroupBy {
            keys: vec!["outcome_winner".to_string()],
        })
        .push(Stage::Aggregate {
            measures: vec![Measure::new("wins", AggFunc::Count, "outcome_winner")],
        })
        .push(Stage::Sort {
            keys: vec![sort_key("wins", ranking.direction), SortKey::asc("outcome_winner")],
        })
        .push(Stage::Limit { count: ranking.limit })
        .push(Stage::Select {
            columns: vec!["outcome_winner".to_string(), "wins".to_string()],
        });
    Some(routine)
}

/// Head-to-head results between two teams grouped by winner
fn head_to_head(intent: &QueryIntent) -> Option<Routine> {
    let teams: Vec<Literal> = intent
        .subject_entities
        .iter()
        .filter(|s| s.kind == SubjectKind::Team)
        .map(|s| text(&s.name))
        .collect();
    if teams.len() != 2 || intent.phase_scope != Phase::All {
        return None;
    }
    let mut routine = Routine::new(MATCHES);
    let mut predicates = vec![
        Predicate::InList {
            column: "team1".to_string(),
            values: teams.clone(),
        },
        Predicate::InList {
            column: "team2".to_string(),
            values: teams,
        },
    ];
    predicates.extend(match_predicates(intent));
    push_filter(&mut routine, predicates);

    routine
        .push(Stage::GroupBy {
            keys: vec!["outcome_winner".to_string()],
        })
        .push(Stage::Aggregate {
            measures: vec![Measure::row_count("wins")],
        })
        .push(Stage::Sort {
            keys: vec![SortKey::desc("wins"), SortKey::asc("outcome_winner")],
        })
        .push(Stage::Select {
            columns: vec!["outcome_winner".to_string(), "wins".to_string()],
        });
    Some(routine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ColumnSpec, EntitySchema, IntentFilter, MetricRequest, Ranking, Relationship, SemanticType, SubjectRef,
    };
    use crate::services::llm_service::GenerationError;
    use async_trait::async_trait;
    use std::time::Duration;

    fn registry() -> SchemaRegistry {
        let int = |n: &str| ColumnSpec::new(n, SemanticType::Integer, false);
        let txt = |n: &str| ColumnSpec::new(n, SemanticType::Text, true);
        let flag = |n: &str| ColumnSpec::new(n, SemanticType::Boolean, false);
        let balls = EntitySchema {
            entity_name: BALL_EVENTS.to_string(),
            columns: vec![
                txt("match_id"),
                int("innings"),
                int("over_num"),
                txt("batting_team"),
                txt("bowling_team"),
                txt("batter"),
                txt("bowler"),
                int("runs_batter"),
                int("runs_conceded"),
                flag("is_bowler_wicket"),
                flag("is_batter_out"),
                flag("is_legal"),
                flag("is_dot"),
                flag("is_boundary"),
                flag("is_four"),
                flag("is_six"),
                flag("is_super_over"),
            ],
            relationships: vec![Relationship::new(BALL_EVENTS, "match_id", MATCHES, "match_id")],
            row_count: 0,
        };
        let matches = EntitySchema {
            entity_name: MATCHES.to_string(),
            columns: vec![
                txt("match_id"),
                int("season"),
                txt("venue"),
                txt("team1"),
                txt("team2"),
                txt("outcome_winner"),
            ],
            relationships: vec![],
            row_count: 0,
        };
        SchemaRegistry::new("test", vec![balls, matches], vec![])
    }

    fn subject(kind: SubjectKind, name: &str) -> SubjectRef {
        SubjectRef {
            kind,
            name: name.to_string(),
            mention: name.to_string(),
            resolved_id: None,
            similarity: 1.0,
        }
    }

    fn offline() -> CodeSynthesizer {
        CodeSynthesizer::new(
            OperationVocabulary::default(),
            None,
            GenerationPolicy::new(Duration::from_secs(1), 0),
        )
    }

    struct Canned(String);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str, _constraints: &OperationVocabulary) -> Result<String, GenerationError> {
            Ok(self.0.clone())
        }
    }

    fn with_generator(reply: &str) -> CodeSynthesizer {
        CodeSynthesizer::new(
            OperationVocabulary::default(),
            Some(Arc::new(Canned(reply.to_string()))),
            GenerationPolicy::new(Duration::from_secs(1), 0),
        )
    }

    fn player_wickets() -> QueryIntent {
        let mut intent = QueryIntent::new(QueryType::PlayerStats, MetricRequest::Single(Metric::Wickets));
        intent.subject_entities = vec![subject(SubjectKind::Player, "Player A")];
        intent.phase_scope = Phase::Powerplay;
        intent.season_scope = Some(SeasonScope::Single(2024));
        intent
    }

    #[tokio::test]
    async fn test_player_stats_template() {
        let synthesis = offline().synthesize(&player_wickets(), &registry()).await.unwrap();
        assert_eq!(synthesis.path, SynthesisPath::Template);
        let routine = synthesis.routine;
        assert_eq!(routine.source, BALL_EVENTS);
        assert_eq!(
            routine.stages[0],
            Stage::Filter {
                predicate: Predicate::All {
                    predicates: vec![
                        Predicate::eq("is_super_over", Literal::Bool(false)),
                        Predicate::eq("bowler", Literal::text("Player A")),
                        Predicate::compare("over_num", CompareOp::GtEq, Literal::Int(0)),
                        Predicate::compare("over_num", CompareOp::LtEq, Literal::Int(5)),
                    ]
                }
            }
        );
        assert!(matches!(&routine.stages[1], Stage::Join { columns, .. } if columns == &vec!["season".to_string()]));
        assert_eq!(
            routine.stages.last(),
            Some(&Stage::Select {
                columns: vec!["wickets".to_string()]
            })
        );
    }

    #[tokio::test]
    async fn test_templates_are_deterministic() {
        let a = offline().synthesize(&player_wickets(), &registry()).await.unwrap();
        let b = offline().synthesize(&player_wickets(), &registry()).await.unwrap();
        assert_eq!(a.routine, b.routine);
    }

    #[tokio::test]
    async fn test_leaderboard_sorts_with_tie_break() {
        let mut intent = QueryIntent::new(QueryType::Leaderboard, MetricRequest::Single(Metric::StrikeRate));
        intent.ranking = Some(Ranking {
            subject_kind: SubjectKind::Player,
            limit: 5,
            direction: SortDirection::Descending,
            min_balls: Some(60),
        });
        let routine = offline().synthesize(&intent, &registry()).await.unwrap().routine;
        assert!(routine.stages.contains(&Stage::Sort {
            keys: vec![SortKey::desc("strike_rate"), SortKey::asc("batter")]
        }));
        assert!(routine.stages.contains(&Stage::Filter {
            predicate: Predicate::compare("balls_faced", CompareOp::GtEq, Literal::Int(60))
        }));
        assert!(routine.stages.contains(&Stage::Limit { count: 5 }));
    }

    #[tokio::test]
    async fn test_ambiguous_leaderboard_metric() {
        let mut intent = QueryIntent::new(
            QueryType::Leaderboard,
            MetricRequest::Ambiguous(vec![Metric::Runs, Metric::StrikeRate]),
        );
        intent.ranking = Some(Ranking {
            subject_kind: SubjectKind::Player,
            limit: 10,
            direction: SortDirection::Descending,
            min_balls: None,
        });
        let err = offline().synthesize(&intent, &registry()).await.unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousMetric { .. }));
    }

    #[tokio::test]
    async fn test_ambiguous_stats_return_every_candidate() {
        let mut intent = QueryIntent::new(
            QueryType::PlayerStats,
            MetricRequest::Ambiguous(Metric::BATTING_BUNDLE.to_vec()),
        );
        intent.subject_entities = vec![subject(SubjectKind::Player, "V Kohli")];
        let routine = offline().synthesize(&intent, &registry()).await.unwrap().routine;
        assert_eq!(
            routine.stages.last(),
            Some(&Stage::Select {
                columns: vec!["runs".to_string(), "balls_faced".to_string(), "strike_rate".to_string()]
            })
        );
    }

    #[tokio::test]
    async fn test_team_results_and_head_to_head() {
        let mut intent = QueryIntent::new(QueryType::TeamStats, MetricRequest::Single(Metric::WinPct));
        intent.subject_entities = vec![subject(SubjectKind::Team, "Mumbai Indians")];
        let routine = offline().synthesize(&intent, &registry()).await.unwrap().routine;
        assert_eq!(routine.source, MATCHES);

        let mut intent = QueryIntent::new(QueryType::MatchAnalysis, MetricRequest::Single(Metric::Wins));
        intent.subject_entities = vec![
            subject(SubjectKind::Team, "Mumbai Indians"),
            subject(SubjectKind::Team, "Chennai Super Kings"),
        ];
        let routine = offline().synthesize(&intent, &registry()).await.unwrap().routine;
        assert!(routine.stages.contains(&Stage::Sort {
            keys: vec![SortKey::desc("wins"), SortKey::asc("outcome_winner")]
        }));
    }

    #[tokio::test]
    async fn test_untemplated_intent_without_generator() {
        let mut intent = QueryIntent::new(QueryType::Comparison, MetricRequest::Single(Metric::Runs));
        intent.subject_entities = ["A", "B", "C"]
            .iter()
            .map(|n| subject(SubjectKind::Player, n))
            .collect();
        let err = offline().synthesize(&intent, &registry()).await.unwrap_err();
        assert!(matches!(err, PipelineError::SynthesisFailure(_)));
    }

    fn three_way() -> QueryIntent {
        let mut intent = QueryIntent::new(QueryType::Comparison, MetricRequest::Single(Metric::Runs));
        intent.subject_entities = ["A", "B", "C"]
            .iter()
            .map(|n| subject(SubjectKind::Player, n))
            .collect();
        intent.filters = vec![IntentFilter::eq(BALL_EVENTS, "innings", Literal::Int(1))];
        intent
    }

    #[tokio::test]
    async fn test_generated_routine_is_validated() {
        let reply = r#"```json
{"source": "ball_events", "stages": [
  {"op": "filter", "predicate": {"kind": "in_list", "column": "batter", "values": ["A", "B", "C"]}},
  {"op": "group_by", "keys": ["batter"]},
  {"op": "aggregate", "measures": [{"name": "runs", "func": "sum", "column": "runs_batter"}]},
  {"op": "sort", "keys": [{"column": "batter"}]}
]}
```"#;
        let synthesis = with_generator(reply).synthesize(&three_way(), &registry()).await.unwrap();
        assert_eq!(synthesis.path, SynthesisPath::Generative);
        assert_eq!(synthesis.routine.stages.len(), 4);
    }

    #[tokio::test]
    async fn test_generated_routine_with_unknown_column_is_rejected() {
        let reply = r#"{"source": "ball_events", "stages": [
  {"op": "filter", "predicate": {"kind": "compare", "column": "nonexistent_column", "op": "eq", "value": 1}}
]}"#;
        let err = with_generator(reply)
            .synthesize(&three_way(), &registry())
            .await
            .unwrap_err();
        match err {
            PipelineError::SynthesisFailure(message) => assert!(message.contains("nonexistent_column")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generated_text_that_is_not_a_routine() {
        let err = with_generator("I cannot help with that")
            .synthesize(&three_way(), &registry())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SynthesisFailure(_)));
    }

    #[test]
    fn test_prompt_lists_schema_and_vocabulary() {
        let prompt = build_prompt(&three_way(), &registry(), &OperationVocabulary::default()).unwrap();
        assert!(prompt.contains("ball_events: match_id (text)"));
        assert!(prompt.contains("join ball_events.match_id -> matches.match_id"));
        assert!(prompt.contains("group_by"));
    }
}
