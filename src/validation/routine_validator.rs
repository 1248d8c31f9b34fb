use std::collections::HashSet;
use thiserror::Error;

use crate::models::{
    AggFunc, ColumnCatalog, DerivedExpr, Literal, OperationVocabulary, Predicate, Routine,
    SemanticType, SortKey, Stage, StageKind,
};

/// Reasons a routine is rejected before it reaches any data
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Routine has no stages")]
    Empty,

    #[error("Routine has {count} stages, at most {max} are allowed")]
    TooManyStages { count: usize, max: usize },

    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("Stage {stage} ({op}) references unknown column '{column}'")]
    UnknownColumn {
        stage: usize,
        op: &'static str,
        column: String,
    },

    #[error("Stage {stage}: {message}")]
    TypeMismatch { stage: usize, message: String },

    #[error("Stage {stage}: no declared relationship from '{from}' to '{to}'")]
    UndeclaredJoin { stage: usize, from: String, to: String },

    #[error("Stage {stage}: column '{column}' already exists")]
    DuplicateColumn { stage: usize, column: String },

    #[error("Stage {stage} uses '{op}', which is not permitted")]
    DisallowedStage { stage: usize, op: &'static str },

    #[error("Stage {stage}: ordering is not deterministic, {message}")]
    UnstableOrder { stage: usize, message: String },

    #[error("Stage {stage}: {message}")]
    InvalidStage { stage: usize, message: String },
}

impl ValidationError {
    /// Failures caused by names the catalog does not know
    pub fn is_schema_reference(&self) -> bool {
        matches!(
            self,
            ValidationError::UnknownEntity(_) | ValidationError::UnknownColumn { .. }
        )
    }
}

type Columns = Vec<(String, SemanticType)>;

/// Column-flow checker for routines.
///
/// Walks the stages in order, tracking the columns each stage produces, so
/// every reference is checked against the output of the stage before it.
/// Returns the columns of the final table.
pub struct RoutineValidator<'a, C: ColumnCatalog + ?Sized> {
    catalog: &'a C,
    vocabulary: &'a OperationVocabulary,
}

struct FlowState {
    columns: Columns,
    /// Keys of a group_by waiting for its aggregate
    group_keys: Option<Vec<String>>,
    /// Group keys of the last grouped aggregate that still needs a total order
    unordered_groups: Option<Vec<String>>,
    /// Whether rows are in a defined order since the last reshaping stage
    sorted: bool,
}

impl<'a, C: ColumnCatalog + ?Sized> RoutineValidator<'a, C> {
    pub fn new(catalog: &'a C, vocabulary: &'a OperationVocabulary) -> Self {
        Self { catalog, vocabulary }
    }

    pub fn validate(&self, routine: &Routine) -> Result<Columns, ValidationError> {
        if routine.stages.is_empty() {
            return Err(ValidationError::Empty);
        }
        if routine.stages.len() > self.vocabulary.max_stages {
            return Err(ValidationError::TooManyStages {
                count: routine.stages.len(),
                max: self.vocabulary.max_stages,
            });
        }

        let columns = self
            .catalog
            .entity_columns(&routine.source)
            .ok_or_else(|| ValidationError::UnknownEntity(routine.source.clone()))?;

        let mut state = FlowState {
            columns,
            group_keys: None,
            unordered_groups: None,
            sorted: false,
        };

        for (index, stage) in routine.stages.iter().enumerate() {
            let kind = stage.kind();
            if !self.vocabulary.allows(kind) {
                return Err(ValidationError::DisallowedStage {
                    stage: index,
                    op: kind.as_str(),
                });
            }
            let next = routine.stages.get(index + 1);
            self.check_stage(index, stage, next, &routine.source, &mut state)?;
        }

        if let Some(keys) = state.unordered_groups {
            return Err(ValidationError::UnstableOrder {
                stage: routine.stages.len() - 1,
                message: format!("grouped rows are never sorted by {}", keys.join(", ")),
            });
        }

        Ok(state.columns)
    }

    fn check_stage(
        &self,
        index: usize,
        stage: &Stage,
        next: Option<&Stage>,
        source: &str,
        state: &mut FlowState,
    ) -> Result<(), ValidationError> {
        let op = stage.kind().as_str();
        match stage {
            Stage::Filter { predicate } => {
                self.check_predicate(index, op, predicate, &state.columns)?;
            }
            Stage::Join {
                entity,
                left_on,
                right_on,
                columns,
            } => {
                let right = self
                    .catalog
                    .entity_columns(entity)
                    .ok_or_else(|| ValidationError::UnknownEntity(entity.clone()))?;
                let relationship = self
                    .catalog
                    .relationship(source, entity)
                    .filter(|r| &r.from_column == left_on && &r.to_column == right_on)
                    .ok_or_else(|| ValidationError::UndeclaredJoin {
                        stage: index,
                        from: format!("{}.{}", source, left_on),
                        to: format!("{}.{}", entity, right_on),
                    })?;
                lookup(index, op, &state.columns, &relationship.from_column)?;
                lookup(index, op, &right, &relationship.to_column)?;
                if columns.is_empty() {
                    return Err(invalid(index, "join must bring at least one column"));
                }
                for column in columns {
                    let ty = lookup(index, op, &right, column)?;
                    if has_column(&state.columns, column) {
                        return Err(ValidationError::DuplicateColumn {
                            stage: index,
                            column: column.clone(),
                        });
                    }
                    state.columns.push((column.clone(), ty));
                }
                state.sorted = false;
            }
            Stage::GroupBy { keys } => {
                if keys.is_empty() {
                    return Err(invalid(index, "group_by needs at least one key"));
                }
                check_distinct(index, keys.iter())?;
                for key in keys {
                    lookup(index, op, &state.columns, key)?;
                }
                if !matches!(next, Some(Stage::Aggregate { .. })) {
                    return Err(invalid(index, "group_by must be followed by aggregate"));
                }
                state.group_keys = Some(keys.clone());
            }
            Stage::Aggregate { measures } => {
                if measures.is_empty() {
                    return Err(invalid(index, "aggregate needs at least one measure"));
                }
                let keys = state.group_keys.take().unwrap_or_default();
                check_distinct(index, keys.iter().chain(measures.iter().map(|m| &m.name)))?;

                let mut output: Columns = Vec::with_capacity(keys.len() + measures.len());
                for key in &keys {
                    output.push((key.clone(), lookup(index, op, &state.columns, key)?));
                }
                for measure in measures {
                    let ty = self.measure_type(index, op, measure.func, measure.column.as_deref(), &state.columns)?;
                    output.push((measure.name.clone(), ty));
                }
                state.columns = output;
                state.unordered_groups = if keys.is_empty() { None } else { Some(keys) };
                state.sorted = false;
            }
            Stage::DeriveColumn { name, expr } => {
                if has_column(&state.columns, name) {
                    return Err(ValidationError::DuplicateColumn {
                        stage: index,
                        column: name.clone(),
                    });
                }
                let ty = match expr {
                    DerivedExpr::Ratio {
                        numerator,
                        denominator,
                        scale,
                    } => {
                        for column in [numerator, denominator] {
                            let ty = lookup(index, op, &state.columns, column)?;
                            if !ty.is_numeric() {
                                return Err(mismatch(
                                    index,
                                    format!("ratio operand '{}' is {}, not numeric", column, ty.as_str()),
                                ));
                            }
                        }
                        if !scale.is_finite() {
                            return Err(invalid(index, "ratio scale must be finite"));
                        }
                        SemanticType::Float
                    }
                    DerivedExpr::Flag { predicate } => {
                        self.check_predicate(index, op, predicate, &state.columns)?;
                        SemanticType::Boolean
                    }
                };
                state.columns.push((name.clone(), ty));
            }
            Stage::Select { columns } => {
                if columns.is_empty() {
                    return Err(invalid(index, "select needs at least one column"));
                }
                check_distinct(index, columns.iter())?;
                let mut projected = Vec::with_capacity(columns.len());
                for column in columns {
                    let ty = lookup(index, op, &state.columns, column)?;
                    projected.push((column.clone(), ty));
                }
                state.columns = projected;
            }
            Stage::Sort { keys } => {
                if keys.is_empty() {
                    return Err(invalid(index, "sort needs at least one key"));
                }
                check_distinct(index, keys.iter().map(|k| &k.column))?;
                for key in keys {
                    lookup(index, op, &state.columns, &key.column)?;
                }
                if let Some(groups) = state.unordered_groups.take() {
                    let missing = missing_tie_breaks(&groups, keys);
                    if !missing.is_empty() {
                        return Err(ValidationError::UnstableOrder {
                            stage: index,
                            message: format!("sort keys do not include {}", missing.join(", ")),
                        });
                    }
                }
                state.sorted = true;
            }
            Stage::Limit { count } => {
                if *count == 0 {
                    return Err(invalid(index, "limit must be positive"));
                }
                if !state.sorted {
                    return Err(ValidationError::UnstableOrder {
                        stage: index,
                        message: "limit is not preceded by a sort".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn measure_type(
        &self,
        index: usize,
        op: &'static str,
        func: AggFunc,
        column: Option<&str>,
        columns: &Columns,
    ) -> Result<SemanticType, ValidationError> {
        if !self.vocabulary.aggregates.contains(&func) {
            return Err(invalid(index, format!("aggregate function '{}' is not permitted", func.as_str())));
        }
        let column = match (func, column) {
            (AggFunc::Count, None) => return Ok(SemanticType::Integer),
            (_, None) => {
                return Err(invalid(index, format!("'{}' needs a column", func.as_str())));
            }
            (_, Some(column)) => column,
        };
        let ty = lookup(index, op, columns, column)?;
        let out = match func {
            AggFunc::Count | AggFunc::CountDistinct => SemanticType::Integer,
            AggFunc::CountTrue => {
                if ty != SemanticType::Boolean {
                    return Err(mismatch(index, format!("count_true over non-boolean column '{}'", column)));
                }
                SemanticType::Integer
            }
            AggFunc::Sum | AggFunc::Mean => {
                if !ty.is_numeric() {
                    return Err(mismatch(
                        index,
                        format!("{} over {} column '{}'", func.as_str(), ty.as_str(), column),
                    ));
                }
                if func == AggFunc::Mean {
                    SemanticType::Float
                } else {
                    ty
                }
            }
            AggFunc::Min | AggFunc::Max => {
                if ty == SemanticType::Boolean {
                    return Err(mismatch(index, format!("{} over boolean column '{}'", func.as_str(), column)));
                }
                ty
            }
        };
        Ok(out)
    }

    fn check_predicate(
        &self,
        index: usize,
        op: &'static str,
        predicate: &Predicate,
        columns: &Columns,
    ) -> Result<(), ValidationError> {
        if predicate.depth() > self.vocabulary.max_predicate_depth {
            return Err(invalid(
                index,
                format!("predicate nested deeper than {}", self.vocabulary.max_predicate_depth),
            ));
        }
        self.check_predicate_node(index, op, predicate, columns)
    }

    fn check_predicate_node(
        &self,
        index: usize,
        op: &'static str,
        predicate: &Predicate,
        columns: &Columns,
    ) -> Result<(), ValidationError> {
        match predicate {
            Predicate::Compare { column, op: cmp, value } => {
                if !self.vocabulary.comparisons.contains(cmp) {
                    return Err(invalid(index, format!("comparison '{}' is not permitted", cmp.as_str())));
                }
                let ty = lookup(index, op, columns, column)?;
                check_literal(index, column, ty, value)?;
                if cmp.is_ordering() && ty == SemanticType::Boolean {
                    return Err(mismatch(index, format!("ordering comparison on boolean column '{}'", column)));
                }
            }
            Predicate::InList { column, values } => {
                if values.is_empty() {
                    return Err(invalid(index, format!("empty value list for '{}'", column)));
                }
                let ty = lookup(index, op, columns, column)?;
                for value in values {
                    check_literal(index, column, ty, value)?;
                }
            }
            Predicate::All { predicates } | Predicate::Any { predicates } => {
                if predicates.is_empty() {
                    return Err(invalid(index, "empty predicate group"));
                }
                for p in predicates {
                    self.check_predicate_node(index, op, p, columns)?;
                }
            }
            Predicate::Not { predicate } => self.check_predicate_node(index, op, predicate, columns)?,
        }
        Ok(())
    }
}

fn lookup(index: usize, op: &'static str, columns: &Columns, name: &str) -> Result<SemanticType, ValidationError> {
    columns
        .iter()
        .find(|(c, _)| c == name)
        .map(|(_, ty)| *ty)
        .ok_or_else(|| ValidationError::UnknownColumn {
            stage: index,
            op,
            column: name.to_string(),
        })
}

fn has_column(columns: &Columns, name: &str) -> bool {
    columns.iter().any(|(c, _)| c == name)
}

fn check_literal(index: usize, column: &str, ty: SemanticType, value: &Literal) -> Result<(), ValidationError> {
    if value.compatible_with(ty) {
        Ok(())
    } else {
        Err(mismatch(
            index,
            format!("cannot compare {} column '{}' with {}", ty.as_str(), column, value),
        ))
    }
}

fn check_distinct<'s>(index: usize, names: impl Iterator<Item = &'s String>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ValidationError::DuplicateColumn {
                stage: index,
                column: name.clone(),
            });
        }
    }
    Ok(())
}

fn missing_tie_breaks(groups: &[String], keys: &[SortKey]) -> Vec<String> {
    groups
        .iter()
        .filter(|g| !keys.iter().any(|k| &k.column == *g))
        .cloned()
        .collect()
}

fn invalid(index: usize, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidStage {
        stage: index,
        message: message.into(),
    }
}

fn mismatch(index: usize, message: impl Into<String>) -> ValidationError {
    ValidationError::TypeMismatch {
        stage: index,
        message: message.into(),
    }
}

/// Stage kinds outside `allowed`, in routine order
pub fn disallowed_stages(routine: &Routine, allowed: &[StageKind]) -> Vec<(usize, StageKind)> {
    routine
        .stages
        .iter()
        .enumerate()
        .filter(|(_, s)| !allowed.contains(&s.kind()))
        .map(|(i, s)| (i, s.kind()))
        .collect()
}
