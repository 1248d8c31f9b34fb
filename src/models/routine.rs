use serde::{Deserialize, Serialize};
use std::fmt;

use super::schema::SemanticType;

/// Comparison operators allowed inside filter predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl CompareOp {
    pub const ALL: [CompareOp; 6] = [
        CompareOp::Eq,
        CompareOp::NotEq,
        CompareOp::Gt,
        CompareOp::GtEq,
        CompareOp::Lt,
        CompareOp::LtEq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::NotEq => "not_eq",
            CompareOp::Gt => "gt",
            CompareOp::GtEq => "gt_eq",
            CompareOp::Lt => "lt",
            CompareOp::LtEq => "lt_eq",
        }
    }

    /// Ordering comparisons only make sense on numbers and dates
    pub fn is_ordering(&self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::NotEq)
    }
}

/// Constant operand of a predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    pub fn text(value: impl Into<String>) -> Self {
        Literal::Text(value.into())
    }

    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Literal::Bool(_) => SemanticType::Boolean,
            Literal::Int(_) => SemanticType::Integer,
            Literal::Float(_) => SemanticType::Float,
            Literal::Text(_) => SemanticType::Text,
        }
    }

    /// Whether this literal can be compared against a column of `column_type`
    pub fn compatible_with(&self, column_type: SemanticType) -> bool {
        match (self, column_type) {
            (Literal::Bool(_), SemanticType::Boolean) => true,
            (Literal::Int(_) | Literal::Float(_), t) if t.is_numeric() => true,
            (Literal::Text(_), SemanticType::Text | SemanticType::Date) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{}", v),
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => write!(f, "{}", v),
            Literal::Text(v) => write!(f, "'{}'", v),
        }
    }
}

/// Row predicate of a filter stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Literal,
    },
    InList {
        column: String,
        values: Vec<Literal>,
    },
    All {
        predicates: Vec<Predicate>,
    },
    Any {
        predicates: Vec<Predicate>,
    },
    Not {
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: Literal) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Literal) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// Conjunction that collapses to the single predicate when only one is given
    pub fn all(mut predicates: Vec<Predicate>) -> Self {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Predicate::All { predicates }
        }
    }

    /// Every column the predicate reads, in first-seen order
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { column, .. } | Predicate::InList { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Predicate::All { predicates } | Predicate::Any { predicates } => {
                for p in predicates {
                    p.collect_columns(out);
                }
            }
            Predicate::Not { predicate } => predicate.collect_columns(out),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Predicate::Compare { .. } | Predicate::InList { .. } => 1,
            Predicate::All { predicates } | Predicate::Any { predicates } => {
                1 + predicates.iter().map(Predicate::depth).max().unwrap_or(0)
            }
            Predicate::Not { predicate } => 1 + predicate.depth(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    /// Row count when no column is given, non-null count otherwise
    Count,
    /// Number of rows where a boolean column is true
    CountTrue,
    CountDistinct,
    Mean,
    Min,
    Max,
}

impl AggFunc {
    pub const ALL: [AggFunc; 7] = [
        AggFunc::Sum,
        AggFunc::Count,
        AggFunc::CountTrue,
        AggFunc::CountDistinct,
        AggFunc::Mean,
        AggFunc::Min,
        AggFunc::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::CountTrue => "count_true",
            AggFunc::CountDistinct => "count_distinct",
            AggFunc::Mean => "mean",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

/// Named aggregate produced by an aggregate stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
    pub func: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Measure {
    pub fn new(name: impl Into<String>, func: AggFunc, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func,
            column: Some(column.into()),
        }
    }

    pub fn row_count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: AggFunc::Count,
            column: None,
        }
    }
}

fn unit_scale() -> f64 {
    1.0
}

/// Closed set of column derivations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedExpr {
    /// `numerator / denominator * scale`, null when the denominator is zero
    Ratio {
        numerator: String,
        denominator: String,
        #[serde(default = "unit_scale")]
        scale: f64,
    },
    /// Boolean column holding the predicate's value
    Flag { predicate: Predicate },
}

impl DerivedExpr {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            DerivedExpr::Ratio {
                numerator,
                denominator,
                ..
            } => vec![numerator.as_str(), denominator.as_str()],
            DerivedExpr::Flag { predicate } => predicate.columns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// One step of a routine; the set of variants is the operation vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Stage {
    Filter {
        predicate: Predicate,
    },
    Join {
        entity: String,
        left_on: String,
        right_on: String,
        columns: Vec<String>,
    },
    GroupBy {
        keys: Vec<String>,
    },
    Aggregate {
        measures: Vec<Measure>,
    },
    DeriveColumn {
        name: String,
        expr: DerivedExpr,
    },
    Select {
        columns: Vec<String>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    Limit {
        count: usize,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Filter { .. } => StageKind::Filter,
            Stage::Join { .. } => StageKind::Join,
            Stage::GroupBy { .. } => StageKind::GroupBy,
            Stage::Aggregate { .. } => StageKind::Aggregate,
            Stage::DeriveColumn { .. } => StageKind::DeriveColumn,
            Stage::Select { .. } => StageKind::Select,
            Stage::Sort { .. } => StageKind::Sort,
            Stage::Limit { .. } => StageKind::Limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Filter,
    Join,
    GroupBy,
    Aggregate,
    DeriveColumn,
    Select,
    Sort,
    Limit,
}

impl StageKind {
    pub const ALL: [StageKind; 8] = [
        StageKind::Filter,
        StageKind::Join,
        StageKind::GroupBy,
        StageKind::Aggregate,
        StageKind::DeriveColumn,
        StageKind::Select,
        StageKind::Sort,
        StageKind::Limit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Filter => "filter",
            StageKind::Join => "join",
            StageKind::GroupBy => "group_by",
            StageKind::Aggregate => "aggregate",
            StageKind::DeriveColumn => "derive_column",
            StageKind::Select => "select",
            StageKind::Sort => "sort",
            StageKind::Limit => "limit",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

/// Ordered pipeline of table operations over a source entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub source: String,
    pub stages: Vec<Stage>,
}

impl Routine {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Source entity followed by every joined entity
    pub fn entities(&self) -> Vec<&str> {
        let mut entities = vec![self.source.as_str()];
        for stage in &self.stages {
            if let Stage::Join { entity, .. } = stage {
                if !entities.contains(&entity.as_str()) {
                    entities.push(entity);
                }
            }
        }
        entities
    }
}

/// Operations a routine may use, handed to the text generator as its
/// constraint and enforced again by the validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationVocabulary {
    pub stages: Vec<StageKind>,
    pub aggregates: Vec<AggFunc>,
    pub comparisons: Vec<CompareOp>,
    pub max_stages: usize,
    pub max_predicate_depth: usize,
}

impl Default for OperationVocabulary {
    fn default() -> Self {
        Self {
            stages: StageKind::ALL.to_vec(),
            aggregates: AggFunc::ALL.to_vec(),
            comparisons: CompareOp::ALL.to_vec(),
            max_stages: 12,
            max_predicate_depth: 4,
        }
    }
}

impl OperationVocabulary {
    pub fn allows(&self, kind: StageKind) -> bool {
        self.stages.contains(&kind)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(StageKind::as_str).collect()
    }

    /// Plain-text listing used in generation prompts
    pub fn describe(&self) -> String {
        let join = |names: Vec<&'static str>| names.join(", ");
        format!(
            "stages (\"op\"): {}\naggregate functions: {}\ncomparison operators: {}\nat most {} stages, predicates nested at most {} deep",
            join(self.stage_names()),
            join(self.aggregates.iter().map(AggFunc::as_str).collect()),
            join(self.comparisons.iter().map(CompareOp::as_str).collect()),
            self.max_stages,
            self.max_predicate_depth,
        )
    }
}
