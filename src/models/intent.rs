use serde::{Deserialize, Serialize};
use std::fmt;

use super::routine::{CompareOp, Literal};
use super::schema::SubjectKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    PlayerStats,
    TeamStats,
    MatchAnalysis,
    Comparison,
    Leaderboard,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::PlayerStats => "player_stats",
            QueryType::TeamStats => "team_stats",
            QueryType::MatchAnalysis => "match_analysis",
            QueryType::Comparison => "comparison",
            QueryType::Leaderboard => "leaderboard",
        }
    }
}

/// Which side of a delivery a metric is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRole {
    Batting,
    Bowling,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Runs,
    BallsFaced,
    StrikeRate,
    Average,
    Fours,
    Sixes,
    Boundaries,
    BoundaryPct,
    DotPct,
    Wickets,
    BallsBowled,
    RunsConceded,
    Economy,
    BowlingAverage,
    BowlingStrikeRate,
    DotBalls,
    Wins,
    Matches,
    WinPct,
}

impl Metric {
    pub const ALL: [Metric; 19] = [
        Metric::Runs,
        Metric::BallsFaced,
        Metric::StrikeRate,
        Metric::Average,
        Metric::Fours,
        Metric::Sixes,
        Metric::Boundaries,
        Metric::BoundaryPct,
        Metric::DotPct,
        Metric::Wickets,
        Metric::BallsBowled,
        Metric::RunsConceded,
        Metric::Economy,
        Metric::BowlingAverage,
        Metric::BowlingStrikeRate,
        Metric::DotBalls,
        Metric::Wins,
        Metric::Matches,
        Metric::WinPct,
    ];

    pub const BATTING_BUNDLE: [Metric; 3] = [Metric::Runs, Metric::BallsFaced, Metric::StrikeRate];
    pub const BOWLING_BUNDLE: [Metric; 3] = [Metric::Wickets, Metric::Economy, Metric::BallsBowled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Runs => "runs",
            Metric::BallsFaced => "balls_faced",
            Metric::StrikeRate => "strike_rate",
            Metric::Average => "average",
            Metric::Fours => "fours",
            Metric::Sixes => "sixes",
            Metric::Boundaries => "boundaries",
            Metric::BoundaryPct => "boundary_pct",
            Metric::DotPct => "dot_pct",
            Metric::Wickets => "wickets",
            Metric::BallsBowled => "balls_bowled",
            Metric::RunsConceded => "runs_conceded",
            Metric::Economy => "economy",
            Metric::BowlingAverage => "bowling_average",
            Metric::BowlingStrikeRate => "bowling_strike_rate",
            Metric::DotBalls => "dot_balls",
            Metric::Wins => "wins",
            Metric::Matches => "matches",
            Metric::WinPct => "win_pct",
        }
    }

    pub fn role(&self) -> MetricRole {
        match self {
            Metric::Runs
            | Metric::BallsFaced
            | Metric::StrikeRate
            | Metric::Average
            | Metric::Fours
            | Metric::Sixes
            | Metric::Boundaries
            | Metric::BoundaryPct
            | Metric::DotPct => MetricRole::Batting,
            Metric::Wickets
            | Metric::BallsBowled
            | Metric::RunsConceded
            | Metric::Economy
            | Metric::BowlingAverage
            | Metric::BowlingStrikeRate
            | Metric::DotBalls => MetricRole::Bowling,
            Metric::Wins | Metric::Matches | Metric::WinPct => MetricRole::Results,
        }
    }

    /// Rankings on these metrics put the smallest value first
    pub fn lower_is_better(&self) -> bool {
        matches!(
            self,
            Metric::Economy
                | Metric::BowlingAverage
                | Metric::BowlingStrikeRate
                | Metric::DotPct
                | Metric::RunsConceded
        )
    }

    /// Rate metrics need a minimum sample before they are ranked
    pub fn is_rate(&self) -> bool {
        matches!(
            self,
            Metric::StrikeRate
                | Metric::Average
                | Metric::BoundaryPct
                | Metric::DotPct
                | Metric::Economy
                | Metric::BowlingAverage
                | Metric::BowlingStrikeRate
                | Metric::WinPct
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The metric a query asks for, or the equally likely candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricRequest {
    Single(Metric),
    Ambiguous(Vec<Metric>),
}

impl MetricRequest {
    pub fn metrics(&self) -> Vec<Metric> {
        match self {
            MetricRequest::Single(m) => vec![*m],
            MetricRequest::Ambiguous(ms) => ms.clone(),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, MetricRequest::Ambiguous(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Powerplay,
    Middle,
    Death,
    All,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Powerplay => "powerplay",
            Phase::Middle => "middle",
            Phase::Death => "death",
            Phase::All => "all",
        }
    }

    /// Spoken over range, 1-indexed and inclusive
    pub fn overs(&self) -> Option<(u32, u32)> {
        match self {
            Phase::Powerplay => Some((1, 6)),
            Phase::Middle => Some((7, 15)),
            Phase::Death => Some((16, 20)),
            Phase::All => None,
        }
    }

    /// Phase that exactly covers the spoken over range, if any
    pub fn from_over_range(from: u32, to: u32) -> Option<Phase> {
        [Phase::Powerplay, Phase::Middle, Phase::Death]
            .into_iter()
            .find(|p| p.overs() == Some((from, to)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeasonScope {
    Single(i64),
    Range { from: i64, to: i64 },
}

impl SeasonScope {
    pub fn bounds(&self) -> (i64, i64) {
        match self {
            SeasonScope::Single(s) => (*s, *s),
            SeasonScope::Range { from, to } => (*from, *to),
        }
    }
}

/// Extra row filter carried by the intent, applied in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentFilter {
    pub entity: String,
    pub column: String,
    pub op: CompareOp,
    pub value: Literal,
}

impl IntentFilter {
    pub fn eq(entity: impl Into<String>, column: impl Into<String>, value: Literal) -> Self {
        Self {
            entity: entity.into(),
            column: column.into(),
            op: CompareOp::Eq,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    PerMatch,
    PerSeason,
    Overall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Subject named in the query and the registry entry it resolved to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRef {
    #[serde(rename = "type")]
    pub kind: SubjectKind,
    pub name: String,
    pub mention: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_id: Option<String>,
    pub similarity: f64,
}

/// Leaderboard parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub subject_kind: SubjectKind,
    pub limit: usize,
    pub direction: SortDirection,
    /// Minimum legal deliveries before a subject qualifies
    pub min_balls: Option<i64>,
}

/// A part of the query that was matched loosely or defaulted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    UnrecognizedPhase { text: String },
    ApproximateEntity { mention: String, resolved: String, similarity: f64 },
    DefaultMetricBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub query_type: QueryType,
    pub subject_entities: Vec<SubjectRef>,
    pub metric: MetricRequest,
    pub phase_scope: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_scope: Option<SeasonScope>,
    pub filters: Vec<IntentFilter>,
    pub aggregation_granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Ranking>,
    pub include_super_overs: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Degradation>,
}

impl QueryIntent {
    /// Intent with the defaults a bare question starts from
    pub fn new(query_type: QueryType, metric: MetricRequest) -> Self {
        Self {
            query_type,
            subject_entities: Vec::new(),
            metric,
            phase_scope: Phase::All,
            season_scope: None,
            filters: Vec::new(),
            aggregation_granularity: Granularity::Overall,
            ranking: None,
            include_super_overs: false,
            degraded: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}
