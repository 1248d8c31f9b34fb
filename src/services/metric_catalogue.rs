// Metric catalogue
//
// How each metric is computed from ball-by-ball rows: the aggregate measures
// it needs and the ratio derived from them.

use crate::models::{AggFunc, DerivedExpr, Measure, Metric, MetricRole, SubjectKind};

/// Measures and derivation behind one metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    pub metric: Metric,
    pub measures: Vec<Measure>,
    pub derived: Option<DerivedExpr>,
}

fn ratio(numerator: &str, denominator: &str, scale: f64) -> Option<DerivedExpr> {
    Some(DerivedExpr::Ratio {
        numerator: numerator.to_string(),
        denominator: denominator.to_string(),
        scale,
    })
}

fn runs() -> Measure {
    Measure::new("runs", AggFunc::Sum, "runs_batter")
}

fn balls_faced() -> Measure {
    Measure::new("balls_faced", AggFunc::CountTrue, "is_legal")
}

fn balls_bowled() -> Measure {
    Measure::new("balls_bowled", AggFunc::CountTrue, "is_legal")
}

fn wickets() -> Measure {
    Measure::new("wickets", AggFunc::CountTrue, "is_bowler_wicket")
}

fn runs_conceded() -> Measure {
    Measure::new("runs_conceded", AggFunc::Sum, "runs_conceded")
}

fn dot_balls() -> Measure {
    Measure::new("dot_balls", AggFunc::CountTrue, "is_dot")
}

fn boundaries() -> Measure {
    Measure::new("boundaries", AggFunc::CountTrue, "is_boundary")
}

pub fn definition(metric: Metric) -> MetricDefinition {
    let (measures, derived) = match metric {
        Metric::Runs => (vec![runs()], None),
        Metric::BallsFaced => (vec![balls_faced()], None),
        Metric::StrikeRate => (vec![runs(), balls_faced()], ratio("runs", "balls_faced", 100.0)),
        Metric::Average => (
            vec![runs(), Measure::new("dismissals", AggFunc::CountTrue, "is_batter_out")],
            ratio("runs", "dismissals", 1.0),
        ),
        Metric::Fours => (vec![Measure::new("fours", AggFunc::CountTrue, "is_four")], None),
        Metric::Sixes => (vec![Measure::new("sixes", AggFunc::CountTrue, "is_six")], None),
        Metric::Boundaries => (vec![boundaries()], None),
        Metric::BoundaryPct => (
            vec![boundaries(), balls_faced()],
            ratio("boundaries", "balls_faced", 100.0),
        ),
        Metric::DotPct => (vec![dot_balls(), balls_faced()], ratio("dot_balls", "balls_faced", 100.0)),
        Metric::Wickets => (vec![wickets()], None),
        Metric::BallsBowled => (vec![balls_bowled()], None),
        Metric::RunsConceded => (vec![runs_conceded()], None),
        Metric::Economy => (
            vec![runs_conceded(), balls_bowled()],
            ratio("runs_conceded", "balls_bowled", 6.0),
        ),
        Metric::BowlingAverage => (
            vec![runs_conceded(), wickets()],
            ratio("runs_conceded", "wickets", 1.0),
        ),
        Metric::BowlingStrikeRate => (vec![balls_bowled(), wickets()], ratio("balls_bowled", "wickets", 1.0)),
        Metric::DotBalls => (vec![dot_balls()], None),
        Metric::Matches => (vec![Measure::row_count("matches")], None),
        Metric::Wins => (vec![Measure::new("wins", AggFunc::CountTrue, "won")], None),
        Metric::WinPct => (
            vec![
                Measure::row_count("matches"),
                Measure::new("wins", AggFunc::CountTrue, "won"),
            ],
            ratio("wins", "matches", 100.0),
        ),
    };
    MetricDefinition {
        metric,
        measures,
        derived,
    }
}

/// Combined measures for several metrics of the same role
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricPlan {
    pub measures: Vec<Measure>,
    pub derived: Vec<(String, DerivedExpr)>,
    /// Output column per metric, in request order
    pub outputs: Vec<String>,
}

impl MetricPlan {
    pub fn for_metrics(metrics: &[Metric]) -> Self {
        let mut plan = MetricPlan::default();
        for metric in metrics {
            let def = definition(*metric);
            for measure in def.measures {
                if !plan.measures.iter().any(|m| m.name == measure.name) {
                    plan.measures.push(measure);
                }
            }
            if let Some(expr) = def.derived {
                plan.derived.push((metric.as_str().to_string(), expr));
            }
            plan.outputs.push(metric.as_str().to_string());
        }
        plan
    }

    /// Name of the legal-deliveries measure, if the plan has one
    pub fn balls_measure(&self) -> Option<&str> {
        self.measures
            .iter()
            .find(|m| m.func == AggFunc::CountTrue && m.column.as_deref() == Some("is_legal"))
            .map(|m| m.name.as_str())
    }
}

/// Delivery column identifying the subject for a metric role
pub fn subject_column(role: MetricRole, kind: SubjectKind) -> Option<&'static str> {
    match (role, kind) {
        (MetricRole::Batting, SubjectKind::Player) => Some("batter"),
        (MetricRole::Bowling, SubjectKind::Player) => Some("bowler"),
        (MetricRole::Batting, SubjectKind::Team) => Some("batting_team"),
        (MetricRole::Bowling, SubjectKind::Team) => Some("bowling_team"),
        (MetricRole::Results, _) => None,
    }
}

/// Delivery column holding the opposing side for a metric role
pub fn opponent_column(role: MetricRole) -> Option<&'static str> {
    match role {
        MetricRole::Batting => Some("bowling_team"),
        MetricRole::Bowling => Some("batting_team"),
        MetricRole::Results => None,
    }
}
