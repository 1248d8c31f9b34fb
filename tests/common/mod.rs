// Shared fixture: a small ball-by-ball dataset over three matches.
//
// Wickets by "Player A":
// - 2024 powerplay: 5 (plus one super-over wicket that must not count)
// - 2024 death overs: 2
// - 2023 powerplay: 3
// 2024 wicket totals: Player A 7, Amit Roy 4, Zed Khan 4, Kuldeep Yadav 1.
// Career runs: Smriti Mandhana 17 (15 in 2024), RG Sharma 12, V Kohli 7.

#![allow(dead_code)]

use std::sync::Arc;

use cricket_query_backend::services::dataset::{BALL_EVENTS, MATCHES};
use cricket_query_backend::services::DatasetSnapshot;
use datafusion::arrow::array::{ArrayRef, BooleanArray, Int64Array, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;

pub const MI: &str = "Mumbai Indians";
pub const CSK: &str = "Chennai Super Kings";

// (match, innings, over, batter, bowler, runs, wicket, super over)
type Delivery = (&'static str, i64, i64, &'static str, &'static str, i64, bool, bool);

const DELIVERIES: &[Delivery] = &[
    // m1, CSK batting
    ("m1", 1, 0, "Smriti Mandhana", "Player A", 4, false, false),
    ("m1", 1, 0, "Smriti Mandhana", "Player A", 0, true, false),
    ("m1", 1, 1, "V Kohli", "Player A", 0, true, false),
    ("m1", 1, 2, "V Kohli", "Player A", 6, false, false),
    ("m1", 1, 2, "V Kohli", "Player A", 0, true, false),
    ("m1", 1, 8, "Smriti Mandhana", "Amit Roy", 0, true, false),
    ("m1", 1, 9, "Smriti Mandhana", "Amit Roy", 6, false, false),
    ("m1", 1, 9, "V Kohli", "Amit Roy", 0, true, false),
    ("m1", 1, 10, "V Kohli", "Amit Roy", 0, true, false),
    ("m1", 1, 11, "Smriti Mandhana", "Amit Roy", 0, true, false),
    ("m1", 1, 17, "Smriti Mandhana", "Player A", 0, true, false),
    ("m1", 1, 17, "Smriti Mandhana", "Player A", 1, false, false),
    // m2, MI batting
    ("m2", 1, 0, "RG Sharma", "Zed Khan", 4, false, false),
    ("m2", 1, 12, "RG Sharma", "Zed Khan", 0, true, false),
    ("m2", 1, 13, "RG Sharma", "Zed Khan", 0, true, false),
    ("m2", 1, 14, "RG Sharma", "Zed Khan", 2, false, false),
    ("m2", 1, 14, "RG Sharma", "Zed Khan", 0, true, false),
    ("m2", 1, 15, "RG Sharma", "Zed Khan", 0, true, false),
    ("m2", 1, 16, "RG Sharma", "Kuldeep Yadav", 0, true, false),
    ("m2", 1, 18, "RG Sharma", "Kuldeep Yadav", 6, false, false),
    // m2, CSK batting
    ("m2", 2, 3, "V Kohli", "Player A", 0, true, false),
    ("m2", 2, 5, "Smriti Mandhana", "Player A", 0, true, false),
    ("m2", 2, 5, "Smriti Mandhana", "Player A", 4, false, false),
    ("m2", 2, 19, "V Kohli", "Player A", 0, true, false),
    ("m2", 3, 0, "V Kohli", "Player A", 0, true, true),
    // m3 (2023), CSK batting
    ("m3", 1, 1, "Smriti Mandhana", "Player A", 0, true, false),
    ("m3", 1, 1, "V Kohli", "Player A", 0, true, false),
    ("m3", 1, 2, "V Kohli", "Player A", 0, true, false),
    ("m3", 1, 4, "Smriti Mandhana", "Player A", 2, false, false),
    ("m3", 1, 10, "V Kohli", "Amit Roy", 1, false, false),
];

// (match, season, venue, team1, team2, winner)
type MatchRow = (&'static str, i64, &'static str, &'static str, &'static str, &'static str);

const MATCH_ROWS: &[MatchRow] = &[
    ("m1", 2024, "Wankhede Stadium, Mumbai", MI, CSK, MI),
    ("m2", 2024, "Eden Gardens, Kolkata", CSK, MI, CSK),
    ("m3", 2023, "Wankhede Stadium, Mumbai", MI, CSK, MI),
];

fn batting_team(batter: &str) -> &'static str {
    if batter == "RG Sharma" {
        MI
    } else {
        CSK
    }
}

fn other(team: &str) -> &'static str {
    if team == MI {
        CSK
    } else {
        MI
    }
}

fn partner(batter: &str) -> &'static str {
    match batter {
        "Smriti Mandhana" => "V Kohli",
        "V Kohli" => "Smriti Mandhana",
        _ => "Ishan Kishan",
    }
}

fn phase(over: i64) -> &'static str {
    match over {
        0..=5 => "powerplay",
        6..=14 => "middle",
        _ => "death",
    }
}

fn text<F: Fn(&Delivery) -> &'static str>(f: F) -> ArrayRef {
    Arc::new(StringArray::from(DELIVERIES.iter().map(f).collect::<Vec<_>>()))
}

fn int<F: Fn(&Delivery) -> i64>(f: F) -> ArrayRef {
    Arc::new(Int64Array::from(DELIVERIES.iter().map(f).collect::<Vec<_>>()))
}

fn flag<F: Fn(&Delivery) -> bool>(f: F) -> ArrayRef {
    Arc::new(BooleanArray::from(DELIVERIES.iter().map(f).collect::<Vec<_>>()))
}

pub fn ball_events() -> RecordBatch {
    let columns: Vec<(&str, DataType, ArrayRef)> = vec![
        ("match_id", DataType::Utf8, text(|d| d.0)),
        ("innings", DataType::Int64, int(|d| d.1)),
        ("over_num", DataType::Int64, int(|d| d.2)),
        ("batting_team", DataType::Utf8, text(|d| batting_team(d.3))),
        ("bowling_team", DataType::Utf8, text(|d| other(batting_team(d.3)))),
        ("batter", DataType::Utf8, text(|d| d.3)),
        ("bowler", DataType::Utf8, text(|d| d.4)),
        ("non_striker", DataType::Utf8, text(|d| partner(d.3))),
        ("runs_batter", DataType::Int64, int(|d| d.5)),
        ("runs_extras", DataType::Int64, int(|_| 0)),
        ("runs_total", DataType::Int64, int(|d| d.5)),
        ("runs_conceded", DataType::Int64, int(|d| d.5)),
        ("is_wicket", DataType::Boolean, flag(|d| d.6)),
        ("is_bowler_wicket", DataType::Boolean, flag(|d| d.6)),
        ("is_batter_out", DataType::Boolean, flag(|d| d.6)),
        ("is_legal", DataType::Boolean, flag(|_| true)),
        ("is_dot", DataType::Boolean, flag(|d| d.5 == 0)),
        ("is_boundary", DataType::Boolean, flag(|d| d.5 == 4 || d.5 == 6)),
        ("is_four", DataType::Boolean, flag(|d| d.5 == 4)),
        ("is_six", DataType::Boolean, flag(|d| d.5 == 6)),
        ("is_super_over", DataType::Boolean, flag(|d| d.7)),
        ("phase", DataType::Utf8, text(|d| phase(d.2))),
    ];
    let schema = Schema::new(
        columns
            .iter()
            .map(|(name, dt, _)| Field::new(*name, dt.clone(), false))
            .collect::<Vec<_>>(),
    );
    RecordBatch::try_new(Arc::new(schema), columns.into_iter().map(|(_, _, a)| a).collect()).unwrap()
}

fn match_text(f: fn(&MatchRow) -> &'static str) -> ArrayRef {
    Arc::new(StringArray::from(MATCH_ROWS.iter().map(f).collect::<Vec<_>>()))
}

pub fn matches() -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("match_id", DataType::Utf8, false),
        Field::new("season", DataType::Int64, false),
        Field::new("venue", DataType::Utf8, false),
        Field::new("team1", DataType::Utf8, false),
        Field::new("team2", DataType::Utf8, false),
        Field::new("outcome_winner", DataType::Utf8, true),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            match_text(|r| r.0),
            Arc::new(Int64Array::from(MATCH_ROWS.iter().map(|r| r.1).collect::<Vec<_>>())),
            match_text(|r| r.2),
            match_text(|r| r.3),
            match_text(|r| r.4),
            match_text(|r| r.5),
        ],
    )
    .unwrap()
}

fn build(events: RecordBatch, version: &str) -> DatasetSnapshot {
    let matches = matches();
    DatasetSnapshot::builder(version)
        .with_cricket_conventions()
        .table(BALL_EVENTS, events.schema(), vec![events])
        .unwrap()
        .table(MATCHES, matches.schema(), vec![matches])
        .unwrap()
        .build()
        .unwrap()
}

pub fn snapshot() -> DatasetSnapshot {
    build(ball_events(), "fixture-1")
}

/// The same data with some delivery columns removed
pub fn snapshot_without(dropped: &[&str]) -> DatasetSnapshot {
    let events = ball_events();
    let keep: Vec<usize> = events
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !dropped.contains(&f.name().as_str()))
        .map(|(i, _)| i)
        .collect();
    build(events.project(&keep).unwrap(), "fixture-2")
}
