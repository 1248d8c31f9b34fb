// Dataset snapshot
//
// Immutable, versioned set of Arrow tables plus the schema registry derived
// from them. Built once at startup (or per test) and shared read-only.

use anyhow::{anyhow, Context, Result};
use datafusion::arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use datafusion::arrow::compute;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::{ParquetReadOptions, SessionContext};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{
    ColumnCatalog, ColumnSpec, EntitySchema, Relationship, SchemaRegistry, SemanticType,
    SubjectEntry, SubjectKind,
};

pub const BALL_EVENTS: &str = "ball_events";
pub const MATCHES: &str = "matches";
pub const PLAYERS: &str = "players";
pub const TEAMS: &str = "teams";

/// Scorecard name → full name, e.g. `{"RG Sharma": "Rohit Sharma"}`
pub const PLAYER_FULL_NAMES_FILE: &str = "player_full_names.json";

const REQUIRED_ENTITIES: [&str; 2] = [BALL_EVENTS, MATCHES];
const OPTIONAL_ENTITIES: [&str; 2] = [PLAYERS, TEAMS];

const CATEGORICAL_COLUMNS: [(&str, &str); 5] = [
    (PLAYERS, "full_name"),
    (TEAMS, "team_name"),
    (TEAMS, "abbreviation"),
    (BALL_EVENTS, "phase"),
    (MATCHES, "venue"),
];

/// Arrow data for one entity
#[derive(Debug, Clone)]
pub struct EntityTable {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl EntityTable {
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Map an Arrow type onto the semantic types routines are checked against
pub fn semantic_type_of(data_type: &DataType) -> SemanticType {
    match data_type {
        DataType::Boolean => SemanticType::Boolean,
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => SemanticType::Integer,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => SemanticType::Float,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => SemanticType::Date,
        _ => SemanticType::Text,
    }
}

#[derive(Debug)]
pub struct DatasetSnapshot {
    version: String,
    tables: BTreeMap<String, EntityTable>,
    relationships: Vec<Relationship>,
    registry: Arc<SchemaRegistry>,
}

impl DatasetSnapshot {
    pub fn builder(version: impl Into<String>) -> DatasetSnapshotBuilder {
        DatasetSnapshotBuilder::new(version)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn table(&self, entity: &str) -> Option<&EntityTable> {
        self.tables.get(entity)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Load `<entity>.parquet` files from `dir`.
    ///
    /// `ball_events` and `matches` are required; `players` and `teams` are
    /// read when present, as is the full-name mapping in
    /// [`PLAYER_FULL_NAMES_FILE`].
    pub async fn load_parquet_dir(dir: &Path, version: impl Into<String>) -> Result<Self> {
        let ctx = SessionContext::new();

        let mut wanted: Vec<(&str, bool)> = REQUIRED_ENTITIES.iter().map(|e| (*e, true)).collect();
        wanted.extend(OPTIONAL_ENTITIES.iter().map(|e| (*e, false)));

        let mut reads = Vec::new();
        for (entity, required) in wanted {
            let path = dir.join(format!("{}.parquet", entity));
            if !path.exists() {
                if required {
                    return Err(anyhow!("Missing required table file {}", path.display()));
                }
                debug!("Optional table {} not found, skipping", entity);
                continue;
            }
            let ctx = &ctx;
            reads.push(async move {
                let path_str = path
                    .to_str()
                    .ok_or_else(|| anyhow!("Non UTF-8 path {}", path.display()))?;
                let df = ctx
                    .read_parquet(path_str, ParquetReadOptions::default())
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                let schema: SchemaRef = df.schema().inner().clone();
                let batches = df
                    .collect()
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Ok::<_, anyhow::Error>((entity, schema, batches))
            });
        }

        let loaded = futures::future::try_join_all(reads).await?;

        let mut builder = DatasetSnapshot::builder(version).with_cricket_conventions();
        for (entity, schema, batches) in loaded {
            builder = builder.table(entity, schema, batches)?;
        }

        let names_path = dir.join(PLAYER_FULL_NAMES_FILE);
        if names_path.exists() {
            let full_names = read_player_full_names(&names_path).await?;
            debug!("Loaded {} player full names", full_names.len());
            for (name, full_name) in full_names {
                builder = builder.player_alias(name, full_name);
            }
        }

        let snapshot = builder.build()?;

        info!(
            "Loaded dataset {} from {} ({} entities, {} subjects)",
            snapshot.version,
            dir.display(),
            snapshot.tables.len(),
            snapshot.registry.all_subjects().len()
        );
        Ok(snapshot)
    }
}

impl ColumnCatalog for DatasetSnapshot {
    fn entity_columns(&self, entity: &str) -> Option<Vec<(String, SemanticType)>> {
        self.tables.get(entity).map(|t| {
            t.schema
                .fields()
                .iter()
                .map(|f| (f.name().clone(), semantic_type_of(f.data_type())))
                .collect()
        })
    }

    fn relationship(&self, from_entity: &str, to_entity: &str) -> Option<Relationship> {
        self.relationships
            .iter()
            .find(|r| r.from_entity == from_entity && r.to_entity == to_entity)
            .cloned()
    }
}

pub struct DatasetSnapshotBuilder {
    version: String,
    tables: BTreeMap<String, EntityTable>,
    relationships: Vec<Relationship>,
    categorical: Vec<(String, String)>,
    player_aliases: BTreeMap<String, Vec<String>>,
}

impl DatasetSnapshotBuilder {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            tables: BTreeMap::new(),
            relationships: Vec::new(),
            categorical: Vec::new(),
            player_aliases: BTreeMap::new(),
        }
    }

    /// Declared relationship and enumerated columns of the ball-by-ball model
    pub fn with_cricket_conventions(mut self) -> Self {
        self.relationships
            .push(Relationship::new(BALL_EVENTS, "match_id", MATCHES, "match_id"));
        for (entity, column) in CATEGORICAL_COLUMNS {
            self.categorical.push((entity.to_string(), column.to_string()));
        }
        self
    }

    /// Add an entity. String columns are normalised to `Utf8`.
    pub fn table(mut self, entity: impl Into<String>, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let (schema, batches) = normalize_strings(schema, batches)?;
        self.tables.insert(entity.into(), EntityTable { schema, batches });
        Ok(self)
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn categorical(mut self, entity: impl Into<String>, column: impl Into<String>) -> Self {
        self.categorical.push((entity.into(), column.into()));
        self
    }

    /// Another name the player is known by, usually the full name behind a
    /// scorecard name
    pub fn player_alias(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        let aliases = self.player_aliases.entry(name.into()).or_default();
        let alias = alias.into();
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
        self
    }

    pub fn build(self) -> Result<DatasetSnapshot> {
        let mut entities = Vec::with_capacity(self.tables.len());
        for (name, table) in &self.tables {
            let mut columns = Vec::with_capacity(table.schema.fields().len());
            for field in table.schema.fields() {
                let mut spec = ColumnSpec::new(
                    field.name().clone(),
                    semantic_type_of(field.data_type()),
                    field.is_nullable(),
                );
                if self
                    .categorical
                    .iter()
                    .any(|(e, c)| e == name && c == field.name())
                {
                    spec = spec.with_enumerated_values(distinct_strings(table, field.name())?);
                }
                columns.push(spec);
            }
            entities.push(EntitySchema {
                entity_name: name.clone(),
                columns,
                relationships: self
                    .relationships
                    .iter()
                    .filter(|r| &r.from_entity == name)
                    .cloned()
                    .collect(),
                row_count: table.row_count(),
            });
        }

        let subjects = subject_directory(&self.tables, &self.player_aliases)?;
        let registry = SchemaRegistry::new(self.version.clone(), entities, subjects);

        Ok(DatasetSnapshot {
            version: self.version,
            tables: self.tables,
            relationships: self.relationships,
            registry: Arc::new(registry),
        })
    }
}

fn normalize_strings(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let is_wide_string = |dt: &DataType| matches!(dt, DataType::Utf8View | DataType::LargeUtf8);
    if !schema.fields().iter().any(|f| is_wide_string(f.data_type())) {
        return Ok((schema, batches));
    }

    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| {
            if is_wide_string(f.data_type()) {
                Field::new(f.name(), DataType::Utf8, f.is_nullable())
            } else {
                f.as_ref().clone()
            }
        })
        .collect();
    let target = Arc::new(Schema::new(fields));

    let mut out = Vec::with_capacity(batches.len());
    for batch in &batches {
        let columns = batch
            .columns()
            .iter()
            .zip(target.fields())
            .map(|(column, field)| {
                if column.data_type() == field.data_type() {
                    Ok(column.clone())
                } else {
                    compute::cast(column, field.data_type())
                }
            })
            .collect::<Result<Vec<ArrayRef>, _>>()?;
        out.push(RecordBatch::try_new(target.clone(), columns)?);
    }
    Ok((target, out))
}

/// Parse a scorecard name → full name JSON object
pub async fn read_player_full_names(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid player name mapping in {}", path.display()))
}

fn utf8_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>> {
    let Some(array) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let cast = compute::cast(array, &DataType::Utf8)?;
    Ok(cast.as_any().downcast_ref::<StringArray>().cloned())
}

fn int_column(batch: &RecordBatch, name: &str) -> Result<Option<Int64Array>> {
    let Some(array) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let cast = compute::cast(array, &DataType::Int64)?;
    Ok(cast.as_any().downcast_ref::<Int64Array>().cloned())
}

fn distinct_strings(table: &EntityTable, column: &str) -> Result<Vec<String>> {
    let mut values = BTreeSet::new();
    for batch in &table.batches {
        if let Some(array) = utf8_column(batch, column)? {
            for i in 0..array.len() {
                if array.is_valid(i) {
                    values.insert(array.value(i).to_string());
                }
            }
        }
    }
    Ok(values.into_iter().collect())
}

/// Latest season each player or team name appears in deliveries
fn activity_seasons(tables: &BTreeMap<String, EntityTable>) -> Result<HashMap<String, i64>> {
    let mut match_season: HashMap<String, i64> = HashMap::new();
    if let Some(matches) = tables.get(MATCHES) {
        for batch in &matches.batches {
            if let (Some(ids), Some(seasons)) = (utf8_column(batch, "match_id")?, int_column(batch, "season")?) {
                for i in 0..ids.len() {
                    if ids.is_valid(i) && seasons.is_valid(i) {
                        match_season.insert(ids.value(i).to_string(), seasons.value(i));
                    }
                }
            }
        }
    }

    let mut latest: HashMap<String, i64> = HashMap::new();
    let Some(events) = tables.get(BALL_EVENTS) else {
        return Ok(latest);
    };
    for batch in &events.batches {
        let Some(ids) = utf8_column(batch, "match_id")? else {
            continue;
        };
        let mut name_columns = Vec::new();
        for column in ["batter", "bowler", "non_striker", "batting_team", "bowling_team"] {
            if let Some(array) = utf8_column(batch, column)? {
                name_columns.push(array);
            }
        }
        for row in 0..batch.num_rows() {
            if !ids.is_valid(row) {
                continue;
            }
            let Some(season) = match_season.get(ids.value(row)).copied() else {
                continue;
            };
            for names in &name_columns {
                if names.is_valid(row) {
                    let entry = latest.entry(names.value(row).to_string()).or_insert(season);
                    *entry = (*entry).max(season);
                }
            }
        }
    }
    Ok(latest)
}

fn subject_directory(
    tables: &BTreeMap<String, EntityTable>,
    player_aliases: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<SubjectEntry>> {
    let seasons = activity_seasons(tables)?;
    let aliases_of = |name: &str| player_aliases.get(name).cloned().unwrap_or_default();
    let mut subjects = Vec::new();

    match tables.get(PLAYERS) {
        Some(players) => {
            for batch in &players.batches {
                let (Some(ids), Some(names)) = (utf8_column(batch, "player_id")?, utf8_column(batch, "full_name")?) else {
                    continue;
                };
                for i in 0..names.len() {
                    if names.is_valid(i) {
                        let name = names.value(i).to_string();
                        subjects.push(SubjectEntry {
                            kind: SubjectKind::Player,
                            id: ids.is_valid(i).then(|| ids.value(i).to_string()),
                            last_active_season: seasons.get(&name).copied(),
                            aliases: aliases_of(&name),
                            name,
                        });
                    }
                }
            }
        }
        None => {
            for name in distinct_event_names(tables, &["batter", "bowler", "non_striker"])? {
                subjects.push(SubjectEntry {
                    kind: SubjectKind::Player,
                    id: None,
                    last_active_season: seasons.get(&name).copied(),
                    aliases: aliases_of(&name),
                    name,
                });
            }
        }
    }

    match tables.get(TEAMS) {
        Some(teams) => {
            for batch in &teams.batches {
                let (Some(ids), Some(names)) = (utf8_column(batch, "team_id")?, utf8_column(batch, "team_name")?) else {
                    continue;
                };
                let abbreviations = utf8_column(batch, "abbreviation")?;
                for i in 0..names.len() {
                    if names.is_valid(i) {
                        let name = names.value(i).to_string();
                        let aliases = abbreviations
                            .as_ref()
                            .filter(|a| a.is_valid(i))
                            .map(|a| vec![a.value(i).to_string()])
                            .unwrap_or_default();
                        subjects.push(SubjectEntry {
                            kind: SubjectKind::Team,
                            id: ids.is_valid(i).then(|| ids.value(i).to_string()),
                            last_active_season: seasons.get(&name).copied(),
                            aliases,
                            name,
                        });
                    }
                }
            }
        }
        None => {
            for name in distinct_event_names(tables, &["batting_team", "bowling_team"])? {
                subjects.push(SubjectEntry {
                    kind: SubjectKind::Team,
                    id: None,
                    last_active_season: seasons.get(&name).copied(),
                    aliases: Vec::new(),
                    name,
                });
            }
        }
    }

    subjects.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
    subjects.dedup_by(|a, b| a.kind == b.kind && a.name == b.name);
    Ok(subjects)
}

fn distinct_event_names(tables: &BTreeMap<String, EntityTable>, columns: &[&str]) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if let Some(events) = tables.get(BALL_EVENTS) {
        for column in columns {
            names.extend(distinct_strings(events, column)?);
        }
    }
    Ok(names)
}
