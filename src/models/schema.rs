use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic column type as seen by the resolver, synthesizer and validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
}

impl SemanticType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Float)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "integer",
            SemanticType::Float => "float",
            SemanticType::Text => "text",
            SemanticType::Boolean => "boolean",
            SemanticType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enumerated_values: Option<Vec<String>>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable,
            enumerated_values: None,
        }
    }

    pub fn with_enumerated_values(mut self, values: Vec<String>) -> Self {
        self.enumerated_values = Some(values);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_entity: String,
    pub from_column: String,
    pub to_entity: String,
    pub to_column: String,
}

impl Relationship {
    pub fn new(
        from_entity: impl Into<String>,
        from_column: impl Into<String>,
        to_entity: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_entity: from_entity.into(),
            from_column: from_column.into(),
            to_entity: to_entity.into(),
            to_column: to_column.into(),
        }
    }
}

/// One tabular entity of the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_name: String,
    pub columns: Vec<ColumnSpec>,
    pub relationships: Vec<Relationship>,
    pub row_count: usize,
}

impl EntitySchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Player,
    Team,
}

/// A player or team the resolver can match names against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectEntry {
    pub kind: SubjectKind,
    pub name: String,
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Latest season in which the subject appears in deliveries
    pub last_active_season: Option<i64>,
}

/// Read-only description of the dataset, shared by every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
    pub version: String,
    entities: BTreeMap<String, EntitySchema>,
    subjects: Vec<SubjectEntry>,
}

impl SchemaRegistry {
    pub fn new(version: impl Into<String>, entities: Vec<EntitySchema>, subjects: Vec<SubjectEntry>) -> Self {
        Self {
            version: version.into(),
            entities: entities
                .into_iter()
                .map(|e| (e.entity_name.clone(), e))
                .collect(),
            subjects,
        }
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    pub fn column(&self, entity: &str, column: &str) -> Option<&ColumnSpec> {
        self.entity(entity).and_then(|e| e.column(column))
    }

    pub fn enumerated_values(&self, entity: &str, column: &str) -> &[String] {
        self.column(entity, column)
            .and_then(|c| c.enumerated_values.as_deref())
            .unwrap_or(&[])
    }

    pub fn subjects(&self, kind: SubjectKind) -> impl Iterator<Item = &SubjectEntry> {
        self.subjects.iter().filter(move |s| s.kind == kind)
    }

    pub fn all_subjects(&self) -> &[SubjectEntry] {
        &self.subjects
    }

    /// Most recent season any subject was active in
    pub fn latest_season(&self) -> Option<i64> {
        self.subjects.iter().filter_map(|s| s.last_active_season).max()
    }
}

/// Column lookup used to validate routines, either against the registry
/// captured at synthesis time or against a live snapshot
pub trait ColumnCatalog {
    fn entity_columns(&self, entity: &str) -> Option<Vec<(String, SemanticType)>>;

    fn relationship(&self, from_entity: &str, to_entity: &str) -> Option<Relationship>;
}

impl ColumnCatalog for SchemaRegistry {
    fn entity_columns(&self, entity: &str) -> Option<Vec<(String, SemanticType)>> {
        self.entity(entity).map(|e| {
            e.columns
                .iter()
                .map(|c| (c.name.clone(), c.semantic_type))
                .collect()
        })
    }

    fn relationship(&self, from_entity: &str, to_entity: &str) -> Option<Relationship> {
        self.entity(from_entity).and_then(|e| {
            e.relationships
                .iter()
                .find(|r| r.to_entity == to_entity)
                .cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let deliveries = EntitySchema {
            entity_name: "ball_events".to_string(),
            columns: vec![
                ColumnSpec::new("match_id", SemanticType::Text, false),
                ColumnSpec::new("phase", SemanticType::Text, false).with_enumerated_values(vec![
                    "powerplay".to_string(),
                    "middle".to_string(),
                    "death".to_string(),
                ]),
            ],
            relationships: vec![Relationship::new("ball_events", "match_id", "matches", "match_id")],
            row_count: 10,
        };
        let subjects = vec![
            SubjectEntry {
                kind: SubjectKind::Player,
                name: "S Mandhana".to_string(),
                id: Some("p1".to_string()),
                aliases: vec![],
                last_active_season: Some(2023),
            },
            SubjectEntry {
                kind: SubjectKind::Team,
                name: "Mumbai Indians".to_string(),
                id: Some("mi".to_string()),
                aliases: vec!["MI".to_string()],
                last_active_season: Some(2024),
            },
        ];
        SchemaRegistry::new("v1", vec![deliveries], subjects)
    }

    #[test]
    fn test_registry_lookups() {
        let registry = registry();
        assert!(registry.entity("ball_events").is_some());
        assert!(registry.column("ball_events", "phase").is_some());
        assert!(registry.column("ball_events", "venue").is_none());
        assert_eq!(registry.enumerated_values("ball_events", "phase").len(), 3);
        assert!(registry.enumerated_values("ball_events", "match_id").is_empty());
        assert_eq!(registry.latest_season(), Some(2024));
        assert_eq!(registry.subjects(SubjectKind::Player).count(), 1);
    }

    #[test]
    fn test_catalog_relationship() {
        let registry = registry();
        let rel = registry.relationship("ball_events", "matches").unwrap();
        assert_eq!(rel.from_column, "match_id");
        assert!(registry.relationship("matches", "ball_events").is_none());
        let columns = registry.entity_columns("ball_events").unwrap();
        assert_eq!(columns[1], ("phase".to_string(), SemanticType::Text));
    }
}
