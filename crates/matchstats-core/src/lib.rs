//! Core domain model for match-statistics ingestion.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "matchstats-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tournament,
    Match,
}

/// Remote lifecycle status of a listing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Pending,
    Ongoing,
    Completed,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
        }
    }

    /// Case-insensitive parse; blank or unknown input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ongoing" | "current" | "in_progress" => Some(Self::Ongoing),
            "completed" | "archive" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Ongoing)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tournament ids are compared numerically by the remote site, so leading zeros are dropped.
pub fn normalize_tournament_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        return Some(if stripped.is_empty() { "0".to_string() } else { stripped.to_string() });
    }
    Some(trimmed.to_string())
}

pub fn normalize_match_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}

/// Natural identity of a tournament `(year, tournament_id)` or a match
/// `(year, tournament_id, match_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub year: i32,
    pub tournament_id: String,
    pub match_id: Option<String>,
}

impl NaturalKey {
    pub fn tournament(year: i32, tournament_id: &str) -> Option<Self> {
        Some(Self {
            year,
            tournament_id: normalize_tournament_id(tournament_id)?,
            match_id: None,
        })
    }

    pub fn for_match(year: i32, tournament_id: &str, match_id: &str) -> Option<Self> {
        Some(Self {
            year,
            tournament_id: normalize_tournament_id(tournament_id)?,
            match_id: Some(normalize_match_id(match_id)?),
        })
    }

    pub fn kind(&self) -> EntityKind {
        if self.match_id.is_some() {
            EntityKind::Match
        } else {
            EntityKind::Tournament
        }
    }

    /// The key of the tournament this key belongs to (itself for tournaments).
    pub fn tournament_key(&self) -> NaturalKey {
        NaturalKey {
            year: self.year,
            tournament_id: self.tournament_id.clone(),
            match_id: None,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.match_id {
            Some(match_id) => write!(f, "{}/{}/{}", self.year, self.tournament_id, match_id),
            None => write!(f, "{}/{}", self.year, self.tournament_id),
        }
    }
}

/// A scalar column value. `Null` means "absent" for merge purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Converts a JSON scalar; arrays and objects become their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Int(i64::from(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            JsonValue::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A remote-observed tournament or match as reported by a result source.
///
/// Everything here is untrusted until [`ListingEntity::natural_key`] validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntity {
    pub kind: EntityKind,
    pub year: Option<i32>,
    pub tournament_id: Option<String>,
    pub match_id: Option<String>,
    pub status: EntityStatus,
    pub url: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, FieldValue>,
}

impl ListingEntity {
    pub fn tournament(year: i32, tournament_id: impl Into<String>, status: EntityStatus) -> Self {
        Self {
            kind: EntityKind::Tournament,
            year: Some(year),
            tournament_id: Some(tournament_id.into()),
            match_id: None,
            status,
            url: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn for_match(
        year: i32,
        tournament_id: impl Into<String>,
        match_id: Option<String>,
        status: EntityStatus,
    ) -> Self {
        Self {
            kind: EntityKind::Match,
            year: Some(year),
            tournament_id: Some(tournament_id.into()),
            match_id,
            status,
            url: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn attribute_text(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(FieldValue::as_text)
    }

    /// Validated natural key, or `None` when a required key part is missing or blank.
    pub fn natural_key(&self) -> Option<NaturalKey> {
        let year = self.year?;
        let tournament_id = self.tournament_id.as_deref()?;
        match self.kind {
            EntityKind::Tournament => NaturalKey::tournament(year, tournament_id),
            EntityKind::Match => NaturalKey::for_match(year, tournament_id, self.match_id.as_deref()?),
        }
    }
}

/// Persisted natural keys and their last-known status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    entries: BTreeMap<NaturalKey, EntityStatus>,
}

impl LocalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: NaturalKey, status: EntityStatus) {
        self.entries.insert(key, status);
    }

    pub fn status_of(&self, key: &NaturalKey) -> Option<EntityStatus> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &NaturalKey, status: EntityStatus) -> bool {
        self.status_of(key) == Some(status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaturalKey, &EntityStatus)> {
        self.entries.iter()
    }
}

impl FromIterator<(NaturalKey, EntityStatus)> for LocalSnapshot {
    fn from_iter<I: IntoIterator<Item = (NaturalKey, EntityStatus)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Match-level artifact kinds published by the statistics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "key-stats")]
    KeyStats,
    #[serde(rename = "rally-analysis")]
    RallyAnalysis,
    #[serde(rename = "stroke-analysis")]
    StrokeAnalysis,
    #[serde(rename = "court-vision")]
    CourtVision,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::KeyStats,
        DataType::RallyAnalysis,
        DataType::StrokeAnalysis,
        DataType::CourtVision,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Self::KeyStats => "key-stats",
            Self::RallyAnalysis => "rally-analysis",
            Self::StrokeAnalysis => "stroke-analysis",
            Self::CourtVision => "court-vision",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::KeyStats => "atp_key_stats",
            Self::RallyAnalysis => "atp_rally_analysis",
            Self::StrokeAnalysis => "atp_stroke_analysis",
            Self::CourtVision => "atp_court_vision",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|d| d.slug() == wanted)
            .ok_or_else(|| format!("unrecognised data type `{s}`"))
    }
}

/// Unit of fetch work. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub natural_key: NaturalKey,
    pub data_type: DataType,
    pub url: String,
    pub attempt_count: u32,
}

impl WorkItem {
    pub fn new(natural_key: NaturalKey, data_type: DataType, url: impl Into<String>) -> Self {
        Self {
            natural_key,
            data_type,
            url: url.into(),
            attempt_count: 0,
        }
    }
}

/// Plaintext JSON document recovered from an encrypted envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecryptedArtifact(JsonValue);

impl DecryptedArtifact {
    pub fn new(value: JsonValue) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

/// Logical table: natural-key columns first, then nullable value columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub key_columns: Vec<ColumnSpec>,
    pub value_columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    MissingKey(String),
    UnknownColumn(String),
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(col) => write!(f, "natural-key column `{col}` is null or absent"),
            Self::UnknownColumn(col) => write!(f, "column `{col}` is not part of the table"),
        }
    }
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_columns: Vec::new(),
            value_columns: Vec::new(),
        }
    }

    pub fn key(mut self, name: &str, column_type: ColumnType) -> Self {
        self.key_columns.push(ColumnSpec {
            name: name.to_string(),
            column_type,
        });
        self
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.value_columns.push(ColumnSpec {
            name: name.to_string(),
            column_type,
        });
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.key_columns.iter().chain(self.value_columns.iter())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns().any(|c| c.name == name)
    }

    pub fn validate(&self, record: &StoredRecord) -> Result<(), SchemaViolation> {
        for key in &self.key_columns {
            if record.get(&key.name).map_or(true, FieldValue::is_null) {
                return Err(SchemaViolation::MissingKey(key.name.clone()));
            }
        }
        if let Some(unknown) = record.fields.keys().find(|name| !self.has_column(name)) {
            return Err(SchemaViolation::UnknownColumn(unknown.clone()));
        }
        Ok(())
    }
}

/// A normalized row. Absent and `Null` fields are both "no new information".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub fields: BTreeMap<String, FieldValue>,
}

impl StoredRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Values of the table's natural-key columns, in key order.
    pub fn key_values(&self, table: &TableSpec) -> Vec<FieldValue> {
        table
            .key_columns
            .iter()
            .map(|c| self.get(&c.name).cloned().unwrap_or_default())
            .collect()
    }
}
