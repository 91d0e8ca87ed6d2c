//! Result-source and record-normalizer contracts plus their ATP implementations.

pub mod atp;
pub mod court_vision;
pub mod normalize;

use std::collections::BTreeMap;

use async_trait::async_trait;
use matchstats_core::{
    ColumnType, DataType, DecryptedArtifact, EntityKind, FieldValue, ListingEntity, NaturalKey,
    StoredRecord, TableSpec,
};
use matchstats_storage::FetchError;
use thiserror::Error;

pub use atp::{AtpResultSource, EndpointTemplates};
pub use court_vision::CourtVisionNormalizer;
pub use normalize::{ColumnMap, KeyStatsNormalizer, RallyAnalysisNormalizer, StrokeAnalysisNormalizer};

pub const CRATE_NAME: &str = "matchstats-adapters";

pub const CALENDAR_TABLE: &str = "atp_calendars";
pub const RESULTS_TABLE: &str = "atp_results";
pub const CALENDAR_STATUS_COLUMN: &str = "tournament_status";
pub const RESULTS_STATUS_COLUMN: &str = "match_status";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
    #[error("listing entity has no results url: {0}")]
    MissingUrl(String),
}

/// Remote listings of tournaments and matches. Output is untrusted.
#[async_trait]
pub trait ResultSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn list_calendar(&self, year: i32) -> Result<Vec<ListingEntity>, SourceError>;

    async fn list_matches(&self, tournament: &ListingEntity) -> Result<Vec<ListingEntity>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("{data_type} artifact does not match the expected layout: {reason}")]
    SchemaMismatch { data_type: DataType, reason: String },
    #[error("no normalizer registered for {0}")]
    Unsupported(DataType),
}

impl NormalizeError {
    pub fn mismatch(data_type: DataType, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            data_type,
            reason: reason.into(),
        }
    }
}

/// Match identity and companion data a normalizer may need beyond the artifact itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeContext {
    pub key: NaturalKey,
    pub round: Option<String>,
    /// Rally-analysis artifact of the same match, when one is archived.
    pub rally_analysis: Option<DecryptedArtifact>,
}

impl NormalizeContext {
    pub fn new(key: NaturalKey) -> Self {
        Self {
            key,
            round: None,
            rally_analysis: None,
        }
    }

    pub fn with_round(mut self, round: Option<String>) -> Self {
        self.round = round;
        self
    }

    pub fn with_rally_analysis(mut self, rally: Option<DecryptedArtifact>) -> Self {
        self.rally_analysis = rally;
        self
    }
}

pub trait RecordNormalizer: Send + Sync {
    fn data_type(&self) -> DataType;

    fn table_spec(&self) -> TableSpec;

    fn normalize(
        &self,
        data_type: DataType,
        artifact: &DecryptedArtifact,
        ctx: &NormalizeContext,
    ) -> Result<Vec<StoredRecord>, NormalizeError>;
}

/// Normalizers keyed by the data type they handle.
#[derive(Default)]
pub struct NormalizerRegistry {
    normalizers: BTreeMap<DataType, Box<dyn RecordNormalizer>>,
}

impl NormalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One normalizer per data type.
    pub fn with_defaults(column_map: ColumnMap) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(KeyStatsNormalizer::new(column_map)));
        registry.register(Box::new(RallyAnalysisNormalizer));
        registry.register(Box::new(StrokeAnalysisNormalizer));
        registry.register(Box::new(CourtVisionNormalizer));
        registry
    }

    pub fn register(&mut self, normalizer: Box<dyn RecordNormalizer>) {
        self.normalizers.insert(normalizer.data_type(), normalizer);
    }

    pub fn get(&self, data_type: DataType) -> Option<&dyn RecordNormalizer> {
        self.normalizers.get(&data_type).map(|n| n.as_ref())
    }

    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.normalizers.values().map(|n| n.table_spec()).collect()
    }
}

pub fn calendar_table() -> TableSpec {
    TableSpec::new(CALENDAR_TABLE)
        .key("year", ColumnType::Integer)
        .key("tournament_id", ColumnType::Text)
        .column("tournament", ColumnType::Text)
        .column("category", ColumnType::Text)
        .column("location", ColumnType::Text)
        .column("date_start", ColumnType::Text)
        .column(CALENDAR_STATUS_COLUMN, ColumnType::Text)
        .column("winner", ColumnType::Text)
        .column("url", ColumnType::Text)
}

pub fn results_table() -> TableSpec {
    TableSpec::new(RESULTS_TABLE)
        .key("year", ColumnType::Integer)
        .key("tournament_id", ColumnType::Text)
        .key("match_id", ColumnType::Text)
        .column("tournament", ColumnType::Text)
        .column("category", ColumnType::Text)
        .column("round", ColumnType::Text)
        .column("player1_name", ColumnType::Text)
        .column("player1_id", ColumnType::Text)
        .column("player1_seed", ColumnType::Text)
        .column("player2_name", ColumnType::Text)
        .column("player2_id", ColumnType::Text)
        .column("player2_seed", ColumnType::Text)
        .column("score", ColumnType::Text)
        .column("url", ColumnType::Text)
        .column("court_vision", ColumnType::Integer)
        .column(RESULTS_STATUS_COLUMN, ColumnType::Text)
}

pub fn listing_table(kind: EntityKind) -> TableSpec {
    match kind {
        EntityKind::Tournament => calendar_table(),
        EntityKind::Match => results_table(),
    }
}

pub fn status_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Tournament => CALENDAR_STATUS_COLUMN,
        EntityKind::Match => RESULTS_STATUS_COLUMN,
    }
}

/// Row persisted for a listing entity; `None` when the entity has no valid natural key.
/// Attributes without a column in the listing table are dropped.
pub fn listing_record(entity: &ListingEntity) -> Option<StoredRecord> {
    let key = entity.natural_key()?;
    let table = listing_table(entity.kind);

    let mut record = StoredRecord::new()
        .with("year", key.year)
        .with("tournament_id", key.tournament_id.clone())
        .with(status_column(entity.kind), entity.status.as_str());
    if let Some(match_id) = &key.match_id {
        record.set("match_id", match_id.clone());
    }
    record.set("url", entity.url.clone());

    for (name, value) in &entity.attributes {
        if table.has_column(name) && record.get(name).is_none() {
            record.set(name, value.clone());
        }
    }
    Some(record)
}

pub fn is_court_vision_capable(entity: &ListingEntity) -> bool {
    entity
        .attributes
        .get("court_vision")
        .and_then(FieldValue::as_i64)
        .is_some_and(|flag| flag == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchstats_core::EntityStatus;

    #[test]
    fn listing_records_carry_key_status_and_known_attributes() {
        let entity = ListingEntity::for_match(2024, "0339", Some("MS001".into()), EntityStatus::Completed)
            .with_url("https://example.test/stats/ms001")
            .with_attribute("round", "Final")
            .with_attribute("not_a_column", "x");

        let record = listing_record(&entity).expect("record");
        assert_eq!(record.get("tournament_id"), Some(&FieldValue::from("339")));
        assert_eq!(record.get("match_id"), Some(&FieldValue::from("ms001")));
        assert_eq!(record.get("match_status"), Some(&FieldValue::from("completed")));
        assert_eq!(record.get("round"), Some(&FieldValue::from("Final")));
        assert!(record.get("not_a_column").is_none());
        assert!(results_table().validate(&record).is_ok());
    }

    #[test]
    fn entities_without_key_produce_no_record() {
        let entity = ListingEntity::for_match(2024, "339", None, EntityStatus::Pending);
        assert!(listing_record(&entity).is_none());
    }

    #[test]
    fn default_registry_covers_every_data_type() {
        let registry = NormalizerRegistry::with_defaults(ColumnMap::default());
        for data_type in DataType::ALL {
            let normalizer = registry.get(data_type).expect("registered");
            assert_eq!(normalizer.data_type(), data_type);
            assert_eq!(normalizer.table_spec().name, data_type.table());
        }
        assert_eq!(registry.table_specs().len(), 4);
    }

    #[test]
    fn court_vision_flag_is_read_from_attributes() {
        let plain = ListingEntity::for_match(2024, "339", Some("ms001".into()), EntityStatus::Completed);
        assert!(!is_court_vision_capable(&plain));
        let flagged = plain.with_attribute("court_vision", 1);
        assert!(is_court_vision_capable(&flagged));
    }
}
