//! Idempotent merge of normalized rows into SQLite, keyed by natural identity.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use matchstats_core::{EntityStatus, FieldValue, LocalSnapshot, NaturalKey, StoredRecord, TableSpec};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("`{0}` is not a valid table or column name")]
    Identifier(String),
    #[error("table {table} has no `{column}` column")]
    MissingColumn { table: String, column: String },
}

/// Optional scoping of a snapshot query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub year: Option<i32>,
    pub tournament_id: Option<String>,
}

impl SnapshotFilter {
    pub fn year(year: i32) -> Self {
        Self {
            year: Some(year),
            tournament_id: None,
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn ensure_table(&self, table: &TableSpec) -> Result<(), StoreError>;

    /// Natural keys and statuses currently persisted in a listing table.
    async fn snapshot(
        &self,
        table: &TableSpec,
        status_column: &str,
        filter: &SnapshotFilter,
    ) -> Result<LocalSnapshot, StoreError>;

    /// Merges `records` in one transaction. Returns the number of rows touched.
    async fn upsert(&self, table: &TableSpec, records: &[StoredRecord]) -> Result<u64, StoreError>;
}

fn ident(name: &str) -> Result<String, StoreError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::Identifier(name.to_string()))
    }
}

fn read_field(row: &SqliteRow, column: &str) -> FieldValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(column) {
        return v.map(FieldValue::Int).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(column) {
        return v.map(FieldValue::Float).unwrap_or_default();
    }
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .map(FieldValue::Text)
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        // every in-memory connection is its own database
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        info!(database_url, max_connections, "connected to storage");
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn existing_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", ident(table)?))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    /// Every stored row of `table`, ordered by identity.
    pub async fn rows(&self, table: &TableSpec) -> Result<Vec<StoredRecord>, StoreError> {
        let rows = sqlx::query(&format!("SELECT * FROM {} ORDER BY id", ident(&table.name)?))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut record = StoredRecord::new();
                for column in table.columns() {
                    record.set(&column.name, read_field(row, &column.name));
                }
                record
            })
            .collect())
    }

    pub async fn max_identity(&self, table: &str) -> Result<Option<i64>, StoreError> {
        let max: Option<i64> = sqlx::query_scalar(&format!("SELECT MAX(id) FROM {}", ident(table)?))
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn ensure_table(&self, table: &TableSpec) -> Result<(), StoreError> {
        let name = ident(&table.name)?;
        let mut columns = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        for column in table.key_columns.iter() {
            columns.push(format!("{} {} NOT NULL", ident(&column.name)?, column.column_type.sql()));
        }
        for column in table.value_columns.iter() {
            columns.push(format!("{} {}", ident(&column.name)?, column.column_type.sql()));
        }
        sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {name} ({})", columns.join(", ")))
            .execute(&self.pool)
            .await?;

        // tables created by an older column map gain the new value columns
        let existing = self.existing_columns(&table.name).await?;
        for column in &table.value_columns {
            if !existing.iter().any(|c| c == &column.name) {
                warn!(table = %table.name, column = %column.name, "adding missing column");
                sqlx::query(&format!(
                    "ALTER TABLE {name} ADD COLUMN {} {}",
                    ident(&column.name)?,
                    column.column_type.sql()
                ))
                .execute(&self.pool)
                .await?;
            }
        }

        let key_list = table
            .key_columns
            .iter()
            .map(|c| ident(&c.name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {name} ({key_list})",
            ident(&format!("ux_{}_natural_key", table.name))?
        ))
        .execute(&self.pool)
        .await?;
        debug!(table = %table.name, "table ready");
        Ok(())
    }

    async fn snapshot(
        &self,
        table: &TableSpec,
        status_column: &str,
        filter: &SnapshotFilter,
    ) -> Result<LocalSnapshot, StoreError> {
        if !table.has_column(status_column) {
            return Err(StoreError::MissingColumn {
                table: table.name.clone(),
                column: status_column.to_string(),
            });
        }
        let has_match_id = table.key_columns.iter().any(|c| c.name == "match_id");
        let mut query = QueryBuilder::<Sqlite>::new("SELECT year, tournament_id, ");
        query.push(if has_match_id { "match_id, " } else { "NULL AS match_id, " });
        query.push(format!("{} AS status FROM {} WHERE 1 = 1", ident(status_column)?, ident(&table.name)?));
        if let Some(year) = filter.year {
            query.push(" AND year = ").push_bind(year);
        }
        if let Some(tournament_id) = &filter.tournament_id {
            query.push(" AND tournament_id = ").push_bind(tournament_id.clone());
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut snapshot = LocalSnapshot::new();
        for row in rows {
            let year: i64 = row.try_get("year")?;
            let tournament_id: String = row.try_get("tournament_id")?;
            let match_id: Option<String> = row.try_get("match_id")?;
            let status: Option<String> = row.try_get("status")?;

            let key = i32::try_from(year).ok().and_then(|year| match &match_id {
                Some(match_id) => NaturalKey::for_match(year, &tournament_id, match_id),
                None => NaturalKey::tournament(year, &tournament_id),
            });
            match (key, status.as_deref().and_then(EntityStatus::parse)) {
                (Some(key), Some(status)) => snapshot.insert(key, status),
                _ => debug!(table = %table.name, year, %tournament_id, "ignoring stored row without usable key or status"),
            }
        }
        Ok(snapshot)
    }

    async fn upsert(&self, table: &TableSpec, records: &[StoredRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let name = ident(&table.name)?;
        let mut tx = self.pool.begin().await?;

        // keep the identity counter ahead of rows left behind by partial runs
        let max: Option<i64> = sqlx::query_scalar(&format!("SELECT MAX(id) FROM {name}"))
            .fetch_one(&mut *tx)
            .await?;
        if let Some(max) = max {
            sqlx::query("UPDATE sqlite_sequence SET seq = ? WHERE name = ? AND seq < ?")
                .bind(max)
                .bind(&table.name)
                .bind(max)
                .execute(&mut *tx)
                .await?;
        }

        let key_list = table
            .key_columns
            .iter()
            .map(|c| ident(&c.name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let mut touched = 0u64;
        for record in records {
            let columns: Vec<(&str, &FieldValue)> = table
                .columns()
                .filter_map(|c| record.get(&c.name).map(|v| (c.name.as_str(), v)))
                .collect();
            let quoted = columns
                .iter()
                .map(|(c, _)| ident(c))
                .collect::<Result<Vec<_>, _>>()?;

            let mut query = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {name} ({}) VALUES (", quoted.join(", ")));
            let mut values = query.separated(", ");
            for (_, value) in &columns {
                match value {
                    FieldValue::Null => values.push_bind(None::<String>),
                    FieldValue::Int(v) => values.push_bind(*v),
                    FieldValue::Float(v) => values.push_bind(*v),
                    FieldValue::Text(v) => values.push_bind(v.clone()),
                };
            }
            query.push(format!(") ON CONFLICT ({key_list}) DO "));

            let updates: Vec<String> = columns
                .iter()
                .zip(quoted.iter())
                .filter(|((column, _), _)| !table.key_columns.iter().any(|k| k.name == *column))
                .map(|(_, quoted)| format!("{quoted} = COALESCE(excluded.{quoted}, {name}.{quoted})"))
                .collect();
            if updates.is_empty() {
                query.push("NOTHING");
            } else {
                query.push(format!("UPDATE SET {}", updates.join(", ")));
            }

            touched += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(touched)
    }
}

/// A record that failed table validation and was left out of its batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub key: Vec<FieldValue>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteReport {
    pub table: String,
    pub submitted: usize,
    pub written: u64,
    pub batches: usize,
    pub rejected: Vec<RejectedRecord>,
}

/// Validates records and commits them in fixed-size transactional batches.
#[derive(Clone)]
pub struct StoreWriter {
    storage: Arc<dyn Storage>,
    batch_size: usize,
}

impl StoreWriter {
    pub fn new(storage: Arc<dyn Storage>, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn write(&self, table: &TableSpec, records: Vec<StoredRecord>) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport {
            table: table.name.clone(),
            submitted: records.len(),
            ..WriteReport::default()
        };

        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            match table.validate(&record) {
                Ok(()) => valid.push(record),
                Err(violation) => {
                    let key = record.key_values(table);
                    warn!(table = %table.name, ?key, reason = %violation, "schema mismatch; record skipped");
                    report.rejected.push(RejectedRecord {
                        key,
                        reason: violation.to_string(),
                    });
                }
            }
        }

        for batch in valid.chunks(self.batch_size) {
            report.written += self.storage.upsert(table, batch).await?;
            report.batches += 1;
            debug!(table = %table.name, rows = batch.len(), "batch committed");
        }
        info!(
            table = %table.name,
            written = report.written,
            rejected = report.rejected.len(),
            batches = report.batches,
            "write complete"
        );
        Ok(report)
    }

    /// [`write`](Self::write) bounded by a wall-clock limit. `None` means the limit was hit.
    pub async fn write_within(
        &self,
        limit: Duration,
        table: &TableSpec,
        records: Vec<StoredRecord>,
    ) -> Result<Option<WriteReport>, StoreError> {
        match tokio::time::timeout(limit, self.write(table, records)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchstats_core::ColumnType;

    fn stats_table() -> TableSpec {
        TableSpec::new("atp_key_stats")
            .key("year", ColumnType::Integer)
            .key("tournament_id", ColumnType::Text)
            .key("match_id", ColumnType::Text)
            .key("set_n", ColumnType::Integer)
            .key("player_id", ColumnType::Text)
            .column("aces", ColumnType::Integer)
            .column("serve1_pct", ColumnType::Real)
            .column("round", ColumnType::Text)
    }

    fn row(aces: impl Into<FieldValue>) -> StoredRecord {
        StoredRecord::new()
            .with("year", 2024)
            .with("tournament_id", "339")
            .with("match_id", "ms001")
            .with("set_n", 0)
            .with("player_id", "d875")
            .with("aces", aces)
    }

    async fn storage() -> Arc<SqliteStorage> {
        let storage = SqliteStorage::in_memory().await.expect("in-memory sqlite");
        storage.ensure_table(&stats_table()).await.expect("ensure table");
        Arc::new(storage)
    }

    #[tokio::test]
    async fn identical_upserts_leave_one_row() {
        let storage = storage().await;
        let writer = StoreWriter::new(storage.clone(), 10);

        writer.write(&stats_table(), vec![row(5)]).await.unwrap();
        writer.write(&stats_table(), vec![row(5)]).await.unwrap();

        let rows = storage.rows(&stats_table()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("aces"), Some(&FieldValue::Int(5)));
    }

    #[tokio::test]
    async fn null_fields_do_not_overwrite_stored_values() {
        let storage = storage().await;
        let writer = StoreWriter::new(storage.clone(), 10);

        writer
            .write(&stats_table(), vec![row(5).with("serve1_pct", 66.7)])
            .await
            .unwrap();
        writer
            .write(&stats_table(), vec![row(FieldValue::Null).with("round", "Final")])
            .await
            .unwrap();

        let rows = storage.rows(&stats_table()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("aces"), Some(&FieldValue::Int(5)));
        assert_eq!(rows[0].get("serve1_pct"), Some(&FieldValue::Float(66.7)));
        assert_eq!(rows[0].get("round"), Some(&FieldValue::from("Final")));

        writer.write(&stats_table(), vec![row(9)]).await.unwrap();
        let rows = storage.rows(&stats_table()).await.unwrap();
        assert_eq!(rows[0].get("aces"), Some(&FieldValue::Int(9)));
    }

    #[tokio::test]
    async fn invalid_records_are_rejected_without_failing_the_batch() {
        let storage = storage().await;
        let writer = StoreWriter::new(storage.clone(), 2);

        let missing_key = StoredRecord::new().with("year", 2024).with("aces", 1);
        let unknown_column = row(3).with("speed", 1.0);
        let records = vec![
            row(1),
            missing_key,
            row(2).with("player_id", "r0dg"),
            unknown_column,
            row(4).with("set_n", 1),
        ];
        let report = writer.write(&stats_table(), records).await.unwrap();

        assert_eq!(report.submitted, 5);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.batches, 2);
        assert_eq!(storage.rows(&stats_table()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn identity_counter_is_advanced_past_existing_rows() {
        let storage = storage().await;
        // a row inserted outside the writer, with an explicit identity
        sqlx::query(
            "INSERT INTO atp_key_stats (id, year, tournament_id, match_id, set_n, player_id) \
             VALUES (41, 2023, '1', 'ms001', 0, 'x')",
        )
        .execute(storage.pool())
        .await
        .unwrap();
        sqlx::query("UPDATE sqlite_sequence SET seq = 0 WHERE name = 'atp_key_stats'")
            .execute(storage.pool())
            .await
            .unwrap();

        let writer = StoreWriter::new(storage.clone(), 10);
        writer.write(&stats_table(), vec![row(1)]).await.unwrap();
        assert_eq!(storage.max_identity("atp_key_stats").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn failing_record_rolls_back_its_whole_batch() {
        let storage = storage().await;
        storage.upsert(&stats_table(), &[row(1)]).await.unwrap();

        // the null key trips NOT NULL after the first record of the batch was inserted
        let batch = vec![
            row(2).with("set_n", 1),
            row(3).with("set_n", FieldValue::Null),
            row(4).with("set_n", 2),
        ];
        let err = storage.upsert(&stats_table(), &batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "{err:?}");

        let rows = storage.rows(&stats_table()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("aces"), Some(&FieldValue::Int(1)));
        assert_eq!(rows[0].get("set_n"), Some(&FieldValue::Int(0)));
    }

    #[tokio::test]
    async fn snapshot_reads_keys_and_statuses() {
        let table = TableSpec::new("atp_results")
            .key("year", ColumnType::Integer)
            .key("tournament_id", ColumnType::Text)
            .key("match_id", ColumnType::Text)
            .column("match_status", ColumnType::Text);
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.ensure_table(&table).await.unwrap();
        let records = vec![
            StoredRecord::new()
                .with("year", 2024)
                .with("tournament_id", "339")
                .with("match_id", "ms001")
                .with("match_status", "completed"),
            StoredRecord::new()
                .with("year", 2023)
                .with("tournament_id", "339")
                .with("match_id", "ms001")
                .with("match_status", "completed"),
        ];
        storage.upsert(&table, &records).await.unwrap();

        let snapshot = storage
            .snapshot(&table, "match_status", &SnapshotFilter::year(2024))
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        let key = NaturalKey::for_match(2024, "339", "ms001").unwrap();
        assert!(snapshot.contains(&key, EntityStatus::Completed));

        let err = storage
            .snapshot(&table, "tournament_status", &SnapshotFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn { .. }));
    }

    #[tokio::test]
    async fn ensure_table_adds_new_value_columns() {
        let storage = storage().await;
        let wider = stats_table().column("double_faults", ColumnType::Integer);
        storage.ensure_table(&wider).await.unwrap();
        storage
            .upsert(&wider, &[row(1).with("double_faults", 2)])
            .await
            .unwrap();
        let rows = storage.rows(&wider).await.unwrap();
        assert_eq!(rows[0].get("double_faults"), Some(&FieldValue::Int(2)));
    }

    #[test]
    fn identifiers_are_restricted() {
        assert_eq!(ident("atp_key_stats").unwrap(), "\"atp_key_stats\"");
        assert!(ident("x; DROP TABLE y").is_err());
        assert!(ident("").is_err());
    }
}
