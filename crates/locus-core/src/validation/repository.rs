use super::errors::PersistenceError;
use crate::{
    store::{now_millis, sqlite::connect_pool},
    types::{CandidateRecord, ValidationNotes, ValidationStatus},
};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS validation_results (
        job_id TEXT NOT NULL,
        entity TEXT NOT NULL,
        entity_index INTEGER NOT NULL,
        entity_id TEXT,
        confidence_score INTEGER,
        validation_status TEXT,
        validation_notes TEXT,
        geocoding_source TEXT,
        latitude REAL,
        longitude REAL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (job_id, entity, entity_index)
    );
";

/// Stores the validation fields of a processed record.
#[async_trait]
pub trait ValidationRepository: Send + Sync {
    /// Writes the validation fields of every entity in `record`, replacing earlier writes for
    /// the same job.
    async fn persist(&self, job_id: &str, record: &CandidateRecord) -> Result<(), PersistenceError>;
}

/// Validation fields of one stored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValidation {
    pub entity: String,
    pub entity_index: usize,
    pub entity_id: Option<String>,
    pub confidence_score: Option<u8>,
    pub validation_status: Option<String>,
    pub validation_notes: Option<ValidationNotes>,
    pub geocoding_source: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl StoredValidation {
    fn rows(record: &CandidateRecord) -> Vec<Self> {
        let mut rows = Vec::with_capacity(
            record.locations.len() + record.organizations.len() + record.services.len(),
        );

        for (i, location) in record.locations.iter().enumerate() {
            rows.push(Self {
                entity: "location".to_string(),
                entity_index: i,
                entity_id: location.id.clone(),
                confidence_score: location.confidence_score,
                validation_status: status_string(location.validation_status),
                validation_notes: location.validation_notes.clone(),
                geocoding_source: location.geocoding_source.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
            });
        }
        for (i, organization) in record.organizations.iter().enumerate() {
            rows.push(Self {
                entity: "organization".to_string(),
                entity_index: i,
                entity_id: organization.id.clone(),
                confidence_score: organization.confidence_score,
                validation_status: status_string(organization.validation_status),
                validation_notes: organization.validation_notes.clone(),
                geocoding_source: None,
                latitude: None,
                longitude: None,
            });
        }
        for (i, service) in record.services.iter().enumerate() {
            rows.push(Self {
                entity: "service".to_string(),
                entity_index: i,
                entity_id: service.id.clone(),
                confidence_score: service.confidence_score,
                validation_status: status_string(service.validation_status),
                validation_notes: service.validation_notes.clone(),
                geocoding_source: None,
                latitude: None,
                longitude: None,
            });
        }

        rows
    }
}

fn status_string(status: Option<ValidationStatus>) -> Option<String> {
    status.map(|s| s.as_str().to_string())
}

/// [`ValidationRepository`] backed by a `SQLite` table keyed by job, entity kind and index.
pub struct SqliteValidationRepository {
    pool: SqlitePool,
    /// Rows written per transaction.
    batch_size: usize,
}

impl SqliteValidationRepository {
    /// # Errors
    ///
    /// Returns [`PersistenceError::Backend`] if the connection or schema creation fails.
    pub async fn new(database_url: &str, batch_size: usize) -> Result<Self, PersistenceError> {
        let pool = connect_pool(database_url).await?;
        Self::from_pool(pool, batch_size).await
    }

    /// # Errors
    ///
    /// Returns [`PersistenceError::Backend`] if schema creation fails.
    pub async fn from_pool(pool: SqlitePool, batch_size: usize) -> Result<Self, PersistenceError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, batch_size: batch_size.max(1) })
    }

    /// Reads back the stored fields of a job, locations first.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the query fails or stored notes cannot be decoded.
    pub async fn fetch(&self, job_id: &str) -> Result<Vec<StoredValidation>, PersistenceError> {
        let rows = sqlx::query(
            r"
            SELECT entity, entity_index, entity_id, confidence_score, validation_status,
                   validation_notes, geocoding_source, latitude, longitude
            FROM validation_results
            WHERE job_id = ?
            ORDER BY CASE entity WHEN 'location' THEN 0 WHEN 'organization' THEN 1 ELSE 2 END,
                     entity_index
            ",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<StoredValidation, PersistenceError> {
                let index: i64 = row.try_get("entity_index")?;
                let score: Option<i64> = row.try_get("confidence_score")?;
                let notes: Option<String> = row.try_get("validation_notes")?;
                Ok(StoredValidation {
                    entity: row.try_get("entity")?,
                    entity_index: usize::try_from(index).unwrap_or(0),
                    entity_id: row.try_get("entity_id")?,
                    confidence_score: score.and_then(|s| u8::try_from(s).ok()),
                    validation_status: row.try_get("validation_status")?,
                    validation_notes: notes.map(|n| serde_json::from_str(&n)).transpose()?,
                    geocoding_source: row.try_get("geocoding_source")?,
                    latitude: row.try_get("latitude")?,
                    longitude: row.try_get("longitude")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ValidationRepository for SqliteValidationRepository {
    async fn persist(&self, job_id: &str, record: &CandidateRecord) -> Result<(), PersistenceError> {
        let rows = StoredValidation::rows(record);
        let now = now_millis();

        for chunk in rows.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await?;
            for row in chunk {
                let notes = row.validation_notes.as_ref().map(serde_json::to_string).transpose()?;
                sqlx::query(
                    r"
                    INSERT INTO validation_results (
                        job_id, entity, entity_index, entity_id, confidence_score,
                        validation_status, validation_notes, geocoding_source,
                        latitude, longitude, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(job_id, entity, entity_index) DO UPDATE SET
                        entity_id = excluded.entity_id,
                        confidence_score = excluded.confidence_score,
                        validation_status = excluded.validation_status,
                        validation_notes = excluded.validation_notes,
                        geocoding_source = excluded.geocoding_source,
                        latitude = excluded.latitude,
                        longitude = excluded.longitude,
                        updated_at = excluded.updated_at
                    ",
                )
                .bind(job_id)
                .bind(&row.entity)
                .bind(i64::try_from(row.entity_index).unwrap_or(i64::MAX))
                .bind(&row.entity_id)
                .bind(row.confidence_score.map(i64::from))
                .bind(&row.validation_status)
                .bind(notes)
                .bind(&row.geocoding_source)
                .bind(row.latitude)
                .bind(row.longitude)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }

        tracing::debug!(job_id = %job_id, rows = rows.len(), "persisted validation fields");
        Ok(())
    }
}

/// Process-local [`ValidationRepository`] for tests, with failure injection.
#[derive(Default)]
pub struct InMemoryValidationRepository {
    records: DashMap<String, CandidateRecord>,
    failures_remaining: AtomicU32,
    attempts: AtomicUsize,
}

impl InMemoryValidationRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `persist` fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<CandidateRecord> {
        self.records.get(job_id).map(|r| r.value().clone())
    }

    /// Number of `persist` calls, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationRepository for InMemoryValidationRepository {
    async fn persist(&self, job_id: &str, record: &CandidateRecord) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PersistenceError::Backend("injected failure".to_string()));
        }

        self.records.insert(job_id.to_string(), record.clone());
        Ok(())
    }
}
