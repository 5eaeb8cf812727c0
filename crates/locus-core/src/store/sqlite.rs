use super::{expiry_millis, now_millis, CapacityLimit, StateStore, StoreError};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, SqlitePool,
};
use std::{str::FromStr, time::Duration};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS state_entries (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        expires_at INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_state_entries_expires ON state_entries(expires_at);
";

/// Opens a `SQLite` pool, creating the database file if needed.
///
/// In-memory databases are private to a connection, so they get a single-connection pool.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the URL is invalid or the database cannot be opened.
pub async fn connect_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool_options = if database_url.contains(":memory:") {
        SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    };

    pool_options.connect_with(options).await
}

/// [`StateStore`] shared across processes through a `SQLite` database.
///
/// Each operation is a single statement, so `SQLite`'s write lock makes it atomic per key.
/// Expired rows are ignored by every query and removed by [`StateStore::purge_expired`].
/// With a [`CapacityLimit`], writes under the limited prefix trim that prefix back to the cap,
/// soonest-expiring rows first.
pub struct SqliteStateStore {
    pool: Pool<Sqlite>,
    limit: Option<CapacityLimit>,
}

impl SqliteStateStore {
    /// Connects and creates the schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection or schema creation fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = connect_pool(database_url).await?;
        Self::from_pool(pool).await
    }

    /// Uses an existing pool, creating the schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if schema creation fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, limit: None })
    }

    #[must_use]
    pub fn with_capacity_limit(mut self, limit: CapacityLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Deletes rows under the limited prefix beyond the cap. Returns how many were removed.
    async fn enforce_limit(&self) -> Result<u64, StoreError> {
        let Some(limit) = &self.limit else {
            return Ok(0);
        };
        let upper = prefix_upper_bound(&limit.prefix);

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM state_entries WHERE key >= ? AND key < ?")
                .bind(&limit.prefix)
                .bind(&upper)
                .fetch_one(&self.pool)
                .await?;
        let excess = count.saturating_sub(i64::try_from(limit.max_entries).unwrap_or(i64::MAX));
        if excess <= 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            DELETE FROM state_entries WHERE key IN (
                SELECT key FROM state_entries
                WHERE key >= ? AND key < ?
                ORDER BY expires_at IS NULL, expires_at
                LIMIT ?
            )
            ",
        )
        .bind(&limit.prefix)
        .bind(&upper)
        .bind(excess)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> String {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(u32::from(last) + 1) {
            chars.push(next);
            return chars.into_iter().collect();
        }
    }
    char::MAX.to_string()
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT value FROM state_entries
            WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
            ",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.try_get::<String, _>("value")).transpose()?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO state_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(expiry_millis(ttl))
        .execute(&self.pool)
        .await?;

        if self.limit.as_ref().is_some_and(|l| l.applies_to(key)) {
            self.enforce_limit().await?;
        }
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError> {
        let now = now_millis();
        let row = sqlx::query(
            r"
            INSERT INTO state_entries (key, value, expires_at) VALUES (?, '1', ?)
            ON CONFLICT(key) DO UPDATE SET
                value = CASE
                    WHEN state_entries.expires_at IS NOT NULL AND state_entries.expires_at <= ?
                        THEN '1'
                    ELSE CAST(CAST(state_entries.value AS INTEGER) + 1 AS TEXT)
                END,
                expires_at = CASE
                    WHEN state_entries.expires_at IS NOT NULL AND state_entries.expires_at <= ?
                        THEN excluded.expires_at
                    ELSE state_entries.expires_at
                END
            RETURNING value
            ",
        )
        .bind(key)
        .bind(expiry_millis(ttl))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let value: String = row.try_get("value")?;
        value.parse().map_err(|_| StoreError::NotAnInteger { key: key.to_string() })
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = now_millis();

        let affected = match (expected, new) {
            (None, Some(value)) => sqlx::query(
                r"
                INSERT INTO state_entries (key, value, expires_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at = excluded.expires_at
                WHERE state_entries.expires_at IS NOT NULL AND state_entries.expires_at <= ?
                ",
            )
            .bind(key)
            .bind(value)
            .bind(expiry_millis(ttl))
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected(),

            (Some(current), Some(value)) => sqlx::query(
                r"
                UPDATE state_entries SET value = ?, expires_at = ?
                WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)
                ",
            )
            .bind(value)
            .bind(expiry_millis(ttl))
            .bind(key)
            .bind(current)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected(),

            (Some(current), None) => sqlx::query(
                r"
                DELETE FROM state_entries
                WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)
                ",
            )
            .bind(key)
            .bind(current)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected(),

            (None, None) => {
                return Ok(self.get(key).await?.is_none());
            }
        };

        Ok(affected > 0)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM state_entries
            WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
            ",
        )
        .bind(key)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM state_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_millis())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() + self.enforce_limit().await?)
    }
}
