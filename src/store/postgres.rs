//! PostgreSQL data provider.
//!
//! One table `tx` keyed by `hash`, with secondary indexes for the finalizer
//! listing workload. Signature and desired-signer arrays are stored as
//! JSONB. All queries are runtime-bound, so the crate builds without a
//! database at hand; the schema bootstrap is idempotent and runs at
//! startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::str::FromStr;
use std::time::Instant;
use url::Url;

use crate::store::{
    DataProvider, HealthReport, StoreError, TxFilter, TxPatch, immutable_fields_match, merge_into,
};
use crate::types::{Encoding, SignaturePair, TransactionRecord, TxHash, TxStatus};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tx (
        hash            TEXT PRIMARY KEY,
        blockchain      TEXT NOT NULL,
        network_name    TEXT NOT NULL,
        payload         TEXT NOT NULL,
        encoding        TEXT NOT NULL,
        tx_uri          TEXT,
        signatures      JSONB NOT NULL DEFAULT '[]'::jsonb,
        desired_signers JSONB NOT NULL DEFAULT '[]'::jsonb,
        submit          BOOLEAN NOT NULL DEFAULT FALSE,
        callback_url    TEXT,
        min_time        BIGINT NOT NULL DEFAULT 0,
        max_time        BIGINT NOT NULL DEFAULT 0,
        status          TEXT NOT NULL DEFAULT 'pending',
        submitted_at    BIGINT,
        retry_count     INTEGER NOT NULL DEFAULT 0,
        last_error      TEXT,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS tx_status_min_time_idx ON tx (status, min_time)",
    "CREATE INDEX IF NOT EXISTS tx_max_time_idx ON tx (max_time) WHERE max_time <> 0",
    "CREATE INDEX IF NOT EXISTS tx_created_at_idx ON tx (created_at)",
];

pub struct PostgresProvider {
    pool: PgPool,
}

impl PostgresProvider {
    /// Connects and bootstraps the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(backend)?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.map_err(backend)?;
        }
        Ok(PostgresProvider { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn row_to_record(row: &PgRow) -> Result<TransactionRecord, StoreError> {
    let hash: String = row.try_get("hash").map_err(backend)?;
    let encoding: String = row.try_get("encoding").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    let signatures: serde_json::Value = row.try_get("signatures").map_err(backend)?;
    let desired_signers: serde_json::Value = row.try_get("desired_signers").map_err(backend)?;
    let callback_url: Option<String> = row.try_get("callback_url").map_err(backend)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(backend)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(backend)?;

    Ok(TransactionRecord {
        hash: TxHash::new(hash).map_err(|e| StoreError::Backend(e.to_string()))?,
        blockchain: row.try_get("blockchain").map_err(backend)?,
        network_name: row.try_get("network_name").map_err(backend)?,
        payload: row.try_get("payload").map_err(backend)?,
        encoding: Encoding::from_str(&encoding).map_err(StoreError::Backend)?,
        tx_uri: row.try_get("tx_uri").map_err(backend)?,
        signatures: serde_json::from_value::<Vec<SignaturePair>>(signatures)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        desired_signers: serde_json::from_value::<Vec<String>>(desired_signers)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        submit: row.try_get("submit").map_err(backend)?,
        callback_url: callback_url
            .map(|raw| Url::parse(&raw))
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        min_time: row.try_get("min_time").map_err(backend)?,
        max_time: row.try_get("max_time").map_err(backend)?,
        status: TxStatus::from_str(&status).map_err(StoreError::Backend)?,
        submitted_at: row.try_get("submitted_at").map_err(backend)?,
        retry_count: row.try_get("retry_count").map_err(backend)?,
        last_error: row.try_get("last_error").map_err(backend)?,
        created_at,
        updated_at,
    })
}

fn json_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(e.to_string()))
}

#[async_trait]
impl DataProvider for PostgresProvider {
    async fn find_transaction(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tx WHERE hash = $1")
            .bind(hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn save_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<TransactionRecord, StoreError> {
        let mut dbtx = self.pool.begin().await.map_err(backend)?;

        let existing = sqlx::query("SELECT * FROM tx WHERE hash = $1 FOR UPDATE")
            .bind(record.hash.as_str())
            .fetch_optional(&mut *dbtx)
            .await
            .map_err(backend)?;

        match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO tx (
                        hash, blockchain, network_name, payload, encoding, tx_uri,
                        signatures, desired_signers, submit, callback_url,
                        min_time, max_time, status
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(record.hash.as_str())
                .bind(&record.blockchain)
                .bind(&record.network_name)
                .bind(&record.payload)
                .bind(record.encoding.as_str())
                .bind(&record.tx_uri)
                .bind(json_value(&record.signatures)?)
                .bind(json_value(&record.desired_signers)?)
                .bind(record.submit)
                .bind(record.callback_url.as_ref().map(|u| u.to_string()))
                .bind(record.min_time)
                .bind(record.max_time)
                .bind(record.status.as_str())
                .execute(&mut *dbtx)
                .await
                .map_err(backend)?;
            }
            Some(row) => {
                let mut stored = row_to_record(&row)?;
                if !immutable_fields_match(&stored, record) {
                    return Err(StoreError::ImmutableConflict(record.hash.to_string()));
                }
                if !stored.status.is_terminal() {
                    merge_into(&mut stored, record);
                    sqlx::query(
                        r#"
                        UPDATE tx SET
                            signatures = $2, desired_signers = $3, submit = $4,
                            callback_url = $5, tx_uri = $6, min_time = $7,
                            max_time = $8, status = $9, updated_at = now()
                        WHERE hash = $1
                        "#,
                    )
                    .bind(stored.hash.as_str())
                    .bind(json_value(&stored.signatures)?)
                    .bind(json_value(&stored.desired_signers)?)
                    .bind(stored.submit)
                    .bind(stored.callback_url.as_ref().map(|u| u.to_string()))
                    .bind(&stored.tx_uri)
                    .bind(stored.min_time)
                    .bind(stored.max_time)
                    .bind(stored.status.as_str())
                    .execute(&mut *dbtx)
                    .await
                    .map_err(backend)?;
                }
            }
        }

        // Re-read so storage-managed timestamps stay authoritative.
        let row = sqlx::query("SELECT * FROM tx WHERE hash = $1")
            .bind(record.hash.as_str())
            .fetch_one(&mut *dbtx)
            .await
            .map_err(backend)?;
        let saved = row_to_record(&row)?;
        dbtx.commit().await.map_err(backend)?;
        Ok(saved)
    }

    async fn update_transaction(
        &self,
        hash: &TxHash,
        patch: TxPatch,
        expected_status: TxStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tx SET
                status = COALESCE($3, status),
                submitted_at = COALESCE($4, submitted_at),
                last_error = COALESCE($5, last_error),
                retry_count = retry_count + $6,
                updated_at = now()
            WHERE hash = $1 AND status = $2
            "#,
        )
        .bind(hash.as_str())
        .bind(expected_status.as_str())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.submitted_at)
        .bind(patch.last_error)
        .bind(if patch.increment_retry { 1i32 } else { 0i32 })
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_transactions(
        &self,
        filter: &TxFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tx
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::bigint IS NULL OR min_time <= $2)
              AND ($3::bigint IS NULL OR max_time = 0 OR max_time > $3)
            ORDER BY created_at ASC
            LIMIT $4
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.due_at)
        .bind(filter.not_expired_at)
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn cleanup_expired(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tx SET status = 'failed', last_error = 'expired', updated_at = now()
            WHERE status IN ('pending', 'ready') AND max_time <> 0 AND max_time <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => HealthReport {
                connected: true,
                latency_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(err) => HealthReport {
                connected: false,
                latency_ms: started.elapsed().as_millis() as u64,
                error: Some(err.to_string()),
            },
        }
    }
}
