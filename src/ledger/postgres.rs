//! PostgreSQL transaction store

use super::store::TransactionStore;
use crate::config::DatabaseConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeStatus, BridgeTransaction, StatusChange};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

const COLUMNS: &str = r#"
    id, source_chain, destination_chain, token, source_amount, destination_amount,
    bridge_fee, estimated_yield, actual_yield, sender, recipient, payment_id, status,
    destination_tx_hash, failure_reason, retry_count, version, created_at, updated_at,
    source_confirmed_at, destination_confirmed_at, completed_at, history
"#;

/// Transaction store backed by PostgreSQL
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store
    pub async fn new(config: &DatabaseConfig) -> BridgeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> BridgeResult<()> {
        // Amounts are u128 and stored as decimal text
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_transactions (
                id TEXT PRIMARY KEY,
                source_chain BIGINT NOT NULL,
                destination_chain BIGINT NOT NULL,
                token VARCHAR(32) NOT NULL,
                source_amount TEXT NOT NULL,
                destination_amount TEXT NOT NULL,
                bridge_fee TEXT NOT NULL,
                estimated_yield TEXT NOT NULL,
                actual_yield TEXT,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                payment_id TEXT,
                status VARCHAR(20) NOT NULL,
                destination_tx_hash TEXT,
                failure_reason TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                version BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                source_confirmed_at TIMESTAMPTZ,
                destination_confirmed_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                history JSONB NOT NULL DEFAULT '[]'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "ALTER TABLE bridge_transactions ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 0",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_bridge_transactions_created
            ON bridge_transactions (created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_bridge_transactions_status
            ON bridge_transactions (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn insert(&self, tx: &BridgeTransaction) -> BridgeResult<()> {
        let history = serde_json::to_value(&tx.history)?;

        sqlx::query(
            r#"
            INSERT INTO bridge_transactions (
                id, source_chain, destination_chain, token, source_amount, destination_amount,
                bridge_fee, estimated_yield, actual_yield, sender, recipient, payment_id, status,
                destination_tx_hash, failure_reason, retry_count, version, created_at, updated_at,
                source_confirmed_at, destination_confirmed_at, completed_at, history
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(&tx.id)
        .bind(tx.source_chain as i64)
        .bind(tx.destination_chain as i64)
        .bind(&tx.token)
        .bind(tx.source_amount.to_string())
        .bind(tx.destination_amount.to_string())
        .bind(tx.bridge_fee.to_string())
        .bind(tx.estimated_yield.to_string())
        .bind(tx.actual_yield.map(|y| y.to_string()))
        .bind(&tx.sender)
        .bind(&tx.recipient)
        .bind(&tx.payment_id)
        .bind(tx.status.as_str())
        .bind(&tx.destination_tx_hash)
        .bind(&tx.failure_reason)
        .bind(tx.retry_count as i32)
        .bind(tx.version as i64)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.source_confirmed_at)
        .bind(tx.destination_confirmed_at)
        .bind(tx.completed_at)
        .bind(history)
        .execute(&self.pool)
        .await?;

        debug!(tx_id = %tx.id, "Stored bridge transaction");
        Ok(())
    }

    async fn get(&self, tx_id: &str) -> BridgeResult<Option<BridgeTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bridge_transactions WHERE id = $1",
            COLUMNS
        ))
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode_row(&r)).transpose()
    }

    async fn compare_and_set(
        &self,
        expected: BridgeStatus,
        updated: &BridgeTransaction,
    ) -> BridgeResult<bool> {
        let history = serde_json::to_value(&updated.history)?;

        let result = sqlx::query(
            r#"
            UPDATE bridge_transactions
            SET status = $3,
                actual_yield = $4,
                destination_tx_hash = $5,
                failure_reason = $6,
                retry_count = $7,
                updated_at = $8,
                source_confirmed_at = $9,
                destination_confirmed_at = $10,
                completed_at = $11,
                history = $12,
                version = $13
            WHERE id = $1 AND status = $2 AND version = $13 - 1
            "#,
        )
        .bind(&updated.id)
        .bind(expected.as_str())
        .bind(updated.status.as_str())
        .bind(updated.actual_yield.map(|y| y.to_string()))
        .bind(&updated.destination_tx_hash)
        .bind(&updated.failure_reason)
        .bind(updated.retry_count as i32)
        .bind(updated.updated_at)
        .bind(updated.source_confirmed_at)
        .bind(updated.destination_confirmed_at)
        .bind(updated.completed_at)
        .bind(history)
        .bind(updated.version as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> BridgeResult<Vec<BridgeTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bridge_transactions WHERE created_at >= $1 ORDER BY created_at",
            COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn health_check(&self) -> BridgeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn decode_amount(row: &PgRow, column: &str) -> BridgeResult<u128> {
    let text: String = row.try_get(column)?;
    text.parse()
        .map_err(|e| BridgeError::Store(format!("Invalid {} '{}': {}", column, text, e)))
}

fn decode_row(row: &PgRow) -> BridgeResult<BridgeTransaction> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<BridgeStatus>().map_err(BridgeError::Store)?;

    let actual_yield: Option<String> = row.try_get("actual_yield")?;
    let actual_yield = actual_yield
        .map(|y| y.parse::<u128>())
        .transpose()
        .map_err(|e| BridgeError::Store(format!("Invalid actual_yield: {}", e)))?;

    let history: serde_json::Value = row.try_get("history")?;
    let history: Vec<StatusChange> = serde_json::from_value(history)?;

    Ok(BridgeTransaction {
        id: row.try_get("id")?,
        source_chain: row.try_get::<i64, _>("source_chain")? as u64,
        destination_chain: row.try_get::<i64, _>("destination_chain")? as u64,
        token: row.try_get("token")?,
        source_amount: decode_amount(row, "source_amount")?,
        destination_amount: decode_amount(row, "destination_amount")?,
        bridge_fee: decode_amount(row, "bridge_fee")?,
        estimated_yield: decode_amount(row, "estimated_yield")?,
        actual_yield,
        sender: row.try_get("sender")?,
        recipient: row.try_get("recipient")?,
        payment_id: row.try_get("payment_id")?,
        status,
        destination_tx_hash: row.try_get("destination_tx_hash")?,
        failure_reason: row.try_get("failure_reason")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        version: row.try_get::<i64, _>("version")? as u64,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        source_confirmed_at: row.try_get("source_confirmed_at")?,
        destination_confirmed_at: row.try_get("destination_confirmed_at")?,
        completed_at: row.try_get("completed_at")?,
        history,
    })
}
