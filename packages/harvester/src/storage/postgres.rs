//! PostgreSQL tender store.
//!
//! One `tenders` table plus a partial unique index over non-empty external
//! identifiers; items, files and provenance ride along as JSONB so a record
//! round-trips without join bookkeeping.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashSet;
use tracing::debug;

use super::TenderStore;
use crate::error::StoreError;
use crate::types::{MoneyValue, TenderId, TenderRecord};

pub struct PostgresTenderStore {
    pool: PgPool,
}

impl PostgresTenderStore {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Reuses an existing pool, e.g. the one the CLI already opened.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `tenders` table and its indexes if absent.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenders (
                id UUID PRIMARY KEY,
                external_id TEXT NOT NULL DEFAULT '',
                region_code TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                raw_description TEXT NOT NULL DEFAULT '',
                object_description TEXT NOT NULL DEFAULT '',
                organization_name TEXT NOT NULL DEFAULT '',
                municipality_name TEXT NOT NULL DEFAULT '',
                modality TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                estimated_total_value NUMERIC,
                value_confidential BOOLEAN NOT NULL DEFAULT FALSE,
                publication_date DATE,
                deadline TEXT,
                source_url TEXT NOT NULL DEFAULT '',
                detail_url TEXT NOT NULL DEFAULT '',
                data_source TEXT NOT NULL DEFAULT 'pncp',
                scraped_at TIMESTAMPTZ NOT NULL,
                provenance JSONB NOT NULL DEFAULT '[]',
                items JSONB NOT NULL DEFAULT '[]',
                files JSONB NOT NULL DEFAULT '[]',
                items_count INTEGER NOT NULL DEFAULT 0,
                downloads_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Empty identifiers stay outside the uniqueness guarantee.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_tenders_external_id \
             ON tenders (external_id) WHERE external_id <> ''",
        )
        .execute(&self.pool)
        .await
        .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tenders_region_code ON tenders (region_code)")
            .execute(&self.pool)
            .await
            .ok();

        debug!("tender schema ensured");
        Ok(())
    }
}

/// Splits the tri-state money into its two columns.
fn money_columns(value: &Option<MoneyValue>) -> (Option<Decimal>, bool) {
    match value {
        Some(MoneyValue::Amount(amount)) => (Some(*amount), false),
        Some(MoneyValue::Confidential) => (None, true),
        None => (None, false),
    }
}

#[async_trait]
impl TenderStore for PostgresTenderStore {
    async fn existing_external_ids(&self) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT external_id FROM tenders WHERE external_id <> ''")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(external_id,)| external_id).collect())
    }

    async fn insert(&self, record: &TenderRecord) -> Result<(), StoreError> {
        let (estimated_total_value, value_confidential) =
            money_columns(&record.estimated_total_value);
        sqlx::query(
            r#"
            INSERT INTO tenders (
                id, external_id, region_code, title, raw_description,
                object_description, organization_name, municipality_name,
                modality, status, estimated_total_value, value_confidential,
                publication_date, deadline, source_url, detail_url,
                data_source, scraped_at, provenance, items, files,
                items_count, downloads_count
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
            )
            "#,
        )
        .bind(TenderId::new().0)
        .bind(&record.external_id)
        .bind(record.region_code.as_str())
        .bind(&record.title)
        .bind(&record.raw_description)
        .bind(&record.object_description)
        .bind(&record.organization_name)
        .bind(&record.municipality_name)
        .bind(&record.modality)
        .bind(&record.status)
        .bind(estimated_total_value)
        .bind(value_confidential)
        .bind(record.publication_date)
        .bind(&record.deadline)
        .bind(&record.source_url)
        .bind(&record.detail_url)
        .bind(&record.data_source)
        .bind(record.scraped_at)
        .bind(serde_json::to_value(&record.provenance)?)
        .bind(serde_json::to_value(&record.items)?)
        .bind(serde_json::to_value(&record.files)?)
        .bind(record.items_count() as i32)
        .bind(record.downloads_count() as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_by_external_id(&self, record: &TenderRecord) -> Result<(), StoreError> {
        let (estimated_total_value, value_confidential) =
            money_columns(&record.estimated_total_value);
        let result = sqlx::query(
            r#"
            UPDATE tenders SET
                region_code = $2,
                title = $3,
                raw_description = $4,
                object_description = $5,
                organization_name = $6,
                municipality_name = $7,
                modality = $8,
                status = $9,
                estimated_total_value = $10,
                value_confidential = $11,
                publication_date = $12,
                deadline = $13,
                source_url = $14,
                detail_url = $15,
                data_source = $16,
                scraped_at = $17,
                provenance = $18,
                items = $19,
                files = $20,
                items_count = $21,
                downloads_count = $22,
                updated_at = NOW()
            WHERE external_id = $1
            "#,
        )
        .bind(&record.external_id)
        .bind(record.region_code.as_str())
        .bind(&record.title)
        .bind(&record.raw_description)
        .bind(&record.object_description)
        .bind(&record.organization_name)
        .bind(&record.municipality_name)
        .bind(&record.modality)
        .bind(&record.status)
        .bind(estimated_total_value)
        .bind(value_confidential)
        .bind(record.publication_date)
        .bind(&record.deadline)
        .bind(&record.source_url)
        .bind(&record.detail_url)
        .bind(&record.data_source)
        .bind(record.scraped_at)
        .bind(serde_json::to_value(&record.provenance)?)
        .bind(serde_json::to_value(&record.items)?)
        .bind(serde_json::to_value(&record.files)?)
        .bind(record.items_count() as i32)
        .bind(record.downloads_count() as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_money_columns_tri_state() {
        let amount = Decimal::from_str("1234.56").unwrap();
        assert_eq!(
            money_columns(&Some(MoneyValue::Amount(amount))),
            (Some(amount), false)
        );
        assert_eq!(money_columns(&Some(MoneyValue::Confidential)), (None, true));
        assert_eq!(money_columns(&None), (None, false));
    }
}
