//! Persistence for harvested tenders.
//!
//! The reconciler only ever talks to the [`TenderStore`] trait; `postgres`
//! holds the production backend.

pub mod postgres;

pub use postgres::PostgresTenderStore;

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::StoreError;
use crate::types::TenderRecord;

#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Every non-empty external identifier currently persisted, for
    /// partitioning a batch into inserts and updates.
    async fn existing_external_ids(&self) -> Result<HashSet<String>, StoreError>;

    async fn insert(&self, record: &TenderRecord) -> Result<(), StoreError>;

    /// Full overwrite of the row carrying the record's external identifier.
    async fn update_by_external_id(&self, record: &TenderRecord) -> Result<(), StoreError>;
}
