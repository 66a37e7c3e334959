//! Relational store, HTTP fetch utilities and the rate-limited gateway for fundsync.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fundsync_core::{
    ContactRecord, CrmTotalsRow, DetailRecord, DiscoveredPage, Event, EventId, MasterRecord, Page,
    PageId, PagePriority, PageResult, PriorityChange, ResultKey, StatsCursor, Totals,
};
use thiserror::Error;

mod gateway;
mod http;
mod memory;
mod pg;

pub use gateway::{Aborted, Gateway, RateLimit, Shutdown, ShutdownSignal};
pub use http::{classify_status, FetchError, HttpClientConfig, HttpFetcher, RetryDisposition};
pub use memory::MemoryStore;
pub use pg::PgStore;

pub const CRATE_NAME: &str = "fundsync-storage";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Everything the sync and reconciliation pipelines read from or write to the
/// relational store. Each method maps to a single autocommit statement (or a
/// read); no method spans a transaction.
#[async_trait]
pub trait Store: Send + Sync {
    /// Up to `limit` non-excluded pages never synced or last synced before
    /// `stale_before`, most urgent first, then oldest sync first (never-synced
    /// pages lead).
    async fn select_stale_pages(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<PageId>>;

    /// Events with a non-zero priority, ascending by priority.
    async fn trusted_events(&self) -> StoreResult<Vec<Event>>;

    async fn find_event(&self, event_id: EventId) -> StoreResult<Option<Event>>;

    /// Any trusted event starting exactly at `start_date`.
    async fn trusted_event_starting_at(
        &self,
        start_date: DateTime<Utc>,
    ) -> StoreResult<Option<EventId>>;

    /// Returns false when the event already existed.
    async fn insert_event(&self, event: &Event) -> StoreResult<bool>;

    async fn find_page(&self, page_id: PageId) -> StoreResult<Option<Page>>;

    /// Inserts the page and its priority row at the default priority.
    async fn insert_page(&self, page: &DiscoveredPage) -> StoreResult<()>;

    async fn update_page_short_name(
        &self,
        page_id: PageId,
        short_name: Option<&str>,
    ) -> StoreResult<()>;

    async fn page_priority(&self, page_id: PageId) -> StoreResult<Option<PagePriority>>;

    async fn apply_priority(&self, page_id: PageId, change: PriorityChange) -> StoreResult<()>;

    async fn mark_synced(&self, page_id: PageId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Returns true when a new baseline row was written.
    async fn insert_baseline_if_absent(&self, page_id: PageId, totals: &Totals)
        -> StoreResult<bool>;

    /// Creates the dated row or overwrites it in place.
    async fn upsert_daily_result(&self, key: ResultKey, totals: &Totals) -> StoreResult<()>;

    /// Result rows joined with page and event, newest first. The baseline row
    /// sorts last.
    async fn page_results(&self, page_id: PageId, limit: Option<usize>)
        -> StoreResult<Vec<PageResult>>;

    /// CRM contacts with no master record, most recently modified first.
    async fn unmatched_contacts(&self) -> StoreResult<Vec<ContactRecord>>;

    async fn master_record_exists(&self, page_id: PageId) -> StoreResult<bool>;

    async fn insert_master_record(&self, record: &MasterRecord) -> StoreResult<()>;

    async fn stats_cursors(&self) -> StoreResult<Vec<StatsCursor>>;

    /// Updates the master record URL only when it differs. Returns true when a
    /// row changed.
    async fn update_master_page_url(&self, page_id: PageId, url: &str) -> StoreResult<bool>;

    async fn crm_current_totals(&self, page_id: PageId) -> StoreResult<Option<CrmTotalsRow>>;

    async fn insert_detail_record(&self, record: &DetailRecord) -> StoreResult<()>;
}
