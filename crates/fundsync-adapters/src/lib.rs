//! Fundraising platform contract plus the live JustGiving client and a
//! fixture-backed platform for tests and offline runs.

use async_trait::async_trait;
use fundsync_core::{CharityId, DiscoveredPage, EventId, PageSnapshot, RemoteEvent};
use fundsync_storage::{FetchError, RetryDisposition};
use thiserror::Error;

mod account;
mod fixture;
mod justgiving;

pub use account::{EmailAccount, EmailError};
pub use fixture::{load_fixture_platform, FixtureFile, StaticPlatform};
pub use justgiving::{parse_platform_date, JustGivingClient, JustGivingConfig};

pub const CRATE_NAME: &str = "fundsync-adapters";

/// One page of an event's fundraising page listing. `page_number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageListing {
    pub pages: Vec<DiscoveredPage>,
    pub page_number: u32,
    pub total_pages: u32,
}

impl PageListing {
    pub fn has_more(&self) -> bool {
        self.page_number < self.total_pages
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{context}: {source}")]
    Fetch {
        context: String,
        #[source]
        source: FetchError,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Message(String),
}

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Fetch { source, .. } => {
                source.disposition() == RetryDisposition::Retryable
            }
            _ => false,
        }
    }
}

/// Operations the sync pipelines need from the fundraising platform. Each
/// method is exactly one outbound request, so callers can gate every call
/// through the rate limiter.
#[async_trait]
pub trait FundraisingPlatform: Send + Sync {
    fn name(&self) -> &'static str;

    async fn event_pages(
        &self,
        event_id: EventId,
        page_number: u32,
    ) -> Result<PageListing, PlatformError>;

    async fn page_results(&self, short_name: &str) -> Result<PageSnapshot, PlatformError>;

    async fn event(&self, event_id: EventId) -> Result<RemoteEvent, PlatformError>;

    async fn pages_for_account(
        &self,
        charity_id: CharityId,
        account: &EmailAccount,
    ) -> Result<Vec<DiscoveredPage>, PlatformError>;
}

/// Blank short names cannot be fetched; treat them as absent.
pub fn normalize_short_name(raw: Option<String>) -> Option<String> {
    raw.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
