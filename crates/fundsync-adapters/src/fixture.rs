//! Fixture-backed platform: serves canned events, page listings and results
//! from memory, optionally loaded from a JSON file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fundsync_core::{CharityId, DiscoveredPage, EventId, PageSnapshot, RemoteEvent};
use fundsync_storage::FetchError;
use serde::Deserialize;

use crate::{EmailAccount, FundraisingPlatform, PageListing, PlatformError};

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureFile {
    #[serde(default)]
    pub events: Vec<FixtureEvent>,
    #[serde(default)]
    pub snapshots: BTreeMap<String, PageSnapshot>,
    #[serde(default)]
    pub accounts: Vec<FixtureAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureEvent {
    #[serde(flatten)]
    pub event: RemoteEvent,
    #[serde(default)]
    pub pages: Vec<DiscoveredPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureAccount {
    pub charity_id: CharityId,
    pub email: String,
    #[serde(default)]
    pub pages: Vec<DiscoveredPage>,
}

#[derive(Debug, Default)]
pub struct StaticPlatform {
    events: HashMap<EventId, RemoteEvent>,
    event_pages: HashMap<EventId, Vec<DiscoveredPage>>,
    snapshots: RwLock<HashMap<String, PageSnapshot>>,
    accounts: HashMap<(CharityId, String), Vec<DiscoveredPage>>,
    failing: HashSet<String>,
    page_size: Option<usize>,
    calls: AtomicUsize,
}

impl StaticPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(file: FixtureFile) -> Result<Self> {
        let mut platform = Self::new();
        for FixtureEvent { event, pages } in file.events {
            platform = platform.with_event_pages(event.event_id, pages).with_event(event);
        }
        for (short_name, snapshot) in file.snapshots {
            platform = platform.with_snapshot(&short_name, snapshot);
        }
        for account in file.accounts {
            let parsed = EmailAccount::parse(&account.email)
                .with_context(|| format!("fixture account email {:?}", account.email))?;
            platform = platform.with_account_pages(account.charity_id, &parsed, account.pages);
        }
        Ok(platform)
    }

    pub fn with_event(mut self, event: RemoteEvent) -> Self {
        self.events.insert(event.event_id, event);
        self
    }

    pub fn with_event_pages(mut self, event_id: EventId, pages: Vec<DiscoveredPage>) -> Self {
        self.event_pages.insert(event_id, pages);
        self
    }

    pub fn with_snapshot(self, short_name: &str, snapshot: PageSnapshot) -> Self {
        self.set_snapshot(short_name, snapshot);
        self
    }

    pub fn with_account_pages(
        mut self,
        charity_id: CharityId,
        account: &EmailAccount,
        pages: Vec<DiscoveredPage>,
    ) -> Self {
        self.accounts
            .insert((charity_id, account.address().to_string()), pages);
        self
    }

    /// Results requests for this short name fail with a 503.
    pub fn failing_page(mut self, short_name: &str) -> Self {
        self.failing.insert(short_name.to_string());
        self
    }

    /// Splits event listings into pages of `size` entries.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    pub fn set_snapshot(&self, short_name: &str, snapshot: PageSnapshot) {
        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.insert(short_name.to_string(), snapshot);
        }
    }

    /// Number of platform requests served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn load_fixture_platform(path: impl AsRef<Path>) -> Result<StaticPlatform> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: FixtureFile =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    StaticPlatform::from_fixture(file)
}

#[async_trait]
impl FundraisingPlatform for StaticPlatform {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn event_pages(
        &self,
        event_id: EventId,
        page_number: u32,
    ) -> Result<PageListing, PlatformError> {
        self.record_call();
        let all = self
            .event_pages
            .get(&event_id)
            .ok_or_else(|| PlatformError::NotFound(format!("event {event_id} pages")))?;

        let size = self.page_size.unwrap_or(all.len().max(1));
        let total_pages = all.len().div_ceil(size).max(1) as u32;
        let start = (page_number.saturating_sub(1) as usize).saturating_mul(size);
        Ok(PageListing {
            pages: all.iter().skip(start).take(size).cloned().collect(),
            page_number,
            total_pages,
        })
    }

    async fn page_results(&self, short_name: &str) -> Result<PageSnapshot, PlatformError> {
        self.record_call();
        if self.failing.contains(short_name) {
            return Err(PlatformError::Fetch {
                context: format!("fetching page {short_name}"),
                source: FetchError::HttpStatus {
                    status: 503,
                    url: format!("fixture://pages/{short_name}"),
                },
            });
        }
        self.snapshots
            .read()
            .map_err(|_| PlatformError::Message("fixture snapshots poisoned".into()))?
            .get(short_name)
            .copied()
            .ok_or_else(|| PlatformError::NotFound(format!("page {short_name}")))
    }

    async fn event(&self, event_id: EventId) -> Result<RemoteEvent, PlatformError> {
        self.record_call();
        self.events
            .get(&event_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("event {event_id}")))
    }

    async fn pages_for_account(
        &self,
        charity_id: CharityId,
        account: &EmailAccount,
    ) -> Result<Vec<DiscoveredPage>, PlatformError> {
        self.record_call();
        Ok(self
            .accounts
            .get(&(charity_id, account.address().to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
