//! Picks the pages due for a results refresh and mirrors the page listings of
//! every trusted event.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use fundsync_core::{DiscoveredPage, PageId};
use fundsync_storage::Store;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CycleError;
use crate::throttle::ThrottledPlatform;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Stale pages selected for this cycle, most urgent first.
    pub batch: Vec<PageId>,
    /// Pages listed by trusted events this cycle, in discovery order.
    pub discovered: Vec<DiscoveredPage>,
}

impl SyncPlan {
    /// Discovered pages that are also in the batch, each page once.
    pub fn due_pages(&self) -> Vec<&DiscoveredPage> {
        let batch: HashSet<PageId> = self.batch.iter().copied().collect();
        let mut seen = HashSet::new();
        self.discovered
            .iter()
            .filter(|page| batch.contains(&page.page_id) && seen.insert(page.page_id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub events: usize,
    pub pages_listed: usize,
    pub pages_inserted: usize,
    pub short_names_updated: usize,
    pub unserviceable: usize,
}

pub struct Scheduler<'a> {
    store: &'a dyn Store,
    platform: &'a ThrottledPlatform,
}

impl<'a> Scheduler<'a> {
    pub fn new(store: &'a dyn Store, platform: &'a ThrottledPlatform) -> Self {
        Self { store, platform }
    }

    pub async fn plan(
        &self,
        batch_size: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<(SyncPlan, DiscoveryStats), CycleError> {
        let batch = self.store.select_stale_pages(batch_size, stale_before).await?;
        debug!(selected = batch.len(), "stale pages selected");

        let mut stats = DiscoveryStats::default();
        let mut discovered = Vec::new();
        for event in self.store.trusted_events().await? {
            stats.events += 1;
            let pages = self.platform.pages_for_event(event.event_id).await?;
            debug!(event_id = event.event_id, pages = pages.len(), "event pages listed");
            for page in pages {
                self.mirror(&page, &mut stats).await?;
                discovered.push(page);
            }
        }

        Ok((SyncPlan { batch, discovered }, stats))
    }

    async fn mirror(&self, page: &DiscoveredPage, stats: &mut DiscoveryStats) -> Result<(), CycleError> {
        stats.pages_listed += 1;
        if !page.is_serviceable() {
            stats.unserviceable += 1;
        }

        match self.store.find_page(page.page_id).await? {
            None => {
                self.store.insert_page(page).await?;
                stats.pages_inserted += 1;
                info!(
                    page_id = page.page_id,
                    event_id = page.event_id,
                    short_name = page.short_name.as_deref().unwrap_or(""),
                    "page discovered"
                );
            }
            Some(existing) if existing.short_name != page.short_name => {
                self.store
                    .update_page_short_name(page.page_id, page.short_name.as_deref())
                    .await?;
                stats.short_names_updated += 1;
                debug!(
                    page_id = page.page_id,
                    from = existing.short_name.as_deref().unwrap_or(""),
                    to = page.short_name.as_deref().unwrap_or(""),
                    "page short name changed"
                );
            }
            Some(_) => {}
        }
        Ok(())
    }
}
