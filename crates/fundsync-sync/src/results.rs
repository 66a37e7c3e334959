use chrono::{DateTime, Utc};
use fundsync_core::{DiscoveredPage, PriorityChange, ResultKey, DEFAULT_PAGE_PRIORITY};
use fundsync_storage::Store;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CycleError;
use crate::scheduler::SyncPlan;
use crate::throttle::{CallError, ThrottledPlatform};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultStats {
    pub fetched: usize,
    pub upserted: usize,
    pub baselines_created: usize,
    pub excluded: usize,
}

/// Fetches current totals for due pages and folds each outcome back into the
/// page's priority.
pub struct Synchronizer<'a> {
    store: &'a dyn Store,
    platform: &'a ThrottledPlatform,
}

impl<'a> Synchronizer<'a> {
    pub fn new(store: &'a dyn Store, platform: &'a ThrottledPlatform) -> Self {
        Self { store, platform }
    }

    /// Stops at the first fetch error; writes for earlier pages are kept.
    pub async fn sync(&self, plan: &SyncPlan, now: DateTime<Utc>) -> Result<ResultStats, CycleError> {
        let mut stats = ResultStats::default();
        for page in plan.due_pages() {
            self.sync_page(page, now, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn sync_page(
        &self,
        page: &DiscoveredPage,
        now: DateTime<Utc>,
        stats: &mut ResultStats,
    ) -> Result<(), CycleError> {
        let page_id = page.page_id;
        let Some(short_name) = page.short_name.as_deref() else {
            debug!(page_id, "page has no short name; excluding");
            self.exclude(page_id, now, stats).await?;
            return Ok(());
        };

        let snapshot = match self.platform.page_results(short_name).await {
            Ok(snapshot) => snapshot,
            Err(CallError::Aborted(aborted)) => return Err(aborted.into()),
            Err(CallError::Platform(source)) => {
                warn!(page_id, error = %source, "results fetch failed; demoting page");
                self.store.apply_priority(page_id, PriorityChange::Demote).await?;
                return Err(CycleError::PageFetch { page_id, source });
            }
        };
        stats.fetched += 1;

        if snapshot.cancelled {
            info!(page_id, "page cancelled; excluding");
            self.exclude(page_id, now, stats).await?;
            return Ok(());
        }

        if self
            .store
            .insert_baseline_if_absent(page_id, &snapshot.totals)
            .await?
        {
            stats.baselines_created += 1;
            debug!(page_id, "baseline result recorded");
        }
        self.store
            .upsert_daily_result(ResultKey::for_day(page_id, now.date_naive()), &snapshot.totals)
            .await?;
        stats.upserted += 1;

        self.store.mark_synced(page_id, now).await?;
        self.store
            .apply_priority(page_id, PriorityChange::RecoverTo(DEFAULT_PAGE_PRIORITY))
            .await?;
        Ok(())
    }

    async fn exclude(
        &self,
        page_id: i64,
        now: DateTime<Utc>,
        stats: &mut ResultStats,
    ) -> Result<(), CycleError> {
        self.store.apply_priority(page_id, PriorityChange::Exclude).await?;
        self.store.mark_synced(page_id, now).await?;
        stats.excluded += 1;
        Ok(())
    }
}
