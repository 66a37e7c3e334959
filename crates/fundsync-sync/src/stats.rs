//! Incremental donation stats: turns the mirrored cumulative results into
//! append-only CRM detail records holding only the change since the last
//! committed value.

use fundsync_core::{
    page_url_for, DetailRecord, IntegrityError, PageResult, StatsCursor, DELTA_TOLERANCE,
};
use fundsync_storage::Store;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CycleError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub pages: usize,
    pub urls_updated: usize,
    pub rows_considered: usize,
    pub details_created: usize,
}

pub struct DiffEngine<'a> {
    store: &'a dyn Store,
}

impl<'a> DiffEngine<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<DiffStats, CycleError> {
        let mut stats = DiffStats::default();
        for cursor in self.store.stats_cursors().await? {
            stats.pages += 1;
            self.reconcile_page(&cursor, &mut stats).await?;
        }
        Ok(stats)
    }

    pub async fn reconcile_page(
        &self,
        cursor: &StatsCursor,
        stats: &mut DiffStats,
    ) -> Result<(), CycleError> {
        let page_id = cursor.page_id;
        let rows = self.store.page_results(page_id, None).await?;
        let Some(newest) = rows.first() else {
            debug!(page_id, "no results mirrored for page");
            return Ok(());
        };

        if let Some(short_name) = newest.page_short_name.as_deref() {
            if self
                .store
                .update_master_page_url(page_id, &page_url_for(short_name))
                .await?
            {
                stats.urls_updated += 1;
                debug!(page_id, short_name, "master record page url updated");
            }
        }

        for row in pending_rows(&rows, cursor) {
            stats.rows_considered += 1;
            let current = self
                .store
                .crm_current_totals(page_id)
                .await?
                .ok_or(IntegrityError::MissingRow { page_id })?
                .validate()?;

            let deltas = row.totals.delta_from(&current.totals);
            if !deltas.exceeds_tolerance(DELTA_TOLERANCE) {
                continue;
            }

            let record = DetailRecord {
                page_id,
                contact_id: current.contact_id,
                transaction_date: row.timestamp,
                deltas,
            };
            self.store.insert_detail_record(&record).await?;
            stats.details_created += 1;
            info!(
                page_id,
                year = row.key.year,
                month = row.key.month,
                day = row.key.day,
                online = deltas.raised_online,
                offline = deltas.raised_offline,
                sms = deltas.raised_sms,
                gift_aid = deltas.estimated_gift_aid,
                target = deltas.target,
                "donation stats detail record created"
            );
        }
        Ok(())
    }
}

/// Dated rows newer than the cursor, oldest first. The baseline row is
/// already embodied in the master record and is never diffed.
fn pending_rows<'r>(
    rows: &'r [PageResult],
    cursor: &'r StatsCursor,
) -> impl Iterator<Item = &'r PageResult> + 'r {
    rows.iter()
        .rev()
        .filter(|row| !row.key.is_baseline())
        .filter(move |row| cursor.last_transaction.map_or(true, |last| row.timestamp > last))
}
