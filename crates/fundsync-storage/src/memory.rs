//! In-memory [`Store`] for tests and fixture runs.
//!
//! Emulates both database views: `page_results` joins results with their page
//! and event, and `crm_current_totals` folds committed deltas onto the master
//! record's initial snapshot. State is not persisted.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fundsync_core::{
    ContactRecord, CrmTotalsRow, DetailRecord, DiscoveredPage, Event, EventId, FundraisingResult,
    MasterRecord, Nullable, Page, PageId, PagePriority, PageResult, Priority, PriorityChange,
    ResultKey, StatsCursor, Totals,
};
use tokio::sync::RwLock;

use crate::{Store, StoreResult};

#[derive(Debug, Default)]
struct State {
    events: BTreeMap<EventId, Event>,
    pages: BTreeMap<PageId, Page>,
    priorities: BTreeMap<PageId, PagePriority>,
    results: BTreeMap<ResultKey, FundraisingResult>,
    contacts: Vec<(DateTime<Utc>, ContactRecord)>,
    masters: BTreeMap<PageId, MasterRecord>,
    details: Vec<DetailRecord>,
    crm_overrides: HashMap<PageId, CrmTotalsRow>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_event(&self, event: Event) {
        self.state.write().await.events.insert(event.event_id, event);
    }

    pub async fn seed_page(
        &self,
        page: DiscoveredPage,
        priority: Priority,
        last_synced_at: Option<DateTime<Utc>>,
    ) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.priorities.insert(
            page.page_id,
            PagePriority {
                page_id: page.page_id,
                priority,
                last_synced_at,
            },
        );
        state.pages.insert(
            page.page_id,
            Page {
                page_id: page.page_id,
                charity_id: page.charity_id,
                event_id: page.event_id,
                short_name: page.short_name,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn seed_result(&self, result: FundraisingResult) {
        self.state.write().await.results.insert(result.key, result);
    }

    pub async fn seed_contact(&self, contact: ContactRecord, modified_at: DateTime<Utc>) {
        self.state.write().await.contacts.push((modified_at, contact));
    }

    pub async fn seed_master(&self, record: MasterRecord) {
        self.state.write().await.masters.insert(record.page_id, record);
    }

    /// Replaces the computed CRM totals for a page, e.g. to simulate a
    /// half-synced CRM row with null columns.
    pub async fn override_crm_totals(&self, row: CrmTotalsRow) {
        self.state.write().await.crm_overrides.insert(row.page_id, row);
    }

    pub async fn result(&self, key: ResultKey) -> Option<FundraisingResult> {
        self.state.read().await.results.get(&key).cloned()
    }

    pub async fn result_count(&self, page_id: PageId) -> usize {
        self.state
            .read()
            .await
            .results
            .keys()
            .filter(|key| key.page_id == page_id)
            .count()
    }

    pub async fn page(&self, page_id: PageId) -> Option<Page> {
        self.state.read().await.pages.get(&page_id).cloned()
    }

    pub async fn event(&self, event_id: EventId) -> Option<Event> {
        self.state.read().await.events.get(&event_id).cloned()
    }

    pub async fn master(&self, page_id: PageId) -> Option<MasterRecord> {
        self.state.read().await.masters.get(&page_id).cloned()
    }

    pub async fn details(&self, page_id: PageId) -> Vec<DetailRecord> {
        self.state
            .read()
            .await
            .details
            .iter()
            .filter(|detail| detail.page_id == page_id)
            .cloned()
            .collect()
    }
}

fn folded_crm_totals(state: &State, page_id: PageId) -> Option<CrmTotalsRow> {
    if let Some(row) = state.crm_overrides.get(&page_id) {
        return Some(row.clone());
    }
    let master = state.masters.get(&page_id)?;
    let current = state
        .details
        .iter()
        .filter(|detail| detail.page_id == page_id)
        .fold(master.initial, |acc, detail| acc.plus(&detail.deltas));
    Some(CrmTotalsRow {
        page_id,
        contact_id: Nullable::Present(master.contact_id.clone()),
        raised_online: Nullable::Present(current.raised_online),
        raised_sms: Nullable::Present(current.raised_sms),
        raised_offline: Nullable::Present(current.raised_offline),
        estimated_gift_aid: Nullable::Present(current.estimated_gift_aid),
        target: Nullable::Present(current.target),
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn select_stale_pages(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<PageId>> {
        let state = self.state.read().await;
        let mut candidates: Vec<&PagePriority> = state
            .priorities
            .values()
            .filter(|p| !p.priority.is_excluded())
            .filter(|p| p.last_synced_at.map_or(true, |at| at < stale_before))
            .collect();
        // Option orders None first, which is what the schedule wants
        candidates.sort_by_key(|p| (p.priority.raw(), p.last_synced_at, p.page_id));
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|p| p.page_id)
            .collect())
    }

    async fn trusted_events(&self) -> StoreResult<Vec<Event>> {
        let state = self.state.read().await;
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|event| event.is_trusted())
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.priority.raw(), event.event_id));
        Ok(events)
    }

    async fn find_event(&self, event_id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.state.read().await.events.get(&event_id).cloned())
    }

    async fn trusted_event_starting_at(
        &self,
        start_date: DateTime<Utc>,
    ) -> StoreResult<Option<EventId>> {
        Ok(self
            .state
            .read()
            .await
            .events
            .values()
            .find(|event| event.is_trusted() && event.start_date == Some(start_date))
            .map(|event| event.event_id))
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.events.contains_key(&event.event_id) {
            return Ok(false);
        }
        state.events.insert(event.event_id, event.clone());
        Ok(true)
    }

    async fn find_page(&self, page_id: PageId) -> StoreResult<Option<Page>> {
        Ok(self.state.read().await.pages.get(&page_id).cloned())
    }

    async fn insert_page(&self, page: &DiscoveredPage) -> StoreResult<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.pages.entry(page.page_id).or_insert_with(|| Page {
            page_id: page.page_id,
            charity_id: page.charity_id,
            event_id: page.event_id,
            short_name: page.short_name.clone(),
            created_at: now,
            updated_at: now,
        });
        state
            .priorities
            .entry(page.page_id)
            .or_insert_with(|| PagePriority {
                page_id: page.page_id,
                priority: Priority::default(),
                last_synced_at: None,
            });
        Ok(())
    }

    async fn update_page_short_name(
        &self,
        page_id: PageId,
        short_name: Option<&str>,
    ) -> StoreResult<()> {
        if let Some(page) = self.state.write().await.pages.get_mut(&page_id) {
            page.short_name = short_name.map(str::to_string);
            page.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn page_priority(&self, page_id: PageId) -> StoreResult<Option<PagePriority>> {
        Ok(self.state.read().await.priorities.get(&page_id).cloned())
    }

    async fn apply_priority(&self, page_id: PageId, change: PriorityChange) -> StoreResult<()> {
        if let Some(entry) = self.state.write().await.priorities.get_mut(&page_id) {
            entry.priority = entry.priority.apply(change);
        }
        Ok(())
    }

    async fn mark_synced(&self, page_id: PageId, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(entry) = self.state.write().await.priorities.get_mut(&page_id) {
            entry.last_synced_at = Some(at);
        }
        Ok(())
    }

    async fn insert_baseline_if_absent(
        &self,
        page_id: PageId,
        totals: &Totals,
    ) -> StoreResult<bool> {
        let key = ResultKey::baseline(page_id);
        let mut state = self.state.write().await;
        if state.results.contains_key(&key) {
            return Ok(false);
        }
        state.results.insert(
            key,
            FundraisingResult {
                key,
                totals: *totals,
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn upsert_daily_result(&self, key: ResultKey, totals: &Totals) -> StoreResult<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let row = state.results.entry(key).or_insert_with(|| FundraisingResult {
            key,
            totals: *totals,
            updated_at: now,
        });
        if row.totals != *totals {
            row.totals = *totals;
            row.updated_at = now;
        }
        Ok(())
    }

    async fn page_results(
        &self,
        page_id: PageId,
        limit: Option<usize>,
    ) -> StoreResult<Vec<PageResult>> {
        let state = self.state.read().await;
        let Some(page) = state.pages.get(&page_id) else {
            return Ok(Vec::new());
        };
        let event_name = state
            .events
            .get(&page.event_id)
            .map(|event| event.name.clone())
            .unwrap_or_default();

        let rows = state
            .results
            .values()
            .rev()
            .filter(|result| result.key.page_id == page_id)
            .take(limit.unwrap_or(usize::MAX))
            .map(|result| PageResult {
                charity_id: page.charity_id,
                event_id: page.event_id,
                event_name: event_name.clone(),
                page_short_name: page.short_name.clone(),
                key: result.key,
                timestamp: result.updated_at,
                totals: result.totals,
            })
            .collect();
        Ok(rows)
    }

    async fn unmatched_contacts(&self) -> StoreResult<Vec<ContactRecord>> {
        let state = self.state.read().await;
        let linked = |id: &str| {
            state.masters.values().any(|m| m.contact_id == id)
                || state.details.iter().any(|d| d.contact_id == id)
        };
        let mut contacts: Vec<&(DateTime<Utc>, ContactRecord)> = state
            .contacts
            .iter()
            .filter(|(_, contact)| !linked(&contact.id))
            .collect();
        contacts.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(contacts.into_iter().map(|(_, c)| c.clone()).collect())
    }

    async fn master_record_exists(&self, page_id: PageId) -> StoreResult<bool> {
        Ok(self.state.read().await.masters.contains_key(&page_id))
    }

    async fn insert_master_record(&self, record: &MasterRecord) -> StoreResult<()> {
        self.state
            .write()
            .await
            .masters
            .entry(record.page_id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn stats_cursors(&self) -> StoreResult<Vec<StatsCursor>> {
        let state = self.state.read().await;
        Ok(state
            .masters
            .keys()
            .map(|&page_id| StatsCursor {
                page_id,
                last_transaction: state
                    .details
                    .iter()
                    .filter(|detail| detail.page_id == page_id)
                    .map(|detail| detail.transaction_date)
                    .max(),
            })
            .collect())
    }

    async fn update_master_page_url(&self, page_id: PageId, url: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.masters.get_mut(&page_id) {
            Some(master) if master.page_url.as_deref() != Some(url) => {
                master.page_url = Some(url.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn crm_current_totals(&self, page_id: PageId) -> StoreResult<Option<CrmTotalsRow>> {
        Ok(folded_crm_totals(&*self.state.read().await, page_id))
    }

    async fn insert_detail_record(&self, record: &DetailRecord) -> StoreResult<()> {
        self.state.write().await.details.push(record.clone());
        Ok(())
    }
}
