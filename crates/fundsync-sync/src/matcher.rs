//! Links unmatched CRM contacts to mirrored fundraising pages.
//!
//! Strategies run in a fixed order (page id, short name, email) and the first
//! match wins. A confirmed match promotes the page to the hot priority and,
//! once the page has raised something, records the master donation stats row
//! from the page's oldest known result.

use std::collections::HashSet;
use std::fmt;

use fundsync_adapters::{EmailAccount, EmailError, PlatformError};
use fundsync_core::{
    CharityId, ContactRecord, DiscoveredPage, EventId, MasterRecord, PageId, Priority,
    PriorityChange, DEFAULT_EVENT_PRIORITY, HOT_PRIORITY,
};
use fundsync_storage::Store;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CycleError;
use crate::throttle::{CallError, ThrottledPlatform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    PageId,
    ShortName,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineReason {
    MissingPageId,
    NotMirrored(PageId),
    NotImplemented,
    MissingEmail,
    InvalidEmail(EmailError),
    MissingCharity,
    NoCandidates,
    NoQualifyingPage,
    Ambiguous(usize),
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclineReason::MissingPageId => f.write_str("no page id"),
            DeclineReason::NotMirrored(page_id) => write!(f, "page {page_id} not mirrored"),
            DeclineReason::NotImplemented => f.write_str("not implemented"),
            DeclineReason::MissingEmail => f.write_str("no email"),
            DeclineReason::InvalidEmail(err) => write!(f, "{err}"),
            DeclineReason::MissingCharity => f.write_str("no charity id"),
            DeclineReason::NoCandidates => f.write_str("no pages for account"),
            DeclineReason::NoQualifyingPage => f.write_str("no qualifying page"),
            DeclineReason::Ambiguous(count) => write!(f, "{count} qualifying pages"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { strategy: Strategy, page_id: PageId },
    Declined(Vec<(Strategy, DeclineReason)>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub contacts: usize,
    pub skipped: usize,
    pub matched: usize,
    pub masters_created: usize,
    pub events_registered: usize,
}

/// CRM ids arrive as text. Unparsable values are warned about and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactIds {
    pub charity_id: Option<CharityId>,
    pub event_id: Option<EventId>,
    pub page_id: Option<PageId>,
}

impl ContactIds {
    pub fn parse(contact: &ContactRecord, default_charity: Option<CharityId>) -> Self {
        let charity_id = match parse_id(&contact.id, "charity", contact.charity_id.as_deref()) {
            Some(id) => Some(id),
            None if is_blank(contact.charity_id.as_deref()) => default_charity,
            None => None,
        };
        Self {
            charity_id,
            event_id: parse_id(&contact.id, "event", contact.event_id.as_deref()),
            page_id: parse_id(&contact.id, "page", contact.page_id.as_deref()),
        }
    }
}

fn is_blank(raw: Option<&str>) -> bool {
    raw.map_or(true, |raw| raw.trim().is_empty())
}

fn parse_id(contact_id: &str, kind: &'static str, raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Some(id),
        _ => {
            warn!(contact_id, kind, value = raw, "invalid id on CRM contact");
            None
        }
    }
}

pub struct Matcher<'a> {
    store: &'a dyn Store,
    platform: &'a ThrottledPlatform,
    default_charity: Option<CharityId>,
}

impl<'a> Matcher<'a> {
    pub fn new(
        store: &'a dyn Store,
        platform: &'a ThrottledPlatform,
        default_charity: Option<CharityId>,
    ) -> Self {
        Self {
            store,
            platform,
            default_charity,
        }
    }

    pub async fn run(&self) -> Result<MatchStats, CycleError> {
        let mut stats = MatchStats::default();
        for contact in self.store.unmatched_contacts().await? {
            stats.contacts += 1;
            if !contact.is_matchable() {
                debug!(contact_id = %contact.id, "skipping team page or anonymous contact");
                stats.skipped += 1;
                continue;
            }

            match self.match_contact(&contact, &mut stats).await? {
                MatchOutcome::Matched { strategy, page_id } => {
                    info!(contact_id = %contact.id, page_id, ?strategy, "contact matched");
                    stats.matched += 1;
                    if self.confirm_match(&contact.id, page_id).await? {
                        stats.masters_created += 1;
                    }
                }
                MatchOutcome::Declined(reasons) => {
                    let reasons = reasons
                        .iter()
                        .map(|(strategy, reason)| format!("{strategy:?}: {reason}"))
                        .collect::<Vec<_>>()
                        .join("; ");
                    debug!(contact_id = %contact.id, %reasons, "contact not matched");
                }
            }
        }
        Ok(stats)
    }

    pub async fn match_contact(
        &self,
        contact: &ContactRecord,
        stats: &mut MatchStats,
    ) -> Result<MatchOutcome, CycleError> {
        let ids = ContactIds::parse(contact, self.default_charity);
        let mut declined = Vec::new();

        match self.by_page_id(&ids, stats).await? {
            Ok(page_id) => {
                return Ok(MatchOutcome::Matched {
                    strategy: Strategy::PageId,
                    page_id,
                })
            }
            Err(reason) => declined.push((Strategy::PageId, reason)),
        }

        declined.push((Strategy::ShortName, self.by_short_name()));

        match self.by_email(contact, &ids, stats).await? {
            Ok(page_id) => Ok(MatchOutcome::Matched {
                strategy: Strategy::Email,
                page_id,
            }),
            Err(reason) => {
                declined.push((Strategy::Email, reason));
                Ok(MatchOutcome::Declined(declined))
            }
        }
    }

    async fn by_page_id(
        &self,
        ids: &ContactIds,
        stats: &mut MatchStats,
    ) -> Result<Result<PageId, DeclineReason>, CycleError> {
        let Some(page_id) = ids.page_id else {
            return Ok(Err(DeclineReason::MissingPageId));
        };
        if self.store.page_priority(page_id).await?.is_some() {
            return Ok(Ok(page_id));
        }
        // the event's pages may show up on a later platform sync
        if let (Some(charity_id), Some(event_id)) = (ids.charity_id, ids.event_id) {
            if self.ensure_event(event_id, charity_id).await? {
                stats.events_registered += 1;
            }
        }
        Ok(Err(DeclineReason::NotMirrored(page_id)))
    }

    /// Short-name matching has no defined heuristic yet and always declines.
    fn by_short_name(&self) -> DeclineReason {
        DeclineReason::NotImplemented
    }

    async fn by_email(
        &self,
        contact: &ContactRecord,
        ids: &ContactIds,
        stats: &mut MatchStats,
    ) -> Result<Result<PageId, DeclineReason>, CycleError> {
        let Some(raw) = contact.email.as_deref().filter(|e| !e.trim().is_empty()) else {
            return Ok(Err(DeclineReason::MissingEmail));
        };
        let account = match EmailAccount::parse(raw) {
            Ok(account) => account,
            Err(err) => {
                warn!(contact_id = %contact.id, error = %err, "unusable contact email");
                return Ok(Err(DeclineReason::InvalidEmail(err)));
            }
        };
        let Some(charity_id) = ids.charity_id else {
            warn!(contact_id = %contact.id, "no charity id for email search");
            return Ok(Err(DeclineReason::MissingCharity));
        };

        let candidates = self.platform.pages_for_account(charity_id, &account).await?;
        if candidates.is_empty() {
            return Ok(Err(DeclineReason::NoCandidates));
        }

        let trusted: HashSet<EventId> = self
            .store
            .trusted_events()
            .await?
            .into_iter()
            .map(|event| event.event_id)
            .collect();
        let mut qualifying: Vec<&DiscoveredPage> = Vec::new();
        for candidate in &candidates {
            if trusted.contains(&candidate.event_id) && self.has_raised(candidate.page_id).await? {
                qualifying.push(candidate);
            }
        }

        if let [only] = qualifying.as_slice() {
            let confirmed = ContactIds {
                charity_id: Some(only.charity_id).filter(|id| *id > 0),
                event_id: Some(only.event_id).filter(|id| *id > 0),
                page_id: Some(only.page_id),
            };
            return self.by_page_id(&confirmed, stats).await;
        }

        for candidate in &candidates {
            if candidate.event_id > 0 && !trusted.contains(&candidate.event_id) {
                let charity_id = if candidate.charity_id > 0 {
                    candidate.charity_id
                } else {
                    charity_id
                };
                if self.ensure_event(candidate.event_id, charity_id).await? {
                    stats.events_registered += 1;
                }
            }
        }

        if qualifying.is_empty() {
            Ok(Err(DeclineReason::NoQualifyingPage))
        } else {
            Ok(Err(DeclineReason::Ambiguous(qualifying.len())))
        }
    }

    /// Whether the newest result row for the page shows money raised.
    async fn has_raised(&self, page_id: PageId) -> Result<bool, CycleError> {
        Ok(self
            .store
            .page_results(page_id, Some(1))
            .await?
            .first()
            .is_some_and(|row| row.totals.has_positive_total()))
    }

    /// Registers an event the store has never seen. It is trusted straight
    /// away when it starts at the same moment as an event already trusted,
    /// otherwise it is parked as an untrusted placeholder. Returns true when a
    /// row was inserted.
    pub async fn ensure_event(
        &self,
        event_id: EventId,
        charity_id: CharityId,
    ) -> Result<bool, CycleError> {
        if self.store.find_event(event_id).await?.is_some() {
            return Ok(false);
        }

        let remote = match self.platform.event(event_id).await {
            Ok(remote) => remote,
            Err(CallError::Platform(PlatformError::NotFound(what))) => {
                warn!(event_id, %what, "event unknown to the platform; not registered");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        let priority = match remote.start_date {
            Some(start) => match self.store.trusted_event_starting_at(start).await? {
                Some(sibling) => {
                    debug!(event_id, sibling, "event shares a start date with a trusted event");
                    Priority::Active(DEFAULT_EVENT_PRIORITY)
                }
                None => Priority::Excluded,
            },
            None => Priority::Excluded,
        };

        let event = remote.into_event(charity_id, priority);
        let inserted = self.store.insert_event(&event).await?;
        if inserted {
            info!(
                event_id,
                charity_id,
                trusted = event.is_trusted(),
                name = %event.name,
                "event registered"
            );
        }
        Ok(inserted)
    }

    /// Promotes the page (unless excluded) and writes the master record when
    /// the page has raised money and has none yet. Returns true when a master
    /// record was created.
    pub async fn confirm_match(&self, contact_id: &str, page_id: PageId) -> Result<bool, CycleError> {
        self.store
            .apply_priority(page_id, PriorityChange::PromoteTo(HOT_PRIORITY))
            .await?;

        let results = self.store.page_results(page_id, None).await?;
        let (Some(newest), Some(oldest)) = (results.first(), results.last()) else {
            return Ok(false);
        };
        if !newest.totals.has_positive_total() {
            debug!(page_id, "matched page has not raised anything yet");
            return Ok(false);
        }
        if self.store.master_record_exists(page_id).await? {
            return Ok(false);
        }

        let record = MasterRecord::from_initial_result(page_id, contact_id, oldest);
        self.store.insert_master_record(&record).await?;
        info!(page_id, contact_id, "donation stats master record created");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(charity: Option<&str>, event: Option<&str>, page: Option<&str>) -> ContactRecord {
        ContactRecord {
            id: "003A".into(),
            charity_id: charity.map(str::to_string),
            event_id: event.map(str::to_string),
            page_id: page.map(str::to_string),
            page_url: None,
            team_page_url: None,
            email: None,
        }
    }

    #[test]
    fn ids_fall_back_to_default_charity_only_when_blank() {
        let ids = ContactIds::parse(&contact(None, Some("77"), Some(" 555 ")), Some(2050));
        assert_eq!(
            ids,
            ContactIds {
                charity_id: Some(2050),
                event_id: Some(77),
                page_id: Some(555),
            }
        );

        let garbage = ContactIds::parse(&contact(Some("abc"), Some("-4"), Some("x")), Some(2050));
        assert_eq!(garbage, ContactIds::default());
    }

    #[test]
    fn decline_reasons_read_well_in_logs() {
        assert_eq!(DeclineReason::Ambiguous(2).to_string(), "2 qualifying pages");
        assert_eq!(DeclineReason::NotMirrored(9).to_string(), "page 9 not mirrored");
    }
}
