//! Core domain model for fundsync: mirrored fundraising pages, their polling
//! priority, daily result snapshots and the CRM-side donation stats ledger.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "fundsync-core";

pub type PageId = i64;
pub type EventId = i64;
pub type CharityId = i64;

/// Priority given to a page the first time it is discovered. Mirrors the
/// column default in `justgiving.page_priority`.
pub const DEFAULT_PAGE_PRIORITY: i32 = 10;
/// Priority assigned to a page once a CRM contact is matched to it.
pub const HOT_PRIORITY: i32 = 5;
/// Priority given to events registered as trusted by the matcher.
pub const DEFAULT_EVENT_PRIORITY: i32 = 1;
/// Smallest absolute change (in currency units) worth a detail record.
pub const DELTA_TOLERANCE: f64 = 0.01;
pub const DEFAULT_STALENESS_SECS: u64 = 60 * 60;
pub const FUNDRAISING_PAGE_URL_PREFIX: &str = "https://www.justgiving.com/fundraising/";
pub const FUNDRAISING_PORTAL: &str = "Just Giving";

/// Polling priority of a page (or trust level of an event).
///
/// Stored as an integer where `0` means excluded; every other value is an
/// active priority where smaller sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Active(i32),
    Excluded,
}

/// A single priority transition. Each variant keeps `Excluded` sticky except
/// where noted, so an update can never resurrect an excluded page by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityChange {
    /// Force the page out of polling.
    Exclude,
    /// Soft penalty after a failed fetch: one step less urgent.
    Demote,
    /// Confirmed CRM match.
    PromoteTo(i32),
    /// Reset a penalised priority (above the given value) back to it.
    RecoverTo(i32),
}

impl Priority {
    pub fn from_raw(raw: i32) -> Self {
        if raw == 0 {
            Priority::Excluded
        } else {
            Priority::Active(raw)
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Priority::Active(value) => value,
            Priority::Excluded => 0,
        }
    }

    pub fn is_excluded(self) -> bool {
        matches!(self, Priority::Excluded)
    }

    pub fn apply(self, change: PriorityChange) -> Priority {
        match (self, change) {
            (_, PriorityChange::Exclude) => Priority::Excluded,
            (Priority::Excluded, _) => Priority::Excluded,
            // demotion steps over 0 so it never excludes
            (Priority::Active(-1), PriorityChange::Demote) => Priority::Active(1),
            (Priority::Active(value), PriorityChange::Demote) => {
                Priority::Active(value.saturating_add(1))
            }
            (Priority::Active(_), PriorityChange::PromoteTo(target)) => Priority::from_raw(target),
            (Priority::Active(value), PriorityChange::RecoverTo(default)) if value > default => {
                Priority::from_raw(default)
            }
            (active, PriorityChange::RecoverTo(_)) => active,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Active(DEFAULT_PAGE_PRIORITY)
    }
}

/// Explicit presence marker for columns read from the CRM side, which may be
/// null for rows that have not been fully synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Nullable<T> {
    Present(T),
    Absent,
}

impl<T> Nullable<T> {
    pub fn require(self, page_id: PageId, field: &'static str) -> Result<T, IntegrityError> {
        match self {
            Nullable::Present(value) => Ok(value),
            Nullable::Absent => Err(IntegrityError::MissingField { page_id, field }),
        }
    }
}

impl<T> From<Option<T>> for Nullable<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Nullable::Present(value),
            None => Nullable::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("missing {field} in CRM totals for page {page_id}")]
    MissingField { page_id: PageId, field: &'static str },
    #[error("no CRM totals row for page {page_id}")]
    MissingRow { page_id: PageId },
}

/// A mirrored fundraising page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: PageId,
    pub charity_id: CharityId,
    pub event_id: EventId,
    pub short_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn is_serviceable(&self) -> bool {
        self.short_name.is_some()
    }
}

/// A page as listed by the fundraising platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPage {
    pub page_id: PageId,
    pub charity_id: CharityId,
    pub event_id: EventId,
    pub short_name: Option<String>,
}

impl DiscoveredPage {
    /// Pages without a short name cannot have their results fetched.
    pub fn is_serviceable(&self) -> bool {
        self.short_name.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePriority {
    pub page_id: PageId,
    pub priority: Priority,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub charity_id: CharityId,
    pub name: String,
    pub event_type: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub completion_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub priority: Priority,
}

impl Event {
    /// Trusted events are eligible for page discovery and email matching.
    pub fn is_trusted(&self) -> bool {
        !self.priority.is_excluded()
    }
}

/// An event as returned by the fundraising platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub event_id: EventId,
    pub name: String,
    pub event_type: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub completion_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl RemoteEvent {
    pub fn into_event(self, charity_id: CharityId, priority: Priority) -> Event {
        Event {
            event_id: self.event_id,
            charity_id,
            name: self.name,
            event_type: self.event_type,
            location: self.location,
            start_date: self.start_date,
            completion_date: self.completion_date,
            expiry_date: self.expiry_date,
            priority,
        }
    }
}

/// Cumulative (or, for detail records, incremental) fundraising amounts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub target: f64,
    pub raised_online: f64,
    pub raised_offline: f64,
    pub raised_sms: f64,
    pub estimated_gift_aid: f64,
}

impl Totals {
    pub fn total_raised(&self) -> f64 {
        self.raised_online + self.raised_offline + self.raised_sms
    }

    pub fn has_positive_total(&self) -> bool {
        self.total_raised() > 0.0
    }

    pub fn percentage_of_target(&self) -> f64 {
        if self.target > 0.0 {
            self.total_raised() / self.target * 100.0
        } else {
            0.0
        }
    }

    /// Field-wise `self - current`.
    pub fn delta_from(&self, current: &Totals) -> Totals {
        Totals {
            target: self.target - current.target,
            raised_online: self.raised_online - current.raised_online,
            raised_offline: self.raised_offline - current.raised_offline,
            raised_sms: self.raised_sms - current.raised_sms,
            estimated_gift_aid: self.estimated_gift_aid - current.estimated_gift_aid,
        }
    }

    pub fn plus(&self, other: &Totals) -> Totals {
        Totals {
            target: self.target + other.target,
            raised_online: self.raised_online + other.raised_online,
            raised_offline: self.raised_offline + other.raised_offline,
            raised_sms: self.raised_sms + other.raised_sms,
            estimated_gift_aid: self.estimated_gift_aid + other.estimated_gift_aid,
        }
    }

    pub fn exceeds_tolerance(&self, tolerance: f64) -> bool {
        [
            self.target,
            self.raised_online,
            self.raised_offline,
            self.raised_sms,
            self.estimated_gift_aid,
        ]
        .iter()
        .any(|value| value.abs() > tolerance)
    }
}

/// Result of fetching a page's current totals from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub totals: Totals,
    pub cancelled: bool,
}

/// Key of a `fundraising_result` row. `(0, 0, 0)` is the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub page_id: PageId,
    pub year: i32,
    pub month: i32,
    pub day: i32,
}

impl ResultKey {
    pub fn baseline(page_id: PageId) -> Self {
        Self {
            page_id,
            year: 0,
            month: 0,
            day: 0,
        }
    }

    pub fn for_day(page_id: PageId, date: NaiveDate) -> Self {
        Self {
            page_id,
            year: date.year(),
            month: date.month() as i32,
            day: date.day() as i32,
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundraisingResult {
    pub key: ResultKey,
    pub totals: Totals,
    pub updated_at: DateTime<Utc>,
}

/// A result row joined with its page and event, as exposed by the
/// `event_page_fundraising_result` view. Always loaded newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub charity_id: CharityId,
    pub event_id: EventId,
    pub event_name: String,
    pub page_short_name: Option<String>,
    pub key: ResultKey,
    pub timestamp: DateTime<Utc>,
    pub totals: Totals,
}

/// A CRM contact that has not yet been linked to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: String,
    pub charity_id: Option<String>,
    pub event_id: Option<String>,
    pub page_id: Option<String>,
    pub page_url: Option<String>,
    pub team_page_url: Option<String>,
    pub email: Option<String>,
}

impl ContactRecord {
    /// Team page contacts and contacts without an id are not matched.
    pub fn is_matchable(&self) -> bool {
        !self.id.trim().is_empty()
            && self
                .team_page_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
    }
}

/// One-per-page link between a CRM contact and a page, holding the initial
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRecord {
    pub page_id: PageId,
    pub contact_id: String,
    pub initial: Totals,
    pub portal: String,
    pub event_id: EventId,
    pub charity_id: CharityId,
    pub event_name: String,
    pub page_url: Option<String>,
}

impl MasterRecord {
    pub fn from_initial_result(page_id: PageId, contact_id: &str, initial: &PageResult) -> Self {
        Self {
            page_id,
            contact_id: contact_id.to_string(),
            initial: initial.totals,
            portal: FUNDRAISING_PORTAL.to_string(),
            event_id: initial.event_id,
            charity_id: initial.charity_id,
            event_name: initial.event_name.clone(),
            page_url: None,
        }
    }
}

/// Append-only incremental row; `deltas` holds differences, not cumulatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub page_id: PageId,
    pub contact_id: String,
    pub transaction_date: DateTime<Utc>,
    pub deltas: Totals,
}

/// Page with a master record and the transaction date of its newest detail
/// record, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsCursor {
    pub page_id: PageId,
    pub last_transaction: Option<DateTime<Utc>>,
}

/// Raw scan of the CRM `contact_page_fundraising_result` view.
#[derive(Debug, Clone, PartialEq)]
pub struct CrmTotalsRow {
    pub page_id: PageId,
    pub contact_id: Nullable<String>,
    pub raised_online: Nullable<f64>,
    pub raised_sms: Nullable<f64>,
    pub raised_offline: Nullable<f64>,
    pub estimated_gift_aid: Nullable<f64>,
    pub target: Nullable<f64>,
}

/// Validated CRM totals: every mandatory column was present.
#[derive(Debug, Clone, PartialEq)]
pub struct CrmTotals {
    pub contact_id: String,
    pub totals: Totals,
}

impl CrmTotalsRow {
    pub fn validate(self) -> Result<CrmTotals, IntegrityError> {
        let page_id = self.page_id;
        let contact_id = self.contact_id.require(page_id, "contact id")?;
        let totals = Totals {
            raised_online: self.raised_online.require(page_id, "raised online amount")?,
            raised_sms: self.raised_sms.require(page_id, "raised sms amount")?,
            raised_offline: self.raised_offline.require(page_id, "raised offline amount")?,
            estimated_gift_aid: self
                .estimated_gift_aid
                .require(page_id, "estimated gift aid amount")?,
            target: self.target.require(page_id, "target amount")?,
        };
        Ok(CrmTotals { contact_id, totals })
    }
}

pub fn page_url_for(short_name: &str) -> String {
    format!("{FUNDRAISING_PAGE_URL_PREFIX}{short_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_the_only_excluded_priority() {
        assert_eq!(Priority::from_raw(0), Priority::Excluded);
        assert_eq!(Priority::from_raw(3), Priority::Active(3));
        assert_eq!(Priority::from_raw(-1), Priority::Active(-1));
        assert_eq!(Priority::Excluded.raw(), 0);
    }

    #[test]
    fn demoting_minus_one_skips_the_excluded_value() {
        assert_eq!(Priority::Active(-1).apply(PriorityChange::Demote), Priority::Active(1));
        assert_eq!(Priority::Active(-2).apply(PriorityChange::Demote), Priority::Active(-1));
        assert_eq!(
            Priority::Active(i32::MAX).apply(PriorityChange::Demote),
            Priority::Active(i32::MAX)
        );
    }

    #[test]
    fn excluded_priority_is_sticky() {
        for change in [
            PriorityChange::Demote,
            PriorityChange::PromoteTo(HOT_PRIORITY),
            PriorityChange::RecoverTo(DEFAULT_PAGE_PRIORITY),
        ] {
            assert_eq!(Priority::Excluded.apply(change), Priority::Excluded);
        }
    }

    #[test]
    fn demote_and_recover_round_trip_to_default() {
        let penalised = Priority::default()
            .apply(PriorityChange::Demote)
            .apply(PriorityChange::Demote);
        assert_eq!(penalised, Priority::Active(DEFAULT_PAGE_PRIORITY + 2));
        assert_eq!(
            penalised.apply(PriorityChange::RecoverTo(DEFAULT_PAGE_PRIORITY)),
            Priority::default()
        );
        // more urgent than default is left alone
        assert_eq!(
            Priority::Active(3).apply(PriorityChange::RecoverTo(DEFAULT_PAGE_PRIORITY)),
            Priority::Active(3)
        );
    }

    #[test]
    fn exclude_overrides_any_active_priority() {
        assert_eq!(Priority::Active(4).apply(PriorityChange::Exclude), Priority::Excluded);
        assert_eq!(Priority::Active(HOT_PRIORITY).apply(PriorityChange::Exclude), Priority::Excluded);
    }

    #[test]
    fn tolerance_checks_every_field() {
        let tiny = Totals {
            raised_online: 0.005,
            estimated_gift_aid: -0.009,
            ..Totals::default()
        };
        assert!(!tiny.exceeds_tolerance(DELTA_TOLERANCE));

        let gift_aid_only = Totals {
            estimated_gift_aid: -0.5,
            ..Totals::default()
        };
        assert!(gift_aid_only.exceeds_tolerance(DELTA_TOLERANCE));
    }

    #[test]
    fn deltas_are_new_minus_current() {
        let current = Totals {
            target: 500.0,
            raised_online: 100.0,
            raised_offline: 10.0,
            raised_sms: 0.0,
            estimated_gift_aid: 20.0,
        };
        let observed = Totals {
            target: 500.0,
            raised_online: 150.0,
            raised_offline: 5.0,
            raised_sms: 2.0,
            estimated_gift_aid: 30.0,
        };
        let delta = observed.delta_from(&current);
        assert_eq!(delta.raised_online, 50.0);
        assert_eq!(delta.raised_offline, -5.0);
        assert_eq!(delta.target, 0.0);
        assert_eq!(current.plus(&delta), observed);
    }

    #[test]
    fn crm_row_with_absent_column_fails_validation() {
        let row = CrmTotalsRow {
            page_id: 42,
            contact_id: Nullable::Present("003A".to_string()),
            raised_online: Nullable::Present(1.0),
            raised_sms: Nullable::Absent,
            raised_offline: Nullable::Present(0.0),
            estimated_gift_aid: Nullable::Present(0.0),
            target: Nullable::Present(100.0),
        };
        assert_eq!(
            row.validate(),
            Err(IntegrityError::MissingField {
                page_id: 42,
                field: "raised sms amount"
            })
        );
    }

    #[test]
    fn baseline_key_is_all_zero() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert!(ResultKey::baseline(1).is_baseline());
        let daily = ResultKey::for_day(1, date);
        assert!(!daily.is_baseline());
        assert_eq!((daily.year, daily.month, daily.day), (2026, 3, 14));
    }

    #[test]
    fn team_page_contacts_are_not_matchable() {
        let mut contact = ContactRecord {
            id: "003B".into(),
            charity_id: None,
            event_id: None,
            page_id: None,
            page_url: None,
            team_page_url: Some("https://www.justgiving.com/teams/runners".into()),
            email: None,
        };
        assert!(!contact.is_matchable());
        contact.team_page_url = Some("  ".into());
        assert!(contact.is_matchable());
        contact.id = String::new();
        assert!(!contact.is_matchable());
    }
}
