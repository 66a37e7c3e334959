//! JustGiving REST v1 client.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use fundsync_core::{CharityId, DiscoveredPage, EventId, PageSnapshot, RemoteEvent, Totals};
use fundsync_storage::{FetchError, HttpFetcher};
use reqwest::Url;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::{normalize_short_name, EmailAccount, FundraisingPlatform, PageListing, PlatformError};

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JustGivingConfig {
    pub base_url: String,
    pub app_id: String,
}

impl Default for JustGivingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.justgiving.com".to_string(),
            app_id: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JustGivingClient {
    http: HttpFetcher,
    base_url: Url,
    app_id: String,
}

impl JustGivingClient {
    pub fn new(http: HttpFetcher, config: JustGivingConfig) -> Result<Self, PlatformError> {
        let base_url = Url::parse(&config.base_url).map_err(|err| {
            PlatformError::Message(format!("invalid base url {}: {err}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PlatformError::Message(format!(
                "base url {} cannot carry a path",
                config.base_url
            )));
        }
        Ok(Self {
            http,
            base_url,
            app_id: config.app_id,
        })
    }

    /// Builds `{base}/{appId}/v1/{segments...}` with every segment
    /// percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.app_id).push("v1").extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, what: String) -> Result<T, PlatformError> {
        debug!(url = %url, "platform request");
        self.http
            .get_json(url.as_str())
            .await
            .map_err(|source| classify(what, source))
    }
}

fn classify(what: String, source: FetchError) -> PlatformError {
    if source.is_not_found() {
        PlatformError::NotFound(what)
    } else {
        PlatformError::Fetch {
            context: format!("fetching {what}"),
            source,
        }
    }
}

#[async_trait]
impl FundraisingPlatform for JustGivingClient {
    fn name(&self) -> &'static str {
        "justgiving"
    }

    async fn event_pages(
        &self,
        event_id: EventId,
        page_number: u32,
    ) -> Result<PageListing, PlatformError> {
        let mut url = self.endpoint(&["event", &event_id.to_string(), "pages"]);
        url.query_pairs_mut()
            .append_pair("page", &page_number.to_string())
            .append_pair("pageSize", &PAGE_SIZE.to_string());

        let body: EventPagesBody = self.get(url, format!("event {event_id} pages")).await?;
        Ok(body.into_listing(event_id, page_number))
    }

    async fn page_results(&self, short_name: &str) -> Result<PageSnapshot, PlatformError> {
        let url = self.endpoint(&["fundraising", "pages", short_name]);
        let body: PageDetailsBody = self.get(url, format!("page {short_name}")).await?;
        Ok(body.into_snapshot())
    }

    async fn event(&self, event_id: EventId) -> Result<RemoteEvent, PlatformError> {
        let url = self.endpoint(&["event", &event_id.to_string()]);
        let body: EventBody = self.get(url, format!("event {event_id}")).await?;
        Ok(body.into_remote(event_id))
    }

    async fn pages_for_account(
        &self,
        charity_id: CharityId,
        account: &EmailAccount,
    ) -> Result<Vec<DiscoveredPage>, PlatformError> {
        let mut url = self.endpoint(&["account", account.address(), "pages"]);
        url.query_pairs_mut()
            .append_pair("charityId", &charity_id.to_string());

        let body: Vec<PageSummary> = self
            .get(url, format!("pages for account {account}"))
            .await?;
        Ok(body
            .into_iter()
            .filter_map(|page| page.into_discovered(Some(charity_id), None))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPagesBody {
    #[serde(default)]
    fundraising_pages: Vec<PageSummary>,
    #[serde(default)]
    total_pages: Option<u32>,
}

impl EventPagesBody {
    fn into_listing(self, event_id: EventId, page_number: u32) -> PageListing {
        PageListing {
            pages: self
                .fundraising_pages
                .into_iter()
                .filter_map(|page| page.into_discovered(None, Some(event_id)))
                .collect(),
            page_number,
            total_pages: self.total_pages.unwrap_or(page_number).max(page_number),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageSummary {
    #[serde(default)]
    page_id: Option<serde_json::Value>,
    #[serde(default)]
    page_short_name: Option<String>,
    #[serde(default)]
    charity_id: Option<i64>,
    #[serde(default)]
    event_id: Option<i64>,
}

impl PageSummary {
    fn into_discovered(
        self,
        charity_fallback: Option<CharityId>,
        event_fallback: Option<EventId>,
    ) -> Option<DiscoveredPage> {
        let page_id = match self.page_id? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(raw) => raw.trim().parse::<i64>().ok(),
            _ => None,
        }
        .filter(|id| *id > 0);
        let Some(page_id) = page_id else {
            warn!(
                short_name = self.page_short_name.as_deref().unwrap_or(""),
                "skipping listed page without a numeric id"
            );
            return None;
        };
        Some(DiscoveredPage {
            page_id,
            charity_id: self.charity_id.or(charity_fallback).unwrap_or_default(),
            event_id: self.event_id.or(event_fallback).unwrap_or_default(),
            short_name: normalize_short_name(self.page_short_name),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageDetailsBody {
    #[serde(default, alias = "fundraisingTarget", deserialize_with = "amount")]
    target_amount: f64,
    #[serde(default, deserialize_with = "amount")]
    total_raised_online: f64,
    #[serde(default, deserialize_with = "amount")]
    total_raised_offline: f64,
    #[serde(default, alias = "totalRaisedSMS", deserialize_with = "amount")]
    total_raised_sms: f64,
    #[serde(default, deserialize_with = "amount")]
    total_estimated_gift_aid: f64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    page_cancelled: Option<bool>,
}

impl PageDetailsBody {
    fn into_snapshot(self) -> PageSnapshot {
        let cancelled = self.page_cancelled.unwrap_or(false)
            || self
                .status
                .as_deref()
                .is_some_and(|status| status.trim().eq_ignore_ascii_case("cancelled"));
        PageSnapshot {
            totals: Totals {
                target: self.target_amount,
                raised_online: self.total_raised_online,
                raised_offline: self.total_raised_offline,
                raised_sms: self.total_raised_sms,
                estimated_gift_aid: self.total_estimated_gift_aid,
            },
            cancelled,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventBody {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    completion_date: Option<String>,
    #[serde(default)]
    expiry_date: Option<String>,
}

impl EventBody {
    fn into_remote(self, requested: EventId) -> RemoteEvent {
        let date = |raw: Option<String>| raw.as_deref().and_then(parse_platform_date);
        RemoteEvent {
            event_id: self.id.unwrap_or(requested),
            name: self.name.unwrap_or_default(),
            event_type: self.event_type,
            location: self.location,
            start_date: date(self.start_date),
            completion_date: date(self.completion_date),
            expiry_date: date(self.expiry_date),
        }
    }
}

/// Amounts arrive as numbers, numeric strings, empty strings or null.
fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(Raw::Number(value)) => Ok(value),
        Some(Raw::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                Ok(0.0)
            } else {
                text.parse().map_err(D::Error::custom)
            }
        }
    }
}

/// Parses `/Date(1401401400000+0100)/` (epoch millis; the offset only affects
/// display), RFC 3339, or a naive ISO timestamp taken as UTC.
pub fn parse_platform_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(inner) = raw
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        let digits_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(inner.len(), |(idx, _)| idx);
        let millis: i64 = inner[..digits_end].parse().ok()?;
        return DateTime::from_timestamp_millis(millis);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
