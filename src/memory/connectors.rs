//! Connectors: read-only search against the email and calendar backends.
//!
//! The pipeline only depends on the `EmailSearch` / `CalendarSearch` traits.
//! Two implementations ship:
//! - `Http*`: POST `{query, filters}` to a backend speaking the search contract
//! - `InMemory*`: fixture-backed, used by tests and local runs

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ConnectorError;
use crate::memory::types::{
    CalendarFilters, CalendarItem, CalendarSearchResponse, EmailFilters, EmailItem,
    EmailSearchResponse, SourceType, parse_item_timestamp,
};

/// Hard ceiling on `max_results` sent to any backend.
pub const MAX_RESULTS_CEILING: u32 = 25;

#[async_trait]
pub trait EmailSearch: Send + Sync {
    async fn search_email(
        &self,
        query: &str,
        filters: &EmailFilters,
    ) -> Result<EmailSearchResponse, ConnectorError>;
}

#[async_trait]
pub trait CalendarSearch: Send + Sync {
    async fn search_calendar(
        &self,
        query: &str,
        filters: &CalendarFilters,
    ) -> Result<CalendarSearchResponse, ConnectorError>;
}

fn clamp_max_results(n: u32) -> u32 {
    n.clamp(1, MAX_RESULTS_CEILING)
}

// ── HTTP ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SearchRequest<'a, F: Serialize> {
    query: &'a str,
    filters: &'a F,
}

/// POST a search request and decode the JSON body.
async fn post_search<F, R>(
    client: &reqwest::Client,
    url: &str,
    source_type: SourceType,
    query: &str,
    filters: &F,
) -> Result<R, ConnectorError>
where
    F: Serialize,
    R: serde::de::DeserializeOwned,
{
    let resp = client
        .post(url)
        .json(&SearchRequest { query, filters })
        .send()
        .await
        .map_err(|e| ConnectorError::RequestFailed {
            source_type,
            reason: e.to_string(),
        })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ConnectorError::RequestFailed {
            source_type,
            reason: format!("HTTP {status}: {body}"),
        });
    }

    resp.json::<R>()
        .await
        .map_err(|e| ConnectorError::InvalidResponse {
            source_type,
            reason: e.to_string(),
        })
}

/// Email search over HTTP.
pub struct HttpEmailSearch {
    client: reqwest::Client,
    url: String,
}

impl HttpEmailSearch {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EmailSearch for HttpEmailSearch {
    async fn search_email(
        &self,
        query: &str,
        filters: &EmailFilters,
    ) -> Result<EmailSearchResponse, ConnectorError> {
        let filters = EmailFilters {
            max_results: clamp_max_results(filters.max_results),
            ..filters.clone()
        };
        debug!(query, max_results = filters.max_results, "Searching email");
        post_search(&self.client, &self.url, SourceType::Email, query, &filters).await
    }
}

/// Calendar search over HTTP.
pub struct HttpCalendarSearch {
    client: reqwest::Client,
    url: String,
}

impl HttpCalendarSearch {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl CalendarSearch for HttpCalendarSearch {
    async fn search_calendar(
        &self,
        query: &str,
        filters: &CalendarFilters,
    ) -> Result<CalendarSearchResponse, ConnectorError> {
        let filters = CalendarFilters {
            max_results: clamp_max_results(filters.max_results),
            ..filters.clone()
        };
        debug!(query, max_results = filters.max_results, "Searching calendar");
        post_search(&self.client, &self.url, SourceType::Calendar, query, &filters).await
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// True when `raw` parses and falls inside `[from, to]`. Unparsable dates
/// are kept; the ranker scores them down instead.
fn within_range(
    raw: &str,
    from: chrono::DateTime<chrono::Utc>,
    to: chrono::DateTime<chrono::Utc>,
) -> bool {
    parse_item_timestamp(raw).is_none_or(|dt| dt >= from && dt <= to)
}

fn matches_any(haystack: &str, needles: &[String]) -> bool {
    if needles.is_empty() {
        return true;
    }
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|n| haystack.contains(&n.to_lowercase()))
}

/// Fixture-backed email search. Filters by date range, participants and
/// `max_results`; query text is not matched.
#[derive(Default)]
pub struct InMemoryEmailSearch {
    items: Vec<EmailItem>,
    failing: bool,
    requests: RwLock<Vec<(String, EmailFilters)>>,
}

impl InMemoryEmailSearch {
    pub fn new(items: Vec<EmailItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// A backend whose every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// Every `(query, filters)` received, in call order.
    pub async fn requests(&self) -> Vec<(String, EmailFilters)> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl EmailSearch for InMemoryEmailSearch {
    async fn search_email(
        &self,
        query: &str,
        filters: &EmailFilters,
    ) -> Result<EmailSearchResponse, ConnectorError> {
        self.requests
            .write()
            .await
            .push((query.to_string(), filters.clone()));

        if self.failing {
            return Err(ConnectorError::RequestFailed {
                source_type: SourceType::Email,
                reason: "backend unavailable".into(),
            });
        }

        let items = self
            .items
            .iter()
            .filter(|item| within_range(&item.timestamp, filters.date_from, filters.date_to))
            .filter(|item| {
                let people = std::iter::once(&item.from)
                    .chain(item.to.iter())
                    .chain(item.cc.iter())
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" ");
                matches_any(&people, &filters.participants)
            })
            .take(clamp_max_results(filters.max_results) as usize)
            .cloned()
            .collect();

        Ok(EmailSearchResponse { items })
    }
}

/// Fixture-backed calendar search. Filters by date range, attendees and
/// `max_results`; query text is not matched.
#[derive(Default)]
pub struct InMemoryCalendarSearch {
    items: Vec<CalendarItem>,
    failing: bool,
    requests: RwLock<Vec<(String, CalendarFilters)>>,
}

impl InMemoryCalendarSearch {
    pub fn new(items: Vec<CalendarItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub async fn requests(&self) -> Vec<(String, CalendarFilters)> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl CalendarSearch for InMemoryCalendarSearch {
    async fn search_calendar(
        &self,
        query: &str,
        filters: &CalendarFilters,
    ) -> Result<CalendarSearchResponse, ConnectorError> {
        self.requests
            .write()
            .await
            .push((query.to_string(), filters.clone()));

        if self.failing {
            return Err(ConnectorError::RequestFailed {
                source_type: SourceType::Calendar,
                reason: "backend unavailable".into(),
            });
        }

        let items = self
            .items
            .iter()
            .filter(|item| within_range(&item.start_time, filters.date_from, filters.date_to))
            .filter(|item| {
                let people = format!("{} {}", item.organizer, item.attendees.join(" "));
                matches_any(&people, &filters.attendees)
            })
            .take(clamp_max_results(filters.max_results) as usize)
            .cloned()
            .collect();

        Ok(CalendarSearchResponse { items })
    }
}
