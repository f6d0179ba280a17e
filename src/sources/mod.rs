//! Provider adapters.
//!
//! Every source fetches from one external API and maps its payloads
//! into the uniform [`Notification`] shape. Sources never share mutable
//! state; each returns an immutable result (or a typed error) to the
//! aggregation engine.

pub mod github;
pub mod google_calendar;
pub mod notion;
pub mod system_calendar;
pub mod teams;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::oauth::OAuthError;
use crate::types::{Notification, Priority, Provider};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Not authenticated - please connect in Settings")]
    NotAuthenticated,
    #[error("Access denied")]
    AccessDenied,
    #[error("Unauthorized (401) - token may be expired")]
    Unauthorized,
    #[error("HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Api(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<OAuthError> for SourceError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::NotAuthenticated => SourceError::NotAuthenticated,
            other => SourceError::Auth(other.to_string()),
        }
    }
}

/// One notification source, polymorphic over the provider set.
///
/// The concrete adapters are collected into one homogeneous list at
/// startup; the aggregation engine drives them concurrently.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    fn provider(&self) -> Provider;
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SourceError>;
}

/// Parse provider timestamps: ISO-8601 with or without fractional
/// seconds, then a bare local datetime, then a date-only value
/// (all-day events). First match wins.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Same-provider dedup across sub-sources, by notification id and by
/// resolved target URL. First occurrence wins; input order is kept.
pub fn dedup_notifications(items: Vec<Notification>) -> Vec<Notification> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(items.len());

    for item in items {
        if seen_ids.contains(&item.id) {
            continue;
        }
        if let Some(url) = &item.url {
            if seen_urls.contains(url.as_str()) {
                continue;
            }
        }
        seen_ids.insert(item.id.clone());
        if let Some(url) = &item.url {
            seen_urls.insert(url.as_str().to_string());
        }
        result.push(item);
    }

    result
}

/// Priority for time-bound items: ≤15 minutes to start is high,
/// ≤60 minutes normal, anything further out low.
pub fn priority_for_start(start: DateTime<Utc>, now: DateTime<Utc>) -> Priority {
    let minutes = (start - now).num_minutes();
    if minutes <= 15 {
        Priority::High
    } else if minutes <= 60 {
        Priority::Normal
    } else {
        Priority::Low
    }
}

#[cfg(test)]
pub(crate) fn test_notification(id: &str, provider: Provider, url: Option<&str>) -> Notification {
    Notification {
        id: id.to_string(),
        provider,
        title: id.to_string(),
        subtitle: String::new(),
        body: String::new(),
        timestamp: Utc::now(),
        url: url.map(|u| url::Url::parse(u).unwrap()),
        is_pinned: false,
        icon: provider.icon_hint().to_string(),
        priority: Priority::Normal,
    }
}
