//! Core data model shared across the credential, adapter, and
//! aggregation layers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One external service integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Github,
    Teams,
    Notion,
    GoogleCalendar,
    SystemCalendar,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Github,
        Provider::Teams,
        Provider::Notion,
        Provider::GoogleCalendar,
        Provider::SystemCalendar,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Github => "GitHub",
            Provider::Teams => "Microsoft Teams",
            Provider::Notion => "Notion",
            Provider::GoogleCalendar => "Google Calendar",
            Provider::SystemCalendar => "System Calendar",
        }
    }

    /// Stable identifier used in storage keys and notification ids.
    pub fn key(&self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Teams => "teams",
            Provider::Notion => "notion",
            Provider::GoogleCalendar => "google-calendar",
            Provider::SystemCalendar => "system-calendar",
        }
    }

    /// Calendar-type sources feed the Upcoming section instead of Recent.
    pub fn is_calendar_source(&self) -> bool {
        matches!(self, Provider::GoogleCalendar | Provider::SystemCalendar)
    }

    /// The multi-account provider stores one credential bundle per login.
    pub fn is_multi_account(&self) -> bool {
        matches!(self, Provider::Github)
    }

    /// Default icon hint when an item carries no sub-type of its own.
    pub fn icon_hint(&self) -> &'static str {
        match self {
            Provider::Github => "arrow.triangle.branch",
            Provider::Teams => "bubble.left.and.bubble.right",
            Provider::Notion => "doc.text",
            Provider::GoogleCalendar => "calendar.badge.clock",
            Provider::SystemCalendar => "calendar",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// A single item in the aggregated feed.
///
/// Rebuilt fresh on every poll cycle; only `is_pinned` is stamped in
/// afterwards by the merge step. Equality is `(id, is_pinned)` so the
/// presentation layer's change detection ignores content drift on an
/// unchanged item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub provider: Provider,
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub url: Option<Url>,
    pub is_pinned: bool,
    pub icon: String,
    pub priority: Priority,
}

impl PartialEq for Notification {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.is_pinned == other.is_pinned
    }
}

impl Eq for Notification {}

/// Items of one provider grouped under a common key (GitHub: repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationGroup {
    pub key: String,
    pub notifications: Vec<Notification>,
}

/// The published output of one refresh round. Rebuilt wholesale at the
/// end of each round, never patched piecemeal.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedState {
    pub pinned: Vec<Notification>,
    pub github_groups: Vec<NotificationGroup>,
    pub recent: Vec<Notification>,
    pub upcoming: Vec<Notification>,
    pub is_refreshing: bool,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub is_showing_sample_data: bool,
    pub errors: HashMap<Provider, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_keys_are_stable() {
        assert_eq!(Provider::Github.key(), "github");
        assert_eq!(Provider::GoogleCalendar.key(), "google-calendar");
        assert_eq!(
            serde_json::to_string(&Provider::SystemCalendar).unwrap(),
            "\"system-calendar\""
        );
    }

    #[test]
    fn calendar_sources_are_flagged() {
        assert!(Provider::GoogleCalendar.is_calendar_source());
        assert!(Provider::SystemCalendar.is_calendar_source());
        assert!(!Provider::Github.is_calendar_source());
        assert!(!Provider::Teams.is_calendar_source());
    }

    #[test]
    fn priority_orders_low_to_urgent() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Urgent);
    }

    #[test]
    fn notification_equality_ignores_content_drift() {
        let now = Utc::now();
        let a = Notification {
            id: "gh-thread-1".to_string(),
            provider: Provider::Github,
            title: "old title".to_string(),
            subtitle: "octocat/widgets".to_string(),
            body: String::new(),
            timestamp: now,
            url: None,
            is_pinned: false,
            icon: "arrow.triangle.branch".to_string(),
            priority: Priority::Normal,
        };
        let mut b = a.clone();
        b.title = "new title".to_string();
        assert_eq!(a, b);

        b.is_pinned = true;
        assert_ne!(a, b);
    }
}
