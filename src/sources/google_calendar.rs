//! Google Calendar adapter: upcoming events on the primary calendar
//! over the configured lookahead window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, SecondsFormat, Utc};
use serde::Deserialize;
use url::Url;

use super::{parse_timestamp, priority_for_start, NotificationSource, SourceError};
use crate::http;
use crate::oauth::{OAuthEngine, ProviderConfig};
use crate::settings::SettingsStore;
use crate::types::{Notification, Provider};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const EVENT_LIMIT: usize = 10;

pub struct GoogleCalendarSource {
    oauth: Arc<OAuthEngine>,
    settings: Arc<SettingsStore>,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl GoogleCalendarSource {
    pub fn new(
        oauth: Arc<OAuthEngine>,
        settings: Arc<SettingsStore>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            oauth,
            settings,
            config,
            client: http::client(),
        }
    }
}

#[async_trait]
impl NotificationSource for GoogleCalendarSource {
    fn provider(&self) -> Provider {
        Provider::GoogleCalendar
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SourceError> {
        let token = self.oauth.get_valid_access_token(&self.config).await?;

        let now = Utc::now();
        let lookahead = self.settings.calendar_lookahead_hours();
        let time_min = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max =
            (now + Duration::hours(lookahead)).to_rfc3339_opts(SecondsFormat::Secs, true);

        let max_results = EVENT_LIMIT.to_string();
        let url = Url::parse_with_params(
            &format!("{API_BASE}/calendars/primary/events"),
            &[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", max_results.as_str()),
            ],
        )
        .map_err(|_| SourceError::Api("Invalid Calendar events URL".to_string()))?;

        let events: EventList = http::get_json(&self.client, url, &token, &[]).await?;

        Ok(events
            .items
            .into_iter()
            .filter(|e| e.status.as_deref() != Some("cancelled"))
            .take(EVENT_LIMIT)
            .map(|e| map_event(e, now))
            .collect())
    }
}

fn map_event(event: CalendarEvent, now: DateTime<Utc>) -> Notification {
    let start = event.start_time().unwrap_or(now);
    let meeting_url = event.meeting_url();
    let body = if meeting_url.is_some() {
        "Online Meeting".to_string()
    } else {
        String::new()
    };
    Notification {
        id: format!("gcal-{}", event.id),
        provider: Provider::GoogleCalendar,
        title: event
            .summary
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No Title".to_string()),
        subtitle: event.time_range_string(),
        body,
        timestamp: start,
        url: meeting_url.or_else(|| {
            event.html_link.as_deref().and_then(|u| Url::parse(u).ok())
        }),
        is_pinned: false,
        icon: "calendar.badge.clock".to_string(),
        priority: priority_for_start(start, now),
    }
}

/// Local short time range, or "All Day" for date-only events.
fn format_time_range(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    all_day: bool,
) -> String {
    if all_day {
        return "All Day".to_string();
    }
    let start_str = start.with_timezone(&Local).format("%H:%M").to_string();
    match end {
        Some(end) => format!(
            "{} - {}",
            start_str,
            end.with_timezone(&Local).format("%H:%M")
        ),
        None => start_str,
    }
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    start: Option<EventDateTime>,
    #[serde(default)]
    end: Option<EventDateTime>,
    #[serde(default)]
    html_link: Option<String>,
    #[serde(default)]
    hangout_link: Option<String>,
    #[serde(default)]
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    /// ISO-8601 for timed events.
    #[serde(default)]
    date_time: Option<String>,
    /// `2026-03-01` for all-day events.
    #[serde(default)]
    date: Option<String>,
}

impl EventDateTime {
    fn parsed(&self) -> Option<DateTime<Utc>> {
        self.date_time
            .as_deref()
            .or(self.date.as_deref())
            .and_then(parse_timestamp)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPoint {
    #[serde(default)]
    entry_point_type: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

impl CalendarEvent {
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start.as_ref().and_then(EventDateTime::parsed)
    }

    fn is_all_day(&self) -> bool {
        self.start
            .as_ref()
            .map(|s| s.date_time.is_none() && s.date.is_some())
            .unwrap_or(false)
    }

    fn time_range_string(&self) -> String {
        let Some(start) = self.start_time() else {
            return String::new();
        };
        format_time_range(
            start,
            self.end.as_ref().and_then(EventDateTime::parsed),
            self.is_all_day(),
        )
    }

    /// Video meeting link: the hangout link, else the first video entry
    /// point in the conference data.
    fn meeting_url(&self) -> Option<Url> {
        if let Some(link) = &self.hangout_link {
            if let Ok(url) = Url::parse(link) {
                return Some(url);
            }
        }
        self.conference_data
            .as_ref()?
            .entry_points
            .iter()
            .find(|e| e.entry_point_type.as_deref() == Some("video"))
            .and_then(|e| e.uri.as_deref())
            .and_then(|u| Url::parse(u).ok())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    const TIMED_EVENT: &str = r#"{
        "id": "evt-1",
        "summary": "Team Standup",
        "status": "confirmed",
        "start": {"dateTime": "2026-03-01T09:00:00Z"},
        "end": {"dateTime": "2026-03-01T09:15:00Z"},
        "htmlLink": "https://calendar.google.com/event?eid=abc",
        "conferenceData": {
            "entryPoints": [
                {"entryPointType": "phone", "uri": "tel:+15551234"},
                {"entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij"}
            ]
        }
    }"#;

    #[test]
    fn meeting_url_prefers_video_entry_point() {
        let event: CalendarEvent = serde_json::from_str(TIMED_EVENT).unwrap();
        assert_eq!(
            event.meeting_url().unwrap().as_str(),
            "https://meet.google.com/abc-defg-hij"
        );
    }

    #[test]
    fn hangout_link_wins_over_conference_data() {
        let event: CalendarEvent = serde_json::from_str(
            r#"{
                "id": "evt-2",
                "hangoutLink": "https://meet.google.com/zzz",
                "conferenceData": {
                    "entryPoints": [{"entryPointType": "video", "uri": "https://meet.google.com/aaa"}]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(event.meeting_url().unwrap().as_str(), "https://meet.google.com/zzz");
    }

    #[test]
    fn all_day_events_parse_date_only() {
        let event: CalendarEvent = serde_json::from_str(
            r#"{"id": "evt-3", "summary": "Offsite", "start": {"date": "2026-03-02"}}"#,
        )
        .unwrap();
        assert!(event.is_all_day());
        assert_eq!(event.time_range_string(), "All Day");
        assert!(event.start_time().is_some());
    }

    #[test]
    fn mapping_marks_online_meetings_and_priority() {
        let event: CalendarEvent = serde_json::from_str(TIMED_EVENT).unwrap();
        let now = parse_timestamp("2026-03-01T08:50:00Z").unwrap();
        let n = map_event(event, now);

        assert_eq!(n.id, "gcal-evt-1");
        assert_eq!(n.title, "Team Standup");
        assert_eq!(n.body, "Online Meeting");
        assert_eq!(n.priority, Priority::High); // starts in 10 minutes
        assert_eq!(n.icon, "calendar.badge.clock");
        assert!(n.url.unwrap().as_str().starts_with("https://meet.google.com/"));
    }

    #[test]
    fn untitled_events_get_placeholder_title() {
        let event: CalendarEvent = serde_json::from_str(
            r#"{"id": "evt-4", "start": {"dateTime": "2026-03-01T12:00:00Z"}}"#,
        )
        .unwrap();
        let now = parse_timestamp("2026-03-01T08:00:00Z").unwrap();
        let n = map_event(event, now);
        assert_eq!(n.title, "No Title");
        assert_eq!(n.priority, Priority::Low);
    }

    #[test]
    fn time_range_formats_local_pairs() {
        let start = parse_timestamp("2026-03-01T09:00:00Z").unwrap();
        let end = parse_timestamp("2026-03-01T09:30:00Z").unwrap();

        let expected = format!(
            "{} - {}",
            start.with_timezone(&Local).format("%H:%M"),
            end.with_timezone(&Local).format("%H:%M")
        );
        assert_eq!(format_time_range(start, Some(end), false), expected);
        assert_eq!(format_time_range(start, Some(end), true), "All Day");
    }
}
