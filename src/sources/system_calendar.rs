//! System calendar adapter.
//!
//! OS calendar access stays outside this crate behind
//! [`SystemCalendarAccess`]; the adapter owns the permission protocol
//! (never re-prompt after a denial) and the mapping into notifications.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use url::Url;

use super::{priority_for_start, NotificationSource, SourceError};
use crate::settings::SettingsStore;
use crate::types::{Notification, Provider};

const EVENT_LIMIT: usize = 10;
const MEETING_LINK_HOSTS: [&str; 3] = ["zoom.us", "meet.google.com", "teams.microsoft.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarPermission {
    NotDetermined,
    Granted,
    Denied,
}

/// One event from the OS calendar store.
#[derive(Debug, Clone)]
pub struct SystemCalendarEvent {
    pub id: String,
    pub title: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub all_day: bool,
    pub url: Option<Url>,
}

/// Collaborator over the OS calendar: permission probe/request and the
/// event query for a time window.
#[async_trait]
pub trait SystemCalendarAccess: Send + Sync {
    fn permission_state(&self) -> CalendarPermission;
    /// Prompt the user for access. Only called when permission is not
    /// yet determined.
    async fn request_access(&self) -> bool;
    async fn events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SystemCalendarEvent>, SourceError>;
}

pub struct SystemCalendarSource {
    access: Arc<dyn SystemCalendarAccess>,
    settings: Arc<SettingsStore>,
}

impl SystemCalendarSource {
    pub fn new(access: Arc<dyn SystemCalendarAccess>, settings: Arc<SettingsStore>) -> Self {
        Self { access, settings }
    }
}

#[async_trait]
impl NotificationSource for SystemCalendarSource {
    fn provider(&self) -> Provider {
        Provider::SystemCalendar
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SourceError> {
        // A previous denial fails fast and never re-prompts.
        match self.access.permission_state() {
            CalendarPermission::Denied => return Err(SourceError::AccessDenied),
            CalendarPermission::NotDetermined => {
                if !self.access.request_access().await {
                    return Err(SourceError::AccessDenied);
                }
            }
            CalendarPermission::Granted => {}
        }

        let now = Utc::now();
        let lookahead = self.settings.calendar_lookahead_hours();
        let mut events = self
            .access
            .events(now, now + Duration::hours(lookahead))
            .await?;

        events.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(events
            .into_iter()
            .take(EVENT_LIMIT)
            .map(|e| map_event(e, now))
            .collect())
    }
}

fn map_event(event: SystemCalendarEvent, now: DateTime<Utc>) -> Notification {
    let icon = if event.all_day {
        "calendar"
    } else {
        "calendar.badge.clock"
    };
    Notification {
        id: format!("cal-{}", event.id),
        provider: Provider::SystemCalendar,
        title: event
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No Title".to_string()),
        subtitle: format_time_range(event.start, event.end, event.all_day),
        body: meeting_info(&event),
        timestamp: event.start,
        url: event.url.clone(),
        is_pinned: false,
        icon: icon.to_string(),
        priority: priority_for_start(event.start, now),
    }
}

/// Location when present, "Online Meeting" when the notes carry a known
/// meeting link, otherwise empty.
fn meeting_info(event: &SystemCalendarEvent) -> String {
    if let Some(location) = &event.location {
        if !location.is_empty() {
            return location.clone();
        }
    }
    if let Some(notes) = &event.notes {
        if MEETING_LINK_HOSTS.iter().any(|host| notes.contains(host)) {
            return "Online Meeting".to_string();
        }
    }
    String::new()
}

fn format_time_range(start: DateTime<Utc>, end: Option<DateTime<Utc>>, all_day: bool) -> String {
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
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeAccess {
        permission: CalendarPermission,
        grant_on_request: bool,
        requested: AtomicBool,
        events: Vec<SystemCalendarEvent>,
    }

    impl FakeAccess {
        fn new(permission: CalendarPermission) -> Self {
            Self {
                permission,
                grant_on_request: true,
                requested: AtomicBool::new(false),
                events: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl SystemCalendarAccess for FakeAccess {
        fn permission_state(&self) -> CalendarPermission {
            self.permission
        }

        async fn request_access(&self) -> bool {
            self.requested.store(true, Ordering::SeqCst);
            self.grant_on_request
        }

        async fn events(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<SystemCalendarEvent>, SourceError> {
            Ok(self.events.clone())
        }
    }

    fn source_with(access: FakeAccess) -> (tempfile::TempDir, Arc<FakeAccess>, SystemCalendarSource) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::open(dir.path().join("settings.json")));
        let access = Arc::new(access);
        let source = SystemCalendarSource::new(access.clone(), settings);
        (dir, access, source)
    }

    fn event(id: &str, minutes_ahead: i64) -> SystemCalendarEvent {
        let start = Utc::now() + Duration::minutes(minutes_ahead);
        SystemCalendarEvent {
            id: id.to_string(),
            title: Some(format!("Event {id}")),
            start,
            end: Some(start + Duration::minutes(30)),
            location: None,
            notes: None,
            all_day: false,
            url: None,
        }
    }

    #[tokio::test]
    async fn prior_denial_fails_fast_without_reprompting() {
        let (_dir, access, source) = source_with(FakeAccess::new(CalendarPermission::Denied));
        let err = source.fetch_notifications().await.unwrap_err();
        assert!(matches!(err, SourceError::AccessDenied));
        assert!(!access.requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn undetermined_permission_prompts_once() {
        let mut fake = FakeAccess::new(CalendarPermission::NotDetermined);
        fake.events = vec![event("e1", 20)];
        let (_dir, access, source) = source_with(fake);

        let items = source.fetch_notifications().await.unwrap();
        assert!(access.requested.load(Ordering::SeqCst));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "cal-e1");
    }

    #[tokio::test]
    async fn refused_prompt_is_access_denied() {
        let mut fake = FakeAccess::new(CalendarPermission::NotDetermined);
        fake.grant_on_request = false;
        let (_dir, _access, source) = source_with(fake);

        let err = source.fetch_notifications().await.unwrap_err();
        assert!(matches!(err, SourceError::AccessDenied));
    }

    #[tokio::test]
    async fn events_sort_soonest_first_and_map_priority() {
        let mut fake = FakeAccess::new(CalendarPermission::Granted);
        fake.events = vec![event("later", 120), event("soon", 10)];
        let (_dir, _access, source) = source_with(fake);

        let items = source.fetch_notifications().await.unwrap();
        assert_eq!(items[0].id, "cal-soon");
        assert_eq!(items[0].priority, crate::types::Priority::High);
        assert_eq!(items[1].id, "cal-later");
        assert_eq!(items[1].priority, crate::types::Priority::Low);
    }

    #[test]
    fn meeting_info_prefers_location_then_links() {
        let mut e = event("x", 30);
        e.location = Some("Room 4A".to_string());
        assert_eq!(meeting_info(&e), "Room 4A");

        e.location = None;
        e.notes = Some("Join: https://zoom.us/j/123".to_string());
        assert_eq!(meeting_info(&e), "Online Meeting");

        e.notes = Some("Bring snacks".to_string());
        assert_eq!(meeting_info(&e), "");
    }

    #[test]
    fn all_day_events_use_plain_calendar_icon() {
        let mut e = event("d", 300);
        e.all_day = true;
        let n = map_event(e, Utc::now());
        assert_eq!(n.icon, "calendar");
        assert_eq!(n.subtitle, "All Day");
    }
}
