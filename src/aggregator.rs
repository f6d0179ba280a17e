//! Aggregation engine: drives the enabled adapters concurrently on a
//! timer, merges their results under partial failure, and publishes the
//! sectioned feed as immutable snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::settings::SettingsStore;
use crate::sources::NotificationSource;
use crate::types::{
    AggregatedState, Notification, NotificationGroup, Priority, Provider,
};

const MAX_PINNED: usize = 3;
const MAX_RECENT: usize = 7;
const MAX_PER_GROUP: usize = 3;

pub struct Aggregator {
    sources: Vec<Arc<dyn NotificationSource>>,
    settings: Arc<SettingsStore>,
    /// Merged pool from the most recent round. Sections are projections
    /// of this pool; pin toggles recompute without a re-fetch.
    pool: Mutex<Vec<Notification>>,
    state_tx: watch::Sender<Arc<AggregatedState>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    /// Weak handle to ourselves for the poll timer task, so a running
    /// timer never keeps a dropped engine alive.
    me: Weak<Self>,
}

impl Aggregator {
    pub fn new(
        sources: Vec<Arc<dyn NotificationSource>>,
        settings: Arc<SettingsStore>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(Arc::new(AggregatedState::default()));
        Arc::new_cyclic(|me| Self {
            sources,
            settings,
            pool: Mutex::new(Vec::new()),
            state_tx,
            poll_task: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Current published snapshot.
    pub fn snapshot(&self) -> Arc<AggregatedState> {
        self.state_tx.borrow().clone()
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AggregatedState>> {
        self.state_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Refresh round
    // ------------------------------------------------------------------

    /// Run one complete fan-out/fan-in round. One provider's failure
    /// never blocks or discards another's results; the merged round is
    /// applied atomically after every adapter has settled.
    pub async fn refresh_all(&self) {
        {
            let mut state = self.snapshot().as_ref().clone();
            state.is_refreshing = true;
            state.errors.clear();
            self.publish(state);
        }

        let enabled: Vec<Arc<dyn NotificationSource>> = self
            .sources
            .iter()
            .filter(|source| {
                let provider = source.provider();
                self.settings.is_enabled(provider) && self.settings.is_authenticated(provider)
            })
            .cloned()
            .collect();

        let now = Utc::now();
        let mut errors: HashMap<Provider, String> = HashMap::new();

        let (pool, showing_sample) = if enabled.is_empty() {
            // Nothing connected yet: the UI is never empty on first run.
            (sample_notifications(now), true)
        } else {
            let mut results: Vec<Option<(Provider, Result<Vec<Notification>, _>)>> =
                (0..enabled.len()).map(|_| None).collect();

            let mut tasks = JoinSet::new();
            for (index, source) in enabled.iter().enumerate() {
                let source = Arc::clone(source);
                tasks.spawn(async move {
                    (index, source.provider(), source.fetch_notifications().await)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, provider, result)) => results[index] = Some((provider, result)),
                    Err(e) => log::warn!("adapter task aborted: {e}"),
                }
            }

            // Merge in source order so ties and dedup are deterministic
            // regardless of completion order.
            let mut fetched = Vec::new();
            for (provider, result) in results.into_iter().flatten() {
                match result {
                    Ok(items) => fetched.extend(items),
                    Err(e) => {
                        log::warn!("{provider} fetch failed: {e}");
                        errors.insert(provider, e.to_string());
                    }
                }
            }
            (merge_dedup(fetched), false)
        };

        *self.pool.lock() = pool.clone();

        let sections = compute_sections(&pool, &self.settings.pinned_ids(), now);
        self.publish(AggregatedState {
            pinned: sections.pinned,
            github_groups: sections.github_groups,
            recent: sections.recent,
            upcoming: sections.upcoming,
            is_refreshing: false,
            last_refresh_at: Some(Utc::now()),
            is_showing_sample_data: showing_sample,
            errors,
        });
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Pin or unpin by notification id. Pinning past capacity is a
    /// silent no-op; the ceiling is hard, not a queue.
    pub fn toggle_pin(&self, id: &str) {
        let mut pinned = self.settings.pinned_ids();
        if let Some(position) = pinned.iter().position(|p| p == id) {
            pinned.remove(position);
        } else if pinned.len() < MAX_PINNED {
            pinned.push(id.to_string());
        } else {
            return;
        }
        self.settings.set_pinned_ids(pinned);
        self.recompute_sections();
    }

    /// Dismiss one provider's error banner.
    pub fn clear_error(&self, provider: Provider) {
        let mut state = self.snapshot().as_ref().clone();
        if state.errors.remove(&provider).is_some() {
            self.publish(state);
        }
    }

    fn recompute_sections(&self) {
        let pool = self.pool.lock().clone();
        let sections = compute_sections(&pool, &self.settings.pinned_ids(), Utc::now());
        let mut state = self.snapshot().as_ref().clone();
        state.pinned = sections.pinned;
        state.github_groups = sections.github_groups;
        state.recent = sections.recent;
        state.upcoming = sections.upcoming;
        self.publish(state);
    }

    fn publish(&self, state: AggregatedState) {
        self.state_tx.send_replace(Arc::new(state));
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Start the repeating refresh timer, replacing any previous one.
    pub fn start_polling(&self) {
        self.stop_polling();
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(engine) = me.upgrade() else { break };
                let interval = engine.settings.poll_interval_seconds();
                drop(engine);
                tokio::time::sleep(std::time::Duration::from_secs(interval)).await;

                // The round runs detached: stopping the poll cancels only
                // the pending timer, an in-flight refresh completes and
                // its result is applied normally.
                let Some(engine) = me.upgrade() else { break };
                let round = tokio::spawn(async move { engine.refresh_all().await });
                let _ = round.await;
            }
        });
        *self.poll_task.lock() = Some(handle);
    }

    /// Cancel the pending timer, if any.
    pub fn stop_polling(&self) {
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Merge + sections
// ============================================================================

/// Cross-provider dedup by id; the first-encountered item wins.
fn merge_dedup(items: Vec<Notification>) -> Vec<Notification> {
    let mut seen: HashSet<String> = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}

struct Sections {
    pinned: Vec<Notification>,
    github_groups: Vec<NotificationGroup>,
    recent: Vec<Notification>,
    upcoming: Vec<Notification>,
}

/// Deterministic section computation for one round: stable sorts keyed
/// on timestamp, ties broken by input order.
fn compute_sections(all: &[Notification], pinned_ids: &[String], now: DateTime<Utc>) -> Sections {
    let is_pinned = |n: &Notification| pinned_ids.iter().any(|id| id == &n.id);

    let mut pinned: Vec<Notification> = all
        .iter()
        .filter(|n| is_pinned(n))
        .cloned()
        .map(|mut n| {
            n.is_pinned = true;
            n
        })
        .collect();
    pinned.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    pinned.truncate(MAX_PINNED);

    let mut github: Vec<Notification> = all
        .iter()
        .filter(|n| !is_pinned(n) && n.provider == Provider::Github)
        .cloned()
        .collect();
    github.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let github_groups = group_by_subtitle(github);

    let mut recent: Vec<Notification> = all
        .iter()
        .filter(|n| !is_pinned(n) && !n.provider.is_calendar_source())
        .cloned()
        .collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(MAX_RECENT);

    // Nearest future event first; past events drop out.
    let mut upcoming: Vec<Notification> = all
        .iter()
        .filter(|n| !is_pinned(n) && n.provider.is_calendar_source() && n.timestamp >= now)
        .cloned()
        .collect();
    upcoming.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    Sections {
        pinned,
        github_groups,
        recent,
        upcoming,
    }
}

/// Group newest-first items by their grouping key (repository
/// subtitle): groups ordered by their most recent item, each capped.
fn group_by_subtitle(items: Vec<Notification>) -> Vec<NotificationGroup> {
    let mut groups: Vec<NotificationGroup> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|g| g.key == item.subtitle) {
            Some(group) => {
                if group.notifications.len() < MAX_PER_GROUP {
                    group.notifications.push(item);
                }
            }
            None => groups.push(NotificationGroup {
                key: item.subtitle.clone(),
                notifications: vec![item],
            }),
        }
    }
    groups.sort_by(|a, b| {
        let latest_a = a.notifications.first().map(|n| n.timestamp);
        let latest_b = b.notifications.first().map(|n| n.timestamp);
        latest_b.cmp(&latest_a)
    });
    groups
}

// ============================================================================
// Sample data (shown when no services are connected)
// ============================================================================

fn sample_notifications(now: DateTime<Utc>) -> Vec<Notification> {
    let item = |id: &str,
                provider: Provider,
                title: &str,
                subtitle: &str,
                body: &str,
                offset_secs: i64,
                icon: &str,
                priority: Priority| Notification {
        id: id.to_string(),
        provider,
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        body: body.to_string(),
        timestamp: now + Duration::seconds(offset_secs),
        url: None,
        is_pinned: false,
        icon: icon.to_string(),
        priority,
    };

    vec![
        item(
            "gh-1001",
            Provider::Github,
            "PR #42: Add dark mode support",
            "octocat/my-project",
            "Review requested",
            -300,
            "arrow.triangle.branch",
            Priority::High,
        ),
        item(
            "teams-2001",
            Provider::Teams,
            "Sprint Planning Meeting",
            "John Doe",
            "Let's discuss the Q1 roadmap",
            -600,
            "bubble.left.and.bubble.right",
            Priority::Normal,
        ),
        item(
            "notion-3001",
            Provider::Notion,
            "Project Roadmap updated",
            "Updated 10m ago",
            "",
            -900,
            "doc.text",
            Priority::Normal,
        ),
        item(
            "cal-4001",
            Provider::SystemCalendar,
            "1:1 with Manager",
            "2:00 PM - 2:30 PM",
            "Zoom Meeting",
            1800,
            "calendar",
            Priority::High,
        ),
        item(
            "gh-1002",
            Provider::Github,
            "Issue #87: Fix login timeout",
            "octocat/api-server",
            "Assigned to you",
            -1800,
            "arrow.triangle.branch",
            Priority::Normal,
        ),
        item(
            "teams-2002",
            Provider::Teams,
            "Design Review Feedback",
            "Jane Smith",
            "I've left comments on the wireframe",
            -2400,
            "bubble.left.and.bubble.right",
            Priority::Normal,
        ),
        item(
            "gcal-5001",
            Provider::GoogleCalendar,
            "Team Standup",
            "9:00 AM - 9:15 AM",
            "Google Meet",
            3600,
            "calendar.badge.clock",
            Priority::Normal,
        ),
        item(
            "notion-3002",
            Provider::Notion,
            "API Documentation draft",
            "Updated 1h ago",
            "",
            -3600,
            "doc.text",
            Priority::Low,
        ),
        item(
            "gh-1003",
            Provider::Github,
            "Release v2.1.0 published",
            "octocat/my-project",
            "New release",
            -5400,
            "arrow.triangle.branch",
            Priority::Low,
        ),
        item(
            "teams-2003",
            Provider::Teams,
            "Deployment notification",
            "DevOps Bot",
            "Production deployment completed successfully",
            -7200,
            "bubble.left.and.bubble.right",
            Priority::Low,
        ),
    ]
}

// ============================================================================
// Tests
// ============================================================================
