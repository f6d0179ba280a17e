//! Persisted user settings: enabled/authenticated flags per service,
//! poll interval, GitHub repository/account selection, pinned ids, and
//! display preferences. One pretty-printed JSON file, rewritten whole
//! on every change.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::credentials::normalize_login;
use crate::types::Provider;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceFlags {
    pub enabled: bool,
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub services: HashMap<Provider, ServiceFlags>,
    pub poll_interval_seconds: u64,
    pub github_selected_repos: BTreeSet<String>,
    pub github_active_account: Option<String>,
    pub pinned_ids: Vec<String>,
    pub background_opacity: f64,
    pub calendar_lookahead_hours: i64,
    pub github_notification_days: i64,
    pub github_commit_baseline: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            services: Provider::ALL
                .iter()
                .map(|p| (*p, ServiceFlags::default()))
                .collect(),
            poll_interval_seconds: 60,
            github_selected_repos: BTreeSet::new(),
            github_active_account: None,
            pinned_ids: Vec::new(),
            background_opacity: 1.0,
            calendar_lookahead_hours: 24,
            github_notification_days: 7,
            github_commit_baseline: BTreeMap::new(),
        }
    }
}

/// Shared settings store. Reads are lock-guarded snapshots; every
/// mutation persists the whole file. Persist failures are logged and do
/// not unwind into callers (a lost preference write must not take the
/// feed down).
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Canonical settings path: `~/.workbar/settings.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".workbar")
            .join("settings.json")
    }

    pub fn open(path: PathBuf) -> Self {
        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(loaded) => loaded,
                Err(e) => {
                    log::warn!("Failed to parse settings at {}: {e}", path.display());
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };
        Self {
            path,
            inner: RwLock::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    // ------------------------------------------------------------------
    // Service flags
    // ------------------------------------------------------------------

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.inner
            .read()
            .services
            .get(&provider)
            .map(|f| f.enabled)
            .unwrap_or(false)
    }

    pub fn is_authenticated(&self, provider: Provider) -> bool {
        self.inner
            .read()
            .services
            .get(&provider)
            .map(|f| f.authenticated)
            .unwrap_or(false)
    }

    pub fn set_enabled(&self, provider: Provider, enabled: bool) {
        {
            let mut inner = self.inner.write();
            inner.services.entry(provider).or_default().enabled = enabled;
        }
        self.save();
    }

    /// Connecting a service also turns it on.
    pub fn mark_authenticated(&self, provider: Provider, authenticated: bool) {
        {
            let mut inner = self.inner.write();
            let flags = inner.services.entry(provider).or_default();
            flags.authenticated = authenticated;
            if authenticated {
                flags.enabled = true;
            }
        }
        self.save();
    }

    // ------------------------------------------------------------------
    // Poll + display preferences
    // ------------------------------------------------------------------

    pub fn poll_interval_seconds(&self) -> u64 {
        self.inner.read().poll_interval_seconds
    }

    pub fn set_poll_interval_seconds(&self, seconds: u64) {
        self.inner.write().poll_interval_seconds = seconds.max(10);
        self.save();
    }

    pub fn set_background_opacity(&self, value: f64) {
        self.inner.write().background_opacity = value.clamp(0.1, 1.0);
        self.save();
    }

    pub fn calendar_lookahead_hours(&self) -> i64 {
        self.inner.read().calendar_lookahead_hours
    }

    pub fn set_calendar_lookahead_hours(&self, hours: i64) {
        self.inner.write().calendar_lookahead_hours = hours.clamp(1, 72);
        self.save();
    }

    pub fn set_github_notification_days(&self, days: i64) {
        self.inner.write().github_notification_days = days.clamp(1, 30);
        self.save();
    }

    // ------------------------------------------------------------------
    // GitHub repository + account selection
    // ------------------------------------------------------------------

    pub fn selected_repos(&self) -> BTreeSet<String> {
        self.inner.read().github_selected_repos.clone()
    }

    pub fn set_repo_selected(&self, full_name: &str, selected: bool) {
        {
            let mut inner = self.inner.write();
            if selected {
                inner.github_selected_repos.insert(full_name.to_string());
            } else {
                inner.github_selected_repos.remove(full_name);
            }
        }
        self.save();
    }

    pub fn clear_repo_selection(&self) {
        self.inner.write().github_selected_repos.clear();
        self.save();
    }

    pub fn active_account(&self) -> Option<String> {
        self.inner.read().github_active_account.clone()
    }

    pub fn set_active_account(&self, login: Option<&str>) {
        self.inner.write().github_active_account = login.map(normalize_login);
        self.save();
    }

    // ------------------------------------------------------------------
    // Pinned ids + commit baseline (engine bookkeeping)
    // ------------------------------------------------------------------

    pub fn pinned_ids(&self) -> Vec<String> {
        self.inner.read().pinned_ids.clone()
    }

    pub fn set_pinned_ids(&self, ids: Vec<String>) {
        self.inner.write().pinned_ids = ids;
        self.save();
    }

    pub fn commit_baseline(&self) -> BTreeMap<String, String> {
        self.inner.read().github_commit_baseline.clone()
    }

    pub fn set_commit_baseline(&self, baseline: BTreeMap<String, String>) {
        self.inner.write().github_commit_baseline = baseline;
        self.save();
    }

    fn save(&self) {
        let settings = self.inner.read().clone();
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::warn!("Failed to create settings dir {}: {e}", parent.display());
                    return;
                }
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&self.path, content) {
                    log::warn!("Failed to write settings to {}: {e}", self.path.display());
                }
            }
            Err(e) => log::warn!("Failed to serialize settings: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json"));
        (dir, store)
    }

    #[test]
    fn defaults_match_first_run() {
        let (_dir, store) = temp_store();
        assert_eq!(store.poll_interval_seconds(), 60);
        assert_eq!(store.calendar_lookahead_hours(), 24);
        assert!(!store.is_enabled(Provider::Github));
        assert!(!store.is_authenticated(Provider::Github));
        assert!(store.pinned_ids().is_empty());
        assert!(store.active_account().is_none());
    }

    #[test]
    fn mark_authenticated_also_enables() {
        let (_dir, store) = temp_store();
        store.mark_authenticated(Provider::Teams, true);
        assert!(store.is_enabled(Provider::Teams));
        assert!(store.is_authenticated(Provider::Teams));

        store.mark_authenticated(Provider::Teams, false);
        assert!(store.is_enabled(Provider::Teams)); // disconnect leaves the toggle alone
        assert!(!store.is_authenticated(Provider::Teams));
    }

    #[test]
    fn settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        {
            let store = SettingsStore::open(path.clone());
            store.set_poll_interval_seconds(120);
            store.set_repo_selected("octocat/widgets", true);
            store.set_active_account(Some("Octocat"));
            store.set_pinned_ids(vec!["gh-thread-1".to_string()]);
        }
        let store = SettingsStore::open(path);
        assert_eq!(store.poll_interval_seconds(), 120);
        assert!(store.selected_repos().contains("octocat/widgets"));
        assert_eq!(store.active_account().as_deref(), Some("octocat"));
        assert_eq!(store.pinned_ids(), vec!["gh-thread-1".to_string()]);
    }

    #[test]
    fn clamps_apply_to_preferences() {
        let (_dir, store) = temp_store();
        store.set_poll_interval_seconds(1);
        assert_eq!(store.poll_interval_seconds(), 10);
        store.set_calendar_lookahead_hours(500);
        assert_eq!(store.calendar_lookahead_hours(), 72);
        store.set_background_opacity(0.0);
        assert!((store.snapshot().background_opacity - 0.1).abs() < f64::EPSILON);
        store.set_github_notification_days(0);
        assert_eq!(store.snapshot().github_notification_days, 1);
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = SettingsStore::open(path);
        assert_eq!(store.poll_interval_seconds(), 60);
    }
}
