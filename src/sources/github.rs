//! GitHub adapter: participating thread notifications, open PRs and
//! issues involving the viewer, and a default-branch commit watch over
//! the selected repositories.
//!
//! Each sub-source is best-effort: its own failure falls back to an
//! empty list so one flaky endpoint does not blank the whole provider.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::{dedup_notifications, parse_timestamp, NotificationSource, SourceError};
use crate::http;
use crate::oauth::{OAuthEngine, ProviderConfig};
use crate::settings::SettingsStore;
use crate::types::{Notification, Priority, Provider};

const API_BASE: &str = "https://api.github.com";
const ACCEPT: (&str, &str) = ("Accept", "application/vnd.github+json");

const COMBINED_LIMIT: usize = 15;
const INBOX_LIMIT: usize = 8;
const PULL_LIMIT: usize = 6;
const ISSUE_LIMIT: usize = 6;
const WATCHED_REPO_LIMIT: usize = 8;
const REPO_PAGE_SIZE: usize = 100;
const REPO_PAGE_LIMIT: usize = 5;

pub struct GithubSource {
    oauth: Arc<OAuthEngine>,
    settings: Arc<SettingsStore>,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl GithubSource {
    pub fn new(oauth: Arc<OAuthEngine>, settings: Arc<SettingsStore>, config: ProviderConfig) -> Self {
        Self {
            oauth,
            settings,
            config,
            client: http::client(),
        }
    }
}

#[async_trait]
impl NotificationSource for GithubSource {
    fn provider(&self) -> Provider {
        Provider::Github
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SourceError> {
        let token = self.oauth.get_valid_access_token(&self.config).await?;
        let selected = self.settings.selected_repos();

        let threads = self
            .fetch_thread_notifications(&token, &selected)
            .await
            .unwrap_or_else(|e| {
                log::debug!("github thread fetch failed: {e}");
                Vec::new()
            });
        let pulls = self
            .fetch_involved_pulls(&token, &selected)
            .await
            .unwrap_or_else(|e| {
                log::debug!("github pull-request fetch failed: {e}");
                Vec::new()
            });
        let issues = self
            .fetch_involved_issues(&token, &selected)
            .await
            .unwrap_or_else(|e| {
                log::debug!("github issue fetch failed: {e}");
                Vec::new()
            });
        let commits = self
            .fetch_default_branch_updates(&token, &selected)
            .await
            .unwrap_or_else(|e| {
                log::debug!("github commit watch failed: {e}");
                Vec::new()
            });

        let mut combined = Vec::new();
        combined.extend(threads);
        combined.extend(pulls);
        combined.extend(issues);
        combined.extend(commits);
        combined.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut deduped = dedup_notifications(combined);
        deduped.truncate(COMBINED_LIMIT);
        Ok(deduped)
    }
}

impl GithubSource {
    async fn fetch_thread_notifications(
        &self,
        token: &str,
        selected: &BTreeSet<String>,
    ) -> Result<Vec<Notification>, SourceError> {
        let url = api_url_with(
            "/notifications",
            &[("participating", "true"), ("per_page", "20")],
        )?;
        let threads: Vec<ThreadNotification> =
            http::get_json(&self.client, url, token, &[ACCEPT]).await?;

        Ok(threads
            .into_iter()
            .filter(|t| selected.is_empty() || selected.contains(&t.repository.full_name))
            .take(INBOX_LIMIT)
            .map(map_thread)
            .collect())
    }

    async fn fetch_involved_pulls(
        &self,
        token: &str,
        selected: &BTreeSet<String>,
    ) -> Result<Vec<Notification>, SourceError> {
        let items = self
            .search_issues(token, "is:pr is:open involves:@me", PULL_LIMIT)
            .await?;
        Ok(items
            .into_iter()
            .filter(|i| i.pull_request.is_some())
            .filter(|i| selected.is_empty() || selected.contains(&i.repository_full_name()))
            .map(map_pull_request)
            .collect())
    }

    async fn fetch_involved_issues(
        &self,
        token: &str,
        selected: &BTreeSet<String>,
    ) -> Result<Vec<Notification>, SourceError> {
        let items = self
            .search_issues(token, "is:issue is:open involves:@me", ISSUE_LIMIT)
            .await?;
        Ok(items
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .filter(|i| selected.is_empty() || selected.contains(&i.repository_full_name()))
            .map(map_issue)
            .collect())
    }

    async fn search_issues(
        &self,
        token: &str,
        query: &str,
        per_page: usize,
    ) -> Result<Vec<SearchItem>, SourceError> {
        let url = api_url_with(
            "/search/issues",
            &[
                ("q", query),
                ("sort", "updated"),
                ("order", "desc"),
                ("per_page", &per_page.to_string()),
            ],
        )?;
        let response: SearchResponse = http::get_json(&self.client, url, token, &[ACCEPT]).await?;
        Ok(response.items)
    }

    // ------------------------------------------------------------------
    // Default-branch commit watch
    // ------------------------------------------------------------------

    async fn fetch_default_branch_updates(
        &self,
        token: &str,
        selected: &BTreeSet<String>,
    ) -> Result<Vec<Notification>, SourceError> {
        let mut repos = self.fetch_participating_repos(token).await?;
        if selected.is_empty() {
            repos.truncate(WATCHED_REPO_LIMIT);
        } else {
            repos.retain(|r| selected.contains(&r.full_name));
        }
        if repos.is_empty() {
            return Ok(Vec::new());
        }

        let mut observed = Vec::new();
        for repo in &repos {
            match self.fetch_latest_commit(token, repo).await {
                Ok(head) => observed.push(head),
                Err(e) => {
                    log::debug!("skipping commit lookup for {}: {e}", repo.full_name);
                }
            }
        }

        let baseline = self.settings.commit_baseline();
        let (next_baseline, updates) = advance_baseline(&baseline, &observed);
        self.settings.set_commit_baseline(next_baseline);

        Ok(updates.into_iter().map(map_commit_update).collect())
    }

    async fn fetch_participating_repos(
        &self,
        token: &str,
    ) -> Result<Vec<RepoSummary>, SourceError> {
        let mut repositories = Vec::new();
        for page in 1..=REPO_PAGE_LIMIT {
            let url = api_url_with(
                "/user/repos",
                &[
                    ("type", "all"),
                    ("sort", "updated"),
                    ("direction", "desc"),
                    ("per_page", &REPO_PAGE_SIZE.to_string()),
                    ("page", &page.to_string()),
                ],
            )?;
            let chunk: Vec<RepoSummary> =
                http::get_json(&self.client, url, token, &[ACCEPT]).await?;
            let len = chunk.len();
            repositories.extend(chunk);
            if len < REPO_PAGE_SIZE {
                break;
            }
        }
        Ok(repositories)
    }

    async fn fetch_latest_commit(
        &self,
        token: &str,
        repo: &RepoSummary,
    ) -> Result<ObservedHead, SourceError> {
        let url = api_url(&format!(
            "/repos/{}/commits/{}",
            repo.full_name, repo.default_branch
        ))?;
        let commit: LatestCommit = http::get_json(&self.client, url, token, &[ACCEPT]).await?;
        Ok(ObservedHead {
            repo: repo.full_name.clone(),
            branch: repo.default_branch.clone(),
            sha: commit.sha,
            message: commit
                .commit
                .message
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
            url: commit.html_url.and_then(|u| Url::parse(&u).ok()),
            timestamp: commit
                .commit
                .author
                .and_then(|a| a.date)
                .as_deref()
                .and_then(parse_timestamp),
        })
    }
}

// ============================================================================
// Baseline bookkeeping
// ============================================================================

#[derive(Debug, Clone)]
struct ObservedHead {
    repo: String,
    branch: String,
    sha: String,
    message: String,
    url: Option<Url>,
    timestamp: Option<DateTime<Utc>>,
}

/// Advance the per-repository commit baseline.
///
/// The first observation of a repository (and the whole first run)
/// only records the baseline and emits nothing; afterwards, a changed
/// HEAD sha emits exactly one update. The returned baseline contains
/// only the repositories observed this cycle, which prunes deselected
/// ones automatically.
fn advance_baseline<'a>(
    baseline: &BTreeMap<String, String>,
    observed: &'a [ObservedHead],
) -> (BTreeMap<String, String>, Vec<&'a ObservedHead>) {
    let has_baseline = !baseline.is_empty();
    let mut next = BTreeMap::new();
    let mut updates = Vec::new();

    for head in observed {
        let previous = baseline.get(&head.repo);
        next.insert(head.repo.clone(), head.sha.clone());

        match previous {
            Some(previous_sha) if has_baseline && previous_sha != &head.sha => {
                updates.push(head);
            }
            _ => {}
        }
    }

    (next, updates)
}

// ============================================================================
// Payload mapping
// ============================================================================

fn map_thread(thread: ThreadNotification) -> Notification {
    let timestamp = parse_timestamp(&thread.updated_at).unwrap_or_else(Utc::now);
    Notification {
        id: format!("gh-thread-{}", thread.id),
        provider: Provider::Github,
        title: thread.subject.title.clone(),
        subtitle: thread.repository.full_name.clone(),
        body: humanize_reason(&thread.reason),
        timestamp,
        url: thread.subject.url.as_deref().and_then(browser_url),
        is_pinned: false,
        icon: icon_for_subject(&thread.subject.kind).to_string(),
        priority: priority_for_reason(&thread.reason),
    }
}

fn map_pull_request(item: SearchItem) -> Notification {
    let timestamp = parse_timestamp(&item.updated_at).unwrap_or_else(Utc::now);
    Notification {
        id: format!("gh-pr-{}", item.node_id),
        provider: Provider::Github,
        title: format!("PR #{}: {}", item.number, item.title),
        subtitle: item.repository_full_name(),
        body: "Open pull request involving you".to_string(),
        timestamp,
        url: Url::parse(&item.html_url).ok(),
        is_pinned: false,
        icon: "arrow.triangle.pull".to_string(),
        priority: Priority::High,
    }
}

fn map_issue(item: SearchItem) -> Notification {
    let timestamp = parse_timestamp(&item.updated_at).unwrap_or_else(Utc::now);
    Notification {
        id: format!("gh-issue-{}", item.node_id),
        provider: Provider::Github,
        title: format!("Issue #{}: {}", item.number, item.title),
        subtitle: item.repository_full_name(),
        body: "Open issue involving you".to_string(),
        timestamp,
        url: Url::parse(&item.html_url).ok(),
        is_pinned: false,
        icon: "exclamationmark.circle".to_string(),
        priority: Priority::Normal,
    }
}

fn map_commit_update(head: &ObservedHead) -> Notification {
    Notification {
        id: format!("gh-commit-{}-{}", head.repo, head.sha),
        provider: Provider::Github,
        title: format!("{} default branch updated", head.repo),
        subtitle: format!("Latest on {}", head.branch),
        body: head.message.clone(),
        timestamp: head.timestamp.unwrap_or_else(Utc::now),
        url: head.url.clone(),
        is_pinned: false,
        icon: "arrow.up.circle".to_string(),
        priority: Priority::Normal,
    }
}

fn priority_for_reason(reason: &str) -> Priority {
    match reason {
        "review_requested" | "assign" | "security_alert" | "mention" | "team_mention" => {
            Priority::High
        }
        "ci_activity" => Priority::Low,
        _ => Priority::Normal,
    }
}

fn icon_for_subject(kind: &str) -> &'static str {
    match kind {
        "PullRequest" => "arrow.triangle.pull",
        "Issue" => "exclamationmark.circle",
        "Release" => "tag",
        "Discussion" => "bubble.left.and.bubble.right",
        _ => "arrow.triangle.branch",
    }
}

/// Rewrite an API subject URL to its browser counterpart:
/// `https://api.github.com/repos/o/r/pulls/42` → `https://github.com/o/r/pull/42`.
fn browser_url(api_url: &str) -> Option<Url> {
    let rewritten = api_url
        .replace("api.github.com/repos", "github.com")
        .replace("/pulls/", "/pull/");
    Url::parse(&rewritten).ok()
}

/// `review_requested` → `Review Requested`.
fn humanize_reason(reason: &str) -> String {
    reason
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn api_url(path: &str) -> Result<Url, SourceError> {
    Url::parse(&format!("{API_BASE}{path}"))
        .map_err(|_| SourceError::Api(format!("Invalid GitHub URL: {path}")))
}

fn api_url_with(path: &str, params: &[(&str, &str)]) -> Result<Url, SourceError> {
    Url::parse_with_params(&format!("{API_BASE}{path}"), params)
        .map_err(|_| SourceError::Api(format!("Invalid GitHub URL: {path}")))
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ThreadNotification {
    id: String,
    reason: String,
    updated_at: String,
    subject: ThreadSubject,
    repository: ThreadRepository,
}

#[derive(Debug, Deserialize)]
struct ThreadSubject {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ThreadRepository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    node_id: String,
    number: u64,
    title: String,
    html_url: String,
    repository_url: String,
    updated_at: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl SearchItem {
    fn repository_full_name(&self) -> String {
        self.repository_url
            .trim_start_matches("https://api.github.com/repos/")
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct RepoSummary {
    full_name: String,
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct LatestCommit {
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    date: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const THREAD_JSON: &str = r#"{
        "id": "1234567",
        "unread": true,
        "reason": "review_requested",
        "updated_at": "2026-03-01T10:15:00Z",
        "subject": {
            "title": "Add dark mode support",
            "url": "https://api.github.com/repos/octocat/widgets/pulls/42",
            "type": "PullRequest"
        },
        "repository": {
            "full_name": "octocat/widgets",
            "html_url": "https://github.com/octocat/widgets"
        }
    }"#;

    #[test]
    fn thread_mapping_builds_browser_url_and_priority() {
        let thread: ThreadNotification = serde_json::from_str(THREAD_JSON).unwrap();
        let n = map_thread(thread);

        assert_eq!(n.id, "gh-thread-1234567");
        assert_eq!(n.subtitle, "octocat/widgets");
        assert_eq!(n.body, "Review Requested");
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.icon, "arrow.triangle.pull");
        assert_eq!(
            n.url.unwrap().as_str(),
            "https://github.com/octocat/widgets/pull/42"
        );
    }

    #[test]
    fn reason_priorities_cover_the_heuristics() {
        assert_eq!(priority_for_reason("review_requested"), Priority::High);
        assert_eq!(priority_for_reason("security_alert"), Priority::High);
        assert_eq!(priority_for_reason("team_mention"), Priority::High);
        assert_eq!(priority_for_reason("ci_activity"), Priority::Low);
        assert_eq!(priority_for_reason("subscribed"), Priority::Normal);
    }

    #[test]
    fn subject_icons_by_type() {
        assert_eq!(icon_for_subject("PullRequest"), "arrow.triangle.pull");
        assert_eq!(icon_for_subject("Issue"), "exclamationmark.circle");
        assert_eq!(icon_for_subject("Release"), "tag");
        assert_eq!(icon_for_subject("CheckSuite"), "arrow.triangle.branch");
    }

    #[test]
    fn search_item_maps_to_pull_and_issue_shapes() {
        let item: SearchItem = serde_json::from_str(
            r#"{
                "node_id": "PR_abc",
                "number": 42,
                "title": "Fix login timeout",
                "html_url": "https://github.com/octocat/api-server/pull/42",
                "repository_url": "https://api.github.com/repos/octocat/api-server",
                "updated_at": "2026-03-01T08:00:00Z",
                "pull_request": {}
            }"#,
        )
        .unwrap();
        assert_eq!(item.repository_full_name(), "octocat/api-server");

        let n = map_pull_request(item);
        assert_eq!(n.id, "gh-pr-PR_abc");
        assert_eq!(n.title, "PR #42: Fix login timeout");
        assert_eq!(n.priority, Priority::High);
    }

    fn head(repo: &str, sha: &str) -> ObservedHead {
        ObservedHead {
            repo: repo.to_string(),
            branch: "main".to_string(),
            sha: sha.to_string(),
            message: "commit message".to_string(),
            url: None,
            timestamp: None,
        }
    }

    #[test]
    fn baseline_first_observation_emits_nothing() {
        let observed = [head("octocat/widgets", "sha1")];
        let (next, updates) = advance_baseline(&BTreeMap::new(), &observed);
        assert!(updates.is_empty());
        assert_eq!(next.get("octocat/widgets").map(String::as_str), Some("sha1"));

        // Unchanged HEAD on the next cycle: still nothing
        let observed = [head("octocat/widgets", "sha1")];
        let (next, updates) = advance_baseline(&next, &observed);
        assert!(updates.is_empty());

        // Changed HEAD: exactly one update referencing the new sha
        let observed = [head("octocat/widgets", "sha2")];
        let (next, updates) = advance_baseline(&next, &observed);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].sha, "sha2");
        assert_eq!(next.get("octocat/widgets").map(String::as_str), Some("sha2"));
    }

    #[test]
    fn baseline_new_repo_on_established_baseline_stays_silent() {
        let mut baseline = BTreeMap::new();
        baseline.insert("octocat/widgets".to_string(), "sha1".to_string());

        let observed = [head("octocat/widgets", "sha1"), head("octocat/api-server", "shaA")];
        let (next, updates) = advance_baseline(&baseline, &observed);
        assert!(updates.is_empty());
        assert_eq!(next.len(), 2);
    }

    #[test]
    fn baseline_prunes_deselected_repositories() {
        let mut baseline = BTreeMap::new();
        baseline.insert("octocat/widgets".to_string(), "sha1".to_string());
        baseline.insert("octocat/old-repo".to_string(), "shaZ".to_string());

        let (next, _) = advance_baseline(&baseline, &[head("octocat/widgets", "sha1")]);
        assert!(!next.contains_key("octocat/old-repo"));
    }

    #[test]
    fn commit_update_notification_references_new_sha() {
        let observed = head("octocat/widgets", "deadbeef");
        let n = map_commit_update(&observed);
        assert_eq!(n.id, "gh-commit-octocat/widgets-deadbeef");
        assert_eq!(n.title, "octocat/widgets default branch updated");
        assert_eq!(n.subtitle, "Latest on main");
        assert_eq!(n.icon, "arrow.up.circle");
    }

    #[test]
    fn humanize_reason_capitalizes_words() {
        assert_eq!(humanize_reason("review_requested"), "Review Requested");
        assert_eq!(humanize_reason("mention"), "Mention");
    }
}
