//! Notion adapter: recently edited pages via the search endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{parse_timestamp, NotificationSource, SourceError};
use crate::http;
use crate::oauth::{OAuthEngine, ProviderConfig};
use crate::types::{Notification, Priority, Provider};

const API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: (&str, &str) = ("Notion-Version", "2022-06-28");
const PAGE_LIMIT: usize = 10;

pub struct NotionSource {
    oauth: Arc<OAuthEngine>,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl NotionSource {
    pub fn new(oauth: Arc<OAuthEngine>, config: ProviderConfig) -> Self {
        Self {
            oauth,
            config,
            client: http::client(),
        }
    }
}

#[async_trait]
impl NotificationSource for NotionSource {
    fn provider(&self) -> Provider {
        Provider::Notion
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SourceError> {
        let token = self.oauth.get_valid_access_token(&self.config).await?;

        let url = Url::parse(&format!("{API_BASE}/search"))
            .map_err(|_| SourceError::Api("Invalid Notion search URL".to_string()))?;
        let request = SearchRequest {
            sort: SearchSort {
                direction: "descending",
                timestamp: "last_edited_time",
            },
            page_size: PAGE_LIMIT,
        };
        let response: SearchResponse =
            http::post_json(&self.client, url, &token, &request, &[NOTION_VERSION]).await?;

        let now = Utc::now();
        Ok(response
            .results
            .into_iter()
            .filter(|o| o.object == "page")
            .take(PAGE_LIMIT)
            .map(|o| map_object(o, now))
            .collect())
    }
}

fn map_object(object: NotionObject, now: DateTime<Utc>) -> Notification {
    let edited = parse_timestamp(&object.last_edited_time).unwrap_or(now);
    Notification {
        id: format!("notion-{}", object.id),
        provider: Provider::Notion,
        title: object.display_title(),
        subtitle: format_relative(edited, now),
        body: String::new(),
        timestamp: edited,
        url: object.url.as_deref().and_then(|u| Url::parse(u).ok()),
        is_pinned: false,
        icon: object.icon_hint().to_string(),
        priority: Priority::Normal,
    }
}

/// Short relative-age subtitle for an edited page.
fn format_relative(edited: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - edited;
    if elapsed.num_seconds() < 60 {
        "Updated just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        format!("Updated {}m ago", elapsed.num_minutes())
    } else if elapsed.num_hours() < 24 {
        format!("Updated {}h ago", elapsed.num_hours())
    } else {
        format!("Updated {}d ago", elapsed.num_days())
    }
}

// ============================================================================
// Request/response types
// ============================================================================

#[derive(Debug, Serialize)]
struct SearchRequest {
    sort: SearchSort,
    page_size: usize,
}

#[derive(Debug, Serialize)]
struct SearchSort {
    direction: &'static str,
    timestamp: &'static str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<NotionObject>,
}

#[derive(Debug, Deserialize)]
struct NotionObject {
    id: String,
    object: String,
    last_edited_time: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    properties: Option<std::collections::HashMap<String, NotionProperty>>,
    /// Databases carry their title at the top level.
    #[serde(default)]
    title: Option<Vec<NotionRichText>>,
}

#[derive(Debug, Deserialize)]
struct NotionProperty {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<Vec<NotionRichText>>,
}

#[derive(Debug, Deserialize)]
struct NotionRichText {
    #[serde(default)]
    plain_text: Option<String>,
}

impl NotionObject {
    fn display_title(&self) -> String {
        if let Some(properties) = &self.properties {
            if let Some(title_prop) = properties
                .values()
                .find(|p| p.kind.as_deref() == Some("title"))
            {
                if let Some(text) = first_plain_text(title_prop.title.as_deref()) {
                    return text;
                }
            }
        }
        if let Some(text) = first_plain_text(self.title.as_deref()) {
            return text;
        }
        "Untitled".to_string()
    }

    fn icon_hint(&self) -> &'static str {
        match self.object.as_str() {
            "database" => "tablecells",
            "page" => "doc.text",
            _ => "doc",
        }
    }
}

fn first_plain_text(rich_text: Option<&[NotionRichText]>) -> Option<String> {
    rich_text?
        .first()
        .and_then(|t| t.plain_text.clone())
        .filter(|t| !t.is_empty())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const PAGE_JSON: &str = r#"{
        "id": "page-1",
        "object": "page",
        "created_time": "2026-02-28T12:00:00.000Z",
        "last_edited_time": "2026-03-01T09:50:00.000Z",
        "url": "https://www.notion.so/Project-Roadmap-page1",
        "properties": {
            "Name": {
                "id": "title",
                "type": "title",
                "title": [{"type": "text", "plain_text": "Project Roadmap"}]
            }
        }
    }"#;

    #[test]
    fn page_title_comes_from_title_property() {
        let object: NotionObject = serde_json::from_str(PAGE_JSON).unwrap();
        assert_eq!(object.display_title(), "Project Roadmap");
        assert_eq!(object.icon_hint(), "doc.text");
    }

    #[test]
    fn database_title_falls_back_to_top_level() {
        let object: NotionObject = serde_json::from_str(
            r#"{
                "id": "db-1",
                "object": "database",
                "last_edited_time": "2026-03-01T09:50:00Z",
                "title": [{"plain_text": "Tasks"}]
            }"#,
        )
        .unwrap();
        assert_eq!(object.display_title(), "Tasks");
        assert_eq!(object.icon_hint(), "tablecells");
    }

    #[test]
    fn untitled_when_no_title_anywhere() {
        let object: NotionObject = serde_json::from_str(
            r#"{"id": "p2", "object": "page", "last_edited_time": "2026-03-01T09:50:00Z"}"#,
        )
        .unwrap();
        assert_eq!(object.display_title(), "Untitled");
    }

    #[test]
    fn mapping_prefixes_id_and_uses_relative_subtitle() {
        let object: NotionObject = serde_json::from_str(PAGE_JSON).unwrap();
        let now = parse_timestamp("2026-03-01T10:00:00Z").unwrap();
        let n = map_object(object, now);
        assert_eq!(n.id, "notion-page-1");
        assert_eq!(n.subtitle, "Updated 10m ago");
        assert_eq!(n.priority, Priority::Normal);
        assert!(n.url.unwrap().as_str().contains("notion.so"));
    }

    #[test]
    fn relative_ages_step_through_units() {
        let now = Utc::now();
        assert_eq!(format_relative(now - Duration::seconds(10), now), "Updated just now");
        assert_eq!(format_relative(now - Duration::minutes(5), now), "Updated 5m ago");
        assert_eq!(format_relative(now - Duration::hours(3), now), "Updated 3h ago");
        assert_eq!(format_relative(now - Duration::days(2), now), "Updated 2d ago");
    }
}
