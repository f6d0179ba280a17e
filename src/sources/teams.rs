//! Microsoft Teams adapter: recent chats via Microsoft Graph, with the
//! last message of each surfaced as one notification.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use super::{parse_timestamp, NotificationSource, SourceError};
use crate::http;
use crate::oauth::{OAuthEngine, ProviderConfig};
use crate::types::{Notification, Priority, Provider};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const CHAT_LIMIT: usize = 7;
const PREVIEW_CHARS: usize = 100;

pub struct TeamsSource {
    oauth: Arc<OAuthEngine>,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl TeamsSource {
    pub fn new(oauth: Arc<OAuthEngine>, config: ProviderConfig) -> Self {
        Self {
            oauth,
            config,
            client: http::client(),
        }
    }
}

#[async_trait]
impl NotificationSource for TeamsSource {
    fn provider(&self) -> Provider {
        Provider::Teams
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SourceError> {
        let token = self.oauth.get_valid_access_token(&self.config).await?;

        let chats_url = Url::parse_with_params(
            &format!("{GRAPH_BASE}/me/chats"),
            &[
                ("$top", "10"),
                ("$orderby", "lastMessagePreview/createdDateTime desc"),
            ],
        )
        .map_err(|_| SourceError::Api("Invalid Graph chats URL".to_string()))?;
        let chats: GraphResponse<GraphChat> =
            http::get_json(&self.client, chats_url, &token, &[]).await?;

        let mut notifications = Vec::new();
        for chat in chats.value.into_iter().take(CHAT_LIMIT) {
            // Skip chats whose message fetch fails
            match self.fetch_last_message(&token, &chat.id).await {
                Ok(Some(message)) => notifications.push(map_message(&chat, message)),
                Ok(None) => {}
                Err(e) => {
                    log::debug!("skipping chat {}: {e}", chat.id);
                }
            }
        }

        notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(notifications)
    }
}

impl TeamsSource {
    async fn fetch_last_message(
        &self,
        token: &str,
        chat_id: &str,
    ) -> Result<Option<GraphChatMessage>, SourceError> {
        let url = Url::parse_with_params(
            &format!("{GRAPH_BASE}/me/chats/{chat_id}/messages"),
            &[("$top", "1"), ("$orderby", "createdDateTime desc")],
        )
        .map_err(|_| SourceError::Api("Invalid Graph messages URL".to_string()))?;
        let messages: GraphResponse<GraphChatMessage> =
            http::get_json(&self.client, url, token, &[]).await?;

        Ok(messages
            .value
            .into_iter()
            .next()
            .filter(|m| m.message_type.as_deref() != Some("systemEventMessage")))
    }
}

fn map_message(chat: &GraphChat, message: GraphChatMessage) -> Notification {
    let timestamp = parse_timestamp(&message.created_date_time).unwrap_or_else(Utc::now);
    let body: String = message.plain_text_body().chars().take(PREVIEW_CHARS).collect();
    Notification {
        id: format!("teams-{}-{}", chat.id, message.id),
        provider: Provider::Teams,
        title: chat.display_topic(),
        subtitle: message.sender_name(),
        body,
        timestamp,
        url: message.web_url.as_deref().and_then(|u| Url::parse(u).ok()),
        is_pinned: false,
        icon: "bubble.left.and.bubble.right".to_string(),
        priority: Priority::Normal,
    }
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("<[^>]+>").unwrap())
}

// ============================================================================
// Graph API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct GraphResponse<T> {
    #[serde(default)]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphChat {
    id: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    chat_type: Option<String>,
}

impl GraphChat {
    fn display_topic(&self) -> String {
        match &self.topic {
            Some(topic) if !topic.is_empty() => topic.clone(),
            _ if self.chat_type.as_deref() == Some("oneOnOne") => "Direct Message".to_string(),
            _ => "Group Chat".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphChatMessage {
    id: String,
    created_date_time: String,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    body: Option<GraphMessageBody>,
    #[serde(default)]
    from: Option<GraphFrom>,
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessageBody {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphFrom {
    #[serde(default)]
    user: Option<GraphUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    #[serde(default)]
    display_name: Option<String>,
}

impl GraphChatMessage {
    fn sender_name(&self) -> String {
        self.from
            .as_ref()
            .and_then(|f| f.user.as_ref())
            .and_then(|u| u.display_name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    fn plain_text_body(&self) -> String {
        let Some(body) = &self.body else {
            return String::new();
        };
        let Some(content) = &body.content else {
            return String::new();
        };
        if body.content_type.as_deref() == Some("html") {
            tag_pattern().replace_all(content, "").trim().to_string()
        } else {
            content.trim().to_string()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
