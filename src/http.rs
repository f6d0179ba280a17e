//! Bearer-authenticated JSON helpers shared by the provider adapters.
//!
//! 401 is surfaced as its own error (a stale-token signal the caller
//! must not retry within the round); other non-2xx statuses carry a
//! truncated body snippet for diagnosability. No retry machinery here;
//! the poll cycle is the retry.

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::sources::SourceError;

const USER_AGENT: &str = "WorkBar/0.1";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const BODY_SNIPPET_CHARS: usize = 200;

/// Build the shared HTTP client. Construction only fails on broken TLS
/// backends, in which case a default client is still usable.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

/// Truncate a response body for error messages.
pub fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: Url,
    bearer_token: &str,
    headers: &[(&str, &str)],
) -> Result<T, SourceError> {
    let mut request = client.get(url).bearer_auth(bearer_token);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    decode(request.send().await?).await
}

pub async fn post_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: Url,
    bearer_token: &str,
    body: &impl Serialize,
    headers: &[(&str, &str)],
) -> Result<T, SourceError> {
    let mut request = client.post(url).bearer_auth(bearer_token).json(body);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    decode(request.send().await?).await
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SourceError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SourceError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::UpstreamStatus {
            status: status.as_u16(),
            body: snippet(&body),
        });
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| SourceError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_caps_at_200_chars() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), 200);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let body = "é".repeat(300);
        let cut = snippet(&body);
        assert_eq!(cut.chars().count(), 200);
    }
}
