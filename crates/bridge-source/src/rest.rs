//! Thin REST layer over the source platform's HTTP API: the subset this
//! bridge needs for token validation, guild/channel discovery, and recent
//! message pulls.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const MESSAGE_CONTENT_INTENT_BIT: u64 = 1 << 18;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status} from {path}")]
    Status { status: u16, path: String },
    #[error("MESSAGE_CONTENT intent is not enabled for this token")]
    MissingIntent,
    #[error("token has no guilds")]
    NoGuilds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub flags: u64,
}

impl UserInfo {
    pub fn has_message_content_intent(&self) -> bool {
        self.flags & MESSAGE_CONTENT_INTENT_BIT != 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl ChannelSummary {
    /// Text (0) and announcement (5) channels are the only ones this bridge
    /// mirrors.
    pub fn is_candidate_type(&self) -> bool {
        matches!(self.kind, 0 | 5)
    }

    /// `*announce*`/`*news*` anywhere in the lowercased name, or a trailing
    /// `announcement`/`announcements`.
    pub fn name_matches_announcement_pattern(&self) -> bool {
        let lower = self.name.to_lowercase();
        lower.contains("announce")
            || lower.contains("news")
            || lower.ends_with("announcement")
            || lower.ends_with("announcements")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAuthor {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub content: String,
    pub timestamp: String,
    pub author: RawAuthor,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayUrl {
    url: String,
}

/// One authenticated REST session. `Clone`-free by design: callers share it
/// behind an `Arc`.
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(token: &str) -> Result<Self, RestError> {
        Self::with_base_url(token, "https://discord.com/api/v9")
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, RestError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(token)
                .map_err(|_| RestError::Status { status: 0, path: "auth header".to_string() })?,
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, RestError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Validates the token: `GET /users/@me` then checks the MESSAGE_CONTENT
    /// intent bit.
    pub async fn validate(&self) -> Result<UserInfo, RestError> {
        let user: UserInfo = self.get_json("/users/@me").await?;
        if !user.has_message_content_intent() {
            return Err(RestError::MissingIntent);
        }
        Ok(user)
    }

    pub async fn my_guilds(&self) -> Result<Vec<GuildSummary>, RestError> {
        let guilds: Vec<GuildSummary> = self.get_json("/users/@me/guilds").await?;
        if guilds.is_empty() {
            return Err(RestError::NoGuilds);
        }
        Ok(guilds)
    }

    pub async fn guild_channels(&self, guild_id: &str) -> Result<Vec<ChannelSummary>, RestError> {
        self.get_json(&format!("/guilds/{guild_id}/channels")).await
    }

    /// Probes accessibility by fetching a single message; any successful
    /// response (including an empty channel) counts as accessible.
    pub async fn probe_channel(&self, channel_id: &str) -> bool {
        self.get_json::<Vec<RawMessage>>(&format!("/channels/{channel_id}/messages?limit=1"))
            .await
            .is_ok()
    }

    /// Newest-first, exactly as the source returns it. Callers needing
    /// ascending order sort afterwards; callers needing "last message time"
    /// read index 0 of this raw vector first.
    pub async fn channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<RawMessage>, RestError> {
        self.get_json(&format!("/channels/{channel_id}/messages?limit={limit}"))
            .await
    }

    pub async fn gateway_url(&self) -> Result<String, RestError> {
        let resp: GatewayUrl = self.get_json("/gateway").await?;
        Ok(resp.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_bit_detection() {
        let with_intent = UserInfo {
            username: "bot".to_string(),
            flags: 1 << 18,
        };
        assert!(with_intent.has_message_content_intent());

        let without = UserInfo {
            username: "bot".to_string(),
            flags: 0,
        };
        assert!(!without.has_message_content_intent());
    }

    #[test]
    fn announcement_name_matching() {
        let a = ChannelSummary {
            id: "1".into(),
            name: "server-announcements".into(),
            kind: 0,
            parent_id: None,
        };
        assert!(a.name_matches_announcement_pattern());

        let b = ChannelSummary {
            id: "2".into(),
            name: "weekly-news".into(),
            kind: 0,
            parent_id: None,
        };
        assert!(b.name_matches_announcement_pattern());

        let c = ChannelSummary {
            id: "3".into(),
            name: "general".into(),
            kind: 0,
            parent_id: None,
        };
        assert!(!c.name_matches_announcement_pattern());
    }

    #[test]
    fn candidate_type_excludes_voice_and_category() {
        let voice = ChannelSummary {
            id: "1".into(),
            name: "announcements".into(),
            kind: 2,
            parent_id: None,
        };
        assert!(!voice.is_candidate_type());
    }

    #[tokio::test]
    async fn validate_rejects_missing_intent() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "username": "bot",
                "flags": 0,
            })))
            .mount(&server)
            .await;

        let client = RestClient::with_base_url("token-a", &server.uri()).unwrap();
        let err = client.validate().await.unwrap_err();
        assert!(matches!(err, RestError::MissingIntent));
    }

    #[tokio::test]
    async fn validate_accepts_intent_bit() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "username": "bot",
                "flags": 1u64 << 18,
            })))
            .mount(&server)
            .await;

        let client = RestClient::with_base_url("token-a", &server.uri()).unwrap();
        let user = client.validate().await.unwrap();
        assert_eq!(user.username, "bot");
    }

    #[tokio::test]
    async fn my_guilds_rejects_empty_array() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/guilds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = RestClient::with_base_url("token-a", &server.uri()).unwrap();
        let err = client.my_guilds().await.unwrap_err();
        assert!(matches!(err, RestError::NoGuilds));
    }

    #[tokio::test]
    async fn channel_messages_propagates_status_errors() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/555/messages"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = RestClient::with_base_url("token-a", &server.uri()).unwrap();
        let err = client.channel_messages("555", 10).await.unwrap_err();
        assert!(matches!(err, RestError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn gateway_url_parses_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "wss://gateway.example.com",
            })))
            .mount(&server)
            .await;

        let client = RestClient::with_base_url("token-a", &server.uri()).unwrap();
        let url = client.gateway_url().await.unwrap();
        assert_eq!(url, "wss://gateway.example.com");
    }
}
