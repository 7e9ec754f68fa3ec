//! Minimal Feishu open-platform REST client: tenant token, message create,
//! message reactions.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use relay_core::config::FeishuConfig;

use crate::domain::resolve_base_url;
use crate::error::FeishuError;

/// Refresh the tenant token this long before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Standard response envelope: `code == 0` means success.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, FeishuError> {
        if self.code != 0 {
            return Err(FeishuError::Api {
                code: self.code,
                msg: self.msg,
            });
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    expire: i64,
}

#[derive(Debug, Deserialize)]
struct ReactionData {
    #[serde(default)]
    reaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(default)]
    message_id: Option<String>,
}

pub struct FeishuApi {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    cached: RwLock<Option<CachedToken>>,
}

impl FeishuApi {
    pub fn new(base_url: impl Into<String>, app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn from_config(cfg: &FeishuConfig) -> Result<Self, FeishuError> {
        match (cfg.app_id.as_deref(), cfg.app_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Ok(Self::new(resolve_base_url(&cfg.domain), id, secret))
            }
            _ => Err(FeishuError::MissingCredentials),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Valid tenant access token, fetching a new one when the cached token is
    /// missing or close to expiry.
    pub async fn tenant_token(&self) -> Result<String, FeishuError> {
        let now = chrono::Utc::now().timestamp();
        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref().filter(|c| now + TOKEN_REFRESH_MARGIN_SECS < c.expires_at) {
                return Ok(c.token.clone());
            }
        }

        let mut cached = self.cached.write().await;
        let now = chrono::Utc::now().timestamp();
        if let Some(c) = cached.as_ref().filter(|c| now + TOKEN_REFRESH_MARGIN_SECS < c.expires_at) {
            return Ok(c.token.clone());
        }

        info!("fetching Feishu tenant access token");
        let resp: TenantTokenResponse = self
            .client
            .post(format!("{}/open-apis/auth/v3/tenant_access_token/internal", self.base_url))
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await?
            .json()
            .await?;
        if resp.code != 0 {
            return Err(FeishuError::Api {
                code: resp.code,
                msg: resp.msg,
            });
        }
        if resp.tenant_access_token.is_empty() {
            return Err(FeishuError::Parse("tenant_access_token missing".into()));
        }

        debug!(expire_secs = resp.expire, "tenant access token obtained");
        let token = resp.tenant_access_token;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: now + resp.expire,
        });
        Ok(token)
    }

    /// Post a new message into a chat. Returns the created message id.
    pub async fn create_message(
        &self,
        chat_id: &str,
        msg_type: &str,
        content: &str,
    ) -> Result<Option<String>, FeishuError> {
        let url = format!("{}/open-apis/im/v1/messages?receive_id_type=chat_id", self.base_url);
        let body = json!({ "receive_id": chat_id, "msg_type": msg_type, "content": content });
        let data: Option<MessageData> = self.call(self.client.post(url).json(&body)).await?;
        Ok(data.and_then(|d| d.message_id))
    }

    /// Add an emoji reaction to a message. Returns the reaction id.
    pub async fn add_reaction(
        &self,
        message_id: &str,
        emoji_type: &str,
    ) -> Result<Option<String>, FeishuError> {
        let url = format!("{}/open-apis/im/v1/messages/{message_id}/reactions", self.base_url);
        let body = json!({ "reaction_type": { "emoji_type": emoji_type } });
        let data: Option<ReactionData> = self.call(self.client.post(url).json(&body)).await?;
        Ok(data.and_then(|d| d.reaction_id))
    }

    pub async fn delete_reaction(&self, message_id: &str, reaction_id: &str) -> Result<(), FeishuError> {
        let url = format!(
            "{}/open-apis/im/v1/messages/{message_id}/reactions/{reaction_id}",
            self.base_url
        );
        let _: Option<serde_json::Value> = self.call(self.client.delete(url)).await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<Option<T>, FeishuError> {
        let token = self.tenant_token().await?;
        let resp = req.bearer_auth(token).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let parsed: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
            FeishuError::Parse(format!("HTTP {status}: {e}: {}", truncate(&text, 200)))
        })?;
        parsed.into_result()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
