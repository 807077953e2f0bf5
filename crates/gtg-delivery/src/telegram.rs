// telegram.rs — TelegramChannel: Telegram Bot API adapter.
//
// Outbound: `sendMessage` to one chat, with the failure mapped onto
// DeliveryErrorKind so the dispatcher can prune dead chats.
//
// Inbound: `getUpdates` long polling. Each text message becomes an
// InboundMessage and is pushed into the notifier's event stream, where it
// drives target registration and the /start and /status commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gtg_targets::TargetKind;

use crate::channel::{
    classify_failure, DeliveryChannel, DeliveryErrorKind, DeliveryResult, InboundMessage,
    MessageFormat, OutboundMessage,
};
use crate::error::DeliveryError;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, DeliveryError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(DeliveryError::InvalidResponse(
                "ok response without result".into(),
            )),
            (false, _) => Err(DeliveryError::Api {
                code: self.error_code,
                description: self.description.unwrap_or_default(),
            }),
        }
    }
}

/// The bot account, as reported by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    channel_post: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

impl Update {
    /// Convert to an InboundMessage. Updates without text (joins, photos,
    /// edits) are ignored.
    fn into_inbound(self) -> Option<InboundMessage> {
        let message = self.message.or(self.channel_post)?;
        let text = message.text?;
        let chat_kind = match message.chat.chat_type.as_str() {
            "private" => TargetKind::Direct,
            _ => TargetKind::Group,
        };
        let sender_id = message
            .from
            .map(|u| u.id)
            .unwrap_or(message.chat.id)
            .to_string();
        Some(InboundMessage {
            chat_id: message.chat.id.to_string(),
            chat_kind,
            chat_title: message.chat.title,
            sender_id,
            text,
        })
    }
}

/// Telegram Bot API delivery channel.
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
    channel_id: String,
}

impl TelegramChannel {
    /// Create a channel for the bot identified by `token`.
    ///
    /// `api_base` defaults to the public Bot API endpoint.
    pub fn new(token: impl Into<String>, api_base: Option<&str>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            token: token.into(),
            channel_id: "telegram".to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Check the token by asking who we are. Also sets the channel id used
    /// in logs to include the bot's username.
    pub async fn get_me(&mut self) -> Result<BotIdentity, DeliveryError> {
        let response: ApiResponse<BotIdentity> = self
            .client
            .get(self.method_url("getMe"))
            .timeout(SEND_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;
        let me = response.into_result()?;
        if let Some(username) = &me.username {
            self.channel_id = format!("telegram:@{}", username);
        }
        Ok(me)
    }

    /// Long-poll for new messages. Returns the inbound messages plus the
    /// offset to pass on the next call.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<(Vec<InboundMessage>, Option<i64>), DeliveryError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }

        let response: ApiResponse<Vec<Update>> = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&body)
            .timeout(Duration::from_secs(timeout_secs) + SEND_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;
        let updates = response.into_result()?;

        let next_offset = updates.iter().map(|u| u.update_id + 1).max().or(offset);
        let messages = updates.into_iter().filter_map(Update::into_inbound).collect();
        Ok((messages, next_offset))
    }

    /// Spawn a background task that polls for inbound messages forever and
    /// forwards them into `tx`. The task ends when the receiver is dropped;
    /// abort the handle to stop it earlier.
    pub fn spawn_inbound_poller<T>(
        self: Arc<Self>,
        timeout_secs: u64,
        tx: mpsc::Sender<T>,
    ) -> JoinHandle<()>
    where
        T: From<InboundMessage> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut offset = None;
            loop {
                match self.get_updates(offset, timeout_secs).await {
                    Ok((messages, next)) => {
                        offset = next;
                        for message in messages {
                            if tx.send(T::from(message)).await.is_err() {
                                tracing::debug!("inbound receiver dropped, stopping poller");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %self.channel_id, "polling for updates failed: {}", e);
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn deliver(&self, target_id: &str, message: &OutboundMessage) -> DeliveryResult {
        let mut body = json!({
            "chat_id": target_id,
            "text": message.text,
            "disable_web_page_preview": true,
        });
        if message.format == MessageFormat::Markdown {
            body["parse_mode"] = json!("Markdown");
        }

        let response = match self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return DeliveryResult::failed(DeliveryErrorKind::Transient, e.to_string());
            }
        };

        let status = response.status().as_u16();
        match response.json::<ApiResponse<serde_json::Value>>().await {
            Ok(api) if api.ok => DeliveryResult::delivered(),
            Ok(api) => {
                let description = api.description.unwrap_or_default();
                let kind = classify_failure(api.error_code.or(Some(status)), &description);
                DeliveryResult::failed(kind, description)
            }
            Err(e) => {
                let kind = classify_failure(Some(status), "");
                DeliveryResult::failed(kind, format!("HTTP {}: {}", status, e))
            }
        }
    }

    fn channel_id(&self) -> &str {
        &self.channel_id
    }
}
