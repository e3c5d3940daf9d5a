use crate::channels::traits::{
    InboundMessage, MediaKind, MessagingClient, SessionDriver, SessionEvent,
};
use crate::config::WhatsAppConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// WhatsApp Business Cloud API client.
///
/// Inbound messages are webhook-driven (push); the gateway owns the webhook
/// routes and hands payloads to [`WhatsAppClient::parse_webhook_payload`].
/// The "session" is the authenticated business number: `initialize` checks
/// it against the Graph API and reports [`SessionEvent::Ready`], and a
/// rejected token while sending reports [`SessionEvent::AuthFailure`].
pub struct WhatsAppClient {
    api_base_url: String,
    access_token: String,
    phone_number_id: String,
    verify_token: String,
    client: reqwest::Client,
    events: mpsc::Sender<SessionEvent>,
    active: AtomicBool,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig, events: mpsc::Sender<SessionEvent>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            verify_token: config.verify_token.clone(),
            client,
            events,
            active: AtomicBool::new(false),
        }
    }

    pub fn verify_token(&self) -> &str {
        &self.verify_token
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn ensure_credentials(&self) -> anyhow::Result<()> {
        if self.access_token.trim().is_empty() {
            anyhow::bail!("whatsapp access token is empty");
        }
        if self.phone_number_id.trim().is_empty() {
            anyhow::bail!("whatsapp phone_number_id is empty");
        }
        Ok(())
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("session event receiver gone");
        }
    }

    /// Parse a Cloud API webhook payload into inbound messages.
    ///
    /// Status callbacks and entries without a sender are skipped. Media
    /// messages keep their caption (if any) as text.
    #[must_use]
    pub fn parse_webhook_payload(&self, payload: &serde_json::Value) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let Some(entries) = payload.get("entry").and_then(serde_json::Value::as_array) else {
            return inbound;
        };

        for entry in entries {
            let Some(changes) = entry.get("changes").and_then(serde_json::Value::as_array) else {
                continue;
            };

            for change in changes {
                let Some(messages) = change
                    .get("value")
                    .and_then(|v| v.get("messages"))
                    .and_then(serde_json::Value::as_array)
                else {
                    continue;
                };

                for msg in messages {
                    if let Some(message) = parse_message(msg) {
                        inbound.push(message);
                    }
                }
            }
        }

        inbound
    }
}

fn parse_message(msg: &serde_json::Value) -> Option<InboundMessage> {
    let str_field = |v: &serde_json::Value, key: &str| {
        v.get(key)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_owned()
    };

    let from = str_field(msg, "from");
    if from.is_empty() {
        return None;
    }
    let kind = str_field(msg, "type");
    let media = MediaKind::from_channel_type(&kind);

    let text = match media {
        None => msg
            .get("text")
            .map(|t| str_field(t, "body"))
            .unwrap_or_default(),
        Some(_) => msg
            .get(kind.as_str())
            .map(|m| str_field(m, "caption"))
            .unwrap_or_default(),
    };
    if text.is_empty() && media.is_none() {
        return None;
    }

    let mut message = match media {
        Some(kind) => InboundMessage::media(from, kind, text),
        None => InboundMessage::text(from, text),
    };
    let id = str_field(msg, "id");
    if !id.is_empty() {
        message = message.with_id(id);
    }
    Some(message)
}

#[async_trait]
impl MessagingClient for WhatsAppClient {
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()> {
        self.ensure_credentials()?;

        let to = to.strip_prefix('+').unwrap_or(to);
        let url = format!("{}/{}/messages", self.api_base_url, self.phone_number_id);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED && self.active.swap(false, Ordering::AcqRel) {
            warn!("whatsapp rejected the access token");
            self.emit(SessionEvent::AuthFailure(format!("send rejected ({status})")))
                .await;
        }
        anyhow::bail!("whatsapp send failed ({status}): {body}");
    }
}

#[async_trait]
impl SessionDriver for WhatsAppClient {
    fn id(&self) -> &'static str {
        "whatsapp"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.ensure_credentials()?;

        let url = format!("{}/{}", self.api_base_url, self.phone_number_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("whatsapp session check failed ({status}): {body}");
        }

        self.active.store(true, Ordering::Release);
        info!(phone_number_id = %self.phone_number_id, "whatsapp session ready");
        self.emit(SessionEvent::Ready).await;
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("whatsapp session closed");
        }
        Ok(())
    }
}
