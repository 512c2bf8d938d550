use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::WppConnectConfig;
use crate::platform::{ConnectionState, InboundEvent, MediaInfo, Transport, TransportEvent};

/// Transport backed by a WPPConnect server's REST API.
pub struct WppConnectTransport {
    client: reqwest::Client,
    config: WppConnectConfig,
    ready: AtomicBool,
}

/// Split a JID into the phone/group id the REST API expects.
fn split_recipient(recipient: &str) -> (&str, bool) {
    match recipient.split_once('@') {
        Some((id, "g.us")) => (id, true),
        Some((id, _)) => (id, false),
        None => (recipient, false),
    }
}

impl WppConnectTransport {
    pub fn new(config: WppConnectConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            ready: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.session,
            path
        )
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach WPPConnect at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("WPPConnect {} error ({}): {}", path, status, error_body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse WPPConnect {} response", path))
    }

    /// Start (or attach to) the session and register our webhook.
    /// Marks the transport ready on success.
    pub async fn start_session(&self, webhook_url: &str) -> Result<()> {
        info!(
            "Starting WPPConnect session '{}' (webhook: {})",
            self.config.session, webhook_url
        );

        let response = self
            .post(
                "start-session",
                &json!({ "webhook": webhook_url, "waitQrCode": false }),
            )
            .await
            .context("Failed to start WPPConnect session")?;

        if let Some(status) = response.get("status").and_then(Value::as_str) {
            info!("WPPConnect session status: {}", status);
        }

        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transport for WppConnectTransport {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<()> {
        let (phone, is_group) = split_recipient(recipient);
        self.post(
            "send-message",
            &json!({ "phone": phone, "isGroup": is_group, "message": text }),
        )
        .await?;
        Ok(())
    }

    async fn send_image(
        &self,
        recipient: &str,
        source: &str,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        let (phone, is_group) = split_recipient(recipient);
        self.post(
            "send-image",
            &json!({
                "phone": phone,
                "isGroup": is_group,
                "path": source,
                "filename": filename,
                "caption": caption.unwrap_or_default(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn host_identity(&self) -> Result<Option<String>> {
        let url = self.url("host-device");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("Failed to reach WPPConnect at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("WPPConnect host-device error ({})", status);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse WPPConnect host-device response")?;

        Ok(host_id_from(&body))
    }

    async fn decrypt_media(&self, event: &InboundEvent) -> Result<Vec<u8>> {
        let response = self
            .post("download-media", &json!({ "messageId": event.id }))
            .await?;

        let encoded = response
            .get("base64")
            .and_then(Value::as_str)
            .context("download-media response has no base64 field")?;

        // Some server versions return a full data URL
        let encoded = encoded
            .split_once("base64,")
            .map(|(_, data)| data)
            .unwrap_or(encoded);

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("download-media returned invalid base64")
    }
}

fn host_id_from(body: &Value) -> Option<String> {
    let device = body.get("response").unwrap_or(body);
    ["/id/_serialized", "/wid/_serialized"]
        .iter()
        .find_map(|ptr| device.pointer(ptr).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

// ── Webhook payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
pub enum WebhookEvent {
    #[serde(rename = "onmessage")]
    Message(WppMessage),
    #[serde(rename = "onstatechange", alias = "status-find")]
    State(WppState),
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
pub struct WppState {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WppMessage {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    from: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_group_msg: bool,
    #[serde(default)]
    is_status: bool,
    #[serde(default)]
    mentioned_jid_list: Option<Vec<String>>,
    #[serde(default)]
    quoted_msg: Option<QuotedMsg>,
    #[serde(default)]
    is_media: bool,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    mimetype: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotedMsg {
    #[serde(default)]
    from_me: bool,
}

/// Message ids come either as a plain string or as `{ _serialized }`.
fn message_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other
            .get("_serialized")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

impl From<WppMessage> for InboundEvent {
    fn from(msg: WppMessage) -> Self {
        let media = msg.is_media.then(|| MediaInfo {
            kind: msg.kind.clone(),
            mimetype: msg.mimetype.clone(),
        });

        InboundEvent {
            id: message_id(&msg.id),
            from: msg.from,
            author: msg.author.filter(|a| !a.is_empty()),
            body: msg.body.unwrap_or_default(),
            is_group: msg.is_group_msg,
            is_status: msg.is_status,
            mentioned: msg.mentioned_jid_list.unwrap_or_default(),
            media,
            replies_to_bot: msg.quoted_msg.is_some_and(|q| q.from_me),
        }
    }
}

impl WebhookEvent {
    /// Convert into a transport event; `None` for events the bridge ignores.
    pub fn into_transport_event(self) -> Option<TransportEvent> {
        match self {
            WebhookEvent::Message(msg) => Some(TransportEvent::Message(msg.into())),
            WebhookEvent::State(WppState { state, status }) => state
                .or(status)
                .map(|raw| TransportEvent::StateChanged(ConnectionState::from_raw(&raw))),
            WebhookEvent::Ignored => None,
        }
    }
}
