use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::platform::{InboundEvent, Transport};

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Body POSTed to the backend webhook for every accepted message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardRequest {
    pub from: String,
    pub body: String,
    #[serde(rename = "isGroupMsg")]
    pub is_group_msg: bool,
    pub author: String,
    #[serde(rename = "mentionedJidList")]
    pub mentioned_jid_list: Vec<String>,
    #[serde(rename = "isBotMentioned")]
    pub is_bot_mentioned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}

impl ForwardRequest {
    pub fn from_event(event: &InboundEvent, identity: Option<&str>) -> Self {
        let is_bot_mentioned =
            identity.is_some_and(|id| event.mentioned.iter().any(|m| m == id));
        Self {
            from: event.from.clone(),
            body: event.body.clone(),
            is_group_msg: event.is_group,
            author: event.author.clone().unwrap_or_else(|| event.from.clone()),
            mentioned_jid_list: event.mentioned.clone(),
            is_bot_mentioned,
            media_base64: None,
            mimetype: None,
        }
    }

    fn attach_media(&mut self, mimetype: &str, bytes: &[u8]) {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.media_base64 = Some(format!("data:{};base64,{}", mimetype, encoded));
        self.mimetype = Some(mimetype.to_string());
    }
}

/// Where forward requests are delivered
#[async_trait]
pub trait BackendSink: Send + Sync {
    async fn post(&self, url: &str, request: &ForwardRequest) -> Result<()>;
}

/// Backend reached over plain HTTP
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .context("Failed to build backend HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BackendSink for HttpBackend {
    async fn post(&self, url: &str, request: &ForwardRequest) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Backend error ({}): {}", status, error_body);
        }
        Ok(())
    }
}

struct CannedReply {
    pattern: Regex,
    reply: &'static str,
}

/// Keyword categories, checked in order; the first match wins.
const CANNED_REPLY_TABLE: &[(&str, &str)] = &[
    (
        r"nfc|aproximação|apple pay|google pay|samsung pay",
        "Confiro NFC por modelo específico. Me diz o modelo (ex.: iPhone 15 Pro, Galaxy A54).",
    ),
    (
        r"dual sim|dois chips|2 chips|esim|e-sim",
        "Dual SIM/eSIM depende da variante. Me diz o modelo para confirmar.",
    ),
    (
        r"câmera|camera|foto|imagens",
        "Te passo qualidade real de câmera por modelo. Qual aparelho você quer?",
    ),
    (
        r"preço|valor|custa|parcelar|parcelamento",
        "Te passo preço real de mercado e opções. Qual modelo você está vendo?",
    ),
];

const GENERIC_REPLY: &str = "Estou aqui. Me diz o modelo exato para te responder com dados reais.";

/// Local replies used when the backend cannot be reached at all
pub struct CannedReplies {
    categories: Vec<CannedReply>,
}

impl CannedReplies {
    pub fn new() -> Result<Self> {
        let categories = CANNED_REPLY_TABLE
            .iter()
            .map(|&(pattern, reply)| {
                Ok(CannedReply {
                    pattern: Regex::new(&format!("(?i){}", pattern))
                        .with_context(|| format!("Invalid canned reply pattern: {}", pattern))?,
                    reply,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { categories })
    }

    pub fn select(&self, body: &str) -> &'static str {
        self.categories
            .iter()
            .find(|c| c.pattern.is_match(body))
            .map(|c| c.reply)
            .unwrap_or(GENERIC_REPLY)
    }
}

/// How a forward pipeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Delivered,
    DeliveredViaFallback,
    CannedReply,
    /// Nothing reached the backend and no local reply was sent
    Dropped,
}

/// Sends accepted messages to the backend: primary, one retry after a fixed
/// delay, then the fallback endpoint. Direct chats get a canned reply when
/// all three attempts fail.
pub struct InboundForwarder {
    backend: Arc<dyn BackendSink>,
    transport: Arc<dyn Transport>,
    primary_url: String,
    fallback_url: String,
    retry_delay: Duration,
    canned: CannedReplies,
}

impl InboundForwarder {
    pub fn new(
        config: &BackendConfig,
        backend: Arc<dyn BackendSink>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            transport,
            primary_url: config.primary_url.clone(),
            fallback_url: config.fallback_url.clone(),
            retry_delay: config.retry_delay(),
            canned: CannedReplies::new()?,
        })
    }

    async fn build_request(&self, event: &InboundEvent, identity: Option<&str>) -> ForwardRequest {
        let mut request = ForwardRequest::from_event(event, identity);

        let Some(media) = event.media.as_ref().filter(|m| m.is_image()) else {
            return request;
        };

        match self.transport.decrypt_media(event).await {
            Ok(bytes) => {
                let mimetype = media.mimetype.as_deref().unwrap_or(DEFAULT_IMAGE_MIME);
                debug!("Attached {} bytes of {} from {}", bytes.len(), mimetype, event.from);
                request.attach_media(mimetype, &bytes);
            }
            Err(e) => {
                warn!("Failed to fetch media for message {}: {:#}", event.id, e);
            }
        }
        request
    }

    /// Deliver with primary → retry → fallback. Attempts run strictly in sequence.
    async fn deliver(&self, request: &ForwardRequest) -> Result<ForwardOutcome> {
        match self.backend.post(&self.primary_url, request).await {
            Ok(()) => {
                info!("Forwarded message from {} to {}", request.from, self.primary_url);
                return Ok(ForwardOutcome::Delivered);
            }
            Err(e) => error!("Primary forward to {} failed: {:#}", self.primary_url, e),
        }

        tokio::time::sleep(self.retry_delay).await;

        match self.backend.post(&self.primary_url, request).await {
            Ok(()) => {
                info!("Retry to {} succeeded for {}", self.primary_url, request.from);
                return Ok(ForwardOutcome::Delivered);
            }
            Err(e) => error!("Retry to {} failed: {:#}", self.primary_url, e),
        }

        warn!("Trying fallback endpoint {}", self.fallback_url);
        self.backend
            .post(&self.fallback_url, request)
            .await
            .with_context(|| format!("Fallback forward to {} failed", self.fallback_url))?;
        info!("Forwarded message from {} via fallback {}", request.from, self.fallback_url);
        Ok(ForwardOutcome::DeliveredViaFallback)
    }

    /// Run the forward pipeline for one accepted event. Never fails.
    pub async fn forward(&self, event: &InboundEvent, identity: Option<&str>) -> ForwardOutcome {
        let request = self.build_request(event, identity).await;

        let err = match self.deliver(&request).await {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };

        error!("Could not forward message from {}: {:#}", event.from, err);

        if event.is_group {
            warn!("Group {} gets no local reply", event.from);
            return ForwardOutcome::Dropped;
        }

        let reply = self.canned.select(&event.body);
        match self.transport.send_text(&event.from, reply).await {
            Ok(()) => {
                info!("Sent canned reply to {}", event.from);
                ForwardOutcome::CannedReply
            }
            Err(e) => {
                error!("Failed to send canned reply to {}: {:#}", event.from, e);
                ForwardOutcome::Dropped
            }
        }
    }
}
