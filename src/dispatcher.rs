use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::platform::Transport;

/// Raw callback body posted by the backend to `/process-response`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessResponseRequest {
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub conteudo: Option<String>,
    #[serde(default)]
    pub fotos: Option<Vec<String>>,
    #[serde(default)]
    pub legenda: Option<String>,
}

/// A validated backend reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text {
        recipient: String,
        content: String,
    },
    Photos {
        recipient: String,
        photo_refs: Vec<String>,
        caption: Option<String>,
    },
    /// A `tipo` this bridge does not know; accepted and ignored
    Unsupported { recipient: String, kind: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("WhatsApp session is not ready")]
    TransportNotReady,
    #[error("recipient_phone is missing")]
    MissingRecipient,
    /// The named field is required for the reply's `tipo`
    #[error("{0} is missing")]
    MissingContent(&'static str),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("failed to deliver message to {recipient}: {reason}")]
    DeliveryFailed { recipient: String, reason: String },
}

/// What a dispatch actually sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

impl ProcessResponseRequest {
    pub fn into_payload(self) -> Result<OutboundPayload, DispatchError> {
        let recipient = self
            .recipient_phone
            .filter(|r| !r.trim().is_empty())
            .ok_or(DispatchError::MissingRecipient)?;

        match self.tipo.as_deref() {
            Some("texto") => Ok(OutboundPayload::Text {
                recipient,
                content: self.conteudo.ok_or(DispatchError::MissingContent("conteudo"))?,
            }),
            Some("fotos") => Ok(OutboundPayload::Photos {
                recipient,
                photo_refs: self.fotos.ok_or(DispatchError::MissingContent("fotos"))?,
                caption: self.legenda,
            }),
            other => Ok(OutboundPayload::Unsupported {
                recipient,
                kind: other.unwrap_or_default().to_string(),
            }),
        }
    }
}

/// Delivers backend replies onto the chat session.
pub struct OutboundDispatcher {
    transport: Arc<dyn Transport>,
    image_filename: String,
}

impl OutboundDispatcher {
    pub fn new(transport: Arc<dyn Transport>, image_filename: impl Into<String>) -> Self {
        Self {
            transport,
            image_filename: image_filename.into(),
        }
    }

    /// Validate and deliver one backend callback. Readiness is checked before
    /// the payload so a not-ready session never looks like a bad request.
    pub async fn dispatch(
        &self,
        request: ProcessResponseRequest,
    ) -> Result<DispatchReport, DispatchError> {
        if !self.transport.is_ready() {
            error!("Backend reply received but the session is not ready");
            return Err(DispatchError::TransportNotReady);
        }

        let payload = request.into_payload().inspect_err(|e| {
            error!("Rejecting backend reply: {}", e);
        })?;

        match payload {
            OutboundPayload::Text { recipient, content } => {
                self.send_text(&recipient, &content).await
            }
            OutboundPayload::Photos {
                recipient,
                photo_refs,
                caption,
            } => Ok(self
                .send_photos(&recipient, &photo_refs, caption.as_deref())
                .await),
            OutboundPayload::Unsupported { recipient, kind } => {
                warn!("Unknown reply type '{}' for {}, nothing sent", kind, recipient);
                Ok(DispatchReport::default())
            }
        }
    }

    async fn send_text(
        &self,
        recipient: &str,
        content: &str,
    ) -> Result<DispatchReport, DispatchError> {
        match self.transport.send_text(recipient, content).await {
            Ok(()) => {
                info!("Text reply sent to {}", recipient);
                Ok(DispatchReport { sent: 1, failed: 0 })
            }
            Err(e) => {
                error!("Failed to send text to {}: {:#}", recipient, e);
                Err(DispatchError::DeliveryFailed {
                    recipient: recipient.to_string(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    /// Best effort: each photo gets one retry, failures are skipped.
    async fn send_photos(
        &self,
        recipient: &str,
        photo_refs: &[String],
        caption: Option<&str>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for photo in photo_refs {
            let first = self
                .transport
                .send_image(recipient, photo, &self.image_filename, caption)
                .await;

            let result = match first {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!("Failed to send image {} to {}: {:#}, retrying", photo, recipient, e);
                    self.transport
                        .send_image(recipient, photo, &self.image_filename, caption)
                        .await
                }
            };

            match result {
                Ok(()) => {
                    info!("Image {} sent to {}", photo, recipient);
                    report.sent += 1;
                }
                Err(e) => {
                    error!("Skipping image {} for {}: {:#}", photo, recipient, e);
                    report.failed += 1;
                }
            }
        }

        if photo_refs.is_empty() {
            warn!("Photo reply for {} carried no photos", recipient);
        } else if report.failed > 0 {
            warn!(
                "Partial delivery to {}: {} of {} photos sent",
                recipient,
                report.sent,
                photo_refs.len()
            );
        }

        report
    }
}
