pub mod wppconnect;

use anyhow::Result;
use async_trait::async_trait;

/// Connection state reported by the chat session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The session finished connecting ("CONNECTED")
    Connected,
    /// Startup progress for an already paired session ("isLogged", "inChat")
    LoggedIn,
    /// Any other state, kept verbatim for logging
    Other(String),
}

impl ConnectionState {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "CONNECTED" => ConnectionState::Connected,
            "inChat" | "isLogged" => ConnectionState::LoggedIn,
            other => ConnectionState::Other(other.to_string()),
        }
    }

    /// Whether the session can report the bot's own address
    pub fn has_host(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::LoggedIn)
    }
}

/// Media attached to an inbound message. The bytes stay on the session side
/// until `Transport::decrypt_media` is called.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    /// Message type as reported by the session (e.g. "image", "ptt", "chat")
    pub kind: String,
    pub mimetype: Option<String>,
}

impl MediaInfo {
    pub fn is_image(&self) -> bool {
        self.kind == "image"
            || self
                .mimetype
                .as_deref()
                .is_some_and(|m| m.starts_with("image"))
    }
}

/// A message received from the chat session
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    /// Session-side message id, needed to fetch media
    pub id: String,
    /// Chat the message came from (user JID, or group JID for groups)
    pub from: String,
    /// Sender inside a group
    pub author: Option<String>,
    pub body: String,
    pub is_group: bool,
    pub is_status: bool,
    pub mentioned: Vec<String>,
    pub media: Option<MediaInfo>,
    /// The message quotes one previously sent by the bot
    pub replies_to_bot: bool,
}

/// Events pushed by the chat session
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Message(InboundEvent),
}

/// Send-side operations on the chat session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the session exists and can accept sends
    fn is_ready(&self) -> bool;

    async fn send_text(&self, recipient: &str, text: &str) -> Result<()>;

    /// `source` is either a remote URL or a local path
    async fn send_image(
        &self,
        recipient: &str,
        source: &str,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()>;

    /// The bot's own serialized address, if the session exposes one
    async fn host_identity(&self) -> Result<Option<String>>;

    async fn decrypt_media(&self, event: &InboundEvent) -> Result<Vec<u8>>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_states() {
        assert_eq!(ConnectionState::from_raw("CONNECTED"), ConnectionState::Connected);
        assert_eq!(ConnectionState::from_raw("inChat"), ConnectionState::LoggedIn);
        assert_eq!(ConnectionState::from_raw("isLogged"), ConnectionState::LoggedIn);
        assert!(ConnectionState::LoggedIn.has_host());
        assert!(!ConnectionState::Other("OPENING".to_string()).has_host());
        assert_eq!(
            ConnectionState::from_raw("UNPAIRED"),
            ConnectionState::Other("UNPAIRED".to_string())
        );
    }

    #[test]
    fn test_image_detection() {
        let by_kind = MediaInfo {
            kind: "image".to_string(),
            mimetype: None,
        };
        let by_mime = MediaInfo {
            kind: "sticker".to_string(),
            mimetype: Some("image/webp".to_string()),
        };
        let audio = MediaInfo {
            kind: "ptt".to_string(),
            mimetype: Some("audio/ogg; codecs=opus".to_string()),
        };
        assert!(by_kind.is_image());
        assert!(by_mime.is_image());
        assert!(!audio.is_image());
    }
}
