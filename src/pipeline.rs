use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::addressing::AddressingClassifier;
use crate::forwarder::{ForwardOutcome, InboundForwarder};
use crate::identity::IdentityTracker;
use crate::platform::{ConnectionState, InboundEvent, Transport, TransportEvent};

/// Sent to an operator address each time the session reports CONNECTED
#[derive(Debug, Clone)]
pub struct ConnectNotice {
    pub recipient: String,
    pub text: String,
}

/// Routes session events: state changes update the bot identity, messages
/// go through classifier → forwarder on their own task.
pub struct Pipeline {
    identity: Arc<IdentityTracker>,
    classifier: AddressingClassifier,
    forwarder: InboundForwarder,
    transport: Arc<dyn Transport>,
    notice: Option<ConnectNotice>,
    /// `None` means unbounded
    limit: Option<Arc<Semaphore>>,
}

impl Pipeline {
    pub fn new(
        identity: Arc<IdentityTracker>,
        classifier: AddressingClassifier,
        forwarder: InboundForwarder,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            identity,
            classifier,
            forwarder,
            transport,
            notice: None,
            limit: None,
        }
    }

    pub fn with_connect_notice(mut self, notice: Option<ConnectNotice>) -> Self {
        self.notice = notice;
        self
    }

    /// Bound the number of forward pipelines running at once. 0 = unbounded.
    pub fn with_max_concurrent_forwards(mut self, max: usize) -> Self {
        self.limit = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        self
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.resolve()
    }

    /// Entry point for session events. Every event runs on its own task so
    /// the session webhook is answered without waiting on sends.
    pub fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        let pipeline = Arc::clone(self);
        match event {
            TransportEvent::StateChanged(state) => {
                tokio::spawn(async move {
                    pipeline.on_state_change(state).await;
                });
            }
            TransportEvent::Message(message) => {
                tokio::spawn(async move {
                    pipeline.process_message(message).await;
                });
            }
        }
    }

    /// Logged-in states refresh the bot id; only CONNECTED sends the notice.
    pub async fn on_state_change(&self, state: ConnectionState) {
        info!("Session state: {:?}", state);
        if !state.has_host() {
            return;
        }

        match self.transport.host_identity().await {
            Ok(Some(id)) => self.identity.set(id),
            Ok(None) => warn!("Connected, but the session exposes no bot id"),
            Err(e) => error!("Failed to read bot id: {:#}", e),
        }

        if state != ConnectionState::Connected {
            return;
        }

        if let Some(notice) = &self.notice {
            match self.transport.send_text(&notice.recipient, &notice.text).await {
                Ok(()) => info!("Connect notice sent to {}", notice.recipient),
                Err(e) => warn!("Failed to send connect notice to {}: {:#}", notice.recipient, e),
            }
        }
    }

    /// Run one message through the classifier and, if accepted, the forwarder.
    /// Returns `None` when the message was not for the bot.
    pub async fn process_message(&self, event: InboundEvent) -> Option<ForwardOutcome> {
        let identity = self.identity.resolve();

        if event.is_group && identity.is_none() {
            debug!("Bot id unknown; group addressing falls back to mentions and names");
        }

        if !self.classifier.should_process(&event, identity.as_deref()) {
            debug!("Ignoring message {} from {}", event.id, event.from);
            return None;
        }

        info!(
            "Message from {}{}: {}",
            event.from,
            event
                .author
                .as_deref()
                .map(|a| format!(" ({})", a))
                .unwrap_or_default(),
            event.body
        );

        // Held for the whole forward, including retries
        let _permit = match &self.limit {
            Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    error!("Forward limiter closed: {}", e);
                    return None;
                }
            },
            None => None,
        };

        Some(self.forwarder.forward(&event, identity.as_deref()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::testing::{backend_config, ScriptedBackend};
    use crate::platform::testing::{RecordingTransport, Sent};

    fn build(
        backend: ScriptedBackend,
    ) -> (Pipeline, Arc<ScriptedBackend>, Arc<RecordingTransport>) {
        let backend = Arc::new(backend);
        let transport = Arc::new(RecordingTransport::new());
        let forwarder =
            InboundForwarder::new(&backend_config(), backend.clone(), transport.clone()).unwrap();
        let classifier = AddressingClassifier::new(&["renato".to_string()]).unwrap();
        let pipeline = Pipeline::new(
            Arc::new(IdentityTracker::new()),
            classifier,
            forwarder,
            transport.clone(),
        );
        (pipeline, backend, transport)
    }

    fn direct(body: &str) -> InboundEvent {
        InboundEvent {
            id: "m1".to_string(),
            from: "5511@c.us".to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_backend_down_direct_chat_gets_price_reply() {
        let (pipeline, backend, transport) = build(ScriptedBackend::failing());

        let outcome = pipeline
            .process_message(direct("qual o preço do iphone 13"))
            .await;

        assert_eq!(outcome, Some(ForwardOutcome::CannedReply));
        assert_eq!(backend.calls().len(), 3);
        assert_eq!(
            transport.sent(),
            vec![Sent::Text {
                to: "5511@c.us".to_string(),
                text: "Te passo preço real de mercado e opções. Qual modelo você está vendo?"
                    .to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_unaddressed_group_message_not_forwarded() {
        let (pipeline, backend, _) = build(ScriptedBackend::new(&[]));
        let mut event = direct("bom dia grupo");
        event.is_group = true;
        event.from = "120363@g.us".to_string();

        assert_eq!(pipeline.process_message(event).await, None);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connected_state_sets_identity() {
        let (pipeline, _, transport) = build(ScriptedBackend::new(&[]));
        transport.set_host("bot@c.us");
        assert_eq!(pipeline.identity(), None);

        pipeline.on_state_change(ConnectionState::Connected).await;

        assert_eq!(pipeline.identity().as_deref(), Some("bot@c.us"));
        assert!(transport.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_other_state_leaves_identity_unset() {
        let (pipeline, _, transport) = build(ScriptedBackend::new(&[]));
        transport.set_host("bot@c.us");

        pipeline
            .on_state_change(ConnectionState::Other("OPENING".to_string()))
            .await;

        assert_eq!(pipeline.identity(), None);
    }

    #[tokio::test]
    async fn test_identity_survives_non_connected_state() {
        let (pipeline, _, transport) = build(ScriptedBackend::new(&[]));
        transport.set_host("bot@c.us");
        pipeline.on_state_change(ConnectionState::Connected).await;
        pipeline
            .on_state_change(ConnectionState::Other("DISCONNECTED".to_string()))
            .await;
        assert_eq!(pipeline.identity().as_deref(), Some("bot@c.us"));
    }

    #[tokio::test]
    async fn test_connect_notice_sent() {
        let (pipeline, _, transport) = build(ScriptedBackend::new(&[]));
        let pipeline = pipeline.with_connect_notice(Some(ConnectNotice {
                recipient: "admin@c.us".to_string(),
                text: "online".to_string(),
            }));

        pipeline.on_state_change(ConnectionState::Connected).await;

        assert_eq!(
            transport.sent(),
            vec![Sent::Text {
                to: "admin@c.us".to_string(),
                text: "online".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_logged_in_states_set_identity_without_notice() {
        let (pipeline, _, transport) = build(ScriptedBackend::new(&[]));
        transport.set_host("bot@c.us");
        let pipeline = pipeline.with_connect_notice(Some(ConnectNotice {
            recipient: "admin@c.us".to_string(),
            text: "online".to_string(),
        }));

        pipeline.on_state_change(ConnectionState::LoggedIn).await;
        pipeline.on_state_change(ConnectionState::LoggedIn).await;

        assert_eq!(pipeline.identity().as_deref(), Some("bot@c.us"));
        assert!(transport.attempts().is_empty());

        pipeline.on_state_change(ConnectionState::Connected).await;
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_identity_marks_bot_mention() {
        let (pipeline, backend, transport) = build(ScriptedBackend::new(&[]));
        transport.set_host("bot@c.us");
        pipeline.on_state_change(ConnectionState::Connected).await;

        let mut event = direct("@bot oi");
        event.is_group = true;
        event.from = "120363@g.us".to_string();
        event.mentioned = vec!["bot@c.us".to_string()];

        assert_eq!(
            pipeline.process_message(event).await,
            Some(ForwardOutcome::Delivered)
        );
        assert!(backend.calls()[0].1.is_bot_mentioned);
    }

    #[tokio::test]
    async fn test_bounded_forwards_still_complete() {
        let (pipeline, backend, _) = build(ScriptedBackend::new(&[]));
        let pipeline = Arc::new(pipeline.with_max_concurrent_forwards(1));

        let a = tokio::spawn({
            let p = Arc::clone(&pipeline);
            async move { p.process_message(direct("um")).await }
        });
        let b = tokio::spawn({
            let p = Arc::clone(&pipeline);
            async move { p.process_message(direct("dois")).await }
        });

        assert_eq!(a.await.unwrap(), Some(ForwardOutcome::Delivered));
        assert_eq!(b.await.unwrap(), Some(ForwardOutcome::Delivered));
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_handle_event_spawns_message_task() {
        let (pipeline, backend, _) = build(ScriptedBackend::new(&[]));
        let pipeline = Arc::new(pipeline);
        pipeline.handle_event(TransportEvent::Message(direct("oi")));

        for _ in 0..50 {
            if !backend.calls().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(backend.calls().len(), 1);
    }
}
