use std::sync::RwLock;

use tracing::{info, warn};

/// The bot's own address on the chat session.
///
/// Unset until the session reports a connected state. A later `set` replaces
/// the value; nothing ever clears it, including reconnects.
#[derive(Debug, Default)]
pub struct IdentityTracker {
    inner: RwLock<Option<String>>,
}

impl IdentityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, identity: impl Into<String>) {
        let identity = identity.into();
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match guard.as_deref() {
            Some(current) if current != identity => {
                warn!("Bot identity changed from {} to {}", current, identity);
            }
            Some(_) => {}
            None => info!("Bot identity resolved: {}", identity),
        }
        *guard = Some(identity);
    }

    /// Current identity, `None` until the session has connected.
    pub fn resolve(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_before_set() {
        let tracker = IdentityTracker::new();
        assert_eq!(tracker.resolve(), None);
    }

    #[test]
    fn test_set_then_resolve() {
        let tracker = IdentityTracker::new();
        tracker.set("5511915022668@c.us");
        assert_eq!(tracker.resolve().as_deref(), Some("5511915022668@c.us"));
    }

    #[test]
    fn test_later_set_overwrites() {
        let tracker = IdentityTracker::new();
        tracker.set("a@c.us");
        tracker.set("b@c.us");
        assert_eq!(tracker.resolve().as_deref(), Some("b@c.us"));
    }
}
