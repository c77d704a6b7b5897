use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Principal;

pub(crate) struct Channel {
    pub(crate) scope: Principal,
    pub(crate) outbox: mpsc::UnboundedSender<String>,
}

/// Process-scoped registry of live, authenticated channels. Constructed
/// once at startup and injected into the router and the WebSocket
/// handler; `shutdown` is the teardown half.
#[derive(Default)]
pub struct ConnectionRegistry {
    pub(crate) channels: DashMap<Uuid, Channel>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a verified channel and hands back its outbox receiver.
    /// The caller drains the receiver into the transport; a dropped
    /// receiver marks the channel for eviction on the next publish.
    pub fn register(&self, scope: Principal) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(id, Channel { scope, outbox: tx });
        (id, rx)
    }

    pub fn deregister(&self, id: Uuid) -> Option<Principal> {
        self.channels.remove(&id).map(|(_, channel)| channel.scope)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Drops every channel, closing all outboxes.
    pub fn shutdown(&self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_deregister_round_trip() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = registry.register(Principal::Admin);
        assert_eq!(registry.len(), 1);

        let scope = registry.deregister(id);
        assert_eq!(scope, Some(Principal::Admin));
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_closes_outboxes() {
        let registry = ConnectionRegistry::new();
        let (_id, mut rx) = registry.register(Principal::Admin);

        registry.shutdown();

        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
