// In crates/web-server/src/feed.rs

use events::{EngineStatus, WsMessage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// The maximum number of messages to keep in the replay cache.
pub const WS_CACHE_SIZE: usize = 200;
const WS_CHANNEL_CAPACITY: usize = 1024;

/// The live WebSocket feed: a broadcast channel for connected clients plus a
/// bounded cache replayed to clients that connect later.
#[derive(Debug, Clone)]
pub struct WsFeed {
    tx: broadcast::Sender<WsMessage>,
    cache: Arc<Mutex<VecDeque<WsMessage>>>,
}

impl Default for WsFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl WsFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(WS_CHANNEL_CAPACITY);
        Self {
            tx,
            cache: Arc::new(Mutex::new(VecDeque::with_capacity(WS_CACHE_SIZE))),
        }
    }

    /// Sends to live clients and appends to the replay cache.
    pub fn publish(&self, msg: WsMessage) {
        let _ = self.tx.send(msg.clone());
        let mut cache = self.lock_cache();
        if cache.len() >= WS_CACHE_SIZE {
            cache.pop_front();
        }
        cache.push_back(msg);
    }

    /// Sends to live clients only. Status snapshots go this way; a late
    /// client is sent the current one on connect instead.
    pub fn broadcast(&self, msg: WsMessage) {
        let _ = self.tx.send(msg);
    }

    pub fn sender(&self) -> broadcast::Sender<WsMessage> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }

    /// A copy of the cached messages, oldest first.
    pub fn replay(&self) -> Vec<WsMessage> {
        self.lock_cache().iter().cloned().collect()
    }

    fn lock_cache(&self) -> MutexGuard<'_, VecDeque<WsMessage>> {
        // Poisoned only if a writer panicked mid-push.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Forwards every published engine status onto the feed until the engine's
/// status channel closes.
pub fn spawn_status_forwarder(mut status: watch::Receiver<EngineStatus>, feed: WsFeed) -> JoinHandle<()> {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            feed.broadcast(WsMessage::Status(Box::new(snapshot)));
        }
        tracing::debug!("Engine status channel closed. Status forwarding stopped.");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use events::{EngineEvent, WsLogMessage};

    fn log(message: &str) -> WsMessage {
        WsMessage::Log(WsLogMessage {
            timestamp: Utc::now(),
            level: "INFO".into(),
            target: "test".into(),
            message: message.into(),
        })
    }

    #[test]
    fn cache_keeps_only_the_newest_messages() {
        let feed = WsFeed::new();
        for i in 0..(WS_CACHE_SIZE + 5) {
            feed.publish(log(&i.to_string()));
        }
        let replay = feed.replay();
        assert_eq!(replay.len(), WS_CACHE_SIZE);
        match &replay[0] {
            WsMessage::Log(first) => assert_eq!(first.message, "5"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_clients_receive_published_messages() {
        let feed = WsFeed::new();
        let mut rx = feed.subscribe();
        feed.publish(WsMessage::Event(EngineEvent::Error { message: "boom".into() }));
        assert!(matches!(rx.recv().await.unwrap(), WsMessage::Event(_)));
    }

    #[test]
    fn broadcasts_are_not_cached() {
        let feed = WsFeed::new();
        feed.broadcast(log("transient"));
        assert!(feed.replay().is_empty());
    }
}
