// In crates/notifier/src/fanout.rs

use crate::{Notifier, Result};
use async_trait::async_trait;
use events::{EngineEvent, WsMessage};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Forwards events to the WebSocket feed.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    ws_tx: broadcast::Sender<WsMessage>,
}

impl BroadcastNotifier {
    pub fn new(ws_tx: broadcast::Sender<WsMessage>) -> Self {
        Self { ws_tx }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn notify(&self, event: &EngineEvent) -> Result<()> {
        // No subscribers is not a failure.
        let _ = self.ws_tx.send(WsMessage::Event(event.clone()));
        Ok(())
    }
}

/// Delivers every event to each inner notifier. A failing channel is logged
/// and does not stop delivery to the others.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn Notifier>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn notify(&self, event: &EngineEvent) -> Result<()> {
        for target in &self.targets {
            if let Err(e) = target.notify(event).await {
                tracing::warn!(channel = target.name(), kind = event.kind(), error = %e, "Notification failed.");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn notify(&self, _event: &EngineEvent) -> Result<()> {
            Err(Error::ChannelClosed("down".into()))
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Notifier for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn notify(&self, _event: &EngineEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failures_do_not_block_other_channels() {
        let counter = Arc::new(Counting::default());
        let fanout = FanoutNotifier::new().with(Arc::new(Failing)).with(counter.clone());

        let event = EngineEvent::Error { message: "x".into() };
        assert!(fanout.notify(&event).await.is_ok());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(fanout.len(), 2);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let (tx, mut rx) = broadcast::channel(4);
        let notifier = BroadcastNotifier::new(tx);
        notifier.notify(&EngineEvent::Error { message: "x".into() }).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), WsMessage::Event(EngineEvent::Error { .. })));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let (tx, _) = broadcast::channel(4);
        let notifier = BroadcastNotifier::new(tx);
        assert!(notifier.notify(&EngineEvent::Error { message: "x".into() }).await.is_ok());
    }
}
