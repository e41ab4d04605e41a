// In app/src/tracing_layer.rs

use chrono::Utc;
use events::{WsLogMessage, WsMessage};
use std::fmt::Write;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use web_server::WsFeed;

/// Forwards every log event to the WebSocket feed, including its replay
/// cache, so the dashboard shows the same lines as the console.
pub struct WsBroadcastLayer {
    feed: WsFeed,
}

impl WsBroadcastLayer {
    pub fn new(feed: WsFeed) -> Self {
        Self { feed }
    }
}

impl<S> Layer<S> for WsBroadcastLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = LogMessageVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        self.feed.publish(WsMessage::Log(WsLogMessage {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.finish(),
        }));
    }
}

/// Captures the `message` field and renders the structured fields after it
/// as `key=value` pairs.
#[derive(Default)]
struct LogMessageVisitor {
    message: String,
    fields: String,
}

impl LogMessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LogMessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn log_lines_reach_the_feed_with_their_fields() {
        let feed = WsFeed::new();
        let subscriber = tracing_subscriber::registry().with(WsBroadcastLayer::new(feed.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(symbol = "BTC/USDT", attempt = 2, "Retrying request.");
        });

        let replay = feed.replay();
        assert_eq!(replay.len(), 1);
        match &replay[0] {
            WsMessage::Log(log) => {
                assert_eq!(log.level, "WARN");
                assert_eq!(log.message, "Retrying request. symbol=BTC/USDT attempt=2");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
