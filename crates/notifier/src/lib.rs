// In crates/notifier/src/lib.rs

use async_trait::async_trait;
use events::EngineEvent;

pub mod commands;
pub mod error;
pub mod fanout;
pub mod format;
pub mod telegram;

// Re-export public types
pub use commands::{BotCommand, CommandPoller};
pub use error::{Error, Result};
pub use fanout::{BroadcastNotifier, FanoutNotifier};
pub use telegram::{TelegramClient, TelegramNotifier};

/// A sink for engine events.
///
/// Delivery is best effort: callers log a failed `notify` and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, event: &EngineEvent) -> Result<()>;
}
