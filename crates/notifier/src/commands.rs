// In crates/notifier/src/commands.rs

use crate::format::{HELP_TEXT, WELCOME_TEXT, balance_text, pnl_text, status_text, trades_text};
use crate::telegram::{TelegramClient, Update};
use crate::{Error, Result};
use events::{Command, EngineStatus};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Pause after a failed poll before trying again.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

/// A chat command understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Status,
    Pnl,
    Balance,
    Trades,
    Stop,
    Resume,
    Help,
    Unknown(String),
}

impl BotCommand {
    /// Parses the first word of a message. Returns `None` for plain text.
    /// A `@botname` suffix is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        if !word.starts_with('/') {
            return None;
        }
        let name = word.split('@').next().unwrap_or(word).to_lowercase();
        Some(match name.as_str() {
            "/start" => BotCommand::Start,
            "/status" => BotCommand::Status,
            "/pnl" => BotCommand::Pnl,
            "/balance" => BotCommand::Balance,
            "/trades" => BotCommand::Trades,
            "/stop" => BotCommand::Stop,
            "/resume" => BotCommand::Resume,
            "/help" => BotCommand::Help,
            _ => BotCommand::Unknown(name),
        })
    }

    /// The engine command this chat command triggers, if any.
    pub fn engine_command(&self) -> Option<Command> {
        match self {
            BotCommand::Stop => Some(Command::Stop),
            BotCommand::Resume => Some(Command::Start),
            _ => None,
        }
    }
}

/// Serves operator commands from one Telegram chat.
///
/// Reads come from the published `EngineStatus`; `/stop` and `/resume` are
/// queued to the decision loop and take effect at its next cycle boundary.
pub struct CommandPoller {
    client: TelegramClient,
    chat_id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<EngineStatus>,
    max_daily_trades: u32,
}

impl CommandPoller {
    pub fn new(
        client: TelegramClient,
        chat_id: &str,
        commands: mpsc::Sender<Command>,
        status: watch::Receiver<EngineStatus>,
        max_daily_trades: u32,
    ) -> Self {
        Self {
            client,
            chat_id: chat_id.to_string(),
            commands,
            status,
            max_daily_trades,
        }
    }

    /// Polls until the engine's command queue closes.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(chat_id = %self.chat_id, "Telegram command poller started.");
        let mut offset = 0;
        loop {
            if self.commands.is_closed() {
                tracing::info!("Engine stopped. Telegram command poller exiting.");
                return Ok(());
            }
            let updates = match self.client.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to get Telegram updates.");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Err(e) = self.handle_update(update).await {
                    tracing::warn!(error = %e, "Failed to handle Telegram update.");
                }
            }
        }
    }

    async fn handle_update(&self, update: Update) -> Result<()> {
        let Some(message) = update.message else {
            return Ok(());
        };
        // Only the configured chat may control the agent.
        let chat_id = message.chat.id.to_string();
        if chat_id != self.chat_id {
            tracing::warn!(%chat_id, "Ignoring message from an unknown chat.");
            return Ok(());
        }
        let Some(text) = message.text else {
            return Ok(());
        };

        let reply = match BotCommand::parse(&text) {
            Some(command) => {
                tracing::info!(?command, "Telegram command received.");
                self.respond(&command).await?
            }
            None => "I only respond to commands. Use /help to see available commands.".to_string(),
        };
        self.client.send_message(&self.chat_id, &reply).await
    }

    /// Queues any engine command and renders the reply.
    pub async fn respond(&self, command: &BotCommand) -> Result<String> {
        if let Some(engine_command) = command.engine_command() {
            self.commands
                .send(engine_command)
                .await
                .map_err(|e| Error::ChannelClosed(e.to_string()))?;
        }

        let status = self.status.borrow().clone();
        Ok(match command {
            BotCommand::Start => WELCOME_TEXT.to_string(),
            BotCommand::Help => HELP_TEXT.to_string(),
            BotCommand::Status => status_text(&status, self.max_daily_trades),
            BotCommand::Pnl => pnl_text(&status),
            BotCommand::Balance => balance_text(&status),
            BotCommand::Trades => trades_text(&status),
            BotCommand::Stop => {
                "⏸ Trading paused. No new positions will be opened; open positions are still managed.\n\
                 Use /resume to continue."
                    .to_string()
            }
            BotCommand::Resume => "▶️ Trading resumed.".to_string(),
            BotCommand::Unknown(_) => {
                "I don't understand that command. Use /help to see available commands.".to_string()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_types::Symbol;
    use risk::SessionRiskState;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_commands() {
        assert_eq!(BotCommand::parse("/status"), Some(BotCommand::Status));
        assert_eq!(BotCommand::parse("/PNL now"), Some(BotCommand::Pnl));
        assert_eq!(BotCommand::parse("/trades@agent_bot"), Some(BotCommand::Trades));
        assert_eq!(BotCommand::parse("/moon"), Some(BotCommand::Unknown("/moon".into())));
        assert_eq!(BotCommand::parse("hello"), None);
        assert_eq!(BotCommand::parse(""), None);
    }

    #[test]
    fn only_stop_and_resume_drive_the_engine() {
        assert_eq!(BotCommand::Stop.engine_command(), Some(Command::Stop));
        assert_eq!(BotCommand::Resume.engine_command(), Some(Command::Start));
        assert_eq!(BotCommand::Status.engine_command(), None);
    }

    fn poller() -> (CommandPoller, mpsc::Receiver<Command>) {
        let risk = SessionRiskState::new(dec!(500), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let status = EngineStatus::new(Symbol("BTC/USDT".into()), "5m", "SimulatedGateway", true, risk);
        let (_status_tx, status_rx) = watch::channel(status);
        let (tx, rx) = mpsc::channel(4);
        let client = TelegramClient::new("http://localhost", "token").unwrap();
        (CommandPoller::new(client, "42", tx, status_rx, 5), rx)
    }

    #[tokio::test]
    async fn stop_queues_engine_command() {
        let (poller, mut rx) = poller();
        let reply = poller.respond(&BotCommand::Stop).await.unwrap();
        assert!(reply.contains("Trading paused"));
        assert_eq!(rx.recv().await, Some(Command::Stop));
    }

    #[tokio::test]
    async fn reads_come_from_published_status() {
        let (poller, mut rx) = poller();
        let reply = poller.respond(&BotCommand::Balance).await.unwrap();
        assert!(reply.contains("500.00 USDT"));
        assert!(rx.try_recv().is_err());
    }
}
