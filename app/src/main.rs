// In app/src/main.rs

use anyhow::{Context, Result};
use api_client::ApiClient;
use app_config::{AppSettings, ExecutionMode, Settings};
use chrono::Utc;
use clap::{Parser, Subcommand};
use core_types::Symbol;
use engine::{Command, DecisionLoop, EngineComponents, EngineHandle};
use execution::{ExecutionGateway, LiveGateway, MarketDataSource, RetryPolicy, SimulatedGateway};
use notifier::{BroadcastNotifier, CommandPoller, FanoutNotifier, TelegramClient, TelegramNotifier};
use self::tracing_layer::WsBroadcastLayer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use web_server::{AppState, WsFeed, spawn_status_forwarder};

mod tracing_layer;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A leveraged single-pair futures trading agent.")]
struct Cli {
    /// Directory holding `base.toml` and the per-environment overrides.
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Runs the trading agent in paper or live mode (the default).
    Run,

    /// Loads and validates the configuration, then prints it with secrets masked.
    CheckConfig,
}

type Gateways = (Arc<dyn ExecutionGateway>, Arc<dyn MarketDataSource>);

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".into());
    let env: HashMap<String, String> = std::env::vars().collect();
    let settings = app_config::load_settings_with(&cli.config_dir, &environment, env)
        .context("Failed to load configuration")?;

    let feed = WsFeed::new();
    init_tracing(&settings.app, &feed);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_agent(settings, feed).await?,
        Commands::CheckConfig => {
            println!("{}", settings.to_redacted_toml()?);
            tracing::info!(environment = %settings.app.environment, "Configuration is valid.");
        }
    }

    Ok(())
}

/// Console output (plain or JSON) filtered by `RUST_LOG` or `app.log_level`,
/// plus the WebSocket feed at INFO and above.
fn init_tracing(app: &AppSettings, feed: &WsFeed) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&app.log_level));
    let fmt_layer = if app.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    let ws_layer = WsBroadcastLayer::new(feed.clone()).with_filter(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .with(ws_layer)
        .init();
}

// --- "Run" Subcommand Logic ---

/// Wires every component, then runs until Ctrl-C or until the decision loop
/// or the web server stops.
async fn run_agent(settings: Settings, feed: WsFeed) -> Result<()> {
    let symbol = settings.symbol()?;
    tracing::info!(
        environment = %settings.app.environment,
        %symbol,
        timeframe = %settings.trading.timeframe,
        mode = ?settings.execution.mode,
        "Starting trading agent."
    );

    // --- 1. Execution gateway and market data ---
    let (gateway, market) = build_gateways(&settings, &symbol)?;
    let initial_equity = gateway
        .get_balance()
        .await
        .context("Failed to read the starting balance")?;
    tracing::info!(%initial_equity, gateway = gateway.name(), "Starting balance read.");

    // --- 2. Notifiers ---
    let mut notifier = FanoutNotifier::new().with(Arc::new(BroadcastNotifier::new(feed.sender())));
    if let Some(telegram) = TelegramNotifier::from_settings(&settings.notifier, symbol.quote_asset())? {
        tracing::info!("Telegram notifications enabled.");
        notifier = notifier.with(Arc::new(telegram));
    }

    // --- 3. Decision loop ---
    let components = EngineComponents {
        scorer: strategies::create_scorer(&settings.scorer)?,
        gateway,
        market,
        notifier: Arc::new(notifier),
    };
    let (decision_loop, handle) = DecisionLoop::new(&settings, components, initial_equity, Utc::now())?;
    let mut engine_task = tokio::spawn(decision_loop.run());

    // --- 4. Control surfaces ---
    let forwarder = spawn_status_forwarder(handle.subscribe(), feed.clone());
    let mut server_task = if settings.server.enabled {
        let state = AppState::new(handle.clone(), feed.clone(), &settings);
        let server_settings = settings.server.clone();
        Some(tokio::spawn(async move { web_server::run(&server_settings, state).await }))
    } else {
        None
    };
    let mut poller_task = build_poller(&settings, &handle)?.map(|poller| tokio::spawn(poller.run()));

    // --- 5. Run until something stops ---
    tokio::select! {
        result = &mut engine_task => {
            report_exit("Decision loop", result);
        }
        Some(result) = wait_for(&mut server_task) => {
            report_exit("Web server", result.map(|r| r.map_err(anyhow::Error::from)));
            shutdown_engine(&handle, &mut engine_task).await;
        }
        Some(result) = wait_for(&mut poller_task) => {
            report_exit("Telegram command poller", result);
            shutdown_engine(&handle, &mut engine_task).await;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested.");
            shutdown_engine(&handle, &mut engine_task).await;
        }
    }

    forwarder.abort();
    if let Some(task) = server_task {
        task.abort();
    }
    if let Some(task) = poller_task {
        task.abort();
    }
    tracing::info!("Trading agent stopped.");
    Ok(())
}

fn build_gateways(settings: &Settings, symbol: &Symbol) -> Result<Gateways> {
    match settings.execution.mode {
        ExecutionMode::Paper => {
            tracing::info!("Paper trading. Orders fill against a simulated market.");
            let simulated = Arc::new(SimulatedGateway::new(&settings.execution.paper));
            Ok((simulated.clone(), simulated))
        }
        ExecutionMode::Live => {
            tracing::warn!("LIVE TRADING IS ENABLED. REAL ORDERS WILL BE PLACED.");
            let client = ApiClient::new(&settings.exchange)?;
            let policy = RetryPolicy::from_settings(&settings.execution);
            let live = Arc::new(
                LiveGateway::new(client, policy, symbol).with_protective_orders(settings.exchange.protective_orders),
            );
            Ok((live.clone(), live))
        }
    }
}

/// A Telegram poller when commands are enabled and a bot is configured.
fn build_poller(settings: &Settings, handle: &EngineHandle) -> Result<Option<CommandPoller>> {
    let notifier = &settings.notifier;
    let (Some(token), Some(chat_id)) = (&notifier.telegram_token, &notifier.telegram_chat_id) else {
        return Ok(None);
    };
    if !notifier.accept_commands {
        return Ok(None);
    }
    let client = TelegramClient::new(&notifier.telegram_api_url, token)?;
    Ok(Some(CommandPoller::new(
        client,
        chat_id,
        handle.command_sender(),
        handle.subscribe(),
        settings.risk.max_daily_trades,
    )))
}

/// Resolves with the task's result, or never when there is no task.
async fn wait_for<T>(task: &mut Option<JoinHandle<T>>) -> Option<Result<T, JoinError>> {
    match task {
        Some(task) => Some(task.await),
        None => std::future::pending().await,
    }
}

fn report_exit(name: &str, result: Result<anyhow::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => tracing::warn!(task = name, "Task exited."),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task failed."),
        Err(e) => tracing::error!(task = name, error = %e, "Task panicked or was cancelled."),
    }
}

/// Asks the decision loop to stop and waits for it. An in-flight cycle
/// finishes first.
async fn shutdown_engine(handle: &EngineHandle, engine_task: &mut JoinHandle<Result<()>>) {
    if engine_task.is_finished() {
        return;
    }
    if let Err(e) = handle.send(Command::Shutdown).await {
        tracing::warn!(error = %e, "Decision loop already gone.");
        return;
    }
    if let Err(e) = engine_task.await {
        tracing::error!(error = %e, "Decision loop did not shut down cleanly.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_run() {
        let cli = Cli::parse_from(["agent"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config_dir, PathBuf::from("config"));
    }

    #[test]
    fn cli_parses_check_config() {
        let cli = Cli::parse_from(["agent", "check-config", "--config-dir", "/etc/agent"]);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
        assert_eq!(cli.config_dir, PathBuf::from("/etc/agent"));
    }

    #[test]
    fn poller_needs_a_configured_bot() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let settings = Settings::default();
        let symbol = settings.symbol().unwrap();
        let risk = risk_state(&settings);
        let status = events::EngineStatus::new(symbol, "5m", "test", true, risk);
        let (_status_tx, status_rx) = tokio::sync::watch::channel(status);
        let handle = EngineHandle::new(tx, status_rx);
        assert!(build_poller(&settings, &handle).unwrap().is_none());

        let mut settings = settings;
        settings.notifier.telegram_token = Some("token".into());
        settings.notifier.telegram_chat_id = Some("42".into());
        assert!(build_poller(&settings, &handle).unwrap().is_some());
        settings.notifier.accept_commands = false;
        assert!(build_poller(&settings, &handle).unwrap().is_none());
    }

    #[tokio::test]
    async fn paper_mode_starts_from_the_configured_balance() {
        let settings = Settings::default();
        let symbol = settings.symbol().unwrap();
        let (gateway, market) = build_gateways(&settings, &symbol).unwrap();
        assert_eq!(gateway.name(), "SimulatedGateway");
        assert_eq!(gateway.get_balance().await.unwrap(), settings.execution.paper.initial_balance);
        let snapshot = market.snapshot(&symbol, "5m", 50).await.unwrap();
        assert!(!snapshot.recent_closes.is_empty());
    }

    fn risk_state(settings: &Settings) -> risk::SessionRiskState {
        risk::SessionRiskState::new(settings.execution.paper.initial_balance, Utc::now().date_naive())
    }
}
