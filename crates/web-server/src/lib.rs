// In crates/web-server/src/lib.rs

use app_config::{ServerSettings, Settings};
use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use core_types::TradeRecord;
use engine::{Command, EngineHandle, EngineStatus};
use events::WsMessage;
use futures::{sink::SinkExt, stream::StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::net::TcpListener;
use types::{BalanceResponse, CommandAck, HealthResponse, PnlResponse, TradesQuery};

pub mod error;
pub mod feed;
pub mod types;

// Re-export our custom error type for convenience.
pub use error::{Error, Result};
pub use feed::{WS_CACHE_SIZE, WsFeed, spawn_status_forwarder};

/// The shared application state that is available to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub feed: WsFeed,
    /// Effective settings with credentials masked.
    pub settings: Arc<Settings>,
    /// `/health` turns unhealthy once the last cycle is older than this.
    pub stale_after: chrono::Duration,
}

impl AppState {
    /// Builds the state from the engine handle and the unredacted settings.
    pub fn new(engine: EngineHandle, feed: WsFeed, settings: &Settings) -> Self {
        let intervals = i64::from(settings.server.stale_after_intervals.max(1));
        let interval = i64::try_from(settings.trading.loop_interval_secs).unwrap_or(i64::MAX / intervals);
        Self {
            engine,
            feed,
            settings: Arc::new(settings.redacted()),
            stale_after: chrono::Duration::seconds(interval.saturating_mul(intervals)),
        }
    }
}

/// Creates the main application router with all routes and middleware.
///
/// # Arguments
///
/// * `app_state`: The shared `AppState` holding the engine handle and feed.
///
/// # Returns
///
/// The configured `axum::Router`.
pub fn create_router(app_state: AppState) -> Router {
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let api_router = Router::new()
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/reset-risk", post(reset_risk_handler))
        .route("/close-all", post(close_all_handler))
        .route("/status", get(status_handler))
        .route("/trades", get(trades_handler))
        .route("/pnl", get(pnl_handler))
        .route("/balance", get(balance_handler))
        .route("/config", get(config_handler));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check_handler))
        .route("/ping", get(ping_handler))
        .nest("/api", api_router)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn ping_handler() -> &'static str {
    "pong"
}

/// 200 while the decision loop is cycling on time, 503 otherwise.
async fn health_check_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.status();
    let stale = status.is_stale(Utc::now(), state.stale_after);
    let body = HealthResponse {
        status: if stale { "stale" } else { "ok" },
        running: status.running,
        last_cycle_at: status.last_cycle_at,
        cycles: status.cycles,
    };
    let code = if stale { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (code, Json(body))
}

async fn dispatch(state: &AppState, command: Command) -> Result<Json<CommandAck>> {
    state
        .engine
        .send(command)
        .await
        .map_err(|e| Error::EngineUnavailable(e.to_string()))?;
    Ok(Json(CommandAck { command, queued: true }))
}

/// `POST /api/start`: allow new entries.
async fn start_handler(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    dispatch(&state, Command::Start).await
}

/// `POST /api/stop`: no new entries; open positions are still managed.
async fn stop_handler(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    dispatch(&state, Command::Stop).await
}

async fn reset_risk_handler(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    dispatch(&state, Command::ResetRisk).await
}

async fn close_all_handler(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    dispatch(&state, Command::CloseAll).await
}

async fn status_handler(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

/// The most recent closed trades, newest last.
async fn trades_handler(
    State(state): State<AppState>,
    Query(params): Query<TradesQuery>,
) -> Json<Vec<TradeRecord>> {
    let mut trades = state.engine.status().recent_trades;
    let skip = trades.len().saturating_sub(params.limit);
    trades.drain(..skip);
    Json(trades)
}

async fn pnl_handler(State(state): State<AppState>) -> Json<PnlResponse> {
    let status = state.engine.status();
    Json(PnlResponse {
        cumulative_pnl: status.risk.cumulative_pnl,
        trades_today: status.risk.trades_today,
        current_drawdown_pct: status.risk.current_drawdown_pct,
        halted: status.risk.halted,
        performance: status.performance,
    })
}

async fn balance_handler(State(state): State<AppState>) -> Json<BalanceResponse> {
    let status = state.engine.status();
    let open_margin = status.open_positions.iter().map(|p| p.size).sum();
    let unrealized_pnl = match status.last_price {
        Some(price) => status.open_positions.iter().map(|p| p.unrealized_pnl(price)).sum(),
        None => Decimal::ZERO,
    };
    Json(BalanceResponse {
        balance: status.balance,
        initial_equity: status.risk.initial_equity,
        peak_equity: status.risk.peak_equity,
        open_margin,
        unrealized_pnl,
    })
}

/// Effective settings, secrets masked.
async fn config_handler(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.as_ref().clone())
}

/// The handler for `GET /ws`.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize WebSocket message. Skipping.");
            true
        }
    }
}

/// Current status, then the replay cache, then live messages.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("New WebSocket client connected.");

    // Subscribe before the replay so nothing published meanwhile is lost.
    let mut rx = state.feed.subscribe();

    // --- 1. The "Replay" ---
    let current = WsMessage::Status(Box::new(state.engine.status()));
    if !send_json(&mut socket, &current).await {
        return;
    }
    for msg in state.feed.replay() {
        if !send_json(&mut socket, &msg).await {
            tracing::info!("WebSocket client disconnected during replay.");
            return;
        }
    }

    // --- 2. "Going Live" ---
    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(msg) => {
                        if !send_json(&mut socket, &msg).await {
                            tracing::info!("WebSocket client disconnected.");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket client lagging. Messages dropped.");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        tracing::info!("WebSocket client closed the connection.");
                        break;
                    }
                    // The feed is one-way; client messages are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::info!("WebSocket client connection closed.");
}

/// The main entry point for running the web server.
///
/// Binds `settings.host:settings.port` and serves until the task is dropped
/// or the listener fails.
pub async fn run(settings: &ServerSettings, app_state: AppState) -> Result<()> {
    let app = create_router(app_state);

    let address = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&address).await.map_err(Error::ServerBindError)?;
    tracing::info!(%address, "Web server listening.");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(Error::ServeError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::NaiveDate;
    use core_types::Symbol;
    use http_body_util::BodyExt;
    use risk::SessionRiskState;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tokio::sync::{mpsc, watch};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        commands: mpsc::Receiver<Command>,
        status: watch::Sender<EngineStatus>,
    }

    fn status() -> EngineStatus {
        let risk = SessionRiskState::new(dec!(1000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        EngineStatus::new(Symbol("BTC/USDT".into()), "5m", "SimulatedGateway", true, risk)
    }

    fn test_app() -> TestApp {
        let (command_tx, commands) = mpsc::channel(8);
        let (status, status_rx) = watch::channel(status());
        let mut settings = Settings::default();
        settings.exchange.api_key = "real-key".into();
        settings.exchange.secret_key = "real-secret".into();
        let state = AppState::new(EngineHandle::new(command_tx, status_rx), WsFeed::new(), &settings);
        TestApp { router: create_router(state), commands, status }
    }

    async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let app = test_app();
        assert_eq!(call(&app.router, "GET", "/ping").await, (StatusCode::OK, "pong".to_string()));
    }

    #[tokio::test]
    async fn control_routes_queue_commands() {
        let mut app = test_app();
        let (code, body) = call(&app.router, "POST", "/api/stop").await;
        assert_eq!(code, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["command"], "stop");
        assert_eq!(app.commands.recv().await, Some(Command::Stop));

        call(&app.router, "POST", "/api/reset-risk").await;
        assert_eq!(app.commands.recv().await, Some(Command::ResetRisk));
    }

    #[tokio::test]
    async fn commands_fail_when_the_engine_is_gone() {
        let app = test_app();
        drop(app.commands);
        let (code, body) = call(&app.router, "POST", "/api/start").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("error"));
    }

    #[tokio::test]
    async fn health_follows_the_last_cycle() {
        let app = test_app();
        let (code, _) = call(&app.router, "GET", "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        app.status.send_modify(|s| {
            s.running = true;
            s.last_cycle_at = Some(Utc::now());
        });
        let (code, body) = call(&app.router, "GET", "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.contains("\"ok\""));
    }

    #[tokio::test]
    async fn status_and_balance_read_the_published_snapshot() {
        let app = test_app();
        app.status.send_modify(|s| s.balance = dec!(987.5));

        let (_, body) = call(&app.router, "GET", "/api/status").await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["symbol"], "BTC/USDT");

        let (_, body) = call(&app.router, "GET", "/api/balance").await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["balance"], "987.5");
        assert_eq!(json["unrealized_pnl"], "0");
    }

    #[tokio::test]
    async fn config_masks_credentials() {
        let app = test_app();
        let (code, body) = call(&app.router, "GET", "/api/config").await;
        assert_eq!(code, StatusCode::OK);
        assert!(!body.contains("real-secret"));
        assert!(!body.contains("real-key"));
        assert!(body.contains("***"));
    }

    #[tokio::test]
    async fn trades_and_pnl_are_served() {
        let app = test_app();
        let (code, body) = call(&app.router, "GET", "/api/trades?limit=5").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "[]");

        let (code, body) = call(&app.router, "GET", "/api/pnl").await;
        assert_eq!(code, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["trades_today"], 0);
        assert_eq!(json["halted"], false);
    }
}
