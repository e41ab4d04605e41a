// In crates/execution/src/lib.rs

use async_trait::async_trait;
use rust_decimal::Decimal;

pub mod error;
pub mod live;
pub mod market;
pub mod retry;
pub mod simulated;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use live::LiveGateway;
pub use market::MarketDataSource;
pub use retry::{RetryPolicy, with_retry};
pub use simulated::SimulatedGateway;
pub use types::{CloseConfirmation, CloseRequest, OrderRequest, ProtectionRequest};

use core_types::Fill;

/// The universal interface for an execution venue.
///
/// A gateway takes approved actions and turns them into orders, either on a
/// live exchange or in a simulation. Every method takes `&self` so that one
/// gateway can be shared between the decision loop and read-only callers
/// such as the control surface; implementations use interior mutability.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// The name of the gateway (e.g., "LiveGateway", "SimulatedGateway").
    fn name(&self) -> &'static str;

    /// Places a market order opening a new position.
    ///
    /// # Arguments
    ///
    /// * `order`: The sized, risk-approved order.
    ///
    /// # Returns
    ///
    /// The confirmed `Fill`. A timeout is reported as an error, never as a fill.
    async fn place_order(&self, order: &OrderRequest) -> Result<Fill>;

    /// Closes an open position at market.
    async fn close_position(&self, request: &CloseRequest) -> Result<CloseConfirmation>;

    /// Places (or replaces) the exchange-side stop-loss and take-profit for
    /// an open position, so it stays protected while the agent is not
    /// polling. Venues whose exits are only watched in-process keep the
    /// default, which does nothing.
    async fn protect(&self, _request: &ProtectionRequest) -> Result<()> {
        Ok(())
    }

    /// The account equity in quote currency.
    async fn get_balance(&self) -> Result<Decimal>;
}
