// In crates/engine/src/error.rs

use core_types::{PositionId, PositionStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Market data or balance could not be read. The cycle is skipped.
    #[error("Transient data error: {0}")]
    TransientData(String),

    /// The gateway failed after its retries. Position state is unchanged.
    #[error("Execution error: {0}")]
    Execution(#[from] execution::Error),

    #[error("Risk breach: {0}")]
    RiskBreach(String),

    #[error("Invalid transition for position {position}: cannot {action} while {from:?}")]
    InvalidTransition {
        position: PositionId,
        from: Option<PositionStatus>,
        action: &'static str,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
