// In crates/engine/src/lib.rs

pub mod decision_loop;
pub mod error;
pub mod handle;
pub mod position_book;

// Re-export public types
pub use decision_loop::{CycleReport, DecisionLoop, EngineComponents, RECENT_TRADES};
pub use error::{Error, Result};
pub use events::{Command, CycleAction, EngineStatus};
pub use handle::EngineHandle;
pub use position_book::{ExitSignal, PositionBook};
