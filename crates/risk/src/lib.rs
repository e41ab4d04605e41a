// In crates/risk/src/lib.rs

pub mod deriver;
pub mod error;
pub mod governor;
pub mod sizing;
pub mod types;

// Re-export public types
pub use deriver::RiskParameterDeriver;
pub use error::{Error, Result};
pub use governor::{DenyReason, EntryCandidate, EntryDecision, RiskGovernor, SessionRiskState};
pub use sizing::{PositionSizer, SizedEntry};
pub use types::{HaltPolicy, RiskSettings};
