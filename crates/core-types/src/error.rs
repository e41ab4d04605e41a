// In crates/core-types/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot build a market snapshot from an empty kline series")]
    EmptySeries,

    #[error("Invalid symbol '{0}': expected BASE/QUOTE")]
    InvalidSymbol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
