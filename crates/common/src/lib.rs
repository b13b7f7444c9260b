//! Shared types for the Binance widget workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
