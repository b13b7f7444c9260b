//! Binance OAuth flow controller and request multiplexer
//!
//! `BinanceService` drives the PKCE authorization round trip, the
//! code-for-token exchange, revocation, and the read/convert endpoints of
//! the widget. All network traffic goes through a `Multiplexer`, which
//! tracks every in-flight request by id until its completion has been
//! delivered.
//!
//! Request lifecycle:
//! 1. The service builds an `OutboundRequest` (access token as a query
//!    parameter where the endpoint needs one)
//! 2. `Multiplexer::issue` records it as active and dispatches it
//! 3. On completion the entry is removed, then the continuation runs
//! 4. The service interprets 2xx bodies through `parser`; any other status
//!    yields the endpoint's default

pub mod endpoints;
pub mod multiplexer;
pub mod parser;
pub mod service;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use multiplexer::{Multiplexer, RequestId, Response};
pub use parser::{ConfirmStatus, ConvertQuote, DepositInfo};
pub use service::{BinanceService, HostConfig};
