//! Outbound HTTP transport abstraction
//!
//! Defines the `Transport` trait that the request multiplexer dispatches
//! through. `ReqwestTransport` is the production implementation; tests
//! substitute scripted transports that implement the same trait.
//!
//! A transport only reports what came back over the wire. Interpreting the
//! status (2xx vs everything else) is the caller's job, so non-success
//! responses are returned as `Ok` replies, never as errors.

mod error;
pub mod reqwest_transport;

pub use error::{Error, Result};
pub use reqwest_transport::ReqwestTransport;

pub use reqwest::Method;
pub use url::Url;

use std::future::Future;
use std::pin::Pin;

/// Content type used for every request body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A request ready to be dispatched.
///
/// `form_body` is already form-encoded; the transport attaches it verbatim
/// with `FORM_CONTENT_TYPE`.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub form_body: Option<String>,
}

impl OutboundRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            form_body: None,
        }
    }

    /// POST with an optional form-encoded body. An empty body is treated as
    /// no body at all.
    pub fn post(url: Url, form_body: Option<String>) -> Self {
        Self {
            method: Method::POST,
            url,
            form_body: form_body.filter(|b| !b.is_empty()),
        }
    }
}

/// Raw reply from the wire.
///
/// Header names are reported as the transport saw them; normalization to
/// lowercase happens in the multiplexer so every transport behaves the same.
#[derive(Debug, Clone, Default)]
pub struct TransportReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Abstraction over the HTTP client used for OAuth and API calls.
///
/// Implementations must not send or store cookies and must not serve
/// responses from a cache. Uses `Pin<Box<dyn Future>>` for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "reqwest").
    fn id(&self) -> &str;

    /// Dispatch a request and wait for the reply.
    ///
    /// Returns `Err` only when no HTTP status was obtained at all.
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportReply>> + Send + '_>>;
}
