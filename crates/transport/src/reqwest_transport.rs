//! reqwest-backed transport
//!
//! The client is built without a cookie store, so cookies are neither sent
//! nor saved. Every request carries `Cache-Control: no-cache, no-store` and
//! `Pragma: no-cache`.
//!
//! Retry policy: exactly one retry, and only when the connection itself
//! failed (the observable form of a network change). HTTP error statuses are
//! never retried; they are returned to the caller unmodified.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use tracing::{debug, instrument, warn};

use crate::{Error, FORM_CONTENT_TYPE, OutboundRequest, Result, Transport, TransportReply};

/// Retries allowed after a connection-level failure.
pub const RETRIES_ON_NETWORK_CHANGE: u32 = 1;

/// Production transport over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a fresh client (no cookie store, no proxy cache).
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client. The caller is responsible for not enabling a
    /// cookie store on it.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    #[instrument(skip_all, fields(method = %request.method, path = %request.url.path()))]
    async fn dispatch(&self, request: OutboundRequest) -> Result<TransportReply> {
        let request = &request;
        retry_on_connect(|_| self.attempt(request)).await
    }

    async fn attempt(
        &self,
        request: &OutboundRequest,
    ) -> std::result::Result<TransportReply, Attempt> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header(CACHE_CONTROL, "no-cache, no-store")
            .header(PRAGMA, "no-cache");
        if let Some(body) = &request.form_body {
            builder = builder
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(body.clone());
        }

        match builder.send().await {
            Ok(response) => Ok(read_reply(response).await),
            Err(e) if e.is_connect() => Err(Attempt::Connect(e.to_string())),
            Err(e) => Err(Attempt::Request(e.to_string())),
        }
    }
}

/// Why a single attempt produced no reply.
#[derive(Debug)]
enum Attempt {
    Connect(String),
    Request(String),
}

/// Run `attempt` until it yields a reply, retrying only connection failures
/// and at most `RETRIES_ON_NETWORK_CHANGE` times. `attempt` receives the
/// 1-based attempt number.
async fn retry_on_connect<F, Fut>(mut attempt: F) -> Result<TransportReply>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<TransportReply, Attempt>>,
{
    let max_attempts = 1 + RETRIES_ON_NETWORK_CHANGE;
    let mut number = 1;
    loop {
        match attempt(number).await {
            Ok(reply) => return Ok(reply),
            Err(Attempt::Connect(e)) if number < max_attempts => {
                warn!(attempt = number, error = %e, "connection failed, retrying once");
                number += 1;
            }
            Err(Attempt::Connect(e)) => return Err(Error::Connect(e)),
            Err(Attempt::Request(e)) => return Err(Error::Request(e)),
        }
    }
}

impl Transport for ReqwestTransport {
    fn id(&self) -> &str {
        "reqwest"
    }

    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportReply>> + Send + '_>> {
        Box::pin(self.dispatch(request))
    }
}

/// Collect status, headers and body. A body read failure after the status
/// arrived still yields a reply, with whatever could be read (nothing).
async fn read_reply(response: reqwest::Response) -> TransportReply {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let body = match response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!(status, error = %e, "failed to read response body");
            Vec::new()
        }
    };

    debug!(status, bytes = body.len(), "reply received");
    TransportReply {
        status,
        headers,
        body,
    }
}
