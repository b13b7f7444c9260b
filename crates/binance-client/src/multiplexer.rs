//! Request multiplexer
//!
//! Owns every in-flight request, keyed by a generated `RequestId`. An entry
//! is inserted before the request is dispatched and removed by id inside the
//! completion task, after the reply has been converted and before the
//! caller's continuation runs. The active map therefore never holds a
//! completed request, and removing one entry never disturbs the others.
//!
//! Requests are independent: completions arrive in whatever order the
//! transport finishes them. There is no cancellation and no timeout beyond
//! the transport's own single retry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, warn};
use transport::{Method, OutboundRequest, Transport, TransportReply};

/// Identity of an in-flight request, unique for the multiplexer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// What a continuation receives.
///
/// `status` is -1 when the transport produced no HTTP status; headers are
/// then empty. Header names are lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: i32,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl Response {
    /// Status reported when no HTTP status was obtained.
    pub const NO_STATUS: i32 = -1;

    pub fn transport_failure() -> Self {
        Self {
            status: Self::NO_STATUS,
            body: String::new(),
            headers: BTreeMap::new(),
        }
    }

    /// 200-299 inclusive.
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn from_reply(reply: TransportReply) -> Self {
        let headers = reply
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self {
            status: i32::from(reply.status),
            body: String::from_utf8_lossy(&reply.body).into_owned(),
            headers,
        }
    }
}

/// Bookkeeping for one active request.
#[derive(Debug)]
struct InFlight {
    method: Method,
    path: String,
    issued_at: Instant,
}

type ActiveMap = Arc<Mutex<HashMap<RequestId, InFlight>>>;

/// Tracks and dispatches concurrent requests over one transport.
///
/// The active map sits behind a std `Mutex` that is only held for inserts,
/// removals and counts, never across an `.await`.
pub struct Multiplexer {
    transport: Arc<dyn Transport>,
    active: ActiveMap,
    next_id: AtomicU64,
}

impl Multiplexer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        debug!(transport = transport.id(), "multiplexer initialized");
        Self {
            transport,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Dispatch `request` and return immediately.
    ///
    /// `continuation` runs exactly once on the tokio runtime, after the entry
    /// has left the active set. Must be called from within a runtime.
    pub fn issue<F>(&self, request: OutboundRequest, continuation: F) -> RequestId
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let method = request.method.clone();

        {
            let mut active = lock(&self.active);
            active.insert(
                id,
                InFlight {
                    method: method.clone(),
                    path: request.url.path().to_string(),
                    issued_at: Instant::now(),
                },
            );
            metrics::gauge!("binance_requests_in_flight").set(active.len() as f64);
        }
        debug!(request_id = %id, %method, path = request.url.path(), "request issued");

        let transport = Arc::clone(&self.transport);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let outcome = transport.send(request).await;

            let entry = {
                let mut active = lock(&active);
                let entry = active.remove(&id);
                metrics::gauge!("binance_requests_in_flight").set(active.len() as f64);
                entry
            };

            let response = match outcome {
                Ok(reply) => Response::from_reply(reply),
                Err(e) => {
                    warn!(request_id = %id, error = %e, "request failed before a status was received");
                    Response::transport_failure()
                }
            };

            match entry {
                Some(entry) => record_completion(id, &entry, response.status),
                None => warn!(request_id = %id, "completed request was not in the active set"),
            }

            continuation(response);
        });

        id
    }

    /// Dispatch `request` and wait for its response.
    pub async fn fetch(&self, request: OutboundRequest) -> Response {
        let (tx, rx) = oneshot::channel();
        self.issue(request, move |response| {
            let _ = tx.send(response);
        });
        // The sender is only dropped unsent if the completion task panicked
        rx.await.unwrap_or_else(|_| Response::transport_failure())
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.active).len()
    }

    /// Whether `id` is still awaiting completion.
    pub fn is_active(&self, id: RequestId) -> bool {
        lock(&self.active).contains_key(&id)
    }
}

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<RequestId, InFlight>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record_completion(id: RequestId, entry: &InFlight, status: i32) {
    let elapsed = entry.issued_at.elapsed();
    let method = entry.method.to_string();
    metrics::counter!(
        "binance_requests_total",
        "method" => method.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("binance_request_duration_seconds", "method" => method)
        .record(elapsed.as_secs_f64());
    debug!(
        request_id = %id,
        method = %entry.method,
        path = %entry.path,
        status,
        elapsed_ms = elapsed.as_millis() as u64,
        "request completed"
    );
}
