//! Transport doubles for tests
//!
//! Available to other workspace crates through the `test-util` feature.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use transport::{Error, OutboundRequest, Result, Transport, TransportReply, Url};

pub fn reply(status: u16, body: &str) -> TransportReply {
    TransportReply {
        status,
        headers: vec![("Content-Type".into(), "application/json".into())],
        body: body.as_bytes().to_vec(),
    }
}

pub fn query(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

pub fn form(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

type Handler = Box<dyn Fn(&OutboundRequest) -> Option<TransportReply> + Send + Sync>;

/// Replies immediately from a handler and records every request.
/// A handler returning `None` simulates a connection failure.
pub struct ScriptedTransport {
    handler: Handler,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&OutboundRequest) -> Option<TransportReply> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Fixed replies keyed by URL path.
    pub fn routes(routes: &[(&str, u16, &str)]) -> Arc<Self> {
        let routes: HashMap<String, (u16, String)> = routes
            .iter()
            .map(|(path, status, body)| (path.to_string(), (*status, body.to_string())))
            .collect();
        Self::new(move |request| {
            routes
                .get(request.url.path())
                .map(|(status, body)| reply(*status, body))
        })
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> OutboundRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request was sent")
    }
}

impl Transport for ScriptedTransport {
    fn id(&self) -> &str {
        "scripted"
    }

    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportReply>> + Send + '_>> {
        let outcome = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move { outcome.ok_or_else(|| Error::Connect("connection refused".into())) })
    }
}

/// Holds each request until the test releases its gate, so completions can
/// be delivered in any order.
pub struct GatedTransport {
    gates: Mutex<HashMap<String, oneshot::Receiver<TransportReply>>>,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Register a gate for `path`. Sending on the returned sender completes
    /// the request; dropping it fails the request at the transport level.
    pub fn gate(&self, path: &str) -> oneshot::Sender<TransportReply> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(path.to_string(), rx);
        tx
    }
}

impl Transport for GatedTransport {
    fn id(&self) -> &str {
        "gated"
    }

    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportReply>> + Send + '_>> {
        let gate = self.gates.lock().unwrap().remove(request.url.path());
        Box::pin(async move {
            match gate {
                Some(rx) => rx
                    .await
                    .map_err(|_| Error::Connect("gate dropped".into())),
                None => Err(Error::Connect("no gate registered".into())),
            }
        })
    }
}
