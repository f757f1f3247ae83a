//! Shared policies, connectors and backends for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use policy_gateway::engine::{
    BodyChunk, BodyReceiver, Connector, ConnectorError, ConnectorResponse,
};
use policy_gateway::io::{BodySink, BodyTransformer};
use policy_gateway::policy::PolicyScope;
use policy_gateway::{
    ApiRequest, ApiResponse, Policy, PolicyBinding, PolicyChain, PolicyConfiguration,
    PolicyContext, PolicyError, PolicyFailure, PolicyFailureType,
};

/// Ordered log of everything the test policies observed.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn binding<P: Policy + 'static>(policy: P) -> PolicyBinding {
    PolicyBinding::new(Arc::new(policy), PolicyConfiguration::empty())
}

/// Passes everything on and records each call as `name:phase`.
pub struct Recording {
    pub name: String,
    pub journal: Journal,
}

impl Recording {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
        }
    }
}

impl Policy for Recording {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_request(
        &self,
        mut request: ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:request", self.name));
        let trail = match request.header("x-trail") {
            Some(trail) => format!("{trail},{}", self.name),
            None => self.name.clone(),
        };
        request.set_header("x-trail", &trail);
        chain.apply(request);
        Ok(())
    }

    fn apply_response(
        &self,
        mut response: ApiResponse,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiResponse>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:response", self.name));
        let trail = match response.header("x-trail") {
            Some(trail) => format!("{trail},{}", self.name),
            None => self.name.clone(),
        };
        response.set_header("x-trail", &trail);
        chain.apply(response);
        Ok(())
    }

    fn process_request_failure(
        &self,
        failure: PolicyFailure,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:request-failure", self.name));
        chain.apply_failure(failure);
        Ok(())
    }

    fn process_response_failure(
        &self,
        failure: PolicyFailure,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiResponse>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:response-failure", self.name));
        chain.apply_failure(failure);
        Ok(())
    }
}

/// Rejects every request with a fixed failure.
pub struct Rejecting {
    pub name: String,
    pub failure: PolicyFailure,
    pub journal: Journal,
}

impl Rejecting {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            failure: PolicyFailure::new(PolicyFailureType::Authorization, 10002, "denied"),
            journal: journal.clone(),
        }
    }
}

impl Policy for Rejecting {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_request(
        &self,
        _request: ApiRequest,
        context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:request", self.name));
        context.set_attribute("rejected-by", self.name.clone());
        chain.apply_failure(self.failure.clone());
        Ok(())
    }

    fn apply_response(
        &self,
        _response: ApiResponse,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiResponse>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:response", self.name));
        chain.apply_failure(self.failure.clone());
        Ok(())
    }

    fn process_request_failure(
        &self,
        failure: PolicyFailure,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:request-failure", self.name));
        chain.apply_failure(failure);
        Ok(())
    }

    fn process_response_failure(
        &self,
        failure: PolicyFailure,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiResponse>,
    ) -> Result<(), PolicyError> {
        self.journal.push(format!("{}:response-failure", self.name));
        chain.apply_failure(failure);
        Ok(())
    }
}

/// Ends request processing early with `skip`.
pub struct Skipping {
    pub journal: Journal,
}

impl Policy for Skipping {
    fn name(&self) -> &str {
        "skipping"
    }

    fn apply_request(
        &self,
        request: ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        self.journal.push("skipping:request");
        chain.skip(request);
        Ok(())
    }
}

/// How a [`Misbehaving`] policy ends its request invocation.
#[derive(Clone, Copy, Debug)]
pub enum Misbehaviour {
    /// Return `Err` without touching the continuation.
    ReturnErr,
    /// Resume with `apply`, then return `Err` anyway.
    ApplyThenErr,
    /// Call `raise_error` on the continuation.
    Raise,
    /// Drop the continuation.
    Abandon,
}

pub struct Misbehaving {
    pub mode: Misbehaviour,
}

impl Policy for Misbehaving {
    fn name(&self) -> &str {
        "misbehaving"
    }

    fn apply_request(
        &self,
        request: ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        match self.mode {
            Misbehaviour::ReturnErr => {
                drop(request);
                Err(PolicyError::raised("misbehaving", "boom"))
            }
            Misbehaviour::ApplyThenErr => {
                chain.apply(request);
                Err(PolicyError::raised("misbehaving", "late boom"))
            }
            Misbehaviour::Raise => {
                chain.raise_error(PolicyError::raised("misbehaving", "raised"));
                Ok(())
            }
            Misbehaviour::Abandon => {
                drop(chain);
                Ok(())
            }
        }
    }
}

/// Resumes the chain later from a plain OS thread.
pub struct Deferred {
    pub delay: Duration,
    pub journal: Journal,
}

impl Policy for Deferred {
    fn name(&self) -> &str {
        "deferred"
    }

    fn apply_request(
        &self,
        request: ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        let delay = self.delay;
        let journal = self.journal.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            journal.push("deferred:resumed");
            chain.apply(request);
        });
        self.journal.push("deferred:returned");
        Ok(())
    }
}

/// Contributes a body stage that appends its tag to every chunk.
pub struct Tagging {
    pub tag: &'static str,
    pub builds: Arc<AtomicUsize>,
    pub aborts: Arc<AtomicUsize>,
}

impl Tagging {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            builds: Arc::new(AtomicUsize::new(0)),
            aborts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn stage(&self) -> Box<dyn BodyTransformer> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Box::new(TagStage {
            tag: self.tag,
            aborts: self.aborts.clone(),
        })
    }
}

impl Policy for Tagging {
    fn name(&self) -> &str {
        self.tag
    }

    fn request_body(
        &self,
        _request: &ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        _scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        Some(self.stage())
    }

    fn response_body(
        &self,
        _response: &ApiResponse,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        _scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        Some(self.stage())
    }
}

struct TagStage {
    tag: &'static str,
    aborts: Arc<AtomicUsize>,
}

impl BodyTransformer for TagStage {
    fn write(
        &mut self,
        chunk: Bytes,
        downstream: &mut dyn BodySink,
        _scope: &PolicyScope,
    ) -> Result<(), PolicyError> {
        let mut tagged = chunk.to_vec();
        tagged.extend_from_slice(self.tag.as_bytes());
        downstream.write(Bytes::from(tagged))
    }

    fn abort(&mut self, _error: &PolicyError, _scope: &PolicyScope) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Body stage that fails on the first chunk containing `poison`, naming
/// the scope it runs under.
pub struct Poisoned {
    pub poison: &'static str,
}

impl Policy for Poisoned {
    fn name(&self) -> &str {
        "poisoned"
    }

    fn request_body(
        &self,
        _request: &ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        _scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        Some(Box::new(PoisonStage {
            poison: self.poison,
        }))
    }
}

struct PoisonStage {
    poison: &'static str,
}

impl BodyTransformer for PoisonStage {
    fn write(
        &mut self,
        chunk: Bytes,
        downstream: &mut dyn BodySink,
        scope: &PolicyScope,
    ) -> Result<(), PolicyError> {
        if chunk.windows(self.poison.len()).any(|w| w == self.poison.as_bytes()) {
            return Err(PolicyError::body(scope.name(), "poisoned chunk"));
        }
        downstream.write(chunk)
    }
}

/// Where a [`Panicking`] policy panics.
#[derive(Clone, Copy, Debug)]
pub enum PanicAt {
    /// In `apply_request`, before resuming the chain.
    Request,
    /// In `apply_request`, after resuming the chain.
    AfterApply,
    /// In the request body stage factory.
    BodyFactory,
    /// In the request body stage, on every chunk.
    BodyWrite,
}

pub struct Panicking {
    pub at: PanicAt,
}

impl Policy for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn apply_request(
        &self,
        request: ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        match self.at {
            PanicAt::Request => panic!("policy bug"),
            PanicAt::AfterApply => {
                chain.apply(request);
                panic!("policy bug after apply")
            }
            PanicAt::BodyFactory | PanicAt::BodyWrite => {
                chain.apply(request);
                Ok(())
            }
        }
    }

    fn request_body(
        &self,
        _request: &ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        _scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        match self.at {
            PanicAt::BodyFactory => panic!("factory bug"),
            PanicAt::BodyWrite => Some(Box::new(PanicStage)),
            PanicAt::Request | PanicAt::AfterApply => None,
        }
    }
}

struct PanicStage;

impl BodyTransformer for PanicStage {
    fn write(
        &mut self,
        _chunk: Bytes,
        _downstream: &mut dyn BodySink,
        _scope: &PolicyScope,
    ) -> Result<(), PolicyError> {
        panic!("stage bug")
    }
}

/// In-memory connector: answers 200 and echoes the request body back.
#[derive(Clone, Default)]
pub struct EchoConnector {
    pub seen: Arc<Mutex<Vec<ApiRequest>>>,
}

impl Connector for EchoConnector {
    fn connect(
        &self,
        request: ApiRequest,
        body: BodyReceiver,
    ) -> BoxFuture<'static, Result<ConnectorResponse, ConnectorError>> {
        let mut head = ApiResponse::new(200);
        head.set_header("x-echo-destination", &request.destination);
        self.seen.lock().unwrap().push(request);
        async move { Ok(ConnectorResponse { head, body }) }.boxed()
    }
}

/// Connector whose upstream is always down.
pub struct DownConnector;

impl Connector for DownConnector {
    fn connect(
        &self,
        _request: ApiRequest,
        _body: BodyReceiver,
    ) -> BoxFuture<'static, Result<ConnectorResponse, ConnectorError>> {
        async { Err(ConnectorError::Unreachable("connection refused".into())) }.boxed()
    }
}

/// Connector that answers 200 with a body the test feeds by hand.
pub struct StreamingConnector {
    body: Mutex<Option<BodyReceiver>>,
}

impl StreamingConnector {
    pub fn new(body: BodyReceiver) -> Self {
        Self {
            body: Mutex::new(Some(body)),
        }
    }
}

impl Connector for StreamingConnector {
    fn connect(
        &self,
        _request: ApiRequest,
        _body: BodyReceiver,
    ) -> BoxFuture<'static, Result<ConnectorResponse, ConnectorError>> {
        let body = self.body.lock().unwrap().take();
        async move {
            let body = body.ok_or_else(|| ConnectorError::InvalidRequest("body already taken".into()))?;
            Ok(ConnectorResponse {
                head: ApiResponse::new(200),
                body,
            })
        }
        .boxed()
    }
}

/// Connector that never answers.
pub struct HangingConnector;

impl Connector for HangingConnector {
    fn connect(
        &self,
        _request: ApiRequest,
        _body: BodyReceiver,
    ) -> BoxFuture<'static, Result<ConnectorResponse, ConnectorError>> {
        futures_util::future::pending().boxed()
    }
}

/// Drain a body stream into one buffer; panics if it ends with an error.
pub async fn collect(body: BodyReceiver) -> Vec<u8> {
    let mut out = Vec::new();
    for item in drain(body).await {
        out.extend_from_slice(&item.unwrap());
    }
    out
}

/// Every item of a body stream, errors included.
pub async fn drain(mut body: BodyReceiver) -> Vec<BodyChunk> {
    let mut items = Vec::new();
    while let Some(item) = body.recv().await {
        items.push(item);
    }
    items
}

/// Start a simple mock backend that returns a fixed response and echoes the
/// request line in `x-request-line`.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let raw = read_request(&mut socket).await;
                        let request_line = raw.lines().next().unwrap_or_default().to_string();

                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nx-request-line: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            request_line,
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read a request head, plus a chunked body if one is announced.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = tokio::time::timeout(Duration::from_millis(500), socket.read(&mut buf)).await;
        match read {
            Ok(Ok(n)) if n > 0 => raw.extend_from_slice(&buf[..n]),
            _ => break,
        }
        let text = String::from_utf8_lossy(&raw).to_ascii_lowercase();
        if let Some(end) = text.find("\r\n\r\n") {
            let chunked = text[..end].contains("transfer-encoding: chunked");
            if !chunked || text.ends_with("0\r\n\r\n") {
                break;
            }
        }
    }
    String::from_utf8_lossy(&raw).into_owned()
}
