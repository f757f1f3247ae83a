//! Exchange execution.
//!
//! # Responsibilities
//! - Create the request and response chains for one exchange
//! - Pump body chunks through each chain while its control path runs
//! - Call the connector once the request chain completes
//! - Route a request-side policy failure through the response chain's
//!   failure path before reporting it
//!
//! # Design Decisions
//! - Request and response chain of one exchange share a single
//!   `PolicyContext`, so request policies can leave state for their
//!   response-side counterpart
//! - No retries; an upstream error is reported as-is
//! - A body that breaks off (client, policy stage or upstream) aborts the
//!   chain it was flowing through and reaches the next hop as an error item

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

use bytes::Bytes;

use crate::engine::connector::{body_channel, BodyReceiver, BodySender, Connector};
use crate::exchange::{ApiRequest, ApiResponse};
use crate::policy::{
    Chain, ChainError, ChainOutcome, Direction, PolicyBinding, PolicyContext, PolicyError,
    PolicyFailure, RequestChain, RequestDirection, ResponseChain, ResponseDirection,
};

/// Final result of one exchange.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// The upstream answered and every response policy passed it on.
    Response {
        head: ApiResponse,
        body: BodyReceiver,
    },
    /// A policy failed the exchange.
    Failure(PolicyFailure),
    /// An unrecoverable error occurred.
    Error(PolicyError),
}

impl ExchangeOutcome {
    /// Stable label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Response { .. } => "response",
            Self::Failure(_) => "failure",
            Self::Error(_) => "error",
        }
    }
}

/// Runs exchanges through a fixed, ordered list of policy bindings.
#[derive(Clone)]
pub struct ExchangeExecutor {
    policies: Arc<[PolicyBinding]>,
    connector: Arc<dyn Connector>,
}

impl ExchangeExecutor {
    pub fn new(policies: Vec<PolicyBinding>, connector: Arc<dyn Connector>) -> Self {
        Self {
            policies: policies.into(),
            connector,
        }
    }

    pub fn policies(&self) -> &[PolicyBinding] {
        &self.policies
    }

    /// Execute one exchange with a fresh context.
    pub async fn execute(&self, request: ApiRequest, body: BodyReceiver) -> ExchangeOutcome {
        self.execute_with_context(request, body, Arc::new(PolicyContext::new()))
            .await
    }

    /// Execute one exchange with a caller-supplied context.
    pub async fn execute_with_context(
        &self,
        request: ApiRequest,
        body: BodyReceiver,
        context: Arc<PolicyContext>,
    ) -> ExchangeOutcome {
        let span = tracing::debug_span!(
            "exchange",
            exchange_id = %context.exchange_id(),
            method = %request.method,
            url = %request.url
        );
        self.run(request, body, context).instrument(span).await
    }

    async fn run(
        &self,
        request: ApiRequest,
        body: BodyReceiver,
        context: Arc<PolicyContext>,
    ) -> ExchangeOutcome {
        // 1. Request chain
        let request_chain = RequestChain::new(self.policies.clone(), context.clone());
        let (upstream_tx, upstream_rx) = body_channel();
        let outlet = forward_body(&request_chain, upstream_tx);
        let outcome = request_chain.completion();
        request_chain.apply(request);

        // 2. Inbound body, once the pipeline exists
        let pump = pump_body(request_chain.clone(), body, outlet);

        match wait(outcome, RequestDirection::NAME).await {
            ChainOutcome::Head(request) => {
                tracing::debug!(destination = %request.destination, "Request chain complete");
                self.dispatch(request, upstream_rx, context).await
            }
            ChainOutcome::Failure(failure) => {
                pump.abort();
                tracing::info!(failure = %failure, "Request rejected by policy");
                self.process_failure(failure, context).await
            }
            ChainOutcome::Error(error) => {
                pump.abort();
                ExchangeOutcome::Error(error)
            }
        }
    }

    /// 3. Connector, then the response chain.
    async fn dispatch(
        &self,
        request: ApiRequest,
        upstream_body: BodyReceiver,
        context: Arc<PolicyContext>,
    ) -> ExchangeOutcome {
        let response = match self.connector.connect(request, upstream_body).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "Connector failed");
                return ExchangeOutcome::Error(err.into());
            }
        };

        let response_chain = ResponseChain::new(self.policies.clone(), context);
        let (client_tx, client_rx) = body_channel();
        let outlet = forward_body(&response_chain, client_tx);
        let outcome = response_chain.completion();
        response_chain.apply(response.head);
        let pump = pump_body(response_chain.clone(), response.body, outlet);

        match wait(outcome, ResponseDirection::NAME).await {
            ChainOutcome::Head(head) => ExchangeOutcome::Response {
                head,
                body: client_rx,
            },
            ChainOutcome::Failure(failure) => {
                pump.abort();
                ExchangeOutcome::Failure(failure)
            }
            ChainOutcome::Error(error) => {
                pump.abort();
                ExchangeOutcome::Error(error)
            }
        }
    }

    /// 4. Let response policies observe a request-side failure, in reverse.
    async fn process_failure(
        &self,
        failure: PolicyFailure,
        context: Arc<PolicyContext>,
    ) -> ExchangeOutcome {
        let response_chain = ResponseChain::new(self.policies.clone(), context);
        let outcome = response_chain.completion();
        response_chain.apply_failure(failure);

        match wait(outcome, ResponseDirection::NAME).await {
            ChainOutcome::Failure(failure) => ExchangeOutcome::Failure(failure),
            ChainOutcome::Head(head) => {
                // A policy turned the failure into a response; it has no body.
                let (_, body) = body_channel();
                ExchangeOutcome::Response { head, body }
            }
            ChainOutcome::Error(error) => ExchangeOutcome::Error(error),
        }
    }
}

async fn wait<H>(outcome: oneshot::Receiver<ChainOutcome<H>>, direction: &'static str) -> ChainOutcome<H> {
    match outcome.await {
        Ok(outcome) => outcome,
        Err(_) => ChainOutcome::Error(PolicyError::raised(
            direction,
            "chain was dropped without a terminal outcome",
        )),
    }
}

/// Output end of a chain's body stream.
#[derive(Clone)]
struct BodyOutlet {
    tx: Arc<Mutex<Option<BodySender>>>,
    direction: &'static str,
}

impl BodyOutlet {
    fn send(&self, chunk: Bytes) -> Result<(), PolicyError> {
        match self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.send(Ok(chunk)).map_err(|_| {
                PolicyError::Interrupted(format!("{} body receiver went away", self.direction))
            }),
            None => Ok(()),
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Pass `error` on as the final item and close the stream.
    fn fail(&self, error: PolicyError) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(Err(error));
        }
    }
}

/// Send the chain's output body into `tx`; close it at end-of-stream.
fn forward_body<D: Direction>(chain: &Chain<D>, tx: BodySender) -> BodyOutlet {
    let outlet = BodyOutlet {
        tx: Arc::new(Mutex::new(Some(tx))),
        direction: D::NAME,
    };
    let body = outlet.clone();
    chain.body_handler(move |chunk| body.send(chunk));
    let end = outlet.clone();
    chain.end_handler(move || end.close());
    outlet
}

/// Feed `body` into the chain until the stream closes or the chain refuses.
///
/// A source error is raised on the chain. Whenever the chain is aborted the
/// error is passed on through `outlet`.
fn pump_body<D: Direction>(chain: Chain<D>, mut body: BodyReceiver, outlet: BodyOutlet) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = body.recv().await {
            let written = match item {
                Ok(chunk) => chain.write(chunk),
                Err(error) => {
                    tracing::warn!(direction = D::NAME, error = %error, "Body source failed");
                    chain.raise_error(error.clone());
                    Err(ChainError::Aborted(error))
                }
            };
            if let Err(err) = written {
                stop(err, &outlet, D::NAME);
                return;
            }
        }
        if let Err(err) = chain.end() {
            stop(err, &outlet, D::NAME);
        }
    })
}

fn stop(err: ChainError, outlet: &BodyOutlet, direction: &'static str) {
    tracing::debug!(direction, error = %err, "Body pump stopped");
    if let ChainError::Aborted(error) = err {
        outlet.fail(error);
    }
}
