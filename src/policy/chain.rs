//! The chain engine.
//!
//! # Control Flow
//! ```text
//! apply(head) ──▶ [build pipeline once] ──▶ cursor.next()
//!                                             │
//!                 ┌─── Some(i) ───────────────┴──── None ───┐
//!                 ▼                                          ▼
//!   policy[i].apply(head, ctx, cfg, PolicyChain)       head handler
//!                 │
//!                 ├─ chain.apply(head)          → next policy
//!                 ├─ chain.skip(head)           → head handler
//!                 ├─ chain.apply_failure(f)     → policy[i+1].process_failure ... → failure handler
//!                 └─ chain.raise_error(e) / Err → abort body stages → error handler
//! ```
//!
//! # Design Decisions
//! - Continuations are trampolined. A policy resuming synchronously only
//!   queues its step; the driver loop already on the stack picks it up once
//!   the policy returns. A policy resuming later from another thread drives
//!   the chain on that thread. No call-stack recursion either way.
//! - `PolicyChain` is move-only and consumed by every continuation method, so
//!   a policy cannot resume twice.
//! - Locks are never held while a control method runs.
//! - The body side (`write`/`end`) has its own lock and shares nothing with
//!   the control side except the pipeline built on first entry.
//! - A panic inside a policy, a transformer factory or a body stage is
//!   caught at the invocation and raised as a `PolicyError`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::io::{BodyPipeline, BodySink, BodyTransformer, Stage};
use crate::observability::metrics;
use crate::policy::binding::PolicyBinding;
use crate::policy::context::PolicyContext;
use crate::policy::cursor::{Cursor, Order};
use crate::policy::error::{ChainError, PolicyError};
use crate::policy::failure::PolicyFailure;
use crate::policy::scope::PolicyScope;

/// Binds the engine to one traversal direction.
///
/// Implemented by [`RequestDirection`](super::RequestDirection) and
/// [`ResponseDirection`](super::ResponseDirection).
pub trait Direction: Send + Sync + 'static {
    /// The head object threaded through this direction.
    type Head: Send + 'static;

    /// Label used in logs and metrics.
    const NAME: &'static str;

    /// Order in which bindings are visited.
    const ORDER: Order;

    /// Invoke the binding's control method for this direction.
    fn apply(
        binding: &PolicyBinding,
        head: Self::Head,
        context: &PolicyContext,
        chain: PolicyChain<Self::Head>,
    ) -> Result<(), PolicyError>;

    /// Invoke the binding's failure method for this direction.
    fn process_failure(
        binding: &PolicyBinding,
        failure: PolicyFailure,
        context: &PolicyContext,
        chain: PolicyChain<Self::Head>,
    ) -> Result<(), PolicyError>;

    /// Ask the binding for its body stage in this direction.
    fn body_transformer(
        binding: &PolicyBinding,
        head: &Self::Head,
        context: &PolicyContext,
        scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>>;
}

/// Control state of a chain instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Unstarted,
    Iterating,
    /// A terminal handler (head, failure or error) has fired.
    Terminated,
}

/// Terminal outcome of a traversal, as delivered by [`Chain::completion`].
#[derive(Debug)]
pub enum ChainOutcome<H> {
    Head(H),
    Failure(PolicyFailure),
    Error(PolicyError),
}

type HeadHandler<H> = Box<dyn FnOnce(H) + Send>;
type FailureHandler = Box<dyn FnOnce(PolicyFailure) + Send>;
type ErrorHandler = Box<dyn FnOnce(PolicyError) + Send>;
type BodyHandler = Box<dyn FnMut(Bytes) -> Result<(), PolicyError> + Send>;
type EndHandler = Box<dyn FnOnce() + Send>;

enum Step<H> {
    Apply(H),
    Skip(H),
    Failure(PolicyFailure),
    Error(PolicyError),
}

impl<H> Step<H> {
    fn label(&self) -> &'static str {
        match self {
            Step::Apply(_) => "apply",
            Step::Skip(_) => "skip",
            Step::Failure(_) => "failure",
            Step::Error(_) => "error",
        }
    }
}

trait Resume<H>: Send + Sync {
    fn resume(self: Arc<Self>, step: Step<H>);
}

/// Continuation handed to a policy for one invocation.
///
/// Call exactly one of its methods, now or later from any thread. Dropping it
/// unused raises [`PolicyError::Abandoned`] so the exchange cannot stall.
#[must_use = "a policy must resume the chain through its PolicyChain"]
pub struct PolicyChain<H: Send + 'static> {
    target: Option<Arc<dyn Resume<H>>>,
    scope: PolicyScope,
}

impl<H: Send + 'static> PolicyChain<H> {
    fn new(target: Arc<dyn Resume<H>>, scope: PolicyScope) -> Self {
        Self {
            target: Some(target),
            scope,
        }
    }

    /// Continue with the next policy, passing the (possibly mutated) head.
    pub fn apply(mut self, head: H) {
        self.resume(Step::Apply(head));
    }

    /// Bypass every remaining policy and deliver `head` to the terminal handler.
    pub fn skip(mut self, head: H) {
        self.resume(Step::Skip(head));
    }

    /// Switch to the failure path; remaining policies see `failure`.
    pub fn apply_failure(mut self, failure: PolicyFailure) {
        self.resume(Step::Failure(failure));
    }

    /// Abort the exchange with an unrecoverable error.
    pub fn raise_error(mut self, error: PolicyError) {
        self.resume(Step::Error(error));
    }

    /// Scope the invoked policy executes under.
    pub fn scope(&self) -> &PolicyScope {
        &self.scope
    }

    fn resume(&mut self, step: Step<H>) {
        if let Some(target) = self.target.take() {
            target.resume(step);
        }
    }
}

impl<H: Send + 'static> Drop for PolicyChain<H> {
    fn drop(&mut self) {
        if self.target.is_some() {
            let policy = self.scope.name().to_string();
            self.resume(Step::Error(PolicyError::Abandoned { policy }));
        }
    }
}

impl<H: Send + 'static> fmt::Debug for PolicyChain<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyChain")
            .field("scope", &self.scope)
            .field("resumed", &self.target.is_none())
            .finish()
    }
}

struct Control<H> {
    state: ChainState,
    cursor: Cursor,
    pending: Option<Step<H>>,
    driving: bool,
    pipeline_requested: bool,
    failure: Option<PolicyFailure>,
    on_head: Option<HeadHandler<H>>,
    on_failure: Option<FailureHandler>,
    on_error: Option<ErrorHandler>,
}

impl<H> Control<H> {
    /// True exactly once: the first entry builds the pipeline.
    fn request_pipeline(&mut self) -> bool {
        !std::mem::replace(&mut self.pipeline_requested, true)
    }
}

/// The chain's own end of the body pipeline.
#[derive(Default)]
struct TerminalBody {
    on_body: Option<BodyHandler>,
    on_end: Option<EndHandler>,
}

impl BodySink for TerminalBody {
    fn write(&mut self, chunk: Bytes) -> Result<(), PolicyError> {
        match self.on_body.as_mut() {
            Some(handler) => handler(chunk),
            None => {
                tracing::trace!(len = chunk.len(), "No body handler registered, dropping chunk");
                Ok(())
            }
        }
    }

    fn end(&mut self) -> Result<(), PolicyError> {
        if let Some(handler) = self.on_end.take() {
            handler();
        }
        Ok(())
    }
}

#[derive(Default)]
struct Body {
    pipeline: Option<BodyPipeline>,
    terminal: TerminalBody,
    finished: bool,
    aborted: Option<PolicyError>,
}

enum Action<H> {
    Apply { binding: PolicyBinding, head: H },
    ProcessFailure { binding: PolicyBinding, failure: PolicyFailure },
    Head { handler: Option<HeadHandler<H>>, head: H },
    Failure { handler: Option<FailureHandler>, failure: PolicyFailure },
    Error { handler: Option<ErrorHandler>, error: PolicyError },
}

struct ChainInner<D: Direction> {
    bindings: Arc<[PolicyBinding]>,
    context: Arc<PolicyContext>,
    control: Mutex<Control<D::Head>>,
    body: Mutex<Body>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: Direction> Resume<D::Head> for ChainInner<D> {
    fn resume(self: Arc<Self>, step: Step<D::Head>) {
        {
            let mut control = lock(&self.control);
            if control.state == ChainState::Terminated {
                tracing::warn!(
                    exchange_id = %self.context.exchange_id(),
                    direction = D::NAME,
                    step = step.label(),
                    "Ignoring continuation on a terminated chain"
                );
                return;
            }
            if let Some(previous) = control.pending.replace(step) {
                tracing::warn!(
                    exchange_id = %self.context.exchange_id(),
                    direction = D::NAME,
                    discarded = previous.label(),
                    "Overlapping continuations; keeping the latest"
                );
            }
            if control.driving {
                return;
            }
            control.driving = true;
        }
        self.drive();
    }
}

impl<D: Direction> ChainInner<D> {
    /// Run queued steps until none is left.
    fn drive(self: &Arc<Self>) {
        loop {
            let (build, action) = {
                let mut control = lock(&self.control);
                let step = match control.pending.take() {
                    Some(step) if control.state != ChainState::Terminated => step,
                    _ => {
                        control.driving = false;
                        return;
                    }
                };
                self.plan(&mut control, step)
            };
            self.run(build, action);
        }
    }

    /// Decide what a step does. Only touches control state.
    fn plan(&self, control: &mut Control<D::Head>, step: Step<D::Head>) -> (bool, Action<D::Head>) {
        match step {
            Step::Apply(head) => {
                let build = control.request_pipeline();
                control.state = ChainState::Iterating;
                let action = match control.cursor.next() {
                    Some(index) => Action::Apply {
                        binding: self.bindings[index].clone(),
                        head,
                    },
                    None => {
                        control.state = ChainState::Terminated;
                        Action::Head {
                            handler: control.on_head.take(),
                            head,
                        }
                    }
                };
                (build, action)
            }
            Step::Skip(head) => {
                control.state = ChainState::Terminated;
                let action = Action::Head {
                    handler: control.on_head.take(),
                    head,
                };
                (false, action)
            }
            Step::Failure(failure) => {
                let build = control.request_pipeline();
                control.state = ChainState::Iterating;
                control.failure = Some(failure.clone());
                let action = match control.cursor.next() {
                    Some(index) => Action::ProcessFailure {
                        binding: self.bindings[index].clone(),
                        failure,
                    },
                    None => {
                        control.state = ChainState::Terminated;
                        Action::Failure {
                            handler: control.on_failure.take(),
                            failure,
                        }
                    }
                };
                (build, action)
            }
            Step::Error(error) => {
                control.state = ChainState::Terminated;
                let action = Action::Error {
                    handler: control.on_error.take(),
                    error,
                };
                (false, action)
            }
        }
    }

    fn run(self: &Arc<Self>, build: bool, action: Action<D::Head>) {
        match action {
            Action::Apply { binding, head } => {
                if build && !self.build_pipeline(&head) {
                    return;
                }
                self.invoke(&binding, "apply", |chain| {
                    D::apply(&binding, head, &self.context, chain)
                });
            }
            Action::ProcessFailure { binding, failure } => {
                if build {
                    self.seal_pipeline(Vec::new());
                }
                self.invoke(&binding, "failure", |chain| {
                    D::process_failure(&binding, failure, &self.context, chain)
                });
            }
            Action::Head { handler, head } => {
                if build && !self.build_pipeline(&head) {
                    return;
                }
                tracing::debug!(
                    exchange_id = %self.context.exchange_id(),
                    direction = D::NAME,
                    "Chain complete"
                );
                match handler {
                    Some(handler) => handler(head),
                    None => tracing::warn!(direction = D::NAME, "No head handler registered"),
                }
            }
            Action::Failure { handler, failure } => {
                if build {
                    self.seal_pipeline(Vec::new());
                }
                tracing::debug!(
                    exchange_id = %self.context.exchange_id(),
                    direction = D::NAME,
                    failure = %failure,
                    "Chain finished with a policy failure"
                );
                metrics::record_policy_failure(D::NAME, failure.failure_type);
                match handler {
                    Some(handler) => handler(failure),
                    None => tracing::warn!(direction = D::NAME, "No policy failure handler registered"),
                }
            }
            Action::Error { handler, error } => self.deliver_error(handler, error),
        }
    }

    /// Call one policy control method inside its scope.
    fn invoke<F>(self: &Arc<Self>, binding: &PolicyBinding, phase: &'static str, call: F)
    where
        F: FnOnce(PolicyChain<D::Head>) -> Result<(), PolicyError>,
    {
        tracing::debug!(
            exchange_id = %self.context.exchange_id(),
            direction = D::NAME,
            policy = binding.name(),
            phase,
            "Invoking policy"
        );
        metrics::record_policy_invocation(D::NAME, phase);

        let target: Arc<dyn Resume<D::Head>> = self.clone();
        let chain = PolicyChain::new(target, binding.scope().clone());
        // A panic drops the continuation mid-unwind; raising below discards
        // the `Abandoned` step that queues.
        let result = binding
            .scope()
            .run(|_| call(chain))
            .unwrap_or_else(|panic| {
                Err(PolicyError::raised(binding.name(), format!("panicked: {panic}")))
            });

        if let Err(error) = result {
            tracing::error!(
                exchange_id = %self.context.exchange_id(),
                direction = D::NAME,
                policy = binding.name(),
                error = %error,
                "Policy raised an error"
            );
            self.raise(error);
        }
    }

    /// Ask every binding for a body stage and link the present ones.
    ///
    /// Returns `false` when a factory panicked; the chain is then raised
    /// and the stages built so far are aborted.
    fn build_pipeline(&self, head: &D::Head) -> bool {
        let mut stages = Vec::new();
        for index in Cursor::new(D::ORDER, self.bindings.len()) {
            let binding = &self.bindings[index];
            let built = binding
                .scope()
                .run(|scope| D::body_transformer(binding, head, &self.context, scope));
            match built {
                Ok(Some(transformer)) => stages.push(Stage::new(binding.scope().clone(), transformer)),
                Ok(None) => {}
                Err(panic) => {
                    self.seal_pipeline(stages);
                    self.raise(PolicyError::raised(
                        binding.name(),
                        format!("body stage factory panicked: {panic}"),
                    ));
                    return false;
                }
            }
        }
        self.seal_pipeline(stages);
        true
    }

    fn seal_pipeline(&self, stages: Vec<Stage>) {
        let mut body = lock(&self.body);
        if body.pipeline.is_none() {
            tracing::debug!(
                exchange_id = %self.context.exchange_id(),
                direction = D::NAME,
                stages = stages.len(),
                "Body pipeline built"
            );
            body.pipeline = Some(BodyPipeline::new(stages));
        }
    }

    /// Terminate immediately with an unrecoverable error from a policy
    /// control method. Ignored once the chain has terminated.
    fn raise(&self, error: PolicyError) {
        let handler = {
            let mut control = lock(&self.control);
            if control.state == ChainState::Terminated {
                tracing::warn!(
                    exchange_id = %self.context.exchange_id(),
                    direction = D::NAME,
                    error = %error,
                    "Error raised on a terminated chain"
                );
                return;
            }
            control.state = ChainState::Terminated;
            control.pending = None;
            control.on_error.take()
        };
        self.deliver_error(handler, error);
    }

    /// Abort the body stream. Unlike [`raise`](Self::raise) this also applies
    /// after the head was delivered, while the body is still streaming; the
    /// error handler still fires at most once.
    fn abort(&self, error: PolicyError) {
        let handler = {
            let mut control = lock(&self.control);
            control.state = ChainState::Terminated;
            control.pending = None;
            control.on_error.take()
        };
        if handler.is_none() && lock(&self.body).aborted.is_some() {
            tracing::debug!(
                exchange_id = %self.context.exchange_id(),
                direction = D::NAME,
                error = %error,
                "Chain already aborted"
            );
            return;
        }
        self.deliver_error(handler, error);
    }

    fn deliver_error(&self, handler: Option<ErrorHandler>, error: PolicyError) {
        {
            let mut body = lock(&self.body);
            if body.aborted.is_none() {
                if let Some(pipeline) = body.pipeline.as_mut() {
                    pipeline.abort(&error);
                }
                body.aborted = Some(error.clone());
            }
        }
        metrics::record_chain_error(D::NAME, error.kind());
        match handler {
            Some(handler) => handler(error),
            None => tracing::error!(
                direction = D::NAME,
                error = %error,
                "No policy error handler registered"
            ),
        }
    }
}

/// Per-exchange policy chain, generic over its traversal direction.
///
/// Cloning is cheap and yields another handle to the same instance, so the
/// body side can be driven from a different task than the control side.
pub struct Chain<D: Direction> {
    inner: Arc<ChainInner<D>>,
}

impl<D: Direction> Clone for Chain<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Direction> Chain<D> {
    pub fn new(bindings: impl Into<Arc<[PolicyBinding]>>, context: Arc<PolicyContext>) -> Self {
        let bindings = bindings.into();
        let control = Control {
            state: ChainState::Unstarted,
            cursor: Cursor::new(D::ORDER, bindings.len()),
            pending: None,
            driving: false,
            pipeline_requested: false,
            failure: None,
            on_head: None,
            on_failure: None,
            on_error: None,
        };
        Self {
            inner: Arc::new(ChainInner {
                bindings,
                context,
                control: Mutex::new(control),
                body: Mutex::new(Body::default()),
            }),
        }
    }

    // --- Terminal handlers ---

    /// Receives the final head once every policy has run (or on `skip`).
    pub fn head_handler<F>(&self, handler: F)
    where
        F: FnOnce(D::Head) + Send + 'static,
    {
        lock(&self.inner.control).on_head = Some(Box::new(handler));
    }

    /// Receives every chunk leaving the body pipeline.
    ///
    /// Runs under the body lock, so it must not call back into this chain.
    /// Returning `Err` (e.g. because the receiver went away) aborts the body
    /// stages and reaches the error handler instead.
    pub fn body_handler<F>(&self, handler: F)
    where
        F: FnMut(Bytes) -> Result<(), PolicyError> + Send + 'static,
    {
        lock(&self.inner.body).terminal.on_body = Some(Box::new(handler));
    }

    /// Receives the end-of-stream signal leaving the body pipeline. Same
    /// re-entry rule as [`body_handler`](Self::body_handler).
    pub fn end_handler<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.inner.body).terminal.on_end = Some(Box::new(handler));
    }

    pub fn policy_failure_handler<F>(&self, handler: F)
    where
        F: FnOnce(PolicyFailure) + Send + 'static,
    {
        lock(&self.inner.control).on_failure = Some(Box::new(handler));
    }

    pub fn policy_error_handler<F>(&self, handler: F)
    where
        F: FnOnce(PolicyError) + Send + 'static,
    {
        lock(&self.inner.control).on_error = Some(Box::new(handler));
    }

    /// Register head, failure and error handlers that resolve one receiver.
    ///
    /// Replaces any of those handlers registered before.
    pub fn completion(&self) -> oneshot::Receiver<ChainOutcome<D::Head>> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));

        let head_slot = slot.clone();
        self.head_handler(move |head| complete(&head_slot, ChainOutcome::Head(head)));
        let failure_slot = slot.clone();
        self.policy_failure_handler(move |failure| {
            complete(&failure_slot, ChainOutcome::Failure(failure))
        });
        self.policy_error_handler(move |error| complete(&slot, ChainOutcome::Error(error)));

        rx
    }

    // --- Control path ---

    /// Set the head and advance to the next policy (or the head handler).
    pub fn apply(&self, head: D::Head) {
        Arc::clone(&self.inner).resume(Step::Apply(head));
    }

    /// Deliver `head` to the head handler without running any policy.
    pub fn skip(&self, head: D::Head) {
        Arc::clone(&self.inner).resume(Step::Skip(head));
    }

    /// Continue on the failure path from the current cursor position.
    pub fn apply_failure(&self, failure: PolicyFailure) {
        Arc::clone(&self.inner).resume(Step::Failure(failure));
    }

    /// Abort body stages and deliver `error` to the error handler.
    ///
    /// Also usable after the head was delivered, to cut off a body that is
    /// still streaming.
    pub fn raise_error(&self, error: PolicyError) {
        self.inner.abort(error);
    }

    // --- Body path ---

    /// Push a chunk into the body pipeline.
    pub fn write(&self, chunk: Bytes) -> Result<(), ChainError> {
        let result = {
            let mut body = lock(&self.inner.body);
            if body.finished {
                return Err(ChainError::WriteAfterEnd);
            }
            if let Some(error) = &body.aborted {
                return Err(ChainError::Aborted(error.clone()));
            }
            let Body {
                pipeline, terminal, ..
            } = &mut *body;
            match pipeline.as_mut() {
                Some(pipeline) => pipeline.write(chunk, terminal),
                None => terminal.write(chunk),
            }
        };
        result.map_err(|error| self.fail_body(error))
    }

    /// Signal end-of-stream. No write is accepted afterwards.
    pub fn end(&self) -> Result<(), ChainError> {
        let result = {
            let mut body = lock(&self.inner.body);
            if body.finished {
                return Err(ChainError::AlreadyEnded);
            }
            if let Some(error) = &body.aborted {
                return Err(ChainError::Aborted(error.clone()));
            }
            body.finished = true;
            let Body {
                pipeline, terminal, ..
            } = &mut *body;
            match pipeline.as_mut() {
                Some(pipeline) => pipeline.end(terminal),
                None => terminal.end(),
            }
        };
        result.map_err(|error| self.fail_body(error))
    }

    fn fail_body(&self, error: PolicyError) -> ChainError {
        tracing::error!(
            exchange_id = %self.inner.context.exchange_id(),
            direction = D::NAME,
            error = %error,
            "Body stage failed"
        );
        self.inner.abort(error.clone());
        ChainError::Aborted(error)
    }

    // --- Accessors ---

    pub fn policies(&self) -> &[PolicyBinding] {
        &self.inner.bindings
    }

    pub fn context(&self) -> &Arc<PolicyContext> {
        &self.inner.context
    }

    pub fn state(&self) -> ChainState {
        lock(&self.inner.control).state
    }

    /// The most recent failure seen on the failure path.
    pub fn failure(&self) -> Option<PolicyFailure> {
        lock(&self.inner.control).failure.clone()
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.inner.body).finished
    }

    /// Number of linked body stages, `None` until the pipeline is built.
    pub fn pipeline_len(&self) -> Option<usize> {
        lock(&self.inner.body).pipeline.as_ref().map(BodyPipeline::len)
    }
}

fn complete<H>(slot: &Mutex<Option<oneshot::Sender<ChainOutcome<H>>>>, outcome: ChainOutcome<H>) {
    if let Some(tx) = lock(slot).take() {
        let _ = tx.send(outcome);
    }
}

impl<D: Direction> fmt::Debug for Chain<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("direction", &D::NAME)
            .field("policies", &self.inner.bindings.len())
            .field("state", &self.state())
            .finish()
    }
}
