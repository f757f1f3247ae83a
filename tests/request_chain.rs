//! Request-direction chain behaviour: ordering, skip, failures, errors,
//! panicking policies and continuations resumed from other threads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::Method;
use policy_gateway::policy::{ChainOutcome, ChainState};
use policy_gateway::{ApiRequest, PolicyContext, PolicyError, PolicyFailure, PolicyFailureType, RequestChain};

mod common;
use common::{
    binding, Deferred, Journal, Misbehaviour, Misbehaving, PanicAt, Panicking, Recording, Rejecting,
    Skipping, Tagging,
};

fn request() -> ApiRequest {
    ApiRequest::new(Method::GET, "/orders")
}

#[tokio::test]
async fn test_policies_run_in_forward_order() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![
            binding(Recording::new("a", &journal)),
            binding(Recording::new("b", &journal)),
            binding(Recording::new("c", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    assert_eq!(chain.state(), ChainState::Unstarted);

    chain.apply(request());

    match outcome.await.unwrap() {
        ChainOutcome::Head(request) => assert_eq!(request.header("x-trail"), Some("a,b,c")),
        other => panic!("expected head, got {other:?}"),
    }
    assert_eq!(journal.entries(), ["a:request", "b:request", "c:request"]);
    assert_eq!(chain.state(), ChainState::Terminated);
}

#[tokio::test]
async fn test_empty_chain_delivers_head_immediately() {
    let chain = RequestChain::new(Vec::new(), Arc::new(PolicyContext::new()));
    let outcome = chain.completion();
    chain.apply(request());

    assert!(matches!(outcome.await.unwrap(), ChainOutcome::Head(_)));
    assert_eq!(chain.pipeline_len(), Some(0));
}

#[tokio::test]
async fn test_skip_bypasses_remaining_policies() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![
            binding(Recording::new("a", &journal)),
            binding(Skipping {
                journal: journal.clone(),
            }),
            binding(Recording::new("c", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.apply(request());

    match outcome.await.unwrap() {
        ChainOutcome::Head(request) => assert_eq!(request.header("x-trail"), Some("a")),
        other => panic!("expected head, got {other:?}"),
    }
    assert_eq!(journal.entries(), ["a:request", "skipping:request"]);
}

#[tokio::test]
async fn test_chain_level_skip_runs_no_policy() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![binding(Recording::new("a", &journal))],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.skip(request());

    assert!(matches!(outcome.await.unwrap(), ChainOutcome::Head(_)));
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_failure_routes_through_remaining_policies() {
    let journal = Journal::new();
    let heads = Arc::new(Mutex::new(0));
    let failures = Arc::new(Mutex::new(Vec::new()));

    let chain = RequestChain::new(
        vec![
            binding(Recording::new("a", &journal)),
            binding(Rejecting::new("b", &journal)),
            binding(Recording::new("c", &journal)),
            binding(Recording::new("d", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let h = heads.clone();
    chain.head_handler(move |_| *h.lock().unwrap() += 1);
    let f = failures.clone();
    chain.policy_failure_handler(move |failure| f.lock().unwrap().push(failure));

    chain.apply(request());

    assert_eq!(
        journal.entries(),
        ["a:request", "b:request", "c:request-failure", "d:request-failure"]
    );
    assert_eq!(*heads.lock().unwrap(), 0);
    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reason(), (PolicyFailureType::Authorization, 10002));
    assert_eq!(chain.failure(), Some(failures[0].clone()));
}

#[tokio::test]
async fn test_failure_from_last_policy_goes_straight_to_handler() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![
            binding(Recording::new("a", &journal)),
            binding(Rejecting::new("b", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.apply(request());

    assert!(matches!(outcome.await.unwrap(), ChainOutcome::Failure(_)));
    assert_eq!(journal.entries(), ["a:request", "b:request"]);
}

#[tokio::test]
async fn test_apply_failure_on_unstarted_chain_visits_every_policy() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![
            binding(Recording::new("a", &journal)),
            binding(Recording::new("b", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.apply_failure(PolicyFailure::new(PolicyFailureType::Other, 1, "upstream said no"));

    assert!(matches!(outcome.await.unwrap(), ChainOutcome::Failure(_)));
    assert_eq!(journal.entries(), ["a:request-failure", "b:request-failure"]);
    assert_eq!(chain.pipeline_len(), Some(0));
}

#[tokio::test]
async fn test_returned_error_reaches_error_handler_once() {
    let journal = Journal::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let chain = RequestChain::new(
        vec![
            binding(Misbehaving {
                mode: Misbehaviour::ReturnErr,
            }),
            binding(Recording::new("after", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let e = errors.clone();
    chain.policy_error_handler(move |error| e.lock().unwrap().push(error));
    chain.apply(request());

    assert_eq!(
        *errors.lock().unwrap(),
        [PolicyError::raised("misbehaving", "boom")]
    );
    assert!(journal.entries().is_empty());
    assert_eq!(chain.state(), ChainState::Terminated);
}

#[tokio::test]
async fn test_returned_error_overrides_queued_continuation() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![
            binding(Misbehaving {
                mode: Misbehaviour::ApplyThenErr,
            }),
            binding(Recording::new("after", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.apply(request());

    match outcome.await.unwrap() {
        ChainOutcome::Error(error) => {
            assert_eq!(error, PolicyError::raised("misbehaving", "late boom"))
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_raise_error_through_continuation() {
    let chain = RequestChain::new(
        vec![binding(Misbehaving {
            mode: Misbehaviour::Raise,
        })],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.apply(request());

    assert!(matches!(
        outcome.await.unwrap(),
        ChainOutcome::Error(PolicyError::Raised { .. })
    ));
}

#[tokio::test]
async fn test_dropped_continuation_is_reported() {
    let chain = RequestChain::new(
        vec![binding(Misbehaving {
            mode: Misbehaviour::Abandon,
        })],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.apply(request());

    match outcome.await.unwrap() {
        ChainOutcome::Error(PolicyError::Abandoned { policy }) => assert_eq!(policy, "misbehaving"),
        other => panic!("expected abandoned, got {other:?}"),
    }
}

#[tokio::test]
async fn test_continuation_resumed_from_another_thread() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![
            binding(Deferred {
                delay: Duration::from_millis(20),
                journal: journal.clone(),
            }),
            binding(Recording::new("next", &journal)),
        ],
        Arc::new(PolicyContext::new()),
    );
    let outcome = chain.completion();
    chain.apply(request());

    // The deferred policy has returned but not resumed yet.
    assert_eq!(chain.state(), ChainState::Iterating);

    let outcome = tokio::time::timeout(Duration::from_secs(2), outcome)
        .await
        .unwrap()
        .unwrap();
    match outcome {
        ChainOutcome::Head(request) => assert_eq!(request.header("x-trail"), Some("next")),
        other => panic!("expected head, got {other:?}"),
    }
    assert_eq!(
        journal.entries(),
        ["deferred:returned", "deferred:resumed", "next:request"]
    );
}

#[tokio::test]
async fn test_long_chain_does_not_grow_the_stack() {
    let journal = Journal::new();
    let bindings: Vec<_> = (0..2_000)
        .map(|i| binding(Recording::new(&format!("p{i}"), &journal)))
        .collect();
    let chain = RequestChain::new(bindings, Arc::new(PolicyContext::new()));
    let outcome = chain.completion();
    chain.apply(request());

    assert!(matches!(outcome.await.unwrap(), ChainOutcome::Head(_)));
    assert_eq!(journal.entries().len(), 2_000);
}

#[tokio::test]
async fn test_late_continuation_after_termination_is_ignored() {
    let journal = Journal::new();
    let chain = RequestChain::new(
        vec![binding(Recording::new("a", &journal))],
        Arc::new(PolicyContext::new()),
    );
    let heads = Arc::new(Mutex::new(0));
    let h = heads.clone();
    chain.head_handler(move |_| *h.lock().unwrap() += 1);

    chain.apply(request());
    chain.apply(request());
    chain.apply_failure(PolicyFailure::new(PolicyFailureType::Other, 1, "late"));

    assert_eq!(*heads.lock().unwrap(), 1);
    assert_eq!(journal.entries(), ["a:request"]);
    assert_eq!(chain.state(), ChainState::Terminated);
}

#[tokio::test]
async fn test_raise_error_after_head_reaches_handler_once() {
    let chain = RequestChain::new(Vec::new(), Arc::new(PolicyContext::new()));
    let outcome = chain.completion();
    chain.apply(request());
    assert!(matches!(outcome.await.unwrap(), ChainOutcome::Head(_)));

    let errors = Arc::new(Mutex::new(0));
    let e = errors.clone();
    chain.policy_error_handler(move |_| *e.lock().unwrap() += 1);
    chain.raise_error(PolicyError::raised("engine", "client went away"));
    chain.raise_error(PolicyError::raised("engine", "again"));

    assert_eq!(*errors.lock().unwrap(), 1);
    assert!(chain.write(bytes::Bytes::from_static(b"x")).is_err());
}

#[tokio::test]
async fn test_panicking_policy_terminates_the_chain() {
    for at in [PanicAt::Request, PanicAt::AfterApply] {
        let journal = Journal::new();
        let tagging = Tagging::new("t");
        let aborts = tagging.aborts.clone();
        let chain = RequestChain::new(
            vec![
                binding(tagging),
                binding(Panicking { at }),
                binding(Recording::new("after", &journal)),
            ],
            Arc::new(PolicyContext::new()),
        );
        let outcome = chain.completion();
        chain.apply(request());

        match outcome.await.unwrap() {
            ChainOutcome::Error(PolicyError::Raised { policy, message }) => {
                assert_eq!(policy, "panicking");
                assert!(message.contains("panicked"), "{at:?}: {message}");
            }
            other => panic!("{at:?}: expected raised error, got {other:?}"),
        }
        assert_eq!(chain.state(), ChainState::Terminated);
        assert_eq!(aborts.load(std::sync::atomic::Ordering::SeqCst), 1, "{at:?}");
        assert!(journal.entries().is_empty(), "{at:?}");
    }
}
