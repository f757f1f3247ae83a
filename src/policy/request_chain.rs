//! Request phase policy chain.

use crate::exchange::ApiRequest;
use crate::io::BodyTransformer;
use crate::policy::binding::PolicyBinding;
use crate::policy::chain::{Chain, Direction, PolicyChain};
use crate::policy::context::PolicyContext;
use crate::policy::cursor::Order;
use crate::policy::error::PolicyError;
use crate::policy::failure::PolicyFailure;
use crate::policy::scope::PolicyScope;

/// Visits bindings first to last, using the request-facing policy methods.
#[derive(Debug, Clone, Copy)]
pub struct RequestDirection;

impl Direction for RequestDirection {
    type Head = ApiRequest;

    const NAME: &'static str = "request";

    const ORDER: Order = Order::Forward;

    fn apply(
        binding: &PolicyBinding,
        head: ApiRequest,
        context: &PolicyContext,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        binding
            .policy()
            .apply_request(head, context, binding.configuration(), chain)
    }

    fn process_failure(
        binding: &PolicyBinding,
        failure: PolicyFailure,
        context: &PolicyContext,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        binding
            .policy()
            .process_request_failure(failure, context, binding.configuration(), chain)
    }

    fn body_transformer(
        binding: &PolicyBinding,
        head: &ApiRequest,
        context: &PolicyContext,
        scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        binding
            .policy()
            .request_body(head, context, binding.configuration(), scope)
    }
}

/// Chain applied to an inbound request on its way to the upstream.
pub type RequestChain = Chain<RequestDirection>;
