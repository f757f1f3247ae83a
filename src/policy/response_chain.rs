//! Response phase policy chain.
//!
//! Bindings are visited back to front, which is the proper order when
//! applying policies to a response on the way back out: the last policy to
//! touch the outbound request is the first to see the inbound response. The
//! failure path runs in the same reverse order.

use crate::exchange::ApiResponse;
use crate::io::BodyTransformer;
use crate::policy::binding::PolicyBinding;
use crate::policy::chain::{Chain, Direction, PolicyChain};
use crate::policy::context::PolicyContext;
use crate::policy::cursor::Order;
use crate::policy::error::PolicyError;
use crate::policy::failure::PolicyFailure;
use crate::policy::scope::PolicyScope;

#[derive(Debug, Clone, Copy)]
pub struct ResponseDirection;

impl Direction for ResponseDirection {
    type Head = ApiResponse;

    const NAME: &'static str = "response";

    const ORDER: Order = Order::Reverse;

    fn apply(
        binding: &PolicyBinding,
        head: ApiResponse,
        context: &PolicyContext,
        chain: PolicyChain<ApiResponse>,
    ) -> Result<(), PolicyError> {
        binding
            .policy()
            .apply_response(head, context, binding.configuration(), chain)
    }

    fn process_failure(
        binding: &PolicyBinding,
        failure: PolicyFailure,
        context: &PolicyContext,
        chain: PolicyChain<ApiResponse>,
    ) -> Result<(), PolicyError> {
        binding
            .policy()
            .process_response_failure(failure, context, binding.configuration(), chain)
    }

    fn body_transformer(
        binding: &PolicyBinding,
        head: &ApiResponse,
        context: &PolicyContext,
        scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        binding
            .policy()
            .response_body(head, context, binding.configuration(), scope)
    }
}

/// Chain applied to an upstream response on its way back to the client.
pub type ResponseChain = Chain<ResponseDirection>;
