//! The contract every policy implements.

use crate::exchange::{ApiRequest, ApiResponse};
use crate::io::BodyTransformer;
use crate::policy::binding::PolicyConfiguration;
use crate::policy::chain::PolicyChain;
use crate::policy::context::PolicyContext;
use crate::policy::error::PolicyError;
use crate::policy::failure::PolicyFailure;
use crate::policy::scope::PolicyScope;

/// A pluggable interceptor invoked once per exchange and direction.
///
/// Control methods receive the head by value together with a [`PolicyChain`]
/// continuation. The policy must eventually call exactly one of
/// `apply`, `skip`, `apply_failure` or `raise_error` on it, either before
/// returning or later from any thread. Returning `Err` raises an
/// unrecoverable error instead.
///
/// Every method has a pass-through default, so a policy only implements the
/// directions it cares about. A panic in any method is caught by the chain
/// and treated like a returned `Err`.
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    fn apply_request(
        &self,
        request: ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiRequest>,
    ) -> Result<(), PolicyError> {
        chain.apply(request);
        Ok(())
    }

    fn apply_response(
        &self,
        response: ApiResponse,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        chain: PolicyChain<ApiResponse>,
    ) -> Result<(), PolicyError> {
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
        chain.apply_failure(failure);
        Ok(())
    }

    /// Optional request body stage. `None` keeps this policy out of the
    /// request body pipeline. `scope` is the one the stage will run under.
    fn request_body(
        &self,
        _request: &ApiRequest,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        _scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        None
    }

    /// Optional response body stage.
    fn response_body(
        &self,
        _response: &ApiResponse,
        _context: &PolicyContext,
        _config: &PolicyConfiguration,
        _scope: &PolicyScope,
    ) -> Option<Box<dyn BodyTransformer>> {
        None
    }
}
