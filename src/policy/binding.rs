//! Policy bindings: a policy plus its parsed configuration.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::policy::scope::PolicyScope;
use crate::policy::spi::Policy;

/// Opaque, already-parsed policy configuration.
///
/// Cheap to clone; the value itself is shared.
#[derive(Clone)]
pub struct PolicyConfiguration(Arc<dyn Any + Send + Sync>);

impl PolicyConfiguration {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self(Arc::new(value))
    }

    /// Configuration for policies that take none.
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Typed view of the configuration, `None` if it holds another type.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl Default for PolicyConfiguration {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PolicyConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PolicyConfiguration(..)")
    }
}

/// Immutable pairing of a policy with its configuration.
///
/// A chain holds its bindings in an ordered list that is never mutated during
/// a traversal.
#[derive(Clone)]
pub struct PolicyBinding {
    policy: Arc<dyn Policy>,
    configuration: PolicyConfiguration,
    scope: PolicyScope,
}

impl PolicyBinding {
    /// Bind a policy; its execution scope defaults to the policy name.
    pub fn new(policy: Arc<dyn Policy>, configuration: PolicyConfiguration) -> Self {
        let scope = PolicyScope::new(policy.name());
        Self {
            policy,
            configuration,
            scope,
        }
    }

    /// Run the policy under an explicit scope, e.g. the plugin it came from.
    pub fn with_scope(mut self, scope: PolicyScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn policy(&self) -> &dyn Policy {
        self.policy.as_ref()
    }

    pub fn configuration(&self) -> &PolicyConfiguration {
        &self.configuration
    }

    pub fn scope(&self) -> &PolicyScope {
        &self.scope
    }

    pub fn name(&self) -> &str {
        self.policy.name()
    }
}

impl fmt::Debug for PolicyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyBinding")
            .field("policy", &self.policy.name())
            .field("scope", &self.scope)
            .finish()
    }
}
