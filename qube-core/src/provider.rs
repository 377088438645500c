//! Provider - Trait abstracting control-plane operations
//!
//! A Provider knows how to list, create and wait on resources of every
//! `ResourceKind` against a specific cloud account. The provisioning logic in
//! this crate only ever talks to the cloud through this trait.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::resource::{Resource, ResourceId, ResourceKind, State};

/// Category of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A list/describe call failed
    Lookup,
    /// The provider rejected a create/attach/authorize call
    Create,
    /// An asynchronous resource never reached the expected state
    WaitTimeout,
    /// The creation payload was incomplete or malformed
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Lookup => "lookup",
            ErrorKind::Create => "create",
            ErrorKind::WaitTimeout => "wait timeout",
            ErrorKind::InvalidInput => "invalid input",
        };
        f.write_str(s)
    }
}

/// Failure of a provider call, tagged with the resource it concerns
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lookup, message)
    }

    pub fn create(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Create, message)
    }

    pub fn wait_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WaitTimeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Attach the resource this error concerns, keeping an already attached one
    pub fn for_resource(mut self, id: ResourceId) -> Self {
        if self.resource_id.is_none() {
            self.resource_id = Some(id);
        }
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Future returned by provider calls
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Control-plane operations the provisioning logic relies on
///
/// All operations are async. `list` is read-only; `create` and
/// `wait_until_available` are the only calls allowed to touch the account.
pub trait Provider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &'static str;

    /// List existing resources of a kind
    ///
    /// Scoped kinds (see `ResourceKind::scope_attribute`) are listed under the
    /// parent identifier given in `scope`. Every returned state carries its
    /// provider identifier.
    fn list(
        &self,
        kind: ResourceKind,
        scope: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<Vec<State>>>;

    /// Issue the create call for `resource`
    ///
    /// The returned state carries the identifier the provider assigned.
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Block until an asynchronously created resource is available
    fn wait_until_available(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> BoxFuture<'_, ProviderResult<()>>;
}
