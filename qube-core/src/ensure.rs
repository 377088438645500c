//! Ensure - Idempotent check-then-create primitive
//!
//! `ensure` lists the existing resources of a kind, returns the first one that
//! satisfies the kind's match criteria, and only creates the resource when
//! nothing matches. A lookup hit and a successful create are equivalent
//! terminal states: both yield a `State` carrying the provider identifier.

use log::{debug, info};

use crate::matcher::MatchCriteria;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Resource, State};
use crate::schema::resource_schema;

/// Outcome of an ensure operation
#[derive(Debug, Clone, PartialEq)]
pub enum Ensured {
    /// An existing resource matched; nothing was mutated
    Found(State),
    /// No resource matched and one was created
    Created(State),
}

impl Ensured {
    pub fn state(&self) -> &State {
        match self {
            Ensured::Found(state) | Ensured::Created(state) => state,
        }
    }

    pub fn into_state(self) -> State {
        match self {
            Ensured::Found(state) | Ensured::Created(state) => state,
        }
    }

    /// Provider identifier of the ensured resource
    ///
    /// Never empty: `ensure` rejects states without an identifier.
    pub fn identifier(&self) -> &str {
        self.state().identifier.as_deref().unwrap_or_default()
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }
}

/// Ensure a resource exists, creating it only if no existing one matches
pub async fn ensure<P: Provider + ?Sized>(
    provider: &P,
    resource: &Resource,
) -> ProviderResult<Ensured> {
    if let Some(criteria) = MatchCriteria::for_resource(resource)?
        && let Some(state) = find(provider, resource, &criteria).await?
    {
        debug!(
            "{} already exists as {}",
            resource.id,
            state.identifier.as_deref().unwrap_or_default()
        );
        return Ok(Ensured::Found(state));
    }
    create(provider, resource).await.map(Ensured::Created)
}

/// Find an existing resource of the same kind (and scope) matching `criteria`
pub async fn find<P: Provider + ?Sized>(
    provider: &P,
    resource: &Resource,
    criteria: &MatchCriteria,
) -> ProviderResult<Option<State>> {
    let kind = resource.kind();
    let scope = resource.scope();
    if kind.scope_attribute().is_some() && scope.is_none() {
        return Err(ProviderError::invalid_input(format!(
            "{} must be listed under its parent, but no parent identifier was given",
            kind
        ))
        .for_resource(resource.id.clone()));
    }

    let existing = provider
        .list(kind, scope)
        .await
        .map_err(|e| e.for_resource(resource.id.clone()))?;

    match existing.into_iter().find(|state| criteria.matches(state)) {
        Some(state) if state.identifier.as_deref().is_none_or(str::is_empty) => Err(
            ProviderError::lookup("Existing resource reported without an identifier")
                .for_resource(resource.id.clone()),
        ),
        found => Ok(found),
    }
}

/// Create a resource unconditionally
///
/// Validates the payload against the kind's schema, issues the create call
/// and, for kinds created asynchronously, waits until the provider reports
/// the resource available.
pub async fn create<P: Provider + ?Sized>(
    provider: &P,
    resource: &Resource,
) -> ProviderResult<State> {
    if let Err(errors) = resource_schema(resource.kind()).validate(&resource.attributes) {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(
            ProviderError::invalid_input(messages.join("; ")).for_resource(resource.id.clone()),
        );
    }

    info!("Creating {}", resource.id);
    let state = provider
        .create(resource)
        .await
        .map_err(|e| e.for_resource(resource.id.clone()))?;

    let identifier = match state.identifier.as_deref() {
        Some(identifier) if !identifier.is_empty() => identifier.to_string(),
        _ => {
            return Err(ProviderError::create("Resource created but no identifier returned")
                .for_resource(resource.id.clone()));
        }
    };

    if resource.kind().requires_wait() {
        info!("Waiting for {} ({}) to become available", resource.id, identifier);
        provider
            .wait_until_available(&resource.id, &identifier)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use crate::provider::ErrorKind;
    use crate::resource::{ResourceKind, Tags};

    fn qube_vpc() -> Resource {
        Resource::new(ResourceKind::Vpc, "QubeVPC")
            .with_attribute("cidr_block", "172.20.0.0/16")
            .with_tags(Tags::new().with("Name", "QubeVPC").with("Product", "challenge"))
    }

    #[tokio::test]
    async fn ensure_twice_creates_once() {
        let provider = MockProvider::new();

        let first = ensure(&provider, &qube_vpc()).await.unwrap();
        let second = ensure(&provider, &qube_vpc()).await.unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.identifier(), second.identifier());
        assert_eq!(provider.mutation_count(), 1);
    }

    #[tokio::test]
    async fn ensure_waits_for_async_kinds() {
        let provider = MockProvider::new();
        let vpc = ensure(&provider, &qube_vpc()).await.unwrap();
        assert_eq!(provider.waits(), vec![vpc.identifier().to_string()]);
    }

    #[tokio::test]
    async fn lookup_path_does_not_wait() {
        let provider = MockProvider::new();
        ensure(&provider, &qube_vpc()).await.unwrap();
        ensure(&provider, &qube_vpc()).await.unwrap();
        assert_eq!(provider.waits().len(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_create() {
        let provider = MockProvider::new();
        let bad = Resource::new(ResourceKind::Vpc, "QubeVPC")
            .with_attribute("cidr_block", "172.20.0.0/40")
            .with_tags(Tags::new().with("Name", "QubeVPC"));

        let err = ensure(&provider, &bad).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(provider.mutation_count(), 0);
    }

    #[tokio::test]
    async fn create_failure_propagates() {
        let provider = MockProvider::new().fail_create(ResourceKind::Vpc);
        let err = ensure(&provider, &qube_vpc()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Create);
        assert_eq!(err.resource_id.unwrap().name, "QubeVPC");
    }

    #[tokio::test]
    async fn wait_timeout_propagates() {
        let provider = MockProvider::new().time_out(ResourceKind::Vpc);
        let err = ensure(&provider, &qube_vpc()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::WaitTimeout);
    }

    #[tokio::test]
    async fn lookup_failure_propagates() {
        let provider = MockProvider::new().fail_list(ResourceKind::Vpc);
        let err = ensure(&provider, &qube_vpc()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lookup);
        assert_eq!(provider.mutation_count(), 0);
    }

    #[tokio::test]
    async fn scoped_kind_without_parent_is_rejected() {
        let provider = MockProvider::new();
        let route = Resource::new(ResourceKind::Route, "orphan")
            .with_attribute("destination_cidr_block", "0.0.0.0/0");
        let err = ensure(&provider, &route).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn unchecked_kinds_always_create() {
        let provider = MockProvider::new();
        let listener = Resource::new(ResourceKind::Listener, "QubeALB-http")
            .with_attribute("load_balancer_arn", "arn:lb")
            .with_attribute("port", 80i64);

        ensure(&provider, &listener).await.unwrap();
        ensure(&provider, &listener).await.unwrap();
        assert_eq!(provider.mutation_count(), 2);
    }
}
