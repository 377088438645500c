//! Qube AWS Provider
//!
//! `Provider` implementation over the AWS SDK. Each service lives in its own
//! module; this file holds the client set and dispatches by resource kind.

mod autoscaling;
mod ec2;
mod elbv2;
mod iam;
mod sqs;
pub mod wait;

use std::collections::HashMap;

use aws_config::{BehaviorVersion, Region};
use log::debug;
use qube_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult};
use qube_core::resource::{Resource, ResourceId, ResourceKind, State};

pub use wait::WaitPolicy;

/// AWS Provider
pub struct AwsProvider {
    ec2_client: aws_sdk_ec2::Client,
    elbv2_client: aws_sdk_elasticloadbalancingv2::Client,
    iam_client: aws_sdk_iam::Client,
    autoscaling_client: aws_sdk_autoscaling::Client,
    sqs_client: aws_sdk_sqs::Client,
    region: String,
    wait_policy: WaitPolicy,
}

impl AwsProvider {
    /// Create a new AWS Provider
    ///
    /// Credentials come from the SDK's default chain. Without an explicit
    /// region the ambient configuration decides.
    pub async fn new(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_default();
        debug!("Using AWS region {:?}", region);

        Self {
            ec2_client: aws_sdk_ec2::Client::new(&config),
            elbv2_client: aws_sdk_elasticloadbalancingv2::Client::new(&config),
            iam_client: aws_sdk_iam::Client::new(&config),
            autoscaling_client: aws_sdk_autoscaling::Client::new(&config),
            sqs_client: aws_sdk_sqs::Client::new(&config),
            region,
            wait_policy: WaitPolicy::default(),
        }
    }

    pub fn with_wait_policy(mut self, wait_policy: WaitPolicy) -> Self {
        self.wait_policy = wait_policy;
        self
    }

    /// Region the clients were configured with (empty if none was resolved)
    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Accept both `&str` and `Option<&str>` accessors
///
/// SDK accessors for members the service marks as required return `&str`,
/// the others `Option<&str>`.
pub(crate) fn opt<'a>(value: impl Into<Option<&'a str>>) -> Option<&'a str> {
    value.into().filter(|s| !s.is_empty())
}

/// Same as [`opt`] for nested structures in responses
pub(crate) fn present<'a, T>(value: impl Into<Option<&'a T>>) -> Option<&'a T> {
    value.into()
}

pub(crate) fn lookup_failed(action: &str, e: impl std::fmt::Debug) -> ProviderError {
    ProviderError::lookup(format!("Failed to {}: {:?}", action, e))
}

pub(crate) fn create_failed(action: &str, e: impl std::fmt::Debug) -> ProviderError {
    ProviderError::create(format!("Failed to {}: {:?}", action, e))
}

/// State of a resource reported by a list call
pub(crate) fn listed(kind: ResourceKind, name: &str, identifier: &str) -> State {
    State::existing(ResourceId::new(kind, name), HashMap::new()).with_identifier(identifier)
}

/// State of a resource the provider just created from `resource`
pub(crate) fn created(resource: &Resource, identifier: impl Into<String>) -> State {
    State::existing(resource.id.clone(), resource.attributes.clone())
        .with_identifier(identifier)
        .with_tags(resource.tags.clone())
}

/// Identifier missing from a create response
pub(crate) fn no_identifier(what: &str) -> ProviderError {
    ProviderError::create(format!("{} created but no ID returned", what))
}

/// Parent identifier of a scoped kind
pub(crate) fn require_scope(kind: ResourceKind, scope: Option<&str>) -> ProviderResult<&str> {
    scope.ok_or_else(|| {
        ProviderError::invalid_input(format!("{} can only be listed under its parent", kind))
    })
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn list(
        &self,
        kind: ResourceKind,
        scope: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<Vec<State>>> {
        let scope = scope.map(String::from);
        Box::pin(async move {
            let scope = scope.as_deref();
            match kind {
                ResourceKind::Vpc => self.list_vpcs().await,
                ResourceKind::InternetGateway => self.list_internet_gateways().await,
                ResourceKind::InternetGatewayAttachment => {
                    self.list_internet_gateway_attachments(require_scope(kind, scope)?)
                        .await
                }
                ResourceKind::RouteTable => {
                    self.list_route_tables(require_scope(kind, scope)?).await
                }
                ResourceKind::Route => self.list_routes(require_scope(kind, scope)?).await,
                ResourceKind::Subnet => self.list_subnets(require_scope(kind, scope)?).await,
                ResourceKind::RouteTableAssociation => {
                    self.list_route_table_associations(require_scope(kind, scope)?)
                        .await
                }
                ResourceKind::ElasticIp => self.list_addresses().await,
                ResourceKind::NatGateway => {
                    self.list_nat_gateways(require_scope(kind, scope)?).await
                }
                ResourceKind::SecurityGroup => {
                    self.list_security_groups(require_scope(kind, scope)?).await
                }
                ResourceKind::SecurityGroupIngress => {
                    self.list_ingress_rules(require_scope(kind, scope)?).await
                }
                ResourceKind::KeyPair => self.list_key_pairs().await,
                ResourceKind::LaunchTemplate => self.list_launch_templates().await,
                ResourceKind::LoadBalancer => self.list_load_balancers().await,
                ResourceKind::Listener => self.list_listeners(require_scope(kind, scope)?).await,
                ResourceKind::TargetGroup => self.list_target_groups().await,
                ResourceKind::ListenerRule => {
                    self.list_listener_rules(require_scope(kind, scope)?).await
                }
                ResourceKind::InstanceProfile => self.list_instance_profiles().await,
                ResourceKind::Role => self.list_roles().await,
                ResourceKind::InstanceProfileRole => {
                    self.list_instance_profile_roles(require_scope(kind, scope)?)
                        .await
                }
                ResourceKind::Policy => self.list_policies().await,
                ResourceKind::RolePolicyAttachment => {
                    self.list_attached_policies(require_scope(kind, scope)?).await
                }
                ResourceKind::AutoScalingGroup => self.list_auto_scaling_groups().await,
                ResourceKind::Queue => self.list_queues().await,
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let result = match resource.kind() {
                ResourceKind::Vpc => self.create_vpc(&resource).await,
                ResourceKind::InternetGateway => self.create_internet_gateway(&resource).await,
                ResourceKind::InternetGatewayAttachment => {
                    self.attach_internet_gateway(&resource).await
                }
                ResourceKind::RouteTable => self.create_route_table(&resource).await,
                ResourceKind::Route => self.create_route(&resource).await,
                ResourceKind::Subnet => self.create_subnet(&resource).await,
                ResourceKind::RouteTableAssociation => self.associate_route_table(&resource).await,
                ResourceKind::ElasticIp => self.allocate_address(&resource).await,
                ResourceKind::NatGateway => self.create_nat_gateway(&resource).await,
                ResourceKind::SecurityGroup => self.create_security_group(&resource).await,
                ResourceKind::SecurityGroupIngress => self.authorize_ingress(&resource).await,
                ResourceKind::KeyPair => self.create_key_pair(&resource).await,
                ResourceKind::LaunchTemplate => self.create_launch_template(&resource).await,
                ResourceKind::LoadBalancer => self.create_load_balancer(&resource).await,
                ResourceKind::Listener => self.create_listener(&resource).await,
                ResourceKind::TargetGroup => self.create_target_group(&resource).await,
                ResourceKind::ListenerRule => self.create_listener_rule(&resource).await,
                ResourceKind::InstanceProfile => self.create_instance_profile(&resource).await,
                ResourceKind::Role => self.create_role(&resource).await,
                ResourceKind::InstanceProfileRole => {
                    self.add_role_to_instance_profile(&resource).await
                }
                ResourceKind::Policy => self.create_policy(&resource).await,
                ResourceKind::RolePolicyAttachment => self.attach_role_policy(&resource).await,
                ResourceKind::AutoScalingGroup => self.create_auto_scaling_group(&resource).await,
                ResourceKind::Queue => self.create_queue(&resource).await,
            };
            result.map_err(|e| e.for_resource(resource.id.clone()))
        })
    }

    fn wait_until_available(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move {
            let result = match id.kind {
                ResourceKind::Vpc => self.wait_for_vpc(&identifier).await,
                ResourceKind::NatGateway => self.wait_for_nat_gateway(&identifier).await,
                ResourceKind::InstanceProfile => {
                    // Profiles are identified by ARN; IAM looks them up by name
                    let name = identifier.rsplit('/').next().unwrap_or(&identifier);
                    self.wait_for_instance_profile(name).await
                }
                kind => Err(ProviderError::invalid_input(format!(
                    "{} is available as soon as it is created",
                    kind
                ))),
            };
            result.map_err(|e| e.for_resource(id.clone()))
        })
    }
}
