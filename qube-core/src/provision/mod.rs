//! Provision - Ensure every resource of the stack in dependency order
//!
//! A `Provisioner` wraps a `Provider` and records the outcome of every ensure
//! call. The per-component operations live in the submodules; `run` chains
//! them in a fixed order, passing identifiers from one step to the next.

pub mod compute;
pub mod identity;
pub mod load_balancer;
pub mod network;
pub mod queue;
pub mod security_group;

use log::{debug, info};
use serde::Serialize;

use crate::config::{PolicyScope, StackConfig};
use crate::ensure::{self, Ensured};
use crate::matcher::MatchCriteria;
use crate::provider::{Provider, ProviderResult};
use crate::resource::{Resource, ResourceId, State};

pub use identity::PolicyDocument;
pub use load_balancer::LoadBalancerOutputs;
pub use network::{NatGatewayOutputs, NetworkOutputs, RouteTarget};
pub use security_group::{Ingress, IngressSource};

/// Outcome of one ensured resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub id: ResourceId,
    pub identifier: String,
    pub created: bool,
}

/// Identifiers of every resource of the stack
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackOutputs {
    pub network: NetworkOutputs,
    pub edge_security_group_id: String,
    pub internal_security_group_id: String,
    pub queue_url: String,
    pub load_balancer: LoadBalancerOutputs,
    pub instance_profile_arn: String,
    pub role_arn: String,
    pub key_pair_id: String,
    pub launch_template_id: String,
    pub auto_scaling_group_arn: String,
    pub policy_arn: String,
}

/// Runs ensure operations against a provider and keeps a report of them
pub struct Provisioner<'a, P: Provider + ?Sized> {
    provider: &'a P,
    report: Vec<ReportEntry>,
}

impl<'a, P: Provider + ?Sized> Provisioner<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            report: Vec::new(),
        }
    }

    /// Outcomes recorded so far, in the order the resources were ensured
    ///
    /// Still meaningful after a failed run: it lists what was already in place.
    pub fn report(&self) -> &[ReportEntry] {
        &self.report
    }

    /// Number of resources created (as opposed to found) so far
    pub fn created_count(&self) -> usize {
        self.report.iter().filter(|e| e.created).count()
    }

    fn record(&mut self, id: &ResourceId, state: &State, created: bool) {
        self.report.push(ReportEntry {
            id: id.clone(),
            identifier: state.identifier.clone().unwrap_or_default(),
            created,
        });
    }

    /// Ensure a resource and record the outcome
    pub(crate) async fn ensure(&mut self, resource: &Resource) -> ProviderResult<Ensured> {
        let ensured = ensure::ensure(self.provider, resource).await?;
        self.record(&resource.id, ensured.state(), ensured.was_created());
        Ok(ensured)
    }

    /// Look a resource up without creating it, recording a hit
    pub(crate) async fn find(
        &mut self,
        resource: &Resource,
        criteria: &MatchCriteria,
    ) -> ProviderResult<Option<State>> {
        let found = ensure::find(self.provider, resource, criteria).await?;
        if let Some(ref state) = found {
            self.record(&resource.id, state, false);
        }
        Ok(found)
    }

    /// Create a resource without looking it up first, recording the outcome
    pub(crate) async fn create(&mut self, resource: &Resource) -> ProviderResult<State> {
        let state = ensure::create(self.provider, resource).await?;
        self.record(&resource.id, &state, true);
        Ok(state)
    }

    /// Provision the whole stack
    ///
    /// Steps run strictly in sequence. A failure aborts the run; resources
    /// created before it stay in place and are found again by the next run.
    pub async fn run(&mut self, config: &StackConfig) -> ProviderResult<StackOutputs> {
        info!("Provisioning stack with provider {}", self.provider.name());

        let network = self.provision_network(config).await?;

        let edge_security_group_id = self
            .ensure_edge_security_group(config, &network.vpc_id)
            .await?;
        let internal_security_group_id = self
            .ensure_internal_security_group(config, &network.vpc_id, &edge_security_group_id)
            .await?;

        let queue_url = self
            .ensure_queue(&config.queue.name, config.tags_for(&config.queue.name))
            .await?;

        let load_balancer = self
            .ensure_load_balancer(
                &config.load_balancer,
                &network.public_subnet_ids,
                &edge_security_group_id,
                &network.vpc_id,
                &config.tags,
            )
            .await?;

        let identity = &config.identity;
        let (instance_profile_arn, role_arn) = self
            .ensure_instance_profile(
                &identity.instance_profile_name,
                &identity.role_name,
                &config.tags,
            )
            .await?;

        let compute = &config.compute;
        let key_pair_id = self
            .ensure_key_pair(
                &compute.key_name,
                config.tags_for(&compute.key_name),
                &compute.key_dir,
            )
            .await?;

        let launch_template_id = self
            .ensure_launch_template(
                compute,
                &identity.instance_profile_name,
                std::slice::from_ref(&internal_security_group_id),
                &network.private_subnet_id,
                &compute.key_name,
                config.tags_for(&compute.launch_template_name),
            )
            .await?;

        let auto_scaling_group_arn = self
            .ensure_auto_scaling_group(
                &compute.auto_scaling_group_name,
                &launch_template_id,
                &network.private_subnet_id,
                std::slice::from_ref(&load_balancer.target_group_arn),
                config.tags_for(&compute.auto_scaling_group_name),
            )
            .await?;

        let document = match identity.policy_scope {
            PolicyScope::AutoScalingGroup => PolicyDocument::kms_scoped(&auto_scaling_group_arn)?,
            PolicyScope::Broad => PolicyDocument::kms_broad(),
        };
        let policy_arn = self
            .ensure_role_policy(
                &identity.policy_name,
                &identity.role_name,
                config.tags_for(&identity.policy_name),
                &document,
            )
            .await?;

        debug!("Run finished with {} resources created", self.created_count());

        Ok(StackOutputs {
            network,
            edge_security_group_id,
            internal_security_group_id,
            queue_url,
            load_balancer,
            instance_profile_arn,
            role_arn,
            key_pair_id,
            launch_template_id,
            auto_scaling_group_arn,
            policy_arn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::mock::MockProvider;
    use crate::provider::ErrorKind;
    use crate::resource::{ResourceKind, Tags, Value};

    fn test_config(dir: &tempfile::TempDir) -> StackConfig {
        let mut config = StackConfig::default();
        config.compute.key_dir = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let provider = MockProvider::new();

        let mut first = Provisioner::new(&provider);
        let first_outputs = first.run(&config).await.unwrap();
        let created = provider.mutation_count();
        assert!(created > 0);
        assert_eq!(first.created_count(), created);

        let mut second = Provisioner::new(&provider);
        let second_outputs = second.run(&config).await.unwrap();

        assert_eq!(provider.mutation_count(), created);
        assert_eq!(second.created_count(), 0);
        assert_eq!(first_outputs, second_outputs);
    }

    #[tokio::test]
    async fn run_creates_one_of_each_named_resource() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let provider = MockProvider::new();

        Provisioner::new(&provider).run(&config).await.unwrap();

        assert_eq!(provider.count(ResourceKind::Vpc), 1);
        assert_eq!(provider.count(ResourceKind::Subnet), 3);
        assert_eq!(provider.count(ResourceKind::RouteTable), 2);
        assert_eq!(provider.count(ResourceKind::Route), 2);
        assert_eq!(provider.count(ResourceKind::RouteTableAssociation), 3);
        assert_eq!(provider.count(ResourceKind::SecurityGroup), 2);
        assert_eq!(provider.count(ResourceKind::SecurityGroupIngress), 2);
        assert_eq!(provider.count(ResourceKind::Listener), 1);
        assert_eq!(provider.count(ResourceKind::ListenerRule), 1);
        assert_eq!(provider.count(ResourceKind::AutoScalingGroup), 1);
        assert_eq!(provider.count(ResourceKind::RolePolicyAttachment), 1);
    }

    #[tokio::test]
    async fn resources_are_created_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let provider = MockProvider::new();

        Provisioner::new(&provider).run(&config).await.unwrap();

        let order: Vec<ResourceKind> = provider.created().iter().map(Resource::kind).collect();
        let position = |kind: ResourceKind| order.iter().position(|k| *k == kind).unwrap();

        assert_eq!(order[0], ResourceKind::Vpc);
        assert!(position(ResourceKind::NatGateway) < position(ResourceKind::SecurityGroup));
        assert!(position(ResourceKind::SecurityGroup) < position(ResourceKind::Queue));
        assert!(position(ResourceKind::Queue) < position(ResourceKind::LoadBalancer));
        assert!(position(ResourceKind::LoadBalancer) < position(ResourceKind::InstanceProfile));
        assert!(position(ResourceKind::InstanceProfile) < position(ResourceKind::KeyPair));
        assert!(position(ResourceKind::KeyPair) < position(ResourceKind::LaunchTemplate));
        assert!(position(ResourceKind::LaunchTemplate) < position(ResourceKind::AutoScalingGroup));
        assert_eq!(order.last(), Some(&ResourceKind::RolePolicyAttachment));
    }

    #[tokio::test]
    async fn scoped_policy_references_the_group() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let provider = MockProvider::new();

        let outputs = Provisioner::new(&provider).run(&config).await.unwrap();

        let policies = provider.created_of(ResourceKind::Policy);
        assert_eq!(policies.len(), 1);
        let document = policies[0].get_str("policy_document").unwrap();
        assert!(document.contains(&outputs.auto_scaling_group_arn));
    }

    #[tokio::test]
    async fn failure_keeps_partial_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let provider = MockProvider::new().fail_create(ResourceKind::Queue);

        let mut provisioner = Provisioner::new(&provider);
        let err = provisioner.run(&config).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Create);
        assert_eq!(err.resource_id.unwrap().kind, ResourceKind::Queue);
        assert!(provisioner.report().iter().any(|e| e.id.kind == ResourceKind::SecurityGroup));
        assert_eq!(provider.count(ResourceKind::LoadBalancer), 0);
    }

    #[tokio::test]
    async fn rerun_after_failure_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let provider = MockProvider::new();

        // A previous run got as far as the VPC
        provider.seed(
            ResourceKind::Vpc,
            None,
            State::existing(
                ResourceId::new(ResourceKind::Vpc, "QubeVPC"),
                HashMap::from([("cidr_block".to_string(), Value::from("172.20.0.0/16"))]),
            )
            .with_identifier("vpc-existing")
            .with_tags(Tags::new().with("Name", "QubeVPC").with("Product", "challenge")),
        );

        let outputs = Provisioner::new(&provider).run(&config).await.unwrap();
        assert_eq!(outputs.network.vpc_id, "vpc-existing");
        assert_eq!(provider.created_of(ResourceKind::Vpc).len(), 0);
    }
}
