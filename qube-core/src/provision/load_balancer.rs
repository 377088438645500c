//! Application load balancer with its listener, target group and rule

use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use super::Provisioner;
use crate::config::LoadBalancerConfig;
use crate::matcher::MatchCriteria;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Resource, ResourceKind, Tags, Value};

/// Status code of the listener's default fixed response
pub const FIXED_RESPONSE_STATUS: &str = "200";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancerOutputs {
    pub load_balancer_arn: String,
    pub target_group_arn: String,
}

fn listener_resource(config: &LoadBalancerConfig, load_balancer_arn: &str) -> Resource {
    Resource::new(
        ResourceKind::Listener,
        format!("{}-{}", config.name, config.listener_port),
    )
    .with_attribute("load_balancer_arn", load_balancer_arn)
    .with_attribute("port", config.listener_port)
    .with_attribute("fixed_response_status", FIXED_RESPONSE_STATUS)
}

fn rule_resource(
    config: &LoadBalancerConfig,
    listener_arn: &str,
    target_group_arn: &str,
) -> Resource {
    Resource::new(
        ResourceKind::ListenerRule,
        format!("{}-{}", config.target_group_name, config.rule_priority),
    )
    .with_attribute("listener_arn", listener_arn)
    .with_attribute("target_group_arn", target_group_arn)
    .with_attribute("path_pattern", config.path_pattern.as_str())
    .with_attribute("priority", i64::from(config.rule_priority))
}

/// Error for a balancer left half set up by an earlier run
fn incomplete(config: &LoadBalancerConfig, missing: String, resource: &Resource) -> ProviderError {
    ProviderError::lookup(format!(
        "Load balancer {} exists but {} was not found; delete the load balancer and rerun",
        config.name, missing
    ))
    .for_resource(resource.id.clone())
}

impl<P: Provider + ?Sized> Provisioner<'_, P> {
    /// Ensure the load balancer
    ///
    /// Listener, target group and forwarding rule are only created together
    /// with the balancer. When it already exists all three are looked up
    /// instead, and a balancer missing any of them is left for manual cleanup.
    pub async fn ensure_load_balancer(
        &mut self,
        config: &LoadBalancerConfig,
        subnets: &[String],
        security_group_id: &str,
        vpc_id: &str,
        tags: &Tags,
    ) -> ProviderResult<LoadBalancerOutputs> {
        let balancer = Resource::new(ResourceKind::LoadBalancer, config.name.as_str())
            .with_attribute("name", config.name.as_str())
            .with_attribute("subnets", subnets.to_vec())
            .with_attribute("security_group_id", security_group_id)
            .with_tags(tags.clone().with("Name", config.name.as_str()));
        let ensured = self.ensure(&balancer).await?;
        let load_balancer_arn = ensured.identifier().to_string();

        let target_group = Resource::new(ResourceKind::TargetGroup, config.target_group_name.as_str())
            .with_attribute("name", config.target_group_name.as_str())
            .with_attribute("vpc_id", vpc_id)
            .with_attribute("port", config.target_port)
            .with_tags(tags.clone().with("Name", config.target_group_name.as_str()));

        if !ensured.was_created() {
            debug!("Load balancer {} exists, recovering its routing", config.name);
            let target_group_arn = self
                .recover_routing(config, &load_balancer_arn, &target_group)
                .await?;
            return Ok(LoadBalancerOutputs {
                load_balancer_arn,
                target_group_arn,
            });
        }

        let listener = listener_resource(config, &load_balancer_arn);
        let listener_arn = self
            .create(&listener)
            .await?
            .identifier
            .unwrap_or_default();

        let target_group_arn = self.ensure(&target_group).await?.identifier().to_string();

        self.create(&rule_resource(config, &listener_arn, &target_group_arn))
            .await?;

        Ok(LoadBalancerOutputs {
            load_balancer_arn,
            target_group_arn,
        })
    }

    /// Find the target group, listener and forwarding rule of an existing
    /// balancer, returning the target group ARN
    async fn recover_routing(
        &mut self,
        config: &LoadBalancerConfig,
        load_balancer_arn: &str,
        target_group: &Resource,
    ) -> ProviderResult<String> {
        let criteria = MatchCriteria::Name(config.target_group_name.clone());
        let target_group_arn = self
            .find(target_group, &criteria)
            .await?
            .and_then(|state| state.identifier)
            .ok_or_else(|| {
                incomplete(
                    config,
                    format!("target group {}", config.target_group_name),
                    target_group,
                )
            })?;

        let listener = listener_resource(config, load_balancer_arn);
        let criteria = MatchCriteria::Attributes(HashMap::from([(
            "port".to_string(),
            Value::from(config.listener_port),
        )]));
        let listener_arn = self
            .find(&listener, &criteria)
            .await?
            .and_then(|state| state.identifier)
            .ok_or_else(|| {
                incomplete(
                    config,
                    format!("its listener on port {}", config.listener_port),
                    &listener,
                )
            })?;

        let rule = rule_resource(config, &listener_arn, &target_group_arn);
        let criteria = MatchCriteria::Attributes(HashMap::from([
            ("priority".to_string(), Value::from(i64::from(config.rule_priority))),
            ("target_group_arn".to_string(), Value::from(target_group_arn.as_str())),
        ]));
        if self.find(&rule, &criteria).await?.is_none() {
            return Err(incomplete(
                config,
                format!(
                    "the rule forwarding to {} at priority {}",
                    config.target_group_name, config.rule_priority
                ),
                &rule,
            ));
        }

        Ok(target_group_arn)
    }
}
