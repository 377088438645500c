//! Elastic Load Balancing v2: balancer, listener, target group and rule

use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, FixedResponseActionConfig, LoadBalancerSchemeEnum,
    LoadBalancerTypeEnum, PathPatternConditionConfig, ProtocolEnum, Rule, RuleCondition, Tag,
    TargetTypeEnum,
};
use qube_core::provider::{ProviderError, ProviderResult};
use qube_core::resource::{Resource, ResourceKind, State, Tags};

use crate::{AwsProvider, create_failed, created, listed, lookup_failed, no_identifier};

fn to_elb_tags(tags: &Tags) -> ProviderResult<Vec<Tag>> {
    tags.iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| ProviderError::invalid_input(format!("Invalid tag {}: {}", k, e)))
        })
        .collect()
}

fn int_attribute(resource: &Resource, key: &str) -> ProviderResult<i32> {
    let value = resource.require_int(key)?;
    i32::try_from(value)
        .map_err(|_| ProviderError::invalid_input(format!("{} out of range: {}", key, value)))
}

/// Default action answering every request with a fixed, empty response
fn fixed_response(status_code: &str) -> ProviderResult<Action> {
    let config = FixedResponseActionConfig::builder()
        .status_code(status_code)
        .content_type("text/plain")
        .message_body("")
        .build()
        .map_err(|e| ProviderError::invalid_input(format!("Invalid fixed response: {}", e)))?;
    Action::builder()
        .r#type(ActionTypeEnum::FixedResponse)
        .fixed_response_config(config)
        .build()
        .map_err(|e| ProviderError::invalid_input(format!("Invalid listener action: {}", e)))
}

fn forward(target_group_arn: &str) -> ProviderResult<Action> {
    Action::builder()
        .r#type(ActionTypeEnum::Forward)
        .target_group_arn(target_group_arn)
        .build()
        .map_err(|e| ProviderError::invalid_input(format!("Invalid rule action: {}", e)))
}

/// The default rule has priority "default" and is skipped
fn rule_state(rule: &Rule) -> Option<State> {
    let arn = rule.rule_arn()?;
    let priority: i64 = rule.priority()?.parse().ok()?;
    let state = listed(ResourceKind::ListenerRule, arn, arn).with_attribute("priority", priority);
    let target_group_arn = rule
        .actions()
        .iter()
        .filter(|action| action.r#type() == &ActionTypeEnum::Forward)
        .find_map(|action| action.target_group_arn());
    Some(match target_group_arn {
        Some(arn) => state.with_attribute("target_group_arn", arn),
        None => state,
    })
}

impl AwsProvider {
    pub(crate) async fn list_load_balancers(&self) -> ProviderResult<Vec<State>> {
        let balancers = self
            .elbv2_client
            .describe_load_balancers()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe load balancers", e))?;

        Ok(balancers
            .iter()
            .filter_map(|lb| {
                let name = lb.load_balancer_name()?;
                Some(
                    listed(ResourceKind::LoadBalancer, name, lb.load_balancer_arn()?)
                        .with_attribute("name", name),
                )
            })
            .collect())
    }

    pub(crate) async fn create_load_balancer(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .elbv2_client
            .create_load_balancer()
            .name(resource.require_str("name")?)
            .set_subnets(Some(
                resource
                    .get_str_list("subnets")
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ))
            .security_groups(resource.require_str("security_group_id")?)
            .scheme(LoadBalancerSchemeEnum::InternetFacing)
            .r#type(LoadBalancerTypeEnum::Application)
            .set_tags(Some(to_elb_tags(&resource.tags)?))
            .send()
            .await
            .map_err(|e| create_failed("create load balancer", e))?;

        let arn = result
            .load_balancers()
            .first()
            .and_then(|lb| lb.load_balancer_arn())
            .ok_or_else(|| no_identifier("Load balancer"))?;
        Ok(created(resource, arn))
    }

    pub(crate) async fn list_listeners(&self, load_balancer_arn: &str) -> ProviderResult<Vec<State>> {
        let listeners = self
            .elbv2_client
            .describe_listeners()
            .load_balancer_arn(load_balancer_arn)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe listeners", e))?;

        Ok(listeners
            .iter()
            .filter_map(|listener| {
                let arn = listener.listener_arn()?;
                let state = listed(ResourceKind::Listener, arn, arn);
                Some(match listener.port() {
                    Some(port) => state.with_attribute("port", i64::from(port)),
                    None => state,
                })
            })
            .collect())
    }

    pub(crate) async fn create_listener(&self, resource: &Resource) -> ProviderResult<State> {
        let status = resource.get_str("fixed_response_status").unwrap_or("200");

        let result = self
            .elbv2_client
            .create_listener()
            .load_balancer_arn(resource.require_str("load_balancer_arn")?)
            .protocol(ProtocolEnum::Http)
            .port(int_attribute(resource, "port")?)
            .default_actions(fixed_response(status)?)
            .send()
            .await
            .map_err(|e| create_failed("create listener", e))?;

        let arn = result
            .listeners()
            .first()
            .and_then(|l| l.listener_arn())
            .ok_or_else(|| no_identifier("Listener"))?;
        Ok(created(resource, arn))
    }

    pub(crate) async fn list_target_groups(&self) -> ProviderResult<Vec<State>> {
        let target_groups = self
            .elbv2_client
            .describe_target_groups()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe target groups", e))?;

        Ok(target_groups
            .iter()
            .filter_map(|tg| {
                let name = tg.target_group_name()?;
                let mut state = listed(ResourceKind::TargetGroup, name, tg.target_group_arn()?)
                    .with_attribute("name", name);
                if let Some(vpc_id) = tg.vpc_id() {
                    state = state.with_attribute("vpc_id", vpc_id);
                }
                Some(state)
            })
            .collect())
    }

    pub(crate) async fn create_target_group(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .elbv2_client
            .create_target_group()
            .name(resource.require_str("name")?)
            .protocol(ProtocolEnum::Http)
            .port(int_attribute(resource, "port")?)
            .vpc_id(resource.require_str("vpc_id")?)
            .target_type(TargetTypeEnum::Instance)
            .set_tags(Some(to_elb_tags(&resource.tags)?))
            .send()
            .await
            .map_err(|e| create_failed("create target group", e))?;

        let arn = result
            .target_groups()
            .first()
            .and_then(|tg| tg.target_group_arn())
            .ok_or_else(|| no_identifier("Target group"))?;
        Ok(created(resource, arn))
    }

    /// Non-default rules of a listener with their priority and forward target
    pub(crate) async fn list_listener_rules(&self, listener_arn: &str) -> ProviderResult<Vec<State>> {
        let mut rules = Vec::new();
        let mut marker = None;
        loop {
            let result = self
                .elbv2_client
                .describe_rules()
                .listener_arn(listener_arn)
                .set_marker(marker)
                .send()
                .await
                .map_err(|e| lookup_failed("describe listener rules", e))?;
            rules.extend(result.rules().iter().filter_map(rule_state));
            marker = result.next_marker().map(String::from);
            if marker.is_none() {
                break;
            }
        }
        Ok(rules)
    }

    pub(crate) async fn create_listener_rule(&self, resource: &Resource) -> ProviderResult<State> {
        let condition = RuleCondition::builder()
            .field("path-pattern")
            .path_pattern_config(
                PathPatternConditionConfig::builder()
                    .values(resource.require_str("path_pattern")?)
                    .build(),
            )
            .build();

        let result = self
            .elbv2_client
            .create_rule()
            .listener_arn(resource.require_str("listener_arn")?)
            .priority(int_attribute(resource, "priority")?)
            .conditions(condition)
            .actions(forward(resource.require_str("target_group_arn")?)?)
            .send()
            .await
            .map_err(|e| create_failed("create listener rule", e))?;

        let arn = result
            .rules()
            .first()
            .and_then(|r| r.rule_arn())
            .ok_or_else(|| no_identifier("Listener rule"))?;
        Ok(created(resource, arn))
    }
}
