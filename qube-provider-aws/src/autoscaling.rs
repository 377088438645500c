//! Auto Scaling group

use aws_sdk_autoscaling::types::{LaunchTemplateSpecification, Tag};
use qube_core::provider::{ProviderError, ProviderResult};
use qube_core::resource::{Resource, ResourceKind, State, Tags};

use crate::{AwsProvider, create_failed, created, listed, lookup_failed, no_identifier, opt};

/// Launch template version new instances start from
const LATEST_VERSION: &str = "$Latest";

/// Group tags, copied onto the instances it launches
fn to_group_tags(group_name: &str, tags: &Tags) -> ProviderResult<Vec<Tag>> {
    tags.iter()
        .map(|(k, v)| {
            Tag::builder()
                .resource_id(group_name)
                .resource_type("auto-scaling-group")
                .key(k)
                .value(v)
                .propagate_at_launch(true)
                .build()
                .map_err(|e| ProviderError::invalid_input(format!("Invalid tag {}: {}", k, e)))
        })
        .collect()
}

fn capacity(resource: &Resource, key: &str) -> ProviderResult<i32> {
    let value = resource.require_int(key)?;
    i32::try_from(value)
        .map_err(|_| ProviderError::invalid_input(format!("{} out of range: {}", key, value)))
}

impl AwsProvider {
    pub(crate) async fn list_auto_scaling_groups(&self) -> ProviderResult<Vec<State>> {
        let groups = self
            .autoscaling_client
            .describe_auto_scaling_groups()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe auto scaling groups", e))?;

        Ok(groups
            .iter()
            .filter_map(|group| {
                let name = opt(group.auto_scaling_group_name())?;
                Some(
                    listed(
                        ResourceKind::AutoScalingGroup,
                        name,
                        opt(group.auto_scaling_group_arn())?,
                    )
                    .with_attribute("name", name),
                )
            })
            .collect())
    }

    pub(crate) async fn create_auto_scaling_group(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let name = resource.require_str("name")?;
        let launch_template = LaunchTemplateSpecification::builder()
            .launch_template_id(resource.require_str("launch_template_id")?)
            .version(LATEST_VERSION)
            .build();

        self.autoscaling_client
            .create_auto_scaling_group()
            .auto_scaling_group_name(name)
            .launch_template(launch_template)
            .min_size(capacity(resource, "min_size")?)
            .max_size(capacity(resource, "max_size")?)
            .desired_capacity(capacity(resource, "desired_capacity")?)
            .vpc_zone_identifier(resource.require_str("subnet_id")?)
            .set_target_group_arns(Some(
                resource
                    .get_str_list("target_group_arns")
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ))
            .set_tags(Some(to_group_tags(name, &resource.tags)?))
            .send()
            .await
            .map_err(|e| create_failed("create auto scaling group", e))?;

        // The create call returns nothing; read the ARN back
        let result = self
            .autoscaling_client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(|e| create_failed("describe created auto scaling group", e))?;

        let arn = result
            .auto_scaling_groups()
            .iter()
            .find_map(|group| opt(group.auto_scaling_group_arn()))
            .ok_or_else(|| no_identifier("Auto scaling group"))?;
        Ok(created(resource, arn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tags_propagate_to_instances() {
        let tags = Tags::new().with("Name", "QubeASG").with("Product", "challenge");
        let converted = to_group_tags("QubeASG", &tags).unwrap();
        assert_eq!(converted.len(), 2);
        assert!(converted.iter().all(|t| t.propagate_at_launch() == Some(true)));
        assert!(converted.iter().all(|t| t.resource_id() == Some("QubeASG")));
    }

    #[test]
    fn capacity_must_fit_the_api_range() {
        let resource = Resource::new(ResourceKind::AutoScalingGroup, "QubeASG")
            .with_attribute("min_size", 1i64)
            .with_attribute("max_size", i64::MAX);
        assert_eq!(capacity(&resource, "min_size").unwrap(), 1);
        assert!(capacity(&resource, "max_size").is_err());
        assert!(capacity(&resource, "desired_capacity").is_err());
    }
}
