//! IAM: instance profile, role, KMS policy and their links

use aws_sdk_iam::types::{InstanceProfile, Policy, PolicyScopeType, Role, Tag};
use qube_core::provider::{ProviderError, ProviderResult};
use qube_core::resource::{Resource, ResourceKind, State, Tags};

use crate::wait::{Poll, poll_until};
use crate::{
    AwsProvider, create_failed, created, listed, lookup_failed, no_identifier, opt, present,
};

fn to_iam_tags(tags: &Tags) -> ProviderResult<Vec<Tag>> {
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

/// Identifier of a role inside an instance profile
fn profile_role_identifier(profile_name: &str, role_name: &str) -> String {
    format!("{}/{}", profile_name, role_name)
}

impl AwsProvider {
    // ========== Instance Profile ==========

    pub(crate) async fn list_instance_profiles(&self) -> ProviderResult<Vec<State>> {
        let profiles = self
            .iam_client
            .list_instance_profiles()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("list instance profiles", e))?;

        Ok(profiles
            .iter()
            .filter_map(|profile| {
                let name = opt(profile.instance_profile_name())?;
                Some(
                    listed(ResourceKind::InstanceProfile, name, opt(profile.arn())?)
                        .with_attribute("name", name),
                )
            })
            .collect())
    }

    pub(crate) async fn create_instance_profile(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .iam_client
            .create_instance_profile()
            .instance_profile_name(resource.require_str("name")?)
            .set_tags(Some(to_iam_tags(&resource.tags)?))
            .send()
            .await
            .map_err(|e| create_failed("create instance profile", e))?;

        let arn = present::<InstanceProfile>(result.instance_profile())
            .and_then(|profile| opt(profile.arn()))
            .ok_or_else(|| no_identifier("Instance profile"))?;
        Ok(created(resource, arn))
    }

    /// Wait until IAM returns the profile, so EC2 can reference it
    pub(crate) async fn wait_for_instance_profile(&self, name: &str) -> ProviderResult<()> {
        let client = &self.iam_client;
        poll_until(self.wait_policy, name, move || async move {
            match client.get_instance_profile().instance_profile_name(name).send().await {
                Ok(_) => Ok(Poll::Ready),
                Err(e)
                    if e
                        .as_service_error()
                        .is_some_and(|se| se.is_no_such_entity_exception()) =>
                {
                    Ok(Poll::Pending("not yet visible".to_string()))
                }
                Err(e) => Err(lookup_failed("get instance profile", e)),
            }
        })
        .await
    }

    // ========== Role ==========

    pub(crate) async fn list_roles(&self) -> ProviderResult<Vec<State>> {
        let roles = self
            .iam_client
            .list_roles()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("list roles", e))?;

        Ok(roles
            .iter()
            .filter_map(|role| {
                let name = opt(role.role_name())?;
                Some(listed(ResourceKind::Role, name, opt(role.arn())?).with_attribute("name", name))
            })
            .collect())
    }

    pub(crate) async fn create_role(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .iam_client
            .create_role()
            .role_name(resource.require_str("name")?)
            .assume_role_policy_document(resource.require_str("assume_role_policy")?)
            .set_tags(Some(to_iam_tags(&resource.tags)?))
            .send()
            .await
            .map_err(|e| create_failed("create role", e))?;

        let arn = present::<Role>(result.role())
            .and_then(|role| opt(role.arn()))
            .ok_or_else(|| no_identifier("Role"))?;
        Ok(created(resource, arn))
    }

    // ========== Instance Profile Role ==========

    pub(crate) async fn list_instance_profile_roles(
        &self,
        profile_name: &str,
    ) -> ProviderResult<Vec<State>> {
        let result = self
            .iam_client
            .get_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                return Ok(Vec::new());
            }
            Err(e) => return Err(lookup_failed("get instance profile", e)),
        };

        let Some(profile) = present::<InstanceProfile>(output.instance_profile()) else {
            return Ok(Vec::new());
        };
        Ok(profile
            .roles()
            .iter()
            .filter_map(|role| {
                let role_name = opt(role.role_name())?;
                Some(
                    listed(
                        ResourceKind::InstanceProfileRole,
                        role_name,
                        &profile_role_identifier(profile_name, role_name),
                    )
                    .with_attribute("name", role_name),
                )
            })
            .collect())
    }

    pub(crate) async fn add_role_to_instance_profile(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let profile_name = resource.require_str("instance_profile_name")?;
        let role_name = resource.require_str("name")?;

        self.iam_client
            .add_role_to_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| create_failed("add role to instance profile", e))?;

        Ok(created(
            resource,
            profile_role_identifier(profile_name, role_name),
        ))
    }

    // ========== Policy ==========

    /// Customer managed policies only
    pub(crate) async fn list_policies(&self) -> ProviderResult<Vec<State>> {
        let policies = self
            .iam_client
            .list_policies()
            .scope(PolicyScopeType::Local)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("list policies", e))?;

        Ok(policies
            .iter()
            .filter_map(|policy| {
                let name = opt(policy.policy_name())?;
                Some(
                    listed(ResourceKind::Policy, name, opt(policy.arn())?)
                        .with_attribute("name", name),
                )
            })
            .collect())
    }

    pub(crate) async fn create_policy(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .iam_client
            .create_policy()
            .policy_name(resource.require_str("name")?)
            .policy_document(resource.require_str("policy_document")?)
            .set_tags(Some(to_iam_tags(&resource.tags)?))
            .send()
            .await
            .map_err(|e| create_failed("create policy", e))?;

        let arn = present::<Policy>(result.policy())
            .and_then(|policy| opt(policy.arn()))
            .ok_or_else(|| no_identifier("Policy"))?;
        Ok(created(resource, arn))
    }

    // ========== Role Policy Attachment ==========

    /// Managed policies attached to `role_name`; a missing role has none
    pub(crate) async fn list_attached_policies(&self, role_name: &str) -> ProviderResult<Vec<State>> {
        let result = self
            .iam_client
            .list_attached_role_policies()
            .role_name(role_name)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await;

        let attached = match result {
            Ok(attached) => attached,
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                return Ok(Vec::new());
            }
            Err(e) => return Err(lookup_failed("list attached role policies", e)),
        };

        Ok(attached
            .iter()
            .filter_map(|policy| {
                let name = opt(policy.policy_name())?;
                Some(
                    listed(
                        ResourceKind::RolePolicyAttachment,
                        name,
                        opt(policy.policy_arn())?,
                    )
                    .with_attribute("name", name),
                )
            })
            .collect())
    }

    pub(crate) async fn attach_role_policy(&self, resource: &Resource) -> ProviderResult<State> {
        let policy_arn = resource.require_str("policy_arn")?;

        self.iam_client
            .attach_role_policy()
            .role_name(resource.require_str("role_name")?)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| create_failed("attach role policy", e))?;

        Ok(created(resource, policy_arn))
    }
}
