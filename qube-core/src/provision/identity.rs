//! Instance profile, role and the role's managed policy

use serde::Serialize;
use serde_json::json;

use super::Provisioner;
use crate::matcher::MatchCriteria;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Resource, ResourceKind, Tags};

const POLICY_VERSION: &str = "2012-10-17";

/// KMS actions granted to the instances
pub const KMS_ACTIONS: &[&str] = &[
    "kms:Encrypt",
    "kms:Decrypt",
    "kms:ReEncrypt*",
    "kms:GenerateDataKey*",
    "kms:DescribeKey",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<serde_json::Value>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

/// IAM policy document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

fn actions(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| a.to_string()).collect()
}

impl PolicyDocument {
    /// Trust policy letting EC2 instances assume the role
    pub fn ec2_trust() -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: Effect::Allow,
                principal: Some(json!({ "Service": "ec2.amazonaws.com" })),
                action: actions(&["sts:AssumeRole"]),
                resource: None,
                condition: None,
            }],
        }
    }

    /// KMS access restricted to requests coming from one auto-scaling group
    ///
    /// Everything else is denied explicitly. The group must exist first, so
    /// this policy is the last thing a run sets up.
    pub fn kms_scoped(auto_scaling_group_arn: &str) -> ProviderResult<Self> {
        if auto_scaling_group_arn.trim().is_empty() {
            return Err(ProviderError::invalid_input(
                "The scoped KMS policy needs the auto-scaling group ARN",
            ));
        }
        Ok(Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![
                Statement {
                    effect: Effect::Allow,
                    principal: None,
                    action: actions(KMS_ACTIONS),
                    resource: Some("*".to_string()),
                    condition: Some(json!({
                        "StringEquals": { "aws:SourceArn": auto_scaling_group_arn }
                    })),
                },
                Statement {
                    effect: Effect::Deny,
                    principal: None,
                    action: actions(KMS_ACTIONS),
                    resource: Some("*".to_string()),
                    condition: Some(json!({
                        "StringNotEquals": { "aws:SourceArn": auto_scaling_group_arn }
                    })),
                },
            ],
        })
    }

    /// KMS access on every key, no source condition
    pub fn kms_broad() -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: Effect::Allow,
                principal: None,
                action: actions(KMS_ACTIONS),
                resource: Some("*".to_string()),
                condition: None,
            }],
        }
    }

    pub fn to_json(&self) -> ProviderResult<String> {
        serde_json::to_string(self).map_err(|e| {
            ProviderError::invalid_input("Failed to serialize policy document").with_cause(e)
        })
    }
}

impl<P: Provider + ?Sized> Provisioner<'_, P> {
    /// Ensure an instance profile holding a role EC2 can assume
    ///
    /// Returns the ARNs of the profile and the role.
    pub async fn ensure_instance_profile(
        &mut self,
        profile_name: &str,
        role_name: &str,
        tags: &Tags,
    ) -> ProviderResult<(String, String)> {
        let profile = Resource::new(ResourceKind::InstanceProfile, profile_name)
            .with_attribute("name", profile_name)
            .with_tags(tags.clone().with("Name", profile_name));
        let profile_arn = self.ensure(&profile).await?.identifier().to_string();

        let role = Resource::new(ResourceKind::Role, role_name)
            .with_attribute("name", role_name)
            .with_attribute("assume_role_policy", PolicyDocument::ec2_trust().to_json()?)
            .with_tags(tags.clone().with("Name", role_name));
        let role_arn = self.ensure(&role).await?.identifier().to_string();

        let link = Resource::new(ResourceKind::InstanceProfileRole, role_name)
            .with_attribute("instance_profile_name", profile_name)
            .with_attribute("name", role_name);
        self.ensure(&link).await?;

        Ok((profile_arn, role_arn))
    }

    /// Ensure a managed policy is attached to a role and return its ARN
    ///
    /// The role's attached policies are checked first; the managed policy is
    /// only looked up or created when it is not attached yet.
    pub async fn ensure_role_policy(
        &mut self,
        policy_name: &str,
        role_name: &str,
        tags: Tags,
        document: &PolicyDocument,
    ) -> ProviderResult<String> {
        let attachment = Resource::new(ResourceKind::RolePolicyAttachment, policy_name)
            .with_attribute("role_name", role_name)
            .with_attribute("name", policy_name);
        let criteria = MatchCriteria::Name(policy_name.to_string());
        if let Some(attached) = self.find(&attachment, &criteria).await? {
            return Ok(attached.identifier.unwrap_or_default());
        }

        let policy = Resource::new(ResourceKind::Policy, policy_name)
            .with_attribute("name", policy_name)
            .with_attribute("policy_document", document.to_json()?)
            .with_tags(tags);
        let policy_arn = self.ensure(&policy).await?.identifier().to_string();

        let attachment = attachment.with_attribute("policy_arn", policy_arn.as_str());
        self.create(&attachment).await?;

        Ok(policy_arn)
    }
}
