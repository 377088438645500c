//! Security groups and their ingress rules

use std::fmt;

use super::Provisioner;
use crate::config::StackConfig;
use crate::provider::{Provider, ProviderResult};
use crate::resource::{Resource, ResourceKind, Tags};

/// Where allowed traffic may come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressSource {
    Cidr(String),
    /// Identifier of another security group
    Group(String),
}

impl fmt::Display for IngressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressSource::Cidr(cidr) => f.write_str(cidr),
            IngressSource::Group(id) => f.write_str(id),
        }
    }
}

/// Single-port TCP ingress rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingress {
    pub port: u16,
    pub source: IngressSource,
}

impl<P: Provider + ?Sized> Provisioner<'_, P> {
    /// Ensure a security group by name, then its ingress rule
    pub async fn ensure_security_group(
        &mut self,
        name: &str,
        description: &str,
        vpc_id: &str,
        ingress: &Ingress,
        tags: Tags,
    ) -> ProviderResult<String> {
        let group = Resource::new(ResourceKind::SecurityGroup, name)
            .with_attribute("name", name)
            .with_attribute("description", description)
            .with_attribute("vpc_id", vpc_id)
            .with_tags(tags);
        let group_id = self.ensure(&group).await?.identifier().to_string();

        let source_type = match ingress.source {
            IngressSource::Cidr(_) => "cidr",
            IngressSource::Group(_) => "group",
        };
        let rule = Resource::new(
            ResourceKind::SecurityGroupIngress,
            format!("{}-tcp-{}", name, ingress.port),
        )
        .with_attribute("group_id", group_id.as_str())
        .with_attribute("protocol", "tcp")
        .with_attribute("from_port", ingress.port)
        .with_attribute("to_port", ingress.port)
        .with_attribute("source", ingress.source.to_string())
        .with_attribute("source_type", source_type);
        self.ensure(&rule).await?;

        Ok(group_id)
    }

    /// Group in front of the load balancer, open to the internet
    pub async fn ensure_edge_security_group(
        &mut self,
        config: &StackConfig,
        vpc_id: &str,
    ) -> ProviderResult<String> {
        let security = &config.security;
        self.ensure_security_group(
            &security.edge_group_name,
            &security.edge_description,
            vpc_id,
            &Ingress {
                port: security.port,
                source: IngressSource::Cidr("0.0.0.0/0".to_string()),
            },
            config.tags_for(&security.edge_group_name),
        )
        .await
    }

    /// Group of the compute tier, open only to the edge group
    pub async fn ensure_internal_security_group(
        &mut self,
        config: &StackConfig,
        vpc_id: &str,
        edge_group_id: &str,
    ) -> ProviderResult<String> {
        let security = &config.security;
        self.ensure_security_group(
            &security.internal_group_name,
            &security.internal_description,
            vpc_id,
            &Ingress {
                port: security.port,
                source: IngressSource::Group(edge_group_id.to_string()),
            },
            config.tags_for(&security.internal_group_name),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn chain_config() -> StackConfig {
        let mut config = StackConfig::default();
        config.security.edge_group_name = "EdgeSG".to_string();
        config.security.internal_group_name = "InternalSG".to_string();
        config
    }

    #[tokio::test]
    async fn internal_group_only_admits_edge_group() {
        let provider = MockProvider::new();
        let config = chain_config();
        let mut provisioner = Provisioner::new(&provider);

        let edge = provisioner.ensure_edge_security_group(&config, "vpc-1").await.unwrap();
        let internal = provisioner
            .ensure_internal_security_group(&config, "vpc-1", &edge)
            .await
            .unwrap();
        assert_ne!(edge, internal);

        let rules = provider.created_of(ResourceKind::SecurityGroupIngress);
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0].get_str("group_id"), Some(edge.as_str()));
        assert_eq!(rules[0].get_str("source"), Some("0.0.0.0/0"));
        assert_eq!(rules[0].get_str("source_type"), Some("cidr"));
        assert_eq!(rules[0].get_int("from_port"), Some(80));

        assert_eq!(rules[1].get_str("group_id"), Some(internal.as_str()));
        assert_eq!(rules[1].get_str("source"), Some(edge.as_str()));
        assert_eq!(rules[1].get_str("source_type"), Some("group"));
    }

    #[tokio::test]
    async fn edge_group_is_created_before_internal_group() {
        let provider = MockProvider::new();
        let config = chain_config();
        let mut provisioner = Provisioner::new(&provider);

        let edge = provisioner.ensure_edge_security_group(&config, "vpc-1").await.unwrap();
        provisioner
            .ensure_internal_security_group(&config, "vpc-1", &edge)
            .await
            .unwrap();

        let names: Vec<String> = provider
            .created_of(ResourceKind::SecurityGroup)
            .iter()
            .map(|r| r.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["EdgeSG", "InternalSG"]);
    }

    #[tokio::test]
    async fn groups_and_rules_are_reused() {
        let provider = MockProvider::new();
        let config = chain_config();
        let mut provisioner = Provisioner::new(&provider);

        let edge = provisioner.ensure_edge_security_group(&config, "vpc-1").await.unwrap();
        let again = provisioner.ensure_edge_security_group(&config, "vpc-1").await.unwrap();

        assert_eq!(edge, again);
        assert_eq!(provider.mutation_count(), 2);
    }

    #[tokio::test]
    async fn same_named_group_in_another_vpc_is_not_reused() {
        let provider = MockProvider::new();
        let config = chain_config();
        let mut provisioner = Provisioner::new(&provider);

        let old = provisioner.ensure_edge_security_group(&config, "vpc-OTHER").await.unwrap();
        let new = provisioner.ensure_edge_security_group(&config, "vpc-NEW").await.unwrap();

        assert_ne!(old, new);
        let groups = provider.created_of(ResourceKind::SecurityGroup);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].get_str("vpc_id"), Some("vpc-NEW"));
    }

    #[test]
    fn source_renders_raw_value() {
        assert_eq!(IngressSource::Cidr("0.0.0.0/0".into()).to_string(), "0.0.0.0/0");
        assert_eq!(IngressSource::Group("sg-1".into()).to_string(), "sg-1");
    }
}
