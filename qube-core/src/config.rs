//! Stack configuration
//!
//! Names, CIDR blocks, ports and tags for every resource of the stack. The
//! defaults describe the Qube challenge stack; a JSON file may override any
//! subset of fields.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::Tags;
use crate::schema::{validate_cidr, validate_port};

/// Errors raised while loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field}: {message}")]
    InvalidCidr { field: String, message: String },

    #[error("{field}: {message}")]
    InvalidPort { field: String, message: String },

    #[error("{field} must not be empty")]
    EmptyName { field: String },

    #[error("{field}: {cidr} is not inside the VPC block {vpc_cidr}")]
    OutsideVpc {
        field: String,
        cidr: String,
        vpc_cidr: String,
    },

    #[error("At least one public subnet is required")]
    NoPublicSubnets,

    #[error("{field} must be at least 1")]
    Zero { field: String },
}

/// Which resources the instance role's KMS policy covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    /// Only requests originating from the stack's auto-scaling group
    AutoScalingGroup,
    /// All KMS keys, no source condition
    Broad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetConfig {
    pub name: String,
    pub cidr_block: String,
    pub availability_zone: String,
}

impl SubnetConfig {
    fn new(name: &str, cidr_block: &str, availability_zone: &str) -> Self {
        Self {
            name: name.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: availability_zone.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub vpc_name: String,
    pub cidr_block: String,
    pub internet_gateway_name: String,
    pub public_route_table_name: String,
    /// Public subnets; the NAT gateway goes into the first one
    pub public_subnets: Vec<SubnetConfig>,
    pub nat_gateway_name: String,
    pub private_route_table_name: String,
    pub private_subnet: SubnetConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            vpc_name: "QubeVPC".to_string(),
            cidr_block: "172.20.0.0/16".to_string(),
            internet_gateway_name: "QubeIG".to_string(),
            public_route_table_name: "QubePublicRT".to_string(),
            public_subnets: vec![
                SubnetConfig::new("QubePublicSubnetA", "172.20.1.0/24", "ap-south-1a"),
                SubnetConfig::new("QubePublicSubnetB", "172.20.2.0/24", "ap-south-1b"),
            ],
            nat_gateway_name: "QubeNAT".to_string(),
            private_route_table_name: "QubePrivateRT".to_string(),
            private_subnet: SubnetConfig::new("QubePrivateSubnet", "172.20.3.0/24", "ap-south-1a"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Port opened on both groups
    pub port: u16,
    pub edge_group_name: String,
    pub edge_description: String,
    pub internal_group_name: String,
    pub internal_description: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            port: 80,
            edge_group_name: "QubeALBSG".to_string(),
            edge_description: "Allow HTTP from anywhere to the load balancer".to_string(),
            internal_group_name: "QubeASGSG".to_string(),
            internal_description: "Allow HTTP from the load balancer only".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "QubeQueue".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub name: String,
    pub listener_port: u16,
    pub target_group_name: String,
    pub target_port: u16,
    pub path_pattern: String,
    pub rule_priority: u32,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            name: "QubeALB".to_string(),
            listener_port: 80,
            target_group_name: "QubeTG".to_string(),
            target_port: 80,
            path_pattern: "/*".to_string(),
            rule_priority: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub instance_profile_name: String,
    pub role_name: String,
    pub policy_name: String,
    pub policy_scope: PolicyScope,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            instance_profile_name: "QubeInstanceProfile".to_string(),
            role_name: "QubeInstanceRole".to_string(),
            policy_name: "QubeKmsPolicy".to_string(),
            policy_scope: PolicyScope::AutoScalingGroup,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub key_name: String,
    /// Directory the new private key is written to
    pub key_dir: PathBuf,
    pub launch_template_name: String,
    pub image_id: String,
    pub instance_type: String,
    /// Give instances a public address (they sit in the private subnet by default)
    pub associate_public_ip: bool,
    /// Boot script passed to instances verbatim
    pub user_data: String,
    pub auto_scaling_group_name: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            key_name: "QubeKey".to_string(),
            key_dir: PathBuf::from("."),
            launch_template_name: "QubeLaunchTemplate".to_string(),
            image_id: "ami-0f5ee92e2d63afc7b".to_string(),
            instance_type: "t2.micro".to_string(),
            associate_public_ip: false,
            user_data: DEFAULT_USER_DATA.to_string(),
            auto_scaling_group_name: "QubeASG".to_string(),
        }
    }
}

const DEFAULT_USER_DATA: &str = "#!/bin/bash
yum install -y nginx
systemctl enable --now nginx
";

/// Polling of resources that become available asynchronously
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub max_attempts: u32,
    /// Seconds between two polls
    pub delay_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            delay_secs: 5,
        }
    }
}

/// Full stack configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Tags applied to every resource, next to its `Name` tag
    pub tags: Tags,
    pub network: NetworkConfig,
    pub security: SecurityConfig,
    pub queue: QueueConfig,
    pub load_balancer: LoadBalancerConfig,
    pub identity: IdentityConfig,
    pub compute: ComputeConfig,
    pub wait: WaitConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            tags: Tags::new().with("Product", "challenge"),
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
            queue: QueueConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            identity: IdentityConfig::default(),
            compute: ComputeConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl StackConfig {
    /// Load a configuration file, falling back to defaults for missing fields
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Common tags plus a `Name` tag
    pub fn tags_for(&self, name: &str) -> Tags {
        self.tags.clone().with("Name", name)
    }

    /// Check the configuration without contacting the provider
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        let network = &self.network;

        check_cidr(&mut errors, "network.cidr_block", &network.cidr_block);
        if network.public_subnets.is_empty() {
            errors.push(ConfigError::NoPublicSubnets);
        }
        for (i, subnet) in network.public_subnets.iter().enumerate() {
            check_subnet(&mut errors, &format!("network.public_subnets[{}]", i), subnet, &network.cidr_block);
        }
        check_subnet(&mut errors, "network.private_subnet", &network.private_subnet, &network.cidr_block);

        check_port(&mut errors, "security.port", self.security.port);
        check_port(&mut errors, "load_balancer.listener_port", self.load_balancer.listener_port);
        check_port(&mut errors, "load_balancer.target_port", self.load_balancer.target_port);

        if self.wait.max_attempts == 0 {
            errors.push(ConfigError::Zero {
                field: "wait.max_attempts".to_string(),
            });
        }

        let names = [
            ("network.vpc_name", &network.vpc_name),
            ("network.internet_gateway_name", &network.internet_gateway_name),
            ("network.public_route_table_name", &network.public_route_table_name),
            ("network.nat_gateway_name", &network.nat_gateway_name),
            ("network.private_route_table_name", &network.private_route_table_name),
            ("security.edge_group_name", &self.security.edge_group_name),
            ("security.internal_group_name", &self.security.internal_group_name),
            ("queue.name", &self.queue.name),
            ("load_balancer.name", &self.load_balancer.name),
            ("load_balancer.target_group_name", &self.load_balancer.target_group_name),
            ("load_balancer.path_pattern", &self.load_balancer.path_pattern),
            ("identity.instance_profile_name", &self.identity.instance_profile_name),
            ("identity.role_name", &self.identity.role_name),
            ("identity.policy_name", &self.identity.policy_name),
            ("compute.key_name", &self.compute.key_name),
            ("compute.launch_template_name", &self.compute.launch_template_name),
            ("compute.image_id", &self.compute.image_id),
            ("compute.instance_type", &self.compute.instance_type),
            ("compute.auto_scaling_group_name", &self.compute.auto_scaling_group_name),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                errors.push(ConfigError::EmptyName {
                    field: field.to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_cidr(errors: &mut Vec<ConfigError>, field: &str, cidr: &str) -> bool {
    match validate_cidr(cidr) {
        Ok(()) => true,
        Err(message) => {
            errors.push(ConfigError::InvalidCidr {
                field: field.to_string(),
                message,
            });
            false
        }
    }
}

fn check_port(errors: &mut Vec<ConfigError>, field: &str, port: u16) {
    if port == 0 {
        errors.push(ConfigError::InvalidPort {
            field: field.to_string(),
            message: "Port 0 cannot be opened".to_string(),
        });
    } else if let Err(message) = validate_port(port.into()) {
        errors.push(ConfigError::InvalidPort {
            field: field.to_string(),
            message,
        });
    }
}

fn check_subnet(errors: &mut Vec<ConfigError>, field: &str, subnet: &SubnetConfig, vpc_cidr: &str) {
    if subnet.name.trim().is_empty() {
        errors.push(ConfigError::EmptyName {
            field: format!("{}.name", field),
        });
    }
    if subnet.availability_zone.trim().is_empty() {
        errors.push(ConfigError::EmptyName {
            field: format!("{}.availability_zone", field),
        });
    }
    if check_cidr(errors, &format!("{}.cidr_block", field), &subnet.cidr_block)
        && validate_cidr(vpc_cidr).is_ok()
        && !cidr_contains(vpc_cidr, &subnet.cidr_block)
    {
        errors.push(ConfigError::OutsideVpc {
            field: format!("{}.cidr_block", field),
            cidr: subnet.cidr_block.clone(),
            vpc_cidr: vpc_cidr.to_string(),
        });
    }
}

/// Network address and prefix length of a CIDR block already known to be valid
fn parse_cidr(cidr: &str) -> Option<(u32, u32)> {
    let (ip, prefix) = cidr.split_once('/')?;
    let ip: Ipv4Addr = ip.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    Some((u32::from(ip), prefix))
}

fn cidr_contains(outer: &str, inner: &str) -> bool {
    let (Some((outer_ip, outer_prefix)), Some((inner_ip, inner_prefix))) =
        (parse_cidr(outer), parse_cidr(inner))
    else {
        return false;
    };
    if inner_prefix < outer_prefix {
        return false;
    }
    let mask = u32::MAX.checked_shl(32 - outer_prefix).unwrap_or(0);
    outer_ip & mask == inner_ip & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StackConfig::default().validate().is_ok());
    }

    #[test]
    fn default_tags_carry_product() {
        let config = StackConfig::default();
        let tags = config.tags_for("QubeVPC");
        assert_eq!(tags.get("Name"), Some("QubeVPC"));
        assert_eq!(tags.get("Product"), Some("challenge"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StackConfig::from_json(
            r#"{ "queue": { "name": "OtherQueue" }, "security": { "port": 8080 } }"#,
        )
        .unwrap();
        assert_eq!(config.queue.name, "OtherQueue");
        assert_eq!(config.security.port, 8080);
        assert_eq!(config.network.cidr_block, "172.20.0.0/16");
        assert_eq!(config.security.edge_group_name, "QubeALBSG");
    }

    #[test]
    fn wait_settings_can_be_overridden() {
        let config =
            StackConfig::from_json(r#"{ "wait": { "max_attempts": 3, "delay_secs": 1 } }"#).unwrap();
        assert_eq!(config.wait.max_attempts, 3);
        assert_eq!(config.wait.delay_secs, 1);
        assert_eq!(StackConfig::default().wait.max_attempts, 120);
    }

    #[test]
    fn zero_wait_attempts_is_rejected() {
        let mut config = StackConfig::default();
        config.wait.max_attempts = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "wait.max_attempts must be at least 1");
    }

    #[test]
    fn policy_scope_parses_snake_case() {
        let config =
            StackConfig::from_json(r#"{ "identity": { "policy_scope": "broad" } }"#).unwrap();
        assert_eq!(config.identity.policy_scope, PolicyScope::Broad);
    }

    #[test]
    fn rejects_subnet_outside_vpc() {
        let mut config = StackConfig::default();
        config.network.private_subnet.cidr_block = "10.0.3.0/24".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ConfigError::OutsideVpc { .. }));
    }

    #[test]
    fn collects_every_error() {
        let mut config = StackConfig::default();
        config.network.cidr_block = "172.20.0.0".to_string();
        config.network.public_subnets.clear();
        config.queue.name = "  ".to_string();
        config.security.port = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ConfigError::InvalidCidr { .. })));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::NoPublicSubnets)));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::EmptyName { field } if field == "queue.name")));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::InvalidPort { .. })));
    }

    #[test]
    fn cidr_containment() {
        assert!(cidr_contains("172.20.0.0/16", "172.20.3.0/24"));
        assert!(cidr_contains("172.20.0.0/16", "172.20.0.0/16"));
        assert!(!cidr_contains("172.20.0.0/16", "172.21.0.0/24"));
        assert!(!cidr_contains("172.20.0.0/24", "172.20.0.0/16"));
        assert!(cidr_contains("0.0.0.0/0", "10.0.0.0/8"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StackConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qube.json");
        std::fs::write(&path, r#"{ "compute": { "instance_type": "t3.small" } }"#).unwrap();
        let config = StackConfig::load(&path).unwrap();
        assert_eq!(config.compute.instance_type, "t3.small");
    }
}
