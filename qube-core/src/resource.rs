//! Resource - Representing resources and their state

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matcher::MatchStrength;
use crate::provider::{ProviderError, ProviderResult};

/// Every kind of resource the provisioner knows how to look up or create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    InternetGateway,
    InternetGatewayAttachment,
    RouteTable,
    Route,
    Subnet,
    RouteTableAssociation,
    ElasticIp,
    NatGateway,
    SecurityGroup,
    SecurityGroupIngress,
    Queue,
    LoadBalancer,
    Listener,
    TargetGroup,
    ListenerRule,
    InstanceProfile,
    Role,
    InstanceProfileRole,
    Policy,
    RolePolicyAttachment,
    KeyPair,
    LaunchTemplate,
    AutoScalingGroup,
}

impl ResourceKind {
    /// Dotted type name used in logs and error messages (e.g., "ec2.vpc")
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "ec2.vpc",
            ResourceKind::InternetGateway => "ec2.internet_gateway",
            ResourceKind::InternetGatewayAttachment => "ec2.internet_gateway.attachment",
            ResourceKind::RouteTable => "ec2.route_table",
            ResourceKind::Route => "ec2.route",
            ResourceKind::Subnet => "ec2.subnet",
            ResourceKind::RouteTableAssociation => "ec2.route_table.association",
            ResourceKind::ElasticIp => "ec2.eip",
            ResourceKind::NatGateway => "ec2.nat_gateway",
            ResourceKind::SecurityGroup => "ec2.security_group",
            ResourceKind::SecurityGroupIngress => "ec2.security_group.ingress_rule",
            ResourceKind::Queue => "sqs.queue",
            ResourceKind::LoadBalancer => "elbv2.load_balancer",
            ResourceKind::Listener => "elbv2.listener",
            ResourceKind::TargetGroup => "elbv2.target_group",
            ResourceKind::ListenerRule => "elbv2.listener_rule",
            ResourceKind::InstanceProfile => "iam.instance_profile",
            ResourceKind::Role => "iam.role",
            ResourceKind::InstanceProfileRole => "iam.instance_profile.role",
            ResourceKind::Policy => "iam.policy",
            ResourceKind::RolePolicyAttachment => "iam.role.policy_attachment",
            ResourceKind::KeyPair => "ec2.key_pair",
            ResourceKind::LaunchTemplate => "ec2.launch_template",
            ResourceKind::AutoScalingGroup => "autoscaling.group",
        }
    }

    /// How an existing resource of this kind is recognized.
    ///
    /// The strengths differ per kind and must not be unified: a tag-subset
    /// kind recognizes resources carrying extra tags, while a VPC is only
    /// recognized on an exact CIDR and tag-set match.
    pub fn match_strength(&self) -> MatchStrength {
        match self {
            ResourceKind::Vpc => MatchStrength::CidrAndTags,
            ResourceKind::InternetGateway
            | ResourceKind::RouteTable
            | ResourceKind::Subnet
            | ResourceKind::ElasticIp
            | ResourceKind::NatGateway => MatchStrength::TagSubset,
            ResourceKind::SecurityGroup
            | ResourceKind::Queue
            | ResourceKind::LoadBalancer
            | ResourceKind::TargetGroup
            | ResourceKind::InstanceProfile
            | ResourceKind::Role
            | ResourceKind::InstanceProfileRole
            | ResourceKind::Policy
            | ResourceKind::RolePolicyAttachment
            | ResourceKind::KeyPair
            | ResourceKind::LaunchTemplate
            | ResourceKind::AutoScalingGroup => MatchStrength::Name,
            ResourceKind::InternetGatewayAttachment
            | ResourceKind::Route
            | ResourceKind::RouteTableAssociation
            | ResourceKind::SecurityGroupIngress => MatchStrength::Attributes,
            ResourceKind::Listener | ResourceKind::ListenerRule => MatchStrength::Unchecked,
        }
    }

    /// Attributes compared for `MatchStrength::Attributes` kinds
    pub fn identity_attributes(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::InternetGatewayAttachment => &["vpc_id"],
            ResourceKind::Route => &["destination_cidr_block"],
            ResourceKind::RouteTableAssociation => &["route_table_id"],
            ResourceKind::SecurityGroupIngress => &["protocol", "from_port", "to_port", "source"],
            _ => &[],
        }
    }

    /// Attribute holding the parent identifier this kind is listed under.
    /// VPC-bound kinds are scoped to their VPC so a match never crosses into
    /// another network.
    pub fn scope_attribute(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Subnet | ResourceKind::RouteTable | ResourceKind::SecurityGroup => {
                Some("vpc_id")
            }
            ResourceKind::NatGateway => Some("subnet_id"),
            ResourceKind::InternetGatewayAttachment => Some("internet_gateway_id"),
            ResourceKind::Route => Some("route_table_id"),
            ResourceKind::RouteTableAssociation => Some("subnet_id"),
            ResourceKind::SecurityGroupIngress => Some("group_id"),
            ResourceKind::Listener => Some("load_balancer_arn"),
            ResourceKind::ListenerRule => Some("listener_arn"),
            ResourceKind::InstanceProfileRole => Some("instance_profile_name"),
            ResourceKind::RolePolicyAttachment => Some("role_name"),
            _ => None,
        }
    }

    /// Whether creation is asynchronous on the provider side and must be
    /// followed by a wait for the resource to become available
    pub fn requires_wait(&self) -> bool {
        matches!(
            self,
            ResourceKind::Vpc | ResourceKind::NatGateway | ResourceKind::InstanceProfile
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource kind (e.g., vpc, subnet)
    pub kind: ResourceKind,
    /// Logical name (Name tag or resource name)
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Int(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

/// Tag set attached to a resource
///
/// Keys are unique; comparison ignores the order in which tags were reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value of the `Name` tag
    pub fn name(&self) -> Option<&str> {
        self.get("Name")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if every tag in `required` is present here with the same value
    pub fn contains_all(&self, required: &Tags) -> bool {
        required.iter().all(|(k, v)| self.get(k) == Some(v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Tags(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Creation payload for a resource
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
    pub tags: Tags,
}

impl Resource {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            attributes: HashMap::new(),
            tags: Tags::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// String items of a list attribute (non-string items are skipped)
    pub fn get_str_list(&self, key: &str) -> Vec<&str> {
        match self.attributes.get(key) {
            Some(Value::List(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Get a string attribute, failing with an invalid-input error if absent
    pub fn require_str(&self, key: &str) -> ProviderResult<&str> {
        self.get_str(key).ok_or_else(|| {
            ProviderError::invalid_input(format!("Missing required attribute: {}", key))
                .for_resource(self.id.clone())
        })
    }

    /// Get an integer attribute, failing with an invalid-input error if absent
    pub fn require_int(&self, key: &str) -> ProviderResult<i64> {
        self.get_int(key).ok_or_else(|| {
            ProviderError::invalid_input(format!("Missing required attribute: {}", key))
                .for_resource(self.id.clone())
        })
    }

    /// Parent identifier this resource is listed under, if its kind is scoped
    pub fn scope(&self) -> Option<&str> {
        self.id
            .kind
            .scope_attribute()
            .and_then(|attr| self.get_str(attr))
    }
}

/// Current state fetched from actual infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Provider-assigned identifier (e.g., vpc-xxx, an ARN, a queue URL)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    pub tags: Tags,
}

impl State {
    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            tags: Tags::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_compare_as_sets() {
        let a = Tags::new().with("Name", "QubeVPC").with("Product", "challenge");
        let b = Tags::new().with("Product", "challenge").with("Name", "QubeVPC");
        assert_eq!(a, b);
    }

    #[test]
    fn contains_all_ignores_extra_tags() {
        let required = Tags::new().with("Name", "QubeIG").with("Product", "challenge");
        let actual = required.clone().with("Owner", "ops");
        assert!(actual.contains_all(&required));
        assert!(!required.contains_all(&actual));
    }

    #[test]
    fn contains_all_requires_matching_values() {
        let required = Tags::new().with("Name", "QubeIG").with("Product", "challenge");
        let actual = Tags::new().with("Name", "QubeIG").with("Product", "other");
        assert!(!actual.contains_all(&required));
    }

    #[test]
    fn resource_scope_uses_scope_attribute() {
        let route = Resource::new(ResourceKind::Route, "public-default")
            .with_attribute("route_table_id", "rtb-123")
            .with_attribute("destination_cidr_block", "0.0.0.0/0");
        assert_eq!(route.scope(), Some("rtb-123"));

        let vpc = Resource::new(ResourceKind::Vpc, "QubeVPC");
        assert_eq!(vpc.scope(), None);
    }

    #[test]
    fn vpc_bound_kinds_are_scoped_to_their_vpc() {
        for kind in [
            ResourceKind::Subnet,
            ResourceKind::RouteTable,
            ResourceKind::SecurityGroup,
        ] {
            assert_eq!(kind.scope_attribute(), Some("vpc_id"), "{}", kind);
        }
        assert_eq!(ResourceKind::NatGateway.scope_attribute(), Some("subnet_id"));
    }

    #[test]
    fn require_str_reports_resource() {
        let resource = Resource::new(ResourceKind::Subnet, "QubePrivate");
        let err = resource.require_str("cidr_block").unwrap_err();
        assert_eq!(
            err.to_string(),
            "[ec2.subnet.QubePrivate] Missing required attribute: cidr_block"
        );
    }

    #[test]
    fn async_kinds_require_wait() {
        assert!(ResourceKind::Vpc.requires_wait());
        assert!(ResourceKind::NatGateway.requires_wait());
        assert!(ResourceKind::InstanceProfile.requires_wait());
        assert!(!ResourceKind::Subnet.requires_wait());
    }
}
