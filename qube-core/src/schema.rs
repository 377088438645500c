//! Schema - Attribute schemas for creation payloads
//!
//! Every resource kind declares the attributes its create call needs, so a
//! malformed payload is rejected before anything is sent to the provider.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::resource::{ResourceKind, Value};

/// IP protocols accepted in ingress rules; `-1` is all traffic
pub const PROTOCOLS: &[&str] = &["tcp", "udp", "icmp", "-1"];

/// How an ingress rule names its source
pub const SOURCE_TYPES: &[&str] = &["cidr", "group"];

/// Shape an attribute value must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    /// Any string, empty included (user data, status codes)
    Text,
    /// Name or provider identifier
    Identifier,
    Bool,
    /// Integer >= 0
    Count,
    /// Integer >= 1
    Positive,
    Port,
    Cidr,
    /// One of a fixed set of strings
    OneOf(&'static [&'static str]),
    /// Non-empty list of identifiers
    Identifiers,
}

impl AttributeType {
    /// Check `value` against this type
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (AttributeType::Text, Value::String(_)) | (AttributeType::Bool, Value::Bool(_)) => Ok(()),
            (AttributeType::Identifier, Value::String(s)) => {
                if s.trim().is_empty() {
                    Err("must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            (AttributeType::Count, Value::Int(n)) if *n < 0 => {
                Err(format!("{} is negative", n))
            }
            (AttributeType::Positive, Value::Int(n)) if *n < 1 => {
                Err(format!("{} is not positive", n))
            }
            (AttributeType::Count | AttributeType::Positive, Value::Int(_)) => Ok(()),
            (AttributeType::Port, Value::Int(n)) => validate_port(*n),
            (AttributeType::Cidr, Value::String(s)) => validate_cidr(s),
            (AttributeType::OneOf(allowed), Value::String(s)) => {
                if allowed.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not one of {}", s, allowed.join(", ")))
                }
            }
            (AttributeType::Identifiers, Value::List(items)) => {
                if items.is_empty() {
                    return Err("must list at least one identifier".to_string());
                }
                items.iter().enumerate().try_for_each(|(i, item)| {
                    AttributeType::Identifier
                        .check(item)
                        .map_err(|message| format!("item {}: {}", i, message))
                })
            }
            (expected, got) => Err(format!("expected {}, got {}", expected, got.type_name())),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::Text => f.write_str("string"),
            AttributeType::Identifier => f.write_str("non-empty string"),
            AttributeType::Bool => f.write_str("bool"),
            AttributeType::Count => f.write_str("count"),
            AttributeType::Positive => f.write_str("positive integer"),
            AttributeType::Port => f.write_str("port"),
            AttributeType::Cidr => f.write_str("CIDR block"),
            AttributeType::OneOf(allowed) => write!(f, "one of {}", allowed.join(" | ")),
            AttributeType::Identifiers => f.write_str("list of identifiers"),
        }
    }
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

/// Attribute that failed its schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("{attribute} is required")]
    Missing { attribute: String },

    #[error("{attribute}: {message}")]
    Invalid { attribute: String, message: String },
}

#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Attributes a create call for one kind understands
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub kind: ResourceKind,
    attributes: Vec<AttributeSchema>,
}

impl ResourceSchema {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.push(schema);
        self
    }

    /// Check a payload, reporting every problem in declaration order
    ///
    /// Attributes the schema does not declare are passed through untouched.
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let errors: Vec<TypeError> = self
            .attributes
            .iter()
            .filter_map(|schema| match attributes.get(&schema.name) {
                None if schema.required => Some(TypeError::Missing {
                    attribute: schema.name.clone(),
                }),
                None => None,
                Some(value) => schema.attr_type.check(value).err().map(|message| {
                    TypeError::Invalid {
                        attribute: schema.name.clone(),
                        message,
                    }
                }),
            })
            .collect();

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Validate an IPv4 CIDR block such as `172.20.0.0/16`
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let Some((ip, prefix)) = cidr.split_once('/') else {
        return Err(format!("'{}' is not of the form address/prefix", cidr));
    };
    ip.parse::<Ipv4Addr>()
        .map_err(|_| format!("'{}' is not an IPv4 address", ip))?;
    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        _ => Err(format!("'{}' is not a prefix length between 0 and 32", prefix)),
    }
}

/// Validate a TCP/UDP port number
pub fn validate_port(port: i64) -> Result<(), String> {
    if (0..=65535).contains(&port) {
        Ok(())
    } else {
        Err(format!("{} is outside the port range 0-65535", port))
    }
}

/// Creation schema for a resource kind
pub fn resource_schema(kind: ResourceKind) -> ResourceSchema {
    use AttributeType::*;

    let required = |name: &str, attr_type| AttributeSchema::new(name, attr_type).required();
    let id = |name: &str| required(name, Identifier);
    let schema = ResourceSchema::new(kind);

    match kind {
        ResourceKind::Vpc => schema.attribute(required("cidr_block", Cidr)),
        ResourceKind::InternetGateway | ResourceKind::ElasticIp => schema,
        ResourceKind::InternetGatewayAttachment => schema
            .attribute(id("internet_gateway_id"))
            .attribute(id("vpc_id")),
        ResourceKind::RouteTable => schema.attribute(id("vpc_id")),
        ResourceKind::Route => schema
            .attribute(id("route_table_id"))
            .attribute(required("destination_cidr_block", Cidr))
            .attribute(AttributeSchema::new("gateway_id", Identifier))
            .attribute(AttributeSchema::new("nat_gateway_id", Identifier)),
        ResourceKind::Subnet => schema
            .attribute(id("vpc_id"))
            .attribute(required("cidr_block", Cidr))
            .attribute(id("availability_zone")),
        ResourceKind::RouteTableAssociation => schema
            .attribute(id("route_table_id"))
            .attribute(id("subnet_id")),
        ResourceKind::NatGateway => schema
            .attribute(id("subnet_id"))
            .attribute(id("allocation_id")),
        ResourceKind::SecurityGroup => schema
            .attribute(id("name"))
            .attribute(id("description"))
            .attribute(id("vpc_id")),
        ResourceKind::SecurityGroupIngress => schema
            .attribute(id("group_id"))
            .attribute(required("protocol", OneOf(PROTOCOLS)))
            .attribute(required("from_port", Port))
            .attribute(required("to_port", Port))
            .attribute(id("source"))
            .attribute(required("source_type", OneOf(SOURCE_TYPES))),
        ResourceKind::Queue => schema.attribute(id("name")),
        ResourceKind::LoadBalancer => schema
            .attribute(id("name"))
            .attribute(required("subnets", Identifiers))
            .attribute(id("security_group_id")),
        ResourceKind::Listener => schema
            .attribute(id("load_balancer_arn"))
            .attribute(required("port", Port))
            .attribute(AttributeSchema::new("fixed_response_status", Text)),
        ResourceKind::TargetGroup => schema
            .attribute(id("name"))
            .attribute(id("vpc_id"))
            .attribute(required("port", Port)),
        ResourceKind::ListenerRule => schema
            .attribute(id("listener_arn"))
            .attribute(id("target_group_arn"))
            .attribute(id("path_pattern"))
            .attribute(required("priority", Positive)),
        ResourceKind::InstanceProfile => schema.attribute(id("name")),
        ResourceKind::Role => schema
            .attribute(id("name"))
            .attribute(id("assume_role_policy")),
        ResourceKind::InstanceProfileRole => schema
            .attribute(id("instance_profile_name"))
            .attribute(id("name")),
        ResourceKind::Policy => schema
            .attribute(id("name"))
            .attribute(id("policy_document")),
        ResourceKind::RolePolicyAttachment => schema
            .attribute(id("role_name"))
            .attribute(id("name"))
            .attribute(id("policy_arn")),
        ResourceKind::KeyPair => schema.attribute(id("name")),
        ResourceKind::LaunchTemplate => schema
            .attribute(id("name"))
            .attribute(id("image_id"))
            .attribute(id("instance_type"))
            .attribute(id("instance_profile_name"))
            .attribute(required("security_group_ids", Identifiers))
            .attribute(id("subnet_id"))
            .attribute(AttributeSchema::new("associate_public_ip", Bool))
            .attribute(AttributeSchema::new("key_name", Identifier))
            .attribute(AttributeSchema::new("user_data", Text)),
        ResourceKind::AutoScalingGroup => schema
            .attribute(id("name"))
            .attribute(id("launch_template_id"))
            .attribute(id("subnet_id"))
            .attribute(required("target_group_arns", Identifiers))
            .attribute(required("min_size", Count))
            .attribute(required("max_size", Count))
            .attribute(required("desired_capacity", Count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn protocol_must_be_known() {
        let t = AttributeType::OneOf(PROTOCOLS);
        assert!(t.check(&string("tcp")).is_ok());
        assert!(t.check(&string("-1")).is_ok());
        assert!(t.check(&string("sctp")).is_err());
        assert!(t.check(&Value::Int(6)).is_err());
    }

    #[test]
    fn ports_stay_in_range() {
        assert!(AttributeType::Port.check(&Value::Int(80)).is_ok());
        assert!(AttributeType::Port.check(&Value::Int(65535)).is_ok());
        assert!(AttributeType::Port.check(&Value::Int(65536)).is_err());
        assert!(AttributeType::Port.check(&Value::Int(-1)).is_err());
    }

    #[test]
    fn cidr_blocks() {
        assert!(validate_cidr("172.20.0.0/16").is_ok());
        assert!(validate_cidr("0.0.0.0/0").is_ok());

        assert!(validate_cidr("10.0.0.0").is_err());
        assert!(validate_cidr("10.0.0.0/33").is_err());
        assert!(validate_cidr("10.0.0.256/16").is_err());
        assert!(validate_cidr("10.0.0/16").is_err());
        assert!(AttributeType::Cidr.check(&Value::Int(42)).is_err());
    }

    #[test]
    fn identifier_lists_reject_empty_items() {
        let t = AttributeType::Identifiers;
        assert!(t.check(&Value::List(vec![string("subnet-1")])).is_ok());
        assert!(t.check(&Value::List(vec![])).is_err());

        let err = t.check(&Value::List(vec![string("subnet-1"), string(" ")])).unwrap_err();
        assert!(err.starts_with("item 1"), "{}", err);
    }

    #[test]
    fn capacities_may_be_zero_but_priorities_may_not() {
        assert!(AttributeType::Count.check(&Value::Int(0)).is_ok());
        assert!(AttributeType::Count.check(&Value::Int(-1)).is_err());
        assert!(AttributeType::Positive.check(&Value::Int(0)).is_err());
        assert!(AttributeType::Positive.check(&Value::Int(1)).is_ok());
    }

    #[test]
    fn subnet_schema_requires_zone() {
        let schema = resource_schema(ResourceKind::Subnet);
        let attrs = HashMap::from([
            ("vpc_id".to_string(), string("vpc-1")),
            ("cidr_block".to_string(), string("172.20.1.0/24")),
        ]);

        let errors = schema.validate(&attrs).unwrap_err();
        assert_eq!(
            errors,
            vec![TypeError::Missing {
                attribute: "availability_zone".to_string()
            }]
        );
        assert_eq!(errors[0].to_string(), "availability_zone is required");
    }

    #[test]
    fn errors_name_the_attribute() {
        let schema = resource_schema(ResourceKind::Vpc);
        let attrs = HashMap::from([("cidr_block".to_string(), string("10.0.0.0/40"))]);
        let errors = schema.validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().starts_with("cidr_block: "));
    }

    #[test]
    fn undeclared_attributes_pass_through() {
        let schema = resource_schema(ResourceKind::InternetGateway);
        assert!(schema.validate(&HashMap::new()).is_ok());
        let attrs = HashMap::from([("note".to_string(), string("x"))]);
        assert!(schema.validate(&attrs).is_ok());
    }
}
