//! EC2: network foundation, security groups, key pairs and launch templates

use aws_sdk_ec2::types::{
    AttachmentStatus, DomainType, Filter, InstanceType, IpPermission, IpRange,
    LaunchTemplateIamInstanceProfileSpecificationRequest,
    LaunchTemplateInstanceNetworkInterfaceSpecificationRequest, NatGatewayState,
    RequestLaunchTemplateData, ResourceType, Tag, TagSpecification, UserIdGroupPair, VpcState,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qube_core::provider::{ProviderError, ProviderResult};
use qube_core::resource::{Resource, ResourceKind, State, Tags};

use crate::wait::{Poll, poll_until};
use crate::{AwsProvider, create_failed, created, listed, lookup_failed, no_identifier};

fn to_ec2_tags(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

fn from_ec2_tags(tags: &[Tag]) -> Tags {
    tags.iter()
        .filter_map(|t| Some((t.key()?, t.value().unwrap_or_default())))
        .collect()
}

/// Tags to apply at creation time; EC2 rejects a specification without tags
fn tag_specifications(resource_type: ResourceType, tags: &Tags) -> Option<Vec<TagSpecification>> {
    if tags.is_empty() {
        return None;
    }
    Some(vec![
        TagSpecification::builder()
            .resource_type(resource_type)
            .set_tags(Some(to_ec2_tags(tags)))
            .build(),
    ])
}

/// Tagged state named after its `Name` tag, falling back to the identifier
fn tagged(kind: ResourceKind, identifier: &str, tags: &[Tag]) -> State {
    let tags = from_ec2_tags(tags);
    let name = tags.name().unwrap_or(identifier).to_string();
    listed(kind, &name, identifier).with_tags(tags)
}

fn vpc_filter(vpc_id: &str) -> Filter {
    Filter::builder().name("vpc-id").values(vpc_id).build()
}

/// NAT gateways on their way out (or never up) are not reusable
fn nat_gateway_usable(state: Option<&NatGatewayState>) -> bool {
    !matches!(
        state,
        Some(NatGatewayState::Deleting | NatGatewayState::Deleted | NatGatewayState::Failed)
    )
}

fn nat_gateway_poll(state: Option<&NatGatewayState>) -> Poll {
    match state {
        Some(NatGatewayState::Available) => Poll::Ready,
        Some(
            state @ (NatGatewayState::Deleting
            | NatGatewayState::Deleted
            | NatGatewayState::Failed),
        ) => Poll::Failed(state.as_str().to_string()),
        Some(state) => Poll::Pending(state.as_str().to_string()),
        None => Poll::Pending("unknown".to_string()),
    }
}

impl AwsProvider {
    // ========== VPC ==========

    pub(crate) async fn list_vpcs(&self) -> ProviderResult<Vec<State>> {
        let vpcs = self
            .ec2_client
            .describe_vpcs()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe VPCs", e))?;

        Ok(vpcs
            .iter()
            .filter_map(|vpc| {
                let state = tagged(ResourceKind::Vpc, vpc.vpc_id()?, vpc.tags());
                Some(match vpc.cidr_block() {
                    Some(cidr) => state.with_attribute("cidr_block", cidr),
                    None => state,
                })
            })
            .collect())
    }

    pub(crate) async fn create_vpc(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .create_vpc()
            .cidr_block(resource.require_str("cidr_block")?)
            .set_tag_specifications(tag_specifications(ResourceType::Vpc, &resource.tags))
            .send()
            .await
            .map_err(|e| create_failed("create VPC", e))?;

        let vpc_id = result
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| no_identifier("VPC"))?;
        Ok(created(resource, vpc_id))
    }

    pub(crate) async fn wait_for_vpc(&self, vpc_id: &str) -> ProviderResult<()> {
        poll_until(self.wait_policy, vpc_id, move || async move {
            let result = self
                .ec2_client
                .describe_vpcs()
                .vpc_ids(vpc_id)
                .send()
                .await
                .map_err(|e| lookup_failed("describe VPC", e))?;
            Ok(match result.vpcs().first().and_then(|v| v.state()) {
                Some(VpcState::Available) => Poll::Ready,
                Some(state) => Poll::Pending(state.as_str().to_string()),
                None => Poll::Pending("unknown".to_string()),
            })
        })
        .await
    }

    // ========== Internet Gateway ==========

    pub(crate) async fn list_internet_gateways(&self) -> ProviderResult<Vec<State>> {
        let gateways = self
            .ec2_client
            .describe_internet_gateways()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe internet gateways", e))?;

        Ok(gateways
            .iter()
            .filter_map(|igw| {
                Some(tagged(
                    ResourceKind::InternetGateway,
                    igw.internet_gateway_id()?,
                    igw.tags(),
                ))
            })
            .collect())
    }

    pub(crate) async fn create_internet_gateway(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .create_internet_gateway()
            .set_tag_specifications(tag_specifications(
                ResourceType::InternetGateway,
                &resource.tags,
            ))
            .send()
            .await
            .map_err(|e| create_failed("create internet gateway", e))?;

        let igw_id = result
            .internet_gateway()
            .and_then(|igw| igw.internet_gateway_id())
            .ok_or_else(|| no_identifier("Internet gateway"))?;
        Ok(created(resource, igw_id))
    }

    pub(crate) async fn list_internet_gateway_attachments(
        &self,
        igw_id: &str,
    ) -> ProviderResult<Vec<State>> {
        let result = self
            .ec2_client
            .describe_internet_gateways()
            .internet_gateway_ids(igw_id)
            .send()
            .await
            .map_err(|e| lookup_failed("describe internet gateway", e))?;

        Ok(result
            .internet_gateways()
            .iter()
            .flat_map(|igw| igw.attachments())
            .filter(|a| {
                !matches!(
                    a.state(),
                    Some(AttachmentStatus::Detaching | AttachmentStatus::Detached)
                )
            })
            .filter_map(|a| {
                let vpc_id = a.vpc_id()?;
                Some(
                    listed(
                        ResourceKind::InternetGatewayAttachment,
                        vpc_id,
                        &format!("{}:{}", igw_id, vpc_id),
                    )
                    .with_attribute("vpc_id", vpc_id),
                )
            })
            .collect())
    }

    pub(crate) async fn attach_internet_gateway(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let igw_id = resource.require_str("internet_gateway_id")?;
        let vpc_id = resource.require_str("vpc_id")?;

        self.ec2_client
            .attach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| create_failed("attach internet gateway", e))?;

        Ok(created(resource, format!("{}:{}", igw_id, vpc_id)))
    }

    // ========== Route Table ==========

    pub(crate) async fn list_route_tables(&self, vpc_id: &str) -> ProviderResult<Vec<State>> {
        let tables = self
            .ec2_client
            .describe_route_tables()
            .filters(vpc_filter(vpc_id))
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe route tables", e))?;

        Ok(tables
            .iter()
            .filter_map(|rt| {
                let state = tagged(ResourceKind::RouteTable, rt.route_table_id()?, rt.tags());
                Some(match rt.vpc_id() {
                    Some(vpc_id) => state.with_attribute("vpc_id", vpc_id),
                    None => state,
                })
            })
            .collect())
    }

    pub(crate) async fn create_route_table(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .create_route_table()
            .vpc_id(resource.require_str("vpc_id")?)
            .set_tag_specifications(tag_specifications(ResourceType::RouteTable, &resource.tags))
            .send()
            .await
            .map_err(|e| create_failed("create route table", e))?;

        let rt_id = result
            .route_table()
            .and_then(|rt| rt.route_table_id())
            .ok_or_else(|| no_identifier("Route table"))?;
        Ok(created(resource, rt_id))
    }

    pub(crate) async fn list_routes(&self, route_table_id: &str) -> ProviderResult<Vec<State>> {
        let result = self
            .ec2_client
            .describe_route_tables()
            .route_table_ids(route_table_id)
            .send()
            .await
            .map_err(|e| lookup_failed("describe route table", e))?;

        Ok(result
            .route_tables()
            .iter()
            .flat_map(|rt| rt.routes())
            .filter_map(|route| {
                let destination = route.destination_cidr_block()?;
                let mut state = listed(
                    ResourceKind::Route,
                    destination,
                    &format!("{}:{}", route_table_id, destination),
                )
                .with_attribute("destination_cidr_block", destination);
                if let Some(gw_id) = route.gateway_id() {
                    state = state.with_attribute("gateway_id", gw_id);
                }
                if let Some(nat_gw_id) = route.nat_gateway_id() {
                    state = state.with_attribute("nat_gateway_id", nat_gw_id);
                }
                Some(state)
            })
            .collect())
    }

    pub(crate) async fn create_route(&self, resource: &Resource) -> ProviderResult<State> {
        let route_table_id = resource.require_str("route_table_id")?;
        let destination = resource.require_str("destination_cidr_block")?;

        let mut req = self
            .ec2_client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination);

        if let Some(gw_id) = resource.get_str("gateway_id") {
            req = req.gateway_id(gw_id);
        }
        if let Some(nat_gw_id) = resource.get_str("nat_gateway_id") {
            req = req.nat_gateway_id(nat_gw_id);
        }

        req.send()
            .await
            .map_err(|e| create_failed("create route", e))?;

        Ok(created(resource, format!("{}:{}", route_table_id, destination)))
    }

    // ========== Subnet ==========

    pub(crate) async fn list_subnets(&self, vpc_id: &str) -> ProviderResult<Vec<State>> {
        let subnets = self
            .ec2_client
            .describe_subnets()
            .filters(vpc_filter(vpc_id))
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe subnets", e))?;

        Ok(subnets
            .iter()
            .filter_map(|subnet| {
                let mut state = tagged(ResourceKind::Subnet, subnet.subnet_id()?, subnet.tags())
                    .with_attribute("vpc_id", vpc_id);
                if let Some(cidr) = subnet.cidr_block() {
                    state = state.with_attribute("cidr_block", cidr);
                }
                if let Some(az) = subnet.availability_zone() {
                    state = state.with_attribute("availability_zone", az);
                }
                Some(state)
            })
            .collect())
    }

    pub(crate) async fn create_subnet(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .create_subnet()
            .vpc_id(resource.require_str("vpc_id")?)
            .cidr_block(resource.require_str("cidr_block")?)
            .availability_zone(resource.require_str("availability_zone")?)
            .set_tag_specifications(tag_specifications(ResourceType::Subnet, &resource.tags))
            .send()
            .await
            .map_err(|e| create_failed("create subnet", e))?;

        let subnet_id = result
            .subnet()
            .and_then(|s| s.subnet_id())
            .ok_or_else(|| no_identifier("Subnet"))?;
        Ok(created(resource, subnet_id))
    }

    pub(crate) async fn list_route_table_associations(
        &self,
        subnet_id: &str,
    ) -> ProviderResult<Vec<State>> {
        let filter = Filter::builder()
            .name("association.subnet-id")
            .values(subnet_id)
            .build();

        let result = self
            .ec2_client
            .describe_route_tables()
            .filters(filter)
            .send()
            .await
            .map_err(|e| lookup_failed("describe route table associations", e))?;

        Ok(result
            .route_tables()
            .iter()
            .flat_map(|rt| rt.associations())
            .filter(|a| a.subnet_id() == Some(subnet_id))
            .filter_map(|a| {
                let rt_id = a.route_table_id()?;
                let association_id = a.route_table_association_id()?;
                Some(
                    listed(ResourceKind::RouteTableAssociation, rt_id, association_id)
                        .with_attribute("route_table_id", rt_id),
                )
            })
            .collect())
    }

    pub(crate) async fn associate_route_table(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .associate_route_table()
            .route_table_id(resource.require_str("route_table_id")?)
            .subnet_id(resource.require_str("subnet_id")?)
            .send()
            .await
            .map_err(|e| create_failed("associate route table", e))?;

        let association_id = result
            .association_id()
            .ok_or_else(|| no_identifier("Route table association"))?;
        Ok(created(resource, association_id))
    }

    // ========== Elastic IP / NAT Gateway ==========

    pub(crate) async fn list_addresses(&self) -> ProviderResult<Vec<State>> {
        let filter = Filter::builder().name("domain").values("vpc").build();

        let result = self
            .ec2_client
            .describe_addresses()
            .filters(filter)
            .send()
            .await
            .map_err(|e| lookup_failed("describe addresses", e))?;

        Ok(result
            .addresses()
            .iter()
            .filter_map(|addr| {
                Some(tagged(
                    ResourceKind::ElasticIp,
                    addr.allocation_id()?,
                    addr.tags(),
                ))
            })
            .collect())
    }

    pub(crate) async fn allocate_address(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .allocate_address()
            .domain(DomainType::Vpc)
            .set_tag_specifications(tag_specifications(ResourceType::ElasticIp, &resource.tags))
            .send()
            .await
            .map_err(|e| create_failed("allocate address", e))?;

        let allocation_id = result
            .allocation_id()
            .ok_or_else(|| no_identifier("Elastic IP"))?;
        Ok(created(resource, allocation_id))
    }

    pub(crate) async fn list_nat_gateways(&self, subnet_id: &str) -> ProviderResult<Vec<State>> {
        let filter = Filter::builder().name("subnet-id").values(subnet_id).build();

        let gateways = self
            .ec2_client
            .describe_nat_gateways()
            .filter(filter)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe NAT gateways", e))?;

        Ok(gateways
            .iter()
            .filter(|nat| nat_gateway_usable(nat.state()))
            .filter_map(|nat| {
                let state = tagged(ResourceKind::NatGateway, nat.nat_gateway_id()?, nat.tags());
                Some(match nat.subnet_id() {
                    Some(subnet_id) => state.with_attribute("subnet_id", subnet_id),
                    None => state,
                })
            })
            .collect())
    }

    pub(crate) async fn create_nat_gateway(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .create_nat_gateway()
            .subnet_id(resource.require_str("subnet_id")?)
            .allocation_id(resource.require_str("allocation_id")?)
            .set_tag_specifications(tag_specifications(ResourceType::Natgateway, &resource.tags))
            .send()
            .await
            .map_err(|e| create_failed("create NAT gateway", e))?;

        let nat_id = result
            .nat_gateway()
            .and_then(|nat| nat.nat_gateway_id())
            .ok_or_else(|| no_identifier("NAT gateway"))?;
        Ok(created(resource, nat_id))
    }

    pub(crate) async fn wait_for_nat_gateway(&self, nat_id: &str) -> ProviderResult<()> {
        poll_until(self.wait_policy, nat_id, move || async move {
            let result = self
                .ec2_client
                .describe_nat_gateways()
                .nat_gateway_ids(nat_id)
                .send()
                .await
                .map_err(|e| lookup_failed("describe NAT gateway", e))?;
            Ok(nat_gateway_poll(
                result.nat_gateways().first().and_then(|nat| nat.state()),
            ))
        })
        .await
    }

    // ========== Security Group ==========

    pub(crate) async fn list_security_groups(&self, vpc_id: &str) -> ProviderResult<Vec<State>> {
        let groups = self
            .ec2_client
            .describe_security_groups()
            .filters(vpc_filter(vpc_id))
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe security groups", e))?;

        Ok(groups
            .iter()
            .filter_map(|sg| {
                let group_id = sg.group_id()?;
                let group_name = sg.group_name()?;
                let mut state = listed(ResourceKind::SecurityGroup, group_name, group_id)
                    .with_attribute("name", group_name)
                    .with_tags(from_ec2_tags(sg.tags()));
                if let Some(vpc_id) = sg.vpc_id() {
                    state = state.with_attribute("vpc_id", vpc_id);
                }
                Some(state)
            })
            .collect())
    }

    pub(crate) async fn create_security_group(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .create_security_group()
            .group_name(resource.require_str("name")?)
            .description(resource.require_str("description")?)
            .vpc_id(resource.require_str("vpc_id")?)
            .set_tag_specifications(tag_specifications(
                ResourceType::SecurityGroup,
                &resource.tags,
            ))
            .send()
            .await
            .map_err(|e| create_failed("create security group", e))?;

        let group_id = result
            .group_id()
            .ok_or_else(|| no_identifier("Security group"))?;
        Ok(created(resource, group_id))
    }

    pub(crate) async fn list_ingress_rules(&self, group_id: &str) -> ProviderResult<Vec<State>> {
        let filter = Filter::builder().name("group-id").values(group_id).build();

        let rules = self
            .ec2_client
            .describe_security_group_rules()
            .filters(filter)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe security group rules", e))?;

        Ok(rules
            .iter()
            .filter(|rule| rule.is_egress() == Some(false))
            .filter_map(|rule| {
                let rule_id = rule.security_group_rule_id()?;
                let (source, source_type) = match rule.cidr_ipv4() {
                    Some(cidr) => (cidr, "cidr"),
                    None => (rule.referenced_group_info()?.group_id()?, "group"),
                };
                let mut state = listed(ResourceKind::SecurityGroupIngress, rule_id, rule_id)
                    .with_attribute("source", source)
                    .with_attribute("source_type", source_type);
                if let Some(protocol) = rule.ip_protocol() {
                    state = state.with_attribute("protocol", protocol);
                }
                if let Some(from_port) = rule.from_port() {
                    state = state.with_attribute("from_port", i64::from(from_port));
                }
                if let Some(to_port) = rule.to_port() {
                    state = state.with_attribute("to_port", i64::from(to_port));
                }
                Some(state)
            })
            .collect())
    }

    pub(crate) async fn authorize_ingress(&self, resource: &Resource) -> ProviderResult<State> {
        let group_id = resource.require_str("group_id")?;
        let source = resource.require_str("source")?;

        let permission = IpPermission::builder()
            .ip_protocol(resource.require_str("protocol")?)
            .from_port(port(resource, "from_port")?)
            .to_port(port(resource, "to_port")?);
        let permission = match resource.get_str("source_type") {
            Some("group") => permission
                .user_id_group_pairs(UserIdGroupPair::builder().group_id(source).build()),
            _ => permission.ip_ranges(IpRange::builder().cidr_ip(source).build()),
        };

        let result = self
            .ec2_client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(permission.build())
            .send()
            .await
            .map_err(|e| create_failed("authorize ingress", e))?;

        let rule_id = result
            .security_group_rules()
            .iter()
            .find_map(|r| r.security_group_rule_id())
            .ok_or_else(|| no_identifier("Ingress rule"))?;
        Ok(created(resource, rule_id))
    }

    // ========== Key Pair ==========

    pub(crate) async fn list_key_pairs(&self) -> ProviderResult<Vec<State>> {
        let result = self
            .ec2_client
            .describe_key_pairs()
            .send()
            .await
            .map_err(|e| lookup_failed("describe key pairs", e))?;

        Ok(result
            .key_pairs()
            .iter()
            .filter_map(|key| {
                let name = key.key_name()?;
                Some(
                    listed(ResourceKind::KeyPair, name, key.key_pair_id()?)
                        .with_attribute("name", name),
                )
            })
            .collect())
    }

    pub(crate) async fn create_key_pair(&self, resource: &Resource) -> ProviderResult<State> {
        let result = self
            .ec2_client
            .create_key_pair()
            .key_name(resource.require_str("name")?)
            .set_tag_specifications(tag_specifications(ResourceType::KeyPair, &resource.tags))
            .send()
            .await
            .map_err(|e| create_failed("create key pair", e))?;

        let key_pair_id = result
            .key_pair_id()
            .ok_or_else(|| no_identifier("Key pair"))?;
        let state = created(resource, key_pair_id);
        Ok(match result.key_material() {
            Some(material) => state.with_attribute("key_material", material),
            None => state,
        })
    }

    // ========== Launch Template ==========

    pub(crate) async fn list_launch_templates(&self) -> ProviderResult<Vec<State>> {
        let templates = self
            .ec2_client
            .describe_launch_templates()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("describe launch templates", e))?;

        Ok(templates
            .iter()
            .filter_map(|lt| {
                let name = lt.launch_template_name()?;
                Some(
                    listed(ResourceKind::LaunchTemplate, name, lt.launch_template_id()?)
                        .with_attribute("name", name)
                        .with_tags(from_ec2_tags(lt.tags())),
                )
            })
            .collect())
    }

    pub(crate) async fn create_launch_template(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let mut interface = LaunchTemplateInstanceNetworkInterfaceSpecificationRequest::builder()
            .device_index(0)
            .subnet_id(resource.require_str("subnet_id")?)
            .associate_public_ip_address(resource.get_bool("associate_public_ip").unwrap_or(false))
            .delete_on_termination(true);
        for group_id in resource.get_str_list("security_group_ids") {
            interface = interface.groups(group_id);
        }

        let data = RequestLaunchTemplateData::builder()
            .image_id(resource.require_str("image_id")?)
            .instance_type(InstanceType::from(resource.require_str("instance_type")?))
            .iam_instance_profile(
                LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                    .name(resource.require_str("instance_profile_name")?)
                    .build(),
            )
            .network_interfaces(interface.build())
            .set_key_name(resource.get_str("key_name").map(String::from))
            .user_data(STANDARD.encode(resource.get_str("user_data").unwrap_or_default()))
            .build();

        let result = self
            .ec2_client
            .create_launch_template()
            .launch_template_name(resource.require_str("name")?)
            .launch_template_data(data)
            .set_tag_specifications(tag_specifications(
                ResourceType::LaunchTemplate,
                &resource.tags,
            ))
            .send()
            .await
            .map_err(|e| create_failed("create launch template", e))?;

        let lt_id = result
            .launch_template()
            .and_then(|lt| lt.launch_template_id())
            .ok_or_else(|| no_identifier("Launch template"))?;
        Ok(created(resource, lt_id))
    }
}

/// Port attribute narrowed to the SDK's integer type
fn port(resource: &Resource, key: &str) -> ProviderResult<i32> {
    let value = resource.require_int(key)?;
    i32::try_from(value).map_err(|_| {
        ProviderError::invalid_input(format!(
            "{} out of range: {}",
            key, value
        ))
    })
}
