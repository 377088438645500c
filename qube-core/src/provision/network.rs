//! Network foundation: VPC, gateways, route tables and subnets

use serde::Serialize;

use super::Provisioner;
use crate::config::StackConfig;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Resource, ResourceKind, Tags};

/// Destination CIDR of every default route
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Where a route table's default route points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NatGatewayOutputs {
    pub nat_gateway_id: String,
    pub allocation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkOutputs {
    pub vpc_id: String,
    pub internet_gateway_id: String,
    pub public_route_table_id: String,
    pub public_subnet_ids: Vec<String>,
    pub nat_gateway: NatGatewayOutputs,
    pub private_route_table_id: String,
    pub private_subnet_id: String,
}

fn tag_name(tags: &Tags, fallback: &str) -> String {
    tags.name().unwrap_or(fallback).to_string()
}

impl<P: Provider + ?Sized> Provisioner<'_, P> {
    /// Ensure a VPC with exactly this CIDR block and tag set
    pub async fn ensure_vpc(&mut self, cidr_block: &str, tags: Tags) -> ProviderResult<String> {
        let vpc = Resource::new(ResourceKind::Vpc, tag_name(&tags, cidr_block))
            .with_attribute("cidr_block", cidr_block)
            .with_tags(tags);
        Ok(self.ensure(&vpc).await?.identifier().to_string())
    }

    /// Ensure an internet gateway and its attachment to the VPC
    pub async fn ensure_internet_gateway(
        &mut self,
        vpc_id: &str,
        tags: Tags,
    ) -> ProviderResult<String> {
        let name = tag_name(&tags, "internet-gateway");
        let gateway = Resource::new(ResourceKind::InternetGateway, name.clone()).with_tags(tags);
        let gateway_id = self.ensure(&gateway).await?.identifier().to_string();

        let attachment = Resource::new(ResourceKind::InternetGatewayAttachment, name)
            .with_attribute("internet_gateway_id", gateway_id.as_str())
            .with_attribute("vpc_id", vpc_id);

        // A gateway attaches to a single VPC
        let attachments = self
            .provider
            .list(ResourceKind::InternetGatewayAttachment, Some(gateway_id.as_str()))
            .await
            .map_err(|e| e.for_resource(attachment.id.clone()))?;
        if let Some(other) = attachments
            .iter()
            .filter_map(|state| state.get_str("vpc_id"))
            .find(|attached| *attached != vpc_id)
        {
            return Err(ProviderError::lookup(format!(
                "Internet gateway {} is already attached to {}, not {}",
                gateway_id, other, vpc_id
            ))
            .for_resource(attachment.id.clone()));
        }
        self.ensure(&attachment).await?;

        Ok(gateway_id)
    }

    /// Ensure a route table with a default route toward `target`
    ///
    /// A table that already exists but lacks the default route gets it added.
    pub async fn ensure_route_table(
        &mut self,
        vpc_id: &str,
        tags: Tags,
        target: &RouteTarget,
    ) -> ProviderResult<String> {
        let name = tag_name(&tags, "route-table");
        let table = Resource::new(ResourceKind::RouteTable, name.clone())
            .with_attribute("vpc_id", vpc_id)
            .with_tags(tags);
        let table_id = self.ensure(&table).await?.identifier().to_string();

        let route = Resource::new(ResourceKind::Route, format!("{}-default", name))
            .with_attribute("route_table_id", table_id.as_str())
            .with_attribute("destination_cidr_block", DEFAULT_ROUTE);
        let route = match target {
            RouteTarget::InternetGateway(id) => route.with_attribute("gateway_id", id),
            RouteTarget::NatGateway(id) => route.with_attribute("nat_gateway_id", id),
        };
        self.ensure(&route).await?;

        Ok(table_id)
    }

    /// Ensure a subnet and its association with a route table
    pub async fn ensure_subnet(
        &mut self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
        tags: Tags,
        route_table_id: &str,
    ) -> ProviderResult<String> {
        let name = tag_name(&tags, cidr_block);
        let subnet = Resource::new(ResourceKind::Subnet, name.clone())
            .with_attribute("vpc_id", vpc_id)
            .with_attribute("cidr_block", cidr_block)
            .with_attribute("availability_zone", availability_zone)
            .with_tags(tags);
        let subnet_id = self.ensure(&subnet).await?.identifier().to_string();

        let association = Resource::new(ResourceKind::RouteTableAssociation, name)
            .with_attribute("subnet_id", subnet_id.as_str())
            .with_attribute("route_table_id", route_table_id);
        self.ensure(&association).await?;

        Ok(subnet_id)
    }

    /// Ensure an Elastic IP and a NAT gateway using it in `public_subnet_id`
    ///
    /// The address carries the gateway's tags plus an `-eip` suffixed name so
    /// that reruns find it instead of allocating another one.
    pub async fn ensure_nat_gateway(
        &mut self,
        public_subnet_id: &str,
        tags: Tags,
    ) -> ProviderResult<NatGatewayOutputs> {
        let name = tag_name(&tags, "nat-gateway");
        let eip_name = format!("{}-eip", name);
        let address = Resource::new(ResourceKind::ElasticIp, eip_name.clone())
            .with_tags(tags.clone().with("Name", eip_name));
        let allocation_id = self.ensure(&address).await?.identifier().to_string();

        let gateway = Resource::new(ResourceKind::NatGateway, name)
            .with_attribute("subnet_id", public_subnet_id)
            .with_attribute("allocation_id", allocation_id.as_str())
            .with_tags(tags);
        let nat_gateway_id = self.ensure(&gateway).await?.identifier().to_string();

        Ok(NatGatewayOutputs {
            nat_gateway_id,
            allocation_id,
        })
    }

    /// Ensure the whole network foundation
    pub async fn provision_network(&mut self, config: &StackConfig) -> ProviderResult<NetworkOutputs> {
        let network = &config.network;

        let vpc_id = self
            .ensure_vpc(&network.cidr_block, config.tags_for(&network.vpc_name))
            .await?;
        let internet_gateway_id = self
            .ensure_internet_gateway(&vpc_id, config.tags_for(&network.internet_gateway_name))
            .await?;

        let public_route_table_id = self
            .ensure_route_table(
                &vpc_id,
                config.tags_for(&network.public_route_table_name),
                &RouteTarget::InternetGateway(internet_gateway_id.clone()),
            )
            .await?;

        let mut public_subnet_ids = Vec::with_capacity(network.public_subnets.len());
        for subnet in &network.public_subnets {
            let id = self
                .ensure_subnet(
                    &vpc_id,
                    &subnet.cidr_block,
                    &subnet.availability_zone,
                    config.tags_for(&subnet.name),
                    &public_route_table_id,
                )
                .await?;
            public_subnet_ids.push(id);
        }

        let Some(first_public_subnet) = public_subnet_ids.first() else {
            return Err(ProviderError::invalid_input(
                "At least one public subnet is required for the NAT gateway",
            ));
        };
        let nat_gateway = self
            .ensure_nat_gateway(first_public_subnet, config.tags_for(&network.nat_gateway_name))
            .await?;

        let private_route_table_id = self
            .ensure_route_table(
                &vpc_id,
                config.tags_for(&network.private_route_table_name),
                &RouteTarget::NatGateway(nat_gateway.nat_gateway_id.clone()),
            )
            .await?;

        let private = &network.private_subnet;
        let private_subnet_id = self
            .ensure_subnet(
                &vpc_id,
                &private.cidr_block,
                &private.availability_zone,
                config.tags_for(&private.name),
                &private_route_table_id,
            )
            .await?;

        Ok(NetworkOutputs {
            vpc_id,
            internet_gateway_id,
            public_route_table_id,
            public_subnet_ids,
            nat_gateway,
            private_route_table_id,
            private_subnet_id,
        })
    }
}
