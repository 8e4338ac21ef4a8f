//! Spoke stage: workload network routed through the hub appliance and peered
//! both ways with the hub.

use crate::azure::{name_from_id, RemoteApi, ResourceId};
use crate::config::LabConfig;
use crate::error::{ConvergeError, Result};
use crate::models::resources::{
    NicLive, NicSpec, PeeringSpec, RouteSpec, RouteTableSpec, SubnetSpec, VmSpec, VnetSpec,
    NEXT_HOP_VIRTUAL_APPLIANCE,
};
use crate::models::{address_at_offset, DesiredResource, HubOutput, SpokeOutput, SubnetFact};
use crate::processing::{Reconciler, SubnetRequest};
use serde_json::json;

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

pub fn run<A: RemoteApi>(rec: &mut Reconciler<A>, config: &LabConfig, hub: &HubOutput) -> Result<SpokeOutput> {
    let spoke = &config.spoke;
    let policies = &config.match_policies;
    log::info!(
        "#Start spoke stage for vnet '{}' via appliance {}",
        spoke.vnet_name,
        hub.fgt_lan_ip
    );

    let vnet = rec
        .ensure(&DesiredResource::new(
            VnetSpec {
                name: spoke.vnet_name.clone(),
                location: config.location.clone(),
                address_prefixes: spoke.address_space.clone(),
            },
            policies.vnet_address_space,
        ))?
        .live;
    let vnet_id = vnet.id.clone().unwrap_or_else(|| vnet.name.clone());

    rec.ensure(&DesiredResource::exact(RouteTableSpec {
        name: spoke.route_table_name.clone(),
        location: config.location.clone(),
    }))?;
    let route = rec
        .upsert(&RouteSpec {
            route_table: spoke.route_table_name.clone(),
            name: spoke.default_route_name.clone(),
            address_prefix: DEFAULT_ROUTE.to_string(),
            next_hop_type: NEXT_HOP_VIRTUAL_APPLIANCE.to_string(),
            next_hop_ip_address: hub.fgt_lan_ip.clone(),
        })?
        .live;

    let mut subnet = rec
        .ensure_subnet(&SubnetRequest {
            desired: DesiredResource::new(
                SubnetSpec {
                    vnet: spoke.vnet_name.clone(),
                    name: spoke.subnet_name.clone(),
                    address_prefix: spoke.subnet_prefix.clone(),
                    route_table: Some(spoke.route_table_name.clone()),
                    network_security_group: None,
                },
                policies.subnet_prefix,
            ),
            vnet_prefixes: &vnet.address_prefixes,
            attached_nic: Some(spoke.nic_name.as_str()),
            max_third_octet: spoke.subnet_search_max_third_octet,
            sibling_names: &[],
            sibling_prefixes: &[],
        })?
        .live;

    let associated = subnet
        .route_table
        .as_deref()
        .is_some_and(|rt| name_from_id(rt).eq_ignore_ascii_case(&spoke.route_table_name));
    if !associated {
        log::info!("associating route table '{}' with subnet '{}'", spoke.route_table_name, subnet.name);
        let mut params = crate::azure::Params::new();
        params.insert("routeTable".to_string(), json!(spoke.route_table_name));
        subnet = rec.apply_update::<SubnetSpec>(&ResourceId::child(&spoke.vnet_name, &subnet.name), params)?;
    }
    let subnet_prefix = subnet
        .primary_prefix()
        .ok_or_else(|| ConvergeError::validation(&subnet.name, "subnet has no address prefix"))?;

    let desired_ip = address_at_offset(&subnet_prefix, spoke.workload_host_offset)?.to_string();
    let nic: NicLive = rec
        .ensure(&DesiredResource::new(
            NicSpec {
                name: spoke.nic_name.clone(),
                location: config.location.clone(),
                vnet: spoke.vnet_name.clone(),
                subnet: subnet.name.clone(),
                private_ip_address: desired_ip.clone(),
                ip_forwarding: false,
                network_security_group: None,
                public_ip: None,
            },
            policies.nic_addressing,
        ))?
        .live;

    rec.ensure(&DesiredResource::new(
        VmSpec {
            name: spoke.vm_name.clone(),
            location: config.location.clone(),
            image: spoke.vm_image.clone(),
            size: spoke.vm_size.clone(),
            nics: vec![spoke.nic_name.clone()],
            admin_username: config.admin_username.clone(),
            admin_password: config.admin_password.clone(),
        },
        policies.vm_size,
    ))?;

    for (local, name, remote_id) in [
        (&hub.vnet_name, &spoke.hub_to_spoke_peering, &vnet_id),
        (&spoke.vnet_name, &spoke.spoke_to_hub_peering, &hub.vnet_id),
    ] {
        rec.ensure(&DesiredResource::new(
            PeeringSpec {
                vnet: local.clone(),
                name: name.clone(),
                remote_vnet_id: remote_id.clone(),
                allow_vnet_access: true,
                allow_forwarded_traffic: true,
            },
            policies.peering,
        ))?;
    }

    Ok(SpokeOutput {
        vnet_name: vnet.name,
        vnet_id,
        address_prefixes: vnet.address_prefixes,
        workload_subnet: SubnetFact {
            name: subnet.name,
            prefix: subnet_prefix,
        },
        route_table_name: spoke.route_table_name.clone(),
        default_route_next_hop: route.next_hop_ip_address.unwrap_or_else(|| hub.fgt_lan_ip.clone()),
        workload_vm_name: spoke.vm_name.clone(),
        workload_nic: spoke.nic_name.clone(),
        workload_ip: nic.private_ip_address.unwrap_or(desired_ip),
        hub_to_spoke_peering: spoke.hub_to_spoke_peering.clone(),
        spoke_to_hub_peering: spoke.spoke_to_hub_peering.clone(),
    })
}
