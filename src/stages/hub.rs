//! Hub stage: network, appliance subnets, security groups, NICs and the
//! FortiGate VM.

use crate::azure::RemoteApi;
use crate::config::LabConfig;
use crate::error::{ConvergeError, Result};
use crate::models::resources::{
    NicLive, NicSpec, NsgSpec, PublicIpSpec, SecurityRuleSpec, SubnetLive, SubnetSpec, VmSpec, VnetSpec,
};
use crate::models::{address_at_offset, contains, DesiredResource, HubOutput, MatchPolicy, SubnetFact};
use crate::processing::{Reconciler, SubnetRequest};

/// Inbound rules of the WAN security group: management from the allowed range.
fn wan_rules(config: &LabConfig) -> Vec<SecurityRuleSpec> {
    [("allow-mgmt-https", 100, "443"), ("allow-mgmt-ssh", 110, "22")]
        .into_iter()
        .map(|(name, priority, port)| SecurityRuleSpec {
            nsg: config.hub.wan_nsg_name.clone(),
            name: name.to_string(),
            priority,
            direction: "Inbound".to_string(),
            access: "Allow".to_string(),
            protocol: "Tcp".to_string(),
            source_address_prefix: config.allowed_mgmt_cidr.clone(),
            destination_port_range: port.to_string(),
        })
        .collect()
}

fn lan_rules(config: &LabConfig) -> Vec<SecurityRuleSpec> {
    vec![SecurityRuleSpec {
        nsg: config.hub.lan_nsg_name.clone(),
        name: "allow-vnet-inbound".to_string(),
        priority: 100,
        direction: "Inbound".to_string(),
        access: "Allow".to_string(),
        protocol: "*".to_string(),
        source_address_prefix: "VirtualNetwork".to_string(),
        destination_port_range: "*".to_string(),
    }]
}

fn prefix_of(subnet: &SubnetLive) -> Result<String> {
    subnet
        .primary_prefix()
        .ok_or_else(|| ConvergeError::validation(&subnet.name, "subnet has no address prefix"))
}

/// The pinned LAN address when it sits inside the LAN subnet, else the host offset.
fn resolve_lan_ip(config: &LabConfig, lan_prefix: &str) -> Result<String> {
    if let Some(ip) = &config.hub.fgt_lan_ip {
        if contains(ip, lan_prefix)? {
            return Ok(ip.clone());
        }
        log::warn!("configured FortiGate LAN IP {ip} is outside {lan_prefix}; deriving it from the subnet");
    }
    Ok(address_at_offset(lan_prefix, config.hub.lan_host_offset)?.to_string())
}

fn ensure_nic<A: RemoteApi>(rec: &mut Reconciler<A>, spec: NicSpec, policy: MatchPolicy) -> Result<String> {
    let wanted = spec.private_ip_address.clone();
    let live: NicLive = rec.ensure(&DesiredResource::new(spec, policy))?.live;
    Ok(live.private_ip_address.unwrap_or(wanted))
}

pub fn run<A: RemoteApi>(rec: &mut Reconciler<A>, config: &LabConfig) -> Result<HubOutput> {
    let hub = &config.hub;
    let policies = &config.match_policies;
    log::info!("#Start hub stage for vnet '{}'", hub.vnet_name);

    let vnet = rec
        .ensure(&DesiredResource::new(
            VnetSpec {
                name: hub.vnet_name.clone(),
                location: config.location.clone(),
                address_prefixes: hub.address_space.clone(),
            },
            policies.vnet_address_space,
        ))?
        .live;

    for (nsg, rules) in [(&hub.wan_nsg_name, wan_rules(config)), (&hub.lan_nsg_name, lan_rules(config))] {
        rec.ensure(&DesiredResource::exact(NsgSpec {
            name: nsg.clone(),
            location: config.location.clone(),
        }))?;
        for rule in &rules {
            rec.upsert(rule)?;
        }
    }

    let subnet = |name: &str, prefix: &str| {
        DesiredResource::new(
            SubnetSpec {
                vnet: hub.vnet_name.clone(),
                name: name.to_string(),
                address_prefix: prefix.to_string(),
                route_table: None,
                network_security_group: None,
            },
            policies.subnet_prefix,
        )
    };
    let wan = rec
        .ensure_subnet(&SubnetRequest {
            desired: subnet(&hub.wan_subnet_name, &hub.wan_subnet_prefix),
            vnet_prefixes: &vnet.address_prefixes,
            attached_nic: Some(hub.wan_nic_name.as_str()),
            max_third_octet: hub.subnet_search_max_third_octet,
            sibling_names: &[hub.lan_subnet_name.clone()],
            sibling_prefixes: &[hub.lan_subnet_prefix.clone()],
        })?
        .live;
    let lan = rec
        .ensure_subnet(&SubnetRequest {
            desired: subnet(&hub.lan_subnet_name, &hub.lan_subnet_prefix),
            vnet_prefixes: &vnet.address_prefixes,
            attached_nic: Some(hub.lan_nic_name.as_str()),
            max_third_octet: hub.subnet_search_max_third_octet,
            sibling_names: &[hub.wan_subnet_name.clone(), wan.name.clone()],
            sibling_prefixes: &[hub.wan_subnet_prefix.clone()],
        })?
        .live;
    if lan.name.eq_ignore_ascii_case(&wan.name) {
        return Err(ConvergeError::validation(
            &lan.name,
            "WAN and LAN interfaces would share one subnet",
        ));
    }
    let wan_prefix = prefix_of(&wan)?;
    let lan_prefix = prefix_of(&lan)?;
    log::info!("hub WAN subnet '{}' {wan_prefix}, LAN subnet '{}' {lan_prefix}", wan.name, lan.name);

    let pip = rec
        .ensure(&DesiredResource::new(
            PublicIpSpec {
                name: hub.public_ip_name.clone(),
                location: config.location.clone(),
                sku: hub.public_ip_sku.clone(),
                allocation_method: "Static".to_string(),
            },
            policies.public_ip,
        ))?
        .live;

    let wan_ip = ensure_nic(
        rec,
        NicSpec {
            name: hub.wan_nic_name.clone(),
            location: config.location.clone(),
            vnet: hub.vnet_name.clone(),
            subnet: wan.name.clone(),
            private_ip_address: address_at_offset(&wan_prefix, hub.wan_host_offset)?.to_string(),
            ip_forwarding: true,
            network_security_group: Some(hub.wan_nsg_name.clone()),
            public_ip: Some(hub.public_ip_name.clone()),
        },
        policies.nic_addressing,
    )?;
    let lan_ip = ensure_nic(
        rec,
        NicSpec {
            name: hub.lan_nic_name.clone(),
            location: config.location.clone(),
            vnet: hub.vnet_name.clone(),
            subnet: lan.name.clone(),
            private_ip_address: resolve_lan_ip(config, &lan_prefix)?,
            ip_forwarding: true,
            network_security_group: Some(hub.lan_nsg_name.clone()),
            public_ip: None,
        },
        policies.nic_addressing,
    )?;

    rec.ensure(&DesiredResource::new(
        VmSpec {
            name: hub.fgt_vm_name.clone(),
            location: config.location.clone(),
            image: hub.fgt_image.clone(),
            size: hub.fgt_vm_size.clone(),
            nics: vec![hub.wan_nic_name.clone(), hub.lan_nic_name.clone()],
            admin_username: config.admin_username.clone(),
            admin_password: config.admin_password.clone(),
        },
        policies.vm_size,
    ))?;

    Ok(HubOutput {
        resource_group: config.resource_group.clone(),
        location: config.location.clone(),
        vnet_id: vnet.id.clone().unwrap_or_else(|| vnet.name.clone()),
        vnet_name: vnet.name,
        address_prefixes: vnet.address_prefixes,
        wan_subnet: SubnetFact {
            name: wan.name,
            prefix: wan_prefix,
        },
        lan_subnet: SubnetFact {
            name: lan.name,
            prefix: lan_prefix,
        },
        public_ip_name: pip.name,
        public_ip_address: pip.ip_address,
        fgt_vm_name: hub.fgt_vm_name.clone(),
        fgt_wan_nic: hub.wan_nic_name.clone(),
        fgt_lan_nic: hub.lan_nic_name.clone(),
        fgt_wan_ip: wan_ip,
        fgt_lan_ip: lan_ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::{InMemoryApi, ResourceId, ResourceKind};
    use crate::config::tests::sample;
    use crate::processing::{RecordingSleeper, RetryPolicy};
    use serde_json::json;

    fn config() -> LabConfig {
        let mut config = sample();
        config.admin_password = Some("Lab-Passw0rd!".to_string());
        config
    }

    fn reconciler(api: InMemoryApi) -> Reconciler<InMemoryApi> {
        Reconciler::new(api, RetryPolicy::default(), Box::new(RecordingSleeper::new()))
    }

    #[test]
    fn test_fresh_hub() {
        let config = config();
        let mut rec = reconciler(InMemoryApi::new("rg-lab"));
        let out = run(&mut rec, &config).unwrap();

        assert_eq!(out.wan_subnet.prefix, "10.100.0.0/24");
        assert_eq!(out.lan_subnet.prefix, "10.100.1.0/24");
        assert_eq!(out.fgt_wan_ip, "10.100.0.4");
        assert_eq!(out.fgt_lan_ip, "10.100.1.4");
        assert_eq!(out.public_ip_address.as_deref(), Some("203.0.113.1"));
        assert!(out.vnet_id.ends_with("/virtualNetworks/vnet-hub"));

        let nic = rec.api().get(ResourceKind::NetworkInterface, &ResourceId::top("nic-fgt-lan")).unwrap();
        assert_eq!(nic["enableIpForwarding"], json!(true));
        let vm = rec.api().get(ResourceKind::VirtualMachine, &ResourceId::top("vm-fgt")).unwrap();
        assert!(vm.get("adminPassword").is_none());
    }

    #[test]
    fn test_rerun_is_quiet() {
        let config = config();
        let mut rec = reconciler(InMemoryApi::new("rg-lab"));
        let first = run(&mut rec, &config).unwrap();
        rec.api_mut().reset_calls();
        rec.take_journal();

        let second = run(&mut rec, &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(rec.api().mutating_calls(), 0);
    }

    #[test]
    fn test_pinned_lan_ip_outside_allocated_subnet_is_rederived() {
        let config = config();
        let mut api = InMemoryApi::new("rg-lab");
        api.seed(
            ResourceKind::VirtualNetwork,
            ResourceId::top("vnet-hub"),
            json!({ "addressPrefixes": ["10.100.0.0/16"] }),
        );
        api.seed(
            ResourceKind::Subnet,
            ResourceId::child("vnet-hub", "legacy"),
            json!({ "addressPrefix": "10.100.1.0/24", "ipConfigurationCount": 2 }),
        );
        let mut rec = reconciler(api);
        let out = run(&mut rec, &config).unwrap();
        assert_eq!(out.lan_subnet.prefix, "10.100.2.0/24");
        assert_eq!(out.fgt_lan_ip, "10.100.2.4");
    }

    #[test]
    fn test_relocated_wan_subnet_is_not_reused_for_lan() {
        let config = config();
        let mut api = InMemoryApi::new("rg-lab");
        api.seed(
            ResourceKind::VirtualNetwork,
            ResourceId::top("vnet-hub"),
            json!({ "addressPrefixes": ["10.100.0.0/16"] }),
        );
        api.seed(
            ResourceKind::Subnet,
            ResourceId::child("vnet-hub", "legacy"),
            json!({ "addressPrefix": "10.100.0.0/24", "ipConfigurationCount": 1 }),
        );
        let mut rec = reconciler(api);
        let out = run(&mut rec, &config).unwrap();

        assert_eq!(out.wan_subnet.name, "snet-fgt-wan");
        assert_eq!(out.wan_subnet.prefix, "10.100.2.0/24");
        assert_eq!(out.lan_subnet.name, "snet-fgt-lan");
        assert_eq!(out.lan_subnet.prefix, "10.100.1.0/24");
        assert_eq!(out.fgt_wan_ip, "10.100.2.4");
        assert_eq!(out.fgt_lan_ip, "10.100.1.4");

        // rerun keeps both where they are
        rec.api_mut().reset_calls();
        assert_eq!(run(&mut rec, &config).unwrap(), out);
        assert_eq!(rec.api().mutating_calls(), 0);
    }

    #[test]
    fn test_missing_password_blocks_vm_creation() {
        let mut config = config();
        config.admin_password = None;
        let mut rec = reconciler(InMemoryApi::new("rg-lab"));
        assert!(matches!(run(&mut rec, &config), Err(ConvergeError::Validation { .. })));
    }

    #[test]
    fn test_rules_follow_mgmt_cidr() {
        let config = config();
        let rules = wan_rules(&config);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.source_address_prefix == "198.51.100.0/24"));
        assert_eq!(lan_rules(&config)[0].source_address_prefix, "VirtualNetwork");
    }
}
