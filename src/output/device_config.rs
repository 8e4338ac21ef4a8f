//! Minimal FortiGate configuration for the converged topology.
//!
//! The text is an artifact for an operator to paste into the appliance; the
//! pipeline never applies it.

use crate::error::{ConvergeError, Result};
use crate::models::{address_at_offset, get_cidr_mask, u32_to_ipv4, HubOutput, Ipv4, SpokeOutput};
use std::fmt::{self, Write};

/// Azure answers on the first host of every subnet as its gateway.
const AZURE_GATEWAY_OFFSET: u32 = 1;

/// `10.0.1.4` + `10.0.1.0/24` -> `10.0.1.4 255.255.255.0`
fn addr_with_netmask(ip: &str, prefix: &str) -> Result<String> {
    let cidr = Ipv4::new(prefix)?;
    let mask = u32_to_ipv4(get_cidr_mask(cidr.mask)?);
    Ok(format!("{ip} {mask}"))
}

/// `10.101.0.0/16` -> `10.101.0.0 255.255.0.0`
fn subnet_with_netmask(prefix: &str) -> Result<String> {
    let cidr = Ipv4::new(prefix)?;
    addr_with_netmask(&cidr.lo().to_string(), prefix)
}

/// Addresses already resolved to FortiOS notation.
struct Addressing {
    wan_ip: String,
    lan_ip: String,
    wan_gw: String,
    lan_gw: String,
    spoke_routes: Vec<String>,
    workload_subnet: String,
}

pub fn render(hub: &HubOutput, spoke: &SpokeOutput) -> Result<String> {
    let addressing = Addressing {
        wan_ip: addr_with_netmask(&hub.fgt_wan_ip, &hub.wan_subnet.prefix)?,
        lan_ip: addr_with_netmask(&hub.fgt_lan_ip, &hub.lan_subnet.prefix)?,
        wan_gw: address_at_offset(&hub.wan_subnet.prefix, AZURE_GATEWAY_OFFSET)?.to_string(),
        lan_gw: address_at_offset(&hub.lan_subnet.prefix, AZURE_GATEWAY_OFFSET)?.to_string(),
        spoke_routes: spoke
            .address_prefixes
            .iter()
            .map(|p| subnet_with_netmask(p))
            .collect::<Result<Vec<_>>>()?,
        workload_subnet: subnet_with_netmask(&spoke.workload_subnet.prefix)?,
    };

    let mut out = String::new();
    write_config(&mut out, hub, spoke, &addressing)
        .map_err(|e| ConvergeError::validation(&hub.fgt_vm_name, format!("rendering device config: {e}")))?;
    Ok(out)
}

fn write_config(out: &mut impl Write, hub: &HubOutput, spoke: &SpokeOutput, a: &Addressing) -> fmt::Result {
    writeln!(out, "# {} ({})", hub.fgt_vm_name, hub.resource_group)?;
    writeln!(out, "config system interface")?;
    for (port, alias, ip, access) in [
        ("port1", "wan", &a.wan_ip, "ping https ssh"),
        ("port2", "lan", &a.lan_ip, "ping"),
    ] {
        writeln!(out, "    edit \"{port}\"")?;
        writeln!(out, "        set alias \"{alias}\"")?;
        writeln!(out, "        set mode static")?;
        writeln!(out, "        set ip {ip}")?;
        writeln!(out, "        set allowaccess {access}")?;
        writeln!(out, "    next")?;
    }
    writeln!(out, "end")?;

    writeln!(out, "config router static")?;
    writeln!(out, "    edit 1")?;
    writeln!(out, "        set gateway {}", a.wan_gw)?;
    writeln!(out, "        set device \"port1\"")?;
    writeln!(out, "    next")?;
    for (seq, dst) in a.spoke_routes.iter().enumerate() {
        writeln!(out, "    edit {}", seq + 2)?;
        writeln!(out, "        set dst {dst}")?;
        writeln!(out, "        set gateway {}", a.lan_gw)?;
        writeln!(out, "        set device \"port2\"")?;
        writeln!(out, "    next")?;
    }
    writeln!(out, "end")?;

    writeln!(out, "config firewall address")?;
    writeln!(out, "    edit \"{}\"", spoke.vnet_name)?;
    writeln!(out, "        set subnet {}", a.workload_subnet)?;
    writeln!(out, "    next")?;
    writeln!(out, "end")?;

    writeln!(out, "config firewall policy")?;
    writeln!(out, "    edit 1")?;
    writeln!(out, "        set name \"spoke-to-internet\"")?;
    writeln!(out, "        set srcintf \"port2\"")?;
    writeln!(out, "        set dstintf \"port1\"")?;
    writeln!(out, "        set srcaddr \"{}\"", spoke.vnet_name)?;
    writeln!(out, "        set dstaddr \"all\"")?;
    writeln!(out, "        set action accept")?;
    writeln!(out, "        set schedule \"always\"")?;
    writeln!(out, "        set service \"ALL\"")?;
    writeln!(out, "        set nat enable")?;
    writeln!(out, "    next")?;
    writeln!(out, "end")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::SubnetFact;

    pub(crate) fn hub() -> HubOutput {
        HubOutput {
            resource_group: "rg-lab".to_string(),
            location: "eastus".to_string(),
            vnet_name: "vnet-hub".to_string(),
            vnet_id: "/subscriptions/x/resourceGroups/rg-lab/providers/Microsoft.Network/virtualNetworks/vnet-hub".to_string(),
            address_prefixes: vec!["10.100.0.0/16".to_string()],
            wan_subnet: SubnetFact {
                name: "snet-fgt-wan".to_string(),
                prefix: "10.100.0.0/24".to_string(),
            },
            lan_subnet: SubnetFact {
                name: "snet-fgt-lan".to_string(),
                prefix: "10.100.2.0/24".to_string(),
            },
            public_ip_name: "pip-fgt".to_string(),
            public_ip_address: Some("203.0.113.1".to_string()),
            fgt_vm_name: "vm-fgt".to_string(),
            fgt_wan_nic: "nic-fgt-wan".to_string(),
            fgt_lan_nic: "nic-fgt-lan".to_string(),
            fgt_wan_ip: "10.100.0.4".to_string(),
            fgt_lan_ip: "10.100.2.4".to_string(),
        }
    }

    pub(crate) fn spoke() -> SpokeOutput {
        SpokeOutput {
            vnet_name: "vnet-spoke".to_string(),
            vnet_id: "/subscriptions/x/resourceGroups/rg-lab/providers/Microsoft.Network/virtualNetworks/vnet-spoke".to_string(),
            address_prefixes: vec!["10.101.0.0/16".to_string()],
            workload_subnet: SubnetFact {
                name: "snet-workload".to_string(),
                prefix: "10.101.1.0/24".to_string(),
            },
            route_table_name: "rt-spoke".to_string(),
            default_route_next_hop: "10.100.2.4".to_string(),
            workload_vm_name: "vm-workload".to_string(),
            workload_nic: "nic-workload".to_string(),
            workload_ip: "10.101.1.4".to_string(),
            hub_to_spoke_peering: "hub-to-spoke".to_string(),
            spoke_to_hub_peering: "spoke-to-hub".to_string(),
        }
    }

    #[test]
    fn test_interfaces_and_routes() {
        let text = render(&hub(), &spoke()).unwrap();
        assert!(text.contains("set ip 10.100.0.4 255.255.255.0"));
        assert!(text.contains("set ip 10.100.2.4 255.255.255.0"));
        assert!(text.contains("set gateway 10.100.0.1"));
        assert!(text.contains("set dst 10.101.0.0 255.255.0.0"));
        assert!(text.contains("set gateway 10.100.2.1"));
        assert!(text.contains("set subnet 10.101.1.0 255.255.255.0"));
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render(&hub(), &spoke()).unwrap(), render(&hub(), &spoke()).unwrap());
    }

    struct Rejecting;

    impl Write for Rejecting {
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_write_errors_propagate() {
        let addressing = Addressing {
            wan_ip: "10.100.0.4 255.255.255.0".to_string(),
            lan_ip: "10.100.2.4 255.255.255.0".to_string(),
            wan_gw: "10.100.0.1".to_string(),
            lan_gw: "10.100.2.1".to_string(),
            spoke_routes: vec!["10.101.0.0 255.255.0.0".to_string()],
            workload_subnet: "10.101.1.0 255.255.255.0".to_string(),
        };
        assert!(write_config(&mut Rejecting, &hub(), &spoke(), &addressing).is_err());
    }

    #[test]
    fn test_bad_prefix_is_error() {
        let mut hub = hub();
        hub.lan_subnet.prefix = "10.100.2.0".to_string();
        assert!(render(&hub, &spoke()).is_err());
    }
}
