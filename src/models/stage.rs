//! Facts each pipeline stage hands to the next one.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Hub,
    Spoke,
    Dns,
}

impl StageName {
    pub const ALL: [StageName; 3] = [StageName::Hub, StageName::Spoke, StageName::Dns];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Hub => "hub",
            StageName::Spoke => "spoke",
            StageName::Dns => "dns",
        }
    }

    pub fn parse(s: &str) -> Option<StageName> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetFact {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubOutput {
    pub resource_group: String,
    pub location: String,
    pub vnet_name: String,
    pub vnet_id: String,
    pub address_prefixes: Vec<String>,
    pub wan_subnet: SubnetFact,
    pub lan_subnet: SubnetFact,
    pub public_ip_name: String,
    pub public_ip_address: Option<String>,
    pub fgt_vm_name: String,
    pub fgt_wan_nic: String,
    pub fgt_lan_nic: String,
    pub fgt_wan_ip: String,
    /// Next hop for every spoke route.
    pub fgt_lan_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpokeOutput {
    pub vnet_name: String,
    pub vnet_id: String,
    pub address_prefixes: Vec<String>,
    pub workload_subnet: SubnetFact,
    pub route_table_name: String,
    pub default_route_next_hop: String,
    pub workload_vm_name: String,
    pub workload_nic: String,
    pub workload_ip: String,
    pub hub_to_spoke_peering: String,
    pub spoke_to_hub_peering: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordFact {
    pub fqdn: String,
    pub ipv4_address: String,
}

/// Result of one best-effort validation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsOutput {
    pub zone_name: String,
    pub linked_vnets: Vec<String>,
    pub records: Vec<DnsRecordFact>,
    pub checks: Vec<CheckResult>,
    /// Where the generated appliance configuration was written.
    pub device_config_path: String,
}
