//! Desired and live shapes of every managed resource kind.
//!
//! Desired types (`*Spec`) carry what the pipeline wants; live types
//! (`*Live`) carry only the fields the reconciler inspects, as returned by a
//! `describe` projection.

use crate::azure::{name_from_id, Params, ResourceId, ResourceKind};
use crate::error::{ConvergeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// How to treat a live resource whose attributes differ from the desired ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatchPolicy {
    /// Mismatch is a conflict; the run stops.
    #[default]
    Exact,
    /// Keep the live value, warn, and carry it downstream.
    AdoptExisting,
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::Exact => f.write_str("Exact"),
            MatchPolicy::AdoptExisting => f.write_str("AdoptExisting"),
        }
    }
}

/// First attribute found to differ between desired and live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub attribute: &'static str,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    pub fn new(attribute: &'static str, expected: impl fmt::Display, actual: impl fmt::Display) -> Mismatch {
        Mismatch {
            attribute,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// A resource kind the reconciler can converge.
pub trait Resource {
    const KIND: ResourceKind;
    type Live: DeserializeOwned + Clone + fmt::Debug;

    fn id(&self) -> ResourceId;

    fn create_params(&self) -> Result<Params>;

    fn update_params(&self) -> Result<Params> {
        self.create_params()
    }

    /// `None` when the live resource already satisfies this spec.
    fn diff(&self, live: &Self::Live) -> Option<Mismatch>;
}

/// A resource plus the policy that decides what a mismatch means.
#[derive(Debug, Clone)]
pub struct DesiredResource<R> {
    pub resource: R,
    pub policy: MatchPolicy,
}

impl<R: Resource> DesiredResource<R> {
    pub fn new(resource: R, policy: MatchPolicy) -> DesiredResource<R> {
        DesiredResource { resource, policy }
    }

    pub fn exact(resource: R) -> DesiredResource<R> {
        DesiredResource::new(resource, MatchPolicy::Exact)
    }

    pub fn kind(&self) -> ResourceKind {
        R::KIND
    }

    pub fn identity(&self) -> ResourceId {
        self.resource.id()
    }
}

fn object(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<none>")
}

fn same_name(expected: &str, actual: Option<&str>) -> bool {
    actual.is_some_and(|a| name_from_id(a).eq_ignore_ascii_case(name_from_id(expected)))
}

fn normalised(prefixes: &[String]) -> Vec<String> {
    let mut v: Vec<String> = prefixes.iter().map(|p| p.trim().to_string()).collect();
    v.sort();
    v.dedup();
    v
}

// ---------------------------------------------------------------------------
// Virtual network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VnetSpec {
    pub name: String,
    pub location: String,
    pub address_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnetLive {
    pub name: String,
    pub id: Option<String>,
    #[serde(default)]
    pub address_prefixes: Vec<String>,
    pub provisioning_state: Option<String>,
}

impl Resource for VnetSpec {
    const KIND: ResourceKind = ResourceKind::VirtualNetwork;
    type Live = VnetLive;

    fn id(&self) -> ResourceId {
        ResourceId::top(&self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({
            "location": self.location,
            "addressPrefixes": self.address_prefixes,
        })))
    }

    fn diff(&self, live: &VnetLive) -> Option<Mismatch> {
        let expected = normalised(&self.address_prefixes);
        let actual = normalised(&live.address_prefixes);
        (expected != actual).then(|| {
            Mismatch::new("address prefixes", expected.join(","), actual.join(","))
        })
    }
}

// ---------------------------------------------------------------------------
// Subnet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SubnetSpec {
    pub vnet: String,
    pub name: String,
    pub address_prefix: String,
    pub route_table: Option<String>,
    pub network_security_group: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetLive {
    pub name: String,
    pub id: Option<String>,
    pub address_prefix: Option<String>,
    pub address_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub ip_configuration_count: u32,
    pub route_table: Option<String>,
    pub network_security_group: Option<String>,
}

impl SubnetLive {
    /// Every prefix of the subnet, whichever of the two fields carries them.
    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.address_prefix.iter().cloned().collect();
        prefixes.extend(self.address_prefixes.iter().flatten().cloned());
        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        prefixes.dedup();
        prefixes
    }

    /// First prefix, the one addressing decisions are made against.
    pub fn primary_prefix(&self) -> Option<String> {
        self.prefixes().into_iter().next()
    }

    /// True when network interfaces are attached.
    pub fn in_use(&self) -> bool {
        self.ip_configuration_count > 0
    }
}

impl Resource for SubnetSpec {
    const KIND: ResourceKind = ResourceKind::Subnet;
    type Live = SubnetLive;

    fn id(&self) -> ResourceId {
        ResourceId::child(&self.vnet, &self.name)
    }

    fn create_params(&self) -> Result<Params> {
        let mut params = object(json!({ "addressPrefix": self.address_prefix }));
        if let Some(rt) = &self.route_table {
            params.insert("routeTable".to_string(), json!(rt));
        }
        if let Some(nsg) = &self.network_security_group {
            params.insert("networkSecurityGroup".to_string(), json!(nsg));
        }
        Ok(params)
    }

    fn diff(&self, live: &SubnetLive) -> Option<Mismatch> {
        let prefixes = live.prefixes();
        if prefixes.iter().any(|p| p == self.address_prefix.trim()) {
            None
        } else {
            Some(Mismatch::new(
                "address prefix",
                &self.address_prefix,
                prefixes.join(","),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Public IP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublicIpSpec {
    pub name: String,
    pub location: String,
    pub sku: String,
    pub allocation_method: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpLive {
    pub name: String,
    pub id: Option<String>,
    pub ip_address: Option<String>,
    pub sku: Option<String>,
    pub allocation_method: Option<String>,
}

impl Resource for PublicIpSpec {
    const KIND: ResourceKind = ResourceKind::PublicIp;
    type Live = PublicIpLive;

    fn id(&self) -> ResourceId {
        ResourceId::top(&self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({
            "location": self.location,
            "sku": self.sku,
            "allocationMethod": self.allocation_method,
        })))
    }

    fn diff(&self, live: &PublicIpLive) -> Option<Mismatch> {
        match &live.sku {
            Some(sku) if sku.eq_ignore_ascii_case(&self.sku) => None,
            other => Some(Mismatch::new("sku", &self.sku, opt(other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Network security group and rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NsgSpec {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NsgLive {
    pub name: String,
    pub id: Option<String>,
}

impl Resource for NsgSpec {
    const KIND: ResourceKind = ResourceKind::NetworkSecurityGroup;
    type Live = NsgLive;

    fn id(&self) -> ResourceId {
        ResourceId::top(&self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({ "location": self.location })))
    }

    fn diff(&self, _live: &NsgLive) -> Option<Mismatch> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct SecurityRuleSpec {
    pub nsg: String,
    pub name: String,
    pub priority: u32,
    pub direction: String,
    pub access: String,
    pub protocol: String,
    pub source_address_prefix: String,
    pub destination_port_range: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleLive {
    pub name: String,
    pub priority: Option<u32>,
    pub direction: Option<String>,
    pub access: Option<String>,
    pub protocol: Option<String>,
    pub source_address_prefix: Option<String>,
    pub destination_port_range: Option<String>,
}

impl Resource for SecurityRuleSpec {
    const KIND: ResourceKind = ResourceKind::SecurityRule;
    type Live = SecurityRuleLive;

    fn id(&self) -> ResourceId {
        ResourceId::child(&self.nsg, &self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({
            "priority": self.priority,
            "direction": self.direction,
            "access": self.access,
            "protocol": self.protocol,
            "sourceAddressPrefix": self.source_address_prefix,
            "destinationPortRange": self.destination_port_range,
        })))
    }

    fn diff(&self, live: &SecurityRuleLive) -> Option<Mismatch> {
        if live.priority != Some(self.priority) {
            let actual = live.priority.map(|p| p.to_string());
            return Some(Mismatch::new("priority", self.priority, opt(&actual)));
        }
        let fields = [
            ("direction", &self.direction, &live.direction),
            ("access", &self.access, &live.access),
            ("protocol", &self.protocol, &live.protocol),
            ("source address prefix", &self.source_address_prefix, &live.source_address_prefix),
            ("destination port range", &self.destination_port_range, &live.destination_port_range),
        ];
        fields.into_iter().find_map(|(attribute, want, have)| match have {
            Some(h) if h.eq_ignore_ascii_case(want) => None,
            _ => Some(Mismatch::new(attribute, want, opt(have))),
        })
    }
}

// ---------------------------------------------------------------------------
// Network interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NicSpec {
    pub name: String,
    pub location: String,
    pub vnet: String,
    pub subnet: String,
    pub private_ip_address: String,
    pub ip_forwarding: bool,
    pub network_security_group: Option<String>,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicLive {
    pub name: String,
    pub id: Option<String>,
    /// Subnet ID of the primary IP configuration.
    pub subnet: Option<String>,
    pub private_ip_address: Option<String>,
    pub enable_ip_forwarding: Option<bool>,
    pub network_security_group: Option<String>,
    pub public_ip: Option<String>,
}

impl NicLive {
    pub fn subnet_name(&self) -> Option<&str> {
        self.subnet.as_deref().map(name_from_id)
    }
}

impl Resource for NicSpec {
    const KIND: ResourceKind = ResourceKind::NetworkInterface;
    type Live = NicLive;

    fn id(&self) -> ResourceId {
        ResourceId::top(&self.name)
    }

    fn create_params(&self) -> Result<Params> {
        let mut params = object(json!({
            "location": self.location,
            "vnetName": self.vnet,
            "subnet": self.subnet,
            "privateIpAddress": self.private_ip_address,
            "enableIpForwarding": self.ip_forwarding,
        }));
        if let Some(nsg) = &self.network_security_group {
            params.insert("networkSecurityGroup".to_string(), json!(nsg));
        }
        if let Some(pip) = &self.public_ip {
            params.insert("publicIp".to_string(), json!(pip));
        }
        Ok(params)
    }

    fn diff(&self, live: &NicLive) -> Option<Mismatch> {
        if !same_name(&self.subnet, live.subnet.as_deref()) {
            return Some(Mismatch::new("subnet", &self.subnet, live.subnet_name().unwrap_or("<none>")));
        }
        if live.private_ip_address.as_deref() != Some(self.private_ip_address.as_str()) {
            return Some(Mismatch::new(
                "private IP address",
                &self.private_ip_address,
                opt(&live.private_ip_address),
            ));
        }
        if live.enable_ip_forwarding.unwrap_or(false) != self.ip_forwarding {
            return Some(Mismatch::new(
                "IP forwarding",
                self.ip_forwarding,
                live.enable_ip_forwarding.unwrap_or(false),
            ));
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Virtual machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub location: String,
    pub image: String,
    pub size: String,
    pub nics: Vec<String>,
    pub admin_username: String,
    /// Only needed when the VM has to be created.
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmLive {
    pub name: String,
    pub id: Option<String>,
    pub size: Option<String>,
    pub provisioning_state: Option<String>,
}

impl Resource for VmSpec {
    const KIND: ResourceKind = ResourceKind::VirtualMachine;
    type Live = VmLive;

    fn id(&self) -> ResourceId {
        ResourceId::top(&self.name)
    }

    fn create_params(&self) -> Result<Params> {
        let password = self.admin_password.as_deref().ok_or_else(|| {
            ConvergeError::validation(&self.name, "admin password is required to create the VM")
        })?;
        Ok(object(json!({
            "location": self.location,
            "image": self.image,
            "size": self.size,
            "nics": self.nics,
            "adminUsername": self.admin_username,
            "adminPassword": password,
            "authenticationType": "password",
        })))
    }

    fn update_params(&self) -> Result<Params> {
        Ok(object(json!({ "size": self.size })))
    }

    fn diff(&self, live: &VmLive) -> Option<Mismatch> {
        match &live.size {
            Some(size) if size.eq_ignore_ascii_case(&self.size) => None,
            other => Some(Mismatch::new("size", &self.size, opt(other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Route table and routes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RouteTableSpec {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTableLive {
    pub name: String,
    pub id: Option<String>,
}

impl Resource for RouteTableSpec {
    const KIND: ResourceKind = ResourceKind::RouteTable;
    type Live = RouteTableLive;

    fn id(&self) -> ResourceId {
        ResourceId::top(&self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({ "location": self.location })))
    }

    fn diff(&self, _live: &RouteTableLive) -> Option<Mismatch> {
        None
    }
}

pub const NEXT_HOP_VIRTUAL_APPLIANCE: &str = "VirtualAppliance";

#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub route_table: String,
    pub name: String,
    pub address_prefix: String,
    pub next_hop_type: String,
    pub next_hop_ip_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteLive {
    pub name: String,
    pub address_prefix: Option<String>,
    pub next_hop_type: Option<String>,
    pub next_hop_ip_address: Option<String>,
}

impl Resource for RouteSpec {
    const KIND: ResourceKind = ResourceKind::Route;
    type Live = RouteLive;

    fn id(&self) -> ResourceId {
        ResourceId::child(&self.route_table, &self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({
            "addressPrefix": self.address_prefix,
            "nextHopType": self.next_hop_type,
            "nextHopIpAddress": self.next_hop_ip_address,
        })))
    }

    fn diff(&self, live: &RouteLive) -> Option<Mismatch> {
        if live.address_prefix.as_deref() != Some(self.address_prefix.as_str()) {
            return Some(Mismatch::new("address prefix", &self.address_prefix, opt(&live.address_prefix)));
        }
        if !live
            .next_hop_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(&self.next_hop_type))
        {
            return Some(Mismatch::new("next hop type", &self.next_hop_type, opt(&live.next_hop_type)));
        }
        if live.next_hop_ip_address.as_deref() != Some(self.next_hop_ip_address.as_str()) {
            return Some(Mismatch::new(
                "next hop IP address",
                &self.next_hop_ip_address,
                opt(&live.next_hop_ip_address),
            ));
        }
        None
    }
}

// ---------------------------------------------------------------------------
// VNet peering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PeeringSpec {
    pub vnet: String,
    pub name: String,
    pub remote_vnet_id: String,
    pub allow_vnet_access: bool,
    pub allow_forwarded_traffic: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeeringLive {
    pub name: String,
    pub remote_vnet: Option<String>,
    pub peering_state: Option<String>,
    pub allow_forwarded_traffic: Option<bool>,
}

impl Resource for PeeringSpec {
    const KIND: ResourceKind = ResourceKind::VnetPeering;
    type Live = PeeringLive;

    fn id(&self) -> ResourceId {
        ResourceId::child(&self.vnet, &self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({
            "remoteVnet": self.remote_vnet_id,
            "allowVnetAccess": self.allow_vnet_access,
            "allowForwardedTraffic": self.allow_forwarded_traffic,
        })))
    }

    fn diff(&self, live: &PeeringLive) -> Option<Mismatch> {
        if !same_name(&self.remote_vnet_id, live.remote_vnet.as_deref()) {
            return Some(Mismatch::new("remote vnet", &self.remote_vnet_id, opt(&live.remote_vnet)));
        }
        if live.allow_forwarded_traffic.unwrap_or(false) != self.allow_forwarded_traffic {
            return Some(Mismatch::new(
                "allow forwarded traffic",
                self.allow_forwarded_traffic,
                live.allow_forwarded_traffic.unwrap_or(false),
            ));
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Private DNS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DnsZoneSpec {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsZoneLive {
    pub name: String,
    pub id: Option<String>,
}

impl Resource for DnsZoneSpec {
    const KIND: ResourceKind = ResourceKind::PrivateDnsZone;
    type Live = DnsZoneLive;

    fn id(&self) -> ResourceId {
        ResourceId::top(&self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(Params::new())
    }

    fn diff(&self, _live: &DnsZoneLive) -> Option<Mismatch> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct DnsLinkSpec {
    pub zone: String,
    pub name: String,
    pub vnet_id: String,
    pub registration_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsLinkLive {
    pub name: String,
    pub virtual_network: Option<String>,
    pub registration_enabled: Option<bool>,
}

impl Resource for DnsLinkSpec {
    const KIND: ResourceKind = ResourceKind::PrivateDnsLink;
    type Live = DnsLinkLive;

    fn id(&self) -> ResourceId {
        ResourceId::child(&self.zone, &self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({
            "virtualNetwork": self.vnet_id,
            "registrationEnabled": self.registration_enabled,
        })))
    }

    fn diff(&self, live: &DnsLinkLive) -> Option<Mismatch> {
        if same_name(&self.vnet_id, live.virtual_network.as_deref()) {
            None
        } else {
            Some(Mismatch::new("virtual network", &self.vnet_id, opt(&live.virtual_network)))
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsARecordSpec {
    pub zone: String,
    pub name: String,
    pub ipv4_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsARecordLive {
    pub name: String,
    #[serde(default)]
    pub ipv4_addresses: Vec<String>,
}

impl Resource for DnsARecordSpec {
    const KIND: ResourceKind = ResourceKind::DnsARecord;
    type Live = DnsARecordLive;

    fn id(&self) -> ResourceId {
        ResourceId::child(&self.zone, &self.name)
    }

    fn create_params(&self) -> Result<Params> {
        Ok(object(json!({ "ipv4Address": self.ipv4_address })))
    }

    /// Replaces the whole record list, extra addresses included.
    fn update_params(&self) -> Result<Params> {
        Ok(object(json!({ "aRecords": [{ "ipv4Address": self.ipv4_address }] })))
    }

    fn diff(&self, live: &DnsARecordLive) -> Option<Mismatch> {
        if live.ipv4_addresses == [self.ipv4_address.clone()] {
            None
        } else {
            Some(Mismatch::new("A records", &self.ipv4_address, live.ipv4_addresses.join(",")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet_live(prefix: Option<&str>, prefixes: Option<Vec<&str>>) -> SubnetLive {
        SubnetLive {
            name: "lan".to_string(),
            id: None,
            address_prefix: prefix.map(str::to_string),
            address_prefixes: prefixes.map(|v| v.into_iter().map(str::to_string).collect()),
            ip_configuration_count: 0,
            route_table: None,
            network_security_group: None,
        }
    }

    #[test]
    fn test_subnet_prefixes_from_either_field() {
        assert_eq!(subnet_live(Some("10.0.1.0/24"), None).prefixes(), vec!["10.0.1.0/24"]);
        assert_eq!(
            subnet_live(None, Some(vec!["10.0.1.0/24", "10.0.9.0/24"])).prefixes(),
            vec!["10.0.1.0/24", "10.0.9.0/24"]
        );
        assert!(subnet_live(None, None).prefixes().is_empty());
        assert_eq!(subnet_live(None, None).primary_prefix(), None);
    }

    #[test]
    fn test_subnet_live_tolerates_missing_fields() {
        let live: SubnetLive = serde_json::from_str(r#"{"name":"wan","addressPrefix":"10.0.0.0/24"}"#).unwrap();
        assert_eq!(live.ip_configuration_count, 0);
        assert!(!live.in_use());
        assert_eq!(live.primary_prefix().as_deref(), Some("10.0.0.0/24"));
    }

    #[test]
    fn test_vnet_diff_ignores_order() {
        let spec = VnetSpec {
            name: "hub".to_string(),
            location: "eastus".to_string(),
            address_prefixes: vec!["10.100.0.0/16".to_string(), "10.99.0.0/16".to_string()],
        };
        let live: VnetLive = serde_json::from_value(json!({
            "name": "hub",
            "addressPrefixes": ["10.99.0.0/16", "10.100.0.0/16"]
        }))
        .unwrap();
        assert_eq!(spec.diff(&live), None);

        let live: VnetLive = serde_json::from_value(json!({
            "name": "hub",
            "addressPrefixes": ["10.200.0.0/16"]
        }))
        .unwrap();
        let m = spec.diff(&live).unwrap();
        assert_eq!(m.attribute, "address prefixes");
        assert_eq!(m.actual, "10.200.0.0/16");
    }

    #[test]
    fn test_nic_diff_compares_subnet_by_name() {
        let spec = NicSpec {
            name: "nic-lan".to_string(),
            location: "eastus".to_string(),
            vnet: "hub".to_string(),
            subnet: "snet-lan".to_string(),
            private_ip_address: "10.100.2.4".to_string(),
            ip_forwarding: true,
            network_security_group: None,
            public_ip: None,
        };
        let live: NicLive = serde_json::from_value(json!({
            "name": "nic-lan",
            "subnet": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/hub/subnets/snet-lan",
            "privateIpAddress": "10.100.2.4",
            "enableIpForwarding": true
        }))
        .unwrap();
        assert_eq!(spec.diff(&live), None);

        let live: NicLive = serde_json::from_value(json!({
            "name": "nic-lan",
            "subnet": "snet-lan",
            "privateIpAddress": "10.100.1.4",
            "enableIpForwarding": true
        }))
        .unwrap();
        assert_eq!(spec.diff(&live).unwrap().attribute, "private IP address");
    }

    #[test]
    fn test_vm_requires_password_only_for_create() {
        let spec = VmSpec {
            name: "vm".to_string(),
            location: "eastus".to_string(),
            image: "Ubuntu2204".to_string(),
            size: "Standard_B1s".to_string(),
            nics: vec!["nic".to_string()],
            admin_username: "azureuser".to_string(),
            admin_password: None,
        };
        assert!(matches!(spec.create_params(), Err(ConvergeError::Validation { .. })));
        assert!(spec.update_params().is_ok());
    }

    #[test]
    fn test_rule_diff_is_case_insensitive() {
        let spec = SecurityRuleSpec {
            nsg: "nsg".to_string(),
            name: "allow-https".to_string(),
            priority: 100,
            direction: "Inbound".to_string(),
            access: "Allow".to_string(),
            protocol: "Tcp".to_string(),
            source_address_prefix: "203.0.113.0/24".to_string(),
            destination_port_range: "443".to_string(),
        };
        let live: SecurityRuleLive = serde_json::from_value(json!({
            "name": "allow-https",
            "priority": 100,
            "direction": "inbound",
            "access": "allow",
            "protocol": "TCP",
            "sourceAddressPrefix": "203.0.113.0/24",
            "destinationPortRange": "443"
        }))
        .unwrap();
        assert_eq!(spec.diff(&live), None);

        let live: SecurityRuleLive = serde_json::from_value(json!({
            "name": "allow-https",
            "priority": 100,
            "direction": "Inbound",
            "access": "Allow",
            "protocol": "Tcp",
            "sourceAddressPrefix": "0.0.0.0/0",
            "destinationPortRange": "443"
        }))
        .unwrap();
        assert_eq!(spec.diff(&live).unwrap().attribute, "source address prefix");
    }
}
