//! Translation of [`Request`]s into `az` argument vectors.
//!
//! `show`/`list` use a `--query` projection so the JSON coming back carries
//! exactly the fields the live models deserialize, under the same names the
//! create parameters use.

use super::api::{Action, Request, ResourceKind};
use crate::error::{ConvergeError, Result};
use serde_json::Value;
use std::fmt;

/// How one parameter is rendered on the command line.
#[derive(Debug, Clone, Copy)]
enum Flag {
    /// `--flag value...`
    Arg(&'static str),
    /// `--set path=value` (generic update)
    Set(&'static str),
    /// `--set path=<json>`, replacing a whole list or object
    SetJson(&'static str),
}

struct KindCommands {
    group: &'static [&'static str],
    parent_flag: Option<&'static str>,
    projection: &'static str,
    create_flags: &'static [(&'static str, Flag)],
    update_flags: Option<&'static [(&'static str, Flag)]>,
}

const LOCATION: (&str, Flag) = ("location", Flag::Arg("--location"));

fn commands(kind: ResourceKind) -> KindCommands {
    match kind {
        ResourceKind::VirtualNetwork => KindCommands {
            group: &["network", "vnet"],
            parent_flag: None,
            projection: "{name:name, id:id, addressPrefixes:addressSpace.addressPrefixes, provisioningState:provisioningState}",
            create_flags: &[LOCATION, ("addressPrefixes", Flag::Arg("--address-prefixes"))],
            update_flags: Some(&[("addressPrefixes", Flag::Arg("--address-prefixes"))]),
        },
        ResourceKind::Subnet => KindCommands {
            group: &["network", "vnet", "subnet"],
            parent_flag: Some("--vnet-name"),
            projection: "{name:name, id:id, addressPrefix:addressPrefix, addressPrefixes:addressPrefixes, ipConfigurationCount:length(ipConfigurations || `[]`), routeTable:routeTable.id, networkSecurityGroup:networkSecurityGroup.id}",
            create_flags: &[
                ("addressPrefix", Flag::Arg("--address-prefixes")),
                ("routeTable", Flag::Arg("--route-table")),
                ("networkSecurityGroup", Flag::Arg("--network-security-group")),
            ],
            update_flags: None,
        },
        ResourceKind::PublicIp => KindCommands {
            group: &["network", "public-ip"],
            parent_flag: None,
            projection: "{name:name, id:id, ipAddress:ipAddress, sku:sku.name, allocationMethod:publicIPAllocationMethod}",
            create_flags: &[
                LOCATION,
                ("sku", Flag::Arg("--sku")),
                ("allocationMethod", Flag::Arg("--allocation-method")),
            ],
            update_flags: None,
        },
        ResourceKind::NetworkSecurityGroup => KindCommands {
            group: &["network", "nsg"],
            parent_flag: None,
            projection: "{name:name, id:id}",
            create_flags: &[LOCATION],
            update_flags: None,
        },
        ResourceKind::SecurityRule => KindCommands {
            group: &["network", "nsg", "rule"],
            parent_flag: Some("--nsg-name"),
            projection: "{name:name, priority:priority, direction:direction, access:access, protocol:protocol, sourceAddressPrefix:sourceAddressPrefix, destinationPortRange:destinationPortRange}",
            create_flags: &[
                ("priority", Flag::Arg("--priority")),
                ("direction", Flag::Arg("--direction")),
                ("access", Flag::Arg("--access")),
                ("protocol", Flag::Arg("--protocol")),
                ("sourceAddressPrefix", Flag::Arg("--source-address-prefixes")),
                ("destinationPortRange", Flag::Arg("--destination-port-ranges")),
            ],
            update_flags: None,
        },
        ResourceKind::NetworkInterface => KindCommands {
            group: &["network", "nic"],
            parent_flag: None,
            projection: "{name:name, id:id, subnet:ipConfigurations[0].subnet.id, privateIpAddress:ipConfigurations[0].privateIPAddress, enableIpForwarding:enableIPForwarding, networkSecurityGroup:networkSecurityGroup.id, publicIp:ipConfigurations[0].publicIPAddress.id}",
            create_flags: &[
                LOCATION,
                ("vnetName", Flag::Arg("--vnet-name")),
                ("subnet", Flag::Arg("--subnet")),
                ("privateIpAddress", Flag::Arg("--private-ip-address")),
                ("enableIpForwarding", Flag::Arg("--ip-forwarding")),
                ("networkSecurityGroup", Flag::Arg("--network-security-group")),
                ("publicIp", Flag::Arg("--public-ip-address")),
            ],
            update_flags: Some(&[
                ("enableIpForwarding", Flag::Arg("--ip-forwarding")),
                ("networkSecurityGroup", Flag::Arg("--network-security-group")),
            ]),
        },
        ResourceKind::VirtualMachine => KindCommands {
            group: &["vm"],
            parent_flag: None,
            projection: "{name:name, id:id, size:hardwareProfile.vmSize, provisioningState:provisioningState}",
            create_flags: &[
                LOCATION,
                ("image", Flag::Arg("--image")),
                ("size", Flag::Arg("--size")),
                ("nics", Flag::Arg("--nics")),
                ("adminUsername", Flag::Arg("--admin-username")),
                ("adminPassword", Flag::Arg("--admin-password")),
                ("authenticationType", Flag::Arg("--authentication-type")),
            ],
            update_flags: Some(&[("size", Flag::Set("hardwareProfile.vmSize"))]),
        },
        ResourceKind::RouteTable => KindCommands {
            group: &["network", "route-table"],
            parent_flag: None,
            projection: "{name:name, id:id}",
            create_flags: &[LOCATION],
            update_flags: None,
        },
        ResourceKind::Route => KindCommands {
            group: &["network", "route-table", "route"],
            parent_flag: Some("--route-table-name"),
            projection: "{name:name, addressPrefix:addressPrefix, nextHopType:nextHopType, nextHopIpAddress:nextHopIpAddress}",
            create_flags: &[
                ("addressPrefix", Flag::Arg("--address-prefix")),
                ("nextHopType", Flag::Arg("--next-hop-type")),
                ("nextHopIpAddress", Flag::Arg("--next-hop-ip-address")),
            ],
            update_flags: None,
        },
        ResourceKind::VnetPeering => KindCommands {
            group: &["network", "vnet", "peering"],
            parent_flag: Some("--vnet-name"),
            projection: "{name:name, remoteVnet:remoteVirtualNetwork.id, peeringState:peeringState, allowForwardedTraffic:allowForwardedTraffic}",
            create_flags: &[
                ("remoteVnet", Flag::Arg("--remote-vnet")),
                ("allowVnetAccess", Flag::Arg("--allow-vnet-access")),
                ("allowForwardedTraffic", Flag::Arg("--allow-forwarded-traffic")),
            ],
            update_flags: Some(&[
                ("remoteVnet", Flag::Set("remoteVirtualNetwork.id")),
                ("allowVnetAccess", Flag::Set("allowVirtualNetworkAccess")),
                ("allowForwardedTraffic", Flag::Set("allowForwardedTraffic")),
            ]),
        },
        ResourceKind::PrivateDnsZone => KindCommands {
            group: &["network", "private-dns", "zone"],
            parent_flag: None,
            projection: "{name:name, id:id}",
            create_flags: &[],
            update_flags: None,
        },
        ResourceKind::PrivateDnsLink => KindCommands {
            group: &["network", "private-dns", "link", "vnet"],
            parent_flag: Some("--zone-name"),
            projection: "{name:name, virtualNetwork:virtualNetwork.id, registrationEnabled:registrationEnabled}",
            create_flags: &[
                ("virtualNetwork", Flag::Arg("--virtual-network")),
                ("registrationEnabled", Flag::Arg("--registration-enabled")),
            ],
            update_flags: Some(&[("registrationEnabled", Flag::Arg("--registration-enabled"))]),
        },
        ResourceKind::DnsARecord => KindCommands {
            group: &["network", "private-dns", "record-set", "a"],
            parent_flag: Some("--zone-name"),
            projection: "{name:name, ipv4Addresses:aRecords[].ipv4Address}",
            create_flags: &[("ipv4Address", Flag::Arg("--ipv4-address"))],
            update_flags: Some(&[("aRecords", Flag::SetJson("aRecords"))]),
        },
    }
}

/// Parameters that must never show up in logs.
const SECRET_PARAMS: &[&str] = &["adminPassword"];

/// A ready-to-run `az` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzCommand {
    pub args: Vec<String>,
    /// Printable form with secrets masked.
    pub redacted: String,
}

impl fmt::Display for AzCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

fn value_args(key: &str, value: &Value) -> Result<Vec<String>> {
    let scalar = |v: &Value| -> Result<String> {
        match v {
            Value::String(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ConvergeError::validation(
                other.to_string(),
                format!("unsupported value for parameter '{key}'"),
            )),
        }
    };
    match value {
        Value::Array(items) => items.iter().map(scalar).collect(),
        v => Ok(vec![scalar(v)?]),
    }
}

/// Build the `az` arguments for `request` inside `resource_group`.
pub fn build(resource_group: &str, request: &Request) -> Result<AzCommand> {
    let spec = commands(request.kind);
    let verb = match (request.action, request.kind) {
        (Action::Describe, _) => "show",
        (Action::List, _) => "list",
        (Action::Create, ResourceKind::DnsARecord) => "add-record",
        (Action::Create, _) => "create",
        (Action::Update, _) => "update",
    };

    let mut args: Vec<String> = vec!["az".to_string()];
    args.extend(spec.group.iter().map(|s| s.to_string()));
    args.push(verb.to_string());
    args.extend(["-g".to_string(), resource_group.to_string()]);

    match (spec.parent_flag, &request.id.parent) {
        (Some(flag), Some(parent)) => args.extend([flag.to_string(), parent.clone()]),
        (Some(flag), None) => {
            return Err(ConvergeError::validation(
                request.to_string(),
                format!("{} needs a parent ({flag})", request.kind),
            ))
        }
        (None, _) => {}
    }
    if request.action != Action::List {
        args.extend(["-n".to_string(), request.id.name.clone()]);
    }

    let mut redacted = args.clone();
    match request.action {
        Action::Describe | Action::List => {
            let query = if request.action == Action::List {
                format!("[].{}", spec.projection)
            } else {
                spec.projection.to_string()
            };
            args.extend(["--query".to_string(), query.clone()]);
            redacted.extend(["--query".to_string(), format!("'{query}'")]);
        }
        Action::Create | Action::Update => {
            let flags = match request.action {
                Action::Update => spec.update_flags.unwrap_or(spec.create_flags),
                _ => spec.create_flags,
            };
            for (key, value) in &request.params {
                if value.is_null() {
                    continue;
                }
                let flag = flags
                    .iter()
                    .find(|(k, _)| *k == key.as_str())
                    .map(|(_, flag)| *flag)
                    .ok_or_else(|| {
                        ConvergeError::validation(
                            key.clone(),
                            format!("no az flag for parameter of {} {}", request.kind, request.action),
                        )
                    })?;
                if let Flag::SetJson(path) = flag {
                    let assignment = format!("{path}={value}");
                    args.extend(["--set".to_string(), assignment.clone()]);
                    redacted.extend(["--set".to_string(), format!("'{assignment}'")]);
                    continue;
                }
                let values = value_args(key, value)?;
                let secret = SECRET_PARAMS.contains(&key.as_str());
                match flag {
                    Flag::Arg(name) => {
                        args.push(name.to_string());
                        args.extend(values.iter().cloned());
                        redacted.push(name.to_string());
                        if secret {
                            redacted.push("***".to_string());
                        } else {
                            redacted.extend(values);
                        }
                    }
                    Flag::Set(path) => {
                        let assignment = format!("{path}={}", values.join(","));
                        args.extend(["--set".to_string(), assignment.clone()]);
                        redacted.extend(["--set".to_string(), assignment]);
                    }
                    Flag::SetJson(_) => {}
                }
            }
        }
    }
    args.extend(["--output".to_string(), "json".to_string()]);
    redacted.extend(["--output".to_string(), "json".to_string()]);

    Ok(AzCommand {
        args,
        redacted: redacted.join(" "),
    })
}
