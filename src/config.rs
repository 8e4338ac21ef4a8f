//! Lab configuration.
//!
//! One JSON document describes the whole topology. It is read once, patched
//! from the environment, validated and then passed by reference into every
//! stage.

use crate::error::{ConvergeError, Result};
use crate::models::{address_at_offset, overlaps, parse_cidr, parse_ipv4, range_within, MatchPolicy};
use crate::processing::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Azure keeps the first four addresses of every subnet for itself.
pub const FIRST_USABLE_OFFSET: u32 = 4;

static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static ZONE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_name_regex() -> &'static Regex {
    NAME_REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,79}$").expect("Invalid Regex"))
}

fn get_zone_regex() -> &'static Regex {
    ZONE_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)+$")
            .expect("Invalid Regex")
    })
}

fn default_password_env() -> String {
    "LAB_ADMIN_PASSWORD".to_string()
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_max_third_octet() -> u8 {
    254
}
fn default_host_offset() -> u32 {
    FIRST_USABLE_OFFSET
}
fn default_public_ip_sku() -> String {
    "Standard".to_string()
}
fn default_route_name() -> String {
    "default-via-fgt".to_string()
}
fn default_hub_to_spoke() -> String {
    "hub-to-spoke".to_string()
}
fn default_spoke_to_hub() -> String {
    "spoke-to-hub".to_string()
}
fn default_hub_link() -> String {
    "link-hub".to_string()
}
fn default_spoke_link() -> String {
    "link-spoke".to_string()
}
fn default_fgt_record() -> String {
    "fgt".to_string()
}
fn default_workload_record() -> String {
    "workload".to_string()
}
fn default_device_config_file() -> String {
    "fgt-config.txt".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub vnet_name: String,
    pub address_space: Vec<String>,
    pub wan_subnet_name: String,
    pub wan_subnet_prefix: String,
    pub lan_subnet_name: String,
    pub lan_subnet_prefix: String,
    /// Last third octet the WAN/LAN /24 search may reach.
    #[serde(default = "default_max_third_octet")]
    pub subnet_search_max_third_octet: u8,
    pub wan_nsg_name: String,
    pub lan_nsg_name: String,
    pub wan_nic_name: String,
    pub lan_nic_name: String,
    pub public_ip_name: String,
    #[serde(default = "default_public_ip_sku")]
    pub public_ip_sku: String,
    pub fgt_vm_name: String,
    pub fgt_image: String,
    pub fgt_vm_size: String,
    #[serde(default = "default_host_offset")]
    pub wan_host_offset: u32,
    #[serde(default = "default_host_offset")]
    pub lan_host_offset: u32,
    /// Pinned appliance LAN address. Ignored when it does not fall inside
    /// the LAN subnet actually in use.
    #[serde(default)]
    pub fgt_lan_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpokeConfig {
    pub vnet_name: String,
    pub address_space: Vec<String>,
    pub subnet_name: String,
    pub subnet_prefix: String,
    /// Last third octet the workload /24 search may reach.
    #[serde(default = "default_max_third_octet")]
    pub subnet_search_max_third_octet: u8,
    pub route_table_name: String,
    #[serde(default = "default_route_name")]
    pub default_route_name: String,
    pub nic_name: String,
    pub vm_name: String,
    pub vm_image: String,
    pub vm_size: String,
    #[serde(default = "default_host_offset")]
    pub workload_host_offset: u32,
    #[serde(default = "default_hub_to_spoke")]
    pub hub_to_spoke_peering: String,
    #[serde(default = "default_spoke_to_hub")]
    pub spoke_to_hub_peering: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    pub zone_name: String,
    #[serde(default = "default_hub_link")]
    pub hub_link_name: String,
    #[serde(default = "default_spoke_link")]
    pub spoke_link_name: String,
    #[serde(default = "default_fgt_record")]
    pub fgt_record_name: String,
    #[serde(default = "default_workload_record")]
    pub workload_record_name: String,
    /// File name (inside `state_dir`) of the generated appliance config.
    #[serde(default = "default_device_config_file")]
    pub device_config_file: String,
}

/// What a mismatch means, per resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicies {
    pub vnet_address_space: MatchPolicy,
    pub subnet_prefix: MatchPolicy,
    pub nic_addressing: MatchPolicy,
    pub vm_size: MatchPolicy,
    pub public_ip: MatchPolicy,
    pub peering: MatchPolicy,
    pub dns_link: MatchPolicy,
}

impl Default for MatchPolicies {
    fn default() -> Self {
        MatchPolicies {
            vnet_address_space: MatchPolicy::Exact,
            subnet_prefix: MatchPolicy::AdoptExisting,
            nic_addressing: MatchPolicy::AdoptExisting,
            vm_size: MatchPolicy::AdoptExisting,
            public_ip: MatchPolicy::Exact,
            peering: MatchPolicy::Exact,
            dns_link: MatchPolicy::Exact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabConfig {
    pub location: String,
    pub resource_group: String,
    /// Source range allowed to reach the appliance management ports.
    pub allowed_mgmt_cidr: String,
    pub admin_username: String,
    /// Name of the environment variable holding the VM admin password.
    #[serde(default = "default_password_env")]
    pub admin_password_env: String,
    #[serde(skip)]
    pub admin_password: Option<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    pub hub: HubConfig,
    pub spoke: SpokeConfig,
    pub dns: DnsConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub match_policies: MatchPolicies,
}

impl LabConfig {
    /// Read, patch from the process environment, and validate.
    pub fn load(path: &Path) -> Result<LabConfig> {
        log::info!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let mut config = LabConfig::from_json_str(&text)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<LabConfig> {
        let de = &mut serde_json::Deserializer::from_str(text);
        serde_path_to_error::deserialize(de).map_err(|e| {
            ConvergeError::validation(e.path().to_string(), format!("bad configuration: {}", e.inner()))
        })
    }

    /// Apply `LAB_*` overrides and resolve the admin password.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 3] = [
            ("LAB_LOCATION", &mut self.location),
            ("LAB_RESOURCE_GROUP", &mut self.resource_group),
            ("LAB_ALLOWED_MGMT_CIDR", &mut self.allowed_mgmt_cidr),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                log::debug!("{key} overrides configured value '{field}'");
                *field = value.trim().to_string();
            }
        }
        if let Some(dir) = lookup("LAB_STATE_DIR").filter(|v| !v.trim().is_empty()) {
            self.state_dir = PathBuf::from(dir.trim());
        }
        self.admin_password = lookup(&self.admin_password_env).filter(|v| !v.is_empty());
        if self.admin_password.is_none() {
            log::warn!(
                "{} is not set; VMs that do not exist yet cannot be created",
                self.admin_password_env
            );
        }
    }

    pub fn validate(&self) -> Result<()> {
        for name in [
            &self.resource_group,
            &self.hub.vnet_name,
            &self.hub.wan_subnet_name,
            &self.hub.lan_subnet_name,
            &self.hub.wan_nsg_name,
            &self.hub.lan_nsg_name,
            &self.hub.wan_nic_name,
            &self.hub.lan_nic_name,
            &self.hub.public_ip_name,
            &self.hub.fgt_vm_name,
            &self.spoke.vnet_name,
            &self.spoke.subnet_name,
            &self.spoke.route_table_name,
            &self.spoke.default_route_name,
            &self.spoke.nic_name,
            &self.spoke.vm_name,
            &self.spoke.hub_to_spoke_peering,
            &self.spoke.spoke_to_hub_peering,
            &self.dns.hub_link_name,
            &self.dns.spoke_link_name,
            &self.dns.fgt_record_name,
            &self.dns.workload_record_name,
        ] {
            check_name(name)?;
        }
        if !get_zone_regex().is_match(&self.dns.zone_name) {
            return Err(ConvergeError::validation(&self.dns.zone_name, "not a DNS zone name"));
        }
        if self.location.trim().is_empty() {
            return Err(ConvergeError::validation("location", "must not be empty"));
        }
        parse_cidr(&self.allowed_mgmt_cidr)?;

        check_subnet_in_space(&self.hub.wan_subnet_prefix, &self.hub.address_space)?;
        check_subnet_in_space(&self.hub.lan_subnet_prefix, &self.hub.address_space)?;
        check_subnet_in_space(&self.spoke.subnet_prefix, &self.spoke.address_space)?;
        if overlaps(&parse_cidr(&self.hub.wan_subnet_prefix)?, &parse_cidr(&self.hub.lan_subnet_prefix)?) {
            return Err(ConvergeError::validation(
                &self.hub.lan_subnet_prefix,
                format!("LAN subnet overlaps the WAN subnet {}", self.hub.wan_subnet_prefix),
            ));
        }

        for hub in &self.hub.address_space {
            let hub_range = parse_cidr(hub)?;
            for spoke in &self.spoke.address_space {
                if overlaps(&hub_range, &parse_cidr(spoke)?) {
                    return Err(ConvergeError::validation(
                        spoke,
                        format!("spoke address space overlaps hub {hub}; peering needs disjoint spaces"),
                    ));
                }
            }
        }

        check_offset(&self.hub.wan_subnet_prefix, self.hub.wan_host_offset)?;
        check_offset(&self.hub.lan_subnet_prefix, self.hub.lan_host_offset)?;
        check_offset(&self.spoke.subnet_prefix, self.spoke.workload_host_offset)?;
        if let Some(ip) = &self.hub.fgt_lan_ip {
            parse_ipv4(ip)?;
        }

        check_search_bound(&self.hub.wan_subnet_prefix, self.hub.subnet_search_max_third_octet)?;
        check_search_bound(&self.hub.lan_subnet_prefix, self.hub.subnet_search_max_third_octet)?;
        check_search_bound(&self.spoke.subnet_prefix, self.spoke.subnet_search_max_third_octet)?;

        self.retry.validate()
    }

    pub fn device_config_path(&self) -> PathBuf {
        self.state_dir.join(&self.dns.device_config_file)
    }
}

fn check_name(name: &str) -> Result<()> {
    if get_name_regex().is_match(name) {
        Ok(())
    } else {
        Err(ConvergeError::validation(name, "not a valid resource name"))
    }
}

fn check_subnet_in_space(prefix: &str, space: &[String]) -> Result<()> {
    if space.is_empty() {
        return Err(ConvergeError::validation(prefix, "vnet has no address space"));
    }
    let range = parse_cidr(prefix)?;
    for outer in space {
        if range_within(&range, &parse_cidr(outer)?) {
            return Ok(());
        }
    }
    Err(ConvergeError::validation(
        prefix,
        format!("outside the vnet address space [{}]", space.join(", ")),
    ))
}

/// The /24 search starts at `prefix`, so the bound may not sit below it.
fn check_search_bound(prefix: &str, max_third_octet: u8) -> Result<()> {
    let third = parse_cidr(prefix)?.network().octets()[2];
    if max_third_octet < third {
        return Err(ConvergeError::validation(
            max_third_octet.to_string(),
            format!("search bound is below the subnet {prefix}"),
        ));
    }
    Ok(())
}

fn check_offset(prefix: &str, offset: u32) -> Result<()> {
    if offset < FIRST_USABLE_OFFSET {
        return Err(ConvergeError::validation(
            format!("{prefix}+{offset}"),
            format!("host offsets below {FIRST_USABLE_OFFSET} are reserved"),
        ));
    }
    let range = parse_cidr(prefix)?;
    let ip = address_at_offset(prefix, offset)?;
    if ip == range.broadcast() {
        return Err(ConvergeError::validation(format!("{prefix}+{offset}"), "lands on the broadcast address"));
    }
    Ok(())
}
