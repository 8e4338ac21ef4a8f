//! DNS and validation stage.
//!
//! Private zone linked to both networks, A records for the appliance and the
//! workload, a handful of read-only checks, and the appliance config text.
//! Checks only ever warn.

use crate::azure::{Describe, RemoteApi, ResourceId, ResourceKind};
use crate::config::LabConfig;
use crate::error::Result;
use crate::models::resources::{DnsARecordSpec, DnsLinkSpec, DnsZoneSpec, PeeringLive, RouteLive, VmLive};
use crate::models::{CheckResult, DesiredResource, DnsOutput, DnsRecordFact, HubOutput, SpokeOutput};
use crate::output::{device_config, SnapshotStore};
use crate::processing::Reconciler;

const VM_READY: &str = "Succeeded";
const PEERING_READY: &str = "Connected";

pub fn run<A: RemoteApi>(
    rec: &mut Reconciler<A>,
    config: &LabConfig,
    store: &SnapshotStore,
    hub: &HubOutput,
    spoke: &SpokeOutput,
) -> Result<DnsOutput> {
    let dns = &config.dns;
    log::info!("#Start dns stage for zone '{}'", dns.zone_name);

    rec.ensure(&DesiredResource::exact(DnsZoneSpec {
        name: dns.zone_name.clone(),
    }))?;

    let mut linked_vnets = vec![];
    for (link, vnet_name, vnet_id) in [
        (&dns.hub_link_name, &hub.vnet_name, &hub.vnet_id),
        (&dns.spoke_link_name, &spoke.vnet_name, &spoke.vnet_id),
    ] {
        rec.ensure(&DesiredResource::new(
            DnsLinkSpec {
                zone: dns.zone_name.clone(),
                name: link.clone(),
                vnet_id: vnet_id.clone(),
                registration_enabled: false,
            },
            config.match_policies.dns_link,
        ))?;
        linked_vnets.push(vnet_name.clone());
    }

    let mut records = vec![];
    for (name, ip) in [
        (&dns.fgt_record_name, &hub.fgt_lan_ip),
        (&dns.workload_record_name, &spoke.workload_ip),
    ] {
        rec.upsert(&DnsARecordSpec {
            zone: dns.zone_name.clone(),
            name: name.clone(),
            ipv4_address: ip.clone(),
        })?;
        records.push(DnsRecordFact {
            fqdn: format!("{name}.{}", dns.zone_name),
            ipv4_address: ip.clone(),
        });
    }

    let checks = run_checks(rec, config, hub, spoke);

    let text = device_config::render(hub, spoke)?;
    let path = store.write_artifact(&dns.device_config_file, &text)?;
    log::info!("Wrote appliance configuration to {}", path.display());

    Ok(DnsOutput {
        zone_name: dns.zone_name.clone(),
        linked_vnets,
        records,
        checks,
        device_config_path: path.display().to_string(),
    })
}

/// Turn a describe into a check; errors become failed checks.
fn check<A, L, F>(rec: &mut Reconciler<A>, name: String, kind: ResourceKind, id: ResourceId, verdict: F) -> CheckResult
where
    A: RemoteApi,
    L: serde::de::DeserializeOwned,
    F: FnOnce(L) -> (bool, String),
{
    let (passed, detail) = match rec.describe::<L>(kind, &id) {
        Ok(Describe::Found(live)) => verdict(live),
        Ok(Describe::NotFound) => (false, format!("{kind} '{id}' not found")),
        Err(e) => (false, format!("could not check: {e}")),
    };
    if passed {
        log::info!("check {name}: {detail}");
    } else {
        log::warn!("check {name} failed: {detail}");
    }
    CheckResult { name, passed, detail }
}

fn run_checks<A: RemoteApi>(
    rec: &mut Reconciler<A>,
    config: &LabConfig,
    hub: &HubOutput,
    spoke: &SpokeOutput,
) -> Vec<CheckResult> {
    let mut checks = vec![];
    for vm in [&hub.fgt_vm_name, &spoke.workload_vm_name] {
        checks.push(check(
            rec,
            format!("vm {vm}"),
            ResourceKind::VirtualMachine,
            ResourceId::top(vm),
            |live: VmLive| {
                let state = live.provisioning_state.unwrap_or_else(|| "unknown".to_string());
                (state == VM_READY, format!("provisioning state {state}"))
            },
        ));
    }
    for (vnet, peering) in [
        (&hub.vnet_name, &spoke.hub_to_spoke_peering),
        (&spoke.vnet_name, &spoke.spoke_to_hub_peering),
    ] {
        checks.push(check(
            rec,
            format!("peering {peering}"),
            ResourceKind::VnetPeering,
            ResourceId::child(vnet, peering),
            |live: PeeringLive| {
                let state = live.peering_state.unwrap_or_else(|| "unknown".to_string());
                (state == PEERING_READY, format!("peering state {state}"))
            },
        ));
    }
    checks.push(check(
        rec,
        "default route".to_string(),
        ResourceKind::Route,
        ResourceId::child(&spoke.route_table_name, &config.spoke.default_route_name),
        |live: RouteLive| {
            let hop = live.next_hop_ip_address.unwrap_or_default();
            (hop == hub.fgt_lan_ip, format!("next hop {hop} (appliance {})", hub.fgt_lan_ip))
        },
    ));
    checks
}
