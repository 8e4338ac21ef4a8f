//! Subnet reconciliation with secondary lookup.
//!
//! A subnet's identity is ambiguous: the prefix we want may already exist
//! under another name, or our own NIC may sit in a subnet whose prefix no
//! longer matches the configuration. Candidates are tried in this order:
//!
//! 1. the subnet the named NIC is attached to,
//! 2. the subnet with the desired name,
//! 3. an idle subnet carrying exactly the desired prefix, unless it belongs
//!    to a sibling role,
//! 4. a new subnet, at the desired prefix when free, otherwise at the next
//!    free /24 that no sibling is configured for.
//!
//! Never move addressing out from under a deployed dependent.

use super::allocator::find_next_available;
use super::reconcile::{Ensured, Outcome, Reconciler};
use crate::azure::{Describe, RemoteApi, ResourceId, ResourceKind};
use crate::error::{ConvergeError, Result};
use crate::models::resources::{NicLive, SubnetLive, SubnetSpec};
use crate::models::{parse_cidr, range_within, DesiredResource, PrefixSet};

/// Inputs for [`Reconciler::ensure_subnet`].
#[derive(Debug, Clone)]
pub struct SubnetRequest<'a> {
    pub desired: DesiredResource<SubnetSpec>,
    /// Address space of the parent VNet as it exists live.
    pub vnet_prefixes: &'a [String],
    /// NIC whose current subnet takes precedence over everything else.
    pub attached_nic: Option<&'a str>,
    /// Upper bound of the /24 search.
    pub max_third_octet: u8,
    /// Subnets owned by other roles in the same VNet; never adopted by prefix.
    pub sibling_names: &'a [String],
    /// Prefixes configured for other roles; skipped by the /24 search.
    pub sibling_prefixes: &'a [String],
}

impl<A: RemoteApi> Reconciler<A> {
    pub fn ensure_subnet(&mut self, request: &SubnetRequest) -> Result<Ensured<SubnetLive>> {
        let spec = &request.desired.resource;
        let existing: Vec<SubnetLive> = self.list(ResourceKind::Subnet, &spec.vnet)?;
        log::debug!("vnet '{}' has {} subnet(s)", spec.vnet, existing.len());

        if let Some(nic) = request.attached_nic {
            if let Some(live) = self.subnet_of_nic(nic, &existing)? {
                log::info!("subnet '{}' backs nic '{nic}', keeping it", live.name);
                return self.settle(&request.desired, live);
            }
        }

        if let Some(live) = existing.iter().find(|s| s.name.eq_ignore_ascii_case(&spec.name)) {
            return self.settle(&request.desired, live.clone());
        }

        let wanted = spec.address_prefix.trim();
        let sibling = |s: &SubnetLive| request.sibling_names.iter().any(|n| n.eq_ignore_ascii_case(&s.name));
        if let Some(live) = existing
            .iter()
            .find(|s| !s.in_use() && !sibling(*s) && s.prefixes().iter().any(|p| p == wanted))
        {
            log::warn!(
                "subnet '{}' already holds {wanted}; adopting it instead of creating '{}'",
                live.name,
                spec.name
            );
            let id = ResourceId::child(&spec.vnet, &live.name);
            let note = format!("stands in for '{}'", spec.name);
            self.record(ResourceKind::Subnet, &id, Outcome::Adopted, Some(note));
            return Ok(Ensured {
                outcome: Outcome::Adopted,
                live: live.clone(),
            });
        }

        let prefix = allocate_prefix(&existing, request.sibling_prefixes, wanted, request.max_third_octet)?;
        check_inside_vnet(&prefix, request.vnet_prefixes)?;
        if prefix != wanted {
            log::warn!("{wanted} is taken in vnet '{}', using {prefix} for '{}'", spec.vnet, spec.name);
        }
        let allocated = SubnetSpec {
            address_prefix: prefix,
            ..spec.clone()
        };
        let live = self.create(&allocated)?;
        Ok(Ensured {
            outcome: Outcome::Created,
            live,
        })
    }

    fn subnet_of_nic(&mut self, nic: &str, existing: &[SubnetLive]) -> Result<Option<SubnetLive>> {
        let nic_live = match self.describe::<NicLive>(ResourceKind::NetworkInterface, &ResourceId::top(nic))? {
            Describe::Found(live) => live,
            Describe::NotFound => return Ok(None),
        };
        Ok(nic_live
            .subnet_name()
            .and_then(|name| existing.iter().find(|s| s.name.eq_ignore_ascii_case(name)))
            .cloned())
    }
}

/// The desired prefix when nothing overlaps it, else the next free /24
/// that is neither live nor reserved for a sibling.
fn allocate_prefix(
    existing: &[SubnetLive],
    sibling_prefixes: &[String],
    wanted: &str,
    max_third_octet: u8,
) -> Result<String> {
    let mut used = PrefixSet::new();
    for subnet in existing {
        used.add(&subnet.name, subnet.prefixes());
    }
    let range = parse_cidr(wanted)?;
    if used.is_free(&range) {
        return Ok(wanted.to_string());
    }
    used.add("reserved", sibling_prefixes.to_vec());
    find_next_available(&used, wanted, max_third_octet)
}

fn check_inside_vnet(prefix: &str, vnet_prefixes: &[String]) -> Result<()> {
    let range = parse_cidr(prefix)?;
    let inside = vnet_prefixes
        .iter()
        .filter_map(|v| parse_cidr(v).ok())
        .any(|vnet| range_within(&range, &vnet));
    if inside {
        Ok(())
    } else {
        Err(ConvergeError::validation(
            prefix,
            format!("not inside the vnet address space [{}]", vnet_prefixes.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::InMemoryApi;
    use crate::models::MatchPolicy;
    use crate::processing::retry::{RecordingSleeper, RetryPolicy};
    use serde_json::json;

    const VNET: &str = "vnet-hub";

    fn vnet_space() -> Vec<String> {
        vec!["10.100.0.0/16".to_string()]
    }

    fn lan(prefix: &str, policy: MatchPolicy) -> DesiredResource<SubnetSpec> {
        DesiredResource::new(
            SubnetSpec {
                vnet: VNET.to_string(),
                name: "snet-fgt-lan".to_string(),
                address_prefix: prefix.to_string(),
                route_table: None,
                network_security_group: None,
            },
            policy,
        )
    }

    fn reconciler(api: InMemoryApi) -> Reconciler<InMemoryApi> {
        Reconciler::new(api, RetryPolicy::default(), Box::new(RecordingSleeper::new()))
    }

    fn seed_subnet(api: &mut InMemoryApi, name: &str, prefix: &str) {
        api.seed(
            ResourceKind::Subnet,
            ResourceId::child(VNET, name),
            json!({ "addressPrefix": prefix }),
        );
    }

    fn seed_nic(api: &mut InMemoryApi, name: &str, subnet: &str, ip: &str) {
        api.seed(
            ResourceKind::NetworkInterface,
            ResourceId::top(name),
            json!({ "vnetName": VNET, "subnet": subnet, "privateIpAddress": ip }),
        );
    }

    fn request<'a>(desired: DesiredResource<SubnetSpec>, space: &'a [String], nic: Option<&'a str>) -> SubnetRequest<'a> {
        SubnetRequest {
            desired,
            vnet_prefixes: space,
            attached_nic: nic,
            max_third_octet: 10,
            sibling_names: &[],
            sibling_prefixes: &[],
        }
    }

    #[test]
    fn test_allocates_next_free_when_prefix_in_use() {
        let mut api = InMemoryApi::new("rg-lab");
        seed_subnet(&mut api, "legacy", "10.100.1.0/24");
        seed_nic(&mut api, "legacy-nic", "legacy", "10.100.1.10");
        let mut rec = reconciler(api);
        let space = vnet_space();

        let ensured = rec
            .ensure_subnet(&request(lan("10.100.1.0/24", MatchPolicy::AdoptExisting), &space, Some("nic-fgt-lan")))
            .unwrap();
        assert_eq!(ensured.outcome, Outcome::Created);
        assert_eq!(ensured.live.name, "snet-fgt-lan");
        assert_eq!(ensured.live.primary_prefix().as_deref(), Some("10.100.2.0/24"));

        // second run finds it by name and does nothing
        let again = rec
            .ensure_subnet(&request(lan("10.100.1.0/24", MatchPolicy::AdoptExisting), &space, Some("nic-fgt-lan")))
            .unwrap();
        assert_eq!(again.outcome, Outcome::Adopted);
        assert_eq!(again.live.primary_prefix().as_deref(), Some("10.100.2.0/24"));
        assert_eq!(rec.api().mutating_calls(), 1);
    }

    #[test]
    fn test_allocated_subnet_under_exact_policy_conflicts_on_rerun() {
        let mut api = InMemoryApi::new("rg-lab");
        seed_subnet(&mut api, "snet-fgt-lan", "10.100.2.0/24");
        let mut rec = reconciler(api);
        let space = vnet_space();

        match rec.ensure_subnet(&request(lan("10.100.1.0/24", MatchPolicy::Exact), &space, None)) {
            Err(ConvergeError::Conflict { expected, actual, .. }) => {
                assert_eq!(expected, "10.100.1.0/24");
                assert_eq!(actual, "10.100.2.0/24");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_attached_nic_wins_over_name() {
        let mut api = InMemoryApi::new("rg-lab");
        seed_subnet(&mut api, "snet-fgt-lan", "10.100.1.0/24");
        seed_subnet(&mut api, "old-lan", "10.100.5.0/24");
        seed_nic(&mut api, "nic-fgt-lan", "old-lan", "10.100.5.4");
        let mut rec = reconciler(api);
        let space = vnet_space();

        let ensured = rec
            .ensure_subnet(&request(lan("10.100.1.0/24", MatchPolicy::AdoptExisting), &space, Some("nic-fgt-lan")))
            .unwrap();
        assert_eq!(ensured.live.name, "old-lan");
        assert_eq!(ensured.outcome, Outcome::Adopted);
        assert_eq!(rec.api().mutating_calls(), 0);
    }

    #[test]
    fn test_idle_subnet_with_desired_prefix_is_reused() {
        let mut api = InMemoryApi::new("rg-lab");
        seed_subnet(&mut api, "spare", "10.100.1.0/24");
        let mut rec = reconciler(api);
        let space = vnet_space();

        let ensured = rec
            .ensure_subnet(&request(lan("10.100.1.0/24", MatchPolicy::Exact), &space, None))
            .unwrap();
        assert_eq!(ensured.outcome, Outcome::Adopted);
        assert_eq!(ensured.live.name, "spare");
        assert_eq!(rec.api().mutating_calls(), 0);
    }

    #[test]
    fn test_name_match_with_same_prefix_is_noop() {
        let mut api = InMemoryApi::new("rg-lab");
        seed_subnet(&mut api, "snet-fgt-lan", "10.100.1.0/24");
        let mut rec = reconciler(api);
        let space = vnet_space();

        let ensured = rec
            .ensure_subnet(&request(lan("10.100.1.0/24", MatchPolicy::Exact), &space, None))
            .unwrap();
        assert_eq!(ensured.outcome, Outcome::NoOp);
    }

    #[test]
    fn test_prefix_outside_vnet_is_rejected() {
        let mut rec = reconciler(InMemoryApi::new("rg-lab"));
        let space = vnet_space();
        assert!(matches!(
            rec.ensure_subnet(&request(lan("10.200.1.0/24", MatchPolicy::Exact), &space, None)),
            Err(ConvergeError::Validation { .. })
        ));
    }

    #[test]
    fn test_sibling_subnet_is_not_adopted_by_prefix() {
        let mut api = InMemoryApi::new("rg-lab");
        seed_subnet(&mut api, "snet-fgt-wan", "10.100.1.0/24");
        let mut rec = reconciler(api);
        let space = vnet_space();
        let siblings = vec!["snet-fgt-wan".to_string()];
        let mut req = request(lan("10.100.1.0/24", MatchPolicy::AdoptExisting), &space, None);
        req.sibling_names = &siblings;

        let ensured = rec.ensure_subnet(&req).unwrap();
        assert_eq!(ensured.outcome, Outcome::Created);
        assert_eq!(ensured.live.name, "snet-fgt-lan");
        assert_eq!(ensured.live.primary_prefix().as_deref(), Some("10.100.2.0/24"));
    }

    #[test]
    fn test_search_skips_sibling_prefixes() {
        let mut api = InMemoryApi::new("rg-lab");
        seed_subnet(&mut api, "legacy", "10.100.1.0/24");
        seed_nic(&mut api, "legacy-nic", "legacy", "10.100.1.10");
        let mut rec = reconciler(api);
        let space = vnet_space();
        let reserved = vec!["10.100.2.0/24".to_string()];
        let mut req = request(lan("10.100.1.0/24", MatchPolicy::AdoptExisting), &space, None);
        req.sibling_prefixes = &reserved;

        let ensured = rec.ensure_subnet(&req).unwrap();
        assert_eq!(ensured.live.primary_prefix().as_deref(), Some("10.100.3.0/24"));
    }

    #[test]
    fn test_search_exhaustion() {
        let mut api = InMemoryApi::new("rg-lab");
        for third in 1..=10 {
            let name = format!("used-{third}");
            seed_subnet(&mut api, &name, &format!("10.100.{third}.0/24"));
            seed_nic(&mut api, &format!("nic-{third}"), &name, &format!("10.100.{third}.4"));
        }
        let mut rec = reconciler(api);
        let space = vnet_space();
        assert!(matches!(
            rec.ensure_subnet(&request(lan("10.100.1.0/24", MatchPolicy::Exact), &space, None)),
            Err(ConvergeError::Exhaustion { .. })
        ));
    }
}
