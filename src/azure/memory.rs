//! In-process [`RemoteApi`] holding resources in memory.
//!
//! Answers describe/list with the same projected shapes the az CLI binding
//! produces, so the reconciler cannot tell the two apart. Used by the tests
//! and by `--dry-run`.

use super::api::{name_from_id, Action, RemoteApi, Request, Response, ResourceId, ResourceKind};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub action: Action,
    pub kind: ResourceKind,
    pub id: ResourceId,
}

#[derive(Debug, Default)]
pub struct InMemoryApi {
    resource_group: String,
    resources: BTreeMap<(ResourceKind, ResourceId), Map<String, Value>>,
    calls: Vec<Call>,
    pending_failures: u32,
    failure_message: String,
    public_ips_issued: u8,
}

impl InMemoryApi {
    pub fn new(resource_group: &str) -> InMemoryApi {
        InMemoryApi {
            resource_group: resource_group.to_string(),
            ..Default::default()
        }
    }

    /// Put a resource in place as if someone created it out of band.
    pub fn seed(&mut self, kind: ResourceKind, id: ResourceId, attributes: Value) {
        let mut record = self.base_record(kind, &id);
        if let Value::Object(map) = attributes {
            record.extend(map);
        }
        self.resources.insert((kind, id), record);
    }

    /// Fail the next `count` invocations with a non-zero status.
    pub fn fail_next(&mut self, count: u32, message: &str) {
        self.pending_failures = count;
        self.failure_message = message.to_string();
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Create and update invocations issued so far.
    pub fn mutating_calls(&self) -> usize {
        self.calls.iter().filter(|c| c.action.is_mutating()).count()
    }

    pub fn reset_calls(&mut self) {
        self.calls.clear();
    }

    pub fn get(&self, kind: ResourceKind, id: &ResourceId) -> Option<&Map<String, Value>> {
        self.resources.get(&(kind, id.clone()))
    }

    pub fn remove(&mut self, kind: ResourceKind, id: &ResourceId) -> bool {
        self.resources.remove(&(kind, id.clone())).is_some()
    }

    fn arm_id(&self, kind: ResourceKind, id: &ResourceId) -> String {
        let base = format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{}/providers", self.resource_group);
        match (&id.parent, kind.parent_kind()) {
            (Some(parent), Some(parent_kind)) => format!(
                "{base}/{}/{parent}/{}/{}",
                parent_kind.provider_path(),
                kind.provider_path(),
                id.name
            ),
            _ => format!("{base}/{}/{}", kind.provider_path(), id.name),
        }
    }

    fn base_record(&self, kind: ResourceKind, id: &ResourceId) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("name".to_string(), json!(id.name));
        record.insert("id".to_string(), json!(self.arm_id(kind, id)));
        record.insert("provisioningState".to_string(), json!("Succeeded"));
        record
    }

    /// Attributes the cloud fills in or reshapes on write.
    fn normalise(&mut self, kind: ResourceKind, record: &mut Map<String, Value>) {
        match kind {
            ResourceKind::PublicIp if !record.contains_key("ipAddress") => {
                self.public_ips_issued = self.public_ips_issued.wrapping_add(1);
                record.insert(
                    "ipAddress".to_string(),
                    json!(format!("203.0.113.{}", self.public_ips_issued)),
                );
            }
            ResourceKind::VnetPeering => {
                record.insert("peeringState".to_string(), json!("Connected"));
            }
            ResourceKind::DnsARecord => {
                if let Some(ip) = record.remove("ipv4Address") {
                    let mut addresses = match record.remove("ipv4Addresses") {
                        Some(Value::Array(existing)) => existing,
                        _ => vec![],
                    };
                    if !addresses.contains(&ip) {
                        addresses.push(ip);
                    }
                    record.insert("ipv4Addresses".to_string(), Value::Array(addresses));
                }
                if let Some(Value::Array(records)) = record.remove("aRecords") {
                    let addresses: Vec<Value> = records.iter().filter_map(|r| r.get("ipv4Address").cloned()).collect();
                    record.insert("ipv4Addresses".to_string(), Value::Array(addresses));
                }
            }
            ResourceKind::VirtualMachine => {
                record.remove("adminPassword");
            }
            _ => {}
        }
    }

    /// Record as a describe would show it.
    fn view(&self, kind: ResourceKind, id: &ResourceId, record: &Map<String, Value>) -> Value {
        let mut view = record.clone();
        if kind == ResourceKind::Subnet {
            let attached = self
                .resources
                .iter()
                .filter(|((k, _), nic)| {
                    *k == ResourceKind::NetworkInterface
                        && nic.get("vnetName").and_then(Value::as_str) == id.parent.as_deref()
                        && nic
                            .get("subnet")
                            .and_then(Value::as_str)
                            .is_some_and(|s| name_from_id(s).eq_ignore_ascii_case(&id.name))
                })
                .count() as u64;
            let seeded = view.get("ipConfigurationCount").and_then(Value::as_u64).unwrap_or(0);
            view.insert("ipConfigurationCount".to_string(), json!(seeded + attached));
        }
        Value::Object(view)
    }
}

impl RemoteApi for InMemoryApi {
    fn invoke(&mut self, request: &Request) -> Response {
        self.calls.push(Call {
            action: request.action,
            kind: request.kind,
            id: request.id.clone(),
        });
        log::trace!("in-memory {request}");

        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Response::failed(1, self.failure_message.clone());
        }

        let key = (request.kind, request.id.clone());
        match request.action {
            Action::Describe => match self.resources.get(&key) {
                Some(record) => Response::ok(self.view(request.kind, &request.id, record)),
                None => Response::not_found(format!(
                    "(ResourceNotFound) The Resource '{}' was not found.",
                    request.id
                )),
            },
            Action::List => {
                let items: Vec<Value> = self
                    .resources
                    .iter()
                    .filter(|((kind, id), _)| *kind == request.kind && id.parent == request.id.parent)
                    .map(|((kind, id), record)| self.view(*kind, id, record))
                    .collect();
                Response::ok(Value::Array(items))
            }
            Action::Create => {
                let mut record = self
                    .resources
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| self.base_record(request.kind, &request.id));
                record.extend(request.params.clone());
                self.normalise(request.kind, &mut record);
                self.resources.insert(key, record);
                Response::ok(json!({}))
            }
            Action::Update => {
                let Some(mut record) = self.resources.get(&key).cloned() else {
                    return Response::not_found(format!("(ResourceNotFound) '{}' was not found.", request.id));
                };
                record.extend(request.params.clone());
                self.normalise(request.kind, &mut record);
                self.resources.insert(key, record);
                Response::ok(json!({}))
            }
        }
    }
}
