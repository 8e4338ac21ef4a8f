//! Idempotent "ensure" reconciliation.
//!
//! For every managed resource the reconciler describes the live state and
//! then either creates it (absent), leaves it alone (matching), adopts the
//! live value (mismatch under [`MatchPolicy::AdoptExisting`]) or fails with a
//! conflict (mismatch under [`MatchPolicy::Exact`]). All remote calls go
//! through [`with_retry`]. Nothing is remembered between runs apart from the
//! journal of what this run did.

use super::retry::{with_retry, RetryPolicy, Sleeper};
use crate::azure::{Action, Describe, Params, RemoteApi, Request, ResourceId, ResourceKind, Response};
use crate::error::{ConvergeError, Result};
use crate::models::{DesiredResource, MatchPolicy, Mismatch, Resource};
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    NoOp,
    Adopted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::NoOp => "unchanged",
            Outcome::Adopted => "adopted",
        };
        f.pad(s)
    }
}

/// Live state of a resource after reconciliation.
#[derive(Debug, Clone)]
pub struct Ensured<L> {
    pub outcome: Outcome,
    pub live: L,
}

/// What happened to one resource during this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub kind: ResourceKind,
    pub id: ResourceId,
    pub outcome: Outcome,
    pub note: Option<String>,
}

pub struct Reconciler<A: RemoteApi> {
    api: A,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    journal: Vec<JournalEntry>,
}

impl<A: RemoteApi> Reconciler<A> {
    pub fn new(api: A, retry: RetryPolicy, sleeper: Box<dyn Sleeper>) -> Reconciler<A> {
        Reconciler {
            api,
            retry,
            sleeper,
            journal: vec![],
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn into_api(self) -> A {
        self.api
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn take_journal(&mut self) -> Vec<JournalEntry> {
        std::mem::take(&mut self.journal)
    }

    pub(crate) fn record(&mut self, kind: ResourceKind, id: &ResourceId, outcome: Outcome, note: Option<String>) {
        self.journal.push(JournalEntry {
            kind,
            id: id.clone(),
            outcome,
            note,
        });
    }

    /// One remote invocation under the retry policy.
    ///
    /// A not-found answer to a describe or list is a normal response, not a failure.
    fn call(&mut self, request: &Request) -> Result<Response> {
        let label = request.to_string();
        let api = &mut self.api;
        with_retry(&self.retry, self.sleeper.as_ref(), &label, || {
            let response = api.invoke(request);
            let tolerated = matches!(request.action, Action::Describe | Action::List) && response.is_not_found();
            if response.is_success() || tolerated {
                Ok(response)
            } else {
                Err(ConvergeError::transient(
                    request.to_string(),
                    Some(response.status),
                    response.stderr.trim(),
                ))
            }
        })
    }

    pub fn describe<L: DeserializeOwned>(&mut self, kind: ResourceKind, id: &ResourceId) -> Result<Describe<L>> {
        let request = Request::new(kind, Action::Describe, id.clone());
        let response = self.call(&request)?;
        if !response.is_success() {
            log::debug!("{request}: not found");
            return Ok(Describe::NotFound);
        }
        parse_body(&request, response.body).map(Describe::Found)
    }

    /// Every child of `parent`; an absent parent has no children.
    pub fn list<L: DeserializeOwned>(&mut self, kind: ResourceKind, parent: &str) -> Result<Vec<L>> {
        let request = Request::new(kind, Action::List, ResourceId::child(parent, "*"));
        let response = self.call(&request)?;
        if !response.is_success() {
            return Ok(vec![]);
        }
        parse_body(&request, response.body)
    }

    fn mutate(&mut self, kind: ResourceKind, action: Action, id: &ResourceId, params: Params) -> Result<()> {
        let request = Request::new(kind, action, id.clone()).with_params(params);
        log::info!("{} {request}", "apply".green());
        self.call(&request).map(|_| ())
    }

    fn describe_after_write<R: Resource>(&mut self, id: &ResourceId) -> Result<R::Live> {
        match self.describe::<R::Live>(R::KIND, id)? {
            Describe::Found(live) => Ok(live),
            Describe::NotFound => Err(ConvergeError::transient(
                format!("describe {} '{id}'", R::KIND),
                None,
                "resource missing right after it was written",
            )),
        }
    }

    /// Converge one resource according to its match policy.
    pub fn ensure<R: Resource>(&mut self, desired: &DesiredResource<R>) -> Result<Ensured<R::Live>> {
        let id = desired.identity();
        match self.describe::<R::Live>(R::KIND, &id)? {
            Describe::NotFound => {
                let live = self.create(&desired.resource)?;
                Ok(Ensured {
                    outcome: Outcome::Created,
                    live,
                })
            }
            Describe::Found(live) => self.settle(desired, live),
        }
    }

    pub(crate) fn create<R: Resource>(&mut self, resource: &R) -> Result<R::Live> {
        let id = resource.id();
        log::info!("{} '{id}' absent, creating", R::KIND);
        let params = resource.create_params()?;
        self.mutate(R::KIND, Action::Create, &id, params)?;
        let live = self.describe_after_write::<R>(&id)?;
        self.record(R::KIND, &id, Outcome::Created, None);
        Ok(live)
    }

    /// Decide what a present resource means under the desired policy.
    pub(crate) fn settle<R: Resource>(&mut self, desired: &DesiredResource<R>, live: R::Live) -> Result<Ensured<R::Live>> {
        let id = desired.identity();
        match desired.resource.diff(&live) {
            None => {
                log::debug!("{} '{id}' matches desired state", R::KIND);
                self.record(R::KIND, &id, Outcome::NoOp, None);
                Ok(Ensured {
                    outcome: Outcome::NoOp,
                    live,
                })
            }
            Some(mismatch) => match desired.policy {
                MatchPolicy::Exact => Err(conflict(R::KIND, &id, mismatch)),
                MatchPolicy::AdoptExisting => {
                    log::warn!(
                        "{adopt} {} '{id}': {} is '{}' (wanted '{}'), keeping the live value",
                        R::KIND,
                        mismatch.attribute,
                        mismatch.actual,
                        mismatch.expected,
                        adopt = "adopting".yellow(),
                    );
                    let note = format!("{} kept at {}", mismatch.attribute, mismatch.actual);
                    self.record(R::KIND, &id, Outcome::Adopted, Some(note));
                    Ok(Ensured {
                        outcome: Outcome::Adopted,
                        live,
                    })
                }
            },
        }
    }

    /// Show, then update on drift or create when absent.
    pub fn upsert<R: Resource>(&mut self, resource: &R) -> Result<Ensured<R::Live>> {
        let id = resource.id();
        match self.describe::<R::Live>(R::KIND, &id)? {
            Describe::NotFound => {
                let live = self.create(resource)?;
                Ok(Ensured {
                    outcome: Outcome::Created,
                    live,
                })
            }
            Describe::Found(live) => match resource.diff(&live) {
                None => {
                    self.record(R::KIND, &id, Outcome::NoOp, None);
                    Ok(Ensured {
                        outcome: Outcome::NoOp,
                        live,
                    })
                }
                Some(mismatch) => {
                    log::info!(
                        "{} '{id}' drifted: {} '{}' -> '{}'",
                        R::KIND,
                        mismatch.attribute,
                        mismatch.actual,
                        mismatch.expected
                    );
                    let live = self.apply_update::<R>(&id, resource.update_params()?)?;
                    Ok(Ensured {
                        outcome: Outcome::Updated,
                        live,
                    })
                }
            },
        }
    }

    /// Patch selected attributes of an existing resource.
    pub fn apply_update<R: Resource>(&mut self, id: &ResourceId, params: Params) -> Result<R::Live> {
        self.mutate(R::KIND, Action::Update, id, params)?;
        let live = self.describe_after_write::<R>(id)?;
        self.record(R::KIND, id, Outcome::Updated, None);
        Ok(live)
    }
}

pub(crate) fn conflict(kind: ResourceKind, id: &ResourceId, mismatch: Mismatch) -> ConvergeError {
    ConvergeError::Conflict {
        resource: format!("{kind} '{id}'"),
        attribute: mismatch.attribute.to_string(),
        expected: mismatch.expected,
        actual: mismatch.actual,
    }
}

fn parse_body<L: DeserializeOwned>(request: &Request, body: Option<Value>) -> Result<L> {
    let body = body.ok_or_else(|| ConvergeError::validation(request.to_string(), "empty response body"))?;
    serde_path_to_error::deserialize(body).map_err(|e| {
        ConvergeError::validation(
            request.to_string(),
            format!("unexpected response shape: path={} error={}", e.path(), e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::InMemoryApi;
    use crate::models::resources::{DnsARecordSpec, RouteSpec, VnetSpec};
    use crate::processing::retry::RecordingSleeper;
    use serde_json::json;
    use std::time::Duration;

    fn reconciler(api: InMemoryApi) -> Reconciler<InMemoryApi> {
        let retry = RetryPolicy::new(3, Duration::from_secs(5), 2.0, Duration::from_secs(60)).unwrap();
        Reconciler::new(api, retry, Box::new(RecordingSleeper::new()))
    }

    fn hub(prefix: &str) -> VnetSpec {
        VnetSpec {
            name: "vnet-hub".to_string(),
            location: "eastus".to_string(),
            address_prefixes: vec![prefix.to_string()],
        }
    }

    #[test]
    fn test_create_then_noop() {
        let mut rec = reconciler(InMemoryApi::new("rg-lab"));
        let desired = DesiredResource::exact(hub("10.100.0.0/16"));

        let first = rec.ensure(&desired).unwrap();
        assert_eq!(first.outcome, Outcome::Created);
        assert_eq!(first.live.address_prefixes, vec!["10.100.0.0/16"]);
        assert_eq!(rec.api().mutating_calls(), 1);

        let second = rec.ensure(&desired).unwrap();
        assert_eq!(second.outcome, Outcome::NoOp);
        assert_eq!(rec.api().mutating_calls(), 1);

        let outcomes: Vec<Outcome> = rec.journal().iter().map(|j| j.outcome).collect();
        assert_eq!(outcomes, vec![Outcome::Created, Outcome::NoOp]);
    }

    #[test]
    fn test_exact_mismatch_is_conflict() {
        let mut api = InMemoryApi::new("rg-lab");
        api.seed(
            ResourceKind::VirtualNetwork,
            ResourceId::top("vnet-hub"),
            json!({ "addressPrefixes": ["10.200.0.0/16"] }),
        );
        let mut rec = reconciler(api);

        match rec.ensure(&DesiredResource::exact(hub("10.100.0.0/16"))) {
            Err(ConvergeError::Conflict { resource, expected, actual, .. }) => {
                assert!(resource.contains("vnet-hub"));
                assert_eq!(expected, "10.100.0.0/16");
                assert_eq!(actual, "10.200.0.0/16");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(rec.api().mutating_calls(), 0);
    }

    #[test]
    fn test_adopt_existing_keeps_live_value() {
        let mut api = InMemoryApi::new("rg-lab");
        api.seed(
            ResourceKind::VirtualNetwork,
            ResourceId::top("vnet-hub"),
            json!({ "addressPrefixes": ["10.200.0.0/16"] }),
        );
        let mut rec = reconciler(api);

        let desired = DesiredResource::new(hub("10.100.0.0/16"), MatchPolicy::AdoptExisting);
        let ensured = rec.ensure(&desired).unwrap();
        assert_eq!(ensured.outcome, Outcome::Adopted);
        assert_eq!(ensured.live.address_prefixes, vec!["10.200.0.0/16"]);
        assert_eq!(rec.api().mutating_calls(), 0);
        assert!(rec.journal()[0].note.as_deref().unwrap().contains("10.200.0.0/16"));
    }

    #[test]
    fn test_upsert_create_update_noop() {
        let mut rec = reconciler(InMemoryApi::new("rg-lab"));
        let mut route = RouteSpec {
            route_table: "rt-spoke".to_string(),
            name: "default-via-fgt".to_string(),
            address_prefix: "0.0.0.0/0".to_string(),
            next_hop_type: "VirtualAppliance".to_string(),
            next_hop_ip_address: "10.100.1.4".to_string(),
        };

        assert_eq!(rec.upsert(&route).unwrap().outcome, Outcome::Created);
        assert_eq!(rec.upsert(&route).unwrap().outcome, Outcome::NoOp);
        assert_eq!(rec.api().mutating_calls(), 1);

        route.next_hop_ip_address = "10.100.2.4".to_string();
        let updated = rec.upsert(&route).unwrap();
        assert_eq!(updated.outcome, Outcome::Updated);
        assert_eq!(updated.live.next_hop_ip_address.as_deref(), Some("10.100.2.4"));
        assert_eq!(rec.api().mutating_calls(), 2);
    }

    #[test]
    fn test_upsert_replaces_every_address_of_a_record_set() {
        let mut api = InMemoryApi::new("rg-lab");
        let id = ResourceId::child("lab.internal", "fgt");
        api.seed(
            ResourceKind::DnsARecord,
            id.clone(),
            json!({ "ipv4Addresses": ["10.100.1.4", "10.100.9.9"] }),
        );
        let mut rec = reconciler(api);
        let record = DnsARecordSpec {
            zone: "lab.internal".to_string(),
            name: "fgt".to_string(),
            ipv4_address: "10.100.1.4".to_string(),
        };

        let first = rec.upsert(&record).unwrap();
        assert_eq!(first.outcome, Outcome::Updated);
        assert_eq!(first.live.ipv4_addresses, vec!["10.100.1.4"]);
        assert_eq!(rec.api().mutating_calls(), 1);

        let second = rec.upsert(&record).unwrap();
        assert_eq!(second.outcome, Outcome::NoOp);
        assert_eq!(rec.api().mutating_calls(), 1);
    }

    #[test]
    fn test_upsert_fills_an_empty_record_set() {
        let mut api = InMemoryApi::new("rg-lab");
        api.seed(
            ResourceKind::DnsARecord,
            ResourceId::child("lab.internal", "workload"),
            json!({ "ipv4Addresses": [] }),
        );
        let mut rec = reconciler(api);
        let record = DnsARecordSpec {
            zone: "lab.internal".to_string(),
            name: "workload".to_string(),
            ipv4_address: "10.101.1.4".to_string(),
        };
        assert_eq!(rec.upsert(&record).unwrap().live.ipv4_addresses, vec!["10.101.1.4"]);
        assert_eq!(rec.upsert(&record).unwrap().outcome, Outcome::NoOp);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let mut api = InMemoryApi::new("rg-lab");
        api.fail_next(2, "TooManyRequests");
        let mut rec = reconciler(api);

        let ensured = rec.ensure(&DesiredResource::exact(hub("10.100.0.0/16"))).unwrap();
        assert_eq!(ensured.outcome, Outcome::Created);
    }

    #[test]
    fn test_retry_exhaustion_is_fatal() {
        let mut api = InMemoryApi::new("rg-lab");
        api.fail_next(10, "InternalServerError");
        let mut rec = reconciler(api);

        match rec.ensure(&DesiredResource::exact(hub("10.100.0.0/16"))) {
            Err(ConvergeError::Fatal { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_body_is_validation_error() {
        let mut api = InMemoryApi::new("rg-lab");
        api.seed(
            ResourceKind::VirtualNetwork,
            ResourceId::top("vnet-hub"),
            json!({ "addressPrefixes": "not-a-list" }),
        );
        let mut rec = reconciler(api);
        assert!(matches!(
            rec.ensure(&DesiredResource::exact(hub("10.100.0.0/16"))),
            Err(ConvergeError::Validation { .. })
        ));
    }
}
