//! Remote provisioning boundary.
//!
//! Every call to the cloud goes through [`RemoteApi::invoke`]. A `describe`
//! of a missing resource comes back as a not-found [`Response`] instead of an
//! error so callers can branch without treating absence as failure.

use serde_json::{Map, Value};
use std::fmt;

/// az CLI exits with status 3 when the requested resource does not exist.
pub const NOT_FOUND_STATUS: i32 = 3;

/// Parameters of a create/update call, keyed by attribute name.
pub type Params = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    VirtualNetwork,
    Subnet,
    PublicIp,
    NetworkSecurityGroup,
    SecurityRule,
    NetworkInterface,
    VirtualMachine,
    RouteTable,
    Route,
    VnetPeering,
    PrivateDnsZone,
    PrivateDnsLink,
    DnsARecord,
}

impl ResourceKind {
    /// Short human name used in logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::VirtualNetwork => "vnet",
            ResourceKind::Subnet => "subnet",
            ResourceKind::PublicIp => "public-ip",
            ResourceKind::NetworkSecurityGroup => "nsg",
            ResourceKind::SecurityRule => "nsg-rule",
            ResourceKind::NetworkInterface => "nic",
            ResourceKind::VirtualMachine => "vm",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::Route => "route",
            ResourceKind::VnetPeering => "peering",
            ResourceKind::PrivateDnsZone => "dns-zone",
            ResourceKind::PrivateDnsLink => "dns-link",
            ResourceKind::DnsARecord => "dns-a-record",
        }
    }

    /// Kind of the resource a child kind lives under.
    pub fn parent_kind(&self) -> Option<ResourceKind> {
        match self {
            ResourceKind::Subnet | ResourceKind::VnetPeering => Some(ResourceKind::VirtualNetwork),
            ResourceKind::SecurityRule => Some(ResourceKind::NetworkSecurityGroup),
            ResourceKind::Route => Some(ResourceKind::RouteTable),
            ResourceKind::PrivateDnsLink | ResourceKind::DnsARecord => Some(ResourceKind::PrivateDnsZone),
            _ => None,
        }
    }

    /// ARM provider path segment, used to build resource IDs.
    pub fn provider_path(&self) -> &'static str {
        match self {
            ResourceKind::VirtualNetwork => "Microsoft.Network/virtualNetworks",
            ResourceKind::Subnet => "subnets",
            ResourceKind::PublicIp => "Microsoft.Network/publicIPAddresses",
            ResourceKind::NetworkSecurityGroup => "Microsoft.Network/networkSecurityGroups",
            ResourceKind::SecurityRule => "securityRules",
            ResourceKind::NetworkInterface => "Microsoft.Network/networkInterfaces",
            ResourceKind::VirtualMachine => "Microsoft.Compute/virtualMachines",
            ResourceKind::RouteTable => "Microsoft.Network/routeTables",
            ResourceKind::Route => "routes",
            ResourceKind::VnetPeering => "virtualNetworkPeerings",
            ResourceKind::PrivateDnsZone => "Microsoft.Network/privateDnsZones",
            ResourceKind::PrivateDnsLink => "virtualNetworkLinks",
            ResourceKind::DnsARecord => "A",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Describe,
    /// Enumerate every child of `ResourceId::parent`.
    List,
    Create,
    Update,
}

impl Action {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Action::Create | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Describe => "describe",
            Action::List => "list",
            Action::Create => "create",
            Action::Update => "update",
        };
        f.write_str(s)
    }
}

/// Identity of a resource inside the managed resource group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    /// Parent resource name for child kinds (subnet -> vnet, rule -> nsg, ...).
    pub parent: Option<String>,
    pub name: String,
}

impl ResourceId {
    pub fn top(name: impl Into<String>) -> ResourceId {
        ResourceId {
            parent: None,
            name: name.into(),
        }
    }

    pub fn child(parent: impl Into<String>, name: impl Into<String>) -> ResourceId {
        ResourceId {
            parent: Some(parent.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{parent}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub kind: ResourceKind,
    pub action: Action,
    pub id: ResourceId,
    pub params: Params,
}

impl Request {
    pub fn new(kind: ResourceKind, action: Action, id: ResourceId) -> Request {
        Request {
            kind,
            action,
            id,
            params: Params::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Request {
        self.params = params;
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} '{}'", self.action, self.kind, self.id)
    }
}

/// Structured result plus exit status of one remote invocation.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: i32,
    pub body: Option<Value>,
    pub stderr: String,
}

impl Response {
    pub fn ok(body: Value) -> Response {
        Response {
            status: 0,
            body: Some(body),
            stderr: String::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Response {
        Response {
            status: NOT_FOUND_STATUS,
            body: None,
            stderr: message.into(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Response {
        Response {
            status,
            body: None,
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn is_not_found(&self) -> bool {
        self.status == NOT_FOUND_STATUS
            || self.stderr.contains("ResourceNotFound")
            || self.stderr.contains("was not found")
    }
}

/// Outcome of a point-in-time describe.
#[derive(Debug, Clone, PartialEq)]
pub enum Describe<T> {
    Found(T),
    NotFound,
}

impl<T> Describe<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Describe::Found(t) => Some(t),
            Describe::NotFound => None,
        }
    }
}

/// A remote system able to describe, list, create and update resources.
pub trait RemoteApi {
    fn invoke(&mut self, request: &Request) -> Response;
}

impl<A: RemoteApi + ?Sized> RemoteApi for Box<A> {
    fn invoke(&mut self, request: &Request) -> Response {
        (**self).invoke(request)
    }
}

/// Last path segment of an ARM resource ID (or the name itself).
pub fn name_from_id(id: &str) -> &str {
    id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}
