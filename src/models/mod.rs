//! Domain models for the hub/spoke convergence engine.
//!
//! - [`Ipv4`] / [`CidrRange`] - IPv4 CIDR arithmetic
//! - [`PrefixSet`] - address space already allocated inside a VNet
//! - [`resources`] - desired and live shapes of every managed resource kind
//! - [`stage`] - facts persisted between pipeline stages

mod ipv4;
mod prefix_set;
pub mod resources;
pub mod stage;

// Re-export public types
pub use ipv4::{
    address_at_offset, broadcast_addr, contains, cut_addr, get_cidr_mask, ipv4_to_u32,
    num_az_hosts, overlaps, parse_cidr, parse_ipv4, range_within, u32_to_ipv4, CidrRange, Ipv4,
    AZ_RESERVED_ADDRESSES, MAX_LENGTH,
};
pub use prefix_set::PrefixSet;
pub use resources::{DesiredResource, MatchPolicy, Mismatch, Resource};
pub use stage::{CheckResult, DnsOutput, DnsRecordFact, HubOutput, SpokeOutput, StageName, SubnetFact};
