//! IPv4 address and CIDR arithmetic.
//!
//! Provides [`Ipv4`] (address + prefix length) and [`CidrRange`] (inclusive
//! network/broadcast bounds), along with the pure helpers the allocator and
//! reconciler use to validate, compare and address subnets.

use crate::error::{ConvergeError, Result};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Maximum length for an IPv4 subnet mask (32 bits).
pub const MAX_LENGTH: u8 = 32;

/// Addresses Azure keeps for itself in every subnet (network, gateway, 2x DNS, broadcast).
pub const AZ_RESERVED_ADDRESSES: u64 = 5;

/// Convert a CIDR prefix length to a subnet mask as u32.
///
/// A length of 0 yields an all-zero mask rather than shifting by 32.
///
/// # Examples
/// ```
/// use azure_hub_spoke::models::get_cidr_mask;
/// assert_eq!(get_cidr_mask(24).unwrap(), 0xFFFFFF00);
/// assert_eq!(get_cidr_mask(0).unwrap(), 0);
/// ```
pub fn get_cidr_mask(len: u8) -> Result<u32> {
    if len > MAX_LENGTH {
        return Err(ConvergeError::validation(
            format!("/{len}"),
            "Network length is too long",
        ));
    }
    if len == 0 {
        Ok(0)
    } else {
        Ok(u32::MAX << (MAX_LENGTH - len))
    }
}

/// Get the network address for a given IP and prefix length.
pub fn cut_addr(addr: Ipv4Addr, len: u8) -> Result<Ipv4Addr> {
    let mask = get_cidr_mask(len)?;
    Ok(Ipv4Addr::from(u32::from(addr) & mask))
}

/// Calculate the broadcast address for a given IP and prefix length.
pub fn broadcast_addr(addr: Ipv4Addr, len: u8) -> Result<Ipv4Addr> {
    let mask = get_cidr_mask(len)?;
    let network_bits = u32::from(addr) & mask;
    Ok(Ipv4Addr::from(network_bits | !mask))
}

/// Calculate the number of usable host addresses in an Azure subnet.
///
/// Azure reserves 5 IP addresses per subnet (network, broadcast, gateway, and 2 DNS).
pub fn num_az_hosts(len: u8) -> Result<u64> {
    if len >= MAX_LENGTH - 2 {
        // /29 = 8 IPs, 3 usable; anything smaller has none
        Err(ConvergeError::validation(
            format!("/{len}"),
            "Network length is too long or invalid",
        ))
    } else {
        Ok((1u64 << (MAX_LENGTH - len)) - AZ_RESERVED_ADDRESSES)
    }
}

pub fn ipv4_to_u32(addr: Ipv4Addr) -> u32 {
    u32::from(addr)
}

pub fn u32_to_ipv4(bits: u32) -> Ipv4Addr {
    Ipv4Addr::from(bits)
}

/// Parse a dotted-quad address, rejecting anything that is not exactly four octets.
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr> {
    text.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ConvergeError::validation(text, "Invalid IPv4 address"))
}

/// IPv4 address with CIDR notation support.
#[derive(Eq, Ord, Debug, Copy, Clone, Hash, PartialEq, PartialOrd)]
pub struct Ipv4 {
    /// The IPv4 address.
    pub addr: Ipv4Addr,
    /// The subnet mask length (0-32).
    pub mask: u8,
}

impl Ipv4 {
    /// Create a new [`Ipv4`] from a CIDR string (e.g., "10.0.0.0/24").
    pub fn new(addr_cidr: &str) -> Result<Ipv4> {
        let trimmed = addr_cidr.trim();
        if trimmed.is_empty() {
            return Err(ConvergeError::validation(addr_cidr, "Empty CIDR"));
        }
        let (addr, mask) = trimmed
            .split_once('/')
            .ok_or_else(|| ConvergeError::validation(addr_cidr, "Invalid address/mask"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| ConvergeError::validation(addr_cidr, format!("Invalid address {addr}")))?;
        if mask.is_empty() || mask.len() > 2 || !mask.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConvergeError::validation(
                addr_cidr,
                format!("Invalid prefix length {mask}"),
            ));
        }
        let mask: u8 = mask
            .parse()
            .map_err(|_| ConvergeError::validation(addr_cidr, format!("Invalid prefix length {mask}")))?;
        if mask > MAX_LENGTH {
            return Err(ConvergeError::validation(addr_cidr, "Network length is too long"));
        }
        Ok(Ipv4 { addr, mask })
    }

    /// Get the highest (broadcast) address in the subnet.
    pub fn hi(&self) -> Ipv4Addr {
        // mask is validated on construction, so the mask lookup cannot fail
        let mask = get_cidr_mask(self.mask).unwrap_or(u32::MAX);
        Ipv4Addr::from((u32::from(self.addr) & mask) | !mask)
    }

    /// Get the lowest (network) address in the subnet.
    pub fn lo(&self) -> Ipv4Addr {
        let mask = get_cidr_mask(self.mask).unwrap_or(u32::MAX);
        Ipv4Addr::from(u32::from(self.addr) & mask)
    }

    pub fn range(&self) -> CidrRange {
        CidrRange {
            start: u32::from(self.lo()),
            end: u32::from(self.hi()),
            text: self.to_string(),
        }
    }
}

impl Serialize for Ipv4 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ipv4 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Ipv4, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ipv4::new(&s).map_err(de::Error::custom)
    }
}

impl fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}

/// Inclusive network/broadcast bounds of an IPv4 prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    pub start: u32,
    pub end: u32,
    /// The prefix text this range was parsed from.
    pub text: String,
}

impl CidrRange {
    pub fn size(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.end)
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{} - {}]", self.text, self.network(), self.broadcast())
    }
}

/// Parse `a.b.c.d/n` into its inclusive address range.
///
/// # Examples
/// ```
/// use azure_hub_spoke::models::parse_cidr;
/// let r = parse_cidr("10.100.1.0/24").unwrap();
/// assert_eq!(r.start, 0x0A640100);
/// assert_eq!(r.end, 0x0A6401FF);
/// ```
pub fn parse_cidr(text: &str) -> Result<CidrRange> {
    let ipv4 = Ipv4::new(text)?;
    let mut range = ipv4.range();
    range.text = text.trim().to_string();
    Ok(range)
}

pub fn overlaps(a: &CidrRange, b: &CidrRange) -> bool {
    !(a.end < b.start || b.end < a.start)
}

/// True when `inner` lies completely within `outer`.
pub fn range_within(inner: &CidrRange, outer: &CidrRange) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

/// Is `ip` inside `cidr`? Both are validated.
pub fn contains(ip: &str, cidr: &str) -> Result<bool> {
    let range = parse_cidr(cidr)?;
    let bits = ipv4_to_u32(parse_ipv4(ip)?);
    Ok(range.start <= bits && bits <= range.end)
}

/// Address `host_offset` positions past the network address of `cidr`.
///
/// Offsets that would land past the broadcast address are rejected rather
/// than returned as an address outside the subnet.
pub fn address_at_offset(cidr: &str, host_offset: u32) -> Result<Ipv4Addr> {
    let range = parse_cidr(cidr)?;
    let bits = range
        .start
        .checked_add(host_offset)
        .filter(|bits| *bits <= range.end)
        .ok_or_else(|| {
            ConvergeError::validation(
                cidr,
                format!("Host offset {host_offset} is outside the subnet ({} addresses)", range.size()),
            )
        })?;
    Ok(u32_to_ipv4(bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_cidr_mask() {
        assert_eq!(get_cidr_mask(0).unwrap(), 0x00000000);
        assert_eq!(get_cidr_mask(8).unwrap(), 0xFF000000);
        assert_eq!(get_cidr_mask(16).unwrap(), 0xFFFF0000);
        assert_eq!(get_cidr_mask(24).unwrap(), 0xFFFFFF00);
        assert_eq!(get_cidr_mask(32).unwrap(), 0xFFFFFFFF);
        assert!(get_cidr_mask(33).is_err());
    }

    #[test]
    fn test_cut_addr() {
        let ip = Ipv4Addr::new(192, 168, 1, 42);
        assert_eq!(cut_addr(ip, 24).unwrap(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(cut_addr(ip, 16).unwrap(), Ipv4Addr::new(192, 168, 0, 0));
        assert_eq!(cut_addr(ip, 32).unwrap(), Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(cut_addr(ip, 0).unwrap(), Ipv4Addr::new(0, 0, 0, 0));
        assert!(cut_addr(ip, 33).is_err());
    }

    #[test]
    fn test_broadcast_addr() {
        let ip = Ipv4Addr::new(192, 168, 1, 0);
        assert_eq!(
            broadcast_addr(ip, 24).unwrap(),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            broadcast_addr(ip, 8).unwrap(),
            Ipv4Addr::new(192, 255, 255, 255)
        );
        assert_eq!(
            broadcast_addr(ip, 0).unwrap(),
            Ipv4Addr::new(255, 255, 255, 255)
        );
    }

    #[test]
    fn test_num_az_hosts() {
        assert_eq!(num_az_hosts(16).unwrap(), 65531);
        assert_eq!(num_az_hosts(24).unwrap(), 251);
        assert_eq!(num_az_hosts(29).unwrap(), 3);
        assert!(num_az_hosts(30).is_err());
    }

    #[test]
    fn test_parse_cidr_bounds() {
        let r = parse_cidr("10.100.1.0/24").unwrap();
        assert_eq!(r.start, 0x0A640100);
        assert_eq!(r.end, 0x0A6401FF);
        assert_eq!(r.text, "10.100.1.0/24");

        let all = parse_cidr("0.0.0.0/0").unwrap();
        assert_eq!(all.start, 0);
        assert_eq!(all.end, u32::MAX);

        let host = parse_cidr("10.1.2.3/32").unwrap();
        assert_eq!(host.start, host.end);
    }

    #[test]
    fn test_parse_cidr_normalises_host_bits() {
        let r = parse_cidr("10.2.3.4/16").unwrap();
        assert_eq!(u32_to_ipv4(r.start), Ipv4Addr::new(10, 2, 0, 0));
        assert_eq!(u32_to_ipv4(r.end), Ipv4Addr::new(10, 2, 255, 255));
    }

    #[test]
    fn test_parse_cidr_rejects_malformed() {
        for bad in [
            "",
            "   ",
            "10.0.0.0",
            "10.0.0.0/",
            "10.0.0.0/33",
            "10.0.0.0/-1",
            "10.0.0/24",
            "256.0.0.0/8",
            "10.0.0.0/24/1",
            "a.b.c.d/8",
            "10.0.0.0/+8",
        ] {
            match parse_cidr(bad) {
                Err(ConvergeError::Validation { input, .. }) => assert_eq!(input, bad),
                other => panic!("expected validation error for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_ipv4_u32_round_trip() {
        for ip in ["0.0.0.0", "10.100.1.5", "192.168.255.1", "255.255.255.255"] {
            let addr = parse_ipv4(ip).unwrap();
            assert_eq!(u32_to_ipv4(ipv4_to_u32(addr)).to_string(), ip);
        }
    }

    #[test]
    fn test_overlaps_symmetric() {
        let cases = [
            ("10.0.0.0/8", "10.100.1.0/24", true),
            ("10.100.1.0/24", "10.100.2.0/24", false),
            ("10.100.1.0/25", "10.100.1.128/25", false),
            ("10.100.1.0/24", "10.100.1.128/25", true),
            ("0.0.0.0/0", "192.168.0.0/16", true),
        ];
        for (a, b, expected) in cases {
            let (ra, rb) = (parse_cidr(a).unwrap(), parse_cidr(b).unwrap());
            assert_eq!(overlaps(&ra, &rb), expected, "{a} vs {b}");
            assert_eq!(overlaps(&ra, &rb), overlaps(&rb, &ra), "{a} vs {b}");
        }
        let r = parse_cidr("10.100.1.0/24").unwrap();
        assert!(overlaps(&r, &r));
    }

    #[test]
    fn test_contains() {
        assert!(contains("10.100.1.5", "10.100.1.0/24").unwrap());
        assert!(!contains("10.100.2.1", "10.100.1.0/24").unwrap());
        assert!(contains("10.100.1.255", "10.100.1.0/24").unwrap());
        assert!(contains("10.100.1.0", "10.100.1.0/24").unwrap());
        assert!(contains("10.100.1", "10.100.1.0/24").is_err());
    }

    #[test]
    fn test_range_within() {
        let vnet = parse_cidr("10.100.0.0/16").unwrap();
        assert!(range_within(&parse_cidr("10.100.2.0/24").unwrap(), &vnet));
        assert!(!range_within(&parse_cidr("10.101.0.0/24").unwrap(), &vnet));
        assert!(!range_within(&vnet, &parse_cidr("10.100.2.0/24").unwrap()));
    }

    #[test]
    fn test_address_at_offset() {
        assert_eq!(
            address_at_offset("10.100.2.0/24", 4).unwrap(),
            Ipv4Addr::new(10, 100, 2, 4)
        );
        assert_eq!(
            address_at_offset("10.100.2.0/24", 255).unwrap(),
            Ipv4Addr::new(10, 100, 2, 255)
        );
        assert!(address_at_offset("10.100.2.0/24", 256).is_err());
        assert!(address_at_offset("255.255.255.0/24", u32::MAX).is_err());
    }

    #[test]
    fn test_ipv4_serde_as_string() {
        let ip = Ipv4::new("10.100.0.0/16").unwrap();
        let json = serde_json::to_string(&ip).unwrap();
        assert_eq!(json, "\"10.100.0.0/16\"");
        let back: Ipv4 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ip);
        assert!(serde_json::from_str::<Ipv4>("\"10.100.0.0\"").is_err());
    }

    #[test]
    fn test_ip4_cmp_overlap() {
        let ip1 = Ipv4::new("10.0.10.0/24").unwrap();
        let ip2 = Ipv4::new("10.0.0.0/8").unwrap();
        assert!(ip2 < ip1);
        assert!(ip2.lo() < ip1.lo());
        assert!(ip2.hi() > ip1.hi());
        assert_eq!(ip2.hi(), Ipv4Addr::new(10, 255, 255, 255));
    }
}
