//! Next free /24 inside a VNet.
//!
//! Greedy linear scan over the third octet; the lowest free candidate wins so
//! repeated runs over the same inputs always pick the same subnet.

use crate::error::{ConvergeError, Result};
use crate::models::{parse_cidr, PrefixSet};

/// Prefix length of every candidate the allocator proposes.
pub const ALLOCATION_MASK: u8 = 24;

/// Find the first `/24` from `start_cidr` up to `max_third_octet` (inclusive)
/// that overlaps nothing in `existing`.
///
/// # Examples
/// ```
/// use azure_hub_spoke::models::PrefixSet;
/// use azure_hub_spoke::processing::find_next_available;
/// let mut used = PrefixSet::new();
/// used.add("a", vec!["10.100.1.0/24".to_string()]);
/// assert_eq!(find_next_available(&used, "10.100.1.0/24", 5).unwrap(), "10.100.2.0/24");
/// ```
pub fn find_next_available(existing: &PrefixSet, start_cidr: &str, max_third_octet: u8) -> Result<String> {
    let start = parse_cidr(start_cidr)?;
    let (_, mask) = start_cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| ConvergeError::validation(start_cidr, "Invalid address/mask"))?;
    if mask != ALLOCATION_MASK.to_string() {
        return Err(ConvergeError::validation(
            start_cidr,
            format!("Subnet search must start from a /{ALLOCATION_MASK}"),
        ));
    }

    let [o0, o1, start_third, _] = start.network().octets();
    log::debug!(
        "Searching {o0}.{o1}.{start_third}.0/24 ..= {o0}.{o1}.{max_third_octet}.0/24 against {existing}"
    );

    for third in start_third..=max_third_octet {
        let candidate = format!("{o0}.{o1}.{third}.0/{ALLOCATION_MASK}");
        let range = parse_cidr(&candidate)?;
        let blockers = existing.blockers(&range);
        if blockers.is_empty() {
            log::info!("Allocated free subnet {candidate}");
            return Ok(candidate);
        }
        log::trace!("{candidate} blocked by {blockers:?}");
    }

    Err(ConvergeError::Exhaustion {
        start: start_cidr.trim().to_string(),
        max_third_octet,
    })
}
