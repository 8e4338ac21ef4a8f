//! Allocated address space within a parent block.

use super::ipv4::{overlaps, parse_cidr, CidrRange};
use itertools::Itertools;
use std::fmt;

/// Ordered `(resource_name, prefixes)` pairs, e.g. every subnet of one VNet.
#[derive(Debug, Clone, Default)]
pub struct PrefixSet {
    entries: Vec<(String, Vec<String>)>,
}

impl PrefixSet {
    pub fn new() -> PrefixSet {
        PrefixSet { entries: vec![] }
    }

    pub fn add(&mut self, name: impl Into<String>, prefixes: Vec<String>) {
        self.entries.push((name.into(), prefixes));
    }

    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the entries blocking `candidate`.
    ///
    /// A prefix that fails to parse is reported as blocking: unknown space is
    /// never treated as free.
    pub fn blockers(&self, candidate: &CidrRange) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(name, prefixes)| {
                prefixes.iter().any(|p| match parse_cidr(p) {
                    Ok(range) => overlaps(candidate, &range),
                    Err(e) => {
                        log::warn!("Treating malformed prefix of '{name}' as used: {e}");
                        true
                    }
                })
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_free(&self, candidate: &CidrRange) -> bool {
        self.blockers(candidate).is_empty()
    }
}

impl fmt::Display for PrefixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .entries
            .iter()
            .map(|(name, prefixes)| format!("{name}=[{}]", prefixes.join(", ")))
            .join("; ");
        write!(f, "{{{body}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blockers_and_malformed() {
        let mut set = PrefixSet::new();
        set.add("wan", vec!["10.100.0.0/24".to_string()]);
        set.add("broken", vec!["not-a-cidr".to_string()]);

        let candidate = parse_cidr("10.100.0.0/24").unwrap();
        assert_eq!(set.blockers(&candidate), vec!["wan", "broken"]);

        let candidate = parse_cidr("10.100.5.0/24").unwrap();
        assert_eq!(set.blockers(&candidate), vec!["broken"]);
        assert!(!set.is_free(&candidate));
    }

    #[test]
    fn test_display() {
        let mut set = PrefixSet::new();
        set.add("a", vec!["10.0.0.0/24".to_string(), "10.0.1.0/24".to_string()]);
        assert_eq!(set.to_string(), "{a=[10.0.0.0/24, 10.0.1.0/24]}");
    }
}
