use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::ValidationError;

/// Canonical form of an IPv6 /64 subnet as the API expects it: the bare
/// address, no `/64` suffix, no surrounding whitespace.
pub fn normalize_ipv6_subnet(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let bare = trimmed.strip_suffix("/64").unwrap_or(trimmed);
    bare.parse::<Ipv6Addr>()
        .map(|_| bare.to_string())
        .map_err(|_| ValidationError::Ipv6Subnet(raw.to_string()))
}

/// `<subnet>/64`, for callers that show subnets to people.
pub fn ipv6_subnet_cidr(subnet: &str) -> String {
    let bare = subnet.trim();
    let bare = bare.strip_suffix("/64").unwrap_or(bare);
    format!("{bare}/64")
}

/// Partition addresses into `(ipv4, ipv6)` by the presence of a colon.
pub fn split_ip_families<S: AsRef<str>>(ips: &[S]) -> (Vec<&str>, Vec<&str>) {
    ips.iter()
        .map(|ip| ip.as_ref())
        .partition(|ip| !ip.contains(':'))
}

/// Inclusive run of consecutive IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Range {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl Ipv4Range {
    /// Number of addresses covered.
    pub fn count(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }
}

impl fmt::Display for Ipv4Range {
    /// `a.b.c.d` for a single address, `a.b.c.d-e` when the first three
    /// octets match, `start-end` otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            return write!(f, "{}", self.start);
        }
        let (s, e) = (self.start.octets(), self.end.octets());
        if s[..3] == e[..3] {
            write!(f, "{}-{}", self.start, e[3])
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Collapse addresses into contiguous ranges.
///
/// Unparsable and IPv6 entries are skipped, duplicates are counted once.
/// Returns the ranges in ascending order plus the number of distinct
/// addresses they cover.
pub fn aggregate_ipv4_ranges<S: AsRef<str>>(ips: &[S]) -> (Vec<Ipv4Range>, usize) {
    let mut nums: Vec<u32> = ips
        .iter()
        .filter_map(|s| s.as_ref().trim().parse::<Ipv4Addr>().ok())
        .map(u32::from)
        .collect();
    nums.sort_unstable();
    nums.dedup();

    let total = nums.len();
    let mut ranges = Vec::new();
    let mut iter = nums.into_iter();
    let Some(first) = iter.next() else {
        return (ranges, 0);
    };

    let (mut start, mut prev) = (first, first);
    for n in iter {
        if prev.checked_add(1) == Some(n) {
            prev = n;
            continue;
        }
        ranges.push(Ipv4Range {
            start: start.into(),
            end: prev.into(),
        });
        start = n;
        prev = n;
    }
    ranges.push(Ipv4Range {
        start: start.into(),
        end: prev.into(),
    });

    (ranges, total)
}
