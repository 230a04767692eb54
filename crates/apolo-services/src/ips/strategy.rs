//! Address assignment inside a pool
//!
//! A pool's `Range` is parsed into an `IpRange`; a `PoolStrategy` then picks
//! the next free address from it. IPv4 blocks wider than /31 never hand out
//! their network and broadcast addresses.

use apolo_core::{
    models::{AddressFamily, AllocationStrategy, IpPool},
    AppError, AppResult,
};
use rand::Rng;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Upper bound on addresses probed by the random strategy before it falls
/// back to a linear scan
const RANDOM_PROBES: usize = 64;

/// Contiguous block of assignable addresses parsed from CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    first: u128,
    last: u128,
    family: AddressFamily,
}

impl IpRange {
    /// Parse `addr/prefix`; host bits in `addr` are ignored
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRange` for malformed ranges
    pub fn parse(cidr: &str) -> AppResult<Self> {
        let invalid = || AppError::InvalidRange(cidr.to_string());
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let (value, bits, family) = match addr {
            IpAddr::V4(v4) => (u32::from(v4) as u128, 32u32, AddressFamily::Ipv4),
            IpAddr::V6(v6) => (u128::from(v6), 128u32, AddressFamily::Ipv6),
        };
        let prefix: u32 = match prefix {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => bits,
        };
        if prefix > bits {
            return Err(invalid());
        }

        let host_bits = bits - prefix;
        let host_mask: u128 = if host_bits == 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        };
        let mut first = value & !host_mask;
        let mut last = first | host_mask;
        if family == AddressFamily::Ipv4 && host_bits >= 2 {
            first += 1;
            last -= 1;
        }
        Ok(Self {
            first,
            last,
            family,
        })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Number of assignable addresses, saturating at `u128::MAX`
    pub fn size(&self) -> u128 {
        (self.last - self.first).saturating_add(1)
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (addr, self.family) {
            (IpAddr::V4(v4), AddressFamily::Ipv4) => {
                let v = u32::from(*v4) as u128;
                v >= self.first && v <= self.last
            }
            (IpAddr::V6(v6), AddressFamily::Ipv6) => {
                let v = u128::from(*v6);
                v >= self.first && v <= self.last
            }
            _ => false,
        }
    }

    fn addr_at(&self, value: u128) -> IpAddr {
        match self.family {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::from(value)),
        }
    }
}

/// Picks a free address from a range
pub trait PoolStrategy: Send + Sync {
    /// First address the strategy hands out that is not in `in_use`
    fn next_free(&self, range: &IpRange, in_use: &HashSet<IpAddr>) -> Option<IpAddr>;
}

/// Lowest free address first
pub struct Ascending;

/// Highest free address first
pub struct Descending;

/// Uniformly random free address
pub struct Random;

impl PoolStrategy for Ascending {
    fn next_free(&self, range: &IpRange, in_use: &HashSet<IpAddr>) -> Option<IpAddr> {
        let mut v = range.first;
        loop {
            let addr = range.addr_at(v);
            if !in_use.contains(&addr) {
                return Some(addr);
            }
            if v == range.last {
                return None;
            }
            v += 1;
        }
    }
}

impl PoolStrategy for Descending {
    fn next_free(&self, range: &IpRange, in_use: &HashSet<IpAddr>) -> Option<IpAddr> {
        let mut v = range.last;
        loop {
            let addr = range.addr_at(v);
            if !in_use.contains(&addr) {
                return Some(addr);
            }
            if v == range.first {
                return None;
            }
            v -= 1;
        }
    }
}

impl PoolStrategy for Random {
    fn next_free(&self, range: &IpRange, in_use: &HashSet<IpAddr>) -> Option<IpAddr> {
        let mut rng = rand::thread_rng();
        for _ in 0..RANDOM_PROBES {
            let addr = range.addr_at(rng.gen_range(range.first..=range.last));
            if !in_use.contains(&addr) {
                return Some(addr);
            }
        }
        Ascending.next_free(range, in_use)
    }
}

/// Strategy implementation for a pool's configured strategy
pub fn strategy_for(strategy: AllocationStrategy) -> &'static dyn PoolStrategy {
    match strategy {
        AllocationStrategy::Ascending => &Ascending,
        AllocationStrategy::Descending => &Descending,
        AllocationStrategy::Random => &Random,
    }
}

/// Parse a pool's range and check it against the pool's declared family
pub fn pool_range(pool: &IpPool) -> AppResult<IpRange> {
    let range = IpRange::parse(&pool.range)?;
    if range.family() != pool.family {
        return Err(AppError::InvalidRange(format!(
            "pool {} range {} does not match type {:?}",
            pool.id, pool.range, pool.family
        )));
    }
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_ranges() {
        let single = IpRange::parse("10.100.0.1/32").unwrap();
        assert_eq!(single.size(), 1);
        assert!(single.contains(&addr("10.100.0.1")));

        let block = IpRange::parse("192.168.122.0/30").unwrap();
        assert_eq!(block.size(), 2);
        assert!(!block.contains(&addr("192.168.122.0")));
        assert!(block.contains(&addr("192.168.122.2")));
        assert!(!block.contains(&addr("192.168.122.3")));

        let v6 = IpRange::parse("2001:db8::/126").unwrap();
        assert_eq!(v6.family(), AddressFamily::Ipv6);
        assert_eq!(v6.size(), 4);

        assert!(IpRange::parse("10.0.0.1/33").is_err());
        assert!(IpRange::parse("not-an-ip/24").is_err());
    }

    #[test]
    fn test_ascending_and_descending() {
        let range = IpRange::parse("192.168.122.0/29").unwrap();
        let mut in_use = HashSet::new();
        assert_eq!(Ascending.next_free(&range, &in_use), Some(addr("192.168.122.1")));
        assert_eq!(Descending.next_free(&range, &in_use), Some(addr("192.168.122.6")));

        in_use.insert(addr("192.168.122.1"));
        in_use.insert(addr("192.168.122.6"));
        assert_eq!(Ascending.next_free(&range, &in_use), Some(addr("192.168.122.2")));
        assert_eq!(Descending.next_free(&range, &in_use), Some(addr("192.168.122.5")));
    }

    #[test]
    fn test_exhausted_range() {
        let range = IpRange::parse("127.0.0.1/32").unwrap();
        let in_use = HashSet::from([addr("127.0.0.1")]);
        for strategy in [
            AllocationStrategy::Ascending,
            AllocationStrategy::Descending,
            AllocationStrategy::Random,
        ] {
            assert_eq!(strategy_for(strategy).next_free(&range, &in_use), None);
        }
    }

    #[test]
    fn test_random_stays_in_range() {
        let range = IpRange::parse("10.0.0.0/28").unwrap();
        let in_use = HashSet::from([addr("10.0.0.1")]);
        for _ in 0..50 {
            let picked = Random.next_free(&range, &in_use).unwrap();
            assert!(range.contains(&picked));
            assert_ne!(picked, addr("10.0.0.1"));
        }
    }

    #[test]
    fn test_pool_family_must_match() {
        let mut pool = IpPool::new("POOL1", "2001:db8::1/128");
        assert!(matches!(pool_range(&pool), Err(AppError::InvalidRange(_))));
        pool.family = AddressFamily::Ipv6;
        assert!(pool_range(&pool).is_ok());
    }
}
