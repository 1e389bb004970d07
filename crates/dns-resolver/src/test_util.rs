use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use dns_types::protocol::types::ResourceRecord;

use crate::cache::InMemoryCache;
use crate::random::RandomSource;
use crate::roots::RootServers;

/// A random source which always picks the same index.
#[derive(Debug, Copy, Clone)]
pub struct FixedChoice(pub usize);

impl RandomSource for FixedChoice {
    fn uniform_choice(&mut self, _n: usize) -> usize {
        self.0
    }
}

pub fn test_roots() -> RootServers {
    RootServers::new(
        vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
        vec![Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)],
    )
}

pub fn cache_with(now: Instant, rrs: &[ResourceRecord]) -> InMemoryCache {
    let mut cache = InMemoryCache::new();
    cache.insert_all(now, rrs);
    cache
}
