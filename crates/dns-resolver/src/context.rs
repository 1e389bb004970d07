use std::net::IpAddr;
use std::time::Instant;

use crate::cache::Cache;
use crate::metrics::Metrics;
use crate::random::{choose, RandomSource};
use crate::roots::{IpProtocol, RootHints};

const NO_ROOT_HINTS_MESSAGE: &str =
    "[INTERNAL ERROR] no root nameservers for the configured IP protocol - aborting";

/// Everything one query needs.  Built per query and dropped once it
/// has been answered.
pub struct Context<'a, C, R, H> {
    // global context
    pub cache: &'a mut C,
    pub rng: &'a mut R,
    pub roots: &'a H,
    pub ip_protocol: IpProtocol,
    // request state
    pub now: Instant,
    metrics: Metrics,
}

impl<'a, C: Cache, R: RandomSource, H: RootHints> Context<'a, C, R, H> {
    pub fn new(
        cache: &'a mut C,
        rng: &'a mut R,
        roots: &'a H,
        ip_protocol: IpProtocol,
        now: Instant,
    ) -> Self {
        Self {
            cache,
            rng,
            roots,
            ip_protocol,
            now,
            metrics: Metrics::new(),
        }
    }

    pub fn metrics(&mut self) -> &mut Metrics {
        &mut self.metrics
    }

    pub fn done(self) -> Metrics {
        self.metrics
    }

    /// A root nameserver address, chosen at random.
    ///
    /// # Panics
    ///
    /// If there are no root hints for the IP protocol.
    pub fn random_root(&mut self) -> IpAddr {
        let ips = self.roots.root_server_ips(self.ip_protocol);
        match choose(&mut *self.rng, &ips) {
            Some(ip) => *ip,
            None => panic!("{}", NO_ROOT_HINTS_MESSAGE),
        }
    }
}
