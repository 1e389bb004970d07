use std::net::IpAddr;
use tracing::{debug, trace, warn};

use dns_types::protocol::types::*;

use crate::cache::{Cache, CacheError, Lookup};
use crate::context::Context;
use crate::random::{choose, RandomSource};
use crate::roots::RootHints;

/// Where to send a query next.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Nearest {
    /// The closest usable nameserver has no known address: that has
    /// to be resolved first.
    NeedAddress(DomainName),
    /// Ask `ip`, which is a nameserver for `zone`.
    HaveIp { zone: DomainName, ip: IpAddr },
}

/// An upstream query for the caller to make.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Upstream {
    pub zone: DomainName,
    pub name: DomainName,
    pub qtypes: Vec<QueryType>,
    pub ip: IpAddr,
}

/// Find the closest zone to `name` which the cache has a nameserver
/// with a usable address for, working up towards the root.
///
/// A delegation whose nameserver lives inside the delegated zone but
/// has no cached address is skipped: looking that address up would
/// need the very nameserver we can't reach.  If nothing better is
/// known, the root hints are used.
///
/// # Panics
///
/// If there are no root hints for the IP protocol.
pub fn find_nearest_server<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    name: &DomainName,
) -> Nearest {
    let mut candidate = name.clone();
    loop {
        let nameservers = cached_nameservers(context, &candidate);
        if let Some(host) = choose(&mut *context.rng, &nameservers).cloned() {
            let addresses = cached_addresses(context, &host);
            if let Some(ip) = choose(&mut *context.rng, &addresses) {
                trace!(zone = %candidate, %host, %ip, "found nameserver");
                return Nearest::HaveIp {
                    zone: candidate,
                    ip: *ip,
                };
            }

            if !host.is_subdomain_of(&candidate) {
                debug!(zone = %candidate, %host, "need nameserver address");
                return Nearest::NeedAddress(host);
            }

            trace!(zone = %candidate, %host, "missing glue");
        }

        if let Some(parent) = candidate.parent() {
            trace!(from = %candidate, to = %parent, "ascending");
            context.metrics().zone_ascent();
            candidate = parent;
        } else {
            let ip = context.random_root();
            debug!(%ip, "using root hint");
            context.metrics().root_fallback();
            return Nearest::HaveIp {
                zone: candidate,
                ip,
            };
        }
    }
}

/// Work out which nameserver to send a query for `name` to, first
/// finding the addresses of any nameservers which aren't cached.
///
/// If that means resolving a nameserver's address, the returned
/// query is for that nameserver's address types rather than `qtype`,
/// so the caller should come back once the answer has been cached.
///
/// # Panics
///
/// If there are no root hints for the IP protocol.
pub fn resolve<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    name: &DomainName,
    qtype: QueryType,
) -> Upstream {
    let _span = tracing::error_span!("resolve", %name, %qtype).entered();

    let mut current = name.clone();
    let mut qtypes = vec![qtype];
    let mut visited = vec![name.clone()];
    loop {
        match find_nearest_server(context, &current) {
            Nearest::HaveIp { zone, ip } => {
                return Upstream {
                    zone,
                    name: current,
                    qtypes,
                    ip,
                };
            }
            Nearest::NeedAddress(host) => {
                if visited.contains(&host) {
                    warn!(%host, %current, "nameserver cycle, asking a root server");
                    let ip = context.random_root();
                    context.metrics().root_fallback();
                    return Upstream {
                        zone: DomainName::root_domain(),
                        name: current,
                        qtypes,
                        ip,
                    };
                }

                debug!(from = %current, to = %host, "resolving nameserver address");
                context.metrics().glue_redirect();
                visited.push(host.clone());
                current = host;
                qtypes = context
                    .ip_protocol
                    .address_types()
                    .into_iter()
                    .map(QueryType::Record)
                    .collect();
            }
        }
    }
}

/// The NS hostnames cached for `zone`.  Anything other than a
/// positive answer counts as none.
fn cached_nameservers<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    zone: &DomainName,
) -> Vec<DomainName> {
    match context.cache.get(context.now, zone, RecordType::NS) {
        Ok(Lookup::Entry { rrs, .. }) => {
            context.metrics().cache_hit();
            rrs.into_iter()
                .filter_map(|rr| match rr.rtype_with_data {
                    RecordTypeWithData::NS { nsdname } => Some(nsdname),
                    _ => None,
                })
                .collect()
        }
        Ok(Lookup::NoDomain(_) | Lookup::NoData(_) | Lookup::ServFail(_)) => {
            context.metrics().negative_hit();
            Vec::new()
        }
        Err(CacheError::Miss | CacheError::Drop) => {
            context.metrics().cache_miss();
            Vec::new()
        }
    }
}

/// The cached addresses of `host` allowed by the IP protocol, IPv4
/// first.
fn cached_addresses<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    host: &DomainName,
) -> Vec<IpAddr> {
    let mut addresses = Vec::new();
    for rtype in context.ip_protocol.address_types() {
        match context.cache.get(context.now, host, rtype) {
            Ok(Lookup::Entry { rrs, .. }) => {
                context.metrics().cache_hit();
                for rr in rrs {
                    match rr.rtype_with_data {
                        RecordTypeWithData::A { address } => addresses.push(IpAddr::V4(address)),
                        RecordTypeWithData::AAAA { address } => addresses.push(IpAddr::V6(address)),
                        _ => (),
                    }
                }
            }
            Ok(Lookup::NoDomain(_) | Lookup::NoData(_) | Lookup::ServFail(_)) => {
                context.metrics().negative_hit();
            }
            Err(CacheError::Miss | CacheError::Drop) => {
                context.metrics().cache_miss();
            }
        }
    }

    let ip_protocol = context.ip_protocol;
    addresses.retain(|ip| ip_protocol.allows(ip));
    addresses
}
