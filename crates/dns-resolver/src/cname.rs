use tracing::{trace, warn};

use dns_types::protocol::types::*;

use crate::cache::{AliasLookup, Cache, CacheError};
use crate::context::Context;
use crate::random::RandomSource;
use crate::roots::RootHints;

/// The records found while following an alias, keyed by owner name
/// in the order the names were reached.
///
/// A name which is already a key has been visited, so this is also
/// what loop detection checks.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CnameChain {
    links: Vec<(DomainName, Vec<ResourceRecord>)>,
}

impl CnameChain {
    /// A chain starting with `name` being an alias for `target`.
    pub fn new(name: &DomainName, ttl: u32, target: &DomainName) -> Self {
        Self {
            links: vec![(name.clone(), vec![alias_record(name, ttl, target)])],
        }
    }

    pub fn contains(&self, name: &DomainName) -> bool {
        self.links.iter().any(|(owner, _)| owner == name)
    }

    /// Add the records for `name` to the end of the chain.  `name`
    /// must not already be in the chain: check with `contains` first.
    pub fn record(&mut self, name: DomainName, rrs: Vec<ResourceRecord>) {
        self.links.push((name, rrs));
    }

    /// The number of names in the chain.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DomainName, &[ResourceRecord])> {
        self.links
            .iter()
            .map(|(owner, rrs)| (owner, rrs.as_slice()))
    }

    /// All the records, in chain order.
    pub fn into_records(self) -> Vec<ResourceRecord> {
        self.links.into_iter().flat_map(|(_, rrs)| rrs).collect()
    }
}

/// Where following an alias got to.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Chase {
    /// The cache doesn't know about this name in the chain.
    MustQuery(DomainName),
    /// The chain ended, well or badly.
    Done {
        rcode: Rcode,
        chain: CnameChain,
        authority: Vec<ResourceRecord>,
    },
}

/// Follow an alias through the cache: `name` is a CNAME for `target`
/// with TTL `ttl`, and the client asked for `qtype`.
///
/// A chain which loops back on itself ends successfully with what it
/// has found so far.
pub fn follow_cname<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    name: &DomainName,
    ttl: u32,
    target: &DomainName,
    qtype: RecordType,
) -> Chase {
    let _span = tracing::error_span!("follow_cname", %name, %target, %qtype).entered();

    let mut chain = CnameChain::new(name, ttl, target);
    context.metrics().cname_hop();

    let mut current = target.clone();
    loop {
        if chain.contains(&current) {
            warn!(%current, hops = %chain.len(), "CNAME loop");
            context.metrics().cname_loop();
            return Chase::Done {
                rcode: Rcode::NoError,
                chain,
                authority: Vec::new(),
            };
        }

        match context.cache.get_or_alias(context.now, &current, qtype) {
            Ok(AliasLookup::Alias { ttl, target: next }) => {
                trace!(from = %current, to = %next, "following CNAME");
                context.metrics().cache_hit();
                context.metrics().cname_hop();
                let rr = alias_record(&current, ttl, &next);
                chain.record(current, vec![rr]);
                current = next;
            }
            Ok(AliasLookup::Entry { rrs, .. }) => {
                context.metrics().cache_hit();
                chain.record(current, rrs);
                return Chase::Done {
                    rcode: Rcode::NoError,
                    chain,
                    authority: Vec::new(),
                };
            }
            Ok(AliasLookup::NoDomain(soa)) => {
                context.metrics().negative_hit();
                return Chase::Done {
                    rcode: Rcode::NameError,
                    chain,
                    authority: vec![soa],
                };
            }
            Ok(AliasLookup::NoData(soa)) => {
                context.metrics().negative_hit();
                return Chase::Done {
                    rcode: Rcode::NoError,
                    chain,
                    authority: vec![soa],
                };
            }
            Ok(AliasLookup::ServFail(soa)) => {
                context.metrics().negative_hit();
                return Chase::Done {
                    rcode: Rcode::ServerFailure,
                    chain,
                    authority: vec![soa],
                };
            }
            Err(CacheError::Miss | CacheError::Drop) => {
                trace!(%current, "CNAME target not cached");
                context.metrics().cache_miss();
                return Chase::MustQuery(current);
            }
        }
    }
}

pub fn alias_record(name: &DomainName, ttl: u32, target: &DomainName) -> ResourceRecord {
    ResourceRecord {
        name: name.clone(),
        rtype_with_data: RecordTypeWithData::CNAME {
            cname: target.clone(),
        },
        rclass: RecordClass::IN,
        ttl,
    }
}

#[cfg(test)]
mod tests {
    use dns_types::protocol::types::test_util::*;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::cache::InMemoryCache;
    use crate::metrics::Metrics;
    use crate::roots::IpProtocol;
    use crate::test_util::*;

    fn chase(cache: &mut InMemoryCache, now: Instant, name: &str, target: &str) -> (Metrics, Chase) {
        let mut rng = FixedChoice(0);
        let roots = test_roots();
        let mut context = Context::new(cache, &mut rng, &roots, IpProtocol::V4Only, now);
        let chase = follow_cname(
            &mut context,
            &domain(name),
            300,
            &domain(target),
            RecordType::A,
        );
        (context.done(), chase)
    }

    #[test]
    fn follow_cname_uncached_target_must_query() {
        let now = Instant::now();
        let (_, result) = chase(&mut InMemoryCache::new(), now, "a.example.com.", "b.example.com.");

        assert_eq!(Chase::MustQuery(domain("b.example.com.")), result);
    }

    #[test]
    fn follow_cname_reaches_answer() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[a_record("b.example.com.", Ipv4Addr::new(1, 1, 1, 1))],
        );

        match chase(&mut cache, now, "a.example.com.", "b.example.com.").1 {
            Chase::Done {
                rcode,
                chain,
                authority,
            } => {
                assert_eq!(Rcode::NoError, rcode);
                assert!(authority.is_empty());
                assert_eq!(
                    vec![
                        cname_record("a.example.com.", "b.example.com."),
                        a_record("b.example.com.", Ipv4Addr::new(1, 1, 1, 1)),
                    ],
                    chain.into_records()
                );
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn follow_cname_follows_several_hops() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[
                cname_record("b.example.com.", "c.example.com."),
                cname_record("c.example.com.", "d.example.com."),
            ],
        );

        let (metrics, result) = chase(&mut cache, now, "a.example.com.", "b.example.com.");
        assert_eq!(Chase::MustQuery(domain("d.example.com.")), result);
        assert_eq!(3, metrics.cname_hops);
    }

    #[test]
    fn follow_cname_terminates_on_loop() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[
                cname_record("a.example.com.", "b.example.com."),
                cname_record("b.example.com.", "a.example.com."),
            ],
        );

        let (metrics, result) = chase(&mut cache, now, "a.example.com.", "b.example.com.");
        match result {
            Chase::Done {
                rcode,
                chain,
                authority,
            } => {
                assert_eq!(Rcode::NoError, rcode);
                assert!(authority.is_empty());
                assert_eq!(2, chain.len());
                assert_eq!(
                    vec![domain("a.example.com."), domain("b.example.com.")],
                    chain.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>()
                );
            }
            other => panic!("expected done, got {other:?}"),
        }
        assert_eq!(1, metrics.cname_loops);
    }

    #[test]
    fn follow_cname_self_loop_terminates() {
        let now = Instant::now();
        let mut cache = cache_with(now, &[cname_record("a.example.com.", "a.example.com.")]);

        match chase(&mut cache, now, "a.example.com.", "a.example.com.").1 {
            Chase::Done { rcode, chain, .. } => {
                assert_eq!(Rcode::NoError, rcode);
                assert_eq!(1, chain.len());
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn follow_cname_negative_target() {
        let now = Instant::now();
        let soa = soa_record("example.com.");
        for (rcode, insert) in [
            (Rcode::NameError, 0),
            (Rcode::NoError, 1),
            (Rcode::ServerFailure, 2),
        ] {
            let mut cache = InMemoryCache::new();
            let target = domain("b.example.com.");
            match insert {
                0 => cache.insert_name_error(now, &target, &soa),
                1 => cache.insert_no_data(now, &target, RecordType::A, &soa),
                _ => cache.insert_server_failure(now, &target, RecordType::A, &soa),
            }

            assert_eq!(
                Chase::Done {
                    rcode,
                    chain: CnameChain::new(&domain("a.example.com."), 300, &target),
                    authority: vec![soa.clone()],
                },
                chase(&mut cache, now, "a.example.com.", "b.example.com.").1
            );
        }
    }

    #[test]
    fn follow_cname_expired_target_must_query() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[ResourceRecord {
                ttl: 5,
                ..a_record("b.example.com.", Ipv4Addr::new(1, 1, 1, 1))
            }],
        );

        let (metrics, result) = chase(
            &mut cache,
            now + Duration::from_secs(10),
            "a.example.com.",
            "b.example.com.",
        );
        assert_eq!(Chase::MustQuery(domain("b.example.com.")), result);
        assert_eq!(1, metrics.cache_misses);
    }

    #[test]
    fn chain_records_names_in_order() {
        let a = domain("a.example.com.");
        let b = domain("b.example.com.");
        let c = domain("c.example.com.");
        let mut chain = CnameChain::new(&a, 300, &b);
        chain.record(b.clone(), vec![alias_record(&b, 300, &c)]);
        chain.record(
            c.clone(),
            vec![a_record("c.example.com.", Ipv4Addr::new(1, 1, 1, 1))],
        );

        assert_eq!(3, chain.len());
        assert!(chain.contains(&b));
        assert!(!chain.contains(&domain("d.example.com.")));
        assert_eq!(
            vec![a, b, c],
            chain.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![
                cname_record("a.example.com.", "b.example.com."),
                cname_record("b.example.com.", "c.example.com."),
                a_record("c.example.com.", Ipv4Addr::new(1, 1, 1, 1)),
            ],
            chain.into_records()
        );
    }
}
