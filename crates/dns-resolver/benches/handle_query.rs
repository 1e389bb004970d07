use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::Ipv4Addr;
use std::time::Instant;

use dns_resolver::cache::InMemoryCache;
use dns_resolver::handle_query;
use dns_resolver::roots::{IpProtocol, RootServers};
use dns_types::protocol::types::*;

#[allow(non_snake_case)]
fn bench__handle_query__hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_query/hit");
    for size in [1, 100, 1000] {
        let now = Instant::now();
        let (rrs, questions) = make_rrs(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rrs, |b, rrs| {
            b.iter_batched(
                || build_cache(now, size, rrs),
                |mut cache| {
                    let mut rng = StdRng::seed_from_u64(0);
                    let roots = RootServers::iana();
                    for question in &questions {
                        handle_query(
                            &mut cache,
                            &mut rng,
                            &roots,
                            IpProtocol::V4Only,
                            now,
                            question,
                        );
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

#[allow(non_snake_case)]
fn bench__handle_query__miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_query/miss");
    for size in [1, 100, 1000] {
        let now = Instant::now();
        let (rrs, _) = make_rrs(size);
        let question = Question {
            name: DomainName::from_dotted_string(
                "name.which.is.unlikely.to.coincidentally.be.cached.",
            )
            .unwrap(),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        };
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rrs, |b, rrs| {
            b.iter_batched(
                || build_cache(now, size, rrs),
                |mut cache| {
                    let mut rng = StdRng::seed_from_u64(0);
                    let roots = RootServers::iana();
                    for _ in 0..size {
                        handle_query(
                            &mut cache,
                            &mut rng,
                            &roots,
                            IpProtocol::V4Only,
                            now,
                            &question,
                        );
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn build_cache(now: Instant, size: usize, rrs: &[ResourceRecord]) -> InMemoryCache {
    let mut cache = InMemoryCache::with_desired_size(size);
    cache.insert_all(now, rrs);
    cache
}

/// Half the names are aliases for the other half, so half the
/// questions have to follow a CNAME.
fn make_rrs(size: usize) -> (Vec<ResourceRecord>, Vec<Question>) {
    let mut rrs = Vec::with_capacity(size);
    let mut questions = Vec::with_capacity(size);

    for i in 0..size {
        let name1 = DomainName::from_dotted_string(&format!("www-{:?}.source.example.com.", i / 2))
            .unwrap();
        let name2 = DomainName::from_dotted_string(&format!("www-{:?}.target.example.com.", i / 2))
            .unwrap();

        if i % 2 == 0 {
            questions.push(Question {
                name: name1.clone(),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            });
            rrs.push(ResourceRecord {
                name: name1,
                rtype_with_data: RecordTypeWithData::CNAME { cname: name2 },
                rclass: RecordClass::IN,
                ttl: 300,
            });
        } else {
            questions.push(Question {
                name: name2.clone(),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            });
            rrs.push(ResourceRecord {
                name: name2,
                rtype_with_data: RecordTypeWithData::A {
                    address: Ipv4Addr::new(192, 0, 2, (i % 256) as u8),
                },
                rclass: RecordClass::IN,
                ttl: 300,
            });
        };
    }

    (rrs, questions)
}

criterion_group!(benches, bench__handle_query__hit, bench__handle_query__miss);
criterion_main!(benches);
