use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dns_resolver::cache::InMemoryCache;
use dns_resolver::roots::{IpProtocol, RootServers};
use dns_resolver::{handle_query, Response};
use dns_types::protocol::types::{
    DomainName, QueryClass, QueryType, Question, RecordClass, RecordType, RecordTypeWithData,
    ResourceRecord,
};

/// TTL (and SOA MINIMUM) of the SOA records made up for negative
/// seeds.
const SEED_SOA_TTL: u32 = 300;

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        println!("{rr}");
    }
}

/// A record to put in the cache before asking the question, written
/// as "NAME TTL TYPE DATA".
#[derive(Debug, Clone, Eq, PartialEq)]
struct SeedRecord(ResourceRecord);

impl FromStr for SeedRecord {
    type Err = SeedRecordFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [name, ttl, rtype, data @ ..] = fields.as_slice() else {
            return Err(SeedRecordFromStr::WrongFieldCount);
        };

        let name = parse_name(name)?;
        let ttl = u32::from_str(ttl).map_err(|_| SeedRecordFromStr::BadTtl)?;
        let rtype = RecordType::from_str(rtype).map_err(|_| SeedRecordFromStr::BadType)?;

        let rtype_with_data = match (rtype, data) {
            (RecordType::A, [address]) => RecordTypeWithData::A {
                address: Ipv4Addr::from_str(address).map_err(|_| SeedRecordFromStr::BadData)?,
            },
            (RecordType::AAAA, [address]) => RecordTypeWithData::AAAA {
                address: Ipv6Addr::from_str(address).map_err(|_| SeedRecordFromStr::BadData)?,
            },
            (RecordType::NS, [nsdname]) => RecordTypeWithData::NS {
                nsdname: parse_name(nsdname)?,
            },
            (RecordType::CNAME, [cname]) => RecordTypeWithData::CNAME {
                cname: parse_name(cname)?,
            },
            (RecordType::SOA, [mname, rname, serial, refresh, retry, expire, minimum]) => {
                RecordTypeWithData::SOA {
                    mname: parse_name(mname)?,
                    rname: parse_name(rname)?,
                    serial: parse_u32(serial)?,
                    refresh: parse_u32(refresh)?,
                    retry: parse_u32(retry)?,
                    expire: parse_u32(expire)?,
                    minimum: parse_u32(minimum)?,
                }
            }
            (
                RecordType::A
                | RecordType::AAAA
                | RecordType::NS
                | RecordType::CNAME
                | RecordType::SOA,
                _,
            ) => return Err(SeedRecordFromStr::WrongFieldCount),
            (other, _) => return Err(SeedRecordFromStr::UnsupportedType(other)),
        };

        Ok(SeedRecord(ResourceRecord {
            name,
            rtype_with_data,
            rclass: RecordClass::IN,
            ttl,
        }))
    }
}

/// A name which doesn't exist, written as "NAME SOA-NAME".
#[derive(Debug, Clone, Eq, PartialEq)]
struct NxDomainSeed {
    name: DomainName,
    soa: ResourceRecord,
}

impl FromStr for NxDomainSeed {
    type Err = SeedRecordFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_whitespace().collect::<Vec<_>>().as_slice() {
            [name, apex] => Ok(NxDomainSeed {
                name: parse_name(name)?,
                soa: seed_soa(parse_name(apex)?),
            }),
            _ => Err(SeedRecordFromStr::WrongFieldCount),
        }
    }
}

/// A name with no records of one type, written as "NAME TYPE
/// SOA-NAME".
#[derive(Debug, Clone, Eq, PartialEq)]
struct NoDataSeed {
    name: DomainName,
    rtype: RecordType,
    soa: ResourceRecord,
}

impl FromStr for NoDataSeed {
    type Err = SeedRecordFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_whitespace().collect::<Vec<_>>().as_slice() {
            [name, rtype, apex] => Ok(NoDataSeed {
                name: parse_name(name)?,
                rtype: RecordType::from_str(rtype).map_err(|_| SeedRecordFromStr::BadType)?,
                soa: seed_soa(parse_name(apex)?),
            }),
            _ => Err(SeedRecordFromStr::WrongFieldCount),
        }
    }
}

/// Errors that can arise when parsing a seed from the command line.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum SeedRecordFromStr {
    WrongFieldCount,
    BadName,
    BadTtl,
    BadType,
    BadData,
    UnsupportedType(RecordType),
}

impl fmt::Display for SeedRecordFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SeedRecordFromStr::WrongFieldCount => write!(f, "wrong number of fields"),
            SeedRecordFromStr::BadName => write!(f, "could not parse domain name"),
            SeedRecordFromStr::BadTtl => write!(f, "TTL must be a u32"),
            SeedRecordFromStr::BadType => write!(f, "could not parse record type"),
            SeedRecordFromStr::BadData => write!(f, "could not parse record data"),
            SeedRecordFromStr::UnsupportedType(rtype) => {
                write!(f, "cannot seed {rtype} records")
            }
        }
    }
}

impl std::error::Error for SeedRecordFromStr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

fn parse_name(s: &str) -> Result<DomainName, SeedRecordFromStr> {
    DomainName::from_dotted_string(s).ok_or(SeedRecordFromStr::BadName)
}

fn parse_u32(s: &str) -> Result<u32, SeedRecordFromStr> {
    u32::from_str(s).map_err(|_| SeedRecordFromStr::BadData)
}

fn seed_soa(apex: DomainName) -> ResourceRecord {
    ResourceRecord {
        name: apex.clone(),
        rtype_with_data: RecordTypeWithData::SOA {
            mname: apex.clone(),
            rname: apex,
            serial: 1,
            refresh: 1800,
            retry: 900,
            expire: 604_800,
            minimum: SEED_SOA_TTL,
        },
        rclass: RecordClass::IN,
        ttl: SEED_SOA_TTL,
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// DNS resolution step utility
///
/// Fills a cache from the command line, then prints either the answer
/// the cache gives or the upstream query a recursive resolver would
/// make next.  Nothing is sent over the network.
struct Args {
    /// Domain name to resolve
    #[clap(value_parser)]
    domain: DomainName,

    /// Query type to resolve
    #[clap(default_value_t = QueryType::Record(RecordType::A), value_parser)]
    qtype: QueryType,

    /// Which address families upstream nameservers can be reached over: one
    /// of 'v4', 'v6', or 'both'
    #[clap(long, default_value_t = IpProtocol::V4Only, env = "DNSQ_IP_PROTOCOL", value_parser)]
    ip_protocol: IpProtocol,

    /// Cache a record, written as "NAME TTL TYPE DATA", can be specified more
    /// than once.  Supports A, AAAA, NS, CNAME, and SOA records
    #[clap(short, long, value_parser)]
    record: Vec<SeedRecord>,

    /// Cache that a name does not exist, written as "NAME SOA-NAME", can be
    /// specified more than once
    #[clap(long, value_parser)]
    nxdomain: Vec<NxDomainSeed>,

    /// Cache that a name has no records of a type, written as "NAME TYPE
    /// SOA-NAME", can be specified more than once
    #[clap(long, value_parser)]
    nodata: Vec<NoDataSeed>,

    /// Seed for choosing between nameservers, for repeatable output
    #[clap(long, value_parser)]
    seed: Option<u64>,

    /// Log in JSON, rather than the default human-readable format.  Setting
    /// RUST_LOG_FORMAT=json does the same
    #[clap(long, action(clap::ArgAction::SetTrue))]
    log_json: bool,
}

fn begin_logging(json: bool) {
    let json = json || std::env::var("RUST_LOG_FORMAT").is_ok_and(|format| format == "json");
    let logger = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env());

    if json {
        logger.json().init();
    } else {
        logger.init();
    }
}

fn main() {
    let args = Args::parse();

    begin_logging(args.log_json);

    let question = Question {
        name: args.domain,
        qtype: args.qtype,
        qclass: QueryClass::Record(RecordClass::IN),
    };

    let now = Instant::now();
    let mut cache = InMemoryCache::new();
    for SeedRecord(rr) in &args.record {
        cache.insert(now, rr);
    }
    for seed in &args.nxdomain {
        cache.insert_name_error(now, &seed.name, &seed.soa);
    }
    for seed in &args.nodata {
        cache.insert_no_data(now, &seed.name, seed.rtype, &seed.soa);
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    println!(";; QUESTION");
    println!("{}\t{}\t{}", question.name, question.qclass, question.qtype);

    let (metrics, response) = handle_query(
        &mut cache,
        &mut rng,
        &RootServers::iana(),
        args.ip_protocol,
        now,
        &question,
    );
    debug!(?metrics, "done");

    match response {
        Response::Reply(reply) => {
            println!("\n;; RCODE");
            println!("{}", reply.rcode());
            if reply.answers().is_empty() && reply.authority().is_empty() {
                println!("\n;; ANSWER");
                println!("; no records");
            }
            print_section("ANSWER", reply.answers());
            print_section("AUTHORITY", reply.authority());
        }
        Response::Query {
            zone,
            name,
            qtypes,
            ip,
        } => {
            println!("\n;; UPSTREAM");
            for qtype in qtypes {
                println!("{name}\tIN\t{qtype}\t@{ip}\t; nameserver for {zone}");
            }
        }
    }
}
