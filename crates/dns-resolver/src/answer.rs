use tracing::trace;

use dns_types::protocol::types::*;

use crate::cache::{AliasLookup, AnyLookup, Cache, CacheError};
use crate::cname::{alias_record, follow_cname, Chase};
use crate::context::Context;
use crate::random::RandomSource;
use crate::roots::RootHints;

/// What the cache alone can say about a question.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Answer {
    Reply(Reply),
    /// The cache can't answer: this name has to be asked about
    /// upstream.  It may be a name partway along an alias chain.
    MustQuery(DomainName),
}

/// A response to send back to the client.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reply {
    pub flags: Flags,
    pub body: Body,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Flags {
    pub recursion_desired: bool,
    /// Whether it is worth looking for additional records (such as
    /// glue) to go with the answer.
    pub additional_processing: bool,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Sections {
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
}

impl Sections {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty() && self.authority.is_empty()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Body {
    /// A `NoError` response, which may still be a NODATA.
    Answer(Sections),
    /// Any other response code.  There are no sections if they would
    /// both be empty.
    RcodeError {
        rcode: Rcode,
        opcode: Opcode,
        sections: Option<Sections>,
    },
}

impl Reply {
    /// Shape a response.  Only `NoError` responses ask for additional
    /// processing.
    pub fn new(rcode: Rcode, answers: Vec<ResourceRecord>, authority: Vec<ResourceRecord>) -> Self {
        let flags = Flags {
            recursion_desired: true,
            additional_processing: rcode == Rcode::NoError,
        };

        let sections = Sections { answers, authority };
        let body = if rcode == Rcode::NoError {
            Body::Answer(sections)
        } else {
            Body::RcodeError {
                rcode,
                opcode: Opcode::Standard,
                sections: if sections.is_empty() {
                    None
                } else {
                    Some(sections)
                },
            }
        };

        Self { flags, body }
    }

    pub fn rcode(&self) -> Rcode {
        match &self.body {
            Body::Answer(_) => Rcode::NoError,
            Body::RcodeError { rcode, .. } => *rcode,
        }
    }

    pub fn answers(&self) -> &[ResourceRecord] {
        match &self.body {
            Body::Answer(sections)
            | Body::RcodeError {
                sections: Some(sections),
                ..
            } => &sections.answers,
            Body::RcodeError { sections: None, .. } => &[],
        }
    }

    pub fn authority(&self) -> &[ResourceRecord] {
        match &self.body {
            Body::Answer(sections)
            | Body::RcodeError {
                sections: Some(sections),
                ..
            } => &sections.authority,
            Body::RcodeError { sections: None, .. } => &[],
        }
    }

    /// Turn this into a response to `request`.
    pub fn to_response(&self, request: &Message) -> Message {
        let mut response = request.make_response();
        response.header.recursion_desired = self.flags.recursion_desired;
        response.header.rcode = self.rcode();
        response.answers = self.answers().to_vec();
        response.authority = self.authority().to_vec();
        response
    }
}

/// Answer a question from the cache, following aliases, or say what
/// needs to be asked upstream.
///
/// Zone transfers and mailbox queries are not implemented.
pub fn answer<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    question: &Question,
) -> Answer {
    let _span = tracing::error_span!("answer", %question).entered();

    match question.qtype {
        QueryType::Wildcard => answer_any(context, &question.name),
        QueryType::Record(rtype) => answer_record(context, &question.name, rtype),
        QueryType::AXFR | QueryType::MAILA | QueryType::MAILB => {
            Answer::Reply(Reply::new(Rcode::NotImplemented, Vec::new(), Vec::new()))
        }
    }
}

fn answer_any<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    name: &DomainName,
) -> Answer {
    match context.cache.get_any(context.now, name) {
        Ok(AnyLookup::Entries(entries)) => {
            context.metrics().cache_hit();
            let answers = entries.into_values().flatten().collect();
            Answer::Reply(Reply::new(Rcode::NoError, answers, Vec::new()))
        }
        Ok(AnyLookup::NoDomain(soa)) => {
            context.metrics().negative_hit();
            Answer::Reply(Reply::new(Rcode::NameError, Vec::new(), vec![soa]))
        }
        Err(CacheError::Miss | CacheError::Drop) => {
            trace!(%name, "cache miss");
            context.metrics().cache_miss();
            Answer::MustQuery(name.clone())
        }
    }
}

fn answer_record<C: Cache, R: RandomSource, H: RootHints>(
    context: &mut Context<'_, C, R, H>,
    name: &DomainName,
    rtype: RecordType,
) -> Answer {
    match context.cache.get_or_alias(context.now, name, rtype) {
        Ok(AliasLookup::Entry { rrs, .. }) => {
            context.metrics().cache_hit();
            Answer::Reply(Reply::new(Rcode::NoError, rrs, Vec::new()))
        }
        Ok(AliasLookup::Alias { ttl, target }) => {
            context.metrics().cache_hit();
            if rtype == RecordType::CNAME {
                let rr = alias_record(name, ttl, &target);
                return Answer::Reply(Reply::new(Rcode::NoError, vec![rr], Vec::new()));
            }

            match follow_cname(context, name, ttl, &target, rtype) {
                Chase::Done {
                    rcode,
                    chain,
                    authority,
                } => Answer::Reply(Reply::new(rcode, chain.into_records(), authority)),
                Chase::MustQuery(next) => Answer::MustQuery(next),
            }
        }
        Ok(AliasLookup::NoDomain(soa)) => {
            context.metrics().negative_hit();
            Answer::Reply(Reply::new(Rcode::NameError, Vec::new(), vec![soa]))
        }
        Ok(AliasLookup::NoData(soa)) => {
            context.metrics().negative_hit();
            Answer::Reply(Reply::new(Rcode::NoError, Vec::new(), vec![soa]))
        }
        Ok(AliasLookup::ServFail(soa)) => {
            context.metrics().negative_hit();
            Answer::Reply(Reply::new(Rcode::ServerFailure, Vec::new(), vec![soa]))
        }
        Err(CacheError::Miss | CacheError::Drop) => {
            trace!(%name, %rtype, "cache miss");
            context.metrics().cache_miss();
            Answer::MustQuery(name.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use dns_types::protocol::types::test_util::*;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::cache::InMemoryCache;
    use crate::roots::IpProtocol;
    use crate::test_util::*;

    fn ask(cache: &mut InMemoryCache, now: Instant, name: &str, qtype: QueryType) -> Answer {
        let mut rng = FixedChoice(0);
        let roots = test_roots();
        let mut context = Context::new(cache, &mut rng, &roots, IpProtocol::V4Only, now);
        answer(
            &mut context,
            &Question {
                name: domain(name),
                qtype,
                qclass: QueryClass::Record(RecordClass::IN),
            },
        )
    }

    fn reply(answer: Answer) -> Reply {
        match answer {
            Answer::Reply(reply) => reply,
            Answer::MustQuery(name) => panic!("expected reply, got must query {name}"),
        }
    }

    const A: QueryType = QueryType::Record(RecordType::A);

    #[test]
    fn answer_fresh_entry() {
        let now = Instant::now();
        let rr = a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1));
        let mut cache = cache_with(now, &[rr.clone()]);

        let reply = reply(ask(&mut cache, now, "www.example.com.", A));
        assert!(reply.flags.recursion_desired);
        assert!(reply.flags.additional_processing);
        assert_eq!(
            Body::Answer(Sections {
                answers: vec![rr],
                authority: Vec::new(),
            }),
            reply.body
        );
    }

    #[test]
    fn answer_miss_must_query_for_every_type() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[a_record("other.example.com.", Ipv4Addr::new(1, 1, 1, 1))],
        );

        for qtype in [
            A,
            QueryType::Record(RecordType::AAAA),
            QueryType::Record(RecordType::CNAME),
            QueryType::Record(RecordType::NS),
            QueryType::Wildcard,
        ] {
            assert_eq!(
                Answer::MustQuery(domain("www.example.com.")),
                ask(&mut cache, now, "www.example.com.", qtype)
            );
        }
    }

    #[test]
    fn answer_expired_must_query() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1))],
        );

        assert_eq!(
            Answer::MustQuery(domain("www.example.com.")),
            ask(
                &mut cache,
                now + Duration::from_secs(301),
                "www.example.com.",
                A
            )
        );
    }

    #[test]
    fn answer_name_error() {
        let now = Instant::now();
        let soa = soa_record("example.com.");
        let mut cache = InMemoryCache::new();
        cache.insert_name_error(now, &domain("nx.example.com."), &soa);

        for qtype in [A, QueryType::Wildcard] {
            let reply = reply(ask(&mut cache, now, "nx.example.com.", qtype));
            assert!(reply.flags.recursion_desired);
            assert!(!reply.flags.additional_processing);
            assert_eq!(
                Body::RcodeError {
                    rcode: Rcode::NameError,
                    opcode: Opcode::Standard,
                    sections: Some(Sections {
                        answers: Vec::new(),
                        authority: vec![soa.clone()],
                    }),
                },
                reply.body
            );
        }
    }

    #[test]
    fn answer_no_data_keeps_additional_processing() {
        let now = Instant::now();
        let soa = soa_record("example.com.");
        let mut cache = InMemoryCache::new();
        cache.insert_no_data(now, &domain("www.example.com."), RecordType::A, &soa);

        let reply = reply(ask(&mut cache, now, "www.example.com.", A));
        assert!(reply.flags.additional_processing);
        assert_eq!(
            Body::Answer(Sections {
                answers: Vec::new(),
                authority: vec![soa],
            }),
            reply.body
        );
    }

    #[test]
    fn answer_server_failure() {
        let now = Instant::now();
        let soa = soa_record("example.com.");
        let mut cache = InMemoryCache::new();
        cache.insert_server_failure(now, &domain("www.example.com."), RecordType::A, &soa);

        let reply = reply(ask(&mut cache, now, "www.example.com.", A));
        assert!(!reply.flags.additional_processing);
        assert_eq!(Rcode::ServerFailure, reply.rcode());
        assert_eq!(&[soa], reply.authority());
    }

    #[test]
    fn answer_cname_query_gets_alias_directly() {
        let now = Instant::now();
        let rr = cname_record("www.example.com.", "target.example.com.");
        let mut cache = cache_with(
            now,
            &[
                rr.clone(),
                a_record("target.example.com.", Ipv4Addr::new(1, 1, 1, 1)),
            ],
        );

        let reply = reply(ask(
            &mut cache,
            now,
            "www.example.com.",
            QueryType::Record(RecordType::CNAME),
        ));
        assert_eq!(Rcode::NoError, reply.rcode());
        assert_eq!(&[rr], reply.answers());
    }

    #[test]
    fn answer_follows_alias() {
        let now = Instant::now();
        let cname = cname_record("www.example.com.", "target.example.com.");
        let a = a_record("target.example.com.", Ipv4Addr::new(1, 1, 1, 1));
        let mut cache = cache_with(now, &[cname.clone(), a.clone()]);

        let reply = reply(ask(&mut cache, now, "www.example.com.", A));
        assert_eq!(Rcode::NoError, reply.rcode());
        assert_eq!(&[cname, a], reply.answers());
    }

    #[test]
    fn answer_alias_to_uncached_must_query_target() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[cname_record("www.example.com.", "target.example.com.")],
        );

        assert_eq!(
            Answer::MustQuery(domain("target.example.com.")),
            ask(&mut cache, now, "www.example.com.", A)
        );
    }

    #[test]
    fn answer_alias_to_name_error() {
        let now = Instant::now();
        let soa = soa_record("example.com.");
        let cname = cname_record("www.example.com.", "target.example.com.");
        let mut cache = cache_with(now, &[cname.clone()]);
        cache.insert_name_error(now, &domain("target.example.com."), &soa);

        let reply = reply(ask(&mut cache, now, "www.example.com.", A));
        assert!(!reply.flags.additional_processing);
        assert_eq!(
            Body::RcodeError {
                rcode: Rcode::NameError,
                opcode: Opcode::Standard,
                sections: Some(Sections {
                    answers: vec![cname],
                    authority: vec![soa],
                }),
            },
            reply.body
        );
    }

    #[test]
    fn answer_alias_loop_is_no_error() {
        let now = Instant::now();
        let mut cache = cache_with(
            now,
            &[
                cname_record("a.example.com.", "b.example.com."),
                cname_record("b.example.com.", "a.example.com."),
            ],
        );

        let reply = reply(ask(&mut cache, now, "a.example.com.", A));
        assert_eq!(Rcode::NoError, reply.rcode());
        assert_eq!(2, reply.answers().len());
        assert!(reply.authority().is_empty());
    }

    #[test]
    fn answer_any_gives_every_rrset() {
        let now = Instant::now();
        let a = a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1));
        let ns = ns_record("www.example.com.", "ns1.example.com.");
        let mut cache = cache_with(now, &[ns.clone(), a.clone()]);

        let reply = reply(ask(&mut cache, now, "www.example.com.", QueryType::Wildcard));
        assert_eq!(Rcode::NoError, reply.rcode());
        assert_eq!(&[a, ns], reply.answers());
    }

    #[test]
    fn answer_zone_transfer_not_implemented() {
        for qtype in [QueryType::AXFR, QueryType::MAILA, QueryType::MAILB] {
            let reply = reply(ask(
                &mut InMemoryCache::new(),
                Instant::now(),
                "example.com.",
                qtype,
            ));
            assert_eq!(
                Body::RcodeError {
                    rcode: Rcode::NotImplemented,
                    opcode: Opcode::Standard,
                    sections: None,
                },
                reply.body
            );
        }
    }

    #[test]
    fn reply_to_response_fills_message() {
        let soa = soa_record("example.com.");
        let request = Message::from_question(
            1234,
            Question {
                name: domain("nx.example.com."),
                qtype: A,
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );

        let response =
            Reply::new(Rcode::NameError, Vec::new(), vec![soa.clone()]).to_response(&request);
        assert_eq!(1234, response.header.id);
        assert!(response.header.is_response);
        assert!(response.header.recursion_desired);
        assert_eq!(Rcode::NameError, response.header.rcode);
        assert_eq!(request.questions, response.questions);
        assert!(response.answers.is_empty());
        assert_eq!(vec![soa], response.authority);
    }
}
