#![warn(clippy::pedantic)]
// TODO: fix
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

pub mod answer;
pub mod cache;
pub mod cname;
pub mod context;
pub mod metrics;
pub mod nearest;
pub mod random;
pub mod roots;

#[cfg(test)]
mod test_util;

use std::net::IpAddr;
use std::time::Instant;
use tracing::debug;

use dns_types::protocol::types::{DomainName, QueryType, Question};

use self::answer::{answer, Answer, Reply};
use self::cache::Cache;
use self::context::Context;
use self::metrics::Metrics;
use self::nearest::{resolve, Upstream};
use self::random::RandomSource;
use self::roots::{IpProtocol, RootHints};

/// What to do about a question.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Response {
    /// Send this back to the client.
    Reply(Reply),
    /// Query `ip`, a nameserver for `zone`, about `name` with each of
    /// `qtypes`, cache what comes back, and then ask again.
    Query {
        zone: DomainName,
        name: DomainName,
        qtypes: Vec<QueryType>,
        ip: IpAddr,
    },
}

impl From<Upstream> for Response {
    fn from(upstream: Upstream) -> Self {
        Response::Query {
            zone: upstream.zone,
            name: upstream.name,
            qtypes: upstream.qtypes,
            ip: upstream.ip,
        }
    }
}

/// Answer a question from the cache, or work out which upstream
/// nameserver to ask next.
///
/// Nothing is sent over the network: the caller makes the query,
/// caches the result, and calls this again.  Only the cache's own
/// bookkeeping changes between calls with the same `now`, so asking
/// twice gives the same response.
///
/// # Panics
///
/// If there are no root hints for the IP protocol.
pub fn handle_query<C: Cache, R: RandomSource, H: RootHints>(
    cache: &mut C,
    rng: &mut R,
    roots: &H,
    ip_protocol: IpProtocol,
    now: Instant,
    question: &Question,
) -> (Metrics, Response) {
    let _span = tracing::error_span!("handle_query", %question).entered();

    let mut context = Context::new(cache, rng, roots, ip_protocol, now);
    let response = match answer(&mut context, question) {
        Answer::Reply(reply) => Response::Reply(reply),
        Answer::MustQuery(name) => {
            debug!(%name, "must query upstream");
            Response::from(resolve(&mut context, &name, question.qtype))
        }
    };

    (context.done(), response)
}
