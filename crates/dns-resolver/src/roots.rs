use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use dns_types::protocol::types::RecordType;

/// Which address families to use when talking to upstream
/// nameservers.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IpProtocol {
    #[default]
    V4Only,
    V6Only,
    Both,
}

impl IpProtocol {
    /// The record types to ask for when all we want is an address.
    /// IPv4 comes first.
    pub fn address_types(self) -> Vec<RecordType> {
        match self {
            IpProtocol::V4Only => vec![RecordType::A],
            IpProtocol::V6Only => vec![RecordType::AAAA],
            IpProtocol::Both => vec![RecordType::A, RecordType::AAAA],
        }
    }

    pub fn allows(self, address: &IpAddr) -> bool {
        match (self, address) {
            (IpProtocol::Both, _)
            | (IpProtocol::V4Only, IpAddr::V4(_))
            | (IpProtocol::V6Only, IpAddr::V6(_)) => true,
            (IpProtocol::V4Only, IpAddr::V6(_)) | (IpProtocol::V6Only, IpAddr::V4(_)) => false,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpProtocol::V4Only => write!(f, "v4"),
            IpProtocol::V6Only => write!(f, "v6"),
            IpProtocol::Both => write!(f, "both"),
        }
    }
}

impl FromStr for IpProtocol {
    type Err = IpProtocolFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v4" => Ok(IpProtocol::V4Only),
            "v6" => Ok(IpProtocol::V6Only),
            "both" => Ok(IpProtocol::Both),
            _ => Err(IpProtocolFromStr::NoParse),
        }
    }
}

/// Errors that can arise when converting a `&str` into an
/// `IpProtocol`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IpProtocolFromStr {
    NoParse,
}

impl fmt::Display for IpProtocolFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected one of 'v4', 'v6', or 'both'")
    }
}

impl std::error::Error for IpProtocolFromStr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Where resolution starts when the cache knows nothing better.
pub trait RootHints {
    /// The root nameserver addresses usable under the given
    /// preference.  This must not be empty.
    fn root_server_ips(&self, ip_protocol: IpProtocol) -> Vec<IpAddr>;
}

/// A static table of root nameserver addresses.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RootServers {
    pub v4: Vec<Ipv4Addr>,
    pub v6: Vec<Ipv6Addr>,
}

impl RootServers {
    pub fn new(v4: Vec<Ipv4Addr>, v6: Vec<Ipv6Addr>) -> Self {
        Self { v4, v6 }
    }

    /// The IANA root servers, a.root-servers.net through
    /// m.root-servers.net.
    pub fn iana() -> Self {
        Self {
            v4: vec![
                Ipv4Addr::new(198, 41, 0, 4),
                Ipv4Addr::new(199, 9, 14, 201),
                Ipv4Addr::new(192, 33, 4, 12),
                Ipv4Addr::new(199, 7, 91, 13),
                Ipv4Addr::new(192, 203, 230, 10),
                Ipv4Addr::new(192, 5, 5, 241),
                Ipv4Addr::new(192, 112, 36, 4),
                Ipv4Addr::new(198, 97, 190, 53),
                Ipv4Addr::new(192, 36, 148, 17),
                Ipv4Addr::new(192, 58, 128, 30),
                Ipv4Addr::new(193, 0, 14, 129),
                Ipv4Addr::new(199, 7, 83, 42),
                Ipv4Addr::new(202, 12, 27, 33),
            ],
            v6: vec![
                Ipv6Addr::new(0x2001, 0x503, 0xba3e, 0, 0, 0, 0x2, 0x30),
                Ipv6Addr::new(0x2001, 0x500, 0x200, 0, 0, 0, 0, 0xb),
                Ipv6Addr::new(0x2001, 0x500, 0x2, 0, 0, 0, 0, 0xc),
                Ipv6Addr::new(0x2001, 0x500, 0x2d, 0, 0, 0, 0, 0xd),
                Ipv6Addr::new(0x2001, 0x500, 0xa8, 0, 0, 0, 0, 0xe),
                Ipv6Addr::new(0x2001, 0x500, 0x2f, 0, 0, 0, 0, 0xf),
                Ipv6Addr::new(0x2001, 0x500, 0x12, 0, 0, 0, 0, 0xd0d),
                Ipv6Addr::new(0x2001, 0x500, 0x1, 0, 0, 0, 0, 0x53),
                Ipv6Addr::new(0x2001, 0x7fe, 0, 0, 0, 0, 0, 0x53),
                Ipv6Addr::new(0x2001, 0x503, 0xc27, 0, 0, 0, 0x2, 0x30),
                Ipv6Addr::new(0x2001, 0x7fd, 0, 0, 0, 0, 0, 0x1),
                Ipv6Addr::new(0x2001, 0x500, 0x9f, 0, 0, 0, 0, 0x42),
                Ipv6Addr::new(0x2001, 0xdc3, 0, 0, 0, 0, 0, 0x35),
            ],
        }
    }
}

impl Default for RootServers {
    fn default() -> Self {
        Self::iana()
    }
}

impl RootHints for RootServers {
    fn root_server_ips(&self, ip_protocol: IpProtocol) -> Vec<IpAddr> {
        let mut ips = Vec::with_capacity(self.v4.len() + self.v6.len());
        if ip_protocol != IpProtocol::V6Only {
            ips.extend(self.v4.iter().copied().map(IpAddr::V4));
        }
        if ip_protocol != IpProtocol::V4Only {
            ips.extend(self.v6.iter().copied().map(IpAddr::V6));
        }
        ips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iana_has_thirteen_of_each() {
        let roots = RootServers::iana();
        assert_eq!(13, roots.root_server_ips(IpProtocol::V4Only).len());
        assert_eq!(13, roots.root_server_ips(IpProtocol::V6Only).len());
        assert_eq!(26, roots.root_server_ips(IpProtocol::Both).len());
    }

    #[test]
    fn root_server_ips_follow_preference() {
        let roots = RootServers::iana();
        for protocol in [IpProtocol::V4Only, IpProtocol::V6Only, IpProtocol::Both] {
            for ip in roots.root_server_ips(protocol) {
                assert!(protocol.allows(&ip));
            }
        }
    }

    #[test]
    fn root_server_ips_both_puts_v4_first() {
        let roots = RootServers::new(
            vec![Ipv4Addr::new(1, 1, 1, 1)],
            vec![Ipv6Addr::new(1, 1, 1, 1, 1, 1, 1, 1)],
        );
        assert_eq!(
            vec![
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                IpAddr::V6(Ipv6Addr::new(1, 1, 1, 1, 1, 1, 1, 1)),
            ],
            roots.root_server_ips(IpProtocol::Both)
        );
    }

    #[test]
    fn ip_protocol_from_str() {
        assert_eq!(Ok(IpProtocol::V4Only), "v4".parse());
        assert_eq!(Ok(IpProtocol::V6Only), "v6".parse());
        assert_eq!(Ok(IpProtocol::Both), "both".parse());
        assert_eq!(
            Err(IpProtocolFromStr::NoParse),
            "ipx".parse::<IpProtocol>()
        );
    }

    #[test]
    fn address_types_follow_preference() {
        assert_eq!(vec![RecordType::A], IpProtocol::V4Only.address_types());
        assert_eq!(vec![RecordType::AAAA], IpProtocol::V6Only.address_types());
        assert_eq!(
            vec![RecordType::A, RecordType::AAAA],
            IpProtocol::Both.address_types()
        );
    }
}
