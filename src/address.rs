// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};
use std::net::{SocketAddr, ToSocketAddrs};

pub(crate) const DEFAULT_BOLT_PORT: u16 = 7687;

/// A `host:port` pair identifying one Bolt endpoint.
///
/// Routing tables advertise servers in this form; equality and hashing are
/// on the textual host, so the same address always maps to the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6addr]`, or `[v6addr]:port`.
    /// A bare IPv6 address without brackets is taken as a host without port.
    pub(crate) fn parse(input: &str) -> Self {
        if let Some(rest) = input.strip_prefix('[') {
            // bracketed IPv6, optionally followed by :port
            if let Some((host, port)) = rest.split_once(']') {
                let port = port
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_BOLT_PORT);
                return Self::new(host, port);
            }
        }
        match input.rsplit_once(':') {
            // more than one colon without brackets: IPv6 without a port
            Some((head, _)) if head.contains(':') => Self::new(input, DEFAULT_BOLT_PORT),
            Some((host, port)) => match port.parse() {
                Ok(port) => Self::new(host, port),
                Err(_) => Self::new(input, DEFAULT_BOLT_PORT),
            },
            None => Self::new(input, DEFAULT_BOLT_PORT),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<(&str, u16)> for Address {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<(String, u16)> for Address {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}

impl ToSocketAddrs for Address {
    type Iter = std::vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("localhost", "localhost", DEFAULT_BOLT_PORT)]
    #[case("localhost:1234", "localhost", 1234)]
    #[case("10.0.0.7", "10.0.0.7", DEFAULT_BOLT_PORT)]
    #[case("10.0.0.7:80", "10.0.0.7", 80)]
    #[case("::1", "::1", DEFAULT_BOLT_PORT)]
    #[case("[::1]", "::1", DEFAULT_BOLT_PORT)]
    #[case("[::1]:7473", "::1", 7473)]
    #[case("[2001:db8::2]:7687", "2001:db8::2", 7687)]
    fn parse_host_and_port(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        let address = Address::parse(input);
        assert_eq!(address.host(), host);
        assert_eq!(address.port(), port);
    }

    #[test]
    fn display_brackets_ipv6() {
        assert_eq!(Address::new("example.com", 7687).to_string(), "example.com:7687");
        assert_eq!(Address::new("::1", 7687).to_string(), "[::1]:7687");
    }
}
