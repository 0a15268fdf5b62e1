//! Player addresses.

use std::{
    fmt::{self, Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

/// An error parsing a player address.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    /// The URL scheme is not one we support.
    #[error("address scheme must be tcp or file, got {0:?}")]
    UnsupportedScheme(String),

    /// The address could not be parsed.
    #[error("malformed address {0:?}")]
    Malformed(String),

    /// A tcp address with an unparsable port.
    #[error("invalid port in address {0:?}")]
    InvalidPort(String),
}

/// The address of a player endpoint.
///
/// Addresses are written as URLs: `tcp://host:port` for TCP (the port may
/// be omitted, meaning an ephemeral port), or `file:///path` for a
/// Unix-domain socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    /// A TCP endpoint. A port of zero requests an ephemeral port.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// TCP port, zero for ephemeral.
        port: u16,
    },

    /// A Unix-domain socket endpoint.
    Unix {
        /// Filesystem path of the socket.
        path: PathBuf,
    },
}

impl Address {
    /// True when both addresses use the same scheme.
    pub fn same_scheme(&self, other: &Address) -> bool {
        matches!(
            (self, other),
            (Address::Tcp { .. }, Address::Tcp { .. }) | (Address::Unix { .. }, Address::Unix { .. })
        )
    }

    /// The TCP port, if this is a TCP address.
    pub fn port(&self) -> Option<u16> {
        match self {
            Address::Tcp { port, .. } => Some(*port),
            Address::Unix { .. } => None,
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = input.strip_prefix("tcp://") {
            if rest.is_empty() {
                return Err(AddressError::Malformed(input.into()));
            }
            match rest.rsplit_once(':') {
                Some((host, port)) => {
                    if host.is_empty() {
                        return Err(AddressError::Malformed(input.into()));
                    }
                    let port = port.parse().map_err(|_| AddressError::InvalidPort(input.into()))?;
                    Ok(Address::Tcp { host: host.into(), port })
                }
                None => Ok(Address::Tcp { host: rest.into(), port: 0 }),
            }
        } else if let Some(path) = input.strip_prefix("file://") {
            if path.is_empty() {
                return Err(AddressError::Malformed(input.into()));
            }
            Ok(Address::Unix { path: PathBuf::from(path) })
        } else {
            let scheme = input.split("://").next().unwrap_or(input);
            Err(AddressError::UnsupportedScheme(scheme.into()))
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Address::Unix { path } => write!(f, "file://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("tcp://127.0.0.1:25252", Address::Tcp { host: "127.0.0.1".into(), port: 25252 })]
    #[case("tcp://localhost:0", Address::Tcp { host: "localhost".into(), port: 0 })]
    #[case("tcp://example.com", Address::Tcp { host: "example.com".into(), port: 0 })]
    #[case("file:///tmp/player-0.sock", Address::Unix { path: "/tmp/player-0.sock".into() })]
    fn parsing(#[case] input: &str, #[case] expected: Address) {
        assert_eq!(input.parse::<Address>().unwrap(), expected);
    }

    #[rstest]
    #[case("http://example.com")]
    #[case("tcp://")]
    #[case("tcp://host:notaport")]
    #[case("file://")]
    #[case("just-a-host")]
    fn rejects(#[case] input: &str) {
        assert!(input.parse::<Address>().is_err());
    }

    #[test]
    fn display_round_trip() {
        let address: Address = "tcp://10.0.0.1:9000".parse().unwrap();
        assert_eq!(address.to_string(), "tcp://10.0.0.1:9000");
    }

    #[test]
    fn scheme_comparison() {
        let tcp: Address = "tcp://a:1".parse().unwrap();
        let unix: Address = "file:///tmp/x".parse().unwrap();
        assert!(tcp.same_scheme(&tcp));
        assert!(!tcp.same_scheme(&unix));
    }
}
