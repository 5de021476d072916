//! Peer identity by advertised address.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The advertised address of a peer: the identity key in the registry and
/// the value carried in `hostPort` fields on the wire.
///
/// Compared by value; immutable once formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Host name or IP address as the peer advertises it.
    pub host: String,
    /// TCP port the peer listens on.
    pub port: u16,
}

impl PeerAddress {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing a `host:port` string.
#[derive(Debug, thiserror::Error)]
#[error("invalid peer address {input:?}: expected host:port")]
pub struct AddressParseError {
    /// The string that failed to parse.
    pub input: String,
}

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || AddressParseError {
            input: s.to_owned(),
        };
        let (host, port) = s.rsplit_once(':').ok_or_else(bad)?;
        if host.is_empty() {
            return Err(bad());
        }
        let port = port.parse().map_err(|_| bad())?;
        Ok(Self::new(host, port))
    }
}
