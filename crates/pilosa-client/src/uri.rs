// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server addresses.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{PilosaError, Result};
use crate::validator::static_regex;

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 10101;
/// Host used when an address names only a scheme or port.
pub const DEFAULT_HOST: &str = "localhost";

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"^(([+a-z]+)://)?([0-9a-z.-]+|\[[:0-9a-fA-F]+\])?(:([0-9]+))?$")
});

/// Transport scheme of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Lowercase scheme name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized `scheme://host:port` address. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Default for Uri {
    fn default() -> Self {
        Self {
            scheme: Scheme::Http,
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
        }
    }
}

impl Uri {
    /// Parse a full or partial address.
    ///
    /// Accepts `scheme://host:port`, `host:port`, `host`, `:port` and
    /// bracketed IPv6 hosts. A compound scheme such as `http+protobuf` keeps
    /// only its transport part. Missing parts fall back to
    /// `http`, `localhost` and `10101`.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || PilosaError::InvalidUri {
            address: address.to_owned(),
        };
        if address.is_empty() {
            return Err(invalid());
        }
        let caps = ADDRESS.captures(address).ok_or_else(invalid)?;
        let scheme = match caps.get(2).map(|m| m.as_str()) {
            None => Scheme::Http,
            Some(raw) => match raw.split('+').next() {
                Some("http") => Scheme::Http,
                Some("https") => Scheme::Https,
                _ => return Err(invalid()),
            },
        };
        let host = caps
            .get(3)
            .map_or(DEFAULT_HOST, |m| m.as_str())
            .to_owned();
        let port = match caps.get(5) {
            Some(m) => m.as_str().parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        Ok(Self { scheme, host, port })
    }

    /// Address with the given host and port over plain HTTP.
    pub fn with_host_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
        }
    }

    /// Same address with another scheme.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host, brackets included for IPv6.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `scheme://host:port`.
    pub fn normalize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Uri {
    type Err = PilosaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
