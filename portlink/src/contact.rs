//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Addressing for logical endpoints.
//!
//! A [`Contact`] names a logical endpoint and, once resolved, carries the
//! carrier, host and port needed to reach it. Contacts are immutable values:
//! every `with_*` method returns a new contact.
//!
//! # Examples
//!
//! ```rust
//! use portlink::Contact;
//!
//! let contact: Contact = "tcp://127.0.0.1:10002/read".parse().unwrap();
//! assert_eq!(contact.name(), "/read");
//! assert_eq!(contact.carrier(), "tcp");
//! assert_eq!(contact.port(), 10002);
//! assert_eq!(contact.to_string(), "tcp://127.0.0.1:10002/read");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

/// Carrier used when a contact does not name one.
pub const DEFAULT_CARRIER: &str = "tcp";

/// Sender identity used when a peer does not announce a name.
pub const ANONYMOUS_SENDER: &str = "anon";

/// Errors raised while building, parsing or resolving a [`Contact`].
#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    /// The contact has no host/port to connect to.
    #[error("contact '{name}' has no network address")]
    MissingAddress {
        /// Logical name of the unresolved contact.
        name: String,
    },

    /// The host/port pair could not be resolved to a socket address.
    #[error("cannot resolve {address}: {source}")]
    Unresolvable {
        /// The `host:port` text that failed to resolve.
        address: String,
        /// Resolver error.
        #[source]
        source: std::io::Error,
    },

    /// Text could not be parsed as a contact.
    #[error("invalid contact '{input}': {reason}")]
    Parse {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Address of a logical endpoint.
///
/// A contact is valid when it either has a logical name (which a name
/// resolver can turn into an address) or a host and a non-zero port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    name: String,
    carrier: String,
    host: Option<String>,
    port: u16,
    timeout: Option<Duration>,
}

impl Contact {
    /// Creates a contact that only carries a logical name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            carrier: DEFAULT_CARRIER.to_string(),
            host: None,
            port: 0,
            timeout: None,
        }
    }

    /// Creates a contact for a concrete socket address.
    pub fn by_socket(carrier: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: String::new(),
            carrier: carrier.into(),
            host: Some(host.into()),
            port,
            timeout: None,
        }
    }

    /// Creates a contact from a bound socket address.
    pub fn from_socket_addr(carrier: impl Into<String>, addr: SocketAddr) -> Self {
        Self::by_socket(carrier, addr.ip().to_string(), addr.port())
    }

    /// Returns a copy with the logical name replaced.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns a copy with the carrier replaced.
    #[must_use]
    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = carrier.into();
        self
    }

    /// Returns a copy with the host and port replaced.
    #[must_use]
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    /// Returns a copy carrying a connection timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Logical name, e.g. `/read`. Empty when the contact is address-only.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Carrier name, e.g. `tcp`.
    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    /// Host, if the contact has been resolved.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port; zero when unassigned.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connection timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns `true` if the contact carries a host and a port.
    pub fn has_address(&self) -> bool {
        self.host.as_deref().is_some_and(|h| !h.is_empty()) && self.port != 0
    }

    /// Returns `true` if the contact names something that can be reached.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() || self.has_address()
    }

    /// Returns `true` if both contacts lead to the same peer over the same
    /// carrier. Names and timeouts are ignored.
    pub fn is_interchangeable(&self, other: &Contact) -> bool {
        self.carrier == other.carrier && self.host == other.host && self.port == other.port
    }

    /// Resolves the host and port to a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ContactError> {
        let host = match self.host.as_deref() {
            Some(host) if !host.is_empty() => host,
            _ => {
                return Err(ContactError::MissingAddress {
                    name: self.name.clone(),
                });
            }
        };
        let address = format!("{}:{}", host, self.port);
        let mut addrs = address
            .to_socket_addrs()
            .map_err(|source| ContactError::Unresolvable {
                address: address.clone(),
                source,
            })?;
        addrs.next().ok_or_else(|| ContactError::Unresolvable {
            address,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })
    }

    /// Name assigned to an endpoint that listens without one.
    pub(crate) fn generated_name(&self) -> String {
        format!("/{}_{}", self.host.as_deref().unwrap_or("localhost"), self.port)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host.as_deref() {
            Some(host) => write!(f, "{}://{}:{}{}", self.carrier, host, self.port, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for Contact {
    type Err = ContactError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parse_err = |reason| ContactError::Parse {
            input: input.to_string(),
            reason,
        };

        let Some((carrier, rest)) = input.split_once("://") else {
            if input.starts_with('/') {
                return Ok(Contact::by_name(input));
            }
            return Err(parse_err("expected '/name' or 'carrier://host:port/name'"));
        };
        if carrier.is_empty() {
            return Err(parse_err("empty carrier"));
        }

        let (authority, name) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| parse_err("missing port"))?;
        if host.is_empty() {
            return Err(parse_err("empty host"));
        }
        let port = port.parse::<u16>().map_err(|_| parse_err("invalid port"))?;

        Ok(Contact::by_socket(carrier, host, port).with_name(name))
    }
}

/// Direction-independent description of a connection: who sent, who
/// receives, and over which carrier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    from: String,
    to: String,
    carrier: String,
}

impl Route {
    /// Creates a route. An empty sender becomes [`ANONYMOUS_SENDER`].
    pub fn new(from: impl Into<String>, to: impl Into<String>, carrier: impl Into<String>) -> Self {
        let mut from = from.into();
        if from.is_empty() {
            from = ANONYMOUS_SENDER.to_string();
        }
        Self {
            from,
            to: to.into(),
            carrier: carrier.into(),
        }
    }

    /// Sending endpoint's name.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Receiving endpoint's name.
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Carrier name.
    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    /// Returns a copy with the sender replaced.
    #[must_use]
    pub fn with_from(self, from: impl Into<String>) -> Self {
        Route::new(from, self.to, self.carrier)
    }

    /// Returns a copy with the receiver replaced.
    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    /// Returns a copy with the carrier replaced.
    #[must_use]
    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = carrier.into();
        self
    }
}

impl Default for Route {
    fn default() -> Self {
        Route::new(ANONYMOUS_SENDER, "", DEFAULT_CARRIER)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.carrier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_only_contact() {
        let contact = Contact::by_name("/write");
        assert!(contact.is_valid());
        assert!(!contact.has_address());
        assert_eq!(contact.carrier(), DEFAULT_CARRIER);
        assert_eq!(contact.to_string(), "/write");
    }

    #[test]
    fn test_empty_contact_is_invalid() {
        assert!(!Contact::by_name("").is_valid());
        assert!(!Contact::by_socket("tcp", "localhost", 0).is_valid());
        assert!(Contact::by_socket("tcp", "localhost", 9000).is_valid());
    }

    #[test]
    fn test_interchangeable_ignores_name_and_timeout() {
        let a = Contact::by_socket("tcp", "127.0.0.1", 9000).with_name("/a");
        let b = Contact::by_socket("tcp", "127.0.0.1", 9000)
            .with_name("/b")
            .with_timeout(Duration::from_secs(1));
        let c = Contact::by_socket("text", "127.0.0.1", 9000);
        assert!(a.is_interchangeable(&b));
        assert!(!a.is_interchangeable(&c));
    }

    #[test]
    fn test_parse_uri() {
        let contact: Contact = "text://localhost:10002/read".parse().unwrap();
        assert_eq!(contact.carrier(), "text");
        assert_eq!(contact.host(), Some("localhost"));
        assert_eq!(contact.port(), 10002);
        assert_eq!(contact.name(), "/read");
    }

    #[test]
    fn test_parse_without_name() {
        let contact: Contact = "tcp://10.0.0.1:80".parse().unwrap();
        assert_eq!(contact.name(), "");
        assert_eq!(contact.to_string(), "tcp://10.0.0.1:80");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("read".parse::<Contact>().is_err());
        assert!("tcp://host/read".parse::<Contact>().is_err());
        assert!("tcp://host:notaport/read".parse::<Contact>().is_err());
        assert!("://host:1/read".parse::<Contact>().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let contact = Contact::by_socket("tcp", "127.0.0.1", 4242);
        let addr = contact.socket_addr().unwrap();
        assert_eq!(addr.port(), 4242);

        let err = Contact::by_name("/x").socket_addr().unwrap_err();
        assert!(matches!(err, ContactError::MissingAddress { .. }));
    }

    #[test]
    fn test_generated_name() {
        let contact = Contact::by_socket("tcp", "127.0.0.1", 4242);
        assert_eq!(contact.generated_name(), "/127.0.0.1_4242");
    }

    #[test]
    fn test_route_anonymous_sender() {
        let route = Route::new("", "/read", "tcp");
        assert_eq!(route.from(), ANONYMOUS_SENDER);
        assert_eq!(route.to_string(), "anon -> /read (tcp)");
    }

    #[test]
    fn test_contact_serde() {
        let contact = Contact::by_socket("tcp", "127.0.0.1", 4242).with_name("/read");
        let json = serde_json::to_string(&contact).unwrap();
        let decoded: Contact = serde_json::from_str(&json).unwrap();
        assert_eq!(contact, decoded);
    }
}
