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

//! Connection handshake state machine.
//!
//! A [`ConnectionNegotiator`] turns a freshly opened byte stream into an
//! established carrier [`Link`]. The initiating side picks the carrier by
//! name; the accepting side identifies it from the first 8 bytes on the
//! wire. Both walk the same states:
//!
//! ```text
//! Start -> HeaderExchanged -> SpecifierExchanged -> IndexExchanged
//!       -> Acknowledged -> Established
//! ```
//!
//! and any step can fall into `Failed`. A failure shuts the stream down, so
//! the peer's next read fails as well and both sides end up `Failed`.
//! There is no retry here; callers decide whether to dial again.

use crate::carrier::{Carrier, CarrierRegistry, Link, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
use crate::contact::Route;
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Written to peers whose opening bytes match no carrier, which is usually
/// a person poking the port with a terminal.
pub const PROTOCOL_NOT_FOUND: &str =
    "Protocol not found. Try typing \"CONNECT /your_name\" to talk in text mode.\n";

/// Which end of the handshake this side plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dialed out; becomes an output connection.
    Initiator,
    /// Accepted; becomes an input connection.
    Acceptor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Acceptor => f.write_str("acceptor"),
        }
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Nothing exchanged yet.
    Start,
    /// The carrier is known to both sides.
    HeaderExchanged,
    /// The acceptor knows who the sender is.
    SpecifierExchanged,
    /// The protocol revision has been agreed, or was not negotiated.
    IndexExchanged,
    /// Acknowledgements were exchanged, or were not required.
    Acknowledged,
    /// The link is ready for traffic.
    Established,
    /// The handshake was abandoned.
    Failed,
}

impl HandshakeState {
    /// Returns `true` for `Established` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Start => "start",
            HandshakeState::HeaderExchanged => "header exchanged",
            HandshakeState::SpecifierExchanged => "specifier exchanged",
            HandshakeState::IndexExchanged => "index exchanged",
            HandshakeState::Acknowledged => "acknowledged",
            HandshakeState::Established => "established",
            HandshakeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The single outcome reported when a handshake does not complete.
#[derive(Debug, thiserror::Error)]
#[error("{role} handshake failed after reaching '{reached}': {source}")]
pub struct ConnectionFailed {
    role: Role,
    reached: HandshakeState,
    #[source]
    source: ProtocolError,
}

impl ConnectionFailed {
    pub(crate) fn new(role: Role, reached: HandshakeState, source: ProtocolError) -> Self {
        Self {
            role,
            reached,
            source,
        }
    }

    /// Side that failed.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Last state reached before failing.
    pub fn reached(&self) -> HandshakeState {
        self.reached
    }

    /// The protocol error behind the failure.
    pub fn protocol_error(&self) -> &ProtocolError {
        &self.source
    }

    /// Returns `true` if the handshake ran out of time.
    pub fn is_timeout(&self) -> bool {
        self.source.is_timeout()
    }
}

/// A link that completed the handshake, with the carrier that drove it.
pub struct Established {
    /// Carrier instance bound to this link.
    pub carrier: Box<dyn Carrier>,
    /// The link, with its route filled in.
    pub link: Link,
    /// Side this end played.
    pub role: Role,
}

impl fmt::Debug for Established {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established")
            .field("carrier", &self.carrier.descriptor().name)
            .field("link", &self.link)
            .field("role", &self.role)
            .finish()
    }
}

/// Drives one carrier through the handshake.
///
/// ```rust
/// use portlink::carrier::CarrierRegistry;
/// use portlink::endpoint::{ConnectionNegotiator, HandshakeState};
/// use portlink::transport::MemoryTransport;
/// use portlink::Route;
///
/// let registry = CarrierRegistry::global();
/// let (a, b) = MemoryTransport::pair(16);
///
/// let acceptor = std::thread::spawn({
///     let registry = registry.clone();
///     move || ConnectionNegotiator::new(registry).accept(Box::new(b), "/read")
/// });
/// let mut initiator = ConnectionNegotiator::new(registry);
/// let out = initiator
///     .connect(Box::new(a), "tcp", Route::new("/write", "/read", "tcp"))
///     .unwrap();
/// let inbound = acceptor.join().unwrap().unwrap();
///
/// assert_eq!(initiator.state(), HandshakeState::Established);
/// assert_eq!(inbound.link.route().from(), "/write");
/// # drop(out);
/// ```
pub struct ConnectionNegotiator {
    registry: Arc<CarrierRegistry>,
    timeout: Option<Duration>,
    max_message_size: usize,
    state: HandshakeState,
    transitions: Vec<HandshakeState>,
}

impl ConnectionNegotiator {
    /// A negotiator resolving carriers through `registry`.
    pub fn new(registry: Arc<CarrierRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            state: HandshakeState::Start,
            transitions: vec![HandshakeState::Start],
        }
    }

    /// Bounds every handshake read and write; exceeding it fails the handshake.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Message size limit carried by the resulting link.
    #[must_use]
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Every state visited by the last handshake, in order.
    pub fn transitions(&self) -> &[HandshakeState] {
        &self.transitions
    }

    fn reset(&mut self) {
        self.state = HandshakeState::Start;
        self.transitions.clear();
        self.transitions.push(HandshakeState::Start);
    }

    fn advance(&mut self, role: Role, link: &Link, next: HandshakeState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            %role,
            transport_id = %link.metadata().id,
            from = %self.state,
            to = %next,
            "Handshake transition"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (role, link);

        self.state = next;
        self.transitions.push(next);
    }

    fn fail(&mut self, role: Role, mut link: Link, source: ProtocolError) -> ConnectionFailed {
        let reached = self.state;

        #[cfg(feature = "tracing")]
        tracing::warn!(
            %role,
            transport_id = %link.metadata().id,
            reached = %reached,
            error = %source,
            "Handshake failed"
        );

        link.shutdown();
        self.state = HandshakeState::Failed;
        self.transitions.push(HandshakeState::Failed);
        ConnectionFailed {
            role,
            reached,
            source,
        }
    }

    /// Runs the initiating side over `stream` using the named carrier.
    pub fn connect(
        &mut self,
        stream: Box<dyn Transport>,
        carrier: &str,
        route: Route,
    ) -> Result<Established, ConnectionFailed> {
        self.reset();
        let role = Role::Initiator;
        let mut link = Link::new(stream, route.with_carrier(carrier))
            .with_max_message_size(self.max_message_size);

        match self.run_initiator(&mut link, carrier) {
            Ok(carrier) => Ok(Established {
                carrier,
                link,
                role,
            }),
            Err(e) => Err(self.fail(role, link, e)),
        }
    }

    /// Runs the accepting side over `stream` on behalf of `local_name`.
    pub fn accept(
        &mut self,
        stream: Box<dyn Transport>,
        local_name: &str,
    ) -> Result<Established, ConnectionFailed> {
        self.reset();
        let role = Role::Acceptor;
        let mut link = Link::new(stream, Route::new("", local_name, ""))
            .with_max_message_size(self.max_message_size);

        match self.run_acceptor(&mut link) {
            Ok(carrier) => Ok(Established {
                carrier,
                link,
                role,
            }),
            Err(e) => Err(self.fail(role, link, e)),
        }
    }

    fn run_initiator(
        &mut self,
        link: &mut Link,
        name: &str,
    ) -> Result<Box<dyn Carrier>, ProtocolError> {
        let role = Role::Initiator;
        let mut carrier = self
            .registry
            .create(name)
            .ok_or_else(|| ProtocolError::UnknownCarrier {
                name: name.to_string(),
            })?;
        link.set_timeout(self.timeout)?;

        carrier.send_header(link)?;
        self.advance(role, link, HandshakeState::HeaderExchanged);

        if !carrier.can_escape_route_in_tag() {
            carrier.send_sender_specifier(link)?;
        }
        self.advance(role, link, HandshakeState::SpecifierExchanged);

        if carrier.negotiates_index() {
            carrier.send_index(link)?;
        }
        link.flush()?;
        carrier.expect_reply_to_header(link)?;
        self.advance(role, link, HandshakeState::IndexExchanged);

        if carrier.requires_ack() {
            carrier.send_ack(link)?;
            carrier.expect_ack(link)?;
        }
        self.advance(role, link, HandshakeState::Acknowledged);

        link.set_timeout(None)?;
        self.advance(role, link, HandshakeState::Established);
        Ok(carrier)
    }

    fn run_acceptor(&mut self, link: &mut Link) -> Result<Box<dyn Carrier>, ProtocolError> {
        let role = Role::Acceptor;
        link.set_timeout(self.timeout)?;

        let header = link.read_array::<8>()?;
        let Some(mut carrier) = self.registry.choose_by_header(&header) else {
            // Best effort; the stream is torn down right after.
            let _ = link.write_all(PROTOCOL_NOT_FOUND.as_bytes());
            return Err(ProtocolError::NoMatchingCarrier { header });
        };
        let carrier_name = carrier.descriptor().name.clone();
        link.set_route(link.route().clone().with_carrier(carrier_name));
        self.advance(role, link, HandshakeState::HeaderExchanged);

        let sender = carrier.expect_sender_specifier(link)?;
        link.set_route(link.route().clone().with_from(sender));
        self.advance(role, link, HandshakeState::SpecifierExchanged);

        if carrier.negotiates_index() {
            carrier.expect_index(link)?;
        }
        carrier.respond_to_header(link)?;
        self.advance(role, link, HandshakeState::IndexExchanged);

        if carrier.requires_ack() {
            carrier.expect_ack(link)?;
            carrier.send_ack(link)?;
        }
        self.advance(role, link, HandshakeState::Acknowledged);

        link.set_timeout(None)?;
        self.advance(role, link, HandshakeState::Established);
        Ok(carrier)
    }
}

impl fmt::Debug for ConnectionNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionNegotiator")
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{BinaryCarrier, CarrierDescriptor};
    use crate::transport::MemoryTransport;
    use std::io::Write;
    use std::thread;

    type Outcome = (HandshakeState, Result<Established, ConnectionFailed>);

    fn run_pair(
        initiator_registry: Arc<CarrierRegistry>,
        acceptor_registry: Arc<CarrierRegistry>,
        carrier: &str,
    ) -> (Outcome, Outcome) {
        let (a, b) = MemoryTransport::pair(64);
        let acceptor = thread::spawn(move || {
            let mut negotiator = ConnectionNegotiator::new(acceptor_registry)
                .with_timeout(Some(Duration::from_secs(5)));
            let result = negotiator.accept(Box::new(b), "/read");
            (negotiator.state(), result)
        });
        let mut negotiator = ConnectionNegotiator::new(initiator_registry)
            .with_timeout(Some(Duration::from_secs(5)));
        let result = negotiator.connect(Box::new(a), carrier, Route::new("/write", "/read", ""));
        let initiator = (negotiator.state(), result);
        (initiator, acceptor.join().unwrap())
    }

    #[test]
    fn test_every_stock_carrier_establishes_on_both_sides() {
        let registry = Arc::new(CarrierRegistry::with_defaults());
        for name in registry.names() {
            let ((i_state, i_result), (a_state, a_result)) =
                run_pair(registry.clone(), registry.clone(), &name);
            assert_eq!(i_state, HandshakeState::Established, "{}", name);
            assert_eq!(a_state, HandshakeState::Established, "{}", name);

            let inbound = a_result.unwrap();
            assert_eq!(inbound.role, Role::Acceptor);
            assert_eq!(inbound.link.route().from(), "/write");
            assert_eq!(inbound.link.route().to(), "/read");
            assert_eq!(inbound.link.route().carrier(), name);
            assert_eq!(i_result.unwrap().link.route().carrier(), name);
        }
    }

    #[test]
    fn test_transitions_visit_every_state() {
        let registry = Arc::new(CarrierRegistry::with_defaults());
        let (a, b) = MemoryTransport::pair(64);
        let acceptor = thread::spawn({
            let registry = registry.clone();
            move || ConnectionNegotiator::new(registry).accept(Box::new(b), "/read")
        });
        let mut negotiator = ConnectionNegotiator::new(registry);
        negotiator
            .connect(Box::new(a), "tcp", Route::new("/write", "/read", ""))
            .unwrap();
        acceptor.join().unwrap().unwrap();

        assert_eq!(
            negotiator.transitions(),
            &[
                HandshakeState::Start,
                HandshakeState::HeaderExchanged,
                HandshakeState::SpecifierExchanged,
                HandshakeState::IndexExchanged,
                HandshakeState::Acknowledged,
                HandshakeState::Established,
            ]
        );
    }

    #[test]
    fn test_unknown_header_fails_both_sides() {
        let full = Arc::new(CarrierRegistry::with_defaults());
        let without_tcp = Arc::new(CarrierRegistry::with_defaults());
        without_tcp.unregister("tcp");

        let ((i_state, i_result), (a_state, a_result)) = run_pair(full, without_tcp, "tcp");
        assert_eq!(i_state, HandshakeState::Failed);
        assert_eq!(a_state, HandshakeState::Failed);

        let err = a_result.unwrap_err();
        assert_eq!(err.role(), Role::Acceptor);
        assert_eq!(err.reached(), HandshakeState::Start);
        assert!(matches!(
            err.protocol_error(),
            ProtocolError::NoMatchingCarrier { .. }
        ));
        assert_eq!(i_result.unwrap_err().role(), Role::Initiator);
    }

    #[test]
    fn test_version_mismatch_fails_both_sides() {
        // An initiator whose index announces a revision the acceptor rejects.
        struct FutureTcp(BinaryCarrier);
        impl Carrier for FutureTcp {
            fn descriptor(&self) -> &CarrierDescriptor {
                self.0.descriptor()
            }
            fn send_sender_specifier(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
                self.0.send_sender_specifier(link)
            }
            fn expect_sender_specifier(&mut self, link: &mut Link) -> Result<String, ProtocolError> {
                self.0.expect_sender_specifier(link)
            }
            fn send_index(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
                link.write_all(&[b'Y', b'A', 2, 0, 1, 0, b'R', b'P'])
            }
            fn expect_index(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
                self.0.expect_index(link)
            }
            fn respond_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
                self.0.respond_to_header(link)
            }
            fn expect_reply_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
                self.0.expect_reply_to_header(link)
            }
            fn send_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
                self.0.send_ack(link)
            }
            fn expect_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
                self.0.expect_ack(link)
            }
            fn write(
                &mut self,
                link: &mut Link,
                message: &crate::Message,
                wants_reply: bool,
            ) -> Result<(), ProtocolError> {
                self.0.write(link, message, wants_reply)
            }
            fn read(&mut self, link: &mut Link) -> Result<crate::carrier::Incoming, ProtocolError> {
                self.0.read(link)
            }
        }

        let initiator = Arc::new(CarrierRegistry::with_defaults());
        initiator.register(BinaryCarrier::tcp_descriptor(), || {
            Box::new(FutureTcp(BinaryCarrier::tcp()))
        });
        let acceptor = Arc::new(CarrierRegistry::with_defaults());

        let ((i_state, _), (a_state, a_result)) = run_pair(initiator, acceptor, "tcp");
        assert_eq!(i_state, HandshakeState::Failed);
        assert_eq!(a_state, HandshakeState::Failed);
        assert!(matches!(
            a_result.unwrap_err().protocol_error(),
            ProtocolError::UnsupportedVersion { found: 2, .. }
        ));
    }

    #[test]
    fn test_unknown_carrier_name() {
        let registry = Arc::new(CarrierRegistry::with_defaults());
        let (a, _b) = MemoryTransport::pair(4);
        let mut negotiator = ConnectionNegotiator::new(registry);
        let err = negotiator
            .connect(Box::new(a), "carrier_pigeon", Route::default())
            .unwrap_err();
        assert_eq!(negotiator.state(), HandshakeState::Failed);
        assert!(matches!(
            err.protocol_error(),
            ProtocolError::UnknownCarrier { .. }
        ));
    }

    #[test]
    fn test_silent_peer_times_out() {
        let registry = Arc::new(CarrierRegistry::with_defaults());
        let (a, _b) = MemoryTransport::pair(16);
        let mut negotiator =
            ConnectionNegotiator::new(registry).with_timeout(Some(Duration::from_millis(30)));
        let err = negotiator
            .connect(Box::new(a), "tcp", Route::new("/write", "/read", ""))
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.reached(), HandshakeState::SpecifierExchanged);
    }

    #[test]
    fn test_garbage_gets_protocol_not_found_text() {
        let registry = Arc::new(CarrierRegistry::with_defaults());
        let (mut a, b) = MemoryTransport::pair(16);
        a.write_all(b"GET / HTTP/1.1\r\n").unwrap();

        let err = ConnectionNegotiator::new(registry)
            .accept(Box::new(b), "/read")
            .unwrap_err();
        assert!(matches!(
            err.protocol_error(),
            ProtocolError::NoMatchingCarrier { header } if header == b"GET / HT"
        ));
    }
}
