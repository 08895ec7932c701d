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

//! Top-level error type for portlink.
//!
//! [`PortlinkError`] composes the error of every layer: transport, wire
//! protocol, handshake, endpoint, name resolution, contacts and write
//! buffers. [`ErrorKind`] folds them into the small taxonomy callers and
//! error counters care about.
//!
//! # Examples
//!
//! ```rust
//! use portlink::{ErrorKind, PortlinkError};
//! use portlink::transport::TransportError;
//!
//! let err: PortlinkError = TransportError::Closed.into();
//! assert_eq!(err.kind(), ErrorKind::StreamBroken);
//! assert!(err.should_close_connection());
//! ```

use crate::carrier::ProtocolError;
use crate::contact::ContactError;
use crate::endpoint::{ConnectionFailed, EndpointError};
use crate::name::ResolverError;
use crate::transport::TransportError;
use crate::write_buffer::WriteBufferError;
use std::error::Error as StdError;
use std::fmt;

/// Coarse classification of a [`PortlinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A listening socket could not be bound.
    BindFailure,
    /// A peer could not be reached.
    ConnectFailure,
    /// A connection failed during negotiation.
    HandshakeFailure,
    /// An established connection broke.
    StreamBroken,
    /// No write buffer came free in time.
    ResourceExhausted,
    /// A value supplied by the caller is unusable.
    Configuration,
    /// A name, carrier or connection does not exist.
    NotFound,
    /// The endpoint is closed.
    Closed,
}

impl ErrorKind {
    /// Stable lowercase label, used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BindFailure => "bind_failure",
            ErrorKind::ConnectFailure => "connect_failure",
            ErrorKind::HandshakeFailure => "handshake_failure",
            ErrorKind::StreamBroken => "stream_broken",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Closed => "closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for portlink operations.
#[derive(Debug)]
pub enum PortlinkError {
    /// Socket-level failure.
    Transport(TransportError),
    /// An established connection carried something unexpected.
    Protocol(ProtocolError),
    /// A connection failed during negotiation.
    Handshake(ConnectionFailed),
    /// An endpoint operation was refused.
    Endpoint(EndpointError),
    /// A name lookup or registration failed.
    Resolver(ResolverError),
    /// A contact could not be used.
    Contact(ContactError),
    /// A write buffer could not be acquired or committed.
    WriteBuffer(WriteBufferError),
}

impl PortlinkError {
    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::BindFailed { .. }) => ErrorKind::BindFailure,
            Self::Transport(
                TransportError::ConnectionFailed { .. } | TransportError::Timeout { .. },
            ) => ErrorKind::ConnectFailure,
            Self::Transport(TransportError::InvalidConfiguration { .. }) => {
                ErrorKind::Configuration
            }
            Self::Transport(_) => ErrorKind::StreamBroken,
            Self::Protocol(e) if e.is_unencodable() => ErrorKind::Configuration,
            Self::Protocol(_) => ErrorKind::StreamBroken,
            Self::Handshake(_) => ErrorKind::HandshakeFailure,
            Self::Endpoint(e) => match e {
                EndpointError::Closed => ErrorKind::Closed,
                EndpointError::ReplyLost { .. } => ErrorKind::StreamBroken,
                EndpointError::UnknownCarrier { .. }
                | EndpointError::NoOutputs
                | EndpointError::RepliesUnsupported => ErrorKind::NotFound,
                EndpointError::AlreadyListening { .. }
                | EndpointError::NotListening
                | EndpointError::NoResolver { .. }
                | EndpointError::EmptyMessage
                | EndpointError::InvalidConfiguration { .. } => ErrorKind::Configuration,
            },
            Self::Resolver(ResolverError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Resolver(ResolverError::Unavailable { .. }) => ErrorKind::ConnectFailure,
            Self::Resolver(ResolverError::InvalidContact { .. }) => ErrorKind::Configuration,
            Self::Contact(_) => ErrorKind::Configuration,
            Self::WriteBuffer(WriteBufferError::Exhausted { .. }) => ErrorKind::ResourceExhausted,
            Self::WriteBuffer(WriteBufferError::Empty { .. }) => ErrorKind::Configuration,
        }
    }

    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_recoverable(),
            Self::Protocol(ProtocolError::Transport(e)) => e.is_recoverable(),
            Self::Handshake(e) => e.is_timeout(),
            Self::Resolver(ResolverError::Unavailable { .. }) => true,
            Self::WriteBuffer(WriteBufferError::Exhausted { .. }) => true,
            _ => false,
        }
    }

    /// Returns `true` if the connection that produced this error is unusable.
    #[must_use]
    pub fn should_close_connection(&self) -> bool {
        match self {
            Self::Transport(e) => e.should_close_transport(),
            Self::Protocol(e) => !e.is_unencodable(),
            Self::Handshake(_) => true,
            Self::Endpoint(EndpointError::ReplyLost { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PortlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::Handshake(e) => write!(f, "handshake error: {}", e),
            Self::Endpoint(e) => write!(f, "endpoint error: {}", e),
            Self::Resolver(e) => write!(f, "resolver error: {}", e),
            Self::Contact(e) => write!(f, "contact error: {}", e),
            Self::WriteBuffer(e) => write!(f, "write buffer error: {}", e),
        }
    }
}

impl StdError for PortlinkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Handshake(e) => Some(e),
            Self::Endpoint(e) => Some(e),
            Self::Resolver(e) => Some(e),
            Self::Contact(e) => Some(e),
            Self::WriteBuffer(e) => Some(e),
        }
    }
}

impl From<TransportError> for PortlinkError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

impl From<ProtocolError> for PortlinkError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Transport(e) => Self::Transport(e),
            other => Self::Protocol(other),
        }
    }
}

impl From<ConnectionFailed> for PortlinkError {
    fn from(error: ConnectionFailed) -> Self {
        Self::Handshake(error)
    }
}

impl From<EndpointError> for PortlinkError {
    fn from(error: EndpointError) -> Self {
        Self::Endpoint(error)
    }
}

impl From<ResolverError> for PortlinkError {
    fn from(error: ResolverError) -> Self {
        Self::Resolver(error)
    }
}

impl From<ContactError> for PortlinkError {
    fn from(error: ContactError) -> Self {
        Self::Contact(error)
    }
}

impl From<WriteBufferError> for PortlinkError {
    fn from(error: WriteBufferError) -> Self {
        Self::WriteBuffer(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{HandshakeState, Role};
    use std::io;
    use std::time::Duration;

    fn handshake_failure(source: ProtocolError) -> PortlinkError {
        ConnectionFailed::new(Role::Acceptor, HandshakeState::Start, source).into()
    }

    #[test]
    fn test_bind_failure_kind() {
        let err: PortlinkError = TransportError::BindFailed {
            address: "127.0.0.1:1".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::BindFailure);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_handshake_failure_kind() {
        let err = handshake_failure(ProtocolError::NoMatchingCarrier { header: *b"GET / HT" });
        assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
        assert!(err.should_close_connection());
        assert!(!err.is_recoverable());

        let timeout = handshake_failure(ProtocolError::Transport(TransportError::Timeout {
            duration: Duration::from_millis(10),
        }));
        assert!(timeout.is_recoverable());
    }

    #[test]
    fn test_protocol_transport_errors_unwrap() {
        let err: PortlinkError = ProtocolError::Transport(TransportError::Closed).into();
        assert!(matches!(err, PortlinkError::Transport(TransportError::Closed)));
        assert_eq!(err.kind(), ErrorKind::StreamBroken);

        let err: PortlinkError = ProtocolError::malformed("message", "bad marker").into();
        assert!(matches!(err, PortlinkError::Protocol(_)));
        assert_eq!(err.kind(), ErrorKind::StreamBroken);
    }

    #[test]
    fn test_refused_message_keeps_connection() {
        let err: PortlinkError = ProtocolError::InvalidText {
            reason: "payload contains a newline",
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.should_close_connection());
    }

    #[test]
    fn test_resource_exhausted_kind() {
        let err: PortlinkError = WriteBufferError::Exhausted {
            slots: 2,
            waited: Duration::from_millis(5),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(err.is_recoverable());
        assert!(!err.should_close_connection());
    }

    #[test]
    fn test_endpoint_kinds() {
        let closed: PortlinkError = EndpointError::Closed.into();
        assert_eq!(closed.kind(), ErrorKind::Closed);

        let missing: PortlinkError = ResolverError::NotFound {
            name: "/nobody".to_string(),
        }
        .into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_display() {
        let err: PortlinkError = EndpointError::NoOutputs.into();
        assert_eq!(
            err.to_string(),
            "endpoint error: endpoint has no output connections"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::StreamBroken.to_string(), "stream_broken");
        assert_eq!(ErrorKind::BindFailure.as_str(), "bind_failure");
    }
}
