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

//! Transport layer error types.
//!
//! Transport errors are the lowest layer of the error hierarchy: they describe
//! what went wrong with a byte stream or listening socket. Connection threads
//! that hit one drop their connection; they never propagate into `send()`.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by byte streams and listeners.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the peer.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// Address that was dialed.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The peer went away or the stream was shut down.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// What was observed.
        reason: String,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<io::Error>,
    },

    /// A read failed for a reason other than the peer disconnecting.
    #[error("read failed: {source}")]
    ReadFailed {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A write failed for a reason other than the peer disconnecting.
    #[error("write failed: {source}")]
    WriteFailed {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A read or write did not complete in time.
    #[error("operation timed out after {duration:?}")]
    Timeout {
        /// The timeout that elapsed.
        duration: Duration,
    },

    /// Settings that cannot be applied to the stream.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why it was rejected.
        reason: String,
    },

    /// The listener or stream has been closed locally.
    #[error("transport is closed")]
    Closed,

    /// The listening address is unavailable.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        /// Requested address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Any other I/O error.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Classifies a failed read. End-of-stream and resets become
    /// [`ConnectionLost`](Self::ConnectionLost); elapsed socket timeouts become
    /// [`Timeout`](Self::Timeout) when the timeout is known.
    pub fn from_read(source: io::Error, timeout: Option<Duration>) -> Self {
        match (source.kind(), timeout) {
            (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut, Some(duration)) => {
                TransportError::Timeout { duration }
            }
            (kind, _) if is_disconnect(kind) => TransportError::ConnectionLost {
                reason: "peer closed the stream".to_string(),
                source: Some(source),
            },
            _ => TransportError::ReadFailed { source },
        }
    }

    /// Classifies a failed write, mirroring [`from_read`](Self::from_read).
    pub fn from_write(source: io::Error, timeout: Option<Duration>) -> Self {
        match (source.kind(), timeout) {
            (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut, Some(duration)) => {
                TransportError::Timeout { duration }
            }
            (kind, _) if is_disconnect(kind) => TransportError::ConnectionLost {
                reason: "peer stopped reading".to_string(),
                source: Some(source),
            },
            _ => TransportError::WriteFailed { source },
        }
    }

    /// Returns `true` if retrying the operation (or reconnecting) may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { .. }
            | TransportError::ConnectionLost { .. }
            | TransportError::Timeout { .. } => true,

            TransportError::ReadFailed { source }
            | TransportError::WriteFailed { source }
            | TransportError::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),

            TransportError::InvalidConfiguration { .. }
            | TransportError::Closed
            | TransportError::BindFailed { .. } => false,
        }
    }

    /// Returns `true` if the stream that produced this error is unusable.
    pub fn should_close_transport(&self) -> bool {
        match self {
            TransportError::ConnectionLost { .. }
            | TransportError::Closed
            | TransportError::Timeout { .. }
            | TransportError::InvalidConfiguration { .. } => true,

            TransportError::ConnectionFailed { .. } | TransportError::BindFailed { .. } => false,

            TransportError::ReadFailed { source }
            | TransportError::WriteFailed { source }
            | TransportError::Io { source } => !matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Returns `true` if the peer disconnected.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionLost { .. } | TransportError::Closed
        )
    }

    #[cfg(test)]
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        TransportError::ConnectionLost {
            reason: reason.into(),
            source: None,
        }
    }
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io { source: error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_is_recoverable() {
        let error = TransportError::ConnectionFailed {
            address: "127.0.0.1:8080".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(error.is_recoverable());
        assert!(!error.should_close_transport());
    }

    #[test]
    fn test_bind_failed_is_fatal() {
        let error = TransportError::BindFailed {
            address: "127.0.0.1:80".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("127.0.0.1:80"));
    }

    #[test]
    fn test_from_read_eof_is_disconnect() {
        let error = TransportError::from_read(
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
            None,
        );
        assert!(error.is_disconnect());
        assert!(error.should_close_transport());
    }

    #[test]
    fn test_from_read_timeout() {
        let error = TransportError::from_read(
            io::Error::new(io::ErrorKind::WouldBlock, "again"),
            Some(Duration::from_millis(50)),
        );
        assert!(matches!(error, TransportError::Timeout { duration } if duration.as_millis() == 50));
    }

    #[test]
    fn test_from_write_broken_pipe() {
        let error =
            TransportError::from_write(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"), None);
        assert!(error.is_disconnect());
    }

    #[test]
    fn test_interrupted_io_is_transient() {
        let error = TransportError::Io {
            source: io::Error::new(io::ErrorKind::Interrupted, "signal"),
        };
        assert!(error.is_recoverable());
        assert!(!error.should_close_transport());
    }

    #[test]
    fn test_connection_lost_helper() {
        let error = TransportError::connection_lost("gone");
        assert_eq!(error.to_string(), "connection lost: gone");
    }
}
