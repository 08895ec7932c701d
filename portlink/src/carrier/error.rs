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

//! Carrier protocol errors.

use crate::transport::TransportError;
use thiserror::Error;

/// A carrier could not complete a handshake step or frame a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No registered carrier recognises the opening 8 bytes.
    #[error("no carrier matches header {}", render_header(.header))]
    NoMatchingCarrier {
        /// The bytes the peer opened with.
        header: [u8; 8],
    },

    /// A carrier was requested by a name nobody registered.
    #[error("unknown carrier '{name}'")]
    UnknownCarrier {
        /// Requested name.
        name: String,
    },

    /// The peer sent something that does not parse at this step.
    #[error("malformed {stage}: {reason}")]
    Malformed {
        /// What was being read.
        stage: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The peer speaks a different protocol revision.
    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version this side speaks.
        expected: u16,
        /// Version the peer announced.
        found: u16,
    },

    /// The peer answered the header with something other than acceptance.
    #[error("peer rejected the connection: {reason}")]
    Rejected {
        /// What came back instead.
        reason: String,
    },

    /// An announced or outgoing message exceeds the size limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Announced size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// An outgoing message has more blocks than the index can announce.
    #[error("message of {count} blocks exceeds the {limit} block limit")]
    TooManyBlocks {
        /// Blocks in the message.
        count: usize,
        /// Carrier limit.
        limit: usize,
    },

    /// A text carrier was asked to send a payload it cannot represent.
    #[error("payload cannot be sent as a text line: {reason}")]
    InvalidText {
        /// Why.
        reason: &'static str,
    },

    /// The carrier cannot do what was asked of it.
    #[error("carrier '{carrier}' does not support {operation}")]
    Unsupported {
        /// Carrier name.
        carrier: String,
        /// The unsupported operation.
        operation: &'static str,
    },

    /// The underlying stream failed, closed, or timed out.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::Malformed`].
    pub fn malformed(stage: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            stage,
            reason: reason.into(),
        }
    }

    /// Returns `true` if the stream closed underneath the carrier.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtocolError::Transport(e) if e.is_disconnect())
    }

    /// Returns `true` if the carrier refused an outgoing message before
    /// writing any of it. The stream is still usable.
    pub fn is_unencodable(&self) -> bool {
        matches!(
            self,
            ProtocolError::MessageTooLarge { .. }
                | ProtocolError::TooManyBlocks { .. }
                | ProtocolError::InvalidText { .. }
                | ProtocolError::Unsupported { .. }
        )
    }

    /// Returns `true` if a timeout expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(TransportError::Timeout { .. })
        )
    }
}

fn render_header(header: &[u8; 8]) -> String {
    header.escape_ascii().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_matching_carrier_display() {
        let err = ProtocolError::NoMatchingCarrier {
            header: *b"GET / HT",
        };
        assert_eq!(err.to_string(), "no carrier matches header GET / HT");
    }

    #[test]
    fn test_header_bytes_are_escaped() {
        let err = ProtocolError::NoMatchingCarrier {
            header: [0, 1, b'A', 0, 0, 0, 0, 0xff],
        };
        assert!(err.to_string().contains("\\x00\\x01A"));
    }

    #[test]
    fn test_disconnect_classification() {
        let err = ProtocolError::from(TransportError::connection_lost("eof"));
        assert!(err.is_disconnect());
        assert!(!err.is_timeout());

        let err = ProtocolError::from(TransportError::Timeout {
            duration: std::time::Duration::from_secs(1),
        });
        assert!(err.is_timeout());
    }

    #[test]
    fn test_refused_messages_leave_the_stream_usable() {
        assert!(ProtocolError::InvalidText { reason: "newline" }.is_unencodable());
        assert!(ProtocolError::TooManyBlocks {
            count: 5000,
            limit: 4096
        }
        .is_unencodable());
        assert!(!ProtocolError::malformed("message index", "bad").is_unencodable());
        assert!(!ProtocolError::from(TransportError::connection_lost("eof")).is_unencodable());
    }
}
