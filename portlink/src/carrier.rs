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

//! Pluggable wire protocols.
//!
//! A *carrier* encapsulates everything protocol-specific about a connection:
//! the 8-byte tag that opens the stream, how the sender identifies itself,
//! whether an index and acknowledgements are exchanged, and how a
//! [`Message`] is framed. The [`ConnectionNegotiator`](crate::endpoint::ConnectionNegotiator)
//! drives a carrier through the handshake callbacks in a fixed order and
//! endpoints then use [`Carrier::write`] / [`Carrier::read`] for traffic.
//!
//! Carriers are looked up in a [`CarrierRegistry`]: by header tag when a
//! peer connects in, by name when connecting out. Four are built in:
//!
//! | name | mode | header | ack | reply |
//! |---|---|---|---|---|
//! | `tcp` | binary | `YA\x64\x1E\0\0RP` | yes | yes |
//! | `fast_tcp` | binary | `YA\x65\x1E\0\0RP` | no | yes |
//! | `text` | text | `CONNECT ` | no | no |
//! | `text_ack` | text | `CONNACK ` | yes | no |
//!
//! The text carriers can be driven by hand from `telnet`:
//!
//! ```text
//! CONNECT /me
//! version 1
//! d
//! hello there
//! q
//! ```

mod binary;
mod error;
mod link;
mod registry;
mod text;

pub use binary::{BinaryCarrier, WIRE_VERSION};
pub use error::ProtocolError;
pub use link::{Link, DEFAULT_MAX_MESSAGE_SIZE, MAX_LINE_LENGTH};
pub use registry::{CarrierFactory, CarrierRegistry};
pub use text::{TextCarrier, TextState};

use crate::message::Message;

/// Static description of a carrier kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierDescriptor {
    /// Registry name, e.g. `tcp`.
    pub name: String,
    /// The 8 bytes that open every stream of this kind.
    pub header: [u8; 8],
    /// Line-oriented, human-typable framing.
    pub text_mode: bool,
    /// The acceptor can answer a message with a reply.
    pub supports_reply: bool,
    /// Handshake and every message are acknowledged.
    pub requires_ack: bool,
    /// The sender's name is folded into the header instead of following it.
    pub can_escape_route_in_tag: bool,
    /// An index (protocol revision) is exchanged during the handshake.
    pub negotiates_index: bool,
}

impl CarrierDescriptor {
    /// A descriptor with every capability switched off.
    pub fn new(name: impl Into<String>, header: [u8; 8]) -> Self {
        Self {
            name: name.into(),
            header,
            text_mode: false,
            supports_reply: false,
            requires_ack: false,
            can_escape_route_in_tag: false,
            negotiates_index: false,
        }
    }

    /// Marks the carrier as line-oriented.
    #[must_use]
    pub fn with_text_mode(mut self) -> Self {
        self.text_mode = true;
        self
    }

    /// Enables replies.
    #[must_use]
    pub fn with_reply(mut self) -> Self {
        self.supports_reply = true;
        self
    }

    /// Enables acknowledgements.
    #[must_use]
    pub fn with_ack(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    /// Folds the sender name into the header.
    #[must_use]
    pub fn with_route_in_tag(mut self) -> Self {
        self.can_escape_route_in_tag = true;
        self
    }

    /// Enables the index exchange.
    #[must_use]
    pub fn with_index_handshake(mut self) -> Self {
        self.negotiates_index = true;
        self
    }
}

/// What a carrier read off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A message, and whether the sender waits for a reply.
    Message {
        /// The message.
        message: Message,
        /// `true` if the sender expects a reply frame back.
        wants_reply: bool,
    },
    /// The sender announced an orderly end of the connection.
    Closed,
}

/// Per-connection protocol strategy.
///
/// One instance serves one connection and may keep state across calls.
/// Handshake callbacks are invoked by the negotiator in this order:
///
/// | initiator | acceptor |
/// |---|---|
/// | `send_header` | (negotiator reads 8 bytes, `matches_header`) |
/// | `send_sender_specifier` unless the route is in the tag | `expect_sender_specifier` |
/// | `send_index` if negotiated | `expect_index` if negotiated |
/// | `expect_reply_to_header` | `respond_to_header` |
/// | `send_ack`, `expect_ack` if required | `expect_ack`, `send_ack` if required |
///
/// The acceptor answers the header only after it has validated the
/// specifier and index, so an initiator never considers a connection up
/// that the acceptor has refused.
pub trait Carrier: Send {
    /// Static description.
    fn descriptor(&self) -> &CarrierDescriptor;

    /// Returns `true` if `header` opens a stream of this carrier.
    fn matches_header(&self, header: &[u8; 8]) -> bool {
        *header == self.descriptor().header
    }

    /// Fills in the header this carrier opens streams with.
    fn write_header(&self, header: &mut [u8; 8]) {
        *header = self.descriptor().header;
    }

    /// See [`CarrierDescriptor::text_mode`].
    fn is_text_mode(&self) -> bool {
        self.descriptor().text_mode
    }

    /// See [`CarrierDescriptor::supports_reply`].
    fn supports_reply(&self) -> bool {
        self.descriptor().supports_reply
    }

    /// See [`CarrierDescriptor::requires_ack`].
    fn requires_ack(&self) -> bool {
        self.descriptor().requires_ack
    }

    /// See [`CarrierDescriptor::can_escape_route_in_tag`].
    fn can_escape_route_in_tag(&self) -> bool {
        self.descriptor().can_escape_route_in_tag
    }

    /// See [`CarrierDescriptor::negotiates_index`].
    fn negotiates_index(&self) -> bool {
        self.descriptor().negotiates_index
    }

    /// Initiator: announces the carrier.
    fn send_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let mut header = [0u8; 8];
        self.write_header(&mut header);
        link.write_all(&header)
    }

    /// Initiator: identifies the sender. Not called when the route is
    /// carried in the tag.
    fn send_sender_specifier(&mut self, link: &mut Link) -> Result<(), ProtocolError>;

    /// Acceptor: reads the sender's name. An empty name means anonymous.
    fn expect_sender_specifier(&mut self, link: &mut Link) -> Result<String, ProtocolError>;

    /// Initiator: announces the protocol revision.
    fn send_index(&mut self, link: &mut Link) -> Result<(), ProtocolError>;

    /// Acceptor: validates the announced revision.
    fn expect_index(&mut self, link: &mut Link) -> Result<(), ProtocolError>;

    /// Acceptor: accepts the connection.
    fn respond_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError>;

    /// Initiator: waits for the acceptor's verdict.
    fn expect_reply_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError>;

    /// Sends an acknowledgement.
    fn send_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError>;

    /// Waits for an acknowledgement.
    fn expect_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError>;

    /// Frames and sends one message.
    fn write(
        &mut self,
        link: &mut Link,
        message: &Message,
        wants_reply: bool,
    ) -> Result<(), ProtocolError>;

    /// Reads the next message or end-of-connection marker.
    fn read(&mut self, link: &mut Link) -> Result<Incoming, ProtocolError>;

    /// Sends a reply to the message just read.
    fn write_reply(&mut self, link: &mut Link, reply: &Message) -> Result<(), ProtocolError> {
        if !self.supports_reply() {
            return Err(ProtocolError::Unsupported {
                carrier: self.descriptor().name.clone(),
                operation: "replies",
            });
        }
        self.write(link, reply, false)
    }

    /// Reads the reply to the message just written.
    fn read_reply(&mut self, link: &mut Link) -> Result<Message, ProtocolError> {
        match self.read(link)? {
            Incoming::Message { message, .. } => Ok(message),
            Incoming::Closed => Err(ProtocolError::malformed(
                "reply",
                "peer closed instead of replying",
            )),
        }
    }

    /// Tells the peer this side is about to close. Best effort.
    fn write_goodbye(&mut self, _link: &mut Link) -> Result<(), ProtocolError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Carrier({})", self.descriptor().name)
    }
}
