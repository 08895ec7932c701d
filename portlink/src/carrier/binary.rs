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

//! Binary carriers: `tcp` and `fast_tcp`.
//!
//! Wire layout, all integers little-endian:
//!
//! - header: the 8-byte tag
//! - sender specifier: `u32` length, then the UTF-8 name
//! - index: `YA`, `u16` version, flags (bit 0: acks), `0`, `RP`
//! - reply to header: the acceptor echoes the tag
//! - ack: `YAack\0RP`
//! - message: `YA\x0a\0\0\0RP`, `u32` header block count, `u32` payload
//!   block count, flags (bit 0: reply wanted), one `u32` length per block,
//!   then the blocks back to back
//! - goodbye: `YAbye\0RP`

use crate::carrier::{Carrier, CarrierDescriptor, Incoming, Link, ProtocolError};
use crate::message::Message;

/// Protocol revision announced in the index exchange.
pub const WIRE_VERSION: u16 = 1;

const TCP_HEADER: [u8; 8] = *b"YA\x64\x1E\x00\x00RP";
const FAST_TCP_HEADER: [u8; 8] = *b"YA\x65\x1E\x00\x00RP";
const ACK: [u8; 8] = *b"YAack\x00RP";
const GOODBYE: [u8; 8] = *b"YAbye\x00RP";
const MESSAGE_MARKER: [u8; 8] = *b"YA\x0a\x00\x00\x00RP";

const MAX_SPECIFIER_LEN: u32 = 4096;
const MAX_BLOCKS: u32 = 4096;

const FLAG_ACK: u8 = 0x01;
const FLAG_REPLY: u8 = 0x01;

/// Length-prefixed binary framing over a stream.
#[derive(Debug, Clone)]
pub struct BinaryCarrier {
    descriptor: CarrierDescriptor,
}

impl BinaryCarrier {
    /// Descriptor of the acknowledged `tcp` carrier.
    pub fn tcp_descriptor() -> CarrierDescriptor {
        CarrierDescriptor::new("tcp", TCP_HEADER)
            .with_reply()
            .with_ack()
            .with_index_handshake()
    }

    /// Descriptor of the unacknowledged `fast_tcp` carrier.
    pub fn fast_tcp_descriptor() -> CarrierDescriptor {
        CarrierDescriptor::new("fast_tcp", FAST_TCP_HEADER)
            .with_reply()
            .with_index_handshake()
    }

    /// A `tcp` carrier instance.
    pub fn tcp() -> Self {
        Self::with_descriptor(Self::tcp_descriptor())
    }

    /// A `fast_tcp` carrier instance.
    pub fn fast_tcp() -> Self {
        Self::with_descriptor(Self::fast_tcp_descriptor())
    }

    /// Binary framing under a custom descriptor.
    pub fn with_descriptor(descriptor: CarrierDescriptor) -> Self {
        Self { descriptor }
    }

    fn expect_marker(
        link: &mut Link,
        marker: &[u8; 8],
        stage: &'static str,
    ) -> Result<(), ProtocolError> {
        let found = link.read_array::<8>()?;
        if &found != marker {
            return Err(ProtocolError::malformed(
                stage,
                format!("unexpected bytes {}", found.escape_ascii()),
            ));
        }
        Ok(())
    }

    fn read_message(&mut self, link: &mut Link) -> Result<(Message, bool), ProtocolError> {
        let header_count = link.read_u32()?;
        let payload_count = link.read_u32()?;
        let flags = link.read_array::<1>()?[0];

        let blocks = header_count.saturating_add(payload_count);
        if blocks == 0 || blocks > MAX_BLOCKS {
            return Err(ProtocolError::malformed(
                "message index",
                format!("{} blocks announced", blocks),
            ));
        }

        let mut lengths = Vec::with_capacity(blocks as usize);
        let mut total = 0usize;
        for _ in 0..blocks {
            let len = link.read_u32()? as usize;
            total = total.saturating_add(len);
            lengths.push(len);
        }
        if total > link.max_message_size() {
            return Err(ProtocolError::MessageTooLarge {
                size: total,
                limit: link.max_message_size(),
            });
        }

        let mut header = Vec::with_capacity(header_count as usize);
        let mut payload = Vec::with_capacity(payload_count as usize);
        for (i, len) in lengths.into_iter().enumerate() {
            let block = link.read_vec(len)?;
            if i < header_count as usize {
                header.push(block);
            } else {
                payload.push(block);
            }
        }
        Ok((Message::from_parts(header, payload), flags & FLAG_REPLY != 0))
    }
}

impl Carrier for BinaryCarrier {
    fn descriptor(&self) -> &CarrierDescriptor {
        &self.descriptor
    }

    fn send_sender_specifier(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let name = link.route().from().as_bytes().to_vec();
        link.write_u32(name.len() as u32)?;
        link.write_all(&name)
    }

    fn expect_sender_specifier(&mut self, link: &mut Link) -> Result<String, ProtocolError> {
        let len = link.read_u32()?;
        if len > MAX_SPECIFIER_LEN {
            return Err(ProtocolError::malformed(
                "sender specifier",
                format!("{} byte name", len),
            ));
        }
        let name = link.read_vec(len as usize)?;
        String::from_utf8(name)
            .map_err(|_| ProtocolError::malformed("sender specifier", "name is not UTF-8"))
    }

    fn send_index(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let [lo, hi] = WIRE_VERSION.to_le_bytes();
        let flags = if self.requires_ack() { FLAG_ACK } else { 0 };
        link.write_all(&[b'Y', b'A', lo, hi, flags, 0, b'R', b'P'])
    }

    fn expect_index(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let index = link.read_array::<8>()?;
        if &index[..2] != b"YA" || &index[6..] != b"RP" {
            return Err(ProtocolError::malformed(
                "index",
                format!("unexpected bytes {}", index.escape_ascii()),
            ));
        }
        let version = u16::from_le_bytes([index[2], index[3]]);
        if version != WIRE_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: WIRE_VERSION,
                found: version,
            });
        }
        let peer_acks = index[4] & FLAG_ACK != 0;
        if peer_acks != self.requires_ack() {
            return Err(ProtocolError::malformed(
                "index",
                "acknowledgement mode disagrees with header",
            ));
        }
        Ok(())
    }

    fn respond_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let mut header = [0u8; 8];
        self.write_header(&mut header);
        link.write_all(&header)?;
        link.flush()
    }

    fn expect_reply_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let reply = link.read_array::<8>()?;
        if !self.matches_header(&reply) {
            return Err(ProtocolError::Rejected {
                reason: String::from_utf8_lossy(&reply).into_owned(),
            });
        }
        Ok(())
    }

    fn send_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        link.write_all(&ACK)?;
        link.flush()
    }

    fn expect_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        Self::expect_marker(link, &ACK, "acknowledgement")
    }

    fn write(
        &mut self,
        link: &mut Link,
        message: &Message,
        wants_reply: bool,
    ) -> Result<(), ProtocolError> {
        if message.len() > link.max_message_size() {
            return Err(ProtocolError::MessageTooLarge {
                size: message.len(),
                limit: link.max_message_size(),
            });
        }
        if message.block_count() > MAX_BLOCKS as usize {
            return Err(ProtocolError::TooManyBlocks {
                count: message.block_count(),
                limit: MAX_BLOCKS as usize,
            });
        }
        let header_count = message.header_blocks().len() as u32;
        let payload_count = message.payload_blocks().len() as u32;

        let mut index = Vec::with_capacity(17 + 4 * message.block_count());
        index.extend_from_slice(&MESSAGE_MARKER);
        index.extend_from_slice(&header_count.to_le_bytes());
        index.extend_from_slice(&payload_count.to_le_bytes());
        index.push(if wants_reply { FLAG_REPLY } else { 0 });
        for block in message.blocks() {
            index.extend_from_slice(&(block.len() as u32).to_le_bytes());
        }
        link.write_all(&index)?;
        for block in message.blocks() {
            link.write_all(block)?;
        }
        link.flush()
    }

    fn read(&mut self, link: &mut Link) -> Result<Incoming, ProtocolError> {
        let marker = link.read_array::<8>()?;
        if marker == GOODBYE {
            return Ok(Incoming::Closed);
        }
        if marker != MESSAGE_MARKER {
            return Err(ProtocolError::malformed(
                "message index",
                format!("unexpected bytes {}", marker.escape_ascii()),
            ));
        }
        let (message, wants_reply) = self.read_message(link)?;
        Ok(Incoming::Message {
            message,
            wants_reply,
        })
    }

    fn write_goodbye(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        link.write_all(&GOODBYE)?;
        link.flush()
    }
}
