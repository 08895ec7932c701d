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

//! Message envelopes.
//!
//! A [`Message`] is an ordered, non-empty sequence of byte blocks split into
//! header blocks and payload blocks. Once built, its block count and every
//! block length are fixed, so carriers can announce sizes before sending a
//! single payload byte.

use crate::serialization::{DeserializationError, SerializationError, Serializer};
use std::fmt;

/// Error returned when a message cannot be assembled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The builder held no blocks at all.
    #[error("message has no blocks")]
    Empty,
}

/// Immutable message envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    header: Vec<Vec<u8>>,
    payload: Vec<Vec<u8>>,
    len: usize,
}

impl Message {
    /// Starts building a message block by block.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// A message with a single payload block.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let block = bytes.into();
        Self {
            len: block.len(),
            header: Vec::new(),
            payload: vec![block],
        }
    }

    /// A message whose single payload block is UTF-8 text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::from_bytes(text.into().into_bytes())
    }

    /// A message with one zero-length payload block.
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Encodes `value` into a single payload block.
    pub fn encode<S, T>(serializer: &S, value: &T) -> Result<Self, SerializationError>
    where
        S: Serializer,
        T: serde::Serialize + ?Sized,
    {
        serializer.serialize(value).map(Self::from_bytes)
    }

    /// Decodes the concatenated payload.
    pub fn decode<S, T>(&self, serializer: &S) -> Result<T, DeserializationError>
    where
        S: Serializer,
        T: serde::de::DeserializeOwned,
    {
        match self.payload.as_slice() {
            [single] => serializer.deserialize(single),
            _ => serializer.deserialize(&self.payload_bytes()),
        }
    }

    /// Total number of blocks, header and payload.
    pub fn block_count(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Length of block `index`, counting header blocks first.
    pub fn block_len(&self, index: usize) -> Option<usize> {
        self.block(index).map(<[u8]>::len)
    }

    /// Block `index`, counting header blocks first.
    pub fn block(&self, index: usize) -> Option<&[u8]> {
        if index < self.header.len() {
            self.header.get(index).map(Vec::as_slice)
        } else {
            self.payload.get(index - self.header.len()).map(Vec::as_slice)
        }
    }

    /// All blocks in transmission order.
    pub fn blocks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.header
            .iter()
            .chain(self.payload.iter())
            .map(Vec::as_slice)
    }

    /// Header blocks.
    pub fn header_blocks(&self) -> &[Vec<u8>] {
        &self.header
    }

    /// Payload blocks.
    pub fn payload_blocks(&self) -> &[Vec<u8>] {
        &self.payload
    }

    /// Total byte length over all blocks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if every block is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload blocks concatenated.
    pub fn payload_bytes(&self) -> Vec<u8> {
        self.payload.concat()
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<String> {
        String::from_utf8(self.payload_bytes()).ok()
    }

    pub(crate) fn from_parts(header: Vec<Vec<u8>>, payload: Vec<Vec<u8>>) -> Self {
        let len = header.iter().chain(payload.iter()).map(Vec::len).sum();
        Self {
            header,
            payload,
            len,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("header_blocks", &self.header.len())
            .field("payload_blocks", &self.payload.len())
            .field("len", &self.len)
            .finish()
    }
}

/// Incrementally assembles a [`Message`].
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    header: Vec<Vec<u8>>,
    payload: Vec<Vec<u8>>,
}

impl MessageBuilder {
    /// Appends a header block.
    pub fn header(&mut self, block: impl Into<Vec<u8>>) -> &mut Self {
        self.header.push(block.into());
        self
    }

    /// Appends a payload block.
    pub fn payload(&mut self, block: impl Into<Vec<u8>>) -> &mut Self {
        self.payload.push(block.into());
        self
    }

    /// Appends UTF-8 text as a payload block.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.payload(text.as_bytes())
    }

    /// Number of blocks added so far.
    pub fn block_count(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Returns `true` if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.block_count() == 0
    }

    /// Discards all blocks.
    pub fn clear(&mut self) {
        self.header.clear();
        self.payload.clear();
    }

    /// Freezes the blocks into a message, leaving the builder empty.
    pub fn finish(&mut self) -> Result<Message, MessageError> {
        if self.is_empty() {
            return Err(MessageError::Empty);
        }
        Ok(Message::from_parts(
            std::mem::take(&mut self.header),
            std::mem::take(&mut self.payload),
        ))
    }
}
