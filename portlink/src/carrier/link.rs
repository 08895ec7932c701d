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

//! The per-connection byte stream a carrier speaks over.

use crate::carrier::ProtocolError;
use crate::contact::Route;
use crate::transport::{ShutdownHandle, Transport, TransportError, TransportMetadata};
use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;

/// Default cap on a single message's total size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Cap on a single text line (headers, specifiers, markers).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A buffered stream plus the route it serves.
///
/// Reads go through an internal buffer so text carriers can consume lines
/// without losing bytes that follow them; writes go straight to the stream.
pub struct Link {
    stream: BufReader<Box<dyn Transport>>,
    route: Route,
    max_message_size: usize,
}

impl Link {
    /// Wraps an open stream.
    pub fn new(stream: Box<dyn Transport>, route: Route) -> Self {
        Self {
            stream: BufReader::new(stream),
            route,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Sets the largest message this link will read or write.
    #[must_use]
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Route served by this link.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Replaces the route, e.g. once the sender has identified itself.
    pub fn set_route(&mut self, route: Route) {
        self.route = route;
    }

    /// Largest message accepted on this link.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Underlying stream metadata.
    pub fn metadata(&self) -> &TransportMetadata {
        self.stream.get_ref().metadata()
    }

    /// Applies a read/write timeout to the underlying stream.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.stream.get_mut().set_timeout(timeout)
    }

    /// Cross-thread shutdown handle for the underlying stream.
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle, TransportError> {
        self.stream.get_ref().shutdown_handle()
    }

    /// Shuts the stream down. Errors are ignored: the link is unusable either way.
    pub fn shutdown(&mut self) {
        let _ = self.stream.get_mut().shutdown();
    }

    fn timeout(&self) -> Option<Duration> {
        self.stream.get_ref().timeout()
    }

    /// Fills `buf` completely.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let timeout = self.timeout();
        self.stream
            .read_exact(buf)
            .map_err(|e| TransportError::from_read(e, timeout).into())
    }

    /// Reads a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.read_array::<4>().map(u32::from_le_bytes)
    }

    /// Reads `len` bytes into a fresh vector.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads one line, without its `\n` or `\r\n` terminator.
    pub fn read_line(&mut self) -> Result<String, ProtocolError> {
        let timeout = self.timeout();
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(MAX_LINE_LENGTH as u64 + 1)
            .read_until(b'\n', &mut line)
            .map_err(|e| TransportError::from_read(e, timeout))?;

        if read == 0 {
            return Err(TransportError::ConnectionLost {
                reason: "stream ended before a line was read".to_string(),
                source: None,
            }
            .into());
        }
        if line.last() != Some(&b'\n') {
            if line.len() > MAX_LINE_LENGTH {
                return Err(ProtocolError::malformed("line", "line too long"));
            }
            return Err(TransportError::ConnectionLost {
                reason: "stream ended mid-line".to_string(),
                source: None,
            }
            .into());
        }
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line).map_err(|_| ProtocolError::malformed("line", "not valid UTF-8"))
    }

    /// Writes all of `buf`.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), ProtocolError> {
        let timeout = self.timeout();
        self.stream
            .get_mut()
            .write_all(buf)
            .map_err(|e| TransportError::from_write(e, timeout).into())
    }

    /// Writes a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.write_all(&value.to_le_bytes())
    }

    /// Writes `line` followed by `\n`.
    pub fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write_all(&buf)
    }

    /// Flushes the stream.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        let timeout = self.timeout();
        self.stream
            .get_mut()
            .flush()
            .map_err(|e| TransportError::from_write(e, timeout).into())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("transport", &self.metadata().id)
            .field("route", &self.route)
            .finish()
    }
}
