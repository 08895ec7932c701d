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

//! Blocking stream and listener contracts.

use crate::transport::{TransportError, TransportMetadata};
use std::fmt;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

/// A connected, bidirectional byte stream.
///
/// Every connection is serviced by exactly one thread, so implementations
/// only need to be `Send`. Another thread can still interrupt a blocked read
/// or write through a [`ShutdownHandle`].
pub trait Transport: Read + Write + Send {
    /// Stream metadata.
    fn metadata(&self) -> &TransportMetadata;

    /// Applies a read and write timeout; `None` blocks indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// The timeout currently in force.
    fn timeout(&self) -> Option<Duration>;

    /// A handle that can shut the stream down from another thread.
    fn shutdown_handle(&self) -> Result<ShutdownHandle, TransportError>;

    /// Shuts the stream down in both directions.
    fn shutdown(&mut self) -> Result<(), TransportError>;
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = self.metadata();
        f.debug_struct("Transport")
            .field("id", &metadata.id)
            .field("kind", &metadata.kind)
            .field("peer_addr", &metadata.peer_addr)
            .finish()
    }
}

/// A bound socket that hands out [`Transport`]s.
pub trait TransportListener: Send + Sync {
    /// Blocks until a peer connects.
    fn accept(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// The bound address.
    fn local_addr(&self) -> SocketAddr;

    /// Wakes a thread blocked in [`accept`](Self::accept). The woken
    /// `accept` returns a stream that the caller is expected to discard.
    fn unblock(&self) -> Result<(), TransportError>;
}

/// Cross-thread shutdown for a single stream.
pub struct ShutdownHandle {
    shutdown: Box<dyn Fn() + Send + Sync>,
}

impl ShutdownHandle {
    /// Wraps the action that shuts the stream down.
    pub fn new(shutdown: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            shutdown: Box::new(shutdown),
        }
    }

    /// Shuts the stream down. Blocked reads and writes return promptly.
    pub fn shutdown(&self) {
        (self.shutdown)();
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShutdownHandle")
    }
}
