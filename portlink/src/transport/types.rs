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

//! Identifiers and metadata shared by all transports.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a byte stream, used to tell streams apart
/// in log output before the handshake has named the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    /// Wraps a raw id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Hands out the next unused id.
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport({})", self.0)
    }
}

/// Facts about a byte stream that are known once it is open.
#[derive(Debug, Clone)]
pub struct TransportMetadata {
    /// Stream id.
    pub id: TransportId,
    /// Local socket address, when the stream has one.
    pub local_addr: Option<SocketAddr>,
    /// Remote socket address, when the stream has one.
    pub peer_addr: Option<SocketAddr>,
    /// Stream kind, e.g. `tcp` or `memory`.
    pub kind: &'static str,
    /// When the stream was opened.
    pub created_at: Instant,
}

impl TransportMetadata {
    /// Metadata for a freshly opened stream.
    pub fn new(id: TransportId, kind: &'static str) -> Self {
        Self {
            id,
            local_addr: None,
            peer_addr: None,
            kind,
            created_at: Instant::now(),
        }
    }

    /// Sets the local address.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Sets the peer address.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Time since the stream was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
