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

//! Connection and message counters for endpoints.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for one endpoint.
///
/// ```rust
/// use portlink::observability::EndpointMetrics;
///
/// let metrics = EndpointMetrics::new();
/// metrics.record_connection_opened();
/// metrics.record_message_sent(128);
///
/// let stats = metrics.snapshot();
/// assert_eq!(stats.active_connections, 1);
/// assert_eq!(stats.bytes_sent, 128);
/// ```
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    connections_refused: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_skipped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of [`EndpointMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EndpointStats {
    /// Connections opened, in either direction.
    pub connections_opened: u64,
    /// Connections that have ended.
    pub connections_closed: u64,
    /// Inbound connections turned away at the connection limit.
    pub connections_refused: u64,
    /// Connections currently open.
    pub active_connections: u64,
    /// Messages written, counted once per connection.
    pub messages_sent: u64,
    /// Messages read.
    pub messages_received: u64,
    /// Per-connection deliveries skipped under the drop policy.
    pub messages_skipped: u64,
    /// Payload bytes written.
    pub bytes_sent: u64,
    /// Payload bytes read.
    pub bytes_received: u64,
}

impl EndpointMetrics {
    /// Creates a new tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a connection completing its handshake.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        {
            metrics::counter!("portlink.connections.opened").increment(1);
            metrics::gauge!("portlink.connections.active").increment(1.0);
        }
    }

    /// Records an established connection ending.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        {
            metrics::counter!("portlink.connections.closed").increment(1);
            metrics::gauge!("portlink.connections.active").decrement(1.0);
        }
    }

    /// Records an inbound connection turned away.
    pub fn record_connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("portlink.connections.refused").increment(1);
    }

    /// Records one message of `bytes` written to one connection.
    pub fn record_message_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        {
            metrics::counter!("portlink.messages.sent").increment(1);
            metrics::counter!("portlink.bytes.sent").increment(bytes as u64);
        }
    }

    /// Records one message of `bytes` read from a connection.
    pub fn record_message_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        {
            metrics::counter!("portlink.messages.received").increment(1);
            metrics::counter!("portlink.bytes.received").increment(bytes as u64);
        }
    }

    /// Records `count` connections skipped for one message.
    pub fn record_messages_skipped(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.messages_skipped
            .fetch_add(count as u64, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("portlink.messages.skipped").increment(count as u64);
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> EndpointStats {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        EndpointStats {
            connections_opened: opened,
            connections_closed: closed,
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            active_connections: opened.saturating_sub(closed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.connections_opened,
            &self.connections_closed,
            &self.connections_refused,
            &self.messages_sent,
            &self.messages_received,
            &self.messages_skipped,
            &self.bytes_sent,
            &self.bytes_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lifecycle() {
        let metrics = EndpointMetrics::new();
        metrics.record_connection_opened();
        metrics.record_connection_opened();
        metrics.record_connection_closed();
        metrics.record_connection_refused();

        let stats = metrics.snapshot();
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(stats.connections_closed, 1);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.connections_refused, 1);
    }

    #[test]
    fn test_message_flow() {
        let metrics = EndpointMetrics::new();
        metrics.record_message_sent(10);
        metrics.record_message_sent(20);
        metrics.record_message_received(5);
        metrics.record_messages_skipped(3);
        metrics.record_messages_skipped(0);

        let stats = metrics.snapshot();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 30);
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.bytes_received, 5);
        assert_eq!(stats.messages_skipped, 3);
    }

    #[test]
    fn test_reset() {
        let metrics = EndpointMetrics::new();
        metrics.record_message_sent(10);
        metrics.reset();
        assert_eq!(metrics.snapshot(), EndpointStats::default());
    }

    #[test]
    fn test_stats_serialize() {
        let metrics = EndpointMetrics::new();
        metrics.record_message_received(4);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["messages_received"], 1);
        assert_eq!(json["bytes_received"], 4);
    }
}
