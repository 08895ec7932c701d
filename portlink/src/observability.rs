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

//! Observability support for portlink.
//!
//! Endpoints never panic or stop on a connection failure; they report it
//! here instead. Every reported [`PortlinkError`] is
//!
//! - counted by [`ErrorKind`] in [`ErrorMetrics`],
//! - logged through [`log_error`] when the `tracing` feature is enabled,
//! - and handed to each callback registered with an [`ErrorObserver`].
//!
//! [`EndpointMetrics`] tracks connection and message flow. With the
//! `observability` feature every counter is mirrored into the `metrics`
//! crate under the `portlink.` prefix.
//!
//! ```rust
//! use portlink::observability::ErrorMetrics;
//! use portlink::transport::TransportError;
//! use portlink::PortlinkError;
//!
//! let metrics = ErrorMetrics::new();
//! metrics.record_error(&PortlinkError::Transport(TransportError::Closed));
//! assert_eq!(metrics.stream_breaks(), 1);
//! assert_eq!(metrics.total_errors(), 1);
//! ```

mod metrics;

pub use self::metrics::{EndpointMetrics, EndpointStats};

use crate::error::{ErrorKind, PortlinkError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error counters by kind.
#[derive(Debug, Default)]
pub struct ErrorMetrics {
    bind_failures: AtomicU64,
    connect_failures: AtomicU64,
    handshake_failures: AtomicU64,
    stream_breaks: AtomicU64,
    resource_exhaustions: AtomicU64,
    other_errors: AtomicU64,
    recoverable_errors: AtomicU64,
    connection_closures: AtomicU64,
}

impl ErrorMetrics {
    /// Creates a new error metrics tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error and updates the relevant counters.
    pub fn record_error(&self, error: &PortlinkError) {
        let counter = match error.kind() {
            ErrorKind::BindFailure => &self.bind_failures,
            ErrorKind::ConnectFailure => &self.connect_failures,
            ErrorKind::HandshakeFailure => &self.handshake_failures,
            ErrorKind::StreamBroken => &self.stream_breaks,
            ErrorKind::ResourceExhausted => &self.resource_exhaustions,
            ErrorKind::Configuration | ErrorKind::NotFound | ErrorKind::Closed => {
                &self.other_errors
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        ::metrics::counter!("portlink.errors", "kind" => error.kind().as_str()).increment(1);

        if error.is_recoverable() {
            self.recoverable_errors.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "observability")]
            ::metrics::counter!("portlink.errors.recoverable").increment(1);
        }

        if error.should_close_connection() {
            self.connection_closures.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "observability")]
            ::metrics::counter!("portlink.closures.connection").increment(1);
        }

        #[cfg(feature = "observability")]
        ::metrics::counter!("portlink.errors.total").increment(1);
    }

    /// Listening sockets that could not be bound.
    #[must_use]
    pub fn bind_failures(&self) -> u64 {
        self.bind_failures.load(Ordering::Relaxed)
    }

    /// Peers that could not be reached.
    #[must_use]
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    /// Connections that failed during negotiation.
    #[must_use]
    pub fn handshake_failures(&self) -> u64 {
        self.handshake_failures.load(Ordering::Relaxed)
    }

    /// Established connections that broke.
    #[must_use]
    pub fn stream_breaks(&self) -> u64 {
        self.stream_breaks.load(Ordering::Relaxed)
    }

    /// Write buffer acquisitions that timed out.
    #[must_use]
    pub fn resource_exhaustions(&self) -> u64 {
        self.resource_exhaustions.load(Ordering::Relaxed)
    }

    /// Errors of every kind.
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.bind_failures()
            + self.connect_failures()
            + self.handshake_failures()
            + self.stream_breaks()
            + self.resource_exhaustions()
            + self.other_errors.load(Ordering::Relaxed)
    }

    /// Errors that a retry may get past.
    #[must_use]
    pub fn recoverable_errors(&self) -> u64 {
        self.recoverable_errors.load(Ordering::Relaxed)
    }

    /// Errors that ended a connection.
    #[must_use]
    pub fn connection_closures(&self) -> u64 {
        self.connection_closures.load(Ordering::Relaxed)
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.bind_failures,
            &self.connect_failures,
            &self.handshake_failures,
            &self.stream_breaks,
            &self.resource_exhaustions,
            &self.other_errors,
            &self.recoverable_errors,
            &self.connection_closures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

type ErrorCallback = Box<dyn Fn(&PortlinkError) + Send + Sync>;

/// Fans reported errors out to user callbacks.
///
/// ```rust
/// use portlink::observability::ErrorObserver;
/// use portlink::transport::TransportError;
/// use portlink::PortlinkError;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
///
/// let observer = ErrorObserver::new();
/// let seen = Arc::new(AtomicU64::new(0));
/// let counter = seen.clone();
/// observer.on_error(move |_| {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
///
/// observer.notify(&PortlinkError::Transport(TransportError::Closed));
/// assert_eq!(seen.load(Ordering::Relaxed), 1);
/// ```
#[derive(Clone, Default)]
pub struct ErrorObserver {
    callbacks: Arc<Mutex<Vec<Arc<ErrorCallback>>>>,
}

impl ErrorObserver {
    /// Creates a new error observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback to be invoked when errors occur.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&PortlinkError) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Arc::new(Box::new(callback)));
    }

    /// Invokes every registered callback with `error`.
    pub fn notify(&self, error: &PortlinkError) {
        let callbacks = self.callbacks.lock().clone();
        for callback in callbacks.iter() {
            callback(error);
        }
    }

    /// Removes all callbacks.
    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }
}

impl std::fmt::Debug for ErrorObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorObserver")
            .field("callback_count", &self.callbacks.lock().len())
            .finish()
    }
}

/// Logs an error with structured context using the tracing framework.
///
/// Broken streams and handshake failures are warnings; bind and resource
/// failures are errors; the rest are informational.
#[cfg(feature = "tracing")]
pub fn log_error(error: &PortlinkError) {
    let kind = error.kind();
    match kind {
        ErrorKind::BindFailure | ErrorKind::ResourceExhausted => {
            tracing::error!(
                error = %error,
                %kind,
                recoverable = error.is_recoverable(),
                "Endpoint error"
            );
        }
        ErrorKind::HandshakeFailure | ErrorKind::StreamBroken | ErrorKind::ConnectFailure => {
            tracing::warn!(
                error = %error,
                %kind,
                recoverable = error.is_recoverable(),
                should_close_connection = error.should_close_connection(),
                "Connection error"
            );
        }
        ErrorKind::Configuration | ErrorKind::NotFound | ErrorKind::Closed => {
            tracing::info!(error = %error, %kind, "Request refused");
        }
    }
}

/// Logs an error with structured context (no-op when tracing is disabled).
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn log_error(_error: &PortlinkError) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointError;
    use crate::transport::TransportError;
    use crate::write_buffer::WriteBufferError;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_metrics_new() {
        let metrics = ErrorMetrics::new();
        assert_eq!(metrics.total_errors(), 0);
        assert_eq!(metrics.stream_breaks(), 0);
    }

    #[test]
    fn test_metrics_by_kind() {
        let metrics = ErrorMetrics::new();
        metrics.record_error(&PortlinkError::Transport(TransportError::BindFailed {
            address: "0.0.0.0:1".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }));
        metrics.record_error(&PortlinkError::Transport(TransportError::Closed));
        metrics.record_error(&PortlinkError::WriteBuffer(WriteBufferError::Exhausted {
            slots: 2,
            waited: Duration::from_millis(1),
        }));
        metrics.record_error(&PortlinkError::Endpoint(EndpointError::Closed));

        assert_eq!(metrics.bind_failures(), 1);
        assert_eq!(metrics.stream_breaks(), 1);
        assert_eq!(metrics.resource_exhaustions(), 1);
        assert_eq!(metrics.total_errors(), 4);
        assert_eq!(metrics.recoverable_errors(), 1);
        assert_eq!(metrics.connection_closures(), 1);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = ErrorMetrics::new();
        metrics.record_error(&PortlinkError::Transport(TransportError::Closed));
        metrics.reset();
        assert_eq!(metrics.total_errors(), 0);
        assert_eq!(metrics.connection_closures(), 0);
    }

    #[test]
    fn test_observer_multiple_callbacks() {
        let observer = ErrorObserver::new();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            observer.on_error(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        observer.notify(&PortlinkError::Transport(TransportError::Closed));
        assert_eq!(counter.load(Ordering::Relaxed), 3);

        observer.clear();
        observer.notify(&PortlinkError::Transport(TransportError::Closed));
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_log_error() {
        log_error(&PortlinkError::Transport(TransportError::Closed));
        log_error(&PortlinkError::Endpoint(EndpointError::NoOutputs));
    }
}
