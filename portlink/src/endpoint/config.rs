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

//! Configuration types for endpoints.

use crate::carrier::DEFAULT_MAX_MESSAGE_SIZE;
use crate::contact::DEFAULT_CARRIER;
use crate::write_buffer::DEFAULT_WRITE_BUFFER_SLOTS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What `send` does with a connection whose writer is still busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendPolicy {
    /// Wait for the writer to become ready.
    #[default]
    Block,
    /// Skip that connection for this message.
    Drop,
}

impl fmt::Display for SendPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendPolicy::Block => write!(f, "block"),
            SendPolicy::Drop => write!(f, "drop"),
        }
    }
}

/// Configuration for an endpoint.
///
/// Every field has a default, so a partial document deserializes.
///
/// # Examples
///
/// ```rust
/// use portlink::endpoint::{EndpointConfig, SendPolicy};
/// use std::time::Duration;
///
/// let config = EndpointConfig {
///     handshake_timeout: Duration::from_secs(10),
///     default_send_policy: SendPolicy::Drop,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Bound on every read and write made while negotiating a connection.
    ///
    /// Default: 5 seconds
    pub handshake_timeout: Duration,

    /// Number of slots in the endpoint's write buffer pool.
    ///
    /// Default: 2
    pub write_buffer_slots: usize,

    /// How long acquiring a write buffer may block. `None` waits forever.
    ///
    /// Default: None
    pub acquire_timeout: Option<Duration>,

    /// How long `close` waits for queued writes before cutting connections.
    ///
    /// Default: 5 seconds
    pub drain_timeout: Duration,

    /// Policy for sends that take no explicit policy.
    ///
    /// Default: [`SendPolicy::Block`]
    pub default_send_policy: SendPolicy,

    /// Carrier used when listening on a contact that does not name one.
    ///
    /// Default: `"tcp"`
    pub default_carrier: String,

    /// Host to bind when listening on a contact without an address.
    ///
    /// Default: `"127.0.0.1"`
    pub bind_host: String,

    /// Register the bound contact with the endpoint's name resolver.
    ///
    /// Default: true
    pub register_with_resolver: bool,

    /// Maximum number of inbound connections. Further ones are refused.
    ///
    /// Default: None (unlimited)
    pub max_connections: Option<usize>,

    /// Largest message a connection will read or write, in bytes.
    ///
    /// Default: 16 MB
    pub max_message_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            write_buffer_slots: DEFAULT_WRITE_BUFFER_SLOTS,
            acquire_timeout: None,
            drain_timeout: Duration::from_secs(5),
            default_send_policy: SendPolicy::Block,
            default_carrier: DEFAULT_CARRIER.to_string(),
            bind_host: "127.0.0.1".to_string(),
            register_with_resolver: true,
            max_connections: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl EndpointConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the number of write buffer slots.
    #[must_use]
    pub fn with_write_buffer_slots(mut self, slots: usize) -> Self {
        self.write_buffer_slots = slots;
        self
    }

    /// Bounds how long acquiring a write buffer may block.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets the close drain timeout.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the default send policy.
    #[must_use]
    pub fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.default_send_policy = policy;
        self
    }

    /// Sets the default carrier.
    #[must_use]
    pub fn with_default_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.default_carrier = carrier.into();
        self
    }

    /// Sets the host bound for address-less contacts.
    #[must_use]
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Enables or disables name registration.
    #[must_use]
    pub fn with_registration(mut self, register: bool) -> Self {
        self.register_with_resolver = register;
        self
    }

    /// Sets the maximum number of inbound connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Sets the maximum message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if any value is out of range.
    pub fn validate(&self) -> Result<(), String> {
        if self.handshake_timeout.is_zero() {
            return Err("handshake_timeout must be greater than 0".to_string());
        }

        if self.write_buffer_slots == 0 {
            return Err("write_buffer_slots must be greater than 0".to_string());
        }

        if self.max_message_size == 0 {
            return Err("max_message_size must be greater than 0".to_string());
        }

        if self.max_message_size > u32::MAX as usize {
            return Err("max_message_size must fit in 32 bits".to_string());
        }

        if self.default_carrier.is_empty() {
            return Err("default_carrier must not be empty".to_string());
        }

        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }

        Ok(())
    }
}
