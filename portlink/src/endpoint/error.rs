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

//! Error types for the endpoint layer.

use crate::endpoint::ConnectionId;
use std::fmt;

/// Errors raised by [`Endpoint`](crate::Endpoint) operations themselves.
///
/// Failures of the layers underneath (transport, handshake, name lookup)
/// are reported through their own types in [`PortlinkError`](crate::PortlinkError).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The endpoint has been closed.
    Closed,

    /// `listen` was called on an endpoint that is already listening.
    AlreadyListening {
        /// The contact already bound.
        contact: String,
    },

    /// The operation needs a bound listener.
    NotListening,

    /// The named carrier is not registered.
    UnknownCarrier {
        /// The carrier name.
        carrier: String,
    },

    /// A peer was named without an address and no resolver is configured.
    NoResolver {
        /// The name that could not be looked up.
        name: String,
    },

    /// There is no live output connection to send on.
    NoOutputs,

    /// No output connection uses a carrier that carries replies.
    RepliesUnsupported,

    /// The connection died before a reply arrived.
    ReplyLost {
        /// The output connection the request went out on.
        connection: ConnectionId,
    },

    /// A message without any blocks was submitted.
    EmptyMessage,

    /// Invalid configuration.
    InvalidConfiguration {
        /// Description of the configuration error.
        reason: String,
    },
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "endpoint is closed"),
            Self::AlreadyListening { contact } => {
                write!(f, "endpoint is already listening on {}", contact)
            }
            Self::NotListening => write!(f, "endpoint is not listening"),
            Self::UnknownCarrier { carrier } => {
                write!(f, "carrier '{}' is not registered", carrier)
            }
            Self::NoResolver { name } => {
                write!(f, "cannot look up '{}': no name resolver configured", name)
            }
            Self::NoOutputs => write!(f, "endpoint has no output connections"),
            Self::RepliesUnsupported => {
                write!(f, "no output connection carries replies")
            }
            Self::ReplyLost { connection } => {
                write!(f, "{} closed before the reply arrived", connection)
            }
            Self::EmptyMessage => write!(f, "message has no content"),
            Self::InvalidConfiguration { reason } => {
                write!(f, "invalid configuration: {}", reason)
            }
        }
    }
}

impl std::error::Error for EndpointError {}
