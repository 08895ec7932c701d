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

#![doc = include_str!("../../README.md")]
#![allow(clippy::module_inception)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! ## Architecture
//!
//! Portlink is organized into several layers:
//!
//! - **[`transport`]**: Blocking byte streams (TCP, in-memory pairs)
//! - **[`carrier`]**: Wire formats selected per connection by an 8-byte header
//! - **[`endpoint`]**: Named endpoints, the connection handshake and the
//!   thread-per-connection engine
//! - **[`write_buffer`]**: A fixed pool of reusable outgoing messages
//! - **[`pipeline`]**: Single-slot buffers and stages for in-process
//!   processing chains
//! - **[`name`]**: Name-to-contact resolution
//! - **[`observability`]**: Error accounting, tracing and metrics

pub mod carrier;
pub mod contact;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod name;
pub mod observability;
pub mod pipeline;
pub mod serialization;
pub mod transport;
pub mod write_buffer;

pub use carrier::{Carrier, CarrierDescriptor, CarrierRegistry, ProtocolError};
pub use contact::{Contact, ContactError, Route};
pub use endpoint::{
    ConnectionId, ConnectionInfo, Direction, Endpoint, EndpointBuilder, EndpointConfig,
    EndpointError, ReadHandler, Replier, SendPolicy, SendReport,
};
pub use error::{ErrorKind, PortlinkError};
pub use message::{Message, MessageBuilder, MessageError};
pub use name::{LocalNameServer, NameResolver, ResolverError};
pub use observability::{EndpointStats, ErrorMetrics, ErrorObserver};
pub use pipeline::{AtomicBuffer, PipelineError, PipelineStage, Transform};
pub use serialization::{JsonSerializer, Serializer};
pub use transport::{MemoryTransport, TcpTransport, Transport, TransportError};
pub use write_buffer::{BufferHandle, SlotState, WriteBufferError, WriteBufferPool};
