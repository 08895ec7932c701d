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

//! Endpoint layer for portlink.
//!
//! An [`Endpoint`] is a named messaging port. It listens for peers, connects
//! to peers, and moves [`Message`](crate::Message)s between them:
//!
//! - every **input** connection (one a peer opened to us) is read by its own
//!   thread, and each message is handed to the endpoint's [`ReadHandler`];
//! - every **output** connection (one we opened) is written by its own
//!   thread, and [`Endpoint::send`] fans a message out to all of them.
//!
//! # Connection setup
//!
//! Before a connection carries messages, both sides run the handshake in
//! [`ConnectionNegotiator`]: the initiator announces a carrier through an
//! 8-byte header, names itself, and the two sides agree on a version and
//! acknowledgement mode. Any failure ends the connection on both sides.
//!
//! # Backpressure
//!
//! Writers take work only while idle. [`SendPolicy::Block`] waits for each
//! writer in turn; [`SendPolicy::Drop`] skips writers still busy with an
//! earlier message, so one slow peer cannot hold up the others.
//!
//! # Bookkeeping
//!
//! A manager thread owns the connection sets. It counts an *event* for
//! every connection accepted or initiated and one for closing the endpoint,
//! reaps connections whose threads ended, and on close joins every thread.

mod builder;
mod config;
mod connection;
#[allow(clippy::module_inception)]
mod endpoint;
mod error;
mod handler;
mod manager;
mod negotiator;

pub use builder::EndpointBuilder;
pub use config::{EndpointConfig, SendPolicy};
pub use connection::{ConnectionId, ConnectionInfo, Direction, SendReport};
pub use endpoint::Endpoint;
pub use error::EndpointError;
pub use handler::{ReadHandler, Replier};
pub use negotiator::{
    ConnectionFailed, ConnectionNegotiator, Established, HandshakeState, Role, PROTOCOL_NOT_FOUND,
};
