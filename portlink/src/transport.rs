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

//! Byte-stream layer.
//!
//! Everything above this module talks to a peer through a boxed
//! [`Transport`]: a blocking `Read + Write` stream with metadata, a
//! timeout and a cross-thread [`ShutdownHandle`]. Listening sockets implement
//! [`TransportListener`], whose [`unblock`](TransportListener::unblock) lets
//! `Endpoint::close` wake an accept loop that is parked in `accept()`.
//!
//! - [`TcpTransport`] / [`TcpTransportListener`]: `std::net` TCP.
//! - [`MemoryTransport`]: in-process stream pairs for tests and loopback use.
//!
//! ```rust,no_run
//! use portlink::transport::{TcpTransport, TcpTransportListener, TransportListener};
//! use std::io::Write;
//!
//! # fn example() -> Result<(), portlink::transport::TransportError> {
//! let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())?;
//! let mut client = TcpTransport::connect(listener.local_addr(), None)?;
//! client.write_all(b"CONNECT /me\n")?;
//! let server = listener.accept()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod memory;
mod tcp;
mod traits;
mod types;

pub use error::TransportError;
pub use memory::{MemoryTransport, DEFAULT_CHUNK_CAPACITY};
pub use tcp::{TcpTransport, TcpTransportListener};
pub use traits::{ShutdownHandle, Transport, TransportListener};
pub use types::{TransportId, TransportMetadata};
