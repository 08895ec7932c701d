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

//! Per-connection threads.
//!
//! Every established connection is served by one thread. Input connections
//! read messages and hand them to the endpoint's read handler; output
//! connections take write jobs from a rendezvous channel, so a job can only
//! be handed over while the writer is idle.

use crate::carrier::{Carrier, Incoming, Link, ProtocolError};
use crate::contact::Route;
use crate::endpoint::manager::{ControlEvent, Shared};
use crate::endpoint::negotiator::{ConnectionNegotiator, Established};
use crate::message::Message;
use crate::transport::Transport;
use crate::write_buffer::Delivery;
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Identifies a connection within one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection({})", self.0)
    }
}

/// Which way messages flow on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Accepted by this endpoint; messages are read.
    Input,
    /// Initiated by this endpoint; messages are written.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Description of a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: ConnectionId,
    /// Direction.
    pub direction: Direction,
    /// Route the handshake agreed on.
    pub route: Route,
    /// Whether the carrier in use carries replies.
    pub supports_reply: bool,
    /// Remote socket address, when known.
    pub peer_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    fn new(id: ConnectionId, direction: Direction, carrier: &dyn Carrier, link: &Link) -> Self {
        Self {
            id,
            direction,
            route: link.route().clone(),
            supports_reply: carrier.supports_reply(),
            peer_addr: link.metadata().peer_addr,
        }
    }
}

/// Outcome of one fan-out `send`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Output connections the message was offered to.
    pub targets: usize,
    /// Connections that took the message.
    pub queued: usize,
    /// Connections skipped because their writer was busy.
    pub skipped: usize,
    /// Connections that had already failed.
    pub failed: Vec<ConnectionId>,
}

impl SendReport {
    /// Whether every target took the message.
    pub fn is_complete(&self) -> bool {
        self.queued == self.targets
    }
}

/// Work handed to an output thread.
pub(crate) enum WriteJob {
    /// Write and, if the carrier asks for it, wait for the acknowledgement.
    Send(Arc<Delivery>),
    /// Write, then wait for the peer's reply.
    Request {
        message: Message,
        reply: Sender<Result<Message, ProtocolError>>,
    },
}

/// Spawns the thread serving an accepted stream, handshake included.
pub(crate) fn spawn_input(
    shared: Arc<Shared>,
    id: ConnectionId,
    stream: Box<dyn Transport>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("portlink-in-{}", id.0))
        .spawn(move || run_input(shared, id, stream))
}

/// Spawns the writer for an established output connection.
pub(crate) fn spawn_output(
    shared: Arc<Shared>,
    id: ConnectionId,
    established: Established,
    jobs: Receiver<WriteJob>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("portlink-out-{}", id.0))
        .spawn(move || run_output(shared, id, established, jobs))
}

pub(crate) fn output_info(id: ConnectionId, established: &Established) -> ConnectionInfo {
    ConnectionInfo::new(
        id,
        Direction::Output,
        established.carrier.as_ref(),
        &established.link,
    )
}

fn run_input(shared: Arc<Shared>, id: ConnectionId, stream: Box<dyn Transport>) {
    let mut negotiator = ConnectionNegotiator::new(shared.registry.clone())
        .with_timeout(Some(shared.accept_timeout()))
        .with_max_message_size(shared.config.max_message_size);

    let Established {
        mut carrier,
        mut link,
        ..
    } = match negotiator.accept(stream, &shared.local_name()) {
        Ok(established) => established,
        Err(failure) => {
            if !shared.is_releasing(id) {
                shared.report(&failure.into());
            }
            shared.notify(ControlEvent::Finished {
                id,
                established: false,
            });
            return;
        }
    };

    let info = ConnectionInfo::new(id, Direction::Input, carrier.as_ref(), &link);
    #[cfg(feature = "tracing")]
    tracing::info!(
        connection = %id,
        route = %info.route,
        peer = ?info.peer_addr,
        "Input connection established"
    );
    shared.notify(ControlEvent::InputEstablished { info });

    match serve_input(&shared, carrier.as_mut(), &mut link) {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(connection = %id, "Peer closed input connection");
        }
        Err(error) => {
            if !shared.is_releasing(id) {
                shared.report(&error.into());
            }
        }
    }

    link.shutdown();
    shared.notify(ControlEvent::Finished {
        id,
        established: true,
    });
}

fn serve_input(
    shared: &Shared,
    carrier: &mut dyn Carrier,
    link: &mut Link,
) -> Result<(), ProtocolError> {
    loop {
        match carrier.read(link)? {
            Incoming::Closed => return Ok(()),
            Incoming::Message {
                message,
                wants_reply,
            } => {
                shared.metrics.record_message_received(message.len());
                let reply = shared.deliver(&message, link.route());
                if wants_reply {
                    carrier.write_reply(link, &reply.unwrap_or_else(Message::empty))?;
                }
                if carrier.requires_ack() {
                    carrier.send_ack(link)?;
                }
            }
        }
    }
}

fn run_output(
    shared: Arc<Shared>,
    id: ConnectionId,
    established: Established,
    jobs: Receiver<WriteJob>,
) {
    let Established {
        mut carrier,
        mut link,
        ..
    } = established;

    let mut failure = None;
    for job in jobs.iter() {
        if let Err(error) = write_job(&shared, carrier.as_mut(), &mut link, job) {
            failure = Some(error);
            break;
        }
    }
    drop(jobs);

    match failure {
        None => {
            // Orderly end: tell the peer so it does not report a broken stream.
            if let Err(_error) = carrier.write_goodbye(&mut link) {
                #[cfg(feature = "tracing")]
                tracing::debug!(connection = %id, error = %_error, "Goodbye not delivered");
            }
        }
        Some(error) => {
            if !shared.is_releasing(id) {
                shared.report(&error.into());
            }
        }
    }

    link.shutdown();
    shared.notify(ControlEvent::Finished {
        id,
        established: true,
    });
}

fn write_job(
    shared: &Shared,
    carrier: &mut dyn Carrier,
    link: &mut Link,
    job: WriteJob,
) -> Result<(), ProtocolError> {
    match job {
        WriteJob::Send(delivery) => {
            if let Err(error) = carrier.write(link, delivery.message(), false) {
                return refuse(shared, link, error);
            }
            if carrier.requires_ack() {
                carrier.expect_ack(link)?;
            }
            shared.metrics.record_message_sent(delivery.message().len());
            Ok(())
        }
        WriteJob::Request { message, reply } => {
            if let Err(error) = carrier.write(link, &message, true) {
                if error.is_unencodable() {
                    // The requester hears about it directly.
                    let _ = reply.send(Err(error));
                    return Ok(());
                }
                return Err(error);
            }
            let answer = carrier.read_reply(link)?;
            if carrier.requires_ack() {
                carrier.expect_ack(link)?;
            }
            shared.metrics.record_message_sent(message.len());
            shared.metrics.record_message_received(answer.len());
            // The requester may have given up; the connection is still fine.
            let _ = reply.send(Ok(answer));
            Ok(())
        }
    }
}

/// A message the carrier refused before writing is dropped and reported;
/// anything else ends the connection.
fn refuse(shared: &Shared, link: &Link, error: ProtocolError) -> Result<(), ProtocolError> {
    if !error.is_unencodable() {
        return Err(error);
    }
    #[cfg(feature = "tracing")]
    tracing::warn!(route = %link.route(), error = %error, "Message dropped");
    #[cfg(not(feature = "tracing"))]
    let _ = link;
    shared.report(&error.into());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::from(3).to_string(), "Connection(3)");
        assert_eq!(ConnectionId::from(3).as_u64(), 3);
    }

    #[test]
    fn test_send_report_completeness() {
        let report = SendReport {
            targets: 2,
            queued: 1,
            skipped: 1,
            failed: Vec::new(),
        };
        assert!(!report.is_complete());
        assert!(SendReport::default().is_complete());
    }
}
