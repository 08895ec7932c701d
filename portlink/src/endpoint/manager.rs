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

//! Connection bookkeeping.
//!
//! One manager thread per endpoint owns every change to the connection
//! sets. Other threads (the accept loop, connection threads, callers of
//! `connect` and `close`) describe what happened through [`ControlEvent`]s;
//! readers such as `send` and the count accessors only take the read lock.

use crate::carrier::CarrierRegistry;
use crate::contact::Route;
use crate::endpoint::config::EndpointConfig;
use crate::endpoint::connection::{self, ConnectionId, ConnectionInfo, Direction, WriteJob};
use crate::endpoint::handler::ReadHandler;
use crate::error::PortlinkError;
use crate::message::Message;
use crate::observability::{log_error, EndpointMetrics, ErrorMetrics, ErrorObserver};
use crate::transport::{ShutdownHandle, Transport, TransportError, TransportListener};
use crate::write_buffer::Outstanding;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// An established output connection as seen by senders.
pub(crate) struct OutputEntry {
    pub(crate) info: ConnectionInfo,
    pub(crate) jobs: Sender<WriteJob>,
}

#[derive(Default)]
pub(crate) struct ConnectionSets {
    pub(crate) inputs: BTreeMap<ConnectionId, ConnectionInfo>,
    pub(crate) outputs: BTreeMap<ConnectionId, OutputEntry>,
}

/// A connection thread as seen by the manager.
pub(crate) struct Unit {
    pub(crate) direction: Direction,
    pub(crate) thread: JoinHandle<()>,
    pub(crate) stop: ShutdownHandle,
}

pub(crate) enum ControlEvent {
    /// The accept loop took a new stream.
    Accepted(Box<dyn Transport>),
    /// An input connection finished its handshake.
    InputEstablished { info: ConnectionInfo },
    /// `connect` finished a handshake and started the writer.
    OutputEstablished {
        entry: OutputEntry,
        unit: Unit,
        reply: Sender<bool>,
    },
    /// A connection thread is about to exit.
    Finished {
        id: ConnectionId,
        established: bool,
    },
    /// Close one connection. Answered `true` once its thread is joined,
    /// `false` if the id is unknown. `force` cuts the stream instead of
    /// waiting for a writer to say goodbye.
    Disconnect {
        id: ConnectionId,
        force: bool,
        reply: Sender<bool>,
    },
    /// Stop every connection, then exit.
    Shutdown { reply: Sender<()> },
}

/// State shared by the endpoint handle and all of its threads.
pub(crate) struct Shared {
    pub(crate) config: EndpointConfig,
    pub(crate) registry: Arc<CarrierRegistry>,
    pub(crate) connections: RwLock<ConnectionSets>,
    pub(crate) outstanding: Arc<Outstanding>,
    pub(crate) metrics: EndpointMetrics,
    pub(crate) errors: ErrorMetrics,
    pub(crate) observer: ErrorObserver,
    local_name: RwLock<String>,
    accept_timeout: RwLock<Option<Duration>>,
    releasing: Mutex<HashSet<ConnectionId>>,
    handler: Mutex<Option<Box<dyn ReadHandler>>>,
    events: AtomicU64,
    closing: AtomicBool,
    next_id: AtomicU64,
    control: Sender<ControlEvent>,
}

impl Shared {
    pub(crate) fn new(
        config: EndpointConfig,
        registry: Arc<CarrierRegistry>,
        handler: Option<Box<dyn ReadHandler>>,
        control: Sender<ControlEvent>,
    ) -> Self {
        Self {
            config,
            registry,
            connections: RwLock::new(ConnectionSets::default()),
            outstanding: Arc::new(Outstanding::default()),
            metrics: EndpointMetrics::new(),
            errors: ErrorMetrics::new(),
            observer: ErrorObserver::new(),
            local_name: RwLock::new(String::new()),
            accept_timeout: RwLock::new(None),
            releasing: Mutex::new(HashSet::new()),
            handler: Mutex::new(handler),
            events: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            control,
        }
    }

    pub(crate) fn local_name(&self) -> String {
        self.local_name.read().clone()
    }

    pub(crate) fn set_local_name(&self, name: String) {
        *self.local_name.write() = name;
    }

    /// Handshake timeout for accepted streams: the listening contact's
    /// own timeout when it has one.
    pub(crate) fn accept_timeout(&self) -> Duration {
        self.accept_timeout
            .read()
            .unwrap_or(self.config.handshake_timeout)
    }

    pub(crate) fn set_accept_timeout(&self, timeout: Option<Duration>) {
        *self.accept_timeout.write() = timeout;
    }

    /// Whether a failure on `id` is expected because it is being closed.
    pub(crate) fn is_releasing(&self, id: ConnectionId) -> bool {
        self.is_closing() || self.releasing.lock().contains(&id)
    }

    pub(crate) fn next_id(&self) -> ConnectionId {
        ConnectionId::from(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn event_count(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    fn count_event(&self) {
        self.events.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Marks the endpoint closing. Returns `false` if it already was.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_handler(&self, handler: Option<Box<dyn ReadHandler>>) {
        *self.handler.lock() = handler;
    }

    /// Runs the read handler. The lock serializes all input connections.
    pub(crate) fn deliver(&self, message: &Message, route: &Route) -> Option<Message> {
        let mut handler = self.handler.lock();
        match handler.as_mut() {
            Some(handler) => handler.on_message(message, route),
            None => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%route, "No read handler, message dropped");
                None
            }
        }
    }

    /// Counts, logs and publishes an error.
    pub(crate) fn report(&self, error: &PortlinkError) {
        self.errors.record_error(error);
        log_error(error);
        self.observer.notify(error);
    }

    pub(crate) fn send_control(&self, event: ControlEvent) -> Result<(), ControlEvent> {
        self.control.send(event).map_err(|e| e.into_inner())
    }

    /// Sends an event from a connection thread. The manager outlives every
    /// connection thread, so a failure only happens after it stopped.
    pub(crate) fn notify(&self, event: ControlEvent) {
        let _ = self.control.send(event);
    }
}

/// Spawns the manager thread.
pub(crate) fn spawn_manager(
    shared: Arc<Shared>,
    events: Receiver<ControlEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("portlink-manager".to_string())
        .spawn(move || Manager::new(shared, events).run())
}

/// Spawns the accept loop for a bound listener.
pub(crate) fn spawn_accept_loop(
    shared: Arc<Shared>,
    listener: Arc<dyn TransportListener>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("portlink-accept".to_string())
        .spawn(move || run_accept_loop(shared, listener))
}

fn run_accept_loop(shared: Arc<Shared>, listener: Arc<dyn TransportListener>) {
    #[cfg(feature = "tracing")]
    tracing::debug!(addr = %listener.local_addr(), "Accept loop started");

    loop {
        match listener.accept() {
            Ok(mut stream) => {
                // The wake-up connection made by `close` lands here.
                if shared.is_closing() {
                    let _ = stream.shutdown();
                    break;
                }
                if shared.send_control(ControlEvent::Accepted(stream)).is_err() {
                    break;
                }
            }
            Err(error) => {
                if shared.is_closing() {
                    break;
                }
                shared.report(&PortlinkError::Transport(error));
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(addr = %listener.local_addr(), "Accept loop stopped");
}

struct Manager {
    shared: Arc<Shared>,
    events: Receiver<ControlEvent>,
    units: HashMap<ConnectionId, Unit>,
    disconnects: HashMap<ConnectionId, Vec<Sender<bool>>>,
}

impl Manager {
    fn new(shared: Arc<Shared>, events: Receiver<ControlEvent>) -> Self {
        Self {
            shared,
            events,
            units: HashMap::new(),
            disconnects: HashMap::new(),
        }
    }

    fn run(mut self) {
        while let Ok(event) = self.events.recv() {
            match event {
                ControlEvent::Accepted(stream) => self.accept(stream),
                ControlEvent::InputEstablished { info } => {
                    self.shared.metrics.record_connection_opened();
                    self.shared.connections.write().inputs.insert(info.id, info);
                }
                ControlEvent::OutputEstablished { entry, unit, reply } => {
                    self.shared.count_event();
                    self.shared.metrics.record_connection_opened();
                    let id = entry.info.id;
                    self.shared.connections.write().outputs.insert(id, entry);
                    self.units.insert(id, unit);
                    let _ = reply.send(true);
                }
                ControlEvent::Finished { id, established } => self.reap(id, established),
                ControlEvent::Disconnect { id, force, reply } => {
                    self.disconnect(id, force, reply)
                }
                ControlEvent::Shutdown { reply } => {
                    self.shutdown();
                    self.shared.count_event();
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn accept(&mut self, mut stream: Box<dyn Transport>) {
        self.shared.count_event();

        let inputs = self
            .units
            .values()
            .filter(|unit| unit.direction == Direction::Input)
            .count();
        if let Some(max) = self.shared.config.max_connections {
            if inputs >= max {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    peer = ?stream.metadata().peer_addr,
                    max,
                    "Connection limit reached, refusing connection"
                );
                self.shared.metrics.record_connection_refused();
                let _ = stream.shutdown();
                return;
            }
        }

        let stop = match stream.shutdown_handle() {
            Ok(stop) => stop,
            Err(error) => {
                self.shared.report(&PortlinkError::Transport(error));
                let _ = stream.shutdown();
                return;
            }
        };

        let id = self.shared.next_id();
        match connection::spawn_input(self.shared.clone(), id, stream) {
            Ok(thread) => {
                self.units.insert(
                    id,
                    Unit {
                        direction: Direction::Input,
                        thread,
                        stop,
                    },
                );
            }
            Err(source) => {
                stop.shutdown();
                self.shared
                    .report(&PortlinkError::Transport(TransportError::Io { source }));
            }
        }
    }

    fn disconnect(&mut self, id: ConnectionId, force: bool, reply: Sender<bool>) {
        let Some(unit) = self.units.get(&id) else {
            let _ = reply.send(false);
            return;
        };
        self.shared.releasing.lock().insert(id);
        {
            // Dropping the output's job sender lets its writer say goodbye.
            let mut sets = self.shared.connections.write();
            sets.inputs.remove(&id);
            sets.outputs.remove(&id);
        }
        if force || unit.direction == Direction::Input {
            unit.stop.shutdown();
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %id, direction = %unit.direction, force, "Disconnecting");
        self.disconnects.entry(id).or_default().push(reply);
    }

    fn reap(&mut self, id: ConnectionId, established: bool) {
        {
            let mut sets = self.shared.connections.write();
            sets.inputs.remove(&id);
            sets.outputs.remove(&id);
        }
        if established {
            self.shared.metrics.record_connection_closed();
        }
        let Some(unit) = self.units.remove(&id) else {
            return;
        };
        let direction = unit.direction;
        if unit.thread.join().is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!(connection = %id, %direction, "Connection thread panicked");
        }

        self.shared.releasing.lock().remove(&id);
        for reply in self.disconnects.remove(&id).unwrap_or_default() {
            let _ = reply.send(true);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %id, %direction, established, "Connection finished");
        #[cfg(not(feature = "tracing"))]
        let _ = direction;
    }

    /// Ends every connection. Writers get `drain_timeout` to finish their
    /// current job and say goodbye before their streams are cut.
    fn shutdown(&mut self) {
        let outputs = std::mem::take(&mut self.shared.connections.write().outputs);
        drop(outputs);
        for unit in self.units.values() {
            if unit.direction == Direction::Input {
                unit.stop.shutdown();
            }
        }

        let deadline = Instant::now() + self.shared.config.drain_timeout;
        let mut forced = false;
        while !self.units.is_empty() {
            let event = if forced {
                self.events.recv().ok()
            } else {
                match self.events.recv_deadline(deadline) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            remaining = self.units.len(),
                            "Connections did not drain in time, cutting them"
                        );
                        for unit in self.units.values() {
                            unit.stop.shutdown();
                        }
                        forced = true;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            };
            let Some(event) = event else {
                break;
            };

            match event {
                ControlEvent::Finished { id, established } => self.reap(id, established),
                ControlEvent::InputEstablished { info } => {
                    // Already cut above; it finishes on its first read.
                    self.shared.metrics.record_connection_opened();
                    if let Some(unit) = self.units.get(&info.id) {
                        unit.stop.shutdown();
                    }
                }
                ControlEvent::OutputEstablished { entry, unit, reply } => {
                    self.shared.metrics.record_connection_opened();
                    let id = entry.info.id;
                    drop(entry);
                    self.units.insert(id, unit);
                    let _ = reply.send(false);
                }
                ControlEvent::Accepted(mut stream) => {
                    let _ = stream.shutdown();
                }
                ControlEvent::Disconnect { id, reply, .. } => {
                    // Everything is going; answer once this one is joined.
                    if self.units.contains_key(&id) {
                        self.disconnects.entry(id).or_default().push(reply);
                    } else {
                        let _ = reply.send(false);
                    }
                }
                ControlEvent::Shutdown { reply } => {
                    let _ = reply.send(());
                }
            }
        }

        self.shared.connections.write().inputs.clear();
        self.disconnects.clear();
    }
}
