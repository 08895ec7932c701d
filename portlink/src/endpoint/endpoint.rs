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

//! The [`Endpoint`] type.

use crate::carrier::CarrierRegistry;
use crate::contact::{Contact, Route};
use crate::endpoint::builder::EndpointBuilder;
use crate::endpoint::config::{EndpointConfig, SendPolicy};
use crate::endpoint::connection::{self, ConnectionId, ConnectionInfo, SendReport, WriteJob};
use crate::endpoint::error::EndpointError;
use crate::endpoint::handler::ReadHandler;
use crate::endpoint::manager::{self, ControlEvent, OutputEntry, Shared, Unit};
use crate::endpoint::negotiator::ConnectionNegotiator;
use crate::error::PortlinkError;
use crate::message::Message;
use crate::name::NameResolver;
use crate::observability::{EndpointStats, ErrorMetrics};
use crate::transport::{
    TcpTransport, TcpTransportListener, Transport, TransportError, TransportListener,
};
use crate::write_buffer::{BufferHandle, Delivery, WriteBufferPool};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A named messaging endpoint.
///
/// An endpoint can listen for peers that connect to it (its *inputs*) and
/// connect to peers itself (its *outputs*). Messages handed to
/// [`send`](Self::send) go to every output; messages read from inputs go to
/// the read callback. Each connection is served by its own thread, so a
/// slow peer only ever stalls its own connection.
///
/// ```rust,no_run
/// use portlink::{Contact, Endpoint, Message, SendPolicy};
///
/// # fn example() -> Result<(), portlink::PortlinkError> {
/// let reader = Endpoint::open(&Contact::by_socket("tcp", "127.0.0.1", 10002).with_name("/read"))?;
/// reader.set_read_callback(|message: &Message| {
///     println!("got {:?}", message.as_text());
/// });
///
/// let writer = Endpoint::open(&Contact::by_name("/write"))?;
/// writer.connect(&reader.contact().unwrap())?;
/// writer.send(Message::text("hello"), SendPolicy::Block)?;
///
/// writer.close();
/// reader.close();
/// # Ok(())
/// # }
/// ```
pub struct Endpoint {
    shared: Arc<Shared>,
    resolver: Option<Arc<dyn NameResolver>>,
    write_buffers: WriteBufferPool,
    contact: Mutex<Option<Contact>>,
    registered: Mutex<Option<String>>,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    manager_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Creates an endpoint with `config`, the global carrier registry and
    /// no name resolver.
    pub fn new(config: EndpointConfig) -> Result<Self, PortlinkError> {
        EndpointBuilder::new().config(config).build()
    }

    /// Starts building an endpoint.
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Creates an endpoint with the default configuration and listens on
    /// `contact`.
    pub fn open(contact: &Contact) -> Result<Self, PortlinkError> {
        let endpoint = Self::new(EndpointConfig::default())?;
        endpoint.listen(contact)?;
        Ok(endpoint)
    }

    pub(crate) fn from_parts(
        config: EndpointConfig,
        registry: Arc<CarrierRegistry>,
        resolver: Option<Arc<dyn NameResolver>>,
        handler: Option<Box<dyn ReadHandler>>,
    ) -> Result<Self, PortlinkError> {
        config
            .validate()
            .map_err(|reason| EndpointError::InvalidConfiguration { reason })?;

        let write_buffers =
            WriteBufferPool::with_acquire_timeout(config.write_buffer_slots, config.acquire_timeout);
        let (control, events) = unbounded();
        let shared = Arc::new(Shared::new(config, registry, handler, control));
        let manager_thread = manager::spawn_manager(shared.clone(), events)
            .map_err(|source| TransportError::Io { source })?;

        Ok(Self {
            shared,
            resolver,
            write_buffers,
            contact: Mutex::new(None),
            registered: Mutex::new(None),
            listener: Mutex::new(None),
            accept_thread: Mutex::new(None),
            manager_thread: Mutex::new(Some(manager_thread)),
        })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &EndpointConfig {
        &self.shared.config
    }

    /// Name used as the sender of every output route. Empty until the
    /// endpoint listens or is given one.
    pub fn name(&self) -> String {
        self.shared.local_name()
    }

    /// Sets the sender name for endpoints that never listen.
    pub fn set_name(&self, name: impl Into<String>) {
        self.shared.set_local_name(name.into());
    }

    /// The contact this endpoint is listening on.
    pub fn contact(&self) -> Option<Contact> {
        self.contact.lock().clone()
    }

    /// Whether an accept loop is running.
    pub fn is_listening(&self) -> bool {
        self.accept_thread.lock().is_some()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    fn ensure_open(&self) -> Result<(), EndpointError> {
        if self.shared.is_closing() {
            Err(EndpointError::Closed)
        } else {
            Ok(())
        }
    }

    /// Binds a listening socket for `contact`, registers it with the name
    /// resolver and starts accepting connections.
    ///
    /// A contact without an address binds an ephemeral port on the
    /// configured bind host. A contact without a name gets one derived
    /// from the bound address. Returns the contact actually bound.
    #[cfg_attr(feature = "observability", tracing::instrument(
        skip(self),
        fields(contact = %contact)
    ))]
    pub fn listen(&self, contact: &Contact) -> Result<Contact, PortlinkError> {
        self.ensure_open()?;
        if let Some(bound) = self.contact.lock().as_ref() {
            return Err(EndpointError::AlreadyListening {
                contact: bound.to_string(),
            }
            .into());
        }

        let carrier = if contact.carrier().is_empty() {
            self.shared.config.default_carrier.clone()
        } else {
            contact.carrier().to_string()
        };
        if self.shared.registry.descriptor(&carrier).is_none() {
            return Err(EndpointError::UnknownCarrier { carrier }.into());
        }

        let addr = if contact.has_address() {
            contact.socket_addr()?
        } else {
            Contact::by_socket(carrier.as_str(), self.shared.config.bind_host.as_str(), 0)
                .socket_addr()?
        };
        let listener = TcpTransportListener::bind(addr).map_err(|error| {
            let error = PortlinkError::from(error);
            self.shared.report(&error);
            error
        })?;

        let mut bound = Contact::from_socket_addr(carrier, listener.local_addr());
        if let Some(timeout) = contact.timeout() {
            bound = bound.with_timeout(timeout);
        }
        let name = if contact.name().is_empty() {
            bound.generated_name()
        } else {
            contact.name().to_string()
        };
        let bound = bound.with_name(name.clone());
        self.shared.set_accept_timeout(contact.timeout());

        if self.shared.config.register_with_resolver {
            if let Some(resolver) = &self.resolver {
                resolver.register(&bound)?;
                *self.registered.lock() = Some(name.clone());
            }
        }

        self.shared.set_local_name(name);
        *self.listener.lock() = Some(Arc::new(listener));
        *self.contact.lock() = Some(bound.clone());

        #[cfg(feature = "tracing")]
        tracing::info!(contact = %bound, "Endpoint listening");

        self.start()?;
        Ok(bound)
    }

    /// Starts the accept loop on the bound listener. Does nothing if it is
    /// already running.
    pub fn start(&self) -> Result<(), PortlinkError> {
        self.ensure_open()?;
        let mut accept_thread = self.accept_thread.lock();
        if accept_thread.is_some() {
            return Ok(());
        }
        let listener = self
            .listener
            .lock()
            .clone()
            .ok_or(EndpointError::NotListening)?;
        let thread = manager::spawn_accept_loop(self.shared.clone(), listener)
            .map_err(|source| TransportError::Io { source })?;
        *accept_thread = Some(thread);
        Ok(())
    }

    /// Connects to `peer` and adds the connection to the outputs.
    ///
    /// A peer given by name only is looked up through the name resolver.
    /// The carrier named by the peer's contact drives the handshake, and the
    /// contact's timeout, when set, bounds both the dial and the handshake.
    ///
    /// An output already connected to the same peer over the same carrier
    /// is kept and its id returned. One to the same peer over another
    /// carrier is disconnected and replaced.
    #[cfg_attr(feature = "observability", tracing::instrument(
        skip(self),
        fields(peer = %peer)
    ))]
    pub fn connect(&self, peer: &Contact) -> Result<ConnectionId, PortlinkError> {
        self.ensure_open()?;
        let target = self.resolve(peer)?;
        if self.shared.registry.descriptor(target.carrier()).is_none() {
            return Err(EndpointError::UnknownCarrier {
                carrier: target.carrier().to_string(),
            }
            .into());
        }
        let addr = target.socket_addr()?;

        let (present, stale) = self.outputs_to(&target, Some(addr));
        if let Some(id) = present {
            #[cfg(feature = "tracing")]
            tracing::debug!(connection = %id, peer = %target, "Desired connection already present");
            return Ok(id);
        }
        for id in stale {
            self.disconnect(id)?;
        }

        let timeout = target
            .timeout()
            .unwrap_or(self.shared.config.handshake_timeout);
        let stream = TcpTransport::connect(addr, Some(timeout)).map_err(|error| {
            let error = PortlinkError::from(error);
            self.shared.report(&error);
            error
        })?;

        self.establish(Box::new(stream), target.carrier(), target.name(), timeout)
    }

    /// Runs the initiating handshake over an already open stream and adds
    /// the result to the outputs.
    pub fn connect_transport(
        &self,
        stream: Box<dyn Transport>,
        carrier: &str,
        peer_name: &str,
    ) -> Result<ConnectionId, PortlinkError> {
        self.establish(
            stream,
            carrier,
            peer_name,
            self.shared.config.handshake_timeout,
        )
    }

    fn establish(
        &self,
        stream: Box<dyn Transport>,
        carrier: &str,
        peer_name: &str,
        handshake_timeout: Duration,
    ) -> Result<ConnectionId, PortlinkError> {
        self.ensure_open()?;
        let route = Route::new(self.shared.local_name(), peer_name, carrier);
        let mut negotiator = ConnectionNegotiator::new(self.shared.registry.clone())
            .with_timeout(Some(handshake_timeout))
            .with_max_message_size(self.shared.config.max_message_size);

        let established = negotiator
            .connect(stream, carrier, route)
            .map_err(|failure| {
                let error = PortlinkError::from(failure);
                self.shared.report(&error);
                error
            })?;
        let stop = established.link.shutdown_handle()?;

        let id = self.shared.next_id();
        let info = connection::output_info(id, &established);
        #[cfg(feature = "tracing")]
        tracing::info!(
            connection = %id,
            route = %info.route,
            peer = ?info.peer_addr,
            "Output connection established"
        );

        let (jobs_tx, jobs_rx) = bounded(0);
        let thread = connection::spawn_output(self.shared.clone(), id, established, jobs_rx)
            .map_err(|source| TransportError::Io { source })?;

        let (reply_tx, reply_rx) = bounded(1);
        let event = ControlEvent::OutputEstablished {
            entry: OutputEntry {
                info,
                jobs: jobs_tx,
            },
            unit: Unit {
                direction: connection::Direction::Output,
                thread,
                stop,
            },
            reply: reply_tx,
        };
        if self.shared.send_control(event).is_err() {
            return Err(EndpointError::Closed.into());
        }
        match reply_rx.recv() {
            Ok(true) => Ok(id),
            _ => Err(EndpointError::Closed.into()),
        }
    }

    /// Outputs leading to `target`: the one using its carrier, if any, and
    /// those using another carrier.
    ///
    /// A named target matches on the route's receiver; an unnamed one on
    /// the peer address.
    fn outputs_to(
        &self,
        target: &Contact,
        addr: Option<SocketAddr>,
    ) -> (Option<ConnectionId>, Vec<ConnectionId>) {
        let sets = self.shared.connections.read();
        let mut present = None;
        let mut stale = Vec::new();
        for output in sets.outputs.values() {
            let info = &output.info;
            let same_peer = if target.name().is_empty() {
                addr.is_some() && info.peer_addr == addr
            } else {
                info.route.to() == target.name()
            };
            if !same_peer {
                continue;
            }
            if target.carrier().is_empty() || info.route.carrier() == target.carrier() {
                present = present.or(Some(info.id));
            } else {
                stale.push(info.id);
            }
        }
        (present, stale)
    }

    /// Closes one connection, input or output.
    ///
    /// An output finishes the message it is writing and says goodbye to the
    /// peer; if that takes longer than the drain timeout its stream is cut.
    /// Returns once the connection's thread has exited, `Ok(false)` if no
    /// such connection exists.
    pub fn disconnect(&self, id: ConnectionId) -> Result<bool, PortlinkError> {
        self.ensure_open()?;
        let wait = self.shared.config.drain_timeout;
        if let Some(found) = self.request_disconnect(id, false, wait)? {
            return Ok(found);
        }
        #[cfg(feature = "tracing")]
        tracing::warn!(connection = %id, timeout = ?wait, "Connection did not drain, cutting it");
        Ok(self.request_disconnect(id, true, wait)?.unwrap_or(true))
    }

    /// Closes every output leading to `peer`, whatever its carrier unless
    /// the contact names one. Returns how many were closed.
    pub fn disconnect_peer(&self, peer: &Contact) -> Result<usize, PortlinkError> {
        self.ensure_open()?;
        let addr = if peer.has_address() {
            Some(peer.socket_addr()?)
        } else {
            None
        };
        let (present, stale) = self.outputs_to(peer, addr);
        let mut closed = 0;
        for id in present.into_iter().chain(stale) {
            if self.disconnect(id)? {
                closed += 1;
            }
        }
        Ok(closed)
    }

    fn request_disconnect(
        &self,
        id: ConnectionId,
        force: bool,
        wait: Duration,
    ) -> Result<Option<bool>, PortlinkError> {
        let (reply_tx, reply_rx) = bounded(1);
        let event = ControlEvent::Disconnect {
            id,
            force,
            reply: reply_tx,
        };
        if self.shared.send_control(event).is_err() {
            return Err(EndpointError::Closed.into());
        }
        match reply_rx.recv_timeout(wait) {
            Ok(found) => Ok(Some(found)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // The manager shut down and took the connection with it.
            Err(RecvTimeoutError::Disconnected) => Ok(Some(true)),
        }
    }

    fn resolve(&self, peer: &Contact) -> Result<Contact, PortlinkError> {
        if peer.has_address() {
            return Ok(peer.clone());
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| EndpointError::NoResolver {
                name: peer.name().to_string(),
            })?;
        let found = resolver.query(peer.name())?;
        Ok(match peer.timeout() {
            Some(timeout) => found.with_timeout(timeout),
            None => found,
        })
    }

    /// Replaces the read callback. Messages read while no callback is set
    /// are dropped.
    pub fn set_read_callback(&self, handler: impl ReadHandler) {
        self.shared.set_handler(Some(Box::new(handler)));
    }

    /// Removes the read callback.
    pub fn clear_read_callback(&self) {
        self.shared.set_handler(None);
    }

    /// Hands `message` to every output connection.
    ///
    /// With [`SendPolicy::Block`] each connection's writer is waited for in
    /// turn; with [`SendPolicy::Drop`] connections whose writer is still busy
    /// with an earlier message are skipped. Connections that already failed
    /// are listed in the report. Returns once the message is queued, not
    /// once it is written.
    pub fn send(&self, message: Message, policy: SendPolicy) -> Result<SendReport, PortlinkError> {
        self.dispatch(Delivery::new(message), policy)
    }

    /// [`send`](Self::send) with the configured default policy.
    pub fn send_default(&self, message: Message) -> Result<SendReport, PortlinkError> {
        self.send(message, self.shared.config.default_send_policy)
    }

    pub(crate) fn dispatch(
        &self,
        delivery: Delivery,
        policy: SendPolicy,
    ) -> Result<SendReport, PortlinkError> {
        self.ensure_open()?;
        let targets: Vec<_> = self
            .shared
            .connections
            .read()
            .outputs
            .values()
            .map(|output| (output.info.id, output.jobs.clone()))
            .collect();

        let delivery = Arc::new(delivery.tracked(self.shared.outstanding.clone()));
        let mut report = SendReport {
            targets: targets.len(),
            ..SendReport::default()
        };
        for (id, jobs) in targets {
            let job = WriteJob::Send(delivery.clone());
            let outcome = match policy {
                SendPolicy::Block => jobs.send(job).map_err(|_| true),
                SendPolicy::Drop => jobs.try_send(job).map_err(|e| e.is_disconnected()),
            };
            match outcome {
                Ok(()) => report.queued += 1,
                Err(false) => report.skipped += 1,
                Err(true) => report.failed.push(id),
            }
        }
        self.shared.metrics.record_messages_skipped(report.skipped);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            %policy,
            targets = report.targets,
            queued = report.queued,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Message dispatched"
        );
        Ok(report)
    }

    /// Sends `message` on the first output whose carrier carries replies
    /// and waits for the peer's answer.
    pub fn request(&self, message: Message) -> Result<Message, PortlinkError> {
        self.ensure_open()?;
        let (id, jobs) = {
            let sets = self.shared.connections.read();
            if sets.outputs.is_empty() {
                return Err(EndpointError::NoOutputs.into());
            }
            sets.outputs
                .values()
                .find(|output| output.info.supports_reply)
                .map(|output| (output.info.id, output.jobs.clone()))
                .ok_or(EndpointError::RepliesUnsupported)?
        };

        let (reply_tx, reply_rx) = bounded(1);
        jobs.send(WriteJob::Request {
            message,
            reply: reply_tx,
        })
        .map_err(|_| EndpointError::ReplyLost { connection: id })?;
        match reply_rx.recv() {
            Ok(answer) => answer.map_err(PortlinkError::from),
            Err(_) => Err(EndpointError::ReplyLost { connection: id }.into()),
        }
    }

    /// The endpoint's write buffer pool.
    pub fn write_buffers(&self) -> &WriteBufferPool {
        &self.write_buffers
    }

    /// Acquires a buffer from the write buffer pool.
    pub fn prepare(&self) -> Result<BufferHandle, PortlinkError> {
        self.ensure_open()?;
        self.write_buffers.acquire().map_err(|error| {
            let error = PortlinkError::from(error);
            self.shared.report(&error);
            error
        })
    }

    /// Connections accepted or initiated, plus one for `close`.
    pub fn event_count(&self) -> u64 {
        self.shared.event_count()
    }

    /// Live output connections.
    pub fn output_count(&self) -> usize {
        self.shared.connections.read().outputs.len()
    }

    /// Live input connections that finished their handshake.
    pub fn input_count(&self) -> usize {
        self.shared.connections.read().inputs.len()
    }

    /// Descriptions of every live connection, inputs first.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let sets = self.shared.connections.read();
        sets.inputs
            .values()
            .cloned()
            .chain(sets.outputs.values().map(|output| output.info.clone()))
            .collect()
    }

    /// Waits until at least `count` outputs are live.
    pub fn wait_for_outputs(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.output_count() >= count)
    }

    /// Waits until at least `count` inputs are live.
    pub fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.input_count() >= count)
    }

    /// Waits until the event count reaches `count`.
    pub fn wait_for_events(&self, count: u64, timeout: Duration) -> bool {
        wait_until(timeout, || self.event_count() >= count)
    }

    /// Errors reported so far.
    pub fn error_count(&self) -> u64 {
        self.shared.errors.total_errors()
    }

    /// Error counters by kind.
    pub fn error_metrics(&self) -> &ErrorMetrics {
        &self.shared.errors
    }

    /// Registers a callback for every reported error.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&PortlinkError) + Send + Sync + 'static,
    {
        self.shared.observer.on_error(callback);
    }

    /// Connection and message counters.
    pub fn metrics(&self) -> EndpointStats {
        self.shared.metrics.snapshot()
    }

    /// Shuts the endpoint down.
    ///
    /// Unregisters the name, stops accepting, lets queued writes finish for
    /// up to the drain timeout, then ends every connection and joins every
    /// thread. Calling it again returns immediately.
    pub fn close(&self) {
        if !self.shared.begin_close() {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::info!(name = %self.shared.local_name(), "Closing endpoint");

        if let Some(name) = self.registered.lock().take() {
            if let Some(resolver) = &self.resolver {
                if let Err(error) = resolver.unregister(&name) {
                    self.shared.report(&error.into());
                }
            }
        }

        self.stop_accepting();

        let drain = self.shared.config.drain_timeout;
        let started = Instant::now();
        let drained = self.write_buffers.wait_for_all_writes_timeout(drain)
            && self
                .shared
                .outstanding
                .wait_idle(drain.saturating_sub(started.elapsed()));
        if !drained {
            #[cfg(feature = "tracing")]
            tracing::warn!(timeout = ?drain, "Queued writes did not drain before close");
        }

        let (reply_tx, reply_rx) = bounded(1);
        if self
            .shared
            .send_control(ControlEvent::Shutdown { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.recv();
        }
        if let Some(thread) = self.manager_thread.lock().take() {
            let _ = thread.join();
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            name = %self.shared.local_name(),
            events = self.shared.event_count(),
            "Endpoint closed"
        );
    }

    fn stop_accepting(&self) {
        let Some(listener) = self.listener.lock().take() else {
            return;
        };
        let thread = self.accept_thread.lock().take();
        match listener.unblock() {
            Ok(()) => {
                if let Some(thread) = thread {
                    let _ = thread.join();
                }
            }
            Err(error) => {
                // The accept thread stays parked; it exits on its next wake.
                self.shared.report(&error.into());
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.shared.local_name())
            .field("contact", &self.contact.lock().as_ref().map(ToString::to_string))
            .field("inputs", &self.input_count())
            .field("outputs", &self.output_count())
            .field("events", &self.event_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}
