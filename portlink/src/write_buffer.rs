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

//! Overlapped background writes.
//!
//! A [`WriteBufferPool`] hands out a fixed number of reusable buffers. A
//! producer fills one, commits it to an [`Endpoint`], and can immediately
//! start on the next message while the committed one is still being written
//! by the connection threads. When every connection is done with a buffer its
//! completion callback fires and the slot returns to the free list.
//!
//! With all slots in flight, [`acquire`](WriteBufferPool::acquire) blocks:
//! the pool size is the producer's write concurrency limit.
//!
//! ```rust,no_run
//! use portlink::{Contact, Endpoint};
//!
//! # fn example() -> Result<(), portlink::PortlinkError> {
//! let endpoint = Endpoint::open(&Contact::by_name("/telemetry"))?;
//! let pool = endpoint.write_buffers();
//! for tick in 0..100 {
//!     let mut buffer = pool.acquire()?;
//!     buffer.text(&format!("tick {}", tick));
//!     pool.commit_and_send(buffer, &endpoint, false)?;
//! }
//! pool.wait_for_all_writes();
//! # Ok(())
//! # }
//! ```

use crate::endpoint::{Endpoint, SendReport};
use crate::error::PortlinkError;
use crate::message::{Message, MessageBuilder};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of slots a pool gets when none is configured.
pub const DEFAULT_WRITE_BUFFER_SLOTS: usize = 2;

type Completion = Box<dyn FnOnce() + Send>;

/// Errors raised by the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteBufferError {
    /// No slot came free within the configured acquire timeout.
    #[error("all {slots} write buffers stayed in flight for {waited:?}")]
    Exhausted {
        /// Pool size.
        slots: usize,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A buffer was committed without any content.
    #[error("write buffer {slot} was committed empty")]
    Empty {
        /// Slot index.
        slot: usize,
    },
}

/// Lifecycle of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// On the free list.
    Free,
    /// Held by a producer through a [`BufferHandle`].
    Acquired,
    /// Committed and still being written.
    InFlight,
}

struct PoolState {
    slots: Vec<SlotState>,
    generations: Vec<u64>,
    free: VecDeque<usize>,
    in_flight: usize,
}

struct PoolInner {
    state: Mutex<PoolState>,
    slot_freed: Condvar,
    drained: Condvar,
    acquire_timeout: Option<Duration>,
}

impl PoolInner {
    /// Returns a slot to the free list if it is still in `from` under the
    /// same generation; stale tickets are ignored.
    fn put_back(&self, index: usize, generation: u64, from: SlotState) -> bool {
        let mut state = self.state.lock();
        if state.generations[index] != generation || state.slots[index] != from {
            return false;
        }
        state.slots[index] = SlotState::Free;
        state.generations[index] += 1;
        state.free.push_back(index);
        if from == SlotState::InFlight {
            state.in_flight -= 1;
            if state.in_flight == 0 {
                self.drained.notify_all();
            }
        }
        drop(state);
        self.slot_freed.notify_one();
        true
    }
}

/// Fixed-size pool of reusable write buffers.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct WriteBufferPool {
    inner: Arc<PoolInner>,
}

impl WriteBufferPool {
    /// A pool of `slots` buffers (at least one) whose `acquire` waits forever.
    pub fn new(slots: usize) -> Self {
        Self::with_acquire_timeout(slots, None)
    }

    /// A pool whose `acquire` gives up after `timeout`.
    pub fn with_acquire_timeout(slots: usize, timeout: Option<Duration>) -> Self {
        let slots = slots.max(1);
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    slots: vec![SlotState::Free; slots],
                    generations: vec![0; slots],
                    free: (0..slots).collect(),
                    in_flight: 0,
                }),
                slot_freed: Condvar::new(),
                drained: Condvar::new(),
                acquire_timeout: timeout,
            }),
        }
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    /// Number of slots committed and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Number of slots on the free list.
    pub fn available(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// State of slot `index`, if it exists.
    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.inner.state.lock().slots.get(index).copied()
    }

    /// Takes a free buffer, blocking until one completes if none is free.
    ///
    /// # Errors
    ///
    /// [`WriteBufferError::Exhausted`] if an acquire timeout is configured and
    /// no slot came free in time.
    pub fn acquire(&self) -> Result<BufferHandle, WriteBufferError> {
        let started = Instant::now();
        let mut state = self.inner.state.lock();
        loop {
            if let Some(index) = state.free.pop_front() {
                state.slots[index] = SlotState::Acquired;
                let generation = state.generations[index];
                return Ok(BufferHandle::new(self.inner.clone(), index, generation));
            }
            match self.inner.acquire_timeout {
                None => self.inner.slot_freed.wait(&mut state),
                Some(timeout) => {
                    let timed_out = self
                        .inner
                        .slot_freed
                        .wait_until(&mut state, started + timeout)
                        .timed_out();
                    if timed_out && state.free.is_empty() {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(slots = state.slots.len(), ?timeout, "Write buffers exhausted");
                        return Err(WriteBufferError::Exhausted {
                            slots: state.slots.len(),
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    /// Takes a free buffer without blocking.
    pub fn try_acquire(&self) -> Option<BufferHandle> {
        let mut state = self.inner.state.lock();
        let index = state.free.pop_front()?;
        state.slots[index] = SlotState::Acquired;
        let generation = state.generations[index];
        Some(BufferHandle::new(self.inner.clone(), index, generation))
    }

    /// Abandons a buffer, discarding anything written into it.
    pub fn release(&self, handle: BufferHandle) {
        drop(handle);
    }

    /// Hands the buffer's content to `endpoint` for transmission using the
    /// endpoint's default send policy.
    ///
    /// Returns once the message has been queued. With `strict`, it instead
    /// returns only after every buffer of this pool has completed.
    pub fn commit_and_send(
        &self,
        handle: BufferHandle,
        endpoint: &Endpoint,
        strict: bool,
    ) -> Result<SendReport, PortlinkError> {
        let delivery = handle.into_delivery()?;
        let report = endpoint.dispatch(delivery, endpoint.config().default_send_policy)?;
        if strict {
            self.wait_for_all_writes();
        }
        Ok(report)
    }

    /// Blocks until no buffer is in flight.
    pub fn wait_for_all_writes(&self) {
        let mut state = self.inner.state.lock();
        while state.in_flight > 0 {
            self.inner.drained.wait(&mut state);
        }
    }

    /// Like [`wait_for_all_writes`](Self::wait_for_all_writes) but gives up
    /// after `timeout`. Returns `true` if the pool drained.
    pub fn wait_for_all_writes_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.in_flight > 0 {
            if self
                .inner
                .drained
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.in_flight == 0;
            }
        }
        true
    }
}

impl Default for WriteBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_BUFFER_SLOTS)
    }
}

impl fmt::Debug for WriteBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WriteBufferPool")
            .field("slots", &state.slots)
            .field("in_flight", &state.in_flight)
            .finish()
    }
}

/// Exclusive access to one pool slot.
///
/// Dereferences to a [`MessageBuilder`]. Dropping a handle that was never
/// committed returns the slot to the pool.
pub struct BufferHandle {
    pool: Arc<PoolInner>,
    index: usize,
    generation: u64,
    content: MessageBuilder,
    on_complete: Option<Completion>,
    settled: bool,
}

impl BufferHandle {
    fn new(pool: Arc<PoolInner>, index: usize, generation: u64) -> Self {
        Self {
            pool,
            index,
            generation,
            content: MessageBuilder::default(),
            on_complete: None,
            settled: false,
        }
    }

    /// Slot index this handle owns.
    pub fn slot(&self) -> usize {
        self.index
    }

    /// Registers a callback fired once every connection has finished with
    /// this buffer, just before the slot is recycled.
    pub fn on_complete(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_complete = Some(Box::new(callback));
    }

    /// Freezes the content and marks the slot in flight.
    pub(crate) fn into_delivery(mut self) -> Result<Delivery, WriteBufferError> {
        let message = self
            .content
            .finish()
            .map_err(|_| WriteBufferError::Empty { slot: self.index })?;

        let mut state = self.pool.state.lock();
        state.slots[self.index] = SlotState::InFlight;
        state.in_flight += 1;
        drop(state);
        self.settled = true;

        Ok(Delivery {
            message,
            ticket: Some(SlotTicket {
                pool: self.pool.clone(),
                index: self.index,
                generation: self.generation,
                on_complete: Mutex::new(self.on_complete.take()),
            }),
            outstanding: None,
        })
    }
}

impl Deref for BufferHandle {
    type Target = MessageBuilder;

    fn deref(&self) -> &MessageBuilder {
        &self.content
    }
}

impl DerefMut for BufferHandle {
    fn deref_mut(&mut self) -> &mut MessageBuilder {
        &mut self.content
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if !self.settled {
            self.pool
                .put_back(self.index, self.generation, SlotState::Acquired);
        }
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("slot", &self.index)
            .field("blocks", &self.content.block_count())
            .finish()
    }
}

struct SlotTicket {
    pool: Arc<PoolInner>,
    index: usize,
    generation: u64,
    on_complete: Mutex<Option<Completion>>,
}

impl SlotTicket {
    fn complete(self) {
        if let Some(callback) = self.on_complete.into_inner() {
            callback();
        }
        self.pool
            .put_back(self.index, self.generation, SlotState::InFlight);
    }
}

/// Counts deliveries that connection threads still hold.
#[derive(Default)]
pub(crate) struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    /// Waits until nothing is outstanding. Returns `false` on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// A message on its way to one or more connections.
///
/// Writers hold it behind an `Arc`; when the last one lets go, the owning
/// pool slot (if any) completes.
pub(crate) struct Delivery {
    message: Message,
    ticket: Option<SlotTicket>,
    outstanding: Option<Arc<Outstanding>>,
}

impl Delivery {
    /// A delivery that belongs to no pool.
    pub(crate) fn new(message: Message) -> Self {
        Self {
            message,
            ticket: None,
            outstanding: None,
        }
    }

    /// Counts this delivery in `outstanding` until it is dropped.
    pub(crate) fn tracked(mut self, outstanding: Arc<Outstanding>) -> Self {
        outstanding.begin();
        self.outstanding = Some(outstanding);
        self
    }

    pub(crate) fn message(&self) -> &Message {
        &self.message
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            ticket.complete();
        }
        if let Some(outstanding) = self.outstanding.take() {
            outstanding.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;

    fn filled(pool: &WriteBufferPool, text: &str) -> BufferHandle {
        let mut handle = pool.acquire().unwrap();
        handle.text(text);
        handle
    }

    #[test]
    fn test_acquire_hands_out_distinct_slots() {
        let pool = WriteBufferPool::new(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.slot(), b.slot());
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());
    }

    #[test]
    fn test_release_returns_slot() {
        let pool = WriteBufferPool::new(1);
        let handle = filled(&pool, "discard me");
        pool.release(handle);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.slot_state(0), Some(SlotState::Free));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_extra_acquire_blocks_until_completion() {
        let pool = WriteBufferPool::new(2);
        let completed = Arc::new(AtomicBool::new(false));

        let mut first = filled(&pool, "one");
        {
            let completed = completed.clone();
            first.on_complete(move || completed.store(true, Ordering::SeqCst));
        }
        let first = first.into_delivery().unwrap();
        let second = filled(&pool, "two").into_delivery().unwrap();
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.slot_state(0), Some(SlotState::InFlight));
        assert_eq!(pool.slot_state(1), Some(SlotState::InFlight));

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = pool.clone();
            let completed = completed.clone();
            thread::spawn(move || {
                let handle = pool.acquire().unwrap();
                tx.send(completed.load(Ordering::SeqCst)).unwrap();
                handle.slot()
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(first);
        let saw_completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(saw_completion);
        assert_eq!(waiter.join().unwrap(), 0);
        drop(second);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_acquire_timeout_reports_exhaustion() {
        let pool = WriteBufferPool::with_acquire_timeout(1, Some(Duration::from_millis(20)));
        let _held = filled(&pool, "busy").into_delivery().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, WriteBufferError::Exhausted { slots: 1, .. }));
    }

    #[test]
    fn test_empty_commit_is_rejected_and_slot_freed() {
        let pool = WriteBufferPool::new(1);
        let handle = pool.acquire().unwrap();
        let err = handle.into_delivery().err().unwrap();
        assert_eq!(err, WriteBufferError::Empty { slot: 0 });
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_shared_delivery_completes_once_after_last_holder() {
        let pool = WriteBufferPool::new(1);
        let delivery = Arc::new(filled(&pool, "fan-out").into_delivery().unwrap());
        let copies: Vec<_> = (0..3).map(|_| delivery.clone()).collect();
        drop(delivery);
        assert_eq!(pool.in_flight(), 1);
        drop(copies);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_wait_for_all_writes() {
        let pool = WriteBufferPool::new(2);
        let delivery = filled(&pool, "slow").into_delivery().unwrap();
        assert!(!pool.wait_for_all_writes_timeout(Duration::from_millis(10)));

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(delivery);
        });
        pool.wait_for_all_writes();
        assert_eq!(pool.in_flight(), 0);
        writer.join().unwrap();
    }

    #[test]
    fn test_outstanding_tracking() {
        let outstanding = Arc::new(Outstanding::default());
        let delivery = Delivery::new(Message::text("x")).tracked(outstanding.clone());
        assert!(!outstanding.wait_idle(Duration::from_millis(10)));
        drop(delivery);
        assert!(outstanding.wait_idle(Duration::from_millis(10)));
    }
}
