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

//! Single-slot hand-off buffers and threaded processing stages.
//!
//! An [`AtomicBuffer`] holds at most one value: writers block while it is
//! full, readers block while it is empty. A [`PipelineStage`] owns a thread
//! that repeatedly reads its input buffer, transforms the value and writes
//! the result to its output buffer. Stages chain by sharing buffers.
//!
//! ```rust
//! use portlink::pipeline::{AtomicBuffer, PipelineStage};
//!
//! let numbers = AtomicBuffer::new();
//! let doubled = AtomicBuffer::new();
//! let stage = PipelineStage::spawn("double", numbers.clone(), doubled.clone(), |x: u32| x * 2)
//!     .unwrap();
//!
//! numbers.write(21).unwrap();
//! assert_eq!(doubled.read(), Some(42));
//! stage.close();
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Errors raised by buffers and stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The buffer was closed; the value was not stored.
    #[error("buffer is closed")]
    Closed,

    /// The stage thread could not be started.
    #[error("failed to start stage '{name}': {source}")]
    Spawn {
        /// Stage name.
        name: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

struct Slot<T> {
    value: Option<T>,
    closed: bool,
    written: u64,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// A one-value buffer shared between a writer and a reader.
///
/// Cloning yields another handle to the same buffer.
pub struct AtomicBuffer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AtomicBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for AtomicBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AtomicBuffer<T> {
    /// An empty, open buffer.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    value: None,
                    closed: false,
                    written: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    /// Stores `value`, waiting while the buffer is full.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Closed`] if the buffer is or becomes closed.
    pub fn write(&self, value: T) -> Result<(), PipelineError> {
        let mut slot = self.shared.slot.lock();
        while slot.value.is_some() && !slot.closed {
            self.shared.not_full.wait(&mut slot);
        }
        if slot.closed {
            return Err(PipelineError::Closed);
        }
        slot.value = Some(value);
        slot.written += 1;
        drop(slot);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Takes the value, waiting while the buffer is empty.
    ///
    /// Returns `None` once the buffer is closed and drained.
    pub fn read(&self) -> Option<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = self.take(&mut slot) {
                return Some(value);
            }
            if slot.closed {
                return None;
            }
            self.shared.not_empty.wait(&mut slot);
        }
    }

    /// Like [`read`](Self::read) but gives up after `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = self.take(&mut slot) {
                return Some(value);
            }
            if slot.closed
                || self
                    .shared
                    .not_empty
                    .wait_until(&mut slot, deadline)
                    .timed_out()
            {
                return self.take(&mut slot);
            }
        }
    }

    /// Takes the value if one is present.
    pub fn try_read(&self) -> Option<T> {
        let mut slot = self.shared.slot.lock();
        self.take(&mut slot)
    }

    /// Reads, but returns `None` as soon as `stop` is set and the buffer
    /// is woken with [`wake_all`](Self::wake_all).
    fn read_interruptible(&self, stop: &AtomicBool) -> Option<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            if let Some(value) = self.take(&mut slot) {
                return Some(value);
            }
            if slot.closed {
                return None;
            }
            self.shared.not_empty.wait(&mut slot);
        }
    }

    fn take(&self, slot: &mut Slot<T>) -> Option<T> {
        let value = slot.value.take()?;
        self.shared.not_full.notify_one();
        Some(value)
    }

    /// Marks the end of the stream. A stored value can still be read;
    /// further writes fail.
    pub fn close(&self) {
        self.shared.slot.lock().closed = true;
        self.wake_all();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shared.slot.lock().closed
    }

    /// Whether no value is stored.
    pub fn is_empty(&self) -> bool {
        self.shared.slot.lock().value.is_none()
    }

    /// Values stored so far.
    pub fn written_count(&self) -> u64 {
        self.shared.slot.lock().written
    }

    fn wake_all(&self) {
        // Take the lock so a waiter between its checks and its wait cannot
        // miss the notification.
        drop(self.shared.slot.lock());
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }
}

impl<T> fmt::Debug for AtomicBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.slot.lock();
        f.debug_struct("AtomicBuffer")
            .field("full", &slot.value.is_some())
            .field("closed", &slot.closed)
            .field("written", &slot.written)
            .finish()
    }
}

/// The work a [`PipelineStage`] does to each value.
pub trait Transform<In, Out>: Send + 'static {
    /// Turns one input value into one output value.
    fn apply(&mut self, input: In) -> Out;
}

impl<F, In, Out> Transform<In, Out> for F
where
    F: FnMut(In) -> Out + Send + 'static,
{
    fn apply(&mut self, input: In) -> Out {
        self(input)
    }
}

#[derive(Default)]
struct Progress {
    processed: Mutex<u64>,
    advanced: Condvar,
}

/// A thread moving values from one buffer to the next.
///
/// The stage ends when its input is closed and drained, when its output is
/// closed, or when [`close`](Self::close) is called. Ending because the
/// input ran out closes the output too, so a chain of stages shuts down
/// front to back.
pub struct PipelineStage<In, Out> {
    name: String,
    input: AtomicBuffer<In>,
    output: AtomicBuffer<Out>,
    stop: Arc<AtomicBool>,
    progress: Arc<Progress>,
    thread: Option<JoinHandle<()>>,
}

impl<In, Out> PipelineStage<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Starts a stage applying `transform` between `input` and `output`.
    pub fn spawn<T>(
        name: impl Into<String>,
        input: AtomicBuffer<In>,
        output: AtomicBuffer<Out>,
        mut transform: T,
    ) -> Result<Self, PipelineError>
    where
        T: Transform<In, Out>,
    {
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(Progress::default());

        let thread = {
            let input = input.clone();
            let output = output.clone();
            let stop = stop.clone();
            let progress = progress.clone();
            let stage = name.clone();
            thread::Builder::new()
                .name(format!("stage-{}", name))
                .spawn(move || {
                    while let Some(value) = input.read_interruptible(&stop) {
                        if output.write(transform.apply(value)).is_err() {
                            break;
                        }
                        *progress.processed.lock() += 1;
                        progress.advanced.notify_all();
                    }
                    if !stop.load(Ordering::Acquire) && input.is_closed() {
                        output.close();
                    }

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        stage = %stage,
                        processed = *progress.processed.lock(),
                        "Pipeline stage finished"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = stage;
                })
                .map_err(|source| PipelineError::Spawn {
                    name: name.clone(),
                    source,
                })?
        };

        Ok(Self {
            name,
            input,
            output,
            stop,
            progress,
            thread: Some(thread),
        })
    }
}

impl<In, Out> PipelineStage<In, Out> {
    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The buffer this stage reads.
    pub fn input(&self) -> &AtomicBuffer<In> {
        &self.input
    }

    /// The buffer this stage writes.
    pub fn output(&self) -> &AtomicBuffer<Out> {
        &self.output
    }

    /// Values transformed and written so far.
    pub fn processed_count(&self) -> u64 {
        *self.progress.processed.lock()
    }

    /// Whether the stage thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Waits until at least `count` values went through. Returns `false`
    /// on timeout.
    pub fn wait_processed(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut processed = self.progress.processed.lock();
        while *processed < count {
            if self
                .progress
                .advanced
                .wait_until(&mut processed, deadline)
                .timed_out()
            {
                return *processed >= count;
            }
        }
        true
    }

    /// Stops the stage and joins its thread.
    ///
    /// A value already taken from the input is never dropped: if the output
    /// is full, this waits until the value can be written or the output is
    /// closed.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.input.wake_all();
        if thread.join().is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!(stage = %self.name, "Pipeline stage panicked");
        }
    }
}

impl<In, Out> Drop for PipelineStage<In, Out> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<In, Out> fmt::Debug for PipelineStage<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("processed", &self.processed_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_holds_one_value() {
        let buffer = AtomicBuffer::new();
        buffer.write(1).unwrap();
        assert!(!buffer.is_empty());

        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.write(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!writer.is_finished());

        assert_eq!(buffer.read(), Some(1));
        writer.join().unwrap().unwrap();
        assert_eq!(buffer.read(), Some(2));
        assert_eq!(buffer.written_count(), 2);
    }

    #[test]
    fn test_close_drains_then_ends() {
        let buffer = AtomicBuffer::new();
        buffer.write("last").unwrap();
        buffer.close();
        assert!(matches!(buffer.write("late"), Err(PipelineError::Closed)));
        assert_eq!(buffer.read(), Some("last"));
        assert_eq!(buffer.read(), None);
    }

    #[test]
    fn test_read_timeout() {
        let buffer: AtomicBuffer<u8> = AtomicBuffer::new();
        assert_eq!(buffer.read_timeout(Duration::from_millis(10)), None);
        assert_eq!(buffer.try_read(), None);
    }

    #[test]
    fn test_stage_transforms_in_order() {
        let input = AtomicBuffer::new();
        let output = AtomicBuffer::new();
        let stage =
            PipelineStage::spawn("square", input.clone(), output.clone(), |x: i64| x * x)
                .unwrap();

        let reader = {
            let output = output.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(value) = output.read() {
                    seen.push(value);
                }
                seen
            })
        };
        for x in 1..=4 {
            input.write(x).unwrap();
        }
        input.close();

        assert_eq!(reader.join().unwrap(), vec![1, 4, 9, 16]);
        assert!(stage.wait_processed(4, Duration::from_secs(1)));
        assert_eq!(stage.processed_count(), 4);
    }

    #[test]
    fn test_close_wakes_idle_stage() {
        let input: AtomicBuffer<u8> = AtomicBuffer::new();
        let output = AtomicBuffer::new();
        let stage = PipelineStage::spawn("idle", input.clone(), output.clone(), |x: u8| x)
            .unwrap();
        assert!(stage.is_running());
        stage.close();
        assert!(!output.is_closed());
    }

    #[test]
    fn test_close_keeps_value_in_hand() {
        let input = AtomicBuffer::new();
        let output = AtomicBuffer::new();
        let stage = PipelineStage::spawn("held", input.clone(), output.clone(), |x: u8| x)
            .unwrap();
        input.write(1).unwrap();
        input.write(2).unwrap();
        assert!(stage.wait_processed(1, Duration::from_secs(1)));
        // Wait for the stage to take the second value and block on the output.
        while !input.is_empty() {
            thread::yield_now();
        }

        let closer = thread::spawn(move || stage.close());
        assert_eq!(output.read(), Some(1));
        closer.join().unwrap();
        assert_eq!(output.try_read(), Some(2));
    }

    #[test]
    fn test_struct_transform() {
        struct Running(u32);
        impl Transform<u32, u32> for Running {
            fn apply(&mut self, input: u32) -> u32 {
                self.0 += input;
                self.0
            }
        }

        let input = AtomicBuffer::new();
        let output = AtomicBuffer::new();
        let _stage =
            PipelineStage::spawn("sum", input.clone(), output.clone(), Running(0)).unwrap();
        input.write(3).unwrap();
        assert_eq!(output.read(), Some(3));
        input.write(4).unwrap();
        assert_eq!(output.read(), Some(7));
    }
}
