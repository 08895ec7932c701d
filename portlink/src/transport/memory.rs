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

//! In-process byte streams.
//!
//! [`MemoryTransport::pair`] returns two connected ends backed by bounded
//! `crossbeam-channel` queues of byte chunks. They behave like a socket pair:
//! a full queue blocks the writer, shutting either end down wakes readers
//! and writers on both ends, and dropping an end reads as end-of-stream on
//! the other. Tests use them to drive carriers and the negotiator without
//! touching the network.

use crate::transport::{
    ShutdownHandle, Transport, TransportError, TransportId, TransportMetadata,
};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default number of chunks each direction can hold before writers block.
pub const DEFAULT_CHUNK_CAPACITY: usize = 64;

struct PairState {
    closed: AtomicBool,
    // Dropping the sender disconnects every `closed_rx`, waking blocked selects.
    close_tx: Mutex<Option<Sender<()>>>,
}

impl PairState {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_tx.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One end of an in-memory stream pair.
pub struct MemoryTransport {
    metadata: TransportMetadata,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    closed_rx: Receiver<()>,
    state: Arc<PairState>,
    chunk: Vec<u8>,
    offset: usize,
    timeout: Option<Duration>,
}

impl MemoryTransport {
    /// Creates a connected pair. `capacity` bounds the number of unread
    /// chunks per direction; it is clamped to at least one.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let capacity = capacity.max(1);
        let (a_tx, b_rx) = bounded(capacity);
        let (b_tx, a_rx) = bounded(capacity);
        let (close_tx, closed_rx) = bounded::<()>(0);
        let state = Arc::new(PairState {
            closed: AtomicBool::new(false),
            close_tx: Mutex::new(Some(close_tx)),
        });

        let end = |tx, rx, closed_rx| MemoryTransport {
            metadata: TransportMetadata::new(TransportId::next(), "memory"),
            tx,
            rx,
            closed_rx,
            state: state.clone(),
            chunk: Vec::new(),
            offset: 0,
            timeout: None,
        };
        let a = end(a_tx, a_rx, closed_rx.clone());
        let b = end(b_tx, b_rx, closed_rx);

        #[cfg(feature = "tracing")]
        tracing::trace!(a = %a.metadata.id, b = %b.metadata.id, capacity, "Created memory transport pair");

        (a, b)
    }

    fn timed_out() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "memory transport timed out")
    }

    fn fill(&mut self) -> io::Result<bool> {
        if self.state.is_closed() {
            return Ok(false);
        }
        let received = match self.timeout {
            Some(timeout) => select! {
                recv(self.rx) -> chunk => chunk.ok(),
                recv(self.closed_rx) -> _ => None,
                default(timeout) => return Err(Self::timed_out()),
            },
            None => select! {
                recv(self.rx) -> chunk => chunk.ok(),
                recv(self.closed_rx) -> _ => None,
            },
        };
        match received {
            Some(chunk) => {
                self.chunk = chunk;
                self.offset = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.chunk.len() {
            if !self.fill()? {
                return Ok(0);
            }
        }
        let available = &self.chunk[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory transport closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = buf.to_vec();
        let sent = match self.timeout {
            Some(timeout) => select! {
                send(self.tx, chunk) -> res => res.is_ok(),
                recv(self.closed_rx) -> _ => false,
                default(timeout) => return Err(Self::timed_out()),
            },
            None => select! {
                send(self.tx, chunk) -> res => res.is_ok(),
                recv(self.closed_rx) -> _ => false,
            },
        };
        if sent {
            Ok(buf.len())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory transport peer gone"))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.timeout = timeout.filter(|t| !t.is_zero());
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn shutdown_handle(&self) -> Result<ShutdownHandle, TransportError> {
        let state = self.state.clone();
        Ok(ShutdownHandle::new(move || state.close()))
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.state.close();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.metadata.id)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_memory_pair_roundtrip() {
        let (mut a, mut b) = MemoryTransport::pair(4);
        a.write_all(b"hello world").unwrap();

        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        let mut rest = [0u8; 6];
        b.read_exact(&mut rest).unwrap();
        assert_eq!(&rest, b" world");
    }

    #[test]
    fn test_memory_drop_reads_as_eof() {
        let (a, mut b) = MemoryTransport::pair(4);
        drop(a);
        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_shutdown_wakes_reader() {
        let (a, mut b) = MemoryTransport::pair(4);
        let handle = b.shutdown_handle().unwrap();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            b.read(&mut buf).unwrap()
        });
        handle.shutdown();
        assert_eq!(reader.join().unwrap(), 0);
        drop(a);
    }

    #[test]
    fn test_memory_full_queue_blocks_until_timeout() {
        let (mut a, _b) = MemoryTransport::pair(1);
        a.set_timeout(Some(Duration::from_millis(20))).unwrap();
        a.write_all(b"x").unwrap();
        let err = a.write(b"y").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_memory_write_after_shutdown_fails() {
        let (mut a, _b) = MemoryTransport::pair(1);
        a.shutdown().unwrap();
        assert_eq!(a.write(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
