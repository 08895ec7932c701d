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

//! TCP streams and listeners over `std::net`.

use crate::transport::{
    ShutdownHandle, Transport, TransportError, TransportId, TransportListener, TransportMetadata,
};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

#[cfg(feature = "observability")]
use tracing::instrument;

/// How long [`TcpTransportListener::unblock`] waits for its own wake-up dial.
const UNBLOCK_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    metadata: TransportMetadata,
    timeout: Option<Duration>,
}

impl TcpTransport {
    /// Wraps an accepted or connected stream. Nagle is disabled so small
    /// acknowledgements are not delayed.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let metadata = TransportMetadata::new(TransportId::next(), "tcp")
            .with_local_addr(stream.local_addr()?)
            .with_peer_addr(stream.peer_addr()?);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            transport_id = %metadata.id,
            peer_addr = ?metadata.peer_addr,
            "Created TCP transport"
        );

        Ok(Self {
            stream,
            metadata,
            timeout: None,
        })
    }

    /// Dials `addr`, giving up after `timeout` if one is set.
    #[cfg_attr(feature = "observability", instrument(level = "debug"))]
    pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let connected = match timeout {
            Some(timeout) if !timeout.is_zero() => TcpStream::connect_timeout(&addr, timeout),
            _ => TcpStream::connect(addr),
        };
        let stream = connected.map_err(|source| {
            #[cfg(feature = "tracing")]
            tracing::debug!(%addr, error = %source, "TCP connect failed");
            TransportError::ConnectionFailed {
                address: addr.to_string(),
                source,
            }
        })?;
        Self::from_stream(stream).map_err(TransportError::from)
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        // std rejects a zero duration; treat it as "no timeout".
        let timeout = timeout.filter(|t| !t.is_zero());
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn shutdown_handle(&self) -> Result<ShutdownHandle, TransportError> {
        let stream = self.stream.try_clone()?;
        Ok(ShutdownHandle::new(move || {
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A bound TCP listening socket.
#[derive(Debug)]
pub struct TcpTransportListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransportListener {
    /// Binds `addr`. Port zero picks an ephemeral port.
    #[cfg_attr(feature = "observability", instrument(level = "debug"))]
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::BindFailed {
            address: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%local_addr, "TCP listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }
}

impl TransportListener for TcpTransportListener {
    fn accept(&self) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _) = self.listener.accept()?;
        Ok(Box::new(TcpTransport::from_stream(stream)?))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn unblock(&self) -> Result<(), TransportError> {
        // A wildcard bind cannot be dialed directly; go through loopback.
        let mut target = self.local_addr;
        if target.ip().is_unspecified() {
            target.set_ip(match target.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        TcpStream::connect_timeout(&target, UNBLOCK_DIAL_TIMEOUT)
            .map(drop)
            .map_err(|source| TransportError::ConnectionFailed {
                address: target.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_tcp_connect_and_accept() {
        let listener = TcpTransportListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();

        let client = thread::spawn(move || {
            let mut transport = TcpTransport::connect(addr, None).unwrap();
            transport.write_all(b"ping").unwrap();
            transport.flush().unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(server.metadata().kind, "tcp");
        client.join().unwrap();
    }

    #[test]
    fn test_tcp_bind_in_use() {
        let first = TcpTransportListener::bind(loopback()).unwrap();
        let err = TcpTransportListener::bind(first.local_addr()).unwrap_err();
        assert!(matches!(err, TransportError::BindFailed { .. }));
    }

    #[test]
    fn test_tcp_unblock_wakes_accept() {
        let listener = std::sync::Arc::new(TcpTransportListener::bind(loopback()).unwrap());
        let acceptor = {
            let listener = listener.clone();
            thread::spawn(move || listener.accept().is_ok())
        };
        listener.unblock().unwrap();
        assert!(acceptor.join().unwrap());
    }

    #[test]
    fn test_tcp_shutdown_handle_unblocks_read() {
        let listener = TcpTransportListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();
        let _client = TcpTransport::connect(addr, None).unwrap();
        let mut server = listener.accept().unwrap();
        let handle = server.shutdown_handle().unwrap();

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            server.read(&mut buf)
        });
        handle.shutdown();
        let read = reader.join().unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[test]
    fn test_tcp_read_timeout() {
        let listener = TcpTransportListener::bind(loopback()).unwrap();
        let _client = TcpTransport::connect(listener.local_addr(), None).unwrap();
        let mut server = listener.accept().unwrap();
        server.set_timeout(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(server.timeout(), Some(Duration::from_millis(20)));

        let mut buf = [0u8; 1];
        let err = server.read(&mut buf).unwrap_err();
        let err = TransportError::from_read(err, server.timeout());
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}
