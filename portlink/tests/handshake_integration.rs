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

//! Integration tests for the connection handshake over TCP sockets.

use parking_lot::Mutex;
use portlink::carrier::CarrierRegistry;
use portlink::endpoint::{ConnectionNegotiator, HandshakeState, Role, PROTOCOL_NOT_FOUND};
use portlink::transport::{TcpTransport, TcpTransportListener, TransportListener};
use portlink::{Contact, Endpoint, EndpointConfig, Message, Route};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[test]
fn test_both_sides_agree_over_tcp() {
    let registry = Arc::new(CarrierRegistry::with_defaults());
    for carrier in registry.names() {
        let listener = TcpTransportListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();

        let acceptor = thread::spawn({
            let registry = registry.clone();
            move || {
                let stream = listener.accept().unwrap();
                let mut negotiator =
                    ConnectionNegotiator::new(registry).with_timeout(Some(TIMEOUT));
                let result = negotiator.accept(stream, "/read");
                (negotiator.state(), result)
            }
        });

        let stream = TcpTransport::connect(addr, Some(TIMEOUT)).unwrap();
        let mut negotiator =
            ConnectionNegotiator::new(registry.clone()).with_timeout(Some(TIMEOUT));
        let outbound = negotiator
            .connect(Box::new(stream), &carrier, Route::new("/write", "/read", ""))
            .unwrap();
        assert_eq!(negotiator.state(), HandshakeState::Established);

        let (state, inbound) = acceptor.join().unwrap();
        assert_eq!(state, HandshakeState::Established, "{carrier}");
        let inbound = inbound.unwrap();
        assert_eq!(inbound.role, Role::Acceptor);
        assert_eq!(outbound.role, Role::Initiator);
        assert_eq!(inbound.link.route().from(), "/write");
        assert_eq!(inbound.link.route().carrier(), carrier);
        assert_eq!(inbound.carrier.descriptor(), outbound.carrier.descriptor());
    }
}

#[test]
fn test_garbage_is_answered_and_dropped() {
    let reader = Endpoint::new(EndpointConfig::default()).unwrap();
    let contact = reader.listen(&Contact::by_name("/read")).unwrap();

    let mut raw = TcpStream::connect(contact.socket_addr().unwrap()).unwrap();
    raw.set_read_timeout(Some(TIMEOUT)).unwrap();
    raw.write_all(b"GET / HT").unwrap();

    let mut answer = String::new();
    raw.read_to_string(&mut answer).unwrap();
    assert_eq!(answer, PROTOCOL_NOT_FOUND);

    assert!(reader.wait_for_events(1, TIMEOUT));
    let deadline = Instant::now() + TIMEOUT;
    while reader.error_metrics().handshake_failures() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(reader.error_metrics().handshake_failures(), 1);
    assert_eq!(reader.input_count(), 0);
    reader.close();
}

#[test]
fn test_typed_text_session() {
    let reader = Endpoint::new(EndpointConfig::default()).unwrap();
    let contact = reader.listen(&Contact::by_name("/read")).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        reader.set_read_callback(move |m: &Message| seen.lock().push(m.as_text().unwrap_or_default()));
    }

    let raw = TcpStream::connect(contact.socket_addr().unwrap()).unwrap();
    raw.set_read_timeout(Some(TIMEOUT)).unwrap();
    let mut lines = BufReader::new(raw.try_clone().unwrap());
    let mut raw = raw;

    raw.write_all(b"CONNECT /typist\nversion 1\n").unwrap();
    let mut welcome = String::new();
    lines.read_line(&mut welcome).unwrap();
    assert_eq!(welcome.trim(), "Welcome /typist");

    raw.write_all(b"d\nhello there\n\nd\nbye\nq\n").unwrap();

    let deadline = Instant::now() + TIMEOUT;
    while seen.lock().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(*seen.lock(), vec!["hello there", "bye"]);

    let mut rest = String::new();
    let _ = lines.read_to_string(&mut rest);
    assert!(rest.is_empty());
    reader.close();
}

#[test]
fn test_handshake_timeout_on_silent_peer() {
    let config = EndpointConfig::default().with_handshake_timeout(Duration::from_millis(50));
    let reader = Endpoint::new(config).unwrap();
    let contact = reader.listen(&Contact::by_name("/read")).unwrap();

    let _silent = TcpStream::connect(contact.socket_addr().unwrap()).unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while reader.error_metrics().handshake_failures() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(reader.error_metrics().handshake_failures(), 1);
    assert_eq!(reader.input_count(), 0);
    reader.close();
}

#[test]
fn test_contact_timeout_bounds_outgoing_handshake() {
    // Accepts and then never answers the connection header.
    let silent = std::net::TcpListener::bind(loopback()).unwrap();
    let port = silent.local_addr().unwrap().port();
    let holder = thread::spawn(move || {
        let (stream, _) = silent.accept().unwrap();
        thread::sleep(Duration::from_secs(1));
        drop(stream);
    });

    let writer = Endpoint::new(EndpointConfig::default()).unwrap();
    writer.set_name("/write");
    let peer = Contact::by_socket("tcp", "127.0.0.1", port).with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = writer.connect(&peer).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    assert_eq!(err.kind(), portlink::ErrorKind::HandshakeFailure);
    assert_eq!(writer.output_count(), 0);

    writer.close();
    holder.join().unwrap();
}

#[test]
fn test_listen_contact_timeout_bounds_incoming_handshake() {
    // The configured handshake timeout stays at its default of several seconds.
    let reader = Endpoint::new(EndpointConfig::default()).unwrap();
    let contact = reader
        .listen(&Contact::by_name("/read").with_timeout(Duration::from_millis(50)))
        .unwrap();
    assert_eq!(contact.timeout(), Some(Duration::from_millis(50)));

    let started = Instant::now();
    let _silent = TcpStream::connect(contact.socket_addr().unwrap()).unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while reader.error_metrics().handshake_failures() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(reader.error_metrics().handshake_failures(), 1);
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    reader.close();
}
