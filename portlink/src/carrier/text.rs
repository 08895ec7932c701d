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

//! Line-oriented carriers: `text` and `text_ack`.
//!
//! Everything on the wire is a `\n`-terminated line, so a person with a
//! terminal can play either side. The opening line is the 8-byte tag
//! followed by the sender's name (`CONNECT /me`); the acceptor answers
//! `Welcome /me`. Each message is a `d` command line followed by a body
//! line, and `q` ends the session. `text_ack` opens with `CONNACK ` and
//! confirms the handshake and every message with an `<ACK>` line.

use crate::carrier::{Carrier, CarrierDescriptor, Incoming, Link, ProtocolError};
use crate::message::Message;

const TEXT_HEADER: [u8; 8] = *b"CONNECT ";
const TEXT_ACK_HEADER: [u8; 8] = *b"CONNACK ";
const ACK_LINE: &str = "<ACK>";
const WELCOME: &str = "Welcome";
const VERSION_WORD: &str = "version";
const TEXT_VERSION: u16 = 1;

/// Where a [`TextCarrier`] is in the per-message command grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextState {
    /// Waiting for a command word (`d` or `q`).
    ExpectHeaderWord,
    /// A `d` was read; the next line is the message body.
    ExpectBody,
}

/// Text framing over a stream.
#[derive(Debug, Clone)]
pub struct TextCarrier {
    descriptor: CarrierDescriptor,
    state: TextState,
}

impl TextCarrier {
    /// Descriptor of the plain `text` carrier.
    pub fn text_descriptor() -> CarrierDescriptor {
        CarrierDescriptor::new("text", TEXT_HEADER)
            .with_text_mode()
            .with_route_in_tag()
            .with_index_handshake()
    }

    /// Descriptor of the acknowledged `text_ack` carrier.
    pub fn text_ack_descriptor() -> CarrierDescriptor {
        CarrierDescriptor::new("text_ack", TEXT_ACK_HEADER)
            .with_text_mode()
            .with_route_in_tag()
            .with_index_handshake()
            .with_ack()
    }

    /// A `text` carrier instance.
    pub fn text() -> Self {
        Self {
            descriptor: Self::text_descriptor(),
            state: TextState::ExpectHeaderWord,
        }
    }

    /// A `text_ack` carrier instance.
    pub fn text_ack() -> Self {
        Self {
            descriptor: Self::text_ack_descriptor(),
            state: TextState::ExpectHeaderWord,
        }
    }

    /// Current read state.
    pub fn state(&self) -> TextState {
        self.state
    }

    fn body_line(message: &Message) -> Result<String, ProtocolError> {
        let text = message.as_text().ok_or(ProtocolError::InvalidText {
            reason: "payload is not UTF-8",
        })?;
        if text.contains('\n') {
            return Err(ProtocolError::InvalidText {
                reason: "payload contains a newline",
            });
        }
        Ok(text)
    }
}

impl Carrier for TextCarrier {
    fn descriptor(&self) -> &CarrierDescriptor {
        &self.descriptor
    }

    fn send_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let mut header = [0u8; 8];
        self.write_header(&mut header);
        let mut line = header.to_vec();
        line.extend_from_slice(link.route().from().as_bytes());
        line.push(b'\n');
        link.write_all(&line)
    }

    fn send_sender_specifier(&mut self, _link: &mut Link) -> Result<(), ProtocolError> {
        // The name already went out on the header line.
        Ok(())
    }

    fn expect_sender_specifier(&mut self, link: &mut Link) -> Result<String, ProtocolError> {
        Ok(link.read_line()?.trim().to_string())
    }

    fn send_index(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        link.write_line(&format!("{} {}", VERSION_WORD, TEXT_VERSION))
    }

    fn expect_index(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let line = link.read_line()?;
        let mut words = line.split_whitespace();
        let version = match (words.next(), words.next(), words.next()) {
            (Some(VERSION_WORD), Some(version), None) => version.parse::<u16>().map_err(|_| {
                ProtocolError::malformed("index", format!("bad version '{}'", version))
            })?,
            _ => {
                return Err(ProtocolError::malformed(
                    "index",
                    format!("expected 'version N', got '{}'", line),
                ));
            }
        };
        if version != TEXT_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: TEXT_VERSION,
                found: version,
            });
        }
        Ok(())
    }

    fn respond_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let line = format!("{} {}", WELCOME, link.route().from());
        link.write_line(&line)?;
        link.flush()
    }

    fn expect_reply_to_header(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let line = link.read_line()?;
        if line.split_whitespace().next() != Some(WELCOME) {
            return Err(ProtocolError::Rejected { reason: line });
        }
        Ok(())
    }

    fn send_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        link.write_line(ACK_LINE)?;
        link.flush()
    }

    fn expect_ack(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        let line = link.read_line()?;
        if line.trim() != ACK_LINE {
            return Err(ProtocolError::malformed(
                "acknowledgement",
                format!("expected '{}', got '{}'", ACK_LINE, line),
            ));
        }
        Ok(())
    }

    fn write(
        &mut self,
        link: &mut Link,
        message: &Message,
        wants_reply: bool,
    ) -> Result<(), ProtocolError> {
        if wants_reply {
            return Err(ProtocolError::Unsupported {
                carrier: self.descriptor.name.clone(),
                operation: "replies",
            });
        }
        let body = Self::body_line(message)?;
        if body.len() > link.max_message_size() {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                limit: link.max_message_size(),
            });
        }
        link.write_all(format!("d\n{}\n", body).as_bytes())?;
        link.flush()
    }

    fn read(&mut self, link: &mut Link) -> Result<Incoming, ProtocolError> {
        loop {
            match self.state {
                TextState::ExpectHeaderWord => {
                    let line = link.read_line()?;
                    match line.trim() {
                        "d" => self.state = TextState::ExpectBody,
                        "q" => return Ok(Incoming::Closed),
                        // Hand-typed sessions often carry stray blank lines.
                        "" => {}
                        other => {
                            return Err(ProtocolError::malformed(
                                "command",
                                format!("unknown command '{}'", other),
                            ));
                        }
                    }
                }
                TextState::ExpectBody => {
                    let body = link.read_line()?;
                    self.state = TextState::ExpectHeaderWord;
                    if body.len() > link.max_message_size() {
                        return Err(ProtocolError::MessageTooLarge {
                            size: body.len(),
                            limit: link.max_message_size(),
                        });
                    }
                    return Ok(Incoming::Message {
                        message: Message::text(body),
                        wants_reply: false,
                    });
                }
            }
        }
    }

    fn write_goodbye(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        link.write_line("q")?;
        link.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Route;
    use crate::transport::MemoryTransport;

    fn links() -> (Link, Link) {
        let (a, b) = MemoryTransport::pair(64);
        (
            Link::new(Box::new(a), Route::new("/me", "/you", "text")),
            Link::new(Box::new(b), Route::default()),
        )
    }

    #[test]
    fn test_header_line_folds_sender_name() {
        let (mut a, mut b) = links();
        TextCarrier::text().send_header(&mut a).unwrap();
        assert_eq!(b.read_array::<8>().unwrap(), *b"CONNECT ");
        let name = TextCarrier::text().expect_sender_specifier(&mut b).unwrap();
        assert_eq!(name, "/me");
    }

    #[test]
    fn test_command_state_machine() {
        let (mut a, mut b) = links();
        a.write_all(b"\nd\nhello there\nd\r\nsecond\r\nq\n").unwrap();

        let mut carrier = TextCarrier::text();
        assert_eq!(carrier.state(), TextState::ExpectHeaderWord);
        assert_eq!(
            carrier.read(&mut b).unwrap(),
            Incoming::Message {
                message: Message::text("hello there"),
                wants_reply: false
            }
        );
        assert_eq!(carrier.state(), TextState::ExpectHeaderWord);
        match carrier.read(&mut b).unwrap() {
            Incoming::Message { message, .. } => {
                assert_eq!(message.as_text().as_deref(), Some("second"))
            }
            Incoming::Closed => panic!("expected a message"),
        }
        assert_eq!(carrier.read(&mut b).unwrap(), Incoming::Closed);
    }

    #[test]
    fn test_unknown_command() {
        let (mut a, mut b) = links();
        a.write_all(b"x\n").unwrap();
        let err = TextCarrier::text().read(&mut b).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { stage: "command", .. }));
    }

    #[test]
    fn test_multiline_payload_is_rejected() {
        let (mut a, _b) = links();
        let err = TextCarrier::text()
            .write(&mut a, &Message::text("two\nlines"), false)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidText { .. }));
    }

    #[test]
    fn test_index_line() {
        let (mut a, mut b) = links();
        TextCarrier::text().send_index(&mut a).unwrap();
        TextCarrier::text().expect_index(&mut b).unwrap();

        a.write_line("version 7").unwrap();
        let err = TextCarrier::text().expect_index(&mut b).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion { found: 7, .. }));

        a.write_line("hello").unwrap();
        let err = TextCarrier::text().expect_index(&mut b).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { stage: "index", .. }));
    }

    #[test]
    fn test_welcome_and_ack() {
        let (mut a, mut b) = links();
        let mut acceptor = TextCarrier::text_ack();
        b.set_route(Route::new("/me", "/you", "text_ack"));
        acceptor.respond_to_header(&mut b).unwrap();
        acceptor.send_ack(&mut b).unwrap();

        let mut initiator = TextCarrier::text_ack();
        initiator.expect_reply_to_header(&mut a).unwrap();
        initiator.expect_ack(&mut a).unwrap();
    }

    #[test]
    fn test_replies_unsupported() {
        let (mut a, _b) = links();
        let err = TextCarrier::text()
            .write(&mut a, &Message::text("hi"), true)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unsupported { .. }));
    }
}
