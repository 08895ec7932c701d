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

//! Read callbacks.

use crate::contact::Route;
use crate::message::Message;
use std::fmt;

/// Receives every message read by an endpoint's input connections.
///
/// Calls are serialized: at most one message is being handled at a time,
/// whichever connection it arrived on. Returning `Some` answers a peer
/// that asked for a reply; the value is ignored otherwise.
///
/// Any `FnMut(&Message)` closure is a handler that never replies. Wrap a
/// closure returning a [`Message`] in [`Replier`] to answer requests.
pub trait ReadHandler: Send + 'static {
    /// Handles one message that travelled over `route`.
    fn on_message(&mut self, message: &Message, route: &Route) -> Option<Message>;
}

impl<F> ReadHandler for F
where
    F: FnMut(&Message) + Send + 'static,
{
    fn on_message(&mut self, message: &Message, _route: &Route) -> Option<Message> {
        self(message);
        None
    }
}

/// Adapts a closure that produces a reply for every message.
///
/// ```rust
/// use portlink::endpoint::{ReadHandler, Replier};
/// use portlink::{Message, Route};
///
/// let mut echo = Replier(|m: &Message| m.clone());
/// let reply = echo.on_message(&Message::text("ping"), &Route::default());
/// assert_eq!(reply.and_then(|m| m.as_text()).as_deref(), Some("ping"));
/// ```
pub struct Replier<F>(pub F);

impl<F> ReadHandler for Replier<F>
where
    F: FnMut(&Message) -> Message + Send + 'static,
{
    fn on_message(&mut self, message: &Message, _route: &Route) -> Option<Message> {
        Some((self.0)(message))
    }
}

impl<F> fmt::Debug for Replier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Replier")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_handler_never_replies() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut handler = {
            let seen = seen.clone();
            move |m: &Message| seen.lock().push(m.as_text())
        };
        assert!(handler
            .on_message(&Message::text("a"), &Route::default())
            .is_none());
        assert_eq!(*seen.lock(), vec![Some("a".to_string())]);
    }

    #[test]
    fn test_route_aware_handler() {
        struct BySender(Vec<String>);
        impl ReadHandler for BySender {
            fn on_message(&mut self, _message: &Message, route: &Route) -> Option<Message> {
                self.0.push(route.from().to_string());
                None
            }
        }

        let mut handler = BySender(Vec::new());
        handler.on_message(&Message::text("x"), &Route::new("/write", "/read", "tcp"));
        assert_eq!(handler.0, vec!["/write".to_string()]);
    }
}
