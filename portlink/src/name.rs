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

//! Name lookup for endpoints.
//!
//! Endpoints register the contact they bound under their name and look up
//! peers given only a name. [`NameResolver`] is the seam; [`LocalNameServer`]
//! is an in-process table suitable for a single program or for tests.

use crate::contact::Contact;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Errors returned by a [`NameResolver`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    /// Nothing is registered under the name.
    #[error("no contact registered for '{name}'")]
    NotFound {
        /// The queried name.
        name: String,
    },

    /// The contact cannot be registered.
    #[error("cannot register {contact}: {reason}")]
    InvalidContact {
        /// The rejected contact, formatted.
        contact: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The resolver could not be reached.
    #[error("name resolver unavailable: {reason}")]
    Unavailable {
        /// What went wrong.
        reason: String,
    },
}

/// Maps endpoint names to contacts.
pub trait NameResolver: Send + Sync {
    /// Records `contact` under its name and returns what was stored.
    fn register(&self, contact: &Contact) -> Result<Contact, ResolverError>;

    /// Looks up the contact registered under `name`.
    fn query(&self, name: &str) -> Result<Contact, ResolverError>;

    /// Removes the registration for `name` and returns it.
    fn unregister(&self, name: &str) -> Result<Contact, ResolverError>;
}

/// In-memory resolver.
///
/// Registering a name that is already present replaces the old contact.
#[derive(Debug, Default)]
pub struct LocalNameServer {
    table: RwLock<HashMap<String, Contact>>,
}

impl LocalNameServer {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.table.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl NameResolver for LocalNameServer {
    fn register(&self, contact: &Contact) -> Result<Contact, ResolverError> {
        if contact.name().is_empty() {
            return Err(ResolverError::InvalidContact {
                contact: contact.to_string(),
                reason: "contact has no name",
            });
        }
        if !contact.has_address() {
            return Err(ResolverError::InvalidContact {
                contact: contact.to_string(),
                reason: "contact has no address",
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(name = %contact.name(), %contact, "Registered name");

        self.table
            .write()
            .insert(contact.name().to_string(), contact.clone());
        Ok(contact.clone())
    }

    fn query(&self, name: &str) -> Result<Contact, ResolverError> {
        self.table
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResolverError::NotFound {
                name: name.to_string(),
            })
    }

    fn unregister(&self, name: &str) -> Result<Contact, ResolverError> {
        let removed = self.table.write().remove(name);

        #[cfg(feature = "tracing")]
        if removed.is_some() {
            tracing::debug!(%name, "Unregistered name");
        }

        removed.ok_or_else(|| ResolverError::NotFound {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_query() {
        let names = LocalNameServer::new();
        let contact = Contact::by_socket("tcp", "127.0.0.1", 10002).with_name("/read");
        names.register(&contact).unwrap();

        assert_eq!(names.query("/read").unwrap(), contact);
        assert_eq!(names.names(), vec!["/read".to_string()]);
    }

    #[test]
    fn test_unknown_name() {
        let names = LocalNameServer::new();
        assert_eq!(
            names.query("/missing").unwrap_err(),
            ResolverError::NotFound {
                name: "/missing".to_string()
            }
        );
        assert!(names.unregister("/missing").is_err());
    }

    #[test]
    fn test_reregister_replaces() {
        let names = LocalNameServer::new();
        names
            .register(&Contact::by_socket("tcp", "127.0.0.1", 1).with_name("/a"))
            .unwrap();
        names
            .register(&Contact::by_socket("text", "127.0.0.1", 2).with_name("/a"))
            .unwrap();

        let found = names.query("/a").unwrap();
        assert_eq!(found.port(), 2);
        assert_eq!(found.carrier(), "text");
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_register_requires_name_and_address() {
        let names = LocalNameServer::new();
        assert!(names.register(&Contact::by_name("/no-address")).is_err());
        assert!(names
            .register(&Contact::by_socket("tcp", "127.0.0.1", 5))
            .is_err());
        assert!(names.is_empty());
    }

    #[test]
    fn test_unregister() {
        let names = LocalNameServer::new();
        let contact = Contact::by_socket("tcp", "127.0.0.1", 9).with_name("/gone");
        names.register(&contact).unwrap();
        assert_eq!(names.unregister("/gone").unwrap(), contact);
        assert!(names.query("/gone").is_err());
    }
}
