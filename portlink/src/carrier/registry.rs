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

//! Process-wide table of known carriers.

use crate::carrier::{BinaryCarrier, Carrier, CarrierDescriptor, TextCarrier};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

/// Creates a fresh, per-connection carrier instance.
pub type CarrierFactory = fn() -> Box<dyn Carrier>;

#[derive(Clone)]
struct Entry {
    descriptor: CarrierDescriptor,
    factory: CarrierFactory,
}

/// Maps carrier names and header tags to factories.
///
/// Endpoints consult the registry by header when accepting and by name when
/// connecting. [`CarrierRegistry::global`] is pre-populated with the stock
/// `tcp`, `fast_tcp`, `text` and `text_ack` carriers.
///
/// ```rust
/// use portlink::carrier::CarrierRegistry;
///
/// let registry = CarrierRegistry::global();
/// let tcp = registry.descriptor("tcp").unwrap();
/// assert!(tcp.requires_ack);
/// assert!(registry.choose_by_header(&tcp.header).is_some());
/// ```
pub struct CarrierRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl CarrierRegistry {
    /// A registry with no carriers.
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// A registry holding the stock carriers.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(BinaryCarrier::tcp_descriptor(), || Box::new(BinaryCarrier::tcp()));
        registry.register(BinaryCarrier::fast_tcp_descriptor(), || {
            Box::new(BinaryCarrier::fast_tcp())
        });
        registry.register(TextCarrier::text_descriptor(), || Box::new(TextCarrier::text()));
        registry.register(TextCarrier::text_ack_descriptor(), || {
            Box::new(TextCarrier::text_ack())
        });
        registry
    }

    /// The shared process-wide registry.
    pub fn global() -> Arc<CarrierRegistry> {
        static GLOBAL: OnceLock<Arc<CarrierRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(CarrierRegistry::with_defaults()))
            .clone()
    }

    /// Adds a carrier, replacing any existing one with the same name.
    pub fn register(&self, descriptor: CarrierDescriptor, factory: CarrierFactory) {
        #[cfg(feature = "tracing")]
        tracing::debug!(carrier = %descriptor.name, "Registering carrier");

        let mut entries = self.entries.write();
        entries.retain(|e| e.descriptor.name != descriptor.name);
        entries.push(Entry {
            descriptor,
            factory,
        });
    }

    /// Removes a carrier by name. Returns `true` if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.descriptor.name != name);
        entries.len() != before
    }

    /// Descriptor of a named carrier.
    pub fn descriptor(&self, name: &str) -> Option<CarrierDescriptor> {
        self.entries
            .read()
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| e.descriptor.clone())
    }

    /// New instance of a named carrier.
    pub fn create(&self, name: &str) -> Option<Box<dyn Carrier>> {
        let factory = self
            .entries
            .read()
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| e.factory)?;
        Some(factory())
    }

    /// New instance of the first carrier that recognises `header`.
    pub fn choose_by_header(&self, header: &[u8; 8]) -> Option<Box<dyn Carrier>> {
        let factories: Vec<CarrierFactory> =
            self.entries.read().iter().map(|e| e.factory).collect();
        factories
            .into_iter()
            .map(|factory| factory())
            .find(|carrier| carrier.matches_header(header))
    }

    /// Names of all registered carriers, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }
}

impl Default for CarrierRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CarrierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierRegistry")
            .field("carriers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_registered() {
        let registry = CarrierRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["tcp", "fast_tcp", "text", "text_ack"]);
    }

    #[test]
    fn test_lookup_by_header() {
        let registry = CarrierRegistry::with_defaults();
        for name in registry.names() {
            let descriptor = registry.descriptor(&name).unwrap();
            let carrier = registry.choose_by_header(&descriptor.header).unwrap();
            assert_eq!(carrier.descriptor().name, name);
        }
        assert!(registry.choose_by_header(b"GET / HT").is_none());
    }

    #[test]
    fn test_text_variants_are_told_apart_by_header() {
        let registry = CarrierRegistry::with_defaults();
        let plain = registry.choose_by_header(b"CONNECT ").unwrap();
        let acked = registry.choose_by_header(b"CONNACK ").unwrap();
        assert_eq!(plain.descriptor().name, "text");
        assert_eq!(acked.descriptor().name, "text_ack");
        assert!(acked.descriptor().requires_ack);
    }

    #[test]
    fn test_register_replaces_by_name() {
        let registry = CarrierRegistry::with_defaults();
        let mut descriptor = BinaryCarrier::tcp_descriptor();
        descriptor.header = *b"XXXXXXXX";
        registry.register(descriptor, || Box::new(BinaryCarrier::tcp()));
        assert_eq!(registry.names().len(), 4);
        assert_eq!(registry.descriptor("tcp").unwrap().header, *b"XXXXXXXX");
    }

    #[test]
    fn test_unregister() {
        let registry = CarrierRegistry::with_defaults();
        assert!(registry.unregister("fast_tcp"));
        assert!(!registry.unregister("fast_tcp"));
        assert!(registry.create("fast_tcp").is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = CarrierRegistry::empty();
        assert!(registry.create("tcp").is_none());
        assert!(registry.names().is_empty());
    }
}
