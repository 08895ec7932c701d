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

//! Builder for endpoints that need more than a configuration.

use crate::carrier::CarrierRegistry;
use crate::endpoint::{Endpoint, EndpointConfig, ReadHandler};
use crate::error::PortlinkError;
use crate::name::NameResolver;
use std::fmt;
use std::sync::Arc;

/// Builder for creating and configuring endpoints.
///
/// # Examples
///
/// ```rust
/// use portlink::endpoint::{EndpointBuilder, EndpointConfig, SendPolicy};
/// use portlink::name::LocalNameServer;
/// use portlink::Message;
/// use std::sync::Arc;
///
/// let names = Arc::new(LocalNameServer::new());
/// let endpoint = EndpointBuilder::new()
///     .config(EndpointConfig::new().with_send_policy(SendPolicy::Drop))
///     .resolver(names)
///     .read_callback(|m: &Message| println!("{:?}", m))
///     .build()
///     .unwrap();
/// assert_eq!(endpoint.config().default_send_policy, SendPolicy::Drop);
/// endpoint.close();
/// ```
#[derive(Default)]
pub struct EndpointBuilder {
    config: EndpointConfig,
    registry: Option<Arc<CarrierRegistry>>,
    resolver: Option<Arc<dyn NameResolver>>,
    handler: Option<Box<dyn ReadHandler>>,
}

impl EndpointBuilder {
    /// Starts from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `config` instead of the default.
    #[must_use]
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolves carriers through `registry` instead of the global one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<CarrierRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers and looks up names through `resolver`.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Installs a read callback before any connection can arrive.
    #[must_use]
    pub fn read_callback(mut self, handler: impl ReadHandler) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Validates the configuration and starts the endpoint's manager thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the thread
    /// cannot be spawned.
    pub fn build(self) -> Result<Endpoint, PortlinkError> {
        Endpoint::from_parts(
            self.config,
            self.registry.unwrap_or_else(CarrierRegistry::global),
            self.resolver,
            self.handler,
        )
    }
}

impl fmt::Debug for EndpointBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointBuilder")
            .field("config", &self.config)
            .field("custom_registry", &self.registry.is_some())
            .field("resolver", &self.resolver.is_some())
            .field("read_callback", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{BinaryCarrier, CarrierRegistry};
    use crate::Contact;

    #[test]
    fn test_builder_defaults() {
        let endpoint = EndpointBuilder::new().build().unwrap();
        assert_eq!(endpoint.config(), &EndpointConfig::default());
        endpoint.close();
    }

    #[test]
    fn test_builder_invalid_config() {
        let result = EndpointBuilder::new()
            .config(EndpointConfig::new().with_max_message_size(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_custom_registry() {
        let registry = Arc::new(CarrierRegistry::empty());
        registry.register(BinaryCarrier::fast_tcp_descriptor(), || {
            Box::new(BinaryCarrier::fast_tcp())
        });
        let endpoint = EndpointBuilder::new()
            .registry(registry)
            .build()
            .unwrap();

        assert!(endpoint.listen(&Contact::by_name("/plain")).is_err());
        endpoint
            .listen(&Contact::by_name("/fast").with_carrier("fast_tcp"))
            .unwrap();
        endpoint.close();
    }
}
