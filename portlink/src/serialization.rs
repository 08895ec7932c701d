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

//! Typed payload encoding.
//!
//! Messages move raw byte blocks; applications that exchange structured
//! values encode them through a [`Serializer`]. [`JsonSerializer`] is the
//! stock implementation and is what [`Message::encode`](crate::Message::encode)
//! callers usually reach for.
//!
//! ```rust
//! use portlink::serialization::{JsonSerializer, Serializer};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Pose { x: f64, y: f64 }
//!
//! let serializer = JsonSerializer::default();
//! let bytes = serializer.serialize(&Pose { x: 1.0, y: 2.0 }).unwrap();
//! let pose: Pose = serializer.deserialize(&bytes).unwrap();
//! assert_eq!(pose, Pose { x: 1.0, y: 2.0 });
//! ```

/// A value could not be turned into bytes.
#[derive(Debug, thiserror::Error)]
#[error("serialization failed ({format}): {source}")]
pub struct SerializationError {
    format: &'static str,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl SerializationError {
    /// Wraps a format-specific failure.
    pub fn new(
        format: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            format,
            source: source.into(),
        }
    }

    /// Name of the format that failed.
    pub fn format(&self) -> &'static str {
        self.format
    }
}

/// Bytes could not be turned back into a value.
#[derive(Debug, thiserror::Error)]
#[error("deserialization failed ({format}): {source}")]
pub struct DeserializationError {
    format: &'static str,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl DeserializationError {
    /// Wraps a format-specific failure.
    pub fn new(
        format: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            format,
            source: source.into(),
        }
    }

    /// Name of the format that failed.
    pub fn format(&self) -> &'static str {
        self.format
    }
}

/// Pluggable payload format.
///
/// Implementations must be shareable across connection threads.
pub trait Serializer: Send + Sync + 'static {
    /// Encodes `value`.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializationError>
    where
        T: serde::Serialize + ?Sized;

    /// Decodes a value previously produced by [`serialize`](Self::serialize).
    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, DeserializationError>
    where
        T: serde::de::DeserializeOwned;

    /// Stable format name.
    fn name(&self) -> &'static str;
}

/// JSON payloads via `serde_json`.
///
/// Compact by default; [`with_pretty_print`](Self::with_pretty_print) is handy
/// when payloads travel over the `text` carrier and are read by people.
#[derive(Clone, Debug, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Creates a compact JSON serializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits indented JSON.
    #[must_use]
    pub fn with_pretty_print(mut self) -> Self {
        self.pretty = true;
        self
    }
}

impl Serializer for JsonSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializationError>
    where
        T: serde::Serialize + ?Sized,
    {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        encoded.map_err(|e| SerializationError::new(self.name(), e))
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, DeserializationError>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|e| DeserializationError::new(self.name(), e))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::error::Error;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Telemetry {
        seq: u32,
        joints: Vec<f32>,
        label: String,
    }

    #[test]
    fn test_json_basic() {
        let serializer = JsonSerializer::default();
        let value = Telemetry {
            seq: 7,
            joints: vec![0.5, -1.25],
            label: "arm".to_string(),
        };
        let bytes = serializer.serialize(&value).unwrap();
        let decoded: Telemetry = serializer.deserialize(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_json_pretty_print() {
        let serializer = JsonSerializer::new().with_pretty_print();
        let bytes = serializer.serialize(&vec![1, 2, 3]).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains('\n'));
    }

    #[test]
    fn test_json_invalid_data() {
        let serializer = JsonSerializer::default();
        let err = serializer.deserialize::<Telemetry>(b"{ nope").unwrap_err();
        assert_eq!(err.format(), "json");
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("deserialization failed (json)"));
    }

    #[test]
    fn test_json_name() {
        assert_eq!(JsonSerializer::default().name(), "json");
    }
}
