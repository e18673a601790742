//! Versioned envelope for messages on the RPC transport.
//!
//! Every request and reply body is wrapped so that workers and the engine
//! can be upgraded independently.

use crate::error::TransportError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload at the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Encode {
            message: e.to_string(),
        })
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Deserializes an envelope, rejecting versions newer than this build.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Decode` for malformed bodies or unsupported
    /// versions.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let envelope: Self = serde_json::from_slice(bytes).map_err(|e| TransportError::Decode {
            message: e.to_string(),
        })?;
        if envelope.version > CURRENT_VERSION {
            return Err(TransportError::Decode {
                message: format!("unsupported envelope version {}", envelope.version),
            });
        }
        Ok(envelope)
    }
}
