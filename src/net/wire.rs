//! Wire format for device messages
//!
//! Every message travels as a length-prefixed frame:
//!
//! ```text
//! +------------------+--------------------------+
//! | Length (4 bytes) | Payload (variable)       |
//! | Big-endian u32   | JSON or Postcard binary  |
//! +------------------+--------------------------+
//! ```
//!
//! - **Length field**: payload byte count, network byte order
//! - **Payload**: the serialized [`DeviceMessage`], self-describing
//!   (the variant discriminant and all fields travel inside it)
//! - **Maximum payload size**: [`MAX_MESSAGE_LEN`]
//!
//! Frames are self-delimiting, so several messages can share one TCP
//! segment and one message can span several segments. [`Serializer::decode`]
//! reports exactly how many bytes the first complete frame occupied; the
//! caller drops that prefix and retries until no complete frame remains.
//!
//! ## Wire formats
//!
//! - **Json** (default): human-readable, debugging-friendly
//! - **Postcard**: compact binary for high-frequency reporting
//!
//! ## Malformed input
//!
//! A frame whose payload fails to deserialize, carries an over-long device
//! name, or claims an implausible length is indistinguishable from an
//! incomplete frame: `decode` answers "no message, nothing consumed" and the
//! stream stalls until the connection is closed at a higher layer. Known
//! limitation of the framing contract; resynchronization is not attempted.

use crate::config::MAX_MESSAGE_LEN;
use crate::error::{Error, Result};
use crate::messages::DeviceMessage;

/// Frame header size (the length prefix)
const LENGTH_PREFIX_LEN: usize = 4;

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON format - human-readable for debugging
    #[default]
    Json,
    /// Binary format using postcard - fast and compact
    Postcard,
}

/// Serializer that can handle both formats
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    /// Create a new serializer for the given format
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// Encode one message into a self-delimiting frame
    pub fn encode(&self, message: &DeviceMessage) -> Result<Vec<u8>> {
        let payload = match self.format {
            WireFormat::Json => {
                serde_json::to_vec(message).map_err(|e| Error::Serialization(e.to_string()))?
            }
            WireFormat::Postcard => {
                postcard::to_allocvec(message).map_err(|e| Error::Serialization(e.to_string()))?
            }
        };

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode the first complete message from the front of `bytes`.
    ///
    /// Returns the message and the number of bytes it occupied, or
    /// `(None, 0)` when no complete, valid frame is present yet. The caller
    /// must gather more bytes before retrying - a `(None, 0)` answer on the
    /// same input will repeat forever.
    pub fn decode(&self, bytes: &[u8]) -> (Option<DeviceMessage>, usize) {
        if bytes.len() < LENGTH_PREFIX_LEN {
            return (None, 0);
        }

        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len > MAX_MESSAGE_LEN {
            // implausible length: treated like any other malformed frame
            return (None, 0);
        }
        if bytes.len() < LENGTH_PREFIX_LEN + len {
            return (None, 0);
        }

        let payload = &bytes[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len];
        let message: Option<DeviceMessage> = match self.format {
            WireFormat::Json => serde_json::from_slice(payload).ok(),
            WireFormat::Postcard => postcard::from_bytes(payload).ok(),
        };

        match message {
            Some(m) if m.validate().is_ok() => (Some(m), LENGTH_PREFIX_LEN + len),
            _ => (None, 0),
        }
    }
}

/// Create a serializer for the given wire format
pub fn create_serializer(format: WireFormat) -> Serializer {
    Serializer::new(format)
}
