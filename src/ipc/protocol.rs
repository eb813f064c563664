//! IPC envelope types
//!
//! Defines the request envelope exchanged between modules and the server,
//! and the response view a receiver derives from it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{clock, Error, Result};

use super::codec::checksum;

/// Longest display string kept in a [`Response`], in characters
pub const DISPLAY_LIMIT: usize = 64;

/// Fixed-width 4-byte module or session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Identifier([u8; 4]);

impl Identifier {
    /// Width of every identifier in bytes
    pub const LEN: usize = 4;

    /// Create an identifier from exactly four bytes
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Build an identifier from arbitrary input, truncating to 4 bytes
    ///
    /// Returns the identifier and whether truncation happened. Inputs shorter
    /// than 4 bytes are rejected; identifiers are never padded.
    pub fn truncating(bytes: &[u8]) -> Result<(Self, bool)> {
        if bytes.len() < Self::LEN {
            return Err(Error::InvalidIdentifier(
                String::from_utf8_lossy(bytes).into_owned(),
            ));
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[..Self::LEN]);
        Ok((Self(id), bytes.len() > Self::LEN))
    }

    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            // Printable ids are shown as text ("CONN"), everything else as hex
            f.write_str(&String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "0x{:02x}{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2], self.0[3])
        }
    }
}

/// Message type byte carried in the header
///
/// `ACK` and `ERROR` are reserved for responses, every other value is
/// application-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub u8);

impl MessageType {
    /// Integrity check passed
    pub const ACK: Self = Self(0x01);
    /// Integrity check failed or request rejected
    pub const ERROR: Self = Self(0x02);
    /// Conventional type for application data sent by clients
    pub const DATA: Self = Self(0x10);
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ACK => f.write_str("ACK"),
            Self::ERROR => f.write_str("ERROR"),
            Self::DATA => f.write_str("DATA"),
            Self(other) => write!(f, "0x{:02x}", other),
        }
    }
}

/// How the payload bytes of a [`Message`] are meant to be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Datatype {
    Text,
    Int,
    Json,
    Yaml,
    Bin,
    /// Tag not known to this build, kept so it survives a round trip
    Unknown(u8),
}

impl From<u8> for Datatype {
    fn from(tag: u8) -> Self {
        match tag {
            0 => Datatype::Text,
            1 => Datatype::Int,
            2 => Datatype::Json,
            3 => Datatype::Yaml,
            4 => Datatype::Bin,
            other => Datatype::Unknown(other),
        }
    }
}

impl From<Datatype> for u8 {
    fn from(datatype: Datatype) -> Self {
        match datatype {
            Datatype::Text => 0,
            Datatype::Int => 1,
            Datatype::Json => 2,
            Datatype::Yaml => 3,
            Datatype::Bin => 4,
            Datatype::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Text => f.write_str("TEXT"),
            Datatype::Int => f.write_str("INT"),
            Datatype::Json => f.write_str("JSON"),
            Datatype::Yaml => f.write_str("YAML"),
            Datatype::Bin => f.write_str("BIN"),
            Datatype::Unknown(tag) => write!(f, "UNKNOWN({})", tag),
        }
    }
}

/// Payload of an envelope
///
/// Only the datatype and the raw bytes travel; the string view is rebuilt
/// on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub datatype: Datatype,
    /// Raw payload bytes, the only input to the checksum
    pub data: Vec<u8>,
    /// Informational string mirror of `data`
    pub string_data: String,
}

impl Message {
    /// Create a message whose string view mirrors the raw bytes
    pub fn new(datatype: Datatype, data: Vec<u8>) -> Self {
        let string_data = String::from_utf8_lossy(&data).into_owned();
        Self {
            datatype,
            data,
            string_data,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    datatype: Datatype,
    #[serde(with = "hex::serde")]
    data: Vec<u8>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Message::new(wire.datatype, wire.data)
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        Self {
            datatype: message.datatype,
            data: message.data,
        }
    }
}

/// Envelope header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Sender identifier on requests, target identifier on replies
    pub identifier: Identifier,
    pub message_type: MessageType,
}

/// The envelope sent over the wire
///
/// Immutable once built: the checksum is computed over the payload in
/// [`Request::new`] and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(with = "hex::serde")]
    message_signature: Vec<u8>,
    header: Header,
    message: Message,
    timestamp: i64,
    checksum32: u32,
}

/// Field-level view of a [`Request`], for relaying or inspecting envelopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParts {
    pub message_signature: Vec<u8>,
    pub header: Header,
    pub message: Message,
    pub timestamp: i64,
    pub checksum32: u32,
}

impl Request {
    /// Build a new envelope, stamping the current time and the payload CRC
    pub fn new(message_signature: Vec<u8>, header: Header, message: Message) -> Self {
        let checksum32 = checksum(&message.data);
        Self {
            message_signature,
            header,
            message,
            timestamp: clock::unix_nanos(),
            checksum32,
        }
    }

    /// Reassemble an envelope from its parts without recomputing anything
    pub fn from_parts(parts: RequestParts) -> Self {
        Self {
            message_signature: parts.message_signature,
            header: parts.header,
            message: parts.message,
            timestamp: parts.timestamp,
            checksum32: parts.checksum32,
        }
    }

    /// Split the envelope into its parts
    pub fn into_parts(self) -> RequestParts {
        RequestParts {
            message_signature: self.message_signature,
            header: self.header,
            message: self.message,
            timestamp: self.timestamp,
            checksum32: self.checksum32,
        }
    }

    pub fn message_signature(&self) -> &[u8] {
        &self.message_signature
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn checksum32(&self) -> u32 {
        self.checksum32
    }

    /// Recompute the payload checksum and compare it with the carried one
    pub fn verify(&self) -> Result<()> {
        let actual = checksum(&self.message.data);
        if actual == self.checksum32 {
            Ok(())
        } else {
            Err(Error::Integrity {
                expected: self.checksum32,
                actual,
            })
        }
    }

    /// Whether this envelope is a no-op marker that gets no reply
    ///
    /// A zero checksum over a non-empty payload marks a no-op. An empty
    /// payload hashes to zero legitimately and is answered normally.
    pub fn is_noop(&self) -> bool {
        self.checksum32 == 0 && !self.message.data.is_empty()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "IPC REQUEST")?;
        writeln!(f, "-----------")?;
        writeln!(
            f,
            "Signature:   {}",
            String::from_utf8_lossy(&self.message_signature)
        )?;
        writeln!(f, "Identifier:  {}", self.header.identifier)?;
        writeln!(f, "Type:        {}", self.header.message_type)?;
        writeln!(f, "Datatype:    {}", self.message.datatype)?;
        writeln!(f, "Data:        {}", truncate_display(&self.message.string_data))?;
        writeln!(f, "Timestamp:   {}", self.timestamp)?;
        write!(f, "Checksum:    {:#010x}", self.checksum32)
    }
}

/// Receiver-side view of an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    request: Request,
    success: bool,
    message: String,
    checksum32: u32,
}

impl Response {
    /// Derive a response from a received envelope
    ///
    /// `success` holds when the recomputed checksum matches and the sender
    /// answered with `ACK`.
    pub fn from_request(request: Request) -> Self {
        let intact = match request.verify() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Response failed integrity check: {}", e);
                false
            }
        };
        let success = intact && request.header.message_type == MessageType::ACK;
        let message = truncate_display(&request.message.string_data);
        let checksum32 = request.checksum32;

        Self {
            request,
            success,
            message,
            checksum32,
        }
    }

    /// The envelope this response was derived from
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Display string, truncated to [`DISPLAY_LIMIT`] characters
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Untruncated payload bytes
    pub fn data(&self) -> &[u8] {
        &self.request.message.data
    }

    pub fn checksum32(&self) -> u32 {
        self.checksum32
    }
}

/// Shorten a display string to [`DISPLAY_LIMIT`] characters
pub fn truncate_display(s: &str) -> String {
    if s.chars().count() <= DISPLAY_LIMIT {
        return s.to_string();
    }
    let mut out: String = s.chars().take(DISPLAY_LIMIT).collect();
    out.push_str("...");
    out
}
