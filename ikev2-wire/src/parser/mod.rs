//! Parser functionality to convert network-level bytes into [IkeMessage] structs
//!
//! Use the [IkeMessage::try_parse] associated function as an entrypoint, or
//! [decode_payload_list] to parse a bare payload chain (for example the
//! decrypted contents of an SK payload).

mod message;
mod payload;
mod proposal;

pub use message::decode_payload_list;

use thiserror::Error;

use crate::definitions::UnparseableParameter;

/// Failure while parsing an [IkeMessage] or payload chain from its
/// network-level byte representation
///
/// Everything except [DecodeError::UnsupportedCriticalPayload] maps to the
/// INVALID_SYNTAX notification when surfaced on the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the structure it declares
    #[error("Buffer too small to parse the structure")]
    BufferTooSmall,
    /// The version field did not announce IKEv2
    #[error("Wrong protocol version, expected IKEv2")]
    WrongVersion,
    /// The length field of the message header does not match the datagram
    #[error("Message length does not match the buffer length")]
    MessageLengthMismatch,
    /// A payload declared a length not covered by the remaining buffer or
    /// not even covering its own generic header
    #[error("Declared payload length is invalid")]
    InvalidPayloadLength,
    /// Bytes remained after the payload chain terminated
    #[error("Trailing bytes after the last payload")]
    TrailingBytes,
    /// One or more payloads with the critical bit set were not understood
    #[error("Unsupported critical payload types: {0:?}")]
    UnsupportedCriticalPayload(Vec<u8>),
    /// A parameter value fell into a reserved or unassigned region
    #[error("Parameter could not be parsed: {0:#?}")]
    UnparseableParameter(UnparseableParameter),
    /// Proposal numbering did not start at 1
    #[error("Proposal numbering doesn't start at 1")]
    InvalidProposalNumberingStart,
    /// Proposal numbering did not increment by 1
    #[error("Proposal numbering doesn't increment by 1")]
    InvalidProposalNumbering,
    /// A traffic selector violated an ordering or family invariant
    #[error("Traffic selector violates an invariant")]
    InvalidTrafficSelector,
    /// A structure contradicted the protocol in some other way
    #[error("Structure violates the protocol")]
    ProtocolViolation,
}

impl From<UnparseableParameter> for DecodeError {
    fn from(value: UnparseableParameter) -> Self {
        Self::UnparseableParameter(value)
    }
}
