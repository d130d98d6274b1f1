//! Implementations for the associated function `try_build` of various
//! message and payload types that converts high-level Rust structs into
//! network-encoded byte arrays

mod message;
mod payload;
mod proposal;

pub use message::encode_payload_list;

use thiserror::Error;

/// Estimate for pre-allocating the byte buffer of a single payload
pub(crate) const ESTIMATED_PAYLOAD_LENGTH: usize = 128;
/// Estimate for pre-allocating the byte buffer of a single proposal
pub(crate) const ESTIMATED_PROPOSAL_LENGTH: usize = 64;

/// Failure while building the network-level byte representation
#[derive(Debug, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BuildError {
    #[error("A message must not contain 255 or more payloads")]
    TooManyPayloads,
    #[error("A security association must not contain 255 or more proposals")]
    TooManyProposals,
    #[error("A proposal must not contain 255 or more transforms")]
    TooManyTransforms,
    #[error("A traffic selector payload must not contain 255 or more selectors")]
    TooManySelectors,
    #[error("Nonces must be between 16 and 256 octets")]
    InvalidNonceLength,
    #[error("An SPI must be shorter than 256 octets")]
    SpiTooLarge,
    #[error("Payload contents exceed the 16 bit length field")]
    PayloadTooLarge,
    #[error("SK and SKF payloads must be the last payload of a message")]
    EncryptedNotLast,
}
