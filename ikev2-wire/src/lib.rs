//! # ikev2-wire
//!
//! Wire-level definitions, parsers and generators for IKEv2 messages
//! as specified by RFC 7296 and RFC 7383

#![warn(missing_docs, clippy::unwrap_used, clippy::expect_used)]

pub mod definitions;
pub mod generator;
pub mod parser;

pub use zerocopy;

/// Constant value for IKEv2 in the version field, as <major>.<minor> in 4 bits
/// each, where the <major> is 2 and the <minor> is zero.
pub const IKE_2_VERSION_VALUE: u8 = 0b00100000;

/// Size in octets of the fixed IKE message header
pub const IKE_HEADER_LEN: usize = 28;

#[cfg(test)]
mod tests;
