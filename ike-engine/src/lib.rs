//! # ike-engine
//!
//! An IKEv2 initiator (RFC 7296) for mobile network stacks: it negotiates
//! IKE and Child SAs, authenticates via pre-shared keys or the EAP methods
//! of the [eap] crate, encrypts and fragments its messages (RFC 7383), and
//! sequences request/response exchanges with retransmission over an
//! injected packet transport.
//!
//! The UDP socket, the kernel SA programming, the UICC and the TLS client
//! are all external collaborators reached through the traits in
//! [transport] and the [eap] crate.

#![warn(missing_docs, clippy::unwrap_used, clippy::expect_used)]

pub mod child;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod exchange;
pub mod session;
pub mod transport;

use thiserror::Error;

use ikev2_wire::definitions::params::NotifyError;
use ikev2_wire::parser::DecodeError;

/// A protocol-level failure with a 1:1 notify payload mapping; both
/// consumable internally and emittable on the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum IkeProtocolError {
    #[error("Peer message could not be parsed")]
    InvalidSyntax,
    #[error("Peer message carried unsupported critical payloads: {0:?}")]
    UnsupportedCriticalPayload(Vec<u8>),
    #[error("No common proposal with the peer")]
    NoProposalChosen,
    #[error("Peer demands a different key exchange group")]
    InvalidKePayload,
    #[error("Message ID outside the allowed window")]
    InvalidMessageId,
    #[error("Peer could not be authenticated")]
    AuthenticationFailed,
    #[error("No additional SAs are accepted on this session")]
    NoAdditionalSas,
    #[error("Peer traffic selectors are unacceptable")]
    InvalidSelectors,
    #[error("Exchange cannot be handled right now")]
    TemporaryFailure,
}

impl IkeProtocolError {
    /// The notify payload type this error maps to
    pub fn notify_type(&self) -> NotifyError {
        match self {
            IkeProtocolError::InvalidSyntax => NotifyError::InvalidSyntax,
            IkeProtocolError::UnsupportedCriticalPayload(_) => {
                NotifyError::UnsupportedCriticalPayload
            }
            IkeProtocolError::NoProposalChosen => NotifyError::NoProposalChosen,
            IkeProtocolError::InvalidKePayload => NotifyError::InvalidKeyExchangePayload,
            IkeProtocolError::InvalidMessageId => NotifyError::InvalidMessageId,
            IkeProtocolError::AuthenticationFailed => NotifyError::AuthenticationFailed,
            IkeProtocolError::NoAdditionalSas => NotifyError::NoAdditionalSas,
            IkeProtocolError::InvalidSelectors => NotifyError::InvalidSelectors,
            IkeProtocolError::TemporaryFailure => NotifyError::TemporaryFailure,
        }
    }
}

impl From<DecodeError> for IkeProtocolError {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::UnsupportedCriticalPayload(types) => {
                IkeProtocolError::UnsupportedCriticalPayload(types)
            }
            _ => IkeProtocolError::InvalidSyntax,
        }
    }
}

/// An internal failure that is never surfaced on the wire; it tears the
/// session down instead
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum IkeInternalError {
    #[error("Cryptographic failure: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("Message could not be built: {0}")]
    Build(#[from] ikev2_wire::generator::BuildError),
    #[error("EAP failure: {0}")]
    Eap(#[from] eap::EapError),
    #[error("Child SA installation failed: {0}")]
    SaInstall(#[from] transport::SaInstallError),
    #[error("Transport failure: {0}")]
    Transport(#[from] std::io::Error),
}
