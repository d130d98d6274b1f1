//! # eap
//!
//! Peer-side implementation of the Extensible Authentication Protocol
//! (RFC 3748) with the EAP-SIM (RFC 4186), EAP-AKA (RFC 4187),
//! EAP-AKA' (RFC 5448), EAP-MSCHAPv2 (RFC 2759) and EAP-TTLS (RFC 5281)
//! methods, as carried inside IKE_AUTH exchanges.

#![warn(missing_docs, clippy::unwrap_used, clippy::expect_used)]

pub mod attribute;
pub mod avp;
pub mod config;
pub mod message;
pub mod methods;
pub mod session;
pub mod sim_auth;
pub mod simaka;
pub mod tls;

use thiserror::Error;

use crate::sim_auth::SimAuthError;
use crate::tls::TlsError;

/// Outcome of feeding one inbound EAP packet to the session
///
/// Parse-level failures that the protocol answers on the wire (for example
/// a malformed SIM attribute) come back as [EapResult::Response] carrying
/// the error packet; failures the protocol drops silently come back as
/// `None` from [session::EapSession::process].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EapResult {
    /// A response packet to hand back to the authenticator
    Response(Vec<u8>),
    /// The conversation finished successfully
    Success {
        /// Master Session Key derived by the method, empty when the method
        /// completed without key agreement
        msk: Vec<u8>,
        /// Extended Master Session Key, empty when not derived
        emsk: Vec<u8>,
    },
    /// The conversation finished unsuccessfully
    Failure,
    /// A protocol ordering violation or internal failure; the containing
    /// exchange decides how to surface it
    Error(EapError),
}

/// Failure surfaced to the containing IKE exchange as an error result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EapError {
    /// The request is not legal in the current state of the conversation
    #[error("Request is not valid in the current method state")]
    InvalidRequest,
    /// The SIM or USIM application could not complete the computation
    #[error("SIM authentication failed: {0}")]
    SimAuth(#[from] SimAuthError),
    /// The injected TLS session failed
    #[error("TLS session failed: {0}")]
    Tls(#[from] TlsError),
    /// A failure that is not attributable to the peer
    #[error("Internal failure: {0}")]
    Internal(&'static str),
}
