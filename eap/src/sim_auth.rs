//! The UICC abstraction running the GSM and UMTS authentication algorithms
//!
//! Telephony access is outside this engine; the embedder injects an
//! implementation that talks to the SIM or USIM application of the
//! subscriber identified by the method configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The UICC application the challenge is directed at
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum AppType {
    Sim,
    Usim,
    Isim,
}

/// A GSM authentication triplet minus the RAND that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsmTriplet {
    /// The signed response
    pub sres: [u8; 4],
    /// The 64-bit GSM session key
    pub kc: [u8; 8],
}

/// Outcome of a UMTS (AKA) challenge on the USIM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UmtsResult {
    /// The USIM accepted the challenge
    Success {
        /// The authentication result
        res: Vec<u8>,
        /// The cipher key
        ck: Vec<u8>,
        /// The integrity key
        ik: Vec<u8>,
    },
    /// The sequence number was out of range; the engine answers with the
    /// resynchronization token
    SynchronizationFailure {
        /// The AUTS token computed by the USIM
        auts: [u8; 14],
    },
    /// The network authentication token failed verification on the USIM
    AuthenticationReject,
}

/// Failure talking to the UICC, not attributable to the network
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum SimAuthError {
    #[error("No UICC application of the requested type for subscription {0}")]
    NoSuchApplication(i32),
    #[error("UICC transport failure: {0}")]
    Transport(String),
}

/// Access to the authentication algorithms on the UICC
///
/// Calls are made from the session worker and should complete promptly;
/// long-running transports belong behind a channel inside the
/// implementation.
pub trait SimAuthenticator: Send + Sync {
    /// Run the GSM algorithm (2G) on a single RAND
    fn gsm_auth(
        &self,
        sub_id: i32,
        app_type: AppType,
        rand: &[u8; 16],
    ) -> Result<GsmTriplet, SimAuthError>;

    /// Run the UMTS AKA algorithm (3G and later) on a RAND/AUTN pair
    fn umts_auth(
        &self,
        sub_id: i32,
        app_type: AppType,
        rand: &[u8; 16],
        autn: &[u8; 16],
    ) -> Result<UmtsResult, SimAuthError>;
}
