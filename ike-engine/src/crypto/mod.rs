//! Runtime-selectable cryptographic transforms, all driven by the
//! transform IDs of the negotiated proposal

pub mod cipher;
pub mod dh;
pub mod integrity;
pub mod keymat;
pub mod prf;

use std::sync::Arc;

use thiserror::Error;

use ikev2_wire::definitions::params::Protocol;
use ikev2_wire::definitions::{Proposal, Transform};

pub use cipher::Cipher;
pub use dh::{DhGroup, DhKeyPair};
pub use integrity::Integrity;
pub use prf::Prf;

/// Failure inside a cryptographic transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum CryptoError {
    #[error("Negotiated proposal is missing a mandatory transform")]
    IncompleteProposal,
    #[error("Transform is not supported by this engine")]
    UnsupportedTransform,
    #[error("Key material has the wrong length")]
    BadKeyLength,
    #[error("Value is not a valid group element")]
    InvalidPublicValue,
    #[error("Message does not align with the cipher block size")]
    BadBlockAlignment,
    #[error("Integrity check failed")]
    IntegrityFailure,
    #[error("prf+ cannot produce the requested amount of key material")]
    PrfOutputExhausted,
}

/// The symmetric transforms negotiated for one IKE or Child SA
#[derive(Debug, Clone)]
pub struct CryptoSuite {
    /// The encryption transform
    pub cipher: Cipher,
    /// The integrity transform; absent for combined-mode ciphers
    pub integrity: Option<Integrity>,
    /// The pseudorandom function
    pub prf: Prf,
}

impl CryptoSuite {
    /// Assemble a suite from a negotiated proposal, taking the first
    /// supported transform of each type
    pub fn from_proposal(proposal: &Proposal) -> Result<Self, CryptoError> {
        let mut cipher = None;
        let mut integrity = None;
        let mut prf = None;
        for transform in &proposal.transforms {
            match transform {
                Transform::Encryption(id, key_len) if cipher.is_none() => {
                    cipher = Some(Cipher::from_transform(*id, *key_len)?);
                }
                Transform::Integrity(id) if integrity.is_none() => {
                    integrity = Integrity::from_transform(*id)?;
                }
                Transform::PseudoRandomFunction(id) if prf.is_none() => {
                    prf = Some(Prf::from_transform(*id)?);
                }
                _ => {}
            }
        }

        let cipher = cipher.ok_or(CryptoError::IncompleteProposal)?;
        // ESP and AH proposals carry no PRF transform; child key material
        // is expanded with the IKE SA's PRF, so the field is inert there
        let prf = match prf {
            Some(prf) => prf,
            None if proposal.protocol != Protocol::InternetKeyExchange => Prf::HmacSha2_256,
            None => return Err(CryptoError::IncompleteProposal),
        };
        if !cipher.is_aead() && integrity.is_none() {
            return Err(CryptoError::IncompleteProposal);
        }
        Ok(Self {
            cipher,
            integrity: if cipher.is_aead() { None } else { integrity },
            prf,
        })
    }

    /// Length of the integrity checksum appended to SK payloads
    pub fn checksum_len(&self) -> usize {
        match &self.integrity {
            Some(integrity) => integrity.checksum_len(),
            None => self.cipher.tag_len(),
        }
    }
}

/// Builds the crypto suite for a negotiated proposal; injected at session
/// construction so no global provider state exists
pub type CryptoSuiteFactory =
    Arc<dyn Fn(&Proposal) -> Result<CryptoSuite, CryptoError> + Send + Sync>;

/// The factory backed by [CryptoSuite::from_proposal]
pub fn default_suite_factory() -> CryptoSuiteFactory {
    Arc::new(CryptoSuite::from_proposal)
}
