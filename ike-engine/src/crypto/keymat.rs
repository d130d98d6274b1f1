//! SKEYSEED and key material slicing (RFC 7296, sections 2.14 and 2.17)

use crate::crypto::{CryptoError, CryptoSuite};

/// The seven keys of an IKE SA, sliced from prf+ in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeKeys {
    /// Key deriving further key material (child SAs, rekeys)
    pub sk_d: Vec<u8>,
    /// Integrity key for messages sent by the initiator
    pub sk_ai: Vec<u8>,
    /// Integrity key for messages sent by the responder
    pub sk_ar: Vec<u8>,
    /// Encryption key for messages sent by the initiator
    pub sk_ei: Vec<u8>,
    /// Encryption key for messages sent by the responder
    pub sk_er: Vec<u8>,
    /// Key for the initiator's AUTH payload computation
    pub sk_pi: Vec<u8>,
    /// Key for the responder's AUTH payload computation
    pub sk_pr: Vec<u8>,
}

/// The four keys of one child SA, sliced from prf+ in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildKeys {
    /// Encryption key for traffic sent by the initiator
    pub sk_ei: Vec<u8>,
    /// Integrity key for traffic sent by the initiator
    pub sk_ai: Vec<u8>,
    /// Encryption key for traffic sent by the responder
    pub sk_er: Vec<u8>,
    /// Integrity key for traffic sent by the responder
    pub sk_ar: Vec<u8>,
}

/// `SKEYSEED = prf(Ni | Nr, g^ir)`, then
/// `prf+(SKEYSEED, Ni | Nr | SPIi | SPIr)` sliced into the seven SA keys
pub fn derive_ike_keys(
    suite: &CryptoSuite,
    nonce_i: &[u8],
    nonce_r: &[u8],
    shared_secret: &[u8],
    spi_i: u64,
    spi_r: u64,
) -> Result<IkeKeys, CryptoError> {
    let mut nonces = nonce_i.to_vec();
    nonces.extend_from_slice(nonce_r);
    let skeyseed = suite.prf.compute(&nonces, shared_secret)?;
    expand_ike_keys(suite, &skeyseed, nonce_i, nonce_r, spi_i, spi_r)
}

/// Key derivation for a rekeyed IKE SA:
/// `SKEYSEED = prf(SK_d_old, g^ir (new) | Ni | Nr)` (RFC 7296, 2.18)
pub fn derive_rekeyed_ike_keys(
    suite: &CryptoSuite,
    sk_d_old: &[u8],
    shared_secret: &[u8],
    nonce_i: &[u8],
    nonce_r: &[u8],
    spi_i: u64,
    spi_r: u64,
) -> Result<IkeKeys, CryptoError> {
    let mut seed = shared_secret.to_vec();
    seed.extend_from_slice(nonce_i);
    seed.extend_from_slice(nonce_r);
    let skeyseed = suite.prf.compute(sk_d_old, &seed)?;
    expand_ike_keys(suite, &skeyseed, nonce_i, nonce_r, spi_i, spi_r)
}

fn expand_ike_keys(
    suite: &CryptoSuite,
    skeyseed: &[u8],
    nonce_i: &[u8],
    nonce_r: &[u8],
    spi_i: u64,
    spi_r: u64,
) -> Result<IkeKeys, CryptoError> {
    let prf_len = suite.prf.key_len();
    let integ_len = suite.integrity.map(|i| i.key_len()).unwrap_or(0);
    let encr_len = suite.cipher.keymat_len();
    let total = prf_len + 2 * integ_len + 2 * encr_len + 2 * prf_len;

    let mut seed = nonce_i.to_vec();
    seed.extend_from_slice(nonce_r);
    seed.extend_from_slice(&spi_i.to_be_bytes());
    seed.extend_from_slice(&spi_r.to_be_bytes());
    let stream = suite.prf.prf_plus(skeyseed, &seed, total)?;

    let mut slices = Slicer::new(&stream);
    Ok(IkeKeys {
        sk_d: slices.take(prf_len),
        sk_ai: slices.take(integ_len),
        sk_ar: slices.take(integ_len),
        sk_ei: slices.take(encr_len),
        sk_er: slices.take(encr_len),
        sk_pi: slices.take(prf_len),
        sk_pr: slices.take(prf_len),
    })
}

/// `KEYMAT = prf+(SK_d, Ni | Nr)` sliced into the four child SA keys,
/// initiator-to-responder keys first and encryption before integrity
pub fn derive_child_keys(
    ike_suite: &CryptoSuite,
    child_suite: &CryptoSuite,
    sk_d: &[u8],
    nonce_i: &[u8],
    nonce_r: &[u8],
) -> Result<ChildKeys, CryptoError> {
    let integ_len = child_suite.integrity.map(|i| i.key_len()).unwrap_or(0);
    let encr_len = child_suite.cipher.keymat_len();

    let mut seed = nonce_i.to_vec();
    seed.extend_from_slice(nonce_r);
    let stream = ike_suite
        .prf
        .prf_plus(sk_d, &seed, 2 * (integ_len + encr_len))?;

    let mut slices = Slicer::new(&stream);
    Ok(ChildKeys {
        sk_ei: slices.take(encr_len),
        sk_ai: slices.take(integ_len),
        sk_er: slices.take(encr_len),
        sk_ar: slices.take(integ_len),
    })
}

struct Slicer<'a> {
    stream: &'a [u8],
    offset: usize,
}

impl<'a> Slicer<'a> {
    fn new(stream: &'a [u8]) -> Self {
        Self { stream, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Vec<u8> {
        let out = self.stream[self.offset..self.offset + len].to_vec();
        self.offset += len;
        out
    }
}

#[cfg(test)]
mod tests {
    use ikev2_wire::definitions::params::{EncryptionId, IntegrityId, PrfId};

    use super::*;
    use crate::crypto::{Cipher, Integrity, Prf};

    #[allow(clippy::unwrap_used)]
    fn suite() -> CryptoSuite {
        CryptoSuite {
            cipher: Cipher::from_transform(EncryptionId::AesCbc, Some(128)).unwrap(),
            integrity: Integrity::from_transform(IntegrityId::HmacSha1_96).unwrap(),
            prf: Prf::from_transform(PrfId::HmacSha1).unwrap(),
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn ike_keys_have_negotiated_sizes() {
        let keys = derive_ike_keys(&suite(), &[0x11; 32], &[0x22; 32], &[0x33; 128], 1, 2)
            .unwrap();
        assert_eq!(keys.sk_d.len(), 20);
        assert_eq!(keys.sk_ai.len(), 20);
        assert_eq!(keys.sk_ar.len(), 20);
        assert_eq!(keys.sk_ei.len(), 16);
        assert_eq!(keys.sk_er.len(), 16);
        assert_eq!(keys.sk_pi.len(), 20);
        assert_eq!(keys.sk_pr.len(), 20);
        // every key is a distinct slice of the stream
        assert_ne!(keys.sk_ai, keys.sk_ar);
        assert_ne!(keys.sk_ei, keys.sk_er);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn spi_change_changes_the_keys() {
        let a = derive_ike_keys(&suite(), &[0x11; 32], &[0x22; 32], &[0x33; 128], 1, 2).unwrap();
        let b = derive_ike_keys(&suite(), &[0x11; 32], &[0x22; 32], &[0x33; 128], 1, 3).unwrap();
        assert_ne!(a.sk_d, b.sk_d);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn child_keys_have_negotiated_sizes() {
        let keys =
            derive_child_keys(&suite(), &suite(), &[0x44; 20], &[0x11; 32], &[0x22; 32]).unwrap();
        assert_eq!(keys.sk_ei.len(), 16);
        assert_eq!(keys.sk_ai.len(), 20);
        assert_eq!(keys.sk_er.len(), 16);
        assert_eq!(keys.sk_ar.len(), 20);
    }
}
