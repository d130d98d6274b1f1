//! Pseudorandom functions and the prf+ key expansion (RFC 7296,
//! section 2.13)

use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use ikev2_wire::definitions::params::PrfId;

use crate::crypto::integrity::xcbc_mac;
use crate::crypto::CryptoError;

/// Compute a full-length HMAC under the given digest type
macro_rules! hmac_prf {
    ($digest:ty, $key:expr, $data:expr) => {{
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update($data);
        mac.finalize().into_bytes().to_vec()
    }};
}

/// A pseudorandom function instantiated from a negotiated transform ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Prf {
    HmacSha1,
    HmacSha2_256,
    HmacSha2_384,
    HmacSha2_512,
    AesXcbc,
    AesCmac,
}

impl Prf {
    /// Instantiate from the negotiated transform
    pub fn from_transform(id: PrfId) -> Result<Self, CryptoError> {
        Ok(match id {
            PrfId::HmacSha1 => Prf::HmacSha1,
            PrfId::HmacSha2_256 => Prf::HmacSha2_256,
            PrfId::HmacSha2_384 => Prf::HmacSha2_384,
            PrfId::HmacSha2_512 => Prf::HmacSha2_512,
            PrfId::AesXcbc => Prf::AesXcbc,
            PrfId::AesCmac => Prf::AesCmac,
            PrfId::HmacMd5 => return Err(CryptoError::UnsupportedTransform),
        })
    }

    /// Preferred key size, which is also the size of SK_d, SK_pi and SK_pr
    pub fn key_len(&self) -> usize {
        match self {
            Prf::HmacSha1 => 20,
            Prf::HmacSha2_256 => 32,
            Prf::HmacSha2_384 => 48,
            Prf::HmacSha2_512 => 64,
            Prf::AesXcbc | Prf::AesCmac => 16,
        }
    }

    /// Octet length of one PRF output block
    pub fn output_len(&self) -> usize {
        match self {
            Prf::HmacSha1 => 20,
            Prf::HmacSha2_256 => 32,
            Prf::HmacSha2_384 => 48,
            Prf::HmacSha2_512 => 64,
            Prf::AesXcbc | Prf::AesCmac => 16,
        }
    }

    /// One full-length PRF invocation
    pub fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(match self {
            Prf::HmacSha1 => hmac_prf!(Sha1, key, data),
            Prf::HmacSha2_256 => hmac_prf!(Sha256, key, data),
            Prf::HmacSha2_384 => hmac_prf!(Sha384, key, data),
            Prf::HmacSha2_512 => hmac_prf!(Sha512, key, data),
            // RFC 4434: keys of other sizes are converted to 128 bits
            Prf::AesXcbc => xcbc_mac(&fixup_key_xcbc(key)?, data)?.to_vec(),
            // RFC 4615: same fixup, keyed with CMAC
            Prf::AesCmac => {
                let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&fixup_key_cmac(key)?)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    /// The `prf+` expansion: `T_i = PRF(key, T_{i-1} | seed | i)`,
    /// concatenated until `out_len` octets are available. The counter is a
    /// single octet, so at most 255 blocks can be produced.
    pub fn prf_plus(&self, key: &[u8], seed: &[u8], out_len: usize) -> Result<Vec<u8>, CryptoError> {
        if out_len > self.output_len() * 255 {
            return Err(CryptoError::PrfOutputExhausted);
        }
        let mut out = Vec::with_capacity(out_len + self.output_len());
        let mut previous: Vec<u8> = vec![];
        let mut counter = 1u8;
        while out.len() < out_len {
            let mut data = previous.clone();
            data.extend_from_slice(seed);
            data.push(counter);
            previous = self.compute(key, &data)?;
            out.extend_from_slice(&previous);
            counter = counter.checked_add(1).unwrap_or(u8::MAX);
        }
        out.truncate(out_len);
        Ok(out)
    }
}

/// RFC 4434, section 2: shorter keys are zero padded, longer keys are run
/// through the MAC under an all-zero key
fn fixup_key_xcbc(key: &[u8]) -> Result<[u8; 16], CryptoError> {
    let mut fixed = [0u8; 16];
    match key.len() {
        0..=16 => fixed[..key.len()].copy_from_slice(key),
        _ => fixed = xcbc_mac(&[0u8; 16], key)?,
    }
    Ok(fixed)
}

fn fixup_key_cmac(key: &[u8]) -> Result<[u8; 16], CryptoError> {
    let mut fixed = [0u8; 16];
    match key.len() {
        0..=16 => fixed[..key.len()].copy_from_slice(key),
        _ => {
            let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&[0u8; 16])
                .map_err(|_| CryptoError::BadKeyLength)?;
            mac.update(key);
            fixed.copy_from_slice(&mac.finalize().into_bytes());
        }
    }
    Ok(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn prf_plus_is_prefix_stable() {
        let prf = Prf::HmacSha2_256;
        let short = prf.prf_plus(b"key", b"seed", 40).unwrap();
        let long = prf.prf_plus(b"key", b"seed", 132).unwrap();
        assert_eq!(&long[..40], &short[..]);
        assert_eq!(long.len(), 132);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn prf_plus_differs_between_blocks() {
        let prf = Prf::HmacSha1;
        let out = prf.prf_plus(&[0x0b; 20], b"seed", 40).unwrap();
        assert_ne!(out[..20], out[20..40]);
    }

    #[test]
    fn prf_plus_output_is_bounded() {
        let prf = Prf::AesXcbc;
        assert_eq!(
            prf.prf_plus(b"key", b"seed", 16 * 256),
            Err(CryptoError::PrfOutputExhausted)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn xcbc_prf_fixes_up_long_and_short_keys() {
        let prf = Prf::AesXcbc;
        // a short key is zero padded, not rejected
        let short = prf.compute(b"short", b"data").unwrap();
        assert_eq!(short.len(), 16);
        // a long key is compressed through the MAC first
        let long = prf.compute(&[0x61; 40], b"data").unwrap();
        assert_eq!(long.len(), 16);
        assert_ne!(short, long);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn cmac_prf_matches_rfc_4615_vector() {
        // RFC 4615, test case with a 16-octet key
        let key = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        let message = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13,
        ];
        assert_eq!(
            Prf::AesCmac.compute(&key, &message).unwrap(),
            vec![
                0x98, 0x0a, 0xe8, 0x7b, 0x5f, 0x4c, 0x9c, 0x52, 0x14, 0xf5, 0xb6, 0xa8, 0x45,
                0x5e, 0x4c, 0x2d
            ]
        );
    }
}
