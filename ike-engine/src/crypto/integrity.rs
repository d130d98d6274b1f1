//! Integrity transforms protecting SK payloads of non-combined ciphers
//!
//! Every algorithm truncates its output to the checksum length IKEv2
//! assigns to it: 96 bits for HMAC-SHA1, AES-XCBC and AES-CMAC, half the
//! digest for the HMAC-SHA2 family.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use ikev2_wire::definitions::params::IntegrityId;

use crate::crypto::CryptoError;

/// Compute a full-length HMAC under the given digest type
macro_rules! hmac_full {
    ($digest:ty, $key:expr, $data:expr) => {{
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update($data);
        mac.finalize().into_bytes().to_vec()
    }};
}

/// An integrity transform instantiated from a negotiated transform ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Integrity {
    HmacSha1_96,
    HmacSha2_256_128,
    HmacSha2_384_192,
    HmacSha2_512_256,
    AesXcbc96,
    AesCmac96,
}

impl Integrity {
    /// Instantiate from the negotiated transform; `Ok(None)` when the
    /// proposal negotiated the NONE transform of a combined-mode suite
    pub fn from_transform(id: IntegrityId) -> Result<Option<Self>, CryptoError> {
        Ok(Some(match id {
            IntegrityId::None => return Ok(None),
            IntegrityId::HmacSha1_96 => Integrity::HmacSha1_96,
            IntegrityId::HmacSha2_256_128 => Integrity::HmacSha2_256_128,
            IntegrityId::HmacSha2_384_192 => Integrity::HmacSha2_384_192,
            IntegrityId::HmacSha2_512_256 => Integrity::HmacSha2_512_256,
            IntegrityId::AesXcbc96 => Integrity::AesXcbc96,
            IntegrityId::AesCmac96 => Integrity::AesCmac96,
            _ => return Err(CryptoError::UnsupportedTransform),
        }))
    }

    /// Octet length of the key taken from prf+
    pub fn key_len(&self) -> usize {
        match self {
            Integrity::HmacSha1_96 => 20,
            Integrity::HmacSha2_256_128 => 32,
            Integrity::HmacSha2_384_192 => 48,
            Integrity::HmacSha2_512_256 => 64,
            Integrity::AesXcbc96 | Integrity::AesCmac96 => 16,
        }
    }

    /// Octet length of the truncated checksum on the wire
    pub fn checksum_len(&self) -> usize {
        match self {
            Integrity::HmacSha1_96 | Integrity::AesXcbc96 | Integrity::AesCmac96 => 12,
            Integrity::HmacSha2_256_128 => 16,
            Integrity::HmacSha2_384_192 => 24,
            Integrity::HmacSha2_512_256 => 32,
        }
    }

    /// Compute the truncated checksum over the given data
    pub fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if key.len() != self.key_len() {
            return Err(CryptoError::BadKeyLength);
        }
        let full = match self {
            Integrity::HmacSha1_96 => hmac_full!(Sha1, key, data),
            Integrity::HmacSha2_256_128 => hmac_full!(Sha256, key, data),
            Integrity::HmacSha2_384_192 => hmac_full!(Sha384, key, data),
            Integrity::HmacSha2_512_256 => hmac_full!(Sha512, key, data),
            Integrity::AesXcbc96 => xcbc_mac(key, data)?.to_vec(),
            Integrity::AesCmac96 => {
                let mut mac =
                    <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| CryptoError::BadKeyLength)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(full[..self.checksum_len()].to_vec())
    }

    /// Verify a received checksum in constant time
    pub fn verify(&self, key: &[u8], data: &[u8], checksum: &[u8]) -> Result<(), CryptoError> {
        let expected = self.compute(key, data)?;
        if bool::from(expected.ct_eq(checksum)) {
            Ok(())
        } else {
            Err(CryptoError::IntegrityFailure)
        }
    }
}

/// AES-XCBC-MAC (RFC 3566) over a 16-octet key
pub(crate) fn xcbc_mac(key: &[u8], data: &[u8]) -> Result<[u8; 16], CryptoError> {
    if key.len() != 16 {
        return Err(CryptoError::BadKeyLength);
    }
    let cipher = Aes128::new_from_slice(key).map_err(|_| CryptoError::BadKeyLength)?;
    let encrypt = |block: &[u8; 16]| -> [u8; 16] {
        let mut out = (*block).into();
        cipher.encrypt_block(&mut out);
        out.into()
    };

    let k1 = encrypt(&[0x01; 16]);
    let k2 = encrypt(&[0x02; 16]);
    let k3 = encrypt(&[0x03; 16]);
    let cipher_k1 = Aes128::new_from_slice(&k1).map_err(|_| CryptoError::BadKeyLength)?;
    let encrypt_k1 = |block: &[u8; 16]| -> [u8; 16] {
        let mut out = (*block).into();
        cipher_k1.encrypt_block(&mut out);
        out.into()
    };

    let mut state = [0u8; 16];
    let blocks: Vec<&[u8]> = data.chunks(16).collect();
    let (last, full) = match blocks.split_last() {
        Some((last, full)) => (*last, full),
        // the empty message is treated as a single incomplete block
        None => (&[][..], &[][..]),
    };

    for block in full {
        let mut xored = [0u8; 16];
        for (i, byte) in block.iter().enumerate() {
            xored[i] = state[i] ^ byte;
        }
        state = encrypt_k1(&xored);
    }

    let mut final_block = [0u8; 16];
    let final_key = if last.len() == 16 {
        final_block.copy_from_slice(last);
        k2
    } else {
        final_block[..last.len()].copy_from_slice(last);
        final_block[last.len()] = 0x80;
        k3
    };
    for i in 0..16 {
        final_block[i] ^= state[i] ^ final_key[i];
    }
    Ok(encrypt_k1(&final_block))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn xcbc_matches_rfc_3566_vectors() {
        let key: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        // test case 1: empty message
        assert_eq!(
            xcbc_mac(&key, &[]).unwrap()[..12],
            [0x75, 0xf0, 0x25, 0x1d, 0x52, 0x8a, 0xc0, 0x1c, 0x45, 0x73, 0xdf, 0xd5]
        );
        // test case 2: 3 octets
        assert_eq!(
            xcbc_mac(&key, &[0x00, 0x01, 0x02]).unwrap()[..12],
            [0x5b, 0x37, 0x65, 0x80, 0xae, 0x2f, 0x19, 0xaf, 0xe7, 0x21, 0x9c, 0xee]
        );
        // test case 3: exactly one block
        let msg: Vec<u8> = (0..16).collect();
        assert_eq!(
            xcbc_mac(&key, &msg).unwrap()[..12],
            [0xd2, 0xa2, 0x46, 0xfa, 0x34, 0x9b, 0x68, 0xa7, 0x99, 0x98, 0xa4, 0x39]
        );
        // test case 5: two blocks and a remainder
        let msg: Vec<u8> = (0..34).collect();
        assert_eq!(
            xcbc_mac(&key, &msg).unwrap()[..12],
            [0xbe, 0xcb, 0xb3, 0xbc, 0xcd, 0xb5, 0x18, 0xa3, 0x06, 0x77, 0xd5, 0x48]
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn hmac_sha1_96_truncates() {
        let integrity = Integrity::HmacSha1_96;
        let checksum = integrity.compute(&[0xaa; 20], b"data").unwrap();
        assert_eq!(checksum.len(), 12);
        integrity.verify(&[0xaa; 20], b"data", &checksum).unwrap();
        assert_eq!(
            integrity.verify(&[0xaa; 20], b"datb", &checksum),
            Err(CryptoError::IntegrityFailure)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn sha2_family_checksum_lengths() {
        for (integrity, len) in [
            (Integrity::HmacSha2_256_128, 16),
            (Integrity::HmacSha2_384_192, 24),
            (Integrity::HmacSha2_512_256, 32),
        ] {
            let key = vec![0x5c; integrity.key_len()];
            assert_eq!(integrity.compute(&key, b"x").unwrap().len(), len);
        }
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        assert_eq!(
            Integrity::HmacSha1_96.compute(&[0; 16], b"x"),
            Err(CryptoError::BadKeyLength)
        );
    }
}
