//! Encryption transforms of the SK payload
//!
//! AES-CBC and AES-CTR require an external integrity MAC; AES-GCM is a
//! combined mode authenticating the associated data itself. The CTR and
//! GCM transforms take a 4-octet salt from the tail of their key material
//! and build their counter block or nonce from salt and explicit IV
//! (RFC 5930 and RFC 5282).

use aes::cipher::block_padding::NoPadding;
use aes::cipher::consts::{U12, U16, U8};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::AesGcm;

use ikev2_wire::definitions::params::EncryptionId;

use crate::crypto::CryptoError;

/// Octet length of the explicit IV of the counter and combined modes
const CTR_IV_LEN: usize = 8;
/// Octet length of the salt sliced off the key material tail
const SALT_LEN: usize = 4;

/// Instantiate the right AES-GCM flavour for a key and tag length and run
/// the supplied closure on it
macro_rules! gcm_dispatch {
    ($key:expr, $tag_len:expr, |$cipher:ident| $body:expr) => {{
        match ($key.len(), $tag_len) {
            (16, 8) => {
                let $cipher = AesGcm::<Aes128, U12, U8>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (16, 12) => {
                let $cipher = AesGcm::<Aes128, U12, U12>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (16, 16) => {
                let $cipher = AesGcm::<Aes128, U12, U16>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (24, 8) => {
                let $cipher = AesGcm::<Aes192, U12, U8>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (24, 12) => {
                let $cipher = AesGcm::<Aes192, U12, U12>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (24, 16) => {
                let $cipher = AesGcm::<Aes192, U12, U16>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (32, 8) => {
                let $cipher = AesGcm::<Aes256, U12, U8>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (32, 12) => {
                let $cipher = AesGcm::<Aes256, U12, U12>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            (32, 16) => {
                let $cipher = AesGcm::<Aes256, U12, U16>::new_from_slice($key)
                    .map_err(|_| CryptoError::BadKeyLength)?;
                $body
            }
            _ => Err(CryptoError::BadKeyLength),
        }
    }};
}

/// An encryption transform instantiated from a negotiated transform ID
/// and key length attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    /// AES in CBC mode (RFC 3602); 16-octet IV, block aligned
    AesCbc {
        /// Key length in octets: 16, 24 or 32
        key_len: usize,
    },
    /// AES in counter mode (RFC 3686, profiled by RFC 5930)
    AesCtr {
        /// Key length in octets: 16, 24 or 32
        key_len: usize,
    },
    /// AES-GCM with an 8, 12 or 16 octet tag (RFC 5282)
    AesGcm {
        /// Key length in octets: 16, 24 or 32
        key_len: usize,
        /// Tag length in octets: 8, 12 or 16
        tag_len: usize,
    },
}

impl Cipher {
    /// Instantiate from the negotiated transform, validating the key
    /// length attribute
    pub fn from_transform(id: EncryptionId, key_bits: Option<u16>) -> Result<Self, CryptoError> {
        let key_len = match key_bits {
            Some(128) => 16,
            Some(192) => 24,
            Some(256) => 32,
            None => 16,
            Some(_) => return Err(CryptoError::BadKeyLength),
        };
        Ok(match id {
            EncryptionId::AesCbc => Cipher::AesCbc { key_len },
            EncryptionId::AesCtr => Cipher::AesCtr { key_len },
            EncryptionId::AesGcm8 => Cipher::AesGcm { key_len, tag_len: 8 },
            EncryptionId::AesGcm12 => Cipher::AesGcm {
                key_len,
                tag_len: 12,
            },
            EncryptionId::AesGcm16 => Cipher::AesGcm {
                key_len,
                tag_len: 16,
            },
            _ => return Err(CryptoError::UnsupportedTransform),
        })
    }

    /// Whether the transform authenticates its own data
    pub fn is_aead(&self) -> bool {
        matches!(self, Cipher::AesGcm { .. })
    }

    /// Octet length of the key material taken from prf+, including the
    /// salt of the counter and combined modes
    pub fn keymat_len(&self) -> usize {
        match self {
            Cipher::AesCbc { key_len } => *key_len,
            Cipher::AesCtr { key_len } | Cipher::AesGcm { key_len, .. } => key_len + SALT_LEN,
        }
    }

    /// Octet length of the explicit IV written into the SK payload
    pub fn iv_len(&self) -> usize {
        match self {
            Cipher::AesCbc { .. } => 16,
            Cipher::AesCtr { .. } | Cipher::AesGcm { .. } => CTR_IV_LEN,
        }
    }

    /// Alignment the padded plaintext must satisfy
    pub fn block_align(&self) -> usize {
        match self {
            Cipher::AesCbc { .. } => 16,
            _ => 1,
        }
    }

    /// Octet length of the authentication tag, zero for non-combined modes
    pub fn tag_len(&self) -> usize {
        match self {
            Cipher::AesGcm { tag_len, .. } => *tag_len,
            _ => 0,
        }
    }

    /// Encrypt with a non-combined mode; the plaintext must already be
    /// padded to the block alignment
    pub fn encrypt(
        &self,
        keymat: &[u8],
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if keymat.len() != self.keymat_len() || iv.len() != self.iv_len() {
            return Err(CryptoError::BadKeyLength);
        }
        match self {
            Cipher::AesCbc { key_len } => {
                if plaintext.len() % 16 != 0 {
                    return Err(CryptoError::BadBlockAlignment);
                }
                Ok(match key_len {
                    16 => cbc::Encryptor::<Aes128>::new_from_slices(keymat, iv)
                        .map_err(|_| CryptoError::BadKeyLength)?
                        .encrypt_padded_vec_mut::<NoPadding>(plaintext),
                    24 => cbc::Encryptor::<Aes192>::new_from_slices(keymat, iv)
                        .map_err(|_| CryptoError::BadKeyLength)?
                        .encrypt_padded_vec_mut::<NoPadding>(plaintext),
                    _ => cbc::Encryptor::<Aes256>::new_from_slices(keymat, iv)
                        .map_err(|_| CryptoError::BadKeyLength)?
                        .encrypt_padded_vec_mut::<NoPadding>(plaintext),
                })
            }
            Cipher::AesCtr { .. } => {
                let mut buf = plaintext.to_vec();
                self.apply_ctr(keymat, iv, &mut buf)?;
                Ok(buf)
            }
            Cipher::AesGcm { .. } => Err(CryptoError::UnsupportedTransform),
        }
    }

    /// Decrypt with a non-combined mode
    pub fn decrypt(
        &self,
        keymat: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if keymat.len() != self.keymat_len() || iv.len() != self.iv_len() {
            return Err(CryptoError::BadKeyLength);
        }
        match self {
            Cipher::AesCbc { key_len } => {
                if ciphertext.len() % 16 != 0 || ciphertext.is_empty() {
                    return Err(CryptoError::BadBlockAlignment);
                }
                let mut buf = ciphertext.to_vec();
                let out = match key_len {
                    16 => cbc::Decryptor::<Aes128>::new_from_slices(keymat, iv)
                        .map_err(|_| CryptoError::BadKeyLength)?
                        .decrypt_padded_mut::<NoPadding>(&mut buf),
                    24 => cbc::Decryptor::<Aes192>::new_from_slices(keymat, iv)
                        .map_err(|_| CryptoError::BadKeyLength)?
                        .decrypt_padded_mut::<NoPadding>(&mut buf),
                    _ => cbc::Decryptor::<Aes256>::new_from_slices(keymat, iv)
                        .map_err(|_| CryptoError::BadKeyLength)?
                        .decrypt_padded_mut::<NoPadding>(&mut buf),
                };
                out.map(<[u8]>::to_vec)
                    .map_err(|_| CryptoError::BadBlockAlignment)
            }
            Cipher::AesCtr { .. } => {
                let mut buf = ciphertext.to_vec();
                self.apply_ctr(keymat, iv, &mut buf)?;
                Ok(buf)
            }
            Cipher::AesGcm { .. } => Err(CryptoError::UnsupportedTransform),
        }
    }

    /// The counter block is salt | IV | 0x00000001 per RFC 3686
    fn apply_ctr(&self, keymat: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CryptoError> {
        let (key, salt) = keymat.split_at(keymat.len() - SALT_LEN);
        let mut counter_block = [0u8; 16];
        counter_block[..SALT_LEN].copy_from_slice(salt);
        counter_block[SALT_LEN..SALT_LEN + CTR_IV_LEN].copy_from_slice(iv);
        counter_block[15] = 1;

        match key.len() {
            16 => ctr::Ctr32BE::<Aes128>::new_from_slices(key, &counter_block)
                .map_err(|_| CryptoError::BadKeyLength)?
                .apply_keystream(buf),
            24 => ctr::Ctr32BE::<Aes192>::new_from_slices(key, &counter_block)
                .map_err(|_| CryptoError::BadKeyLength)?
                .apply_keystream(buf),
            32 => ctr::Ctr32BE::<Aes256>::new_from_slices(key, &counter_block)
                .map_err(|_| CryptoError::BadKeyLength)?
                .apply_keystream(buf),
            _ => return Err(CryptoError::BadKeyLength),
        }
        Ok(())
    }

    /// Seal with the combined mode: the nonce is salt | IV (RFC 5282) and
    /// the ciphertext comes back with the tag appended
    pub fn seal(
        &self,
        keymat: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let Cipher::AesGcm { tag_len, .. } = self else {
            return Err(CryptoError::UnsupportedTransform);
        };
        if keymat.len() != self.keymat_len() || iv.len() != CTR_IV_LEN {
            return Err(CryptoError::BadKeyLength);
        }
        let (key, salt) = keymat.split_at(keymat.len() - SALT_LEN);
        let mut nonce = [0u8; 12];
        nonce[..SALT_LEN].copy_from_slice(salt);
        nonce[SALT_LEN..].copy_from_slice(iv);
        let payload = Payload {
            msg: plaintext,
            aad,
        };

        gcm_dispatch!(key, *tag_len, |cipher| {
            cipher
                .encrypt((&nonce).into(), payload)
                .map_err(|_| CryptoError::IntegrityFailure)
        })
    }

    /// Open the combined mode; failure means the packet must be discarded
    /// silently
    pub fn open(
        &self,
        keymat: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let Cipher::AesGcm { tag_len, .. } = self else {
            return Err(CryptoError::UnsupportedTransform);
        };
        if keymat.len() != self.keymat_len() || iv.len() != CTR_IV_LEN {
            return Err(CryptoError::BadKeyLength);
        }
        let (key, salt) = keymat.split_at(keymat.len() - SALT_LEN);
        let mut nonce = [0u8; 12];
        nonce[..SALT_LEN].copy_from_slice(salt);
        nonce[SALT_LEN..].copy_from_slice(iv);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };

        gcm_dispatch!(key, *tag_len, |cipher| {
            cipher
                .decrypt((&nonce).into(), payload)
                .map_err(|_| CryptoError::IntegrityFailure)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn cbc_round_trip() {
        let cipher = Cipher::from_transform(EncryptionId::AesCbc, Some(128)).unwrap();
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let plaintext = [0x55u8; 32];
        let ciphertext = cipher.encrypt(&key, &iv, &plaintext).unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);
        assert_eq!(cipher.decrypt(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn cbc_rejects_unaligned_input() {
        let cipher = Cipher::from_transform(EncryptionId::AesCbc, Some(256)).unwrap();
        assert_eq!(
            cipher.encrypt(&[0; 32], &[0; 16], &[0; 15]),
            Err(CryptoError::BadBlockAlignment)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn ctr_round_trip_with_salt() {
        let cipher = Cipher::from_transform(EncryptionId::AesCtr, Some(128)).unwrap();
        assert_eq!(cipher.keymat_len(), 20);
        let keymat = [0x11u8; 20];
        let iv = [0x99u8; 8];
        let plaintext = b"no alignment requirement here";
        let ciphertext = cipher.encrypt(&keymat, &iv, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_eq!(
            cipher.decrypt(&keymat, &iv, &ciphertext).unwrap(),
            plaintext
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn gcm_round_trip_and_tamper_detection() {
        for (id, tag_len) in [
            (EncryptionId::AesGcm8, 8),
            (EncryptionId::AesGcm12, 12),
            (EncryptionId::AesGcm16, 16),
        ] {
            let cipher = Cipher::from_transform(id, Some(256)).unwrap();
            assert_eq!(cipher.tag_len(), tag_len);
            let keymat = [0x77u8; 36];
            let iv = [0x10u8; 8];
            let sealed = cipher.seal(&keymat, &iv, b"aad", b"secret").unwrap();
            assert_eq!(sealed.len(), 6 + tag_len);
            assert_eq!(
                cipher.open(&keymat, &iv, b"aad", &sealed).unwrap(),
                b"secret"
            );
            // a flipped associated data bit must fail the open
            assert_eq!(
                cipher.open(&keymat, &iv, b"axd", &sealed),
                Err(CryptoError::IntegrityFailure)
            );
        }
    }

    #[test]
    fn unsupported_transform_is_rejected() {
        assert_eq!(
            Cipher::from_transform(EncryptionId::TripleDes, None),
            Err(CryptoError::UnsupportedTransform)
        );
        assert_eq!(
            Cipher::from_transform(EncryptionId::AesCbc, Some(100)),
            Err(CryptoError::BadKeyLength)
        );
    }
}
