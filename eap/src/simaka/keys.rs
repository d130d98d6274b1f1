//! Key derivation functions of the SIM/AKA method family
//!
//! EAP-SIM and EAP-AKA expand their master key with the FIPS 186-2
//! pseudorandom number generator (RFC 4186 appendix B, RFC 4187
//! appendix A); EAP-AKA' replaces it with an HMAC-SHA-256 construction
//! and rekeys CK/IK with the access network name (RFC 5448).

use hmac::{Hmac, Mac};
use sha1::compress;
use sha1::digest::generic_array::GenericArray;
use sha2::Sha256;

/// Initial SHA-1 chaining state, the `t` constant of the FIPS 186-2 G function
const SHA1_INITIAL_STATE: [u32; 5] = [
    0x67452301, 0xEFCDAB89, 0x98BADCFE, 0x10325476, 0xC3D2E1F0,
];

/// The G function of FIPS 186-2: one SHA-1 compression over the 160-bit
/// input zero-padded to a single 512-bit block, without length padding
fn g(xval: &[u8; 20]) -> [u8; 20] {
    let mut state = SHA1_INITIAL_STATE;
    let mut block = [0u8; 64];
    block[..20].copy_from_slice(xval);
    compress(&mut state, &[GenericArray::clone_from_slice(&block)]);

    let mut out = [0u8; 20];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// XKEY = (1 + XKEY + w) mod 2^160, big-endian byte arithmetic
fn advance_xkey(xkey: &mut [u8; 20], w: &[u8; 20]) {
    let mut carry = 1u16;
    for (x, add) in xkey.iter_mut().rev().zip(w.iter().rev()) {
        let sum = *x as u16 + *add as u16 + carry;
        *x = sum as u8;
        carry = sum >> 8;
    }
}

/// The FIPS 186-2 pseudorandom number generator (change notice 1, without
/// the mod q reduction), seeded with the 160-bit master key and producing
/// `out_len` octets of keying material
pub fn fips186_2_prf(mk: &[u8; 20], out_len: usize) -> Vec<u8> {
    let mut xkey = *mk;
    let mut out = Vec::with_capacity(out_len + 40);
    while out.len() < out_len {
        // one round produces x_j = w_0 | w_1
        for _ in 0..2 {
            let w = g(&xkey);
            out.extend_from_slice(&w);
            advance_xkey(&mut xkey, &w);
        }
    }
    out.truncate(out_len);
    out
}

/// PRF' of EAP-AKA' (RFC 5448, section 3.4):
/// `T1 = HMAC-SHA-256(K, S | 0x01)`, `Tn = HMAC-SHA-256(K, Tn-1 | S | n)`
pub fn prf_prime(key: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len + 32);
    let mut previous: Vec<u8> = vec![];
    let mut counter = 1u8;
    while out.len() < out_len {
        let mut hmac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        hmac.update(&previous);
        hmac.update(seed);
        hmac.update(&[counter]);
        previous = hmac.finalize().into_bytes().to_vec();
        out.extend_from_slice(&previous);
        counter += 1;
    }
    out.truncate(out_len);
    out
}

/// Derive CK' and IK' from CK, IK, the access network name and the
/// SQN xor AK value carried in the first 6 octets of AUTN
/// (RFC 5448 section 3.3, 3GPP TS 33.402 annex A.2)
pub fn derive_ck_ik_prime(
    ck: &[u8],
    ik: &[u8],
    network_name: &[u8],
    sqn_xor_ak: &[u8; 6],
) -> (Vec<u8>, Vec<u8>) {
    let mut key = ck.to_vec();
    key.extend_from_slice(ik);

    let mut hmac = <Hmac<Sha256> as Mac>::new_from_slice(&key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    hmac.update(&[0x20]); // FC for CK'/IK' derivation
    hmac.update(network_name);
    hmac.update(&(network_name.len() as u16).to_be_bytes());
    hmac.update(sqn_xor_ak);
    hmac.update(&6u16.to_be_bytes());
    let out = hmac.finalize().into_bytes();

    (out[..16].to_vec(), out[16..].to_vec())
}

/// Session keys of a full EAP-AKA' authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkaPrimeKeys {
    /// Key protecting encrypted attributes, 16 octets
    pub k_encr: Vec<u8>,
    /// Key authenticating packets via AT_MAC, 32 octets
    pub k_aut: Vec<u8>,
    /// Re-authentication key, 32 octets
    pub k_re: Vec<u8>,
    /// Master Session Key, 64 octets
    pub msk: Vec<u8>,
    /// Extended Master Session Key, 64 octets
    pub emsk: Vec<u8>,
}

/// Derive the EAP-AKA' session keys (RFC 5448, section 3.3):
/// `MK = PRF'(IK'|CK', "EAP-AKA'"|Identity)` sliced into K_encr (16),
/// K_aut (32), K_re (32), MSK (64) and EMSK (64)
pub fn derive_aka_prime_keys(ck_prime: &[u8], ik_prime: &[u8], identity: &[u8]) -> AkaPrimeKeys {
    let mut key = ik_prime.to_vec();
    key.extend_from_slice(ck_prime);
    let mut seed = b"EAP-AKA'".to_vec();
    seed.extend_from_slice(identity);

    let mk = prf_prime(&key, &seed, 208);
    AkaPrimeKeys {
        k_encr: mk[0..16].to_vec(),
        k_aut: mk[16..48].to_vec(),
        k_re: mk[48..80].to_vec(),
        msk: mk[80..144].to_vec(),
        emsk: mk[144..208].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fips_prf_is_deterministic_and_sized() {
        let a = fips186_2_prf(&[0x17; 20], 160);
        let b = fips186_2_prf(&[0x17; 20], 160);
        assert_eq!(a, b);
        assert_eq!(a.len(), 160);
        assert_ne!(a[..20], a[20..40], "consecutive blocks must differ");
    }

    #[test]
    fn prf_prime_chains_blocks() {
        let out = prf_prime(b"key", b"seed", 64);
        assert_eq!(out.len(), 64);
        assert_ne!(out[..32], out[32..]);
        // a longer request extends, not changes, the shorter one
        let longer = prf_prime(b"key", b"seed", 96);
        assert_eq!(&longer[..64], &out[..]);
    }

    #[test]
    fn aka_prime_key_sizes() {
        let (ck_prime, ik_prime) =
            derive_ck_ik_prime(&[1; 16], &[2; 16], b"wlan.mnc015.mcc234", &[0; 6]);
        assert_eq!(ck_prime.len(), 16);
        assert_eq!(ik_prime.len(), 16);
        let keys = derive_aka_prime_keys(&ck_prime, &ik_prime, b"0user@realm");
        assert_eq!(keys.k_encr.len(), 16);
        assert_eq!(keys.k_aut.len(), 32);
        assert_eq!(keys.k_re.len(), 32);
        assert_eq!(keys.msk.len(), 64);
        assert_eq!(keys.emsk.len(), 64);
    }
}
