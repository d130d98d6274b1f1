//! Diffie-Hellman over the MODP groups of RFC 2409 and RFC 3526
//!
//! The shared secret feeds the SKEYSEED derivation. Public and shared
//! values are always left-padded to the full group size as the wire
//! format requires.

use num_bigint::BigUint;
use rand::RngCore;

use ikev2_wire::definitions::params::DhGroupId;

use crate::crypto::CryptoError;

/// All MODP groups use the generator 2
const GENERATOR: u32 = 2;

/// Octet length of the private exponents this engine generates
const PRIVATE_KEY_LEN: usize = 64;

// RFC 2409, section 6.2
const MODP_1024: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                         020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                         4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                         EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

// RFC 3526, section 2
const MODP_1536: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                         020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                         4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                         EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                         98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                         9ED529077096966D670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF";

// RFC 3526, section 3
const MODP_2048: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                         020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                         4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                         EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                         98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                         9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                         E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
                         3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

// RFC 3526, section 4
const MODP_3072: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                         020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                         4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                         EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                         98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                         9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                         E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
                         3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33\
                         A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
                         ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864\
                         D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2\
                         08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

// RFC 3526, section 5
const MODP_4096: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                         020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                         4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                         EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                         98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                         9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                         E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
                         3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33\
                         A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
                         ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864\
                         D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2\
                         08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A92108011A723C12A787E6D7\
                         88719A10BDBA5B2699C327186AF4E23C1A946834B6150BDA2583E9CA2AD44CE8\
                         DBBBC2DB04DE8EF92E8EFC141FBECAA6287C59474E6BC05D99B2964FA090C3A2\
                         233BA186515BE7ED1F612970CEE2D7AFB81BDD762170481CD0069127D5B05AA9\
                         93B4EA988D8FDDC186FFB7DC90A6C08F4DF435C934063199FFFFFFFFFFFFFFFF";

/// A MODP group with its prime loaded
#[derive(Debug, Clone)]
pub struct DhGroup {
    id: DhGroupId,
    prime: BigUint,
}

impl DhGroup {
    /// Whether this engine implements the group
    pub fn supported(id: DhGroupId) -> bool {
        matches!(
            id,
            DhGroupId::ModP1024
                | DhGroupId::ModP1536
                | DhGroupId::ModP2048
                | DhGroupId::ModP3072
                | DhGroupId::ModP4096
        )
    }

    /// Load the prime for a supported group
    pub fn new(id: DhGroupId) -> Result<Self, CryptoError> {
        let hex = match id {
            DhGroupId::ModP1024 => MODP_1024,
            DhGroupId::ModP1536 => MODP_1536,
            DhGroupId::ModP2048 => MODP_2048,
            DhGroupId::ModP3072 => MODP_3072,
            DhGroupId::ModP4096 => MODP_4096,
            _ => return Err(CryptoError::UnsupportedTransform),
        };
        let prime = BigUint::parse_bytes(hex.as_bytes(), 16)
            .unwrap_or_else(|| unreachable!("group primes are valid hex constants"));
        Ok(Self { id, prime })
    }

    /// The group identifier
    pub fn id(&self) -> DhGroupId {
        self.id
    }

    /// Octet length of public values and shared secrets in this group
    pub fn key_len(&self) -> usize {
        (self.prime.bits() as usize).div_ceil(8)
    }

    /// Generate a fresh key pair in the group
    pub fn generate(id: DhGroupId) -> Result<DhKeyPair, CryptoError> {
        let group = Self::new(id)?;
        let mut bytes = [0u8; PRIVATE_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        let private = BigUint::from_bytes_be(&bytes);
        let public = left_pad(
            &BigUint::from(GENERATOR)
                .modpow(&private, &group.prime)
                .to_bytes_be(),
            group.key_len(),
        );
        Ok(DhKeyPair {
            group,
            private,
            public,
        })
    }
}

/// One side's key pair, holding the private exponent until the shared
/// secret is computed
pub struct DhKeyPair {
    group: DhGroup,
    private: BigUint,
    public: Vec<u8>,
}

impl DhKeyPair {
    /// The group this pair belongs to
    pub fn group_id(&self) -> DhGroupId {
        self.group.id
    }

    /// The public value, padded to the group size
    pub fn public_value(&self) -> &[u8] {
        &self.public
    }

    /// Compute the shared secret from the peer's public value
    ///
    /// The degenerate values 0, 1 and p-1 are rejected; accepting them
    /// would let an active attacker force a known shared secret.
    pub fn compute_shared(&self, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if peer_public.len() != self.group.key_len() {
            return Err(CryptoError::InvalidPublicValue);
        }
        let peer = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);
        if peer <= one || peer >= &self.group.prime - &one {
            return Err(CryptoError::InvalidPublicValue);
        }
        let shared = peer.modpow(&self.private, &self.group.prime);
        Ok(left_pad(&shared.to_bytes_be(), self.group.key_len()))
    }
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn key_exchange_agrees_in_every_group() {
        for id in [DhGroupId::ModP1024, DhGroupId::ModP1536, DhGroupId::ModP2048] {
            let alice = DhGroup::generate(id).unwrap();
            let bob = DhGroup::generate(id).unwrap();
            let shared_a = alice.compute_shared(bob.public_value()).unwrap();
            let shared_b = bob.compute_shared(alice.public_value()).unwrap();
            assert_eq!(shared_a, shared_b);
            assert_eq!(shared_a.len(), alice.group.key_len());
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn degenerate_public_values_are_rejected() {
        let pair = DhGroup::generate(DhGroupId::ModP1024).unwrap();
        let len = pair.group.key_len();
        assert_eq!(
            pair.compute_shared(&vec![0u8; len]),
            Err(CryptoError::InvalidPublicValue)
        );
        let mut one = vec![0u8; len];
        one[len - 1] = 1;
        assert_eq!(
            pair.compute_shared(&one),
            Err(CryptoError::InvalidPublicValue)
        );
        assert_eq!(
            pair.compute_shared(&[0u8; 4]),
            Err(CryptoError::InvalidPublicValue)
        );
    }

    #[test]
    fn unsupported_groups_are_refused() {
        assert!(!DhGroup::supported(DhGroupId::Curve25519));
        assert!(DhGroup::new(DhGroupId::Ecp256).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn group_sizes_match_their_names() {
        assert_eq!(DhGroup::new(DhGroupId::ModP1024).unwrap().key_len(), 128);
        assert_eq!(DhGroup::new(DhGroupId::ModP1536).unwrap().key_len(), 192);
        assert_eq!(DhGroup::new(DhGroupId::ModP2048).unwrap().key_len(), 256);
        assert_eq!(DhGroup::new(DhGroupId::ModP3072).unwrap().key_len(), 384);
        assert_eq!(DhGroup::new(DhGroupId::ModP4096).unwrap().key_len(), 512);
    }
}
