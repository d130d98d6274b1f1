//! The EAP-MSCHAPv2 method state machine (RFC 2759 carried in EAP)
//!
//! The challenge response and authenticator verification follow RFC 2759;
//! the master key and the asymmetric start keys feeding the MSK follow
//! RFC 3079, section 3.4.

use log::{debug, warn};
use md4::Md4;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::config::EapMsChapV2Config;
use crate::message::{EapCode, EapMessage, EapMethodType};
use crate::{EapError, EapResult};

/// Op code of the challenge request
pub const OP_CHALLENGE: u8 = 1;
/// Op code of the challenge response
pub const OP_RESPONSE: u8 = 2;
/// Op code of the success request and response
pub const OP_SUCCESS: u8 = 3;
/// Op code of the failure request and response
pub const OP_FAILURE: u8 = 4;

const CHALLENGE_LEN: usize = 16;
const NT_RESPONSE_LEN: usize = 24;
const RESPONSE_VALUE_LEN: usize = 49;

const MAGIC1: &[u8] = b"Magic server to client signing constant";
const MAGIC2: &[u8] = b"Pad to make it do more than one iteration";
const MASTER_KEY_MAGIC: &[u8] = b"This is the MPPE Master Key";
const SEND_KEY_MAGIC: &[u8] =
    b"On the client side, this is the send key; on the server side, it is the receive key.";
const RECEIVE_KEY_MAGIC: &[u8] =
    b"On the client side, this is the receive key; on the server side, it is the send key.";
const SHS_PAD1: [u8; 40] = [0x00; 40];
const SHS_PAD2: [u8; 40] = [0xf2; 40];

enum MsChapV2State {
    Created,
    ChallengeAnswered {
        auth_challenge: [u8; 16],
        peer_challenge: [u8; 16],
        nt_response: [u8; 24],
    },
    Validated {
        msk: Vec<u8>,
        emsk: Vec<u8>,
    },
    Final,
}

/// The EAP-MSCHAPv2 state machine:
/// `Created -> Challenge -> ValidateAuth -> Final`
pub struct EapMsChapV2Method {
    config: EapMsChapV2Config,
    state: MsChapV2State,
}

impl EapMsChapV2Method {
    /// Create a fresh machine
    pub fn new(config: EapMsChapV2Config) -> Self {
        Self {
            config,
            state: MsChapV2State::Created,
        }
    }

    pub(crate) fn keys(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match &self.state {
            MsChapV2State::Validated { msk, emsk } => Some((msk.clone(), emsk.clone())),
            _ => None,
        }
    }

    pub(crate) fn finalize(&mut self) {
        self.state = MsChapV2State::Final;
    }

    pub(crate) fn process(&mut self, message: &EapMessage) -> EapResult {
        let Some(data) = &message.data else {
            return EapResult::Error(EapError::InvalidRequest);
        };
        // op code, MS-CHAPv2 ID and MS-Length precede the op data
        if data.type_data.len() < 4 {
            return EapResult::Error(EapError::InvalidRequest);
        }
        let op_code = data.type_data[0];
        let ms_id = data.type_data[1];
        let ms_length = u16::from_be_bytes([data.type_data[2], data.type_data[3]]) as usize;
        if ms_length != data.type_data.len() {
            warn!("MS-Length disagrees with the EAP length");
            return EapResult::Error(EapError::InvalidRequest);
        }
        let op_data = &data.type_data[4..];

        match op_code {
            OP_CHALLENGE => self.process_challenge(message.identifier, ms_id, op_data),
            OP_SUCCESS => self.process_success(message.identifier, op_data),
            OP_FAILURE => self.process_failure(message.identifier, op_data),
            other => {
                warn!("Unexpected MSCHAPv2 op code {other}");
                EapResult::Error(EapError::InvalidRequest)
            }
        }
    }

    fn process_challenge(&mut self, identifier: u8, ms_id: u8, op_data: &[u8]) -> EapResult {
        if !matches!(self.state, MsChapV2State::Created) {
            return EapResult::Error(EapError::InvalidRequest);
        }
        if op_data.is_empty() || op_data[0] as usize != CHALLENGE_LEN {
            return EapResult::Error(EapError::InvalidRequest);
        }
        if op_data.len() < 1 + CHALLENGE_LEN {
            return EapResult::Error(EapError::InvalidRequest);
        }
        let mut auth_challenge = [0u8; 16];
        auth_challenge.copy_from_slice(&op_data[1..1 + CHALLENGE_LEN]);

        let peer_challenge: [u8; 16] = rand::random();
        let nt_hash = nt_password_hash(&self.config.password);
        let nt_response = generate_nt_response(
            &auth_challenge,
            &peer_challenge,
            self.config.username.as_bytes(),
            &nt_hash,
        );

        // Value: peer challenge, 8 reserved octets, NT response, flags
        let mut value = Vec::with_capacity(RESPONSE_VALUE_LEN);
        value.extend_from_slice(&peer_challenge);
        value.extend_from_slice(&[0u8; 8]);
        value.extend_from_slice(&nt_response);
        value.push(0);

        let mut op_response = vec![OP_RESPONSE, ms_id, 0, 0, RESPONSE_VALUE_LEN as u8];
        op_response.extend_from_slice(&value);
        op_response.extend_from_slice(self.config.username.as_bytes());
        let ms_length = op_response.len() as u16;
        op_response[2..4].copy_from_slice(&ms_length.to_be_bytes());

        self.state = MsChapV2State::ChallengeAnswered {
            auth_challenge,
            peer_challenge,
            nt_response,
        };
        EapResult::Response(
            EapMessage::new(
                EapCode::Response,
                identifier,
                EapMethodType::MsChapV2 as u8,
                op_response,
            )
            .build(),
        )
    }

    fn process_success(&mut self, identifier: u8, op_data: &[u8]) -> EapResult {
        let MsChapV2State::ChallengeAnswered {
            auth_challenge,
            peer_challenge,
            nt_response,
        } = &self.state
        else {
            return EapResult::Error(EapError::InvalidRequest);
        };

        let Some(received) = extract_authenticator_response(op_data) else {
            return EapResult::Error(EapError::InvalidRequest);
        };
        let nt_hash = nt_password_hash(&self.config.password);
        let expected = generate_authenticator_response(
            &nt_hash,
            nt_response,
            peer_challenge,
            auth_challenge,
            self.config.username.as_bytes(),
        );
        if !bool::from(expected.as_bytes().ct_eq(&received)) {
            warn!("Authenticator response did not verify, reporting failure");
            self.state = MsChapV2State::Final;
            return self.op_only_response(identifier, OP_FAILURE);
        }

        let password_hash_hash = hash_nt_password_hash(&nt_hash);
        let master_key = get_master_key(&password_hash_hash, nt_response);
        let send_key = get_asymmetric_start_key(&master_key, SEND_KEY_MAGIC);
        let receive_key = get_asymmetric_start_key(&master_key, RECEIVE_KEY_MAGIC);

        // the tunnel MSK is the two asymmetric keys zero-padded to 64 octets
        let mut msk = Vec::with_capacity(64);
        msk.extend_from_slice(&receive_key);
        msk.extend_from_slice(&send_key);
        msk.resize(64, 0);

        self.state = MsChapV2State::Validated {
            msk,
            emsk: vec![0; 64],
        };
        self.op_only_response(identifier, OP_SUCCESS)
    }

    fn process_failure(&mut self, identifier: u8, op_data: &[u8]) -> EapResult {
        debug!(
            "MSCHAPv2 failure request: {}",
            String::from_utf8_lossy(op_data)
        );
        self.state = MsChapV2State::Final;
        self.op_only_response(identifier, OP_FAILURE)
    }

    fn op_only_response(&self, identifier: u8, op_code: u8) -> EapResult {
        EapResult::Response(
            EapMessage::new(
                EapCode::Response,
                identifier,
                EapMethodType::MsChapV2 as u8,
                vec![op_code],
            )
            .build(),
        )
    }
}

/// MD4 over the UTF-16LE encoding of the password (RFC 2759, section 8.3)
fn nt_password_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    for unit in password.encode_utf16() {
        hasher.update(unit.to_le_bytes());
    }
    hasher.finalize().into()
}

fn hash_nt_password_hash(nt_hash: &[u8; 16]) -> [u8; 16] {
    Md4::digest(nt_hash).into()
}

/// SHA1(PeerChallenge | AuthenticatorChallenge | UserName) truncated to 8
/// octets (RFC 2759, section 8.2)
fn challenge_hash(peer: &[u8; 16], authenticator: &[u8; 16], username: &[u8]) -> [u8; 8] {
    let mut hasher = Sha1::new();
    hasher.update(peer);
    hasher.update(authenticator);
    hasher.update(username);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// The NT response: three DES encryptions of the challenge hash under the
/// zero-padded NT password hash (RFC 2759, sections 8.1 and 8.5)
fn generate_nt_response(
    auth_challenge: &[u8; 16],
    peer_challenge: &[u8; 16],
    username: &[u8],
    nt_hash: &[u8; 16],
) -> [u8; 24] {
    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    let mut z_password_hash = [0u8; 21];
    z_password_hash[..16].copy_from_slice(nt_hash);

    let mut response = [0u8; NT_RESPONSE_LEN];
    for (i, key7) in z_password_hash.chunks_exact(7).enumerate() {
        let mut key = [0u8; 7];
        key.copy_from_slice(key7);
        response[i * 8..(i + 1) * 8].copy_from_slice(&des_encrypt(&key, &challenge));
    }
    response
}

/// Spread 56 key bits over 8 octets; DES ignores the parity positions
fn expand_des_key(key: &[u8; 7]) -> [u8; 8] {
    [
        key[0] & 0xfe,
        (key[0] << 7) | (key[1] >> 1),
        (key[1] << 6) | (key[2] >> 2),
        (key[2] << 5) | (key[3] >> 3),
        (key[3] << 4) | (key[4] >> 4),
        (key[4] << 3) | (key[5] >> 5),
        (key[5] << 2) | (key[6] >> 6),
        key[6] << 1,
    ]
}

fn des_encrypt(key: &[u8; 7], data: &[u8; 8]) -> [u8; 8] {
    use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};

    let cipher = des::Des::new(GenericArray::from_slice(&expand_des_key(key)));
    let mut block = GenericArray::clone_from_slice(data);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// The `S=<40 uppercase hex>` authenticator string (RFC 2759, section 8.7)
fn generate_authenticator_response(
    nt_hash: &[u8; 16],
    nt_response: &[u8; 24],
    peer_challenge: &[u8; 16],
    auth_challenge: &[u8; 16],
    username: &[u8],
) -> String {
    let password_hash_hash = hash_nt_password_hash(nt_hash);

    let mut hasher = Sha1::new();
    hasher.update(password_hash_hash);
    hasher.update(nt_response);
    hasher.update(MAGIC1);
    let digest = hasher.finalize();

    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    let mut hasher = Sha1::new();
    hasher.update(digest);
    hasher.update(challenge);
    hasher.update(MAGIC2);

    let mut out = String::with_capacity(42);
    out.push_str("S=");
    for byte in hasher.finalize() {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// Find the `S=` authenticator in a success request message, returning the
/// 42-octet `S=<hex>` prefix
fn extract_authenticator_response(op_data: &[u8]) -> Option<Vec<u8>> {
    let position = op_data.windows(2).position(|w| w == b"S=")?;
    let response = op_data.get(position..position + 42)?;
    Some(response.to_vec())
}

/// RFC 3079, section 3.4: the 16-octet master key
fn get_master_key(password_hash_hash: &[u8; 16], nt_response: &[u8; 24]) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(password_hash_hash);
    hasher.update(nt_response);
    hasher.update(MASTER_KEY_MAGIC);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// RFC 3079, section 3.4: one of the two asymmetric session start keys
fn get_asymmetric_start_key(master_key: &[u8; 16], magic: &[u8]) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(master_key);
    hasher.update(SHS_PAD1);
    hasher.update(magic);
    hasher.update(SHS_PAD2);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // test vectors of RFC 2759, section 9.2
    const USERNAME: &[u8] = b"User";
    const PASSWORD: &str = "clientPass";
    const AUTH_CHALLENGE: [u8; 16] = [
        0x5B, 0x5D, 0x7C, 0x7D, 0x7B, 0x3F, 0x2F, 0x3E, 0x3C, 0x2C, 0x60, 0x21, 0x32, 0x26,
        0x26, 0x28,
    ];
    const PEER_CHALLENGE: [u8; 16] = [
        0x21, 0x40, 0x23, 0x24, 0x25, 0x5E, 0x26, 0x2A, 0x28, 0x29, 0x5F, 0x2B, 0x3A, 0x33,
        0x7C, 0x7E,
    ];
    const NT_RESPONSE: [u8; 24] = [
        0x82, 0x30, 0x9E, 0xCD, 0x8D, 0x70, 0x8B, 0x5E, 0xA0, 0x8F, 0xAA, 0x39, 0x81, 0xCD,
        0x83, 0x54, 0x42, 0x33, 0x11, 0x4A, 0x3D, 0x85, 0xD6, 0xDF,
    ];

    #[test]
    fn nt_password_hash_matches_rfc_vector() {
        assert_eq!(
            nt_password_hash(PASSWORD),
            [
                0x44, 0xEB, 0xBA, 0x8D, 0x53, 0x12, 0xB8, 0xD6, 0x11, 0x47, 0x44, 0x11, 0xF5,
                0x69, 0x89, 0xAE
            ]
        );
    }

    #[test]
    fn challenge_hash_matches_rfc_vector() {
        assert_eq!(
            challenge_hash(&PEER_CHALLENGE, &AUTH_CHALLENGE, USERNAME),
            [0xD0, 0x2E, 0x43, 0x86, 0xBC, 0xE9, 0x12, 0x26]
        );
    }

    #[test]
    fn nt_response_matches_rfc_vector() {
        let nt_hash = nt_password_hash(PASSWORD);
        assert_eq!(
            generate_nt_response(&AUTH_CHALLENGE, &PEER_CHALLENGE, USERNAME, &nt_hash),
            NT_RESPONSE
        );
    }

    #[test]
    fn authenticator_response_matches_rfc_vector() {
        let nt_hash = nt_password_hash(PASSWORD);
        assert_eq!(
            generate_authenticator_response(
                &nt_hash,
                &NT_RESPONSE,
                &PEER_CHALLENGE,
                &AUTH_CHALLENGE,
                USERNAME,
            ),
            "S=407A5589115FD0D6209F510FE9C04566932CDA56"
        );
    }

    #[test]
    fn master_key_matches_rfc_3079_vector() {
        let nt_hash = nt_password_hash(PASSWORD);
        let password_hash_hash = hash_nt_password_hash(&nt_hash);
        assert_eq!(
            get_master_key(&password_hash_hash, &NT_RESPONSE),
            [
                0xFD, 0xEC, 0xE3, 0x71, 0x7A, 0x8C, 0x83, 0x8C, 0xB3, 0x88, 0xE5, 0x27, 0xAE,
                0x3C, 0xDD, 0x31
            ]
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn full_exchange_reaches_validated_state() {
        let mut m = EapMsChapV2Method::new(EapMsChapV2Config {
            username: String::from_utf8(USERNAME.to_vec()).unwrap(),
            password: PASSWORD.into(),
        });

        let mut challenge_data = vec![OP_CHALLENGE, 0x2a, 0, 0, 16];
        challenge_data.extend_from_slice(&AUTH_CHALLENGE);
        challenge_data.extend_from_slice(b"authenticator");
        let ms_length = challenge_data.len() as u16;
        challenge_data[2..4].copy_from_slice(&ms_length.to_be_bytes());

        let result = m.process(&EapMessage::new(
            EapCode::Request,
            5,
            EapMethodType::MsChapV2 as u8,
            challenge_data,
        ));
        let EapResult::Response(bytes) = result else {
            panic!("expected a challenge response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        let type_data = parsed.data.unwrap().type_data;
        assert_eq!(type_data[0], OP_RESPONSE);
        assert_eq!(type_data[1], 0x2a);
        assert_eq!(type_data[4], RESPONSE_VALUE_LEN as u8);

        // reconstruct the success request from the values the peer chose
        let MsChapV2State::ChallengeAnswered {
            peer_challenge,
            nt_response,
            ..
        } = &m.state
        else {
            panic!("expected the challenge to be answered");
        };
        let nt_hash = nt_password_hash(PASSWORD);
        let auth_response = generate_authenticator_response(
            &nt_hash,
            nt_response,
            peer_challenge,
            &AUTH_CHALLENGE,
            USERNAME,
        );
        let mut success_data = vec![OP_SUCCESS, 0x2b, 0, 0];
        success_data.extend_from_slice(auth_response.as_bytes());
        success_data.extend_from_slice(b" M=OK");
        let ms_length = success_data.len() as u16;
        success_data[2..4].copy_from_slice(&ms_length.to_be_bytes());

        let result = m.process(&EapMessage::new(
            EapCode::Request,
            6,
            EapMethodType::MsChapV2 as u8,
            success_data,
        ));
        let EapResult::Response(bytes) = result else {
            panic!("expected a success response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        assert_eq!(parsed.data.unwrap().type_data, vec![OP_SUCCESS]);
        assert!(m.keys().is_some());
        assert_eq!(m.keys().unwrap().0.len(), 64);
    }
}
