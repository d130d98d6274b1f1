//! The EAP-AKA' method state machine (RFC 5448)
//!
//! The exchange mirrors EAP-AKA; the differences are the SHA-256 based key
//! derivation seeded with the access network name, the wider K_aut, and
//! the HMAC-SHA-256 AT_MAC.

use std::sync::Arc;

use log::{debug, warn};

use crate::attribute::{SimAkaAttribute, SimAkaTypeData};
use crate::config::EapAkaPrimeConfig;
use crate::message::{EapCode, EapMessage, EapMethodType};
use crate::methods::aka::{
    ERROR_UNABLE_TO_PROCESS, SUBTYPE_AUTHENTICATION_REJECT, SUBTYPE_CHALLENGE, SUBTYPE_CLIENT_ERROR,
    SUBTYPE_IDENTITY, SUBTYPE_NOTIFICATION, SUBTYPE_SYNCHRONIZATION_FAILURE,
};
use crate::sim_auth::{SimAuthenticator, UmtsResult};
use crate::simaka::{
    derive_aka_prime_keys, derive_ck_ik_prime, fill_response_mac, verify_request_mac,
    MacAlgorithm, MAC_LEN,
};
use crate::{EapError, EapResult};

/// The only key derivation function RFC 5448 defines
pub const KDF_CK_IK_PRIME: u16 = 1;

enum AkaPrimeState {
    Created,
    ChallengeAnswered { msk: Vec<u8>, emsk: Vec<u8> },
    Final,
}

/// The EAP-AKA' state machine: `Created -> Identity -> Challenge -> Final`
pub struct EapAkaPrimeMethod {
    config: EapAkaPrimeConfig,
    authenticator: Arc<dyn SimAuthenticator>,
    identity: Vec<u8>,
    state: AkaPrimeState,
}

impl EapAkaPrimeMethod {
    /// Create a fresh machine bound to the identity the session negotiated
    pub fn new(
        config: EapAkaPrimeConfig,
        authenticator: Arc<dyn SimAuthenticator>,
        identity: Vec<u8>,
    ) -> Self {
        Self {
            config,
            authenticator,
            identity,
            state: AkaPrimeState::Created,
        }
    }

    pub(crate) fn keys(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match &self.state {
            AkaPrimeState::ChallengeAnswered { msk, emsk } => Some((msk.clone(), emsk.clone())),
            _ => None,
        }
    }

    pub(crate) fn finalize(&mut self) {
        self.state = AkaPrimeState::Final;
    }

    pub(crate) fn process(&mut self, message: &EapMessage) -> EapResult {
        let Some(data) = &message.data else {
            return EapResult::Error(EapError::InvalidRequest);
        };
        let type_data = match SimAkaTypeData::try_parse(&data.type_data) {
            Ok(type_data) => type_data,
            Err(error) => {
                warn!("Malformed EAP-AKA' request answered with a client error: {error}");
                return self.client_error(message.identifier, ERROR_UNABLE_TO_PROCESS);
            }
        };

        match type_data.subtype {
            SUBTYPE_IDENTITY => self.process_identity(message.identifier, &type_data),
            SUBTYPE_CHALLENGE => self.process_challenge(message.identifier, &type_data),
            SUBTYPE_NOTIFICATION => self.respond(message.identifier, SUBTYPE_NOTIFICATION, vec![]),
            other => {
                warn!("Unexpected EAP-AKA' subtype {other}");
                self.client_error(message.identifier, ERROR_UNABLE_TO_PROCESS)
            }
        }
    }

    fn process_identity(&mut self, identifier: u8, request: &SimAkaTypeData) -> EapResult {
        if matches!(self.state, AkaPrimeState::ChallengeAnswered { .. }) {
            return EapResult::Error(EapError::InvalidRequest);
        }
        let requested = request
            .find(|a| {
                matches!(
                    a,
                    SimAkaAttribute::AtPermanentIdReq
                        | SimAkaAttribute::AtAnyIdReq
                        | SimAkaAttribute::AtFullauthIdReq
                )
                .then_some(())
            })
            .is_some();
        if !requested {
            return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
        }
        self.respond(
            identifier,
            SUBTYPE_IDENTITY,
            vec![SimAkaAttribute::AtIdentity(self.identity.clone())],
        )
    }

    fn process_challenge(&mut self, identifier: u8, request: &SimAkaTypeData) -> EapResult {
        if !matches!(self.state, AkaPrimeState::Created) {
            return EapResult::Error(EapError::InvalidRequest);
        }

        // the KDF negotiation precedes everything else; when the server
        // chose one we do not implement, answer with our supported list
        // and let it re-issue the challenge
        let kdfs: Vec<u16> = request
            .attributes
            .iter()
            .filter_map(|a| match a {
                SimAkaAttribute::AtKdf(kdf) => Some(*kdf),
                _ => None,
            })
            .collect();
        if kdfs.is_empty() {
            return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
        }
        if kdfs[0] != KDF_CK_IK_PRIME {
            debug!("Server selected KDF {}, requesting re-selection", kdfs[0]);
            return self.respond(
                identifier,
                SUBTYPE_CHALLENGE,
                vec![SimAkaAttribute::AtKdf(KDF_CK_IK_PRIME)],
            );
        }

        let Some(kdf_input) = request.find(|a| match a {
            SimAkaAttribute::AtKdfInput(name) => Some(name.clone()),
            _ => None,
        }) else {
            return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
        };
        if kdf_input != self.config.network_name.as_bytes() {
            if !self.config.allow_mismatched_network_names {
                warn!(
                    "Server network name {:?} does not match the configured {:?}",
                    String::from_utf8_lossy(&kdf_input),
                    self.config.network_name,
                );
                return self.respond(identifier, SUBTYPE_AUTHENTICATION_REJECT, vec![]);
            }
            debug!("Continuing with a mismatched network name by configuration");
        }

        let (Some(rand), Some(autn)) = (
            request.find(|a| match a {
                SimAkaAttribute::AtRand(r) if r.len() == 16 => {
                    let mut rand = [0u8; 16];
                    rand.copy_from_slice(r);
                    Some(rand)
                }
                _ => None,
            }),
            request.find(|a| match a {
                SimAkaAttribute::AtAutn(autn) => Some(*autn),
                _ => None,
            }),
        ) else {
            return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
        };

        let outcome = match self.authenticator.umts_auth(
            self.config.sub_id,
            self.config.app_type,
            &rand,
            &autn,
        ) {
            Ok(outcome) => outcome,
            Err(error) => return EapResult::Error(EapError::SimAuth(error)),
        };

        match outcome {
            UmtsResult::Success { res, ck, ik } => {
                // SQN xor AK is the first 6 octets of AUTN
                let mut sqn_xor_ak = [0u8; 6];
                sqn_xor_ak.copy_from_slice(&autn[..6]);
                let (ck_prime, ik_prime) =
                    derive_ck_ik_prime(&ck, &ik, &kdf_input, &sqn_xor_ak);
                let keys = derive_aka_prime_keys(&ck_prime, &ik_prime, &self.identity);

                if !verify_request_mac(
                    MacAlgorithm::HmacSha256,
                    &keys.k_aut,
                    identifier,
                    EapMethodType::AkaPrime as u8,
                    request,
                    &[],
                ) {
                    debug!("EAP-AKA' challenge MAC did not verify");
                    return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
                }

                let mut response = SimAkaTypeData::new(
                    SUBTYPE_CHALLENGE,
                    vec![
                        SimAkaAttribute::AtRes {
                            bit_len: (res.len() * 8) as u16,
                            res: res.clone(),
                        },
                        SimAkaAttribute::AtMac([0; MAC_LEN]),
                    ],
                );
                fill_response_mac(
                    MacAlgorithm::HmacSha256,
                    &keys.k_aut,
                    identifier,
                    EapMethodType::AkaPrime as u8,
                    &mut response,
                    &[],
                );
                self.state = AkaPrimeState::ChallengeAnswered {
                    msk: keys.msk,
                    emsk: keys.emsk,
                };
                EapResult::Response(
                    EapMessage::new(
                        EapCode::Response,
                        identifier,
                        EapMethodType::AkaPrime as u8,
                        response.build(),
                    )
                    .build(),
                )
            }
            // the resynchronization reply takes precedence over any KDF
            // disagreement; the KDF attributes of the following fresh
            // challenge are evaluated from scratch
            UmtsResult::SynchronizationFailure { auts } => self.respond(
                identifier,
                SUBTYPE_SYNCHRONIZATION_FAILURE,
                vec![SimAkaAttribute::AtAuts(auts)],
            ),
            UmtsResult::AuthenticationReject => {
                warn!("USIM rejected the network authentication token");
                self.respond(identifier, SUBTYPE_AUTHENTICATION_REJECT, vec![])
            }
        }
    }

    fn respond(
        &self,
        identifier: u8,
        subtype: u8,
        attributes: Vec<SimAkaAttribute>,
    ) -> EapResult {
        EapResult::Response(
            EapMessage::new(
                EapCode::Response,
                identifier,
                EapMethodType::AkaPrime as u8,
                SimAkaTypeData::new(subtype, attributes).build(),
            )
            .build(),
        )
    }

    fn client_error(&self, identifier: u8, code: u16) -> EapResult {
        self.respond(
            identifier,
            SUBTYPE_CLIENT_ERROR,
            vec![SimAkaAttribute::AtClientErrorCode(code)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_auth::{AppType, GsmTriplet, SimAuthError};

    struct FakeUsim;

    impl SimAuthenticator for FakeUsim {
        fn gsm_auth(
            &self,
            _sub_id: i32,
            _app_type: AppType,
            _rand: &[u8; 16],
        ) -> Result<GsmTriplet, SimAuthError> {
            Err(SimAuthError::NoSuchApplication(0))
        }

        fn umts_auth(
            &self,
            _sub_id: i32,
            _app_type: AppType,
            _rand: &[u8; 16],
            _autn: &[u8; 16],
        ) -> Result<UmtsResult, SimAuthError> {
            Ok(UmtsResult::Success {
                res: vec![0x55; 8],
                ck: vec![0x66; 16],
                ik: vec![0x88; 16],
            })
        }
    }

    fn machine(allow_mismatch: bool) -> EapAkaPrimeMethod {
        EapAkaPrimeMethod::new(
            EapAkaPrimeConfig {
                sub_id: 1,
                app_type: AppType::Usim,
                network_name: "wlan.mnc015.mcc234".into(),
                allow_mismatched_network_names: allow_mismatch,
            },
            Arc::new(FakeUsim),
            b"6234567890@wlan".to_vec(),
        )
    }

    fn challenge(identifier: u8, kdf: u16, network_name: &[u8]) -> EapMessage {
        EapMessage::new(
            EapCode::Request,
            identifier,
            EapMethodType::AkaPrime as u8,
            SimAkaTypeData::new(
                SUBTYPE_CHALLENGE,
                vec![
                    SimAkaAttribute::AtRand(vec![0x33; 16]),
                    SimAkaAttribute::AtAutn([0x44; 16]),
                    SimAkaAttribute::AtKdf(kdf),
                    SimAkaAttribute::AtKdfInput(network_name.to_vec()),
                    SimAkaAttribute::AtMac([0; MAC_LEN]),
                ],
            )
            .build(),
        )
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn mismatched_network_name_is_rejected() {
        let mut m = machine(false);
        let EapResult::Response(bytes) = m.process(&challenge(1, 1, b"wlan.mnc999.mcc999"))
        else {
            panic!("expected a response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        let type_data = SimAkaTypeData::try_parse(&parsed.data.unwrap().type_data).unwrap();
        assert_eq!(type_data.subtype, SUBTYPE_AUTHENTICATION_REJECT);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn unknown_kdf_requests_reselection() {
        let mut m = machine(false);
        let EapResult::Response(bytes) = m.process(&challenge(1, 2, b"wlan.mnc015.mcc234"))
        else {
            panic!("expected a response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        let type_data = SimAkaTypeData::try_parse(&parsed.data.unwrap().type_data).unwrap();
        assert_eq!(type_data.subtype, SUBTYPE_CHALLENGE);
        assert_eq!(type_data.attributes, vec![SimAkaAttribute::AtKdf(1)]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn mismatch_tolerated_when_configured() {
        let mut m = machine(true);
        // the zeroed MAC cannot verify, so the tolerant path still ends in
        // a client error rather than an authentication reject
        let EapResult::Response(bytes) = m.process(&challenge(1, 1, b"wlan.mnc999.mcc999"))
        else {
            panic!("expected a response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        let type_data = SimAkaTypeData::try_parse(&parsed.data.unwrap().type_data).unwrap();
        assert_eq!(type_data.subtype, SUBTYPE_CLIENT_ERROR);
    }
}
