//! The EAP-AKA method state machine (RFC 4187)

use std::sync::Arc;

use log::{debug, warn};
use sha1::{Digest, Sha1};

use crate::attribute::{SimAkaAttribute, SimAkaTypeData};
use crate::config::EapAkaConfig;
use crate::message::{EapCode, EapMessage, EapMethodType};
use crate::sim_auth::{SimAuthenticator, UmtsResult};
use crate::simaka::{
    derive_sim_aka_keys, fill_response_mac, verify_request_mac, MacAlgorithm, SimAkaKeys, MAC_LEN,
};
use crate::{EapError, EapResult};

/// Subtype of the challenge round
pub const SUBTYPE_CHALLENGE: u8 = 1;
/// Subtype rejecting a failed network authentication
pub const SUBTYPE_AUTHENTICATION_REJECT: u8 = 2;
/// Subtype reporting a sequence number resynchronization
pub const SUBTYPE_SYNCHRONIZATION_FAILURE: u8 = 4;
/// Subtype of the identity round
pub const SUBTYPE_IDENTITY: u8 = 5;
/// Subtype of notifications
pub const SUBTYPE_NOTIFICATION: u8 = 12;
/// Subtype of the client error report
pub const SUBTYPE_CLIENT_ERROR: u8 = 14;

/// Client error code: unable to process the packet
pub const ERROR_UNABLE_TO_PROCESS: u16 = 0;

enum AkaState {
    Created,
    ChallengeAnswered { keys: SimAkaKeys },
    Final,
}

/// The EAP-AKA state machine: `Created -> Identity -> Challenge -> Final`,
/// where the identity round is optional
pub struct EapAkaMethod {
    config: EapAkaConfig,
    authenticator: Arc<dyn SimAuthenticator>,
    identity: Vec<u8>,
    state: AkaState,
}

impl EapAkaMethod {
    /// Create a fresh machine bound to the identity the session negotiated
    pub fn new(
        config: EapAkaConfig,
        authenticator: Arc<dyn SimAuthenticator>,
        identity: Vec<u8>,
    ) -> Self {
        Self {
            config,
            authenticator,
            identity,
            state: AkaState::Created,
        }
    }

    pub(crate) fn keys(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match &self.state {
            AkaState::ChallengeAnswered { keys } => Some((keys.msk.clone(), keys.emsk.clone())),
            _ => None,
        }
    }

    pub(crate) fn finalize(&mut self) {
        self.state = AkaState::Final;
    }

    pub(crate) fn process(&mut self, message: &EapMessage) -> EapResult {
        let Some(data) = &message.data else {
            return EapResult::Error(EapError::InvalidRequest);
        };
        let type_data = match SimAkaTypeData::try_parse(&data.type_data) {
            Ok(type_data) => type_data,
            Err(error) => {
                warn!("Malformed EAP-AKA request answered with a client error: {error}");
                return self.client_error(message.identifier, ERROR_UNABLE_TO_PROCESS);
            }
        };

        match type_data.subtype {
            SUBTYPE_IDENTITY => self.process_identity(message.identifier, &type_data),
            SUBTYPE_CHALLENGE => self.process_challenge(message.identifier, &type_data),
            SUBTYPE_NOTIFICATION => self.process_notification(message.identifier, &type_data),
            other => {
                warn!("Unexpected EAP-AKA subtype {other}");
                self.client_error(message.identifier, ERROR_UNABLE_TO_PROCESS)
            }
        }
    }

    fn process_identity(&mut self, identifier: u8, request: &SimAkaTypeData) -> EapResult {
        if matches!(self.state, AkaState::ChallengeAnswered { .. }) {
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
        if !matches!(self.state, AkaState::Created) {
            return EapResult::Error(EapError::InvalidRequest);
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
                // MK = SHA1(Identity | IK | CK)
                let mut hasher = Sha1::new();
                hasher.update(&self.identity);
                hasher.update(&ik);
                hasher.update(&ck);
                let mk: [u8; 20] = hasher.finalize().into();
                let keys = derive_sim_aka_keys(&mk);

                if !verify_request_mac(
                    MacAlgorithm::HmacSha1,
                    &keys.k_aut,
                    identifier,
                    EapMethodType::Aka as u8,
                    request,
                    &[],
                ) {
                    debug!("EAP-AKA challenge MAC did not verify");
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
                    MacAlgorithm::HmacSha1,
                    &keys.k_aut,
                    identifier,
                    EapMethodType::Aka as u8,
                    &mut response,
                    &[],
                );
                self.state = AkaState::ChallengeAnswered { keys };
                EapResult::Response(
                    EapMessage::new(
                        EapCode::Response,
                        identifier,
                        EapMethodType::Aka as u8,
                        response.build(),
                    )
                    .build(),
                )
            }
            UmtsResult::SynchronizationFailure { auts } => {
                debug!("USIM reported a sequence number mismatch, sending AUTS");
                self.respond(
                    identifier,
                    SUBTYPE_SYNCHRONIZATION_FAILURE,
                    vec![SimAkaAttribute::AtAuts(auts)],
                )
            }
            UmtsResult::AuthenticationReject => {
                warn!("USIM rejected the network authentication token");
                self.respond(identifier, SUBTYPE_AUTHENTICATION_REJECT, vec![])
            }
        }
    }

    fn process_notification(&mut self, identifier: u8, request: &SimAkaTypeData) -> EapResult {
        if let Some(code) = request.find(|a| match a {
            SimAkaAttribute::AtNotification(code) => Some(*code),
            _ => None,
        }) {
            debug!("EAP-AKA notification received: {code}");
        }
        if let AkaState::ChallengeAnswered { keys } = &self.state {
            if !verify_request_mac(
                MacAlgorithm::HmacSha1,
                &keys.k_aut,
                identifier,
                EapMethodType::Aka as u8,
                request,
                &[],
            ) {
                return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
            }
            let k_aut = keys.k_aut.clone();
            let mut response = SimAkaTypeData::new(
                SUBTYPE_NOTIFICATION,
                vec![SimAkaAttribute::AtMac([0; MAC_LEN])],
            );
            fill_response_mac(
                MacAlgorithm::HmacSha1,
                &k_aut,
                identifier,
                EapMethodType::Aka as u8,
                &mut response,
                &[],
            );
            return EapResult::Response(
                EapMessage::new(
                    EapCode::Response,
                    identifier,
                    EapMethodType::Aka as u8,
                    response.build(),
                )
                .build(),
            );
        }
        self.respond(identifier, SUBTYPE_NOTIFICATION, vec![])
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
                EapMethodType::Aka as u8,
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

    struct FakeUsim {
        outcome: UmtsResult,
    }

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
            Ok(self.outcome.clone())
        }
    }

    fn machine(outcome: UmtsResult) -> EapAkaMethod {
        EapAkaMethod::new(
            EapAkaConfig {
                sub_id: 1,
                app_type: AppType::Usim,
            },
            Arc::new(FakeUsim { outcome }),
            b"0234567890@wlan".to_vec(),
        )
    }

    fn challenge_request(identifier: u8) -> EapMessage {
        EapMessage::new(
            EapCode::Request,
            identifier,
            EapMethodType::Aka as u8,
            SimAkaTypeData::new(
                SUBTYPE_CHALLENGE,
                vec![
                    SimAkaAttribute::AtRand(vec![0x33; 16]),
                    SimAkaAttribute::AtAutn([0x44; 16]),
                    SimAkaAttribute::AtMac([0; MAC_LEN]),
                ],
            )
            .build(),
        )
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn identity_request_is_answered_with_at_identity() {
        let mut m = machine(UmtsResult::AuthenticationReject);
        let result = m.process(&EapMessage::new(
            EapCode::Request,
            1,
            EapMethodType::Aka as u8,
            SimAkaTypeData::new(SUBTYPE_IDENTITY, vec![SimAkaAttribute::AtAnyIdReq]).build(),
        ));
        let EapResult::Response(bytes) = result else {
            panic!("expected a response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        let type_data = SimAkaTypeData::try_parse(&parsed.data.unwrap().type_data).unwrap();
        assert_eq!(type_data.subtype, SUBTYPE_IDENTITY);
        assert_eq!(
            type_data.find(|a| match a {
                SimAkaAttribute::AtIdentity(identity) => Some(identity.clone()),
                _ => None,
            }),
            Some(b"0234567890@wlan".to_vec())
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn synchronization_failure_carries_auts() {
        let mut m = machine(UmtsResult::SynchronizationFailure { auts: [0x77; 14] });
        let EapResult::Response(bytes) = m.process(&challenge_request(2)) else {
            panic!("expected a response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        let type_data = SimAkaTypeData::try_parse(&parsed.data.unwrap().type_data).unwrap();
        assert_eq!(type_data.subtype, SUBTYPE_SYNCHRONIZATION_FAILURE);
        assert_eq!(
            type_data.find(|a| match a {
                SimAkaAttribute::AtAuts(auts) => Some(*auts),
                _ => None,
            }),
            Some([0x77; 14])
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn rejected_autn_yields_authentication_reject() {
        let mut m = machine(UmtsResult::AuthenticationReject);
        let EapResult::Response(bytes) = m.process(&challenge_request(2)) else {
            panic!("expected a response");
        };
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        let type_data = SimAkaTypeData::try_parse(&parsed.data.unwrap().type_data).unwrap();
        assert_eq!(type_data.subtype, SUBTYPE_AUTHENTICATION_REJECT);
        assert!(type_data.attributes.is_empty());
    }

    #[test]
    fn mismatched_request_mac_yields_client_error() {
        let mut m = machine(UmtsResult::Success {
            res: vec![0x55; 8],
            ck: vec![0x66; 16],
            ik: vec![0x88; 16],
        });
        // the MAC in the request is zeroed and cannot verify
        let EapResult::Response(bytes) = m.process(&challenge_request(2)) else {
            panic!("expected a response");
        };
        #[allow(clippy::unwrap_used)]
        let parsed = EapMessage::try_parse(&bytes).unwrap();
        #[allow(clippy::unwrap_used)]
        let type_data = SimAkaTypeData::try_parse(&parsed.data.unwrap().type_data).unwrap();
        assert_eq!(type_data.subtype, SUBTYPE_CLIENT_ERROR);
    }
}
