//! The EAP-SIM method state machine (RFC 4186)

use std::sync::Arc;

use log::{debug, warn};
use sha1::{Digest, Sha1};

use crate::attribute::{SimAkaAttribute, SimAkaTypeData};
use crate::config::EapSimConfig;
use crate::message::{EapCode, EapMessage, EapMethodType};
use crate::sim_auth::SimAuthenticator;
use crate::simaka::{
    derive_sim_aka_keys, fill_response_mac, verify_request_mac, MacAlgorithm, SimAkaKeys, MAC_LEN,
};
use crate::{EapError, EapResult};

/// Subtype of the start round
pub const SUBTYPE_START: u8 = 10;
/// Subtype of the challenge round
pub const SUBTYPE_CHALLENGE: u8 = 11;
/// Subtype of notifications
pub const SUBTYPE_NOTIFICATION: u8 = 12;
/// Subtype of the client error report
pub const SUBTYPE_CLIENT_ERROR: u8 = 14;

/// Client error code: unable to process the packet
pub const ERROR_UNABLE_TO_PROCESS: u16 = 0;
/// Client error code: no common protocol version
pub const ERROR_UNSUPPORTED_VERSION: u16 = 1;
/// Client error code: fewer RAND challenges than the policy requires
pub const ERROR_INSUFFICIENT_CHALLENGES: u16 = 2;
/// Client error code: a RAND challenge was repeated
pub const ERROR_RAND_NOT_FRESH: u16 = 3;

/// The only protocol version this peer implements
const SUPPORTED_VERSION: u16 = 1;

enum SimState {
    Created,
    Started {
        nonce_mt: [u8; 16],
        version_list: Vec<u8>,
        selected_version: u16,
    },
    ChallengeAnswered {
        keys: SimAkaKeys,
    },
    Final,
}

/// The EAP-SIM state machine: `Created -> Start -> Challenge -> Final`
pub struct EapSimMethod {
    config: EapSimConfig,
    authenticator: Arc<dyn SimAuthenticator>,
    identity: Vec<u8>,
    state: SimState,
}

impl EapSimMethod {
    /// Create a fresh machine bound to the identity the session negotiated
    pub fn new(
        config: EapSimConfig,
        authenticator: Arc<dyn SimAuthenticator>,
        identity: Vec<u8>,
    ) -> Self {
        Self {
            config,
            authenticator,
            identity,
            state: SimState::Created,
        }
    }

    pub(crate) fn keys(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match &self.state {
            SimState::ChallengeAnswered { keys } => Some((keys.msk.clone(), keys.emsk.clone())),
            _ => None,
        }
    }

    pub(crate) fn finalize(&mut self) {
        self.state = SimState::Final;
    }

    pub(crate) fn process(&mut self, message: &EapMessage) -> EapResult {
        let Some(data) = &message.data else {
            return EapResult::Error(EapError::InvalidRequest);
        };
        let type_data = match SimAkaTypeData::try_parse(&data.type_data) {
            Ok(type_data) => type_data,
            Err(error) => {
                warn!("Malformed EAP-SIM request answered with a client error: {error}");
                return self.client_error(message.identifier, ERROR_UNABLE_TO_PROCESS);
            }
        };

        match type_data.subtype {
            SUBTYPE_START => self.process_start(message.identifier, &type_data),
            SUBTYPE_CHALLENGE => self.process_challenge(message.identifier, &type_data),
            SUBTYPE_NOTIFICATION => self.process_notification(message.identifier, &type_data),
            other => {
                warn!("Unexpected EAP-SIM subtype {other}");
                self.client_error(message.identifier, ERROR_UNABLE_TO_PROCESS)
            }
        }
    }

    fn process_start(&mut self, identifier: u8, request: &SimAkaTypeData) -> EapResult {
        if matches!(self.state, SimState::ChallengeAnswered { .. }) {
            return EapResult::Error(EapError::InvalidRequest);
        }
        let Some(versions) = request.find(|a| match a {
            SimAkaAttribute::AtVersionList(v) => Some(v.clone()),
            _ => None,
        }) else {
            return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
        };
        // highest version common to both sides wins
        let Some(selected_version) = versions
            .iter()
            .copied()
            .filter(|v| *v == SUPPORTED_VERSION)
            .max()
        else {
            return self.client_error(identifier, ERROR_UNSUPPORTED_VERSION);
        };

        // the nonce is generated once and survives additional start rounds
        let nonce_mt = match &self.state {
            SimState::Started { nonce_mt, .. } => *nonce_mt,
            _ => rand::random(),
        };
        let version_list: Vec<u8> = versions
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();

        let mut attributes = vec![];
        if wants_identity(request) {
            attributes.push(SimAkaAttribute::AtIdentity(self.identity.clone()));
        }
        attributes.push(SimAkaAttribute::AtSelectedVersion(selected_version));
        attributes.push(SimAkaAttribute::AtNonceMt(nonce_mt));

        self.state = SimState::Started {
            nonce_mt,
            version_list,
            selected_version,
        };
        self.respond(identifier, SUBTYPE_START, attributes)
    }

    fn process_challenge(&mut self, identifier: u8, request: &SimAkaTypeData) -> EapResult {
        let SimState::Started {
            nonce_mt,
            version_list,
            selected_version,
        } = &self.state
        else {
            return EapResult::Error(EapError::InvalidRequest);
        };
        let Some(rand_bytes) = request.find(|a| match a {
            SimAkaAttribute::AtRand(r) => Some(r.clone()),
            _ => None,
        }) else {
            return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
        };

        let rands: Vec<[u8; 16]> = rand_bytes
            .chunks_exact(16)
            .map(|c| {
                let mut rand = [0u8; 16];
                rand.copy_from_slice(c);
                rand
            })
            .collect();
        if rands.len() < 2 || rands.len() > 3 {
            return self.client_error(identifier, ERROR_INSUFFICIENT_CHALLENGES);
        }
        if rands.iter().enumerate().any(|(i, r)| rands[..i].contains(r)) {
            return self.client_error(identifier, ERROR_RAND_NOT_FRESH);
        }

        let mut triplets = vec![];
        for rand in &rands {
            match self
                .authenticator
                .gsm_auth(self.config.sub_id, self.config.app_type, rand)
            {
                Ok(triplet) => triplets.push(triplet),
                Err(error) => return EapResult::Error(EapError::SimAuth(error)),
            }
        }

        // MK = SHA1(Identity | n*Kc | NONCE_MT | Version List | Selected Version)
        let mut hasher = Sha1::new();
        hasher.update(&self.identity);
        for triplet in &triplets {
            hasher.update(triplet.kc);
        }
        hasher.update(nonce_mt);
        hasher.update(version_list);
        hasher.update(selected_version.to_be_bytes());
        let mk: [u8; 20] = hasher.finalize().into();
        let keys = derive_sim_aka_keys(&mk);

        if !verify_request_mac(
            MacAlgorithm::HmacSha1,
            &keys.k_aut,
            identifier,
            EapMethodType::Sim as u8,
            request,
            nonce_mt,
        ) {
            debug!("EAP-SIM challenge MAC did not verify");
            return self.client_error(identifier, ERROR_UNABLE_TO_PROCESS);
        }

        let sres: Vec<u8> = triplets.iter().flat_map(|t| t.sres).collect();
        let mut response = SimAkaTypeData::new(
            SUBTYPE_CHALLENGE,
            vec![SimAkaAttribute::AtMac([0; MAC_LEN])],
        );
        fill_response_mac(
            MacAlgorithm::HmacSha1,
            &keys.k_aut,
            identifier,
            EapMethodType::Sim as u8,
            &mut response,
            &sres,
        );

        self.state = SimState::ChallengeAnswered { keys };
        EapResult::Response(
            EapMessage::new(
                EapCode::Response,
                identifier,
                EapMethodType::Sim as u8,
                response.build(),
            )
            .build(),
        )
    }

    fn process_notification(&mut self, identifier: u8, request: &SimAkaTypeData) -> EapResult {
        if let Some(code) = request.find(|a| match a {
            SimAkaAttribute::AtNotification(code) => Some(*code),
            _ => None,
        }) {
            debug!("EAP-SIM notification received: {code}");
        }
        // a MAC is echoed when the notification arrives after key agreement
        if let SimState::ChallengeAnswered { keys } = &self.state {
            if !verify_request_mac(
                MacAlgorithm::HmacSha1,
                &keys.k_aut,
                identifier,
                EapMethodType::Sim as u8,
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
                EapMethodType::Sim as u8,
                &mut response,
                &[],
            );
            return EapResult::Response(
                EapMessage::new(
                    EapCode::Response,
                    identifier,
                    EapMethodType::Sim as u8,
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
                EapMethodType::Sim as u8,
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

fn wants_identity(request: &SimAkaTypeData) -> bool {
    request
        .find(|a| {
            matches!(
                a,
                SimAkaAttribute::AtPermanentIdReq
                    | SimAkaAttribute::AtAnyIdReq
                    | SimAkaAttribute::AtFullauthIdReq
            )
            .then_some(())
        })
        .is_some()
}
