//! The outer EAP session: identity and notification handling, method
//! negotiation via Nak, identifier bookkeeping and method dispatch
//!
//! The session is driven with raw EAP packets and produces [EapResult]
//! values; `None` from [EapSession::process] means the packet was dropped
//! silently, which is how stale identifiers and malformed frames are
//! treated (RFC 3748, section 4.1).

use std::sync::Arc;

use log::{debug, warn};
use strum::IntoEnumIterator;

use crate::config::EapSessionConfig;
use crate::message::{
    EapCode, EapMessage, EapMethodType, TYPE_IDENTITY, TYPE_NAK, TYPE_NOTIFICATION,
};
use crate::methods::{aka, aka_prime, mschapv2, sim, ttls, Method};
use crate::sim_auth::SimAuthenticator;
use crate::tls::TlsSessionFactory;
use crate::{EapError, EapResult};

/// One EAP conversation, created when the IKE session enters its
/// authentication phase and destroyed on Success or Failure
pub struct EapSession {
    config: EapSessionConfig,
    authenticator: Arc<dyn SimAuthenticator>,
    tls_factory: Arc<dyn TlsSessionFactory>,
    active: Option<Method>,
    finished: bool,
    /// identifier and cached response of the last answered request
    last_answered: Option<(u8, Vec<u8>)>,
}

impl EapSession {
    /// Create a session from its configuration and injected services
    pub fn new(
        config: EapSessionConfig,
        authenticator: Arc<dyn SimAuthenticator>,
        tls_factory: Arc<dyn TlsSessionFactory>,
    ) -> Self {
        Self {
            config,
            authenticator,
            tls_factory,
            active: None,
            finished: false,
            last_answered: None,
        }
    }

    /// Feed one inbound EAP packet to the session
    ///
    /// Returns `None` when the packet is dropped without any reaction:
    /// malformed framing, responses, retransmissions of frames that were
    /// never answered, and anything after the conversation finished.
    pub fn process(&mut self, packet: &[u8]) -> Option<EapResult> {
        let message = match EapMessage::try_parse(packet) {
            Ok(message) => message,
            Err(error) => {
                warn!("Dropping malformed EAP packet: {error}");
                return None;
            }
        };
        if self.finished {
            debug!("Dropping EAP packet after the conversation finished");
            return None;
        }

        match message.code {
            EapCode::Success => {
                self.finished = true;
                let (msk, emsk) = self
                    .active
                    .as_ref()
                    .and_then(Method::keys)
                    .unwrap_or_default();
                if let Some(active) = self.active.as_mut() {
                    active.finalize();
                }
                Some(EapResult::Success { msk, emsk })
            }
            EapCode::Failure => {
                self.finished = true;
                if let Some(active) = self.active.as_mut() {
                    active.finalize();
                }
                Some(EapResult::Failure)
            }
            // the peer side never receives responses
            EapCode::Response => None,
            EapCode::Request => self.process_request(&message),
        }
    }

    fn process_request(&mut self, message: &EapMessage) -> Option<EapResult> {
        // a retransmitted request is answered with the cached response,
        // without running the state machine again
        if let Some((identifier, cached)) = &self.last_answered {
            if *identifier == message.identifier {
                debug!("Retransmitting the response to request {identifier}");
                return Some(EapResult::Response(cached.clone()));
            }
        }

        let Some(data) = &message.data else {
            return None;
        };

        let result = match data.eap_type {
            TYPE_IDENTITY => EapResult::Response(
                EapMessage::new(
                    EapCode::Response,
                    message.identifier,
                    TYPE_IDENTITY,
                    self.config.identity.clone(),
                )
                .build(),
            ),
            TYPE_NOTIFICATION => {
                debug!(
                    "EAP notification: {}",
                    String::from_utf8_lossy(&data.type_data)
                );
                EapResult::Response(
                    EapMessage::new(
                        EapCode::Response,
                        message.identifier,
                        TYPE_NOTIFICATION,
                        vec![],
                    )
                    .build(),
                )
            }
            TYPE_NAK => {
                warn!("Nak is a response type and not valid in a request");
                return Some(EapResult::Error(EapError::InvalidRequest));
            }
            requested => match self.dispatch_method(message, requested) {
                Some(result) => result,
                None => return Some(EapResult::Error(EapError::InvalidRequest)),
            },
        };

        if let EapResult::Response(bytes) = &result {
            self.last_answered = Some((message.identifier, bytes.clone()));
        }
        Some(result)
    }

    fn dispatch_method(&mut self, message: &EapMessage, requested: u8) -> Option<EapResult> {
        if let Some(active) = self.active.as_mut() {
            // a method switch mid-conversation is an ordering violation
            if active.method_type() as u8 != requested {
                return None;
            }
            return Some(active.process(message));
        }

        let Some(method) = EapMethodType::iter().find(|m| *m as u8 == requested) else {
            debug!("Server proposed unknown method {requested}, sending Nak");
            return Some(self.nak(message.identifier));
        };
        if !self.config.supports(method) {
            debug!("Server proposed unconfigured method {requested}, sending Nak");
            return Some(self.nak(message.identifier));
        }

        let mut machine = self.create_method(method)?;
        let result = machine.process(message);
        self.active = Some(machine);
        Some(result)
    }

    fn create_method(&self, method: EapMethodType) -> Option<Method> {
        let identity = self.config.identity.clone();
        Some(match method {
            EapMethodType::Sim => Method::Sim(sim::EapSimMethod::new(
                self.config.sim.clone()?,
                self.authenticator.clone(),
                identity,
            )),
            EapMethodType::Aka => Method::Aka(aka::EapAkaMethod::new(
                self.config.aka.clone()?,
                self.authenticator.clone(),
                identity,
            )),
            EapMethodType::AkaPrime => Method::AkaPrime(aka_prime::EapAkaPrimeMethod::new(
                self.config.aka_prime.clone()?,
                self.authenticator.clone(),
                identity,
            )),
            EapMethodType::MsChapV2 => Method::MsChapV2(mschapv2::EapMsChapV2Method::new(
                self.config.mschapv2.clone()?,
            )),
            EapMethodType::Ttls => Method::Ttls(ttls::EapTtlsMethod::new(
                self.config.ttls.clone()?,
                self.authenticator.clone(),
                self.tls_factory.clone(),
            )),
        })
    }

    /// A legacy Nak listing every configured method in type order
    fn nak(&self, identifier: u8) -> EapResult {
        let methods: Vec<u8> = EapMethodType::iter()
            .filter(|m| self.config.supports(*m))
            .map(|m| m as u8)
            .collect();
        EapResult::Response(
            EapMessage::new(EapCode::Response, identifier, TYPE_NAK, methods).build(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_auth::{AppType, GsmTriplet, SimAuthError, UmtsResult};
    use crate::tls::{TlsError, TlsSession};

    struct FakeSim;

    impl SimAuthenticator for FakeSim {
        fn gsm_auth(
            &self,
            _sub_id: i32,
            _app_type: AppType,
            rand: &[u8; 16],
        ) -> Result<GsmTriplet, SimAuthError> {
            Ok(GsmTriplet {
                sres: [rand[0]; 4],
                kc: [rand[1]; 8],
            })
        }

        fn umts_auth(
            &self,
            _sub_id: i32,
            _app_type: AppType,
            _rand: &[u8; 16],
            _autn: &[u8; 16],
        ) -> Result<UmtsResult, SimAuthError> {
            Ok(UmtsResult::AuthenticationReject)
        }
    }

    struct NoTlsFactory;

    impl TlsSessionFactory for NoTlsFactory {
        fn create(&self, _trusted_ca: Option<&[u8]>) -> Result<Box<dyn TlsSession>, TlsError> {
            Err(TlsError("no TLS in this test".into()))
        }
    }

    fn session() -> EapSession {
        let config = EapSessionConfig::builder()
            .identity(b"0user@realm".to_vec())
            .aka(7, AppType::Usim)
            .build()
            .unwrap_or_default();
        EapSession::new(config, Arc::new(FakeSim), Arc::new(NoTlsFactory))
    }

    #[test]
    fn success_finalizes_any_machine() {
        let mut s = session();
        assert_eq!(
            s.process(&[0x03, 0x10, 0x00, 0x04]),
            Some(EapResult::Success {
                msk: vec![],
                emsk: vec![],
            })
        );
        // anything after the conversation finished is dropped
        assert_eq!(s.process(&[0x01, 0x11, 0x00, 0x05, 0x01]), None);
    }

    #[test]
    fn failure_finalizes_any_machine() {
        let mut s = session();
        assert_eq!(s.process(&[0x04, 0x10, 0x00, 0x04]), Some(EapResult::Failure));
    }

    #[test]
    fn notification_yields_canonical_response() {
        let mut s = session();
        let result = s.process(&[0x01, 0x30, 0x00, 0x08, 0x02, 0xaa, 0xbb, 0xcc]);
        assert_eq!(
            result,
            Some(EapResult::Response(vec![0x02, 0x30, 0x00, 0x05, 0x02]))
        );
        // notifications do not change state: a fresh request still works
        let identity = s.process(&[0x01, 0x31, 0x00, 0x05, 0x01]);
        assert!(matches!(identity, Some(EapResult::Response(_))));
    }

    #[test]
    fn identity_request_is_answered_with_configured_identity() {
        let mut s = session();
        let result = s.process(&[0x01, 0x01, 0x00, 0x05, 0x01]);
        let Some(EapResult::Response(bytes)) = result else {
            panic!("expected an identity response");
        };
        assert_eq!(&bytes[..5], &[0x02, 0x01, 0x00, 0x10, 0x01]);
        assert_eq!(&bytes[5..], b"0user@realm");
    }

    #[test]
    fn unconfigured_method_is_answered_with_nak() {
        let mut s = session();
        // server proposes EAP-SIM (18), only AKA is configured
        let result = s.process(&[0x01, 0x02, 0x00, 0x08, 0x12, 0x0a, 0x00, 0x00]);
        assert_eq!(
            result,
            Some(EapResult::Response(vec![
                0x02, 0x02, 0x00, 0x06, 0x03, 0x17
            ]))
        );
    }

    #[test]
    fn malformed_packet_is_dropped() {
        let mut s = session();
        assert_eq!(s.process(&[0x01, 0x02, 0x00]), None);
        assert_eq!(s.process(&[0x09, 0x02, 0x00, 0x04]), None);
    }

    #[test]
    fn duplicate_request_is_answered_from_the_cache() {
        let mut s = session();
        let first = s.process(&[0x01, 0x05, 0x00, 0x05, 0x01]);
        let second = s.process(&[0x01, 0x05, 0x00, 0x05, 0x01]);
        assert_eq!(first, second);
    }

    #[test]
    fn stale_response_code_is_dropped() {
        let mut s = session();
        assert_eq!(s.process(&[0x02, 0x05, 0x00, 0x05, 0x01]), None);
    }
}
