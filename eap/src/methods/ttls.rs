//! The EAP-TTLS method state machine (RFC 5281)
//!
//! Phase 1 drives the injected TLS client, carrying its records across as
//! many EAP round trips as needed with the L/M/S fragmentation flags.
//! Phase 2 runs a nested EAP session whose packets travel inside
//! EAP-Message AVPs encrypted through the TLS channel; the nested
//! configuration never contains EAP-TTLS itself.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};

use crate::avp::{Avp, AVP_CODE_EAP_MESSAGE};
use crate::config::EapTtlsConfig;
use crate::message::{EapCode, EapMessage, EapMethodType};
use crate::session::EapSession;
use crate::sim_auth::SimAuthenticator;
use crate::tls::{TlsSession, TlsSessionFactory, TlsStatus};
use crate::{EapError, EapResult};

/// Flag bit: the four-octet message length field is present
pub const FLAG_LENGTH: u8 = 0x80;
/// Flag bit: more fragments follow
pub const FLAG_MORE: u8 = 0x40;
/// Flag bit: this request starts the TTLS conversation
pub const FLAG_START: u8 = 0x20;

/// Largest TLS record chunk shipped in a single EAP-TTLS packet
const FRAGMENT_SIZE: usize = 1014;

#[derive(Debug, PartialEq, Eq)]
enum TtlsPhase {
    Created,
    Handshake,
    Tunnel,
    Final,
}

/// The EAP-TTLS state machine:
/// `Created -> Handshake -> Tunnel -> Final`
pub struct EapTtlsMethod {
    config: EapTtlsConfig,
    authenticator: Arc<dyn SimAuthenticator>,
    factory: Arc<dyn TlsSessionFactory>,
    phase: TtlsPhase,
    tls: Option<Box<dyn TlsSession>>,
    inner: Option<Box<EapSession>>,
    /// reassembly buffer for inbound fragments
    inbound: Vec<u8>,
    /// outbound fragments not yet shipped, chunked and flagged
    outbound: VecDeque<Vec<u8>>,
    keys: Option<(Vec<u8>, Vec<u8>)>,
}

impl EapTtlsMethod {
    /// Create a fresh machine
    pub fn new(
        config: EapTtlsConfig,
        authenticator: Arc<dyn SimAuthenticator>,
        factory: Arc<dyn TlsSessionFactory>,
    ) -> Self {
        Self {
            config,
            authenticator,
            factory,
            phase: TtlsPhase::Created,
            tls: None,
            inner: None,
            inbound: vec![],
            outbound: VecDeque::new(),
            keys: None,
        }
    }

    pub(crate) fn keys(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.keys.clone()
    }

    pub(crate) fn finalize(&mut self) {
        self.phase = TtlsPhase::Final;
    }

    pub(crate) fn process(&mut self, message: &EapMessage) -> EapResult {
        let Some(data) = &message.data else {
            return EapResult::Error(EapError::InvalidRequest);
        };
        let Some((flags, fragment)) = split_type_data(&data.type_data) else {
            return EapResult::Error(EapError::InvalidRequest);
        };

        if flags & FLAG_START == FLAG_START {
            return self.process_start(message.identifier);
        }

        if flags & FLAG_MORE == FLAG_MORE {
            // buffer the fragment and acknowledge it with an empty packet
            self.inbound.extend_from_slice(fragment);
            return self.ack(message.identifier);
        }

        if fragment.is_empty() && self.inbound.is_empty() {
            // a bare acknowledgment releases our next pending fragment
            return match self.outbound.pop_front() {
                Some(next) => self.respond(message.identifier, next),
                None => EapResult::Error(EapError::InvalidRequest),
            };
        }

        self.inbound.extend_from_slice(fragment);
        let assembled = std::mem::take(&mut self.inbound);
        match self.phase {
            TtlsPhase::Handshake => self.process_handshake(message.identifier, &assembled),
            TtlsPhase::Tunnel => self.process_tunnel(message.identifier, &assembled),
            _ => EapResult::Error(EapError::InvalidRequest),
        }
    }

    fn process_start(&mut self, identifier: u8) -> EapResult {
        if self.phase != TtlsPhase::Created {
            return EapResult::Error(EapError::InvalidRequest);
        }
        let mut tls = match self.factory.create(self.config.trusted_ca.as_deref()) {
            Ok(tls) => tls,
            Err(error) => return EapResult::Error(EapError::Tls(error)),
        };
        let output = match tls.start_handshake() {
            Ok(output) => output,
            Err(error) => return EapResult::Error(EapError::Tls(error)),
        };
        self.tls = Some(tls);
        self.phase = TtlsPhase::Handshake;
        self.queue_records(&output.records);
        match self.outbound.pop_front() {
            Some(first) => self.respond(identifier, first),
            None => EapResult::Error(EapError::Internal("TLS produced no ClientHello")),
        }
    }

    fn process_handshake(&mut self, identifier: u8, records: &[u8]) -> EapResult {
        let Some(tls) = self.tls.as_mut() else {
            return EapResult::Error(EapError::Internal("handshake phase without TLS session"));
        };
        let output = match tls.process_handshake(records) {
            Ok(output) => output,
            Err(error) => return EapResult::Error(EapError::Tls(error)),
        };
        match output.status {
            TlsStatus::Failed => {
                warn!("TLS handshake failed");
                EapResult::Error(EapError::Internal("TLS handshake failed"))
            }
            TlsStatus::HandshakeInProgress => {
                if output.records.is_empty() {
                    return EapResult::Error(EapError::Internal(
                        "TLS made no progress during the handshake",
                    ));
                }
                self.queue_records(&output.records);
                match self.outbound.pop_front() {
                    Some(first) => self.respond(identifier, first),
                    None => EapResult::Error(EapError::Internal("empty handshake flight")),
                }
            }
            TlsStatus::HandshakeComplete => {
                let material = match tls.export_key_material() {
                    Ok(material) => material,
                    Err(error) => return EapResult::Error(EapError::Tls(error)),
                };
                self.keys = Some((material[..64].to_vec(), material[64..].to_vec()));
                self.inner = Some(Box::new(EapSession::new(
                    (*self.config.inner).clone(),
                    self.authenticator.clone(),
                    self.factory.clone(),
                )));
                self.phase = TtlsPhase::Tunnel;
                debug!("TLS handshake complete, entering the tunnel phase");
                if output.records.is_empty() {
                    self.ack(identifier)
                } else {
                    self.queue_records(&output.records);
                    match self.outbound.pop_front() {
                        Some(first) => self.respond(identifier, first),
                        None => self.ack(identifier),
                    }
                }
            }
        }
    }

    fn process_tunnel(&mut self, identifier: u8, records: &[u8]) -> EapResult {
        let Some(tls) = self.tls.as_mut() else {
            return EapResult::Error(EapError::Internal("tunnel phase without TLS session"));
        };
        let plaintext = match tls.decrypt(records) {
            Ok(plaintext) => plaintext,
            Err(error) => return EapResult::Error(EapError::Tls(error)),
        };
        let avps = match Avp::parse_stream(&plaintext) {
            Ok(avps) => avps,
            Err(error) => {
                warn!("Malformed AVP stream in the TTLS tunnel: {error}");
                return EapResult::Error(EapError::InvalidRequest);
            }
        };
        let Some(eap_avp) = avps.iter().find(|avp| avp.code == AVP_CODE_EAP_MESSAGE) else {
            warn!("TTLS tunnel data without an EAP-Message AVP");
            return EapResult::Error(EapError::InvalidRequest);
        };

        let Some(inner) = self.inner.as_mut() else {
            return EapResult::Error(EapError::Internal("tunnel phase without inner session"));
        };
        match inner.process(&eap_avp.data) {
            Some(EapResult::Response(inner_packet)) => {
                let wrapped = Avp::eap_message(inner_packet).build();
                let Some(tls) = self.tls.as_mut() else {
                    return EapResult::Error(EapError::Internal("TLS session vanished"));
                };
                match tls.encrypt(&wrapped) {
                    Ok(records) => {
                        self.queue_records(&records);
                        match self.outbound.pop_front() {
                            Some(first) => self.respond(identifier, first),
                            None => EapResult::Error(EapError::Internal("empty tunnel flight")),
                        }
                    }
                    Err(error) => EapResult::Error(EapError::Tls(error)),
                }
            }
            Some(EapResult::Error(error)) => EapResult::Error(error),
            Some(EapResult::Success { .. }) | Some(EapResult::Failure) | None => {
                // the inner conversation concludes through the outer
                // Success or Failure frame, not inside the tunnel
                EapResult::Error(EapError::InvalidRequest)
            }
        }
    }

    /// Chunk outbound TLS records into flagged EAP-TTLS type data blobs
    fn queue_records(&mut self, records: &[u8]) {
        if records.is_empty() {
            return;
        }
        let chunks: Vec<&[u8]> = records.chunks(FRAGMENT_SIZE).collect();
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut type_data = vec![];
            if total == 1 {
                type_data.push(0);
            } else if i == 0 {
                // the first of several fragments carries the total length
                type_data.push(FLAG_LENGTH | FLAG_MORE);
                type_data.extend_from_slice(&(records.len() as u32).to_be_bytes());
            } else if i < total - 1 {
                type_data.push(FLAG_MORE);
            } else {
                type_data.push(0);
            }
            type_data.extend_from_slice(chunk);
            self.outbound.push_back(type_data);
        }
    }

    fn respond(&self, identifier: u8, type_data: Vec<u8>) -> EapResult {
        EapResult::Response(
            EapMessage::new(
                EapCode::Response,
                identifier,
                EapMethodType::Ttls as u8,
                type_data,
            )
            .build(),
        )
    }

    fn ack(&self, identifier: u8) -> EapResult {
        self.respond(identifier, vec![0])
    }
}

/// Split TTLS type data into the flag octet and the record fragment,
/// skipping the four-octet message length when the L flag announces it
fn split_type_data(type_data: &[u8]) -> Option<(u8, &[u8])> {
    let (flags, rest) = type_data.split_first()?;
    if flags & FLAG_LENGTH == FLAG_LENGTH {
        if rest.len() < 4 {
            return None;
        }
        Some((*flags, &rest[4..]))
    } else {
        Some((*flags, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EapSessionConfig;
    use crate::sim_auth::{AppType, GsmTriplet, SimAuthError, UmtsResult};
    use crate::tls::{TlsError, TlsOutput};

    struct FakeSim;

    impl SimAuthenticator for FakeSim {
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
            Err(SimAuthError::NoSuchApplication(0))
        }
    }

    /// A TLS stand-in that completes its handshake in one round trip and
    /// passes tunnel data through unchanged
    struct NullTls {
        complete: bool,
    }

    impl TlsSession for NullTls {
        fn start_handshake(&mut self) -> Result<TlsOutput, TlsError> {
            Ok(TlsOutput {
                records: vec![0x16, 0x03, 0x03, 0x00, 0x01, 0x01],
                status: TlsStatus::HandshakeInProgress,
            })
        }

        fn process_handshake(&mut self, _records: &[u8]) -> Result<TlsOutput, TlsError> {
            self.complete = true;
            Ok(TlsOutput {
                records: vec![0x16, 0x03, 0x03, 0x00, 0x01, 0x14],
                status: TlsStatus::HandshakeComplete,
            })
        }

        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TlsError> {
            Ok(plaintext.to_vec())
        }

        fn decrypt(&mut self, records: &[u8]) -> Result<Vec<u8>, TlsError> {
            Ok(records.to_vec())
        }

        fn export_key_material(&mut self) -> Result<[u8; 128], TlsError> {
            if self.complete {
                Ok([0x6b; 128])
            } else {
                Err(TlsError("handshake not complete".into()))
            }
        }
    }

    struct NullTlsFactory;

    impl TlsSessionFactory for NullTlsFactory {
        fn create(&self, _trusted_ca: Option<&[u8]>) -> Result<Box<dyn TlsSession>, TlsError> {
            Ok(Box::new(NullTls { complete: false }))
        }
    }

    fn machine() -> EapTtlsMethod {
        let inner = EapSessionConfig::builder()
            .mschapv2("user".into(), "pass".into())
            .build()
            .unwrap_or_default();
        EapTtlsMethod::new(
            EapTtlsConfig {
                trusted_ca: None,
                inner: Box::new(inner),
            },
            Arc::new(FakeSim),
            Arc::new(NullTlsFactory),
        )
    }

    fn request(identifier: u8, type_data: Vec<u8>) -> EapMessage {
        EapMessage::new(
            EapCode::Request,
            identifier,
            EapMethodType::Ttls as u8,
            type_data,
        )
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn start_produces_client_hello_and_tunnel_follows() {
        let mut m = machine();

        // start flag set, no data
        let EapResult::Response(bytes) = m.process(&request(1, vec![FLAG_START])) else {
            panic!("expected the ClientHello response");
        };
        let hello = EapMessage::try_parse(&bytes).unwrap();
        let hello_data = hello.data.unwrap().type_data;
        assert_eq!(hello_data[0], 0); // single unfragmented record
        assert_eq!(&hello_data[1..], &[0x16, 0x03, 0x03, 0x00, 0x01, 0x01]);
        assert_eq!(m.phase, TtlsPhase::Handshake);

        // the server flight completes the handshake
        let mut server_flight = vec![0u8];
        server_flight.extend_from_slice(&[0x16, 0x03, 0x03, 0x00, 0x02, 0x02, 0x0e]);
        let EapResult::Response(_) = m.process(&request(2, server_flight)) else {
            panic!("expected the finished flight response");
        };
        assert_eq!(m.phase, TtlsPhase::Tunnel);
        assert!(m.keys().is_some());

        // a tunnelled inner MSCHAPv2 challenge reaches the inner session
        let inner_challenge = {
            let mut challenge_data = vec![1u8, 0x2a, 0, 0, 16];
            challenge_data.extend_from_slice(&[0x11; 16]);
            challenge_data.extend_from_slice(b"srv");
            let ms_length = challenge_data.len() as u16;
            challenge_data[2..4].copy_from_slice(&ms_length.to_be_bytes());
            EapMessage::new(EapCode::Request, 3, EapMethodType::MsChapV2 as u8, challenge_data)
        };
        let mut tunnel_data = vec![0u8];
        tunnel_data.extend(Avp::eap_message(inner_challenge.build()).build());
        let EapResult::Response(bytes) = m.process(&request(3, tunnel_data)) else {
            panic!("expected a tunnelled response");
        };
        let outer = EapMessage::try_parse(&bytes).unwrap();
        let outer_data = outer.data.unwrap().type_data;
        // the NullTls passes AVPs through unchanged, so the inner
        // response is visible behind the flag octet
        let avps = Avp::parse_stream(&outer_data[1..]).unwrap();
        assert_eq!(avps.len(), 1);
        let inner_response = EapMessage::try_parse(&avps[0].data).unwrap();
        assert_eq!(inner_response.code, EapCode::Response);
        assert_eq!(inner_response.data.unwrap().eap_type, EapMethodType::MsChapV2 as u8);
    }

    #[test]
    fn start_twice_is_invalid() {
        let mut m = machine();
        m.process(&request(1, vec![FLAG_START]));
        assert_eq!(
            m.process(&request(2, vec![FLAG_START])),
            EapResult::Error(EapError::InvalidRequest)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn fragments_are_buffered_until_the_last_one() {
        let mut m = machine();
        m.process(&request(1, vec![FLAG_START]));

        // first fragment with length and more flags set
        let mut first = vec![FLAG_LENGTH | FLAG_MORE, 0, 0, 0, 4, 0xde, 0xad];
        let EapResult::Response(ack) = m.process(&request(2, first.drain(..).collect())) else {
            panic!("expected an acknowledgment");
        };
        let parsed = EapMessage::try_parse(&ack).unwrap();
        assert_eq!(parsed.data.unwrap().type_data, vec![0]);

        // the final fragment completes the flight and advances the phase
        let EapResult::Response(_) = m.process(&request(3, vec![0, 0xbe, 0xef])) else {
            panic!("expected the next handshake flight");
        };
        assert_eq!(m.phase, TtlsPhase::Tunnel);
    }
}
