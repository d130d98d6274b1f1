//! The IKE session state machine
//!
//! One session is one logical worker: a `select!` loop over the inbound
//! packet channel, the command channel and the retransmission, reassembly
//! and handshake timers. All session state is owned by the worker, so no
//! locks guard it.
//!
//! States: `Initial -> IkeInit -> IkeAuth(EAP) -> Idle <->
//! {CreateChild, Rekey, Info, Delete} -> Closed`.

use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use eap::session::EapSession;
use eap::sim_auth::SimAuthenticator;
use eap::tls::TlsSessionFactory;
use eap::EapResult;
use ikev2_wire::definitions::params::{
    AuthMethod, ExchangeType, NotifyError, NotifyStatus, Protocol,
};
use ikev2_wire::definitions::{
    Authentication, Identification, IkeMessage, KeyExchange, Notification, NotifyType, Payload,
    Proposal, SecurityAssociation,
};
use ikev2_wire::parser::{decode_payload_list, DecodeError};
use ikev2_wire::IKE_HEADER_LEN;

use crate::child::{
    accept_chosen_proposal, accept_narrowed_selectors, describe_proposal, narrow_selectors,
    rekey_tie_break_lost, EstablishedChild,
};
use crate::config::{AuthConfig, ChildSessionConfig, IkeSessionConfig};
use crate::crypto::keymat::{
    derive_child_keys, derive_ike_keys, derive_rekeyed_ike_keys, IkeKeys,
};
use crate::crypto::{
    default_suite_factory, CryptoError, CryptoSuite, CryptoSuiteFactory, DhGroup, DhKeyPair,
};
use crate::envelope::{self, FragmentBuffer, MessageMeta};
use crate::exchange::{ExchangeKind, PendingRequest};
use crate::transport::{ChildSaInstall, PacketTransport, SaInstaller};
use crate::{IkeInternalError, IkeProtocolError};

/// Key pad constant of the shared-key AUTH computation (RFC 7296, 2.15)
const KEY_PAD: &[u8] = b"Key Pad for IKEv2";

/// The lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SessionState {
    Initial,
    IkeInit,
    IkeAuth,
    IkeAuthEap,
    Idle,
    CreateChild,
    RekeyIke,
    Informational,
    Deleting,
    Closed,
}

/// Why the session reached [SessionState::Closed]
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CloseReason {
    LocalClose,
    PeerDeleted,
    PeerDead,
    HandshakeTimeout,
    Protocol(IkeProtocolError),
    Internal(String),
}

/// Notifications the session emits towards its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The IKE SA is up and authenticated
    Established,
    /// A child SA pair was installed
    ChildSaEstablished {
        /// Local inbound SPI of the pair
        local_spi: u32,
    },
    /// A child SA pair was removed
    ChildSaDeleted {
        /// Local inbound SPI of the pair
        local_spi: u32,
    },
    /// The IKE SA was replaced by a rekey
    IkeSaRekeyed,
    /// The peer answered an empty INFORMATIONAL
    LivenessConfirmed,
    /// The session is gone
    Closed(CloseReason),
}

/// Commands the owner sends into the session worker
#[derive(Debug)]
pub enum SessionCommand {
    /// Negotiate an additional child SA
    CreateChild(ChildSessionConfig),
    /// Rekey the child SA with the given local SPI
    RekeyChild {
        /// Local inbound SPI of the pair being replaced
        local_spi: u32,
    },
    /// Rekey the IKE SA itself
    RekeyIke,
    /// Send an empty INFORMATIONAL to probe the peer
    CheckLiveness,
    /// Delete the IKE SA and close down
    Close,
}

/// The write half handed to the embedder: packets from the socket and
/// commands from the control plane both funnel into the session worker
#[derive(Clone)]
pub struct IkeSessionHandle {
    packets: mpsc::UnboundedSender<Vec<u8>>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl IkeSessionHandle {
    /// Deliver one datagram received for this session
    pub fn deliver_packet(&self, packet: Vec<u8>) {
        let _ = self.packets.send(packet);
    }

    /// Enqueue a command
    pub fn send_command(&self, command: SessionCommand) {
        let _ = self.commands.send(command);
    }
}

/// The SPI-to-session index shared by all sessions bound to one socket
///
/// Mutated only on the worker that owns it; the packet dispatcher reads
/// the initiator SPI from the header and routes the datagram.
#[derive(Default)]
pub struct SessionIndex {
    sessions: HashMap<u64, IkeSessionHandle>,
}

impl SessionIndex {
    /// Register a session under its local initiator SPI
    pub fn insert(&mut self, initiator_spi: u64, handle: IkeSessionHandle) {
        self.sessions.insert(initiator_spi, handle);
    }

    /// Drop a session from the index
    pub fn remove(&mut self, initiator_spi: u64) {
        self.sessions.remove(&initiator_spi);
    }

    /// Route one datagram by the initiator SPI of its header
    pub fn route(&self, packet: Vec<u8>) {
        if packet.len() < IKE_HEADER_LEN {
            trace!("Datagram shorter than an IKE header ignored");
            return;
        }
        let mut spi = [0u8; 8];
        spi.copy_from_slice(&packet[..8]);
        match self.sessions.get(&u64::from_be_bytes(spi)) {
            Some(handle) => handle.deliver_packet(packet),
            None => debug!("Datagram for unknown IKE SA ignored"),
        }
    }
}

/// Context of the IKE_SA_INIT exchange, kept until authentication needs it
struct InitContext {
    ke: DhKeyPair,
    nonce_i: Vec<u8>,
    nonce_r: Vec<u8>,
    raw_request: Vec<u8>,
    raw_response: Vec<u8>,
    cookie: Option<Vec<u8>>,
    cookie_retried: bool,
    ke_retried: bool,
}

/// Context of an outstanding CREATE_CHILD_SA we initiated
struct ChildNegotiation {
    config: ChildSessionConfig,
    proposals: Vec<Proposal>,
    nonce_i: Vec<u8>,
    rekeyed_spi: Option<u32>,
    /// set when a simultaneous rekey tie break went against us
    lost_tie_break: bool,
}

/// Context of an outstanding IKE rekey we initiated
struct IkeRekeyNegotiation {
    proposals: Vec<Proposal>,
    ke: DhKeyPair,
    nonce_i: Vec<u8>,
    new_local_spi: u64,
}

/// One IKE session worker
pub struct IkeSession {
    config: IkeSessionConfig,
    transport: Arc<dyn PacketTransport>,
    installer: Arc<dyn SaInstaller>,
    sim: Arc<dyn SimAuthenticator>,
    tls_factory: Arc<dyn TlsSessionFactory>,
    suite_factory: CryptoSuiteFactory,
    events: mpsc::UnboundedSender<SessionEvent>,
    packets: mpsc::UnboundedReceiver<Vec<u8>>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,

    state: SessionState,
    local_spi: u64,
    remote_spi: u64,
    suite: Option<CryptoSuite>,
    keys: Option<IkeKeys>,
    next_request_id: u32,
    expected_peer_id: u32,
    pending: Option<PendingRequest>,
    last_response: Option<(u32, Vec<Vec<u8>>)>,
    reassembly: Option<FragmentBuffer>,
    handshake_deadline: Instant,
    peer_supports_fragmentation: bool,

    init: Option<InitContext>,
    eap: Option<EapSession>,
    eap_msk: Option<Vec<u8>>,
    idr_body: Option<Vec<u8>>,
    child_negotiation: Option<ChildNegotiation>,
    ike_rekey: Option<IkeRekeyNegotiation>,
    children: Vec<EstablishedChild>,
}

impl IkeSession {
    /// Create a session worker together with its handle and event stream
    pub fn new(
        config: IkeSessionConfig,
        transport: Arc<dyn PacketTransport>,
        installer: Arc<dyn SaInstaller>,
        sim: Arc<dyn SimAuthenticator>,
        tls_factory: Arc<dyn TlsSessionFactory>,
        suite_factory: Option<CryptoSuiteFactory>,
    ) -> (
        Self,
        IkeSessionHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handshake_deadline = Instant::now() + config.handshake_timeout;
        let session = Self {
            config,
            transport,
            installer,
            sim,
            tls_factory,
            suite_factory: suite_factory.unwrap_or_else(default_suite_factory),
            events: event_tx,
            packets: packet_rx,
            commands: command_rx,
            state: SessionState::Initial,
            local_spi: loop {
                let spi = rand::random::<u64>();
                if spi != 0 {
                    break spi;
                }
            },
            remote_spi: 0,
            suite: None,
            keys: None,
            next_request_id: 0,
            expected_peer_id: 0,
            pending: None,
            last_response: None,
            reassembly: None,
            handshake_deadline,
            peer_supports_fragmentation: false,
            init: None,
            eap: None,
            eap_msk: None,
            idr_body: None,
            child_negotiation: None,
            ike_rekey: None,
            children: vec![],
        };
        let handle = IkeSessionHandle {
            packets: packet_tx,
            commands: command_tx,
        };
        (session, handle, event_rx)
    }

    /// The SPI this session registered in the [SessionIndex]
    pub fn local_spi(&self) -> u64 {
        self.local_spi
    }

    /// The current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion: kicks off IKE_SA_INIT and then
    /// serves packets, commands and timers until the session closes
    #[instrument(skip(self), fields(spi = self.local_spi))]
    pub async fn run(mut self) {
        if let Err(error) = self.start() {
            self.close(CloseReason::Internal(error.to_string()));
            return;
        }

        while self.state != SessionState::Closed {
            let deadline = self.earliest_deadline();
            select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.close(CloseReason::LocalClose),
                },
                packet = self.packets.recv() => match packet {
                    Some(packet) => self.handle_packet(&packet),
                    None => self.close(CloseReason::LocalClose),
                },
                _ = sleep_until(deadline) => self.handle_timer(),
            }
        }
    }

    fn earliest_deadline(&self) -> Instant {
        let mut deadline = match self.state {
            SessionState::Idle | SessionState::Closed => None,
            _ if self.keys.is_none() || self.eap.is_some() => Some(self.handshake_deadline),
            _ => None,
        };
        if let Some(pending) = &self.pending {
            deadline = Some(match deadline {
                Some(d) => d.min(pending.deadline),
                None => pending.deadline,
            });
        }
        if let Some(reassembly) = &self.reassembly {
            deadline = Some(match deadline {
                Some(d) => d.min(reassembly.deadline),
                None => reassembly.deadline,
            });
        }
        // idle sessions with nothing outstanding sleep for a long time
        deadline.unwrap_or_else(|| Instant::now() + std::time::Duration::from_secs(3600))
    }

    // ---- outbound ----------------------------------------------------

    fn start(&mut self) -> Result<(), IkeInternalError> {
        let group = self
            .config
            .proposals
            .iter()
            .flat_map(Proposal::dh_transforms)
            .find(|g| DhGroup::supported(*g))
            .ok_or(CryptoError::UnsupportedTransform)?;
        let ke = DhGroup::generate(group)?;
        let mut nonce_i = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_i);
        self.init = Some(InitContext {
            ke,
            nonce_i,
            nonce_r: vec![],
            raw_request: vec![],
            raw_response: vec![],
            cookie: None,
            cookie_retried: false,
            ke_retried: false,
        });
        self.send_sa_init()
    }

    /// Build and send the IKE_SA_INIT request; reused for the cookie and
    /// INVALID_KE retries, which must keep nonce and KE data identical
    fn send_sa_init(&mut self) -> Result<(), IkeInternalError> {
        let Some(init) = &self.init else {
            return Ok(());
        };
        let mut payloads = vec![];
        if let Some(cookie) = &init.cookie {
            // the cookie notify must be the first payload of the retry
            payloads.push(Payload::Notify(Notification::status(
                NotifyStatus::Cookie,
                cookie.clone(),
            )));
        }
        payloads.push(Payload::SecurityAssociation(SecurityAssociation {
            proposals: self.config.proposals.clone(),
        }));
        payloads.push(Payload::KeyExchange(KeyExchange {
            dh_group: init.ke.group_id(),
            data: init.ke.public_value().to_vec(),
        }));
        payloads.push(Payload::Nonce(init.nonce_i.clone()));
        payloads.push(Payload::Notify(Notification::status(
            NotifyStatus::NatDetectionSourceIp,
            nat_detection_hash(self.local_spi, 0, &self.config.local),
        )));
        payloads.push(Payload::Notify(Notification::status(
            NotifyStatus::NatDetectionDestinationIp,
            nat_detection_hash(self.local_spi, 0, &self.config.peer),
        )));
        payloads.push(Payload::Notify(Notification::status(
            NotifyStatus::FragmentationSupported,
            vec![],
        )));

        let message = IkeMessage {
            initiator_spi: self.local_spi,
            responder_spi: 0,
            exchange_type: ExchangeType::IkeSaInit,
            initiator: true,
            response: false,
            message_id: 0,
            payloads,
        };
        let packet = message.try_build()?;
        if let Some(init) = &mut self.init {
            init.raw_request = packet.clone();
        }
        self.state = SessionState::IkeInit;
        self.send_new_request(0, vec![packet], ExchangeKind::SaInit);
        Ok(())
    }

    fn send_new_request(&mut self, message_id: u32, packets: Vec<Vec<u8>>, kind: ExchangeKind) {
        for packet in &packets {
            if let Err(error) = self.transport.send(packet, self.config.peer) {
                warn!("Transport refused to send: {error}");
            }
        }
        self.pending = Some(PendingRequest::new(message_id, packets, kind));
        self.next_request_id = message_id + 1;
    }

    /// Seal inner payloads into a protected request and send it
    fn send_protected_request(
        &mut self,
        exchange_type: ExchangeType,
        inner: Vec<Payload>,
        kind: ExchangeKind,
    ) -> Result<(), IkeInternalError> {
        let message_id = self.next_request_id;
        let packets = self.seal(exchange_type, message_id, false, &inner)?;
        self.send_new_request(message_id, packets, kind);
        Ok(())
    }

    fn seal(
        &self,
        exchange_type: ExchangeType,
        message_id: u32,
        response: bool,
        inner: &[Payload],
    ) -> Result<Vec<Vec<u8>>, IkeInternalError> {
        let (Some(suite), Some(keys)) = (&self.suite, &self.keys) else {
            return Err(CryptoError::BadKeyLength.into());
        };
        let meta = MessageMeta {
            initiator_spi: self.local_spi,
            responder_spi: self.remote_spi,
            exchange_type,
            initiator: true,
            response,
            message_id,
        };
        envelope::seal(
            suite,
            &keys.sk_ei,
            &keys.sk_ai,
            &meta,
            inner,
            self.peer_supports_fragmentation
                .then_some(self.config.fragment_mtu),
        )
    }

    /// Seal and send a protected response to a peer request, caching it
    /// for retransmission
    fn send_protected_response(
        &mut self,
        exchange_type: ExchangeType,
        message_id: u32,
        inner: Vec<Payload>,
    ) {
        match self.seal(exchange_type, message_id, true, &inner) {
            Ok(packets) => {
                for packet in &packets {
                    if let Err(error) = self.transport.send(packet, self.config.peer) {
                        warn!("Transport refused to send: {error}");
                    }
                }
                self.last_response = Some((message_id, packets));
                self.expected_peer_id = message_id + 1;
            }
            Err(error) => error!("Could not build a response: {error}"),
        }
    }

    // ---- inbound -----------------------------------------------------

    fn handle_packet(&mut self, packet: &[u8]) {
        let message = match IkeMessage::try_parse(packet) {
            Ok(message) => message,
            Err(DecodeError::UnsupportedCriticalPayload(types)) => {
                warn!("Peer sent unsupported critical payloads {types:?}");
                // only the unprotected IKE_SA_INIT response can fail the
                // session from here; anything else is not authenticated
                if self.state == SessionState::IkeInit {
                    self.fail_from_peer(IkeProtocolError::UnsupportedCriticalPayload(types));
                }
                return;
            }
            Err(error) => {
                debug!("Discarding unparseable datagram: {error}");
                return;
            }
        };
        if message.initiator_spi != self.local_spi {
            debug!("Discarding datagram for another SA");
            return;
        }

        if message.response {
            self.handle_response(packet, message);
        } else {
            self.handle_peer_request(packet, message);
        }
    }

    fn handle_response(&mut self, raw: &[u8], message: IkeMessage) {
        let Some(pending) = &self.pending else {
            trace!("Response without an outstanding request dropped");
            return;
        };
        if message.message_id != pending.message_id {
            trace!(
                "Response for message {} does not match outstanding {}",
                message.message_id,
                pending.message_id
            );
            return;
        }

        if pending.kind == ExchangeKind::SaInit {
            self.pending = None;
            self.on_sa_init_response(raw, message);
            return;
        }

        // every later exchange is SK protected
        let Some(payloads) = self.open_protected(raw, &message) else {
            return;
        };
        let Some(pending) = self.pending.take() else {
            return;
        };
        match pending.kind {
            ExchangeKind::SaInit => {}
            ExchangeKind::Auth => self.on_auth_response(payloads),
            ExchangeKind::AuthEap => self.on_auth_eap_response(payloads),
            ExchangeKind::AuthFinal => self.on_auth_final_response(payloads),
            ExchangeKind::CreateChild { .. } => self.on_create_child_response(payloads),
            ExchangeKind::RekeyIke => self.on_rekey_ike_response(payloads),
            ExchangeKind::Liveness => {
                debug!("Liveness confirmed");
                self.state = SessionState::Idle;
                self.emit(SessionEvent::LivenessConfirmed);
            }
            ExchangeKind::DeleteChild => {
                self.state = SessionState::Idle;
            }
            ExchangeKind::DeleteIke => {
                self.close(CloseReason::LocalClose);
            }
        }
    }

    /// Decrypt the SK or SKF payload of a protected message; `None` means
    /// the packet was dropped (silently on integrity failure) or that a
    /// fragment set is still incomplete
    fn open_protected(&mut self, raw: &[u8], message: &IkeMessage) -> Option<Vec<Payload>> {
        let (Some(suite), Some(keys)) = (&self.suite, &self.keys) else {
            return None;
        };
        match message.payloads.first() {
            Some(Payload::Encrypted(sk)) => {
                let plain =
                    match envelope::open(suite, &keys.sk_er, &keys.sk_ar, raw, &sk.data) {
                        Ok(plain) => plain,
                        Err(_) => {
                            // never reveal why the packet was dropped
                            debug!("Discarding message that failed to open");
                            return None;
                        }
                    };
                match decode_payload_list(sk.first_inner, &plain) {
                    Ok(payloads) => Some(payloads),
                    Err(error) => {
                        warn!("Protected payload chain is malformed: {error}");
                        self.fail_from_peer(error.into());
                        None
                    }
                }
            }
            Some(Payload::EncryptedFragment(skf)) => {
                let plain =
                    match envelope::open(suite, &keys.sk_er, &keys.sk_ar, raw, &skf.data) {
                        Ok(plain) => plain,
                        Err(_) => {
                            debug!("Discarding fragment that failed to open");
                            return None;
                        }
                    };
                let deadline = Instant::now() + self.config.reassembly_timeout;
                let buffer = self.reassembly.get_or_insert_with(|| {
                    FragmentBuffer::new(message.message_id, skf.total_fragments, deadline)
                });
                if let Err(error) = buffer.insert(message.message_id, skf, plain) {
                    debug!("Fragment rejected: {error}");
                    return None;
                }
                if !buffer.is_complete() {
                    return None;
                }
                let (first_inner, assembled) = self.reassembly.take()?.assemble();
                match decode_payload_list(first_inner, &assembled) {
                    Ok(payloads) => Some(payloads),
                    Err(error) => {
                        warn!("Reassembled payload chain is malformed: {error}");
                        self.fail_from_peer(error.into());
                        None
                    }
                }
            }
            _ => {
                debug!("Expected a protected message, discarding");
                None
            }
        }
    }

    // ---- IKE_SA_INIT -------------------------------------------------

    fn on_sa_init_response(&mut self, raw: &[u8], message: IkeMessage) {
        // error and redirect notifies arrive unprotected in this exchange
        for payload in &message.payloads {
            let Payload::Notify(notify) = payload else {
                continue;
            };
            match notify.notify_type {
                NotifyType::Status(NotifyStatus::Cookie) => {
                    self.retry_with_cookie(notify.data.clone());
                    return;
                }
                NotifyType::Error(NotifyError::InvalidKeyExchangePayload) => {
                    self.retry_with_indicated_group(&notify.data);
                    return;
                }
                NotifyType::Error(error) => {
                    warn!("IKE_SA_INIT failed with {error:?}");
                    self.close(CloseReason::Protocol(IkeProtocolError::NoProposalChosen));
                    return;
                }
                _ => {}
            }
        }

        let sa = message.payloads.iter().find_map(|p| match p {
            Payload::SecurityAssociation(sa) => Some(sa),
            _ => None,
        });
        let ke = message.payloads.iter().find_map(|p| match p {
            Payload::KeyExchange(ke) => Some(ke),
            _ => None,
        });
        let nonce_r = message.payloads.iter().find_map(|p| match p {
            Payload::Nonce(nonce) => Some(nonce.clone()),
            _ => None,
        });
        let (Some(sa), Some(ke), Some(nonce_r)) = (sa, ke, nonce_r) else {
            self.fail_from_peer(IkeProtocolError::InvalidSyntax);
            return;
        };
        self.peer_supports_fragmentation = message.payloads.iter().any(|p| {
            matches!(
                p,
                Payload::Notify(n)
                    if n.notify_type == NotifyType::Status(NotifyStatus::FragmentationSupported)
            )
        });

        let Some(chosen) = sa.proposals.first() else {
            self.fail_from_peer(IkeProtocolError::NoProposalChosen);
            return;
        };
        let chosen = match accept_chosen_proposal(&self.config.proposals, chosen) {
            Ok(chosen) => chosen,
            Err(error) => {
                self.fail_from_peer(error);
                return;
            }
        };
        let suite = match (self.suite_factory)(&chosen) {
            Ok(suite) => suite,
            Err(error) => {
                warn!("Chosen proposal cannot be instantiated: {error}");
                self.fail_from_peer(IkeProtocolError::NoProposalChosen);
                return;
            }
        };
        info!("IKE SA proposal selected: {}", describe_proposal(&chosen));

        let Some(init) = self.init.as_mut() else {
            return;
        };
        if ke.dh_group != init.ke.group_id() {
            self.fail_from_peer(IkeProtocolError::InvalidKePayload);
            return;
        }
        let shared = match init.ke.compute_shared(&ke.data) {
            Ok(shared) => shared,
            Err(_) => {
                self.fail_from_peer(IkeProtocolError::InvalidKePayload);
                return;
            }
        };
        init.nonce_r = nonce_r.clone();
        init.raw_response = raw.to_vec();
        let nonce_i = init.nonce_i.clone();

        self.remote_spi = message.responder_spi;
        let keys = match derive_ike_keys(
            &suite,
            &nonce_i,
            &nonce_r,
            &shared,
            self.local_spi,
            self.remote_spi,
        ) {
            Ok(keys) => keys,
            Err(error) => {
                self.close(CloseReason::Internal(error.to_string()));
                return;
            }
        };
        self.suite = Some(suite);
        self.keys = Some(keys);

        if let Err(error) = self.send_ike_auth() {
            self.close(CloseReason::Internal(error.to_string()));
        }
    }

    fn retry_with_cookie(&mut self, cookie: Vec<u8>) {
        let Some(init) = self.init.as_mut() else {
            return;
        };
        if init.cookie_retried {
            warn!("Second cookie demand, giving up");
            self.close(CloseReason::Protocol(IkeProtocolError::TemporaryFailure));
            return;
        }
        init.cookie = Some(cookie);
        init.cookie_retried = true;
        debug!("Retrying IKE_SA_INIT with the demanded cookie");
        if let Err(error) = self.send_sa_init() {
            self.close(CloseReason::Internal(error.to_string()));
        }
    }

    fn retry_with_indicated_group(&mut self, data: &[u8]) {
        let Some(init) = self.init.as_mut() else {
            return;
        };
        if init.ke_retried {
            warn!("Second INVALID_KE_PAYLOAD, giving up");
            self.close(CloseReason::Protocol(IkeProtocolError::InvalidKePayload));
            return;
        }
        if data.len() != 2 {
            self.fail_from_peer(IkeProtocolError::InvalidSyntax);
            return;
        }
        let group = match u16::from_be_bytes([data[0], data[1]]).try_into() {
            Ok(group) => group,
            Err(_) => {
                self.fail_from_peer(IkeProtocolError::InvalidKePayload);
                return;
            }
        };
        let offered = self
            .config
            .proposals
            .iter()
            .flat_map(Proposal::dh_transforms)
            .any(|g| g == group);
        if !offered || !DhGroup::supported(group) {
            self.fail_from_peer(IkeProtocolError::InvalidKePayload);
            return;
        }
        match DhGroup::generate(group) {
            Ok(ke) => {
                init.ke = ke;
                init.ke_retried = true;
                debug!("Retrying IKE_SA_INIT in group {group:?}");
                if let Err(error) = self.send_sa_init() {
                    self.close(CloseReason::Internal(error.to_string()));
                }
            }
            Err(error) => self.close(CloseReason::Internal(error.to_string())),
        }
    }

    // ---- IKE_AUTH ----------------------------------------------------

    fn send_ike_auth(&mut self) -> Result<(), IkeInternalError> {
        let mut inner = vec![Payload::IdInitiator(self.config.local_identity.clone())];
        let eap = matches!(self.config.auth, AuthConfig::Eap(_));
        if let AuthConfig::PresharedKey(psk) = &self.config.auth {
            let auth_data = self.own_auth_data(psk.clone())?;
            inner.push(Payload::Authentication(Authentication {
                method: AuthMethod::SharedKeyMessageIntegrityCode,
                data: auth_data,
            }));
        }
        inner.push(Payload::SecurityAssociation(SecurityAssociation {
            proposals: self.config.child.proposals.clone(),
        }));
        inner.push(Payload::TsInitiator(self.config.child.local_ts.clone()));
        inner.push(Payload::TsResponder(self.config.child.remote_ts.clone()));
        inner.push(Payload::Notify(Notification::status(
            NotifyStatus::InitialContact,
            vec![],
        )));
        if self.config.child.transport_mode {
            inner.push(Payload::Notify(Notification::status(
                NotifyStatus::UseTransportMode,
                vec![],
            )));
        }

        self.state = if eap {
            SessionState::IkeAuthEap
        } else {
            SessionState::IkeAuth
        };
        self.send_protected_request(
            ExchangeType::IkeAuth,
            inner,
            if eap {
                ExchangeKind::AuthEap
            } else {
                ExchangeKind::Auth
            },
        )
    }

    /// AUTH data this end signs: the shared secret is the PSK, or later
    /// the EAP MSK (RFC 7296, 2.15 and 2.16)
    fn own_auth_data(&self, secret: Vec<u8>) -> Result<Vec<u8>, IkeInternalError> {
        let (Some(suite), Some(keys), Some(init)) = (&self.suite, &self.keys, &self.init) else {
            return Err(CryptoError::BadKeyLength.into());
        };
        let mut octets = init.raw_request.clone();
        octets.extend_from_slice(&init.nonce_r);
        octets.extend_from_slice(&suite.prf.compute(
            &keys.sk_pi,
            &id_body(&self.config.local_identity),
        )?);
        let pad_key = suite.prf.compute(&secret, KEY_PAD)?;
        Ok(suite.prf.compute(&pad_key, &octets)?)
    }

    /// Verify the responder's AUTH against the same secret class
    fn verify_peer_auth(
        &self,
        secret: &[u8],
        idr_body: &[u8],
        auth: &Authentication,
    ) -> Result<(), IkeProtocolError> {
        let (Some(suite), Some(keys), Some(init)) = (&self.suite, &self.keys, &self.init) else {
            return Err(IkeProtocolError::AuthenticationFailed);
        };
        if auth.method != AuthMethod::SharedKeyMessageIntegrityCode {
            return Err(IkeProtocolError::AuthenticationFailed);
        }
        let mut octets = init.raw_response.clone();
        octets.extend_from_slice(&init.nonce_i);
        let prf_id = suite
            .prf
            .compute(&keys.sk_pr, idr_body)
            .map_err(|_| IkeProtocolError::AuthenticationFailed)?;
        octets.extend_from_slice(&prf_id);
        let pad_key = suite
            .prf
            .compute(secret, KEY_PAD)
            .map_err(|_| IkeProtocolError::AuthenticationFailed)?;
        let expected = suite
            .prf
            .compute(&pad_key, &octets)
            .map_err(|_| IkeProtocolError::AuthenticationFailed)?;
        if bool::from(expected.ct_eq(&auth.data)) {
            Ok(())
        } else {
            Err(IkeProtocolError::AuthenticationFailed)
        }
    }

    fn on_auth_response(&mut self, payloads: Vec<Payload>) {
        if let Some(error) = first_error_notify(&payloads) {
            warn!("IKE_AUTH failed with {error:?}");
            self.close(CloseReason::Protocol(IkeProtocolError::AuthenticationFailed));
            return;
        }
        let idr = payloads.iter().find_map(|p| match p {
            Payload::IdResponder(id) => Some(id.clone()),
            _ => None,
        });
        let auth = payloads.iter().find_map(|p| match p {
            Payload::Authentication(auth) => Some(auth.clone()),
            _ => None,
        });
        let (Some(idr), Some(auth)) = (idr, auth) else {
            self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            return;
        };
        let AuthConfig::PresharedKey(psk) = self.config.auth.clone() else {
            self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            return;
        };
        if let Err(error) = self.verify_peer_auth(&psk, &id_body(&idr), &auth) {
            self.fail_from_peer(error);
            return;
        }
        info!("Peer authenticated via shared key");
        self.complete_first_child(&payloads);
    }

    fn on_auth_eap_response(&mut self, payloads: Vec<Payload>) {
        if let Some(error) = first_error_notify(&payloads) {
            warn!("IKE_AUTH failed with {error:?}");
            self.close(CloseReason::Protocol(IkeProtocolError::AuthenticationFailed));
            return;
        }
        if let Some(idr) = payloads.iter().find_map(|p| match p {
            Payload::IdResponder(id) => Some(id.clone()),
            _ => None,
        }) {
            self.idr_body = Some(id_body(&idr));
        }
        let Some(eap_packet) = payloads.iter().find_map(|p| match p {
            Payload::Eap(data) => Some(data.clone()),
            _ => None,
        }) else {
            self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            return;
        };

        if self.eap.is_none() {
            let AuthConfig::Eap(eap_config) = self.config.auth.clone() else {
                self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
                return;
            };
            self.eap = Some(EapSession::new(
                eap_config,
                self.sim.clone(),
                self.tls_factory.clone(),
            ));
        }
        let Some(eap) = self.eap.as_mut() else {
            return;
        };
        match eap.process(&eap_packet) {
            Some(EapResult::Response(response)) => {
                if let Err(error) = self.send_protected_request(
                    ExchangeType::IkeAuth,
                    vec![Payload::Eap(response)],
                    ExchangeKind::AuthEap,
                ) {
                    self.close(CloseReason::Internal(error.to_string()));
                }
            }
            Some(EapResult::Success { msk, .. }) => {
                info!("EAP conversation succeeded");
                self.eap = None;
                self.eap_msk = Some(msk);
                if let Err(error) = self.send_final_auth() {
                    self.close(CloseReason::Internal(error.to_string()));
                }
            }
            Some(EapResult::Failure) => {
                warn!("EAP conversation failed");
                self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            }
            Some(EapResult::Error(error)) => {
                warn!("EAP error: {error}");
                self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            }
            None => {
                // the EAP layer dropped the packet; the exchange cannot
                // make progress without a response
                self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            }
        }
    }

    /// After EAP success both sides exchange AUTH payloads keyed with the
    /// MSK (RFC 7296, 2.16)
    fn send_final_auth(&mut self) -> Result<(), IkeInternalError> {
        let msk = self.eap_msk.clone().unwrap_or_default();
        let auth_data = self.own_auth_data(msk)?;
        self.send_protected_request(
            ExchangeType::IkeAuth,
            vec![Payload::Authentication(Authentication {
                method: AuthMethod::SharedKeyMessageIntegrityCode,
                data: auth_data,
            })],
            ExchangeKind::AuthFinal,
        )
    }

    fn on_auth_final_response(&mut self, payloads: Vec<Payload>) {
        if let Some(error) = first_error_notify(&payloads) {
            warn!("Final IKE_AUTH failed with {error:?}");
            self.close(CloseReason::Protocol(IkeProtocolError::AuthenticationFailed));
            return;
        }
        let Some(auth) = payloads.iter().find_map(|p| match p {
            Payload::Authentication(auth) => Some(auth.clone()),
            _ => None,
        }) else {
            self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            return;
        };
        // the IDr arrived in the first IKE_AUTH response of the EAP flow
        let Some(idr_body) = self.idr_body.clone() else {
            self.fail_from_peer(IkeProtocolError::AuthenticationFailed);
            return;
        };
        let msk = self.eap_msk.clone().unwrap_or_default();
        if let Err(error) = self.verify_peer_auth(&msk, &idr_body, &auth) {
            self.fail_from_peer(error);
            return;
        }
        info!("Peer authenticated via EAP-derived key");
        self.complete_first_child(&payloads);
    }

    /// The first child SA rides inside IKE_AUTH; a failure here leaves the
    /// IKE SA standing
    fn complete_first_child(&mut self, payloads: &[Payload]) {
        self.state = SessionState::Idle;
        self.emit(SessionEvent::Established);

        let Some(init) = &self.init else {
            return;
        };
        let nonce_i = init.nonce_i.clone();
        let nonce_r = init.nonce_r.clone();
        let child_config = self.config.child.clone();
        let offered = self.config.child.proposals.clone();
        match self.process_child_payloads(payloads, &child_config, &offered, &nonce_i, &nonce_r) {
            Ok(local_spi) => {
                self.emit(SessionEvent::ChildSaEstablished { local_spi });
            }
            Err(error) => {
                warn!("First child SA was not established: {error}");
            }
        }
    }

    /// Common tail of child negotiation: accept the chosen proposal and
    /// selectors, derive KEYMAT and hand the SA pair to the installer
    fn process_child_payloads(
        &mut self,
        payloads: &[Payload],
        child_config: &ChildSessionConfig,
        offered: &[Proposal],
        nonce_i: &[u8],
        nonce_r: &[u8],
    ) -> Result<u32, IkeProtocolError> {
        let sa = payloads
            .iter()
            .find_map(|p| match p {
                Payload::SecurityAssociation(sa) => Some(sa),
                _ => None,
            })
            .ok_or(IkeProtocolError::NoProposalChosen)?;
        let chosen = sa
            .proposals
            .first()
            .ok_or(IkeProtocolError::NoProposalChosen)?;
        let chosen = accept_chosen_proposal(offered, chosen)?;
        if chosen.spi.len() != 4 {
            return Err(IkeProtocolError::InvalidSyntax);
        }
        let mut remote_spi = [0u8; 4];
        remote_spi.copy_from_slice(&chosen.spi);
        let remote_spi = u32::from_be_bytes(remote_spi);

        let local_spi = offered
            .iter()
            .find(|p| p.number == chosen.number)
            .map(|p| {
                let mut spi = [0u8; 4];
                if p.spi.len() == 4 {
                    spi.copy_from_slice(&p.spi);
                }
                u32::from_be_bytes(spi)
            })
            .unwrap_or(0);

        let ts_i = payloads
            .iter()
            .find_map(|p| match p {
                Payload::TsInitiator(ts) => Some(ts.clone()),
                _ => None,
            })
            .ok_or(IkeProtocolError::InvalidSelectors)?;
        let ts_r = payloads
            .iter()
            .find_map(|p| match p {
                Payload::TsResponder(ts) => Some(ts.clone()),
                _ => None,
            })
            .ok_or(IkeProtocolError::InvalidSelectors)?;
        let local_ts = accept_narrowed_selectors(&child_config.local_ts, &ts_i)?;
        let remote_ts = accept_narrowed_selectors(&child_config.remote_ts, &ts_r)?;

        let child_suite =
            (self.suite_factory)(&chosen).map_err(|_| IkeProtocolError::NoProposalChosen)?;
        let (Some(ike_suite), Some(keys)) = (&self.suite, &self.keys) else {
            return Err(IkeProtocolError::AuthenticationFailed);
        };
        let child_keys = derive_child_keys(ike_suite, &child_suite, &keys.sk_d, nonce_i, nonce_r)
            .map_err(|_| IkeProtocolError::NoProposalChosen)?;

        let install = ChildSaInstall {
            local_spi,
            remote_spi,
            suite: child_suite,
            keys: child_keys,
            local_ts: local_ts.clone(),
            remote_ts: remote_ts.clone(),
            transport_mode: child_config.transport_mode
                && payloads.iter().any(|p| {
                    matches!(
                        p,
                        Payload::Notify(n)
                            if n.notify_type == NotifyType::Status(NotifyStatus::UseTransportMode)
                    )
                }),
        };
        if let Err(error) = self.installer.install_child_sa(&install) {
            error!("Child SA installation failed: {error}");
            return Err(IkeProtocolError::TemporaryFailure);
        }
        self.children.push(EstablishedChild {
            local_spi,
            remote_spi,
            proposal: chosen,
            local_ts,
            remote_ts,
        });
        info!("Child SA installed, local SPI {local_spi:#010x}");
        Ok(local_spi)
    }

    // ---- CREATE_CHILD_SA ---------------------------------------------

    fn start_create_child(&mut self, config: ChildSessionConfig, rekeyed_spi: Option<u32>) {
        let mut nonce_i = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_i);
        let proposals = config.proposals.clone();

        let mut inner = vec![
            Payload::SecurityAssociation(SecurityAssociation {
                proposals: proposals.clone(),
            }),
            Payload::Nonce(nonce_i.clone()),
            Payload::TsInitiator(config.local_ts.clone()),
            Payload::TsResponder(config.remote_ts.clone()),
        ];
        if let Some(old_spi) = rekeyed_spi {
            inner.insert(
                0,
                Payload::Notify(Notification {
                    protocol: Some(Protocol::EncapsulatingSecurityPayload),
                    spi: Some(old_spi.to_be_bytes().to_vec()),
                    notify_type: NotifyType::Status(NotifyStatus::RekeySa),
                    data: vec![],
                }),
            );
        }
        if config.transport_mode {
            inner.push(Payload::Notify(Notification::status(
                NotifyStatus::UseTransportMode,
                vec![],
            )));
        }

        self.child_negotiation = Some(ChildNegotiation {
            config,
            proposals,
            nonce_i,
            rekeyed_spi,
            lost_tie_break: false,
        });
        self.state = SessionState::CreateChild;
        if let Err(error) = self.send_protected_request(
            ExchangeType::CreateChildSa,
            inner,
            ExchangeKind::CreateChild { rekeyed_spi },
        ) {
            self.close(CloseReason::Internal(error.to_string()));
        }
    }

    fn on_create_child_response(&mut self, payloads: Vec<Payload>) {
        self.state = SessionState::Idle;
        let Some(negotiation) = self.child_negotiation.take() else {
            return;
        };
        if let Some(error) = first_error_notify(&payloads) {
            warn!("CREATE_CHILD_SA rejected with {error:?}");
            return;
        }
        let nonce_r = payloads.iter().find_map(|p| match p {
            Payload::Nonce(nonce) => Some(nonce.clone()),
            _ => None,
        });
        let Some(nonce_r) = nonce_r else {
            self.fail_from_peer(IkeProtocolError::InvalidSyntax);
            return;
        };

        match self.process_child_payloads(
            &payloads,
            &negotiation.config,
            &negotiation.proposals,
            &negotiation.nonce_i,
            &nonce_r,
        ) {
            Ok(local_spi) => {
                self.emit(SessionEvent::ChildSaEstablished { local_spi });
                if let Some(old_spi) = negotiation.rekeyed_spi {
                    self.delete_child(old_spi);
                } else if negotiation.lost_tie_break {
                    // simultaneous rekey: the SA created with the lowest
                    // nonce loses and its initiator deletes it
                    debug!("Deleting the SA that lost the rekey tie break");
                    self.delete_child(local_spi);
                }
            }
            Err(error) => warn!("CREATE_CHILD_SA failed locally: {error}"),
        }
    }

    fn start_rekey_ike(&mut self) {
        let group = self
            .config
            .proposals
            .iter()
            .flat_map(Proposal::dh_transforms)
            .find(|g| DhGroup::supported(*g));
        let Some(group) = group else {
            return;
        };
        let ke = match DhGroup::generate(group) {
            Ok(ke) => ke,
            Err(error) => {
                self.close(CloseReason::Internal(error.to_string()));
                return;
            }
        };
        let mut nonce_i = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_i);
        let new_local_spi = loop {
            let spi = rand::random::<u64>();
            if spi != 0 {
                break spi;
            }
        };
        let proposals: Vec<Proposal> = self
            .config
            .proposals
            .iter()
            .map(|p| Proposal {
                spi: new_local_spi.to_be_bytes().to_vec(),
                ..p.clone()
            })
            .collect();

        let inner = vec![
            Payload::SecurityAssociation(SecurityAssociation {
                proposals: proposals.clone(),
            }),
            Payload::Nonce(nonce_i.clone()),
            Payload::KeyExchange(KeyExchange {
                dh_group: ke.group_id(),
                data: ke.public_value().to_vec(),
            }),
        ];
        self.ike_rekey = Some(IkeRekeyNegotiation {
            proposals,
            ke,
            nonce_i,
            new_local_spi,
        });
        self.state = SessionState::RekeyIke;
        if let Err(error) =
            self.send_protected_request(ExchangeType::CreateChildSa, inner, ExchangeKind::RekeyIke)
        {
            self.close(CloseReason::Internal(error.to_string()));
        }
    }

    fn on_rekey_ike_response(&mut self, payloads: Vec<Payload>) {
        self.state = SessionState::Idle;
        let Some(negotiation) = self.ike_rekey.take() else {
            return;
        };
        if let Some(error) = first_error_notify(&payloads) {
            warn!("IKE rekey rejected with {error:?}");
            return;
        }
        let sa = payloads.iter().find_map(|p| match p {
            Payload::SecurityAssociation(sa) => Some(sa.clone()),
            _ => None,
        });
        let nonce_r = payloads.iter().find_map(|p| match p {
            Payload::Nonce(nonce) => Some(nonce.clone()),
            _ => None,
        });
        let ke_r = payloads.iter().find_map(|p| match p {
            Payload::KeyExchange(ke) => Some(ke.clone()),
            _ => None,
        });
        let (Some(sa), Some(nonce_r), Some(ke_r)) = (sa, nonce_r, ke_r) else {
            self.fail_from_peer(IkeProtocolError::InvalidSyntax);
            return;
        };
        let Some(chosen) = sa.proposals.first() else {
            self.fail_from_peer(IkeProtocolError::NoProposalChosen);
            return;
        };
        let chosen = match accept_chosen_proposal(&negotiation.proposals, chosen) {
            Ok(chosen) => chosen,
            Err(error) => {
                self.fail_from_peer(error);
                return;
            }
        };
        if chosen.spi.len() != 8 {
            self.fail_from_peer(IkeProtocolError::InvalidSyntax);
            return;
        }
        let mut new_remote_spi = [0u8; 8];
        new_remote_spi.copy_from_slice(&chosen.spi);
        let new_remote_spi = u64::from_be_bytes(new_remote_spi);

        let shared = match negotiation.ke.compute_shared(&ke_r.data) {
            Ok(shared) => shared,
            Err(_) => {
                self.fail_from_peer(IkeProtocolError::InvalidKePayload);
                return;
            }
        };
        let suite = match (self.suite_factory)(&chosen) {
            Ok(suite) => suite,
            Err(_) => {
                self.fail_from_peer(IkeProtocolError::NoProposalChosen);
                return;
            }
        };
        let Some(old_keys) = &self.keys else {
            return;
        };
        let keys = match derive_rekeyed_ike_keys(
            &suite,
            &old_keys.sk_d,
            &shared,
            &negotiation.nonce_i,
            &nonce_r,
            negotiation.new_local_spi,
            new_remote_spi,
        ) {
            Ok(keys) => keys,
            Err(error) => {
                self.close(CloseReason::Internal(error.to_string()));
                return;
            }
        };

        // the old SA is replaced atomically from this worker's view; the
        // peer deletes its half through the usual INFORMATIONAL exchange
        self.local_spi = negotiation.new_local_spi;
        self.remote_spi = new_remote_spi;
        self.suite = Some(suite);
        self.keys = Some(keys);
        self.next_request_id = 0;
        self.expected_peer_id = 0;
        self.last_response = None;
        info!("IKE SA rekeyed, new local SPI {:#018x}", self.local_spi);
        self.emit(SessionEvent::IkeSaRekeyed);
    }

    // ---- INFORMATIONAL -----------------------------------------------

    fn start_liveness(&mut self) {
        self.state = SessionState::Informational;
        if let Err(error) = self.send_protected_request(
            ExchangeType::Informational,
            vec![],
            ExchangeKind::Liveness,
        ) {
            self.close(CloseReason::Internal(error.to_string()));
        }
    }

    fn delete_child(&mut self, local_spi: u32) {
        if let Err(error) = self.installer.delete_child_sa(local_spi) {
            warn!("Child SA removal failed: {error}");
        }
        self.children.retain(|c| c.local_spi != local_spi);
        self.emit(SessionEvent::ChildSaDeleted { local_spi });
        self.state = SessionState::Informational;
        if let Err(error) = self.send_protected_request(
            ExchangeType::Informational,
            vec![Payload::Delete(ikev2_wire::definitions::Delete {
                protocol: Protocol::EncapsulatingSecurityPayload,
                spis: vec![local_spi.to_be_bytes().to_vec()],
            })],
            ExchangeKind::DeleteChild,
        ) {
            self.close(CloseReason::Internal(error.to_string()));
        }
    }

    fn start_close(&mut self) {
        if self.keys.is_none() {
            self.close(CloseReason::LocalClose);
            return;
        }
        for child in std::mem::take(&mut self.children) {
            if let Err(error) = self.installer.delete_child_sa(child.local_spi) {
                warn!("Child SA removal failed: {error}");
            }
        }
        self.state = SessionState::Deleting;
        if let Err(error) = self.send_protected_request(
            ExchangeType::Informational,
            vec![Payload::Delete(ikev2_wire::definitions::Delete {
                protocol: Protocol::InternetKeyExchange,
                spis: vec![],
            })],
            ExchangeKind::DeleteIke,
        ) {
            debug!("Best-effort delete could not be sent: {error}");
            self.close(CloseReason::LocalClose);
        }
    }

    // ---- peer requests -----------------------------------------------

    fn handle_peer_request(&mut self, raw: &[u8], message: IkeMessage) {
        if self.keys.is_none() {
            trace!("Peer request before the SA is keyed dropped");
            return;
        }
        if message.message_id.checked_add(1) == Some(self.expected_peer_id) {
            // a retransmission of the request we already answered
            if let Some((id, packets)) = &self.last_response {
                if *id == message.message_id {
                    debug!("Resending the cached response for {id}");
                    for packet in packets.clone() {
                        if let Err(error) = self.transport.send(&packet, self.config.peer) {
                            warn!("Transport refused to send: {error}");
                        }
                    }
                }
            }
            return;
        }
        if message.message_id != self.expected_peer_id {
            warn!(
                "Peer request {} outside the window (expected {})",
                message.message_id, self.expected_peer_id
            );
            // answer without advancing the window or the response cache
            let notify = vec![Payload::Notify(Notification::error(
                NotifyError::InvalidMessageId,
            ))];
            if let Ok(packets) =
                self.seal(ExchangeType::Informational, message.message_id, true, &notify)
            {
                for packet in packets {
                    let _ = self.transport.send(&packet, self.config.peer);
                }
            }
            return;
        }

        let Some(payloads) = self.open_protected(raw, &message) else {
            return;
        };
        match message.exchange_type {
            ExchangeType::Informational => self.on_peer_informational(message.message_id, payloads),
            ExchangeType::CreateChildSa => self.on_peer_create_child(message.message_id, payloads),
            _ => {
                self.send_protected_response(
                    message.exchange_type,
                    message.message_id,
                    vec![Payload::Notify(Notification::error(
                        NotifyError::InvalidSyntax,
                    ))],
                );
            }
        }
    }

    fn on_peer_informational(&mut self, message_id: u32, payloads: Vec<Payload>) {
        let mut deleted_ike = false;
        let mut deleted_children = vec![];
        for payload in &payloads {
            match payload {
                Payload::Delete(delete) if delete.protocol == Protocol::InternetKeyExchange => {
                    deleted_ike = true;
                }
                Payload::Delete(delete) => {
                    for spi in &delete.spis {
                        if spi.len() != 4 {
                            continue;
                        }
                        let mut remote_spi = [0u8; 4];
                        remote_spi.copy_from_slice(spi);
                        let remote_spi = u32::from_be_bytes(remote_spi);
                        if let Some(child) =
                            self.children.iter().find(|c| c.remote_spi == remote_spi)
                        {
                            deleted_children.push(child.local_spi);
                        }
                    }
                }
                Payload::Notify(notify) if notify.notify_type.is_error() => {
                    warn!("Peer reported {:?}", notify.notify_type);
                }
                Payload::Notify(notify) => {
                    debug!("Peer status {:?}", notify.notify_type);
                }
                _ => {}
            }
        }

        // answer deletes of child SAs with the SPIs of our halves
        let response = if deleted_children.is_empty() {
            vec![]
        } else {
            vec![Payload::Delete(ikev2_wire::definitions::Delete {
                protocol: Protocol::EncapsulatingSecurityPayload,
                spis: deleted_children
                    .iter()
                    .map(|spi| spi.to_be_bytes().to_vec())
                    .collect(),
            })]
        };
        self.send_protected_response(ExchangeType::Informational, message_id, response);

        for local_spi in deleted_children {
            if let Err(error) = self.installer.delete_child_sa(local_spi) {
                warn!("Child SA removal failed: {error}");
            }
            self.children.retain(|c| c.local_spi != local_spi);
            self.emit(SessionEvent::ChildSaDeleted { local_spi });
        }
        if deleted_ike {
            info!("Peer deleted the IKE SA");
            for child in std::mem::take(&mut self.children) {
                if let Err(error) = self.installer.delete_child_sa(child.local_spi) {
                    warn!("Child SA removal failed: {error}");
                }
            }
            self.close(CloseReason::PeerDeleted);
        }
    }

    /// Peer-initiated CREATE_CHILD_SA: this engine only accepts it in the
    /// simultaneous-rekey scenario it can lose; everything else is
    /// answered with NO_ADDITIONAL_SAS
    fn on_peer_create_child(&mut self, message_id: u32, payloads: Vec<Payload>) {
        let peer_rekeyed_spi = payloads.iter().find_map(|p| match p {
            Payload::Notify(n)
                if n.notify_type == NotifyType::Status(NotifyStatus::RekeySa) =>
            {
                n.spi.as_ref().filter(|spi| spi.len() == 4).map(|spi| {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(spi);
                    u32::from_be_bytes(bytes)
                })
            }
            _ => None,
        });
        let peer_nonce = payloads.iter().find_map(|p| match p {
            Payload::Nonce(nonce) => Some(nonce.clone()),
            _ => None,
        });

        // simultaneous when both ends rekey the same child pair: our
        // outstanding request names our inbound SPI, the peer's REKEY_SA
        // notify names its own inbound SPI, which is our remote one
        let simultaneous = match (&self.child_negotiation, peer_rekeyed_spi) {
            (Some(negotiation), Some(peer_spi)) => negotiation.rekeyed_spi.is_some_and(|ours| {
                self.children
                    .iter()
                    .any(|c| c.local_spi == ours && c.remote_spi == peer_spi)
            }),
            _ => false,
        };

        if !simultaneous {
            self.send_protected_response(
                ExchangeType::CreateChildSa,
                message_id,
                vec![Payload::Notify(Notification::error(
                    NotifyError::NoAdditionalSas,
                ))],
            );
            return;
        }

        let Some(peer_nonce) = peer_nonce else {
            self.send_protected_response(
                ExchangeType::CreateChildSa,
                message_id,
                vec![Payload::Notify(Notification::error(
                    NotifyError::InvalidSyntax,
                ))],
            );
            return;
        };
        let our_nonce = self
            .child_negotiation
            .as_ref()
            .map(|n| n.nonce_i.clone())
            .unwrap_or_default();

        if !rekey_tie_break_lost(&our_nonce, &peer_nonce) {
            // we won: the peer abandons its attempt and retries later
            debug!("Simultaneous rekey, peer lost the tie break");
            self.send_protected_response(
                ExchangeType::CreateChildSa,
                message_id,
                vec![Payload::Notify(Notification::error(
                    NotifyError::TemporaryFailure,
                ))],
            );
            return;
        }

        // we lost: complete the peer's rekey as responder and remember to
        // delete the SA our own request creates
        debug!("Simultaneous rekey, this end lost the tie break");
        if let Some(negotiation) = self.child_negotiation.as_mut() {
            negotiation.lost_tie_break = true;
        }
        self.respond_to_peer_rekey(message_id, payloads, peer_nonce);
    }

    fn respond_to_peer_rekey(
        &mut self,
        message_id: u32,
        payloads: Vec<Payload>,
        peer_nonce: Vec<u8>,
    ) {
        let result = (|| -> Result<(Vec<Payload>, u32), IkeProtocolError> {
            let sa = payloads
                .iter()
                .find_map(|p| match p {
                    Payload::SecurityAssociation(sa) => Some(sa),
                    _ => None,
                })
                .ok_or(IkeProtocolError::NoProposalChosen)?;
            let proposal = sa
                .proposals
                .iter()
                .find(|p| (self.suite_factory)(p).is_ok() && p.spi.len() == 4)
                .ok_or(IkeProtocolError::NoProposalChosen)?;
            let mut remote_spi = [0u8; 4];
            remote_spi.copy_from_slice(&proposal.spi);
            let remote_spi = u32::from_be_bytes(remote_spi);

            let ts_i = payloads
                .iter()
                .find_map(|p| match p {
                    Payload::TsInitiator(ts) => Some(ts.clone()),
                    _ => None,
                })
                .ok_or(IkeProtocolError::InvalidSelectors)?;
            let ts_r = payloads
                .iter()
                .find_map(|p| match p {
                    Payload::TsResponder(ts) => Some(ts.clone()),
                    _ => None,
                })
                .ok_or(IkeProtocolError::InvalidSelectors)?;
            // mirror the narrowing a responder performs
            let remote_ts = narrow_selectors(&self.config.child.remote_ts, &ts_i);
            let local_ts = narrow_selectors(&self.config.child.local_ts, &ts_r);
            if remote_ts.is_empty() || local_ts.is_empty() {
                return Err(IkeProtocolError::InvalidSelectors);
            }

            let local_spi = rand::random::<u32>();
            let mut nonce_r = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut nonce_r);

            let child_suite =
                (self.suite_factory)(proposal).map_err(|_| IkeProtocolError::NoProposalChosen)?;
            let (Some(ike_suite), Some(keys)) = (&self.suite, &self.keys) else {
                return Err(IkeProtocolError::TemporaryFailure);
            };
            // as responder the peer's nonce is Ni and ours is Nr
            let child_keys =
                derive_child_keys(ike_suite, &child_suite, &keys.sk_d, &peer_nonce, &nonce_r)
                    .map_err(|_| IkeProtocolError::TemporaryFailure)?;
            let install = ChildSaInstall {
                local_spi,
                remote_spi,
                suite: child_suite,
                keys: child_keys,
                local_ts: local_ts.clone(),
                remote_ts: remote_ts.clone(),
                transport_mode: false,
            };
            self.installer
                .install_child_sa(&install)
                .map_err(|_| IkeProtocolError::TemporaryFailure)?;

            let chosen = Proposal {
                spi: local_spi.to_be_bytes().to_vec(),
                ..proposal.clone()
            };
            self.children.push(EstablishedChild {
                local_spi,
                remote_spi,
                proposal: chosen.clone(),
                local_ts: local_ts.clone(),
                remote_ts: remote_ts.clone(),
            });
            Ok((
                vec![
                    Payload::SecurityAssociation(SecurityAssociation {
                        proposals: vec![chosen],
                    }),
                    Payload::Nonce(nonce_r),
                    Payload::TsInitiator(remote_ts),
                    Payload::TsResponder(local_ts),
                ],
                local_spi,
            ))
        })();

        match result {
            Ok((response, local_spi)) => {
                self.send_protected_response(ExchangeType::CreateChildSa, message_id, response);
                self.emit(SessionEvent::ChildSaEstablished { local_spi });
            }
            Err(error) => {
                self.send_protected_response(
                    ExchangeType::CreateChildSa,
                    message_id,
                    vec![Payload::Notify(Notification::error(error.notify_type()))],
                );
            }
        }
    }

    // ---- commands and timers -----------------------------------------

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Close => self.start_close(),
            _ if self.state != SessionState::Idle => {
                debug!("Command refused outside the idle state: {command:?}");
            }
            SessionCommand::CreateChild(config) => self.start_create_child(config, None),
            SessionCommand::RekeyChild { local_spi } => {
                let Some(child) = self.children.iter().find(|c| c.local_spi == local_spi) else {
                    debug!("No child SA with SPI {local_spi:#010x} to rekey");
                    return;
                };
                let config = ChildSessionConfig {
                    proposals: vec![Proposal {
                        number: 1,
                        spi: rand::random::<u32>().to_be_bytes().to_vec(),
                        ..child.proposal.clone()
                    }],
                    local_ts: child.local_ts.clone(),
                    remote_ts: child.remote_ts.clone(),
                    transport_mode: false,
                };
                self.start_create_child(config, Some(local_spi));
            }
            SessionCommand::RekeyIke => self.start_rekey_ike(),
            SessionCommand::CheckLiveness => self.start_liveness(),
        }
    }

    fn handle_timer(&mut self) {
        let now = Instant::now();
        if self.reassembly.as_ref().is_some_and(|r| r.deadline <= now) {
            // incomplete fragment sets are discarded whole
            debug!("Reassembly timer expired, discarding the fragment set");
            self.reassembly = None;
        }
        let mut retransmit = vec![];
        let mut peer_dead = false;
        if let Some(pending) = &mut self.pending {
            if pending.deadline <= now {
                if pending.next_attempt() {
                    debug!(
                        "Retransmitting request {} (attempt {})",
                        pending.message_id, pending.attempt
                    );
                    retransmit = pending.packets.clone();
                } else {
                    peer_dead = true;
                }
            }
        }
        if peer_dead {
            warn!("Retransmissions exhausted, peer declared dead");
            self.close(CloseReason::PeerDead);
            return;
        }
        for packet in retransmit {
            if let Err(error) = self.transport.send(&packet, self.config.peer) {
                warn!("Transport refused to send: {error}");
            }
        }
        let handshaking = self.keys.is_none() || self.eap.is_some();
        if handshaking && self.handshake_deadline <= now && self.state != SessionState::Closed {
            warn!("Handshake deadline passed");
            self.close(CloseReason::HandshakeTimeout);
        }
    }

    // ---- teardown ----------------------------------------------------

    /// Surface a protocol failure caused by the peer: notify it where the
    /// state allows, then close
    fn fail_from_peer(&mut self, error: IkeProtocolError) {
        warn!("Failing the session: {error}");
        if self.keys.is_some() && self.state != SessionState::Closed {
            let message_id = self.next_request_id;
            let notify = vec![Payload::Notify(Notification::error(error.notify_type()))];
            if let Ok(packets) =
                self.seal(ExchangeType::Informational, message_id, false, &notify)
            {
                for packet in packets {
                    let _ = self.transport.send(&packet, self.config.peer);
                }
            }
        }
        self.close(CloseReason::Protocol(error));
    }

    fn close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.pending = None;
        self.reassembly = None;
        self.emit(SessionEvent::Closed(reason));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// The encoded body of an ID payload, the exact octets the AUTH
/// computation signs
fn id_body(id: &Identification) -> Vec<u8> {
    let mut out = vec![id.id_type as u8, 0, 0, 0];
    out.extend_from_slice(&id.data);
    out
}

/// NAT detection data: SHA1 over the SPIs, address and port (RFC 7296,
/// section 2.23)
fn nat_detection_hash(
    initiator_spi: u64,
    responder_spi: u64,
    addr: &std::net::SocketAddr,
) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(initiator_spi.to_be_bytes());
    hasher.update(responder_spi.to_be_bytes());
    match addr.ip() {
        std::net::IpAddr::V4(ip) => hasher.update(ip.octets()),
        std::net::IpAddr::V6(ip) => hasher.update(ip.octets()),
    }
    hasher.update(addr.port().to_be_bytes());
    hasher.finalize().to_vec()
}

fn first_error_notify(payloads: &[Payload]) -> Option<NotifyType> {
    payloads.iter().find_map(|p| match p {
        Payload::Notify(notify) if notify.notify_type.is_error() => Some(notify.notify_type),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    use eap::sim_auth::{AppType, GsmTriplet, SimAuthError, UmtsResult};
    use eap::tls::{TlsError, TlsSession};
    use ikev2_wire::definitions::params::{
        DhGroupId, EncryptionId, EsnId, IntegrityId, PrfId,
    };
    use ikev2_wire::definitions::{TrafficSelector, Transform};

    use super::*;
    use crate::config::ChildSessionConfig;
    use crate::crypto::CryptoSuite;
    use crate::transport::{ChildSaInstall, SaInstallError};

    struct TestTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl TestTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(vec![]),
            })
        }

        fn count(&self) -> usize {
            self.sent.lock().map(|s| s.len()).unwrap_or(0)
        }

        fn packet(&self, index: usize) -> Vec<u8> {
            self.sent.lock().map(|s| s[index].clone()).unwrap_or_default()
        }

        async fn wait_for(&self, count: usize) -> Vec<u8> {
            for _ in 0..2000 {
                if self.count() >= count {
                    return self.packet(count - 1);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            panic!("transport never saw packet {count}");
        }
    }

    impl PacketTransport for TestTransport {
        fn send(&self, packet: &[u8], _peer: SocketAddr) -> std::io::Result<()> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(packet.to_vec());
            }
            Ok(())
        }
    }

    struct TestInstaller {
        installed: Mutex<Vec<u32>>,
    }

    impl TestInstaller {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                installed: Mutex::new(vec![]),
            })
        }
    }

    impl SaInstaller for TestInstaller {
        fn install_child_sa(&self, install: &ChildSaInstall) -> Result<(), SaInstallError> {
            if let Ok(mut installed) = self.installed.lock() {
                installed.push(install.local_spi);
            }
            Ok(())
        }

        fn delete_child_sa(&self, _local_spi: u32) -> Result<(), SaInstallError> {
            Ok(())
        }
    }

    struct NoSim;

    impl SimAuthenticator for NoSim {
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

    struct NoTls;

    impl TlsSessionFactory for NoTls {
        fn create(&self, _trusted_ca: Option<&[u8]>) -> Result<Box<dyn TlsSession>, TlsError> {
            Err(TlsError("no TLS in these tests".into()))
        }
    }

    fn ike_proposals() -> Vec<Proposal> {
        vec![Proposal::new(
            1,
            Protocol::InternetKeyExchange,
            vec![
                Transform::Encryption(EncryptionId::AesCbc, Some(128)),
                Transform::PseudoRandomFunction(PrfId::HmacSha1),
                Transform::Integrity(IntegrityId::HmacSha1_96),
                Transform::KeyExchange(DhGroupId::ModP1024),
            ],
        )]
    }

    fn esp_proposals() -> Vec<Proposal> {
        vec![Proposal::new_esp(
            1,
            vec![
                Transform::Encryption(EncryptionId::AesCbc, Some(128)),
                Transform::Integrity(IntegrityId::HmacSha1_96),
                Transform::SequenceNumber(EsnId::None),
            ],
        )]
    }

    fn test_config() -> IkeSessionConfig {
        let mut config = IkeSessionConfig::new(
            "192.0.2.1:500".parse().unwrap_or_else(|_| unreachable!()),
            "192.0.2.2:500".parse().unwrap_or_else(|_| unreachable!()),
            IkeSessionConfig::fqdn_identity("client.example.org"),
            IkeSessionConfig::fqdn_identity("gw.example.org"),
            AuthConfig::PresharedKey(b"swordfish".to_vec()),
            ike_proposals(),
            ChildSessionConfig::tunnel(esp_proposals()),
        );
        config.handshake_timeout = Duration::from_secs(300);
        config
    }

    fn spawn_session(
        config: IkeSessionConfig,
        transport: Arc<TestTransport>,
        installer: Arc<TestInstaller>,
    ) -> (IkeSessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session, handle, events) = IkeSession::new(
            config,
            transport,
            installer,
            Arc::new(NoSim),
            Arc::new(NoTls),
            None,
        );
        tokio::spawn(session.run());
        (handle, events)
    }

    /// A scripted responder sharing the key schedule with the session
    /// under test
    struct Responder {
        spi_i: u64,
        spi_r: u64,
        suite: CryptoSuite,
        keys: IkeKeys,
        nonce_i: Vec<u8>,
        nonce_r: Vec<u8>,
        raw_init_response: Vec<u8>,
        psk: Vec<u8>,
    }

    impl Responder {
        /// Answer the captured IKE_SA_INIT request and derive the keys
        #[allow(clippy::unwrap_used)]
        fn answer_sa_init(request: &[u8]) -> (Responder, Vec<u8>) {
            let parsed = IkeMessage::try_parse(request).unwrap();
            let offered = parsed
                .payloads
                .iter()
                .find_map(|p| match p {
                    Payload::SecurityAssociation(sa) => Some(sa.proposals.clone()),
                    _ => None,
                })
                .unwrap();
            let ke_i = parsed
                .payloads
                .iter()
                .find_map(|p| match p {
                    Payload::KeyExchange(ke) => Some(ke.clone()),
                    _ => None,
                })
                .unwrap();
            let nonce_i = parsed
                .payloads
                .iter()
                .find_map(|p| match p {
                    Payload::Nonce(nonce) => Some(nonce.clone()),
                    _ => None,
                })
                .unwrap();

            let chosen = offered[0].clone();
            let suite = CryptoSuite::from_proposal(&chosen).unwrap();
            let ke_r = DhGroup::generate(ke_i.dh_group).unwrap();
            let shared = ke_r.compute_shared(&ke_i.data).unwrap();
            let nonce_r = vec![0x5a; 32];
            let spi_r = 0x2222_3333_4444_5555u64;

            let response = IkeMessage {
                initiator_spi: parsed.initiator_spi,
                responder_spi: spi_r,
                exchange_type: ExchangeType::IkeSaInit,
                initiator: false,
                response: true,
                message_id: 0,
                payloads: vec![
                    Payload::SecurityAssociation(SecurityAssociation {
                        proposals: vec![chosen],
                    }),
                    Payload::KeyExchange(KeyExchange {
                        dh_group: ke_r.group_id(),
                        data: ke_r.public_value().to_vec(),
                    }),
                    Payload::Nonce(nonce_r.clone()),
                    Payload::Notify(Notification::status(
                        NotifyStatus::FragmentationSupported,
                        vec![],
                    )),
                ],
            };
            let raw = response.try_build().unwrap();
            let keys = derive_ike_keys(
                &suite,
                &nonce_i,
                &nonce_r,
                &shared,
                parsed.initiator_spi,
                spi_r,
            )
            .unwrap();
            (
                Responder {
                    spi_i: parsed.initiator_spi,
                    spi_r,
                    suite,
                    keys,
                    nonce_i,
                    nonce_r,
                    raw_init_response: raw.clone(),
                    psk: b"swordfish".to_vec(),
                },
                raw,
            )
        }

        /// Open a protected request the initiator sent
        #[allow(clippy::unwrap_used)]
        fn open_request(&self, raw: &[u8]) -> (IkeMessage, Vec<Payload>) {
            let message = IkeMessage::try_parse(raw).unwrap();
            let Payload::Encrypted(sk) = &message.payloads[0] else {
                panic!("expected an SK payload");
            };
            let plain = envelope::open(
                &self.suite,
                &self.keys.sk_ei,
                &self.keys.sk_ai,
                raw,
                &sk.data,
            )
            .unwrap();
            let payloads = decode_payload_list(sk.first_inner, &plain).unwrap();
            (message, payloads)
        }

        /// Seal a protected response towards the initiator
        #[allow(clippy::unwrap_used)]
        fn seal_response(
            &self,
            exchange_type: ExchangeType,
            message_id: u32,
            inner: Vec<Payload>,
        ) -> Vec<u8> {
            let meta = MessageMeta {
                initiator_spi: self.spi_i,
                responder_spi: self.spi_r,
                exchange_type,
                initiator: false,
                response: true,
                message_id,
            };
            let mut packets = envelope::seal(
                &self.suite,
                &self.keys.sk_er,
                &self.keys.sk_ar,
                &meta,
                &inner,
                None,
            )
            .unwrap();
            packets.remove(0)
        }

        /// The responder's AUTH payload over its own IKE_SA_INIT response
        #[allow(clippy::unwrap_used)]
        fn auth_payload(&self, idr: &Identification) -> Payload {
            let mut octets = self.raw_init_response.clone();
            octets.extend_from_slice(&self.nonce_i);
            octets.extend_from_slice(
                &self
                    .suite
                    .prf
                    .compute(&self.keys.sk_pr, &id_body(idr))
                    .unwrap(),
            );
            let pad_key = self.suite.prf.compute(&self.psk, KEY_PAD).unwrap();
            Payload::Authentication(Authentication {
                method: AuthMethod::SharedKeyMessageIntegrityCode,
                data: self.suite.prf.compute(&pad_key, &octets).unwrap(),
            })
        }
    }

    async fn next_event(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Option<SessionEvent> {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn sa_init_request_carries_the_mandatory_payloads() {
        let transport = TestTransport::new();
        let (_handle, _events) = spawn_session(test_config(), transport.clone(), TestInstaller::new());

        let packet = transport.wait_for(1).await;
        let message = IkeMessage::try_parse(&packet).unwrap();
        assert_eq!(message.exchange_type, ExchangeType::IkeSaInit);
        assert_eq!(message.message_id, 0);
        assert!(message.initiator);
        assert!(!message.response);
        assert_eq!(message.responder_spi, 0);
        assert!(matches!(
            message.payloads[0],
            Payload::SecurityAssociation(_)
        ));
        assert!(message
            .payloads
            .iter()
            .any(|p| matches!(p, Payload::KeyExchange(_))));
        assert!(message
            .payloads
            .iter()
            .any(|p| matches!(p, Payload::Nonce(_))));
        assert!(message.payloads.iter().any(|p| matches!(
            p,
            Payload::Notify(n)
                if n.notify_type == NotifyType::Status(NotifyStatus::FragmentationSupported)
        )));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn cookie_demand_is_honored_once_then_fatal() {
        let transport = TestTransport::new();
        let (handle, mut events) =
            spawn_session(test_config(), transport.clone(), TestInstaller::new());

        let first = transport.wait_for(1).await;
        let parsed = IkeMessage::try_parse(&first).unwrap();
        let first_ke = parsed
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::KeyExchange(ke) => Some(ke.clone()),
                _ => None,
            })
            .unwrap();
        let first_nonce = parsed
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::Nonce(nonce) => Some(nonce.clone()),
                _ => None,
            })
            .unwrap();

        let cookie_bytes = vec![0xc0; 24];
        let cookie_reply = IkeMessage {
            initiator_spi: parsed.initiator_spi,
            responder_spi: 0,
            exchange_type: ExchangeType::IkeSaInit,
            initiator: false,
            response: true,
            message_id: 0,
            payloads: vec![Payload::Notify(Notification::status(
                NotifyStatus::Cookie,
                cookie_bytes.clone(),
            ))],
        };
        handle.deliver_packet(cookie_reply.try_build().unwrap());

        // the retry leads with the cookie and repeats nonce and KE exactly
        let retry = transport.wait_for(2).await;
        let retry = IkeMessage::try_parse(&retry).unwrap();
        let Payload::Notify(lead) = &retry.payloads[0] else {
            panic!("expected the cookie to lead the retry");
        };
        assert_eq!(lead.notify_type, NotifyType::Status(NotifyStatus::Cookie));
        assert_eq!(lead.data, cookie_bytes);
        assert_eq!(retry.message_id, 0);
        let retry_ke = retry
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::KeyExchange(ke) => Some(ke.clone()),
                _ => None,
            })
            .unwrap();
        let retry_nonce = retry
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::Nonce(nonce) => Some(nonce.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(retry_ke, first_ke);
        assert_eq!(retry_nonce, first_nonce);

        // a second cookie demand terminates the session
        handle.deliver_packet(cookie_reply.try_build().unwrap());
        match next_event(&mut events).await {
            Some(SessionEvent::Closed(_)) => {}
            other => panic!("expected the session to close, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retransmissions_exhaust_and_declare_the_peer_dead() {
        let transport = TestTransport::new();
        let (_handle, mut events) =
            spawn_session(test_config(), transport.clone(), TestInstaller::new());

        // the backoff sums to about half a minute of (paused) time
        let event = tokio::time::timeout(Duration::from_secs(600), events.recv())
            .await
            .ok()
            .flatten();
        match event {
            Some(SessionEvent::Closed(CloseReason::PeerDead)) => {}
            other => panic!("expected the peer to be declared dead, got {other:?}"),
        }
        // the initial send plus five retransmissions
        assert_eq!(transport.count(), 6);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn full_psk_handshake_installs_the_first_child() {
        let transport = TestTransport::new();
        let installer = TestInstaller::new();
        let (handle, mut events) =
            spawn_session(test_config(), transport.clone(), installer.clone());

        let init_request = transport.wait_for(1).await;
        let (responder, init_response) = Responder::answer_sa_init(&init_request);
        handle.deliver_packet(init_response);

        // the IKE_AUTH request arrives protected
        let auth_request = transport.wait_for(2).await;
        let (message, payloads) = responder.open_request(&auth_request);
        assert_eq!(message.exchange_type, ExchangeType::IkeAuth);
        assert_eq!(message.message_id, 1);
        assert!(payloads
            .iter()
            .any(|p| matches!(p, Payload::IdInitiator(_))));
        assert!(payloads
            .iter()
            .any(|p| matches!(p, Payload::Authentication(_))));
        let child_sa = payloads
            .iter()
            .find_map(|p| match p {
                Payload::SecurityAssociation(sa) => Some(sa.clone()),
                _ => None,
            })
            .unwrap();
        let offered_child = child_sa.proposals[0].clone();
        assert_eq!(offered_child.spi.len(), 4);

        // answer with IDr, a valid AUTH and the chosen child SA
        let idr = IkeSessionConfig::fqdn_identity("gw.example.org");
        let chosen_child = Proposal {
            spi: vec![0xde, 0xad, 0xbe, 0xef],
            ..offered_child
        };
        let auth_response = responder.seal_response(
            ExchangeType::IkeAuth,
            1,
            vec![
                Payload::IdResponder(idr.clone()),
                responder.auth_payload(&idr),
                Payload::SecurityAssociation(SecurityAssociation {
                    proposals: vec![chosen_child],
                }),
                Payload::TsInitiator(vec![TrafficSelector::all_ipv4()]),
                Payload::TsResponder(vec![TrafficSelector::all_ipv4()]),
            ],
        );
        handle.deliver_packet(auth_response);

        assert_eq!(next_event(&mut events).await, Some(SessionEvent::Established));
        match next_event(&mut events).await {
            Some(SessionEvent::ChildSaEstablished { .. }) => {}
            other => panic!("expected the child SA, got {other:?}"),
        }
        assert_eq!(installer.installed.lock().unwrap().len(), 1);

        // liveness: an empty INFORMATIONAL request answered empty
        handle.send_command(SessionCommand::CheckLiveness);
        let liveness_request = transport.wait_for(3).await;
        let (message, payloads) = responder.open_request(&liveness_request);
        assert_eq!(message.exchange_type, ExchangeType::Informational);
        assert!(payloads.is_empty());
        let liveness_response =
            responder.seal_response(ExchangeType::Informational, message.message_id, vec![]);
        handle.deliver_packet(liveness_response);
        assert_eq!(
            next_event(&mut events).await,
            Some(SessionEvent::LivenessConfirmed)
        );
    }
}
