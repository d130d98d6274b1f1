//! High-level definitions of IKEv2 messages and payloads
//!
//! The structs in this module are the parsed, validated counterparts of the
//! network-level headers found in [header]; [crate::parser] converts bytes
//! into them and [crate::generator] converts them back.

pub mod header;
pub mod params;

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use params::{
    AuthMethod, CertEncoding, CfgType, DhGroupId, EncryptionId, EsnId, ExchangeType, IdType,
    IntegrityId, NotifyError, NotifyStatus, PrfId, Protocol, TsType,
};

/// When parsing a parameter from its wire value, there are several "regions"
/// in the definitions that can't be defined by Rusts enum. Typically, the
/// last two regions of the parameter definitions are unassigned and/or
/// reserved for private use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum UnparseableParameter {
    /// The parameter is reserved and must not be used, as it may conflict with older standards
    Reserved,
    /// The parameter has no recognized meaning by any known standard
    Unassigned,
    /// The parameter is reserved for Private Use by proprietary implementations
    /// and not part of a standard
    PrivateUse,
    /// The parameter can not reach the value this resolves to,
    /// as such the packet where it originates from must be invalid
    OutOfRange,
}

/// A full IKEv2 message, header fields plus the ordered payload chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeMessage {
    /// SPI chosen by the original initiator of the IKE SA
    pub initiator_spi: u64,
    /// SPI chosen by the responder, zero before the responder answered
    pub responder_spi: u64,
    /// The exchange this message belongs to
    pub exchange_type: ExchangeType,
    /// Whether the sender is the original initiator of the IKE SA
    pub initiator: bool,
    /// Whether this message is a response to a request with the same ID
    pub response: bool,
    /// Message ID, monotonically increasing per direction
    pub message_id: u32,
    /// The ordered list of payloads
    pub payloads: Vec<Payload>,
}

/// A single IKEv2 payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// SA payload carrying proposals
    SecurityAssociation(SecurityAssociation),
    /// KE payload carrying the DH public value
    KeyExchange(KeyExchange),
    /// IDi payload
    IdInitiator(Identification),
    /// IDr payload
    IdResponder(Identification),
    /// CERT payload
    Certificate(CertificateData),
    /// CERTREQ payload
    CertificateRequest(CertificateData),
    /// AUTH payload
    Authentication(Authentication),
    /// Ni/Nr payload, 16 to 256 octets of random material
    Nonce(Vec<u8>),
    /// N payload
    Notify(Notification),
    /// D payload
    Delete(Delete),
    /// V payload, opaque vendor identifier
    VendorId(Vec<u8>),
    /// TSi payload
    TsInitiator(Vec<TrafficSelector>),
    /// TSr payload
    TsResponder(Vec<TrafficSelector>),
    /// SK payload; the body stays opaque at this layer (IV, ciphertext and
    /// integrity checksum) and is handled by the message envelope
    Encrypted(EncryptedData),
    /// CP payload
    Configuration(Configuration),
    /// EAP payload; the body is a complete EAP message handled by the EAP
    /// codec, not by this crate
    Eap(Vec<u8>),
    /// SKF payload as per RFC 7383; body opaque like [Payload::Encrypted]
    EncryptedFragment(EncryptedFragment),
    /// A payload whose type this crate does not understand; elided from
    /// semantic processing but preserved for re-encoding
    Unsupported(UnsupportedPayload),
}

impl Payload {
    /// The wire value of this payload's type
    pub fn type_value(&self) -> u8 {
        match self {
            Payload::SecurityAssociation(_) => params::PayloadType::SecurityAssociation as u8,
            Payload::KeyExchange(_) => params::PayloadType::KeyExchange as u8,
            Payload::IdInitiator(_) => params::PayloadType::IdentificationInitiator as u8,
            Payload::IdResponder(_) => params::PayloadType::IdentificationResponder as u8,
            Payload::Certificate(_) => params::PayloadType::Certificate as u8,
            Payload::CertificateRequest(_) => params::PayloadType::CertificateRequest as u8,
            Payload::Authentication(_) => params::PayloadType::Authentication as u8,
            Payload::Nonce(_) => params::PayloadType::Nonce as u8,
            Payload::Notify(_) => params::PayloadType::Notify as u8,
            Payload::Delete(_) => params::PayloadType::Delete as u8,
            Payload::VendorId(_) => params::PayloadType::VendorID as u8,
            Payload::TsInitiator(_) => params::PayloadType::TrafficSelectorInitiator as u8,
            Payload::TsResponder(_) => params::PayloadType::TrafficSelectorResponder as u8,
            Payload::Encrypted(_) => params::PayloadType::EncryptedAndAuthenticated as u8,
            Payload::Configuration(_) => params::PayloadType::Configuration as u8,
            Payload::Eap(_) => params::PayloadType::ExtensibleAuthentication as u8,
            Payload::EncryptedFragment(_) => {
                params::PayloadType::EncryptedAndAuthenticatedFragment as u8
            }
            Payload::Unsupported(p) => p.payload_type,
        }
    }
}

/// SA payload: an ordered list of proposals, numbered from 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAssociation {
    /// The proposals in preference order
    pub proposals: Vec<Proposal>,
}

/// A single proposal inside an SA payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Number of the proposal, starting at 1 and incrementing by 1
    pub number: u8,
    /// Protocol the proposal negotiates
    pub protocol: Protocol,
    /// SPI of the sending entity; empty during IKE_SA_INIT
    pub spi: Vec<u8>,
    /// The transforms offered by this proposal, in wire order
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// Easily construct a new proposal with the supplied transforms and no SPI
    pub fn new(number: u8, protocol: Protocol, transforms: Vec<Transform>) -> Self {
        Self {
            number,
            protocol,
            spi: vec![],
            transforms,
        }
    }

    /// Construct an ESP proposal carrying a freshly generated 4-octet SPI
    pub fn new_esp(number: u8, transforms: Vec<Transform>) -> Self {
        Self {
            number,
            protocol: Protocol::EncapsulatingSecurityPayload,
            spi: rand::random::<u32>().to_be_bytes().to_vec(),
            transforms,
        }
    }

    /// All encryption transforms of the proposal with their key lengths
    pub fn encryption_transforms(&self) -> impl Iterator<Item = (EncryptionId, Option<u16>)> + '_ {
        self.transforms.iter().filter_map(|t| match t {
            Transform::Encryption(id, key_len) => Some((*id, *key_len)),
            _ => None,
        })
    }

    /// All DH group transforms of the proposal
    pub fn dh_transforms(&self) -> impl Iterator<Item = DhGroupId> + '_ {
        self.transforms.iter().filter_map(|t| match t {
            Transform::KeyExchange(g) => Some(*g),
            _ => None,
        })
    }
}

/// A single transform inside a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    /// An encryption algorithm, with the key length attribute for ciphers
    /// of variable key size
    Encryption(EncryptionId, Option<u16>),
    /// A pseudorandom function
    PseudoRandomFunction(PrfId),
    /// An integrity algorithm
    Integrity(IntegrityId),
    /// A key exchange method (Diffie-Hellman group)
    KeyExchange(DhGroupId),
    /// An extended sequence number mode
    SequenceNumber(EsnId),
}

/// KE payload contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchange {
    /// The DH group the data was computed in
    pub dh_group: DhGroupId,
    /// The public value
    pub data: Vec<u8>,
}

/// IDi/IDr payload contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    /// How the identification data is to be interpreted
    pub id_type: IdType,
    /// The identification data
    pub data: Vec<u8>,
}

/// CERT/CERTREQ payload contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateData {
    /// Encoding of the certificate data
    pub encoding: CertEncoding,
    /// The certificate data
    pub data: Vec<u8>,
}

/// AUTH payload contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    /// Method used to compute the authentication data
    pub method: AuthMethod,
    /// The authentication data
    pub data: Vec<u8>,
}

/// Classified notification type, preserving unknown values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyType {
    /// A recognized error notification
    Error(NotifyError),
    /// A recognized status notification
    Status(NotifyStatus),
    /// A notification this crate does not recognize; surfaced but not fatal
    Other(u16),
}

impl From<u16> for NotifyType {
    fn from(value: u16) -> Self {
        if value < 16384 {
            match NotifyError::try_from(value) {
                Ok(e) => NotifyType::Error(e),
                Err(_) => NotifyType::Other(value),
            }
        } else {
            match NotifyStatus::try_from(value) {
                Ok(s) => NotifyType::Status(s),
                Err(_) => NotifyType::Other(value),
            }
        }
    }
}

impl NotifyType {
    /// The wire value of this notification type
    pub fn value(&self) -> u16 {
        match self {
            NotifyType::Error(e) => *e as u16,
            NotifyType::Status(s) => *s as u16,
            NotifyType::Other(v) => *v,
        }
    }

    /// Whether the notification reports an error rather than a status
    pub fn is_error(&self) -> bool {
        self.value() < 16384
    }
}

/// N payload contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Type of the SA the notification concerns, present only with an SPI
    pub protocol: Option<Protocol>,
    /// SPI of the SA the notification concerns
    pub spi: Option<Vec<u8>>,
    /// The classified notification type
    pub notify_type: NotifyType,
    /// Type-specific notification data
    pub data: Vec<u8>,
}

impl Notification {
    /// Construct an error notification without SPI or data
    pub fn error(error: NotifyError) -> Self {
        Self {
            protocol: None,
            spi: None,
            notify_type: NotifyType::Error(error),
            data: vec![],
        }
    }

    /// Construct a status notification without SPI
    pub fn status(status: NotifyStatus, data: Vec<u8>) -> Self {
        Self {
            protocol: None,
            spi: None,
            notify_type: NotifyType::Status(status),
            data,
        }
    }
}

/// D payload contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    /// Protocol of the SAs being deleted
    pub protocol: Protocol,
    /// The SPIs being deleted; empty when deleting the IKE SA itself
    pub spis: Vec<Vec<u8>>,
}

/// CP payload contents; attribute semantics are left to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Kind of configuration exchange
    pub cfg_type: CfgType,
    /// Raw attribute type and value pairs in wire order
    pub attributes: Vec<(u16, Vec<u8>)>,
}

/// SK payload contents, opaque at the codec layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    /// Type of the first payload of the decrypted contents; the SK payload
    /// reuses its generic header's next payload field for this purpose
    pub first_inner: u8,
    /// IV, ciphertext and integrity checksum, exactly as on the wire
    pub data: Vec<u8>,
}

/// SKF payload contents as per RFC 7383, opaque at the codec layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFragment {
    /// Type of the first payload of the reassembled decrypted contents;
    /// zero on every fragment but the first
    pub first_inner: u8,
    /// Number of this fragment, counting from 1
    pub fragment_num: u16,
    /// Total number of fragments of the message
    pub total_fragments: u16,
    /// IV, ciphertext and integrity checksum of this fragment
    pub data: Vec<u8>,
}

/// A payload preserved without interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedPayload {
    /// The wire value of the payload type
    pub payload_type: u8,
    /// Whether the critical bit was set
    pub critical: bool,
    /// The payload body without the generic header
    pub data: Vec<u8>,
}

/// A single traffic selector naming an address range, a port range and
/// optionally an IP protocol
///
/// Constructed through [TrafficSelector::new] which enforces the ordering
/// and address family invariants, so every value of this type is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSelector {
    ts_type: TsType,
    ip_protocol_id: u8,
    start_port: u16,
    end_port: u16,
    start_addr: IpAddr,
    end_addr: IpAddr,
}

/// Violation of a traffic selector invariant at construction
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSelector {
    /// The start port is greater than the end port
    #[error("Start port is greater than end port")]
    PortOrder,
    /// The starting address is greater than the ending address
    #[error("Starting address is greater than ending address")]
    AddressOrder,
    /// The addresses' family does not match the selector type
    #[error("Address family does not match the selector type")]
    AddressFamily,
}

impl TrafficSelector {
    /// Construct a validated traffic selector
    pub fn new(
        ts_type: TsType,
        ip_protocol_id: u8,
        start_port: u16,
        end_port: u16,
        start_addr: IpAddr,
        end_addr: IpAddr,
    ) -> Result<Self, InvalidSelector> {
        if start_port > end_port {
            return Err(InvalidSelector::PortOrder);
        }
        match (ts_type, start_addr, end_addr) {
            (TsType::Ipv4AddrRange, IpAddr::V4(s), IpAddr::V4(e)) => {
                if s.octets() > e.octets() {
                    return Err(InvalidSelector::AddressOrder);
                }
            }
            (TsType::Ipv6AddrRange, IpAddr::V6(s), IpAddr::V6(e)) => {
                if s.octets() > e.octets() {
                    return Err(InvalidSelector::AddressOrder);
                }
            }
            _ => return Err(InvalidSelector::AddressFamily),
        }
        Ok(Self {
            ts_type,
            ip_protocol_id,
            start_port,
            end_port,
            start_addr,
            end_addr,
        })
    }

    /// The selector matching all IPv4 addresses, ports and protocols
    pub fn all_ipv4() -> Self {
        Self {
            ts_type: TsType::Ipv4AddrRange,
            ip_protocol_id: 0,
            start_port: 0,
            end_port: 65535,
            start_addr: IpAddr::V4([0, 0, 0, 0].into()),
            end_addr: IpAddr::V4([255, 255, 255, 255].into()),
        }
    }

    /// The selector matching all IPv6 addresses, ports and protocols
    pub fn all_ipv6() -> Self {
        Self {
            ts_type: TsType::Ipv6AddrRange,
            ip_protocol_id: 0,
            start_port: 0,
            end_port: 65535,
            start_addr: IpAddr::V6([0u8; 16].into()),
            end_addr: IpAddr::V6([0xffu8; 16].into()),
        }
    }

    /// Address family and shape of the selector
    pub fn ts_type(&self) -> TsType {
        self.ts_type
    }

    /// IP protocol the selector is restricted to, or zero for any
    pub fn ip_protocol_id(&self) -> u8 {
        self.ip_protocol_id
    }

    /// First port of the permitted range
    pub fn start_port(&self) -> u16 {
        self.start_port
    }

    /// Last port of the permitted range
    pub fn end_port(&self) -> u16 {
        self.end_port
    }

    /// First address of the permitted range
    pub fn start_addr(&self) -> IpAddr {
        self.start_addr
    }

    /// Last address of the permitted range
    pub fn end_addr(&self) -> IpAddr {
        self.end_addr
    }

    /// Length in octets of the encoded selector including its header
    pub fn encoded_len(&self) -> usize {
        match self.ts_type {
            TsType::Ipv4AddrRange => 16,
            TsType::Ipv6AddrRange => 40,
        }
    }

    /// Whether this selector covers every flow the other selector names
    pub fn contains(&self, other: &TrafficSelector) -> bool {
        self.ts_type == other.ts_type
            && (self.ip_protocol_id == 0 || self.ip_protocol_id == other.ip_protocol_id)
            && self.start_port <= other.start_port
            && self.end_port >= other.end_port
            && addr_le(self.start_addr, other.start_addr)
            && addr_le(other.end_addr, self.end_addr)
    }
}

fn addr_le(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.octets() <= b.octets(),
        (IpAddr::V6(a), IpAddr::V6(b)) => a.octets() <= b.octets(),
        _ => false,
    }
}
