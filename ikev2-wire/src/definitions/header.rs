//! Module containing network level header structs for pieces of the protocol

use zerocopy::network_endian::{U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// Flag bit signalling that the critical payload must be understood by the receiver
pub const FLAG_CRITICAL: u8 = 0b10000000;

/// Protocol header for an IKEv2 message
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                       IKE SA Initiator's SPI                  |
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                       IKE SA Responder's SPI                  |
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                          Message ID                           |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                            Length                             |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct IkeHeader {
    /// SPI chosen by the initiator of the IKE SA, must never be zero
    pub initiator_spi: U64,
    /// SPI chosen by the responder, zero in the first message of IKE_SA_INIT
    pub responder_spi: U64,
    /// Type of the first payload following the header
    pub next_payload: u8,
    /// Major and minor version, must be 0x20 for IKEv2
    pub version: u8,
    /// Type of the exchange this message belongs to, see
    /// [ExchangeType](super::params::ExchangeType)
    pub exchange_type: u8,
    /// Flag bits: bit 3 initiator, bit 4 version, bit 5 response
    pub flags: u8,
    /// Message identifier used to match requests and responses and to
    /// protect against replays, monotonically increasing per direction
    pub message_id: U32,
    /// Length of the total message including this header
    pub length: U32,
}

/// Generic payload header shared by every IKEv2 payload
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     | Next Payload  |C|  RESERVED   |         Payload Length        |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct GenericPayloadHeader {
    /// Type of the payload following this payload, or zero for the last one
    pub next_payload: u8,
    /// The critical bit plus seven reserved bits; a payload with the
    /// critical bit set must be rejected when its type is not understood
    pub critical_reserved: u8,
    /// Length in octets of the payload, including this header
    pub payload_length: U16,
}

impl GenericPayloadHeader {
    /// Whether the critical bit is set on this payload
    pub fn is_critical(&self) -> bool {
        self.critical_reserved & FLAG_CRITICAL == FLAG_CRITICAL
    }
}

/// Protocol header for a Proposal substructure of a Security Association
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     | Last Substruc |   RESERVED    |         Proposal Length       |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     | Proposal Num  |  Protocol ID  |    SPI Size   |Num  Transforms|
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     ~                        SPI (variable)                         ~
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                        <Transforms>                           ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct ProposalHeader {
    /// 0 for the last proposal of the Security Association, 2 otherwise
    pub last_substruct: u8,
    /// Reserved, must be zero and must be ignored on receipt
    pub reserved: u8,
    /// Length in octets of the current Proposal, including the header itself
    pub proposal_length: U16,
    /// Number of this Proposal, starting at 1 and incrementing by 1
    pub proposal_num: u8,
    /// Identifier for the protocol the Proposal negotiates, see
    /// [Protocol](super::params::Protocol)
    pub protocol_id: u8,
    /// Size of the SPI carried by the Proposal in octets; zero during
    /// IKE_SA_INIT, 8 for IKE rekeys and 4 for ESP and AH
    pub spi_size: u8,
    /// Number of transform substructures following the SPI
    pub num_transforms: u8,
}

/// Protocol header for a Transform substructure of a Proposal
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     | Last Substruc |   RESERVED    |        Transform Length       |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |Transform Type |   RESERVED    |          Transform ID         |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                      Transform Attributes                     ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct TransformHeader {
    /// 0 for the last transform of the Proposal, 3 otherwise
    pub last_substruct: u8,
    /// Reserved, must be zero and must be ignored on receipt
    pub reserved: u8,
    /// Length in octets of the current Transform, including the header itself
    pub transform_length: U16,
    /// Type of the transformation, see RFC 7296, section 3.3.2; also see
    /// [TransformType](super::params::TransformType)
    pub transform_type: u8,
    /// Reserved, must be zero and must be ignored on receipt
    pub reserved2: u8,
    /// Identifier of the concrete algorithm within the transform type
    pub transform_id: U16,
}

/// Protocol field for attributes of a Transform as per RFC 7296, section 3.3.5
///
/// ```text
///                         1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |A|       Attribute Type        |    AF=0  Attribute Length     |
///     |F|                             |    AF=1  Attribute Value      |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                   AF=0  Attribute Value                       |
///     |                   AF=1  Not Transmitted                       |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only the fixed-length TV form is used by the single attribute IKEv2
/// defines (the key length), so the value is carried in the header itself.
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct AttributeHeader {
    /// Type of the attribute; the top bit selects the fixed-length TV form
    pub attribute_type: U16,
    /// Fixed-length attribute value, the key length in bits
    pub attribute_value: U16,
}

impl AttributeHeader {
    /// Determine whether the fixed-length TV variant is used or the variable-length TLV variant
    pub fn is_fixed_length(&self) -> bool {
        u16::from(self.attribute_type) & super::params::FLAG_ATTRIBUTE_FORMAT
            == super::params::FLAG_ATTRIBUTE_FORMAT
    }
}

/// Protocol header for key exchange payloads
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |   Diffie-Hellman Group Num    |           RESERVED            |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                       Key Exchange Data                       ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct KeyExchangeHeader {
    /// DH group number as per [DhGroupId](super::params::DhGroupId), must
    /// match a group offered in the SA payload of the same message
    pub dh_group_num: U16,
    /// Ignored but must be set to 0
    pub reserved: U16,
}

/// Protocol header for identification payloads (IDi and IDr)
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |   ID Type     |                 RESERVED                      |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                   Identification Data                         ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct IdentificationHeader {
    /// Type of identification used, see [IdType](super::params::IdType)
    pub id_type: u8,
    /// Reserved, must be zero and must be ignored on receipt
    pub reserved: [u8; 3],
}

/// Protocol header for authentication payloads
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct AuthenticationHeader {
    /// Method used to compute the authentication data, see
    /// [AuthMethod](super::params::AuthMethod)
    pub auth_method: u8,
    /// Reserved, must be zero and must be ignored on receipt
    pub reserved: [u8; 3],
}

/// Protocol header for notify payloads
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |  Protocol ID  |   SPI Size    |      Notify Message Type      |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                Security Parameter Index (SPI)                 ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                       Notification Data                       ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct NotifyHeader {
    /// Type of the SA the notification concerns, or zero when no SPI is sent
    pub protocol_id: u8,
    /// Length in octets of the SPI field, or zero if no SPI is applicable
    pub spi_size: u8,
    /// Type of the notification; values below 16384 report errors, values
    /// from 16384 upwards report status
    pub notify_message_type: U16,
}

impl NotifyHeader {
    /// Whether the notification reports an error rather than a status
    pub fn is_error(&self) -> bool {
        self.notify_message_type.get() < 16384
    }
}

/// Protocol header for delete payloads
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |  Protocol ID  |   SPI Size    |          Num of SPIs          |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~               Security Parameter Index(es) (SPI)              ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct DeleteHeader {
    /// Protocol of the SAs being deleted, see [Protocol](super::params::Protocol)
    pub protocol_id: u8,
    /// Size of a single SPI in octets; zero for the IKE SA itself
    pub spi_size: u8,
    /// Number of SPIs following the header
    pub num_spis: U16,
}

/// Protocol header for traffic selector payloads (TSi and TSr)
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     | Number of TSs |                 RESERVED                      |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                       <Traffic Selectors>                     ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct TrafficSelectorPayloadHeader {
    /// Number of traffic selector substructures following the header
    pub number_of_ts: u8,
    /// Reserved, must be zero and must be ignored on receipt
    pub reserved: [u8; 3],
}

/// Protocol header for a single traffic selector substructure
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |   TS Type     |IP Protocol ID*|       Selector Length         |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |           Start Port*         |           End Port*           |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                         Starting Address*                     ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                         Ending Address*                       ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct TrafficSelectorHeader {
    /// Address family and shape of the selector, see [TsType](super::params::TsType)
    pub ts_type: u8,
    /// IP protocol the selector is restricted to, or zero for any
    pub ip_protocol_id: u8,
    /// Length in octets of the selector, including this header; 16 for
    /// IPv4 address ranges and 40 for IPv6 address ranges
    pub selector_length: U16,
    /// First port of the permitted range
    pub start_port: U16,
    /// Last port of the permitted range
    pub end_port: U16,
}

/// Protocol header for configuration payloads
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct ConfigurationHeader {
    /// Kind of configuration exchange, see [CfgType](super::params::CfgType)
    pub cfg_type: u8,
    /// Reserved, must be zero and must be ignored on receipt
    pub reserved: [u8; 3],
}

/// Protocol field for a configuration attribute
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct ConfigurationAttributeHeader {
    /// Attribute type with the top bit reserved and sent as zero
    pub attribute_type: U16,
    /// Length in octets of the value following the header
    pub length: U16,
}

/// Protocol header for a single certificate or certificate request payload
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct CertificateHeader {
    /// Encoding of the certificate data, see
    /// [CertEncoding](super::params::CertEncoding)
    pub cert_encoding: u8,
}

/// Protocol header for an Encrypted Fragment payload as per RFC 7383
///
/// ```text
///                          1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |        Fragment Number        |        Total Fragments        |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     ~                      Encrypted content                        ~
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct EncryptedFragmentHeader {
    /// Number of this fragment, counting from 1
    pub fragment_number: U16,
    /// Total number of fragments the message was split into
    pub total_fragments: U16,
}
