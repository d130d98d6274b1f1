//! IKEv2 parameters and their parsers as defined in the IANA IKEv2 list
//! found at https://www.iana.org/assignments/ikev2-parameters/ikev2-parameters.xhtml

use serde::{Deserialize, Serialize};
use strum::EnumIter;

use super::UnparseableParameter;

/// Flag bit for the fixed-length TV attribute format
pub const FLAG_ATTRIBUTE_FORMAT: u16 = 0x8000;

/// Attribute type of the key length transform attribute
pub const ATTRIBUTE_TYPE_KEY_LENGTH: u16 = 14;

/// Flag bit set by the original initiator of the IKE SA
pub const FLAG_INITIATOR: u8 = 0b00001000;
/// Flag bit indicating the sender can speak a higher major version
pub const FLAG_VERSION: u8 = 0b00010000;
/// Flag bit set on responses to a request with the same message ID
pub const FLAG_RESPONSE: u8 = 0b00100000;

/// Type of the exchange being used
///
/// This constrains the payloads sent in each message in an exchange.
/// Notably, values 0-33 are reserved, 39-239 are currently unassigned
/// or taken by extensions this engine does not speak, and 240-255 are
/// reserved for private use. Also see [UnparseableParameter].
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ExchangeType {
    // RFC 7296
    IkeSaInit = 34,
    // RFC 7296
    IkeAuth = 35,
    // RFC 7296
    CreateChildSa = 36,
    // RFC 7296
    Informational = 37,
    // RFC5723
    IkeSessionResume = 38,
}

impl TryFrom<u8> for ExchangeType {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=33 => Err(UnparseableParameter::Reserved),
            34 => Ok(ExchangeType::IkeSaInit),
            35 => Ok(ExchangeType::IkeAuth),
            36 => Ok(ExchangeType::CreateChildSa),
            37 => Ok(ExchangeType::Informational),
            38 => Ok(ExchangeType::IkeSessionResume),
            39..=239 => Err(UnparseableParameter::Unassigned),
            240..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Type of a payload inside an IKEv2 message
///
/// Refer to https://www.iana.org/assignments/ikev2-parameters/ikev2-parameters.xhtml
/// for details. Notably, values 1-32 are reserved for IKEv1 payloads,
/// 55-127 are currently unassigned and 128-255 reserved for private use.
/// Values that do not parse into this enum are preserved by the parser as
/// unsupported payloads instead of failing outright; whether that is fatal
/// depends on the critical bit of the offending payload.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum PayloadType {
    // RFC 7296, this also matches the IKEv1 value while all other values do not
    NoNextPayload = 0,
    // RFC 7296
    SecurityAssociation = 33,
    // RFC 7296
    KeyExchange = 34,
    // RFC 7296
    IdentificationInitiator = 35,
    // RFC 7296
    IdentificationResponder = 36,
    // RFC 7296
    Certificate = 37,
    // RFC 7296
    CertificateRequest = 38,
    // RFC 7296
    Authentication = 39,
    // RFC 7296
    Nonce = 40,
    // RFC 7296
    Notify = 41,
    // RFC 7296
    Delete = 42,
    // RFC 7296
    VendorID = 43,
    // RFC 7296
    TrafficSelectorInitiator = 44,
    // RFC 7296
    TrafficSelectorResponder = 45,
    // RFC 7296
    EncryptedAndAuthenticated = 46,
    // RFC 7296
    Configuration = 47,
    // RFC 7296
    ExtensibleAuthentication = 48,
    // RFC 7383
    EncryptedAndAuthenticatedFragment = 53,
}

impl TryFrom<u8> for PayloadType {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PayloadType::NoNextPayload),
            1..=32 => Err(UnparseableParameter::Reserved),
            33 => Ok(PayloadType::SecurityAssociation),
            34 => Ok(PayloadType::KeyExchange),
            35 => Ok(PayloadType::IdentificationInitiator),
            36 => Ok(PayloadType::IdentificationResponder),
            37 => Ok(PayloadType::Certificate),
            38 => Ok(PayloadType::CertificateRequest),
            39 => Ok(PayloadType::Authentication),
            40 => Ok(PayloadType::Nonce),
            41 => Ok(PayloadType::Notify),
            42 => Ok(PayloadType::Delete),
            43 => Ok(PayloadType::VendorID),
            44 => Ok(PayloadType::TrafficSelectorInitiator),
            45 => Ok(PayloadType::TrafficSelectorResponder),
            46 => Ok(PayloadType::EncryptedAndAuthenticated),
            47 => Ok(PayloadType::Configuration),
            48 => Ok(PayloadType::ExtensibleAuthentication),
            49..=52 => Err(UnparseableParameter::Unassigned),
            53 => Ok(PayloadType::EncryptedAndAuthenticatedFragment),
            54..=127 => Err(UnparseableParameter::Unassigned),
            128..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Type of the transform being used
///
/// Value 0 is reserved, 6-240 is unassigned or belongs to extensions this
/// engine does not negotiate, and 241-255 is reserved for private use.
/// Also see [UnparseableParameter].
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, EnumIter, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TransformType {
    EncryptionAlgorithm = 1,
    PseudoRandomFunction = 2,
    IntegrityAlgorithm = 3,
    KeyExchangeMethod = 4,
    SequenceNumber = 5,
}

impl TryFrom<u8> for TransformType {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Err(UnparseableParameter::Reserved),
            1 => Ok(TransformType::EncryptionAlgorithm),
            2 => Ok(TransformType::PseudoRandomFunction),
            3 => Ok(TransformType::IntegrityAlgorithm),
            4 => Ok(TransformType::KeyExchangeMethod),
            5 => Ok(TransformType::SequenceNumber),
            6..=240 => Err(UnparseableParameter::Unassigned),
            241..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Transform IDs of type 1, the encryption algorithms
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, EnumIter, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum EncryptionId {
    TripleDes = 3,
    Null = 11,
    AesCbc = 12,
    AesCtr = 13,
    AesCcm8 = 14,
    AesCcm12 = 15,
    AesCcm16 = 16,
    AesGcm8 = 18,
    AesGcm12 = 19,
    AesGcm16 = 20,
    ChaCha20Poly1305 = 28,
}

impl TryFrom<u16> for EncryptionId {
    type Error = UnparseableParameter;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Err(UnparseableParameter::Reserved),
            3 => Ok(EncryptionId::TripleDes),
            11 => Ok(EncryptionId::Null),
            12 => Ok(EncryptionId::AesCbc),
            13 => Ok(EncryptionId::AesCtr),
            14 => Ok(EncryptionId::AesCcm8),
            15 => Ok(EncryptionId::AesCcm12),
            16 => Ok(EncryptionId::AesCcm16),
            18 => Ok(EncryptionId::AesGcm8),
            19 => Ok(EncryptionId::AesGcm12),
            20 => Ok(EncryptionId::AesGcm16),
            28 => Ok(EncryptionId::ChaCha20Poly1305),
            1..=2 | 4..=10 | 17 | 21..=27 | 29..=1023 => Err(UnparseableParameter::Unassigned),
            1024..=65535 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Transform IDs of type 2, the pseudorandom functions
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, EnumIter, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum PrfId {
    HmacMd5 = 1,
    HmacSha1 = 2,
    AesXcbc = 4,
    HmacSha2_256 = 5,
    HmacSha2_384 = 6,
    HmacSha2_512 = 7,
    AesCmac = 8,
}

impl TryFrom<u16> for PrfId {
    type Error = UnparseableParameter;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Err(UnparseableParameter::Reserved),
            1 => Ok(PrfId::HmacMd5),
            2 => Ok(PrfId::HmacSha1),
            4 => Ok(PrfId::AesXcbc),
            5 => Ok(PrfId::HmacSha2_256),
            6 => Ok(PrfId::HmacSha2_384),
            7 => Ok(PrfId::HmacSha2_512),
            8 => Ok(PrfId::AesCmac),
            3 | 9..=1023 => Err(UnparseableParameter::Unassigned),
            1024..=65535 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Transform IDs of type 3, the integrity algorithms
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, EnumIter, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum IntegrityId {
    None = 0,
    HmacMd5_96 = 1,
    HmacSha1_96 = 2,
    AesXcbc96 = 5,
    AesCmac96 = 8,
    HmacSha2_256_128 = 12,
    HmacSha2_384_192 = 13,
    HmacSha2_512_256 = 14,
}

impl TryFrom<u16> for IntegrityId {
    type Error = UnparseableParameter;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(IntegrityId::None),
            1 => Ok(IntegrityId::HmacMd5_96),
            2 => Ok(IntegrityId::HmacSha1_96),
            5 => Ok(IntegrityId::AesXcbc96),
            8 => Ok(IntegrityId::AesCmac96),
            12 => Ok(IntegrityId::HmacSha2_256_128),
            13 => Ok(IntegrityId::HmacSha2_384_192),
            14 => Ok(IntegrityId::HmacSha2_512_256),
            3..=4 | 6..=7 | 9..=11 | 15..=1023 => Err(UnparseableParameter::Unassigned),
            1024..=65535 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Transform IDs of type 4, the key exchange methods
///
/// This transform type was originally named "Diffie-Hellman Group (D-H)"
/// and was referenced by that name in a number of RFCs published prior
/// to RFC 9370, which gave it the current title.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, EnumIter, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum DhGroupId {
    None = 0,
    ModP768 = 1,
    ModP1024 = 2,
    ModP1536 = 5,
    ModP2048 = 14,
    ModP3072 = 15,
    ModP4096 = 16,
    ModP6144 = 17,
    ModP8192 = 18,
    Ecp256 = 19,
    Ecp384 = 20,
    Ecp521 = 21,
    Curve25519 = 31,
    Curve448 = 32,
}

impl TryFrom<u16> for DhGroupId {
    type Error = UnparseableParameter;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DhGroupId::None),
            1 => Ok(DhGroupId::ModP768),
            2 => Ok(DhGroupId::ModP1024),
            5 => Ok(DhGroupId::ModP1536),
            14 => Ok(DhGroupId::ModP2048),
            15 => Ok(DhGroupId::ModP3072),
            16 => Ok(DhGroupId::ModP4096),
            17 => Ok(DhGroupId::ModP6144),
            18 => Ok(DhGroupId::ModP8192),
            19 => Ok(DhGroupId::Ecp256),
            20 => Ok(DhGroupId::Ecp384),
            21 => Ok(DhGroupId::Ecp521),
            31 => Ok(DhGroupId::Curve25519),
            32 => Ok(DhGroupId::Curve448),
            3..=4 | 6..=13 | 22..=30 | 33..=1023 => Err(UnparseableParameter::Unassigned),
            1024..=65535 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Transform IDs of type 5, the extended sequence number mode
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, EnumIter, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum EsnId {
    None = 0,
    ExtendedSequenceNumbers = 1,
}

impl TryFrom<u16> for EsnId {
    type Error = UnparseableParameter;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EsnId::None),
            1 => Ok(EsnId::ExtendedSequenceNumbers),
            2..=65535 => Err(UnparseableParameter::Unassigned),
        }
    }
}

/// Security protocol identifier used in proposals, notifies and deletes
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Protocol {
    InternetKeyExchange = 1,
    AuthenticationHeader = 2,
    EncapsulatingSecurityPayload = 3,
}

impl TryFrom<u8> for Protocol {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Err(UnparseableParameter::Reserved),
            1 => Ok(Protocol::InternetKeyExchange),
            2 => Ok(Protocol::AuthenticationHeader),
            3 => Ok(Protocol::EncapsulatingSecurityPayload),
            4..=200 => Err(UnparseableParameter::Unassigned),
            201..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Error notification types, all below 16384
///
/// An implementation receiving a Notify payload with one of these types
/// that it does not recognize in a response MUST assume that the
/// corresponding request has failed entirely.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum NotifyError {
    UnsupportedCriticalPayload = 1,
    InvalidIkeSpi = 4,
    InvalidMajorVersion = 5,
    InvalidSyntax = 7,
    InvalidMessageId = 9,
    InvalidSpi = 11,
    NoProposalChosen = 14,
    InvalidKeyExchangePayload = 17,
    AuthenticationFailed = 24,
    SinglePairRequired = 34,
    NoAdditionalSas = 35,
    InternalAddressFailure = 36,
    FailedCpRequired = 37,
    TsUnacceptable = 38,
    InvalidSelectors = 39,
    TemporaryFailure = 43,
    ChildSaNotFound = 44,
}

impl TryFrom<u16> for NotifyError {
    type Error = UnparseableParameter;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NotifyError::UnsupportedCriticalPayload),
            4 => Ok(NotifyError::InvalidIkeSpi),
            5 => Ok(NotifyError::InvalidMajorVersion),
            7 => Ok(NotifyError::InvalidSyntax),
            9 => Ok(NotifyError::InvalidMessageId),
            11 => Ok(NotifyError::InvalidSpi),
            14 => Ok(NotifyError::NoProposalChosen),
            17 => Ok(NotifyError::InvalidKeyExchangePayload),
            24 => Ok(NotifyError::AuthenticationFailed),
            34 => Ok(NotifyError::SinglePairRequired),
            35 => Ok(NotifyError::NoAdditionalSas),
            36 => Ok(NotifyError::InternalAddressFailure),
            37 => Ok(NotifyError::FailedCpRequired),
            38 => Ok(NotifyError::TsUnacceptable),
            39 => Ok(NotifyError::InvalidSelectors),
            43 => Ok(NotifyError::TemporaryFailure),
            44 => Ok(NotifyError::ChildSaNotFound),
            0 | 2..=3 | 6 | 8 | 10 | 12..=13 | 15..=16 | 18..=23 | 25..=33 | 40..=42 => {
                Err(UnparseableParameter::Reserved)
            }
            45..=8191 => Err(UnparseableParameter::Unassigned),
            8192..=16383 => Err(UnparseableParameter::PrivateUse),
            16384..=65535 => Err(UnparseableParameter::OutOfRange),
        }
    }
}

/// Status notification types, all from 16384 upwards
///
/// Unrecognized status types MUST be ignored; they are preserved by the
/// parser as raw values instead.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum NotifyStatus {
    InitialContact = 16384,
    SetWindowSize = 16385,
    AdditionalTsPossible = 16386,
    IpcompSupported = 16387,
    NatDetectionSourceIp = 16388,
    NatDetectionDestinationIp = 16389,
    Cookie = 16390,
    UseTransportMode = 16391,
    HttpCertLookupSupported = 16392,
    RekeySa = 16393,
    EspTfcPaddingNotSupported = 16394,
    NonFirstFragmentsAlso = 16395,
    // RFC 7383
    FragmentationSupported = 16430,
    // RFC 7427
    SignatureHashAlgorithms = 16431,
}

impl TryFrom<u16> for NotifyStatus {
    type Error = UnparseableParameter;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0..=16383 => Err(UnparseableParameter::OutOfRange),
            16384 => Ok(NotifyStatus::InitialContact),
            16385 => Ok(NotifyStatus::SetWindowSize),
            16386 => Ok(NotifyStatus::AdditionalTsPossible),
            16387 => Ok(NotifyStatus::IpcompSupported),
            16388 => Ok(NotifyStatus::NatDetectionSourceIp),
            16389 => Ok(NotifyStatus::NatDetectionDestinationIp),
            16390 => Ok(NotifyStatus::Cookie),
            16391 => Ok(NotifyStatus::UseTransportMode),
            16392 => Ok(NotifyStatus::HttpCertLookupSupported),
            16393 => Ok(NotifyStatus::RekeySa),
            16394 => Ok(NotifyStatus::EspTfcPaddingNotSupported),
            16395 => Ok(NotifyStatus::NonFirstFragmentsAlso),
            16430 => Ok(NotifyStatus::FragmentationSupported),
            16431 => Ok(NotifyStatus::SignatureHashAlgorithms),
            16396..=16429 | 16432..=40959 => Err(UnparseableParameter::Unassigned),
            40960..=65535 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Type of identification carried by IDi and IDr payloads
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum IdType {
    Ipv4Addr = 1,
    Fqdn = 2,
    Rfc822Addr = 3,
    Ipv6Addr = 5,
    DerAsn1Dn = 9,
    DerAsn1Gn = 10,
    KeyId = 11,
}

impl TryFrom<u8> for IdType {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 | 4 | 6..=8 => Err(UnparseableParameter::Reserved),
            1 => Ok(IdType::Ipv4Addr),
            2 => Ok(IdType::Fqdn),
            3 => Ok(IdType::Rfc822Addr),
            5 => Ok(IdType::Ipv6Addr),
            9 => Ok(IdType::DerAsn1Dn),
            10 => Ok(IdType::DerAsn1Gn),
            11 => Ok(IdType::KeyId),
            12..=200 => Err(UnparseableParameter::Unassigned),
            201..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Indicator for the encoding of certificates and related data
///
/// Values 0 and 5 are reserved, 16-200 are unassigned and 201-255 are reserved for private use.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Copy, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum CertEncoding {
    PKCS7WrappedX509Certificate = 1,
    PGPCertificate = 2,
    DNSSignedKey = 3,
    X509CertificateSignature = 4,
    KerberosTokens = 6,
    CertificateRevocationList = 7,
    AuthorityRevocationList = 8,
    SPKICertificate = 9,
    X509CertificateAttribute = 10,
    RawRSAKey = 11, // deprecated
    HashUrlX509Certificate = 12,
    HashUrlX509Bundle = 13,
    OCSPContent = 14,
    RawPublicKey = 15,
}

impl TryFrom<u8> for CertEncoding {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Err(UnparseableParameter::Reserved),
            1 => Ok(CertEncoding::PKCS7WrappedX509Certificate),
            2 => Ok(CertEncoding::PGPCertificate),
            3 => Ok(CertEncoding::DNSSignedKey),
            4 => Ok(CertEncoding::X509CertificateSignature),
            5 => Err(UnparseableParameter::Reserved),
            6 => Ok(CertEncoding::KerberosTokens),
            7 => Ok(CertEncoding::CertificateRevocationList),
            8 => Ok(CertEncoding::AuthorityRevocationList),
            9 => Ok(CertEncoding::SPKICertificate),
            10 => Ok(CertEncoding::X509CertificateAttribute),
            11 => Ok(CertEncoding::RawRSAKey),
            12 => Ok(CertEncoding::HashUrlX509Certificate),
            13 => Ok(CertEncoding::HashUrlX509Bundle),
            14 => Ok(CertEncoding::OCSPContent),
            15 => Ok(CertEncoding::RawPublicKey),
            16..=200 => Err(UnparseableParameter::Unassigned),
            201..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Type of authentication method being used in the AUTH payload
///
/// Value 0 is reserved, values 4-8 and 15-200 are unassigned and
/// values 201-255 are reserved for private use.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Copy, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum AuthMethod {
    RSADigitalSignature = 1,
    SharedKeyMessageIntegrityCode = 2,
    DSSDigitalSignature = 3,
    ECDSAWithSHA256 = 9,  // with P-256 curve
    ECDSAWithSHA384 = 10, // with P-384 curve
    ECDSAWithSHA512 = 11, // with P-521 curve
    GenericSecurePassword = 12,
    NULLAuthentication = 13,
    DigitalSignature = 14,
}

impl TryFrom<u8> for AuthMethod {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Err(UnparseableParameter::Reserved),
            1 => Ok(AuthMethod::RSADigitalSignature),
            2 => Ok(AuthMethod::SharedKeyMessageIntegrityCode),
            3 => Ok(AuthMethod::DSSDigitalSignature),
            4..=8 => Err(UnparseableParameter::Unassigned),
            9 => Ok(AuthMethod::ECDSAWithSHA256),
            10 => Ok(AuthMethod::ECDSAWithSHA384),
            11 => Ok(AuthMethod::ECDSAWithSHA512),
            12 => Ok(AuthMethod::GenericSecurePassword),
            13 => Ok(AuthMethod::NULLAuthentication),
            14 => Ok(AuthMethod::DigitalSignature),
            15..=200 => Err(UnparseableParameter::Unassigned),
            201..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Address family and shape of a traffic selector
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TsType {
    Ipv4AddrRange = 7,
    Ipv6AddrRange = 8,
}

impl TryFrom<u8> for TsType {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=6 => Err(UnparseableParameter::Reserved),
            7 => Ok(TsType::Ipv4AddrRange),
            8 => Ok(TsType::Ipv6AddrRange),
            9..=240 => Err(UnparseableParameter::Unassigned),
            241..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}

/// Kind of configuration exchange carried by a CP payload
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum CfgType {
    Request = 1,
    Reply = 2,
    Set = 3,
    Ack = 4,
}

impl TryFrom<u8> for CfgType {
    type Error = UnparseableParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Err(UnparseableParameter::Reserved),
            1 => Ok(CfgType::Request),
            2 => Ok(CfgType::Reply),
            3 => Ok(CfgType::Set),
            4 => Ok(CfgType::Ack),
            5..=127 => Err(UnparseableParameter::Unassigned),
            128..=255 => Err(UnparseableParameter::PrivateUse),
        }
    }
}
