//! Codec for the EAP message framing as per RFC 3748, section 4
//!
//! The layout is a 1-octet code, a 1-octet identifier, a 2-octet length
//! covering the whole message, and for Request and Response packets a
//! 1-octet type followed by type data. The declared length governs;
//! trailing bytes indicate a malformed packet.

use strum::EnumIter;
use thiserror::Error;

/// Minimum length of an EAP message, also the exact length of Success and
/// Failure messages
pub const EAP_HEADER_LEN: usize = 4;

/// Code of an EAP message
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum EapCode {
    Request = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

impl TryFrom<u8> for EapCode {
    type Error = EapDecodeError;

    fn try_from(value: u8) -> Result<Self, EapDecodeError> {
        match value {
            1 => Ok(EapCode::Request),
            2 => Ok(EapCode::Response),
            3 => Ok(EapCode::Success),
            4 => Ok(EapCode::Failure),
            _ => Err(EapDecodeError::UnknownCode(value)),
        }
    }
}

/// Method types this crate can negotiate, used both for dispatch and to
/// build the Nak method list
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum EapMethodType {
    Sim = 18,
    Ttls = 21,
    Aka = 23,
    MsChapV2 = 26,
    AkaPrime = 50,
}

/// Type value of an Identity request or response
pub const TYPE_IDENTITY: u8 = 1;
/// Type value of a Notification request or response
pub const TYPE_NOTIFICATION: u8 = 2;
/// Type value of a legacy Nak response
pub const TYPE_NAK: u8 = 3;

/// Failure while decoding an EAP message from its byte representation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum EapDecodeError {
    #[error("Buffer too small to hold an EAP message")]
    BufferTooSmall,
    #[error("Unknown EAP code {0}")]
    UnknownCode(u8),
    #[error("Declared length is smaller than the header")]
    LengthTooSmall,
    #[error("Declared length exceeds the buffer")]
    LengthExceedsBuffer,
    #[error("Trailing bytes after the declared length")]
    TrailingBytes,
    #[error("Success and Failure messages must have length 4")]
    UnexpectedData,
    #[error("Request or Response without a type octet")]
    MissingType,
    #[error("Attribute overruns the remaining type data")]
    AttributeOverrun,
    #[error("Attribute with invalid structure")]
    InvalidAttribute,
}

/// A single EAP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapMessage {
    /// Code of the message
    pub code: EapCode,
    /// Identifier matching responses to requests
    pub identifier: u8,
    /// Type and type data, absent on Success and Failure
    pub data: Option<EapTypeData>,
}

/// Type and type data of a Request or Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapTypeData {
    /// The method type value
    pub eap_type: u8,
    /// The raw type data
    pub type_data: Vec<u8>,
}

impl EapMessage {
    /// Construct a Request or Response message
    pub fn new(code: EapCode, identifier: u8, eap_type: u8, type_data: Vec<u8>) -> Self {
        Self {
            code,
            identifier,
            data: Some(EapTypeData {
                eap_type,
                type_data,
            }),
        }
    }

    /// Parse a buffer into an [EapMessage], if possible
    pub fn try_parse(buf: &[u8]) -> Result<Self, EapDecodeError> {
        if buf.len() < EAP_HEADER_LEN {
            return Err(EapDecodeError::BufferTooSmall);
        }
        let code = EapCode::try_from(buf[0])?;
        let identifier = buf[1];
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if length < EAP_HEADER_LEN {
            return Err(EapDecodeError::LengthTooSmall);
        }
        if length > buf.len() {
            return Err(EapDecodeError::LengthExceedsBuffer);
        }
        if length < buf.len() {
            return Err(EapDecodeError::TrailingBytes);
        }

        let data = match code {
            EapCode::Success | EapCode::Failure => {
                if length != EAP_HEADER_LEN {
                    return Err(EapDecodeError::UnexpectedData);
                }
                None
            }
            EapCode::Request | EapCode::Response => {
                if length == EAP_HEADER_LEN {
                    return Err(EapDecodeError::MissingType);
                }
                Some(EapTypeData {
                    eap_type: buf[4],
                    type_data: buf[5..length].to_vec(),
                })
            }
        };

        Ok(Self {
            code,
            identifier,
            data,
        })
    }

    /// Convert an [EapMessage] into its byte representation
    pub fn build(&self) -> Vec<u8> {
        let length = EAP_HEADER_LEN
            + self
                .data
                .as_ref()
                .map(|d| 1 + d.type_data.len())
                .unwrap_or(0);
        let mut packet = Vec::with_capacity(length);
        packet.push(self.code as u8);
        packet.push(self.identifier);
        packet.extend_from_slice(&(length as u16).to_be_bytes());
        if let Some(data) = &self.data {
            packet.push(data.eap_type);
            packet.extend_from_slice(&data.type_data);
        }
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn parse_success_and_failure() {
        let success = EapMessage::try_parse(&[0x03, 0x42, 0x00, 0x04]).unwrap();
        assert_eq!(success.code, EapCode::Success);
        assert_eq!(success.identifier, 0x42);
        assert_eq!(success.data, None);
        assert_eq!(success.build(), vec![0x03, 0x42, 0x00, 0x04]);

        let failure = EapMessage::try_parse(&[0x04, 0x07, 0x00, 0x04]).unwrap();
        assert_eq!(failure.code, EapCode::Failure);
        assert_eq!(failure.build().len(), 4);
    }

    #[test]
    fn reject_success_with_data() {
        assert_eq!(
            EapMessage::try_parse(&[0x03, 0x42, 0x00, 0x05, 0x01]),
            Err(EapDecodeError::UnexpectedData)
        );
    }

    #[test]
    fn reject_trailing_bytes() {
        assert_eq!(
            EapMessage::try_parse(&[0x03, 0x42, 0x00, 0x04, 0xff]),
            Err(EapDecodeError::TrailingBytes)
        );
    }

    #[test]
    fn reject_truncated_message() {
        assert_eq!(
            EapMessage::try_parse(&[0x01, 0x42, 0x00, 0x08, 0x01]),
            Err(EapDecodeError::LengthExceedsBuffer)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn parse_identity_request() {
        let request = EapMessage::try_parse(&[0x01, 0x01, 0x00, 0x05, 0x01]).unwrap();
        assert_eq!(request.code, EapCode::Request);
        let data = request.data.unwrap();
        assert_eq!(data.eap_type, TYPE_IDENTITY);
        assert!(data.type_data.is_empty());
    }
}
