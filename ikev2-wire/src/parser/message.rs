use log::warn;
use zerocopy::FromBytes;

use crate::definitions::header::{GenericPayloadHeader, IkeHeader};
use crate::definitions::params::{ExchangeType, PayloadType, FLAG_INITIATOR, FLAG_RESPONSE};
use crate::definitions::{IkeMessage, Payload, UnsupportedPayload};
use crate::parser::{payload, DecodeError};
use crate::{IKE_2_VERSION_VALUE, IKE_HEADER_LEN};

impl IkeMessage {
    /// Parse a buffer into an [IkeMessage], if possible.
    ///
    /// The parser considers the size of payloads noted in the header of the
    /// respective payload to split the buffer and feed them into sub-parser
    /// functions. A message must have both correct payload header
    /// information and inner structural integrity; otherwise parsing fails.
    ///
    /// The contents of SK and SKF payloads stay opaque; decrypt them and
    /// feed the plaintext to [decode_payload_list].
    pub fn try_parse(buf: &[u8]) -> Result<Self, DecodeError> {
        let header = IkeHeader::ref_from_prefix(buf).ok_or(DecodeError::BufferTooSmall)?;
        if header.version != IKE_2_VERSION_VALUE {
            return Err(DecodeError::WrongVersion);
        }
        if header.length.get() as usize != buf.len() {
            return Err(DecodeError::MessageLengthMismatch);
        }

        let payloads = decode_payload_list(header.next_payload, &buf[IKE_HEADER_LEN..])?;

        Ok(Self {
            initiator_spi: header.initiator_spi.get(),
            responder_spi: header.responder_spi.get(),
            exchange_type: ExchangeType::try_from(header.exchange_type)?,
            initiator: header.flags & FLAG_INITIATOR == FLAG_INITIATOR,
            response: header.flags & FLAG_RESPONSE == FLAG_RESPONSE,
            message_id: header.message_id.get(),
            payloads,
        })
    }
}

/// Walk a payload chain, starting with a payload of type `first_type`.
///
/// Fails with a syntax error when a payload declares a length that does not
/// even cover its generic header, that exceeds the remaining buffer, or when
/// bytes trail the terminal payload. Payload types this crate does not
/// understand are preserved as [Payload::Unsupported]; after the whole chain
/// was collected, any such payload with the critical bit set fails the chain
/// with [DecodeError::UnsupportedCriticalPayload] carrying the offending
/// types.
pub fn decode_payload_list(first_type: u8, buf: &[u8]) -> Result<Vec<Payload>, DecodeError> {
    let mut payloads = vec![];
    let mut critical_unsupported: Vec<u8> = vec![];
    let mut next_type = first_type;
    let mut offset = 0usize;

    while next_type != PayloadType::NoNextPayload as u8 {
        let header = GenericPayloadHeader::ref_from_prefix(&buf[offset..])
            .ok_or(DecodeError::BufferTooSmall)?;
        let declared = header.payload_length.get() as usize;
        if declared <= size_of::<GenericPayloadHeader>() || declared > buf.len() - offset {
            return Err(DecodeError::InvalidPayloadLength);
        }
        let body = &buf[offset + size_of::<GenericPayloadHeader>()..offset + declared];
        let current_type = next_type;
        next_type = header.next_payload;

        let decoded = match PayloadType::try_from(current_type) {
            Ok(PayloadType::NoNextPayload) => return Err(DecodeError::ProtocolViolation),
            Ok(known) => payload::decode_body(known, header, body)?,
            Err(_) => {
                if header.is_critical() {
                    critical_unsupported.push(current_type);
                } else {
                    warn!("Unsupported non-critical payload type ignored: {current_type}");
                }
                Payload::Unsupported(UnsupportedPayload {
                    payload_type: current_type,
                    critical: header.is_critical(),
                    data: body.to_vec(),
                })
            }
        };

        // SK and SKF reuse their next payload field for the first payload of
        // the decrypted contents and must terminate the outer chain
        if matches!(
            decoded,
            Payload::Encrypted(_) | Payload::EncryptedFragment(_)
        ) {
            next_type = PayloadType::NoNextPayload as u8;
        }

        offset += declared;
        payloads.push(decoded);
    }

    if offset != buf.len() {
        return Err(DecodeError::TrailingBytes);
    }
    if !critical_unsupported.is_empty() {
        return Err(DecodeError::UnsupportedCriticalPayload(critical_unsupported));
    }
    Ok(payloads)
}
