use zerocopy::network_endian::{U32, U64};
use zerocopy::AsBytes;

use crate::definitions::header::IkeHeader;
use crate::definitions::params::{PayloadType, FLAG_INITIATOR, FLAG_RESPONSE};
use crate::definitions::{IkeMessage, Payload};
use crate::generator::{BuildError, ESTIMATED_PAYLOAD_LENGTH};
use crate::{IKE_2_VERSION_VALUE, IKE_HEADER_LEN};

impl IkeMessage {
    /// Convert an [IkeMessage] into its network-level byte representation.
    ///
    /// The next payload field of each payload is set from the following
    /// payload's type, with the last payload using the no-next-payload
    /// sentinel. SK and SKF payloads carry the type of their first inner
    /// payload instead and must therefore be the last payload.
    pub fn try_build(&self) -> Result<Vec<u8>, BuildError> {
        if self.payloads.len() >= 255 {
            return Err(BuildError::TooManyPayloads);
        }
        let mut payloads = Vec::with_capacity(ESTIMATED_PAYLOAD_LENGTH * self.payloads.len());
        for (i, payload) in self.payloads.iter().enumerate() {
            let terminal = matches!(
                payload,
                Payload::Encrypted(_) | Payload::EncryptedFragment(_)
            );
            if terminal && i != self.payloads.len() - 1 {
                return Err(BuildError::EncryptedNotLast);
            }
            let next_payload = match self.payloads.get(i + 1) {
                None => PayloadType::NoNextPayload as u8,
                Some(next) => next.type_value(),
            };
            payloads.extend(payload.try_build(next_payload)?);
        }

        let packet_length = IKE_HEADER_LEN as u32 + payloads.len() as u32;
        let header = IkeHeader {
            initiator_spi: U64::from(self.initiator_spi),
            responder_spi: U64::from(self.responder_spi),
            next_payload: match self.payloads.first() {
                None => PayloadType::NoNextPayload as u8,
                Some(first) => first.type_value(),
            },
            version: IKE_2_VERSION_VALUE,
            exchange_type: self.exchange_type as u8,
            flags: (if self.initiator { FLAG_INITIATOR } else { 0 })
                | (if self.response { FLAG_RESPONSE } else { 0 }),
            message_id: U32::from(self.message_id),
            length: U32::from(packet_length),
        };

        let mut packet = Vec::with_capacity(packet_length as usize);
        packet.extend_from_slice(header.as_bytes());
        packet.extend(payloads);
        Ok(packet)
    }
}

/// Encode a bare payload chain without a message header, for example the
/// plaintext contents of an SK payload
pub fn encode_payload_list(payloads: &[Payload]) -> Result<Vec<u8>, BuildError> {
    let mut out = Vec::with_capacity(ESTIMATED_PAYLOAD_LENGTH * payloads.len());
    for (i, payload) in payloads.iter().enumerate() {
        let next_payload = match payloads.get(i + 1) {
            None => PayloadType::NoNextPayload as u8,
            Some(next) => next.type_value(),
        };
        out.extend(payload.try_build(next_payload)?);
    }
    Ok(out)
}
