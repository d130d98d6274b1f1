//! Decoders for the SA payload and its proposal and transform substructures

use zerocopy::FromBytes;

use crate::definitions::header::{AttributeHeader, ProposalHeader, TransformHeader};
use crate::definitions::params::{
    DhGroupId, EncryptionId, EsnId, IntegrityId, PrfId, Protocol, TransformType,
    ATTRIBUTE_TYPE_KEY_LENGTH, FLAG_ATTRIBUTE_FORMAT,
};
use crate::definitions::{Proposal, SecurityAssociation, Transform};
use crate::parser::DecodeError;

/// Parses an SA payload body into a [SecurityAssociation]. The buffer must
/// not contain the generic payload header, only the list of proposals.
pub(crate) fn parse_security_association(buf: &[u8]) -> Result<SecurityAssociation, DecodeError> {
    let mut proposals: Vec<Proposal> = vec![];
    let mut offset = 0usize;

    while offset < buf.len() {
        let header =
            ProposalHeader::ref_from_prefix(&buf[offset..]).ok_or(DecodeError::BufferTooSmall)?;
        let declared = header.proposal_length.get() as usize;
        if declared < size_of::<ProposalHeader>() || declared > buf.len() - offset {
            return Err(DecodeError::InvalidPayloadLength);
        }

        let proposal = parse_proposal(header, &buf[offset..offset + declared])?;
        match proposals.last() {
            None if proposal.number != 1 => {
                return Err(DecodeError::InvalidProposalNumberingStart)
            }
            Some(previous) if proposal.number != previous.number + 1 => {
                return Err(DecodeError::InvalidProposalNumbering)
            }
            _ => {}
        }
        proposals.push(proposal);
        offset += declared;

        // 0 marks the last proposal, 2 announces a follower
        match header.last_substruct {
            0 if offset != buf.len() => return Err(DecodeError::TrailingBytes),
            2 if offset == buf.len() => return Err(DecodeError::InvalidPayloadLength),
            0 | 2 => {}
            _ => return Err(DecodeError::ProtocolViolation),
        }
    }

    Ok(SecurityAssociation { proposals })
}

/// Parses a single proposal including its transform substructures. The
/// buffer covers exactly the proposal as declared by its header.
fn parse_proposal(header: &ProposalHeader, buf: &[u8]) -> Result<Proposal, DecodeError> {
    let spi_size = header.spi_size as usize;
    let mut offset = size_of::<ProposalHeader>();
    if buf.len() - offset < spi_size {
        return Err(DecodeError::InvalidPayloadLength);
    }
    let spi = buf[offset..offset + spi_size].to_vec();
    offset += spi_size;

    let mut transforms = vec![];
    for i in 0..header.num_transforms {
        let transform =
            TransformHeader::ref_from_prefix(&buf[offset..]).ok_or(DecodeError::BufferTooSmall)?;
        let declared = transform.transform_length.get() as usize;
        if declared < size_of::<TransformHeader>() || declared > buf.len() - offset {
            return Err(DecodeError::InvalidPayloadLength);
        }
        // 0 marks the last transform, 3 announces a follower
        let last = i == header.num_transforms - 1;
        match (transform.last_substruct, last) {
            (0, true) | (3, false) => {}
            _ => return Err(DecodeError::ProtocolViolation),
        }

        let attributes = &buf[offset + size_of::<TransformHeader>()..offset + declared];
        transforms.push(parse_transform(transform, attributes)?);
        offset += declared;
    }

    if offset != buf.len() {
        return Err(DecodeError::TrailingBytes);
    }

    Ok(Proposal {
        number: header.proposal_num,
        protocol: Protocol::try_from(header.protocol_id)?,
        spi,
        transforms,
    })
}

fn parse_transform(header: &TransformHeader, attributes: &[u8]) -> Result<Transform, DecodeError> {
    let id = header.transform_id.get();
    Ok(match TransformType::try_from(header.transform_type)? {
        TransformType::EncryptionAlgorithm => {
            Transform::Encryption(EncryptionId::try_from(id)?, parse_key_length(attributes)?)
        }
        TransformType::PseudoRandomFunction => {
            Transform::PseudoRandomFunction(PrfId::try_from(id)?)
        }
        TransformType::IntegrityAlgorithm => Transform::Integrity(IntegrityId::try_from(id)?),
        TransformType::KeyExchangeMethod => Transform::KeyExchange(DhGroupId::try_from(id)?),
        TransformType::SequenceNumber => Transform::SequenceNumber(EsnId::try_from(id)?),
    })
}

/// Extract the key length attribute, the only transform attribute IKEv2
/// defines. It uses the fixed-length TV form; a variable-length attribute
/// is a protocol violation.
fn parse_key_length(attributes: &[u8]) -> Result<Option<u16>, DecodeError> {
    let mut key_length = None;
    let mut offset = 0usize;
    while offset < attributes.len() {
        let attribute = AttributeHeader::ref_from_prefix(&attributes[offset..])
            .ok_or(DecodeError::BufferTooSmall)?;
        if !attribute.is_fixed_length() {
            return Err(DecodeError::ProtocolViolation);
        }
        if attribute.attribute_type.get() & !FLAG_ATTRIBUTE_FORMAT == ATTRIBUTE_TYPE_KEY_LENGTH {
            key_length = Some(attribute.attribute_value.get());
        }
        offset += size_of::<AttributeHeader>();
    }
    Ok(key_length)
}
