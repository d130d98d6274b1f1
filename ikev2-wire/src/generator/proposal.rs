use zerocopy::network_endian::U16;
use zerocopy::AsBytes;

use crate::definitions::header::{AttributeHeader, ProposalHeader, TransformHeader};
use crate::definitions::params::{
    TransformType, ATTRIBUTE_TYPE_KEY_LENGTH, FLAG_ATTRIBUTE_FORMAT,
};
use crate::definitions::{Proposal, SecurityAssociation, Transform};
use crate::generator::{BuildError, ESTIMATED_PROPOSAL_LENGTH};

impl SecurityAssociation {
    /// Build the body of an SA payload, without the generic payload header
    pub(crate) fn try_build_body(&self) -> Result<Vec<u8>, BuildError> {
        if self.proposals.len() >= 255 {
            return Err(BuildError::TooManyProposals);
        }
        let mut body = Vec::with_capacity(ESTIMATED_PROPOSAL_LENGTH * self.proposals.len());
        for (i, proposal) in self.proposals.iter().enumerate() {
            body.extend(proposal.try_build(i == self.proposals.len() - 1)?);
        }
        Ok(body)
    }
}

impl Proposal {
    /// Convert a [Proposal] into a network-level vector of bytes
    ///
    /// The argument `last` defines if any proposal is following this proposal
    /// (false) or if this proposal is the last one of the Security
    /// Association payload (true).
    fn try_build(&self, last: bool) -> Result<Vec<u8>, BuildError> {
        if self.transforms.len() >= 255 {
            return Err(BuildError::TooManyTransforms);
        }
        if self.spi.len() > 255 {
            return Err(BuildError::SpiTooLarge);
        }
        let mut transforms = Vec::with_capacity(12 * self.transforms.len());
        for (i, transform) in self.transforms.iter().enumerate() {
            transforms.extend(transform.build(i == self.transforms.len() - 1));
        }

        let packet_length =
            size_of::<ProposalHeader>() + self.spi.len() + transforms.len();
        let header = ProposalHeader {
            last_substruct: if last { 0 } else { 2 },
            reserved: 0,
            proposal_length: U16::from(packet_length as u16),
            proposal_num: self.number,
            protocol_id: self.protocol as u8,
            spi_size: self.spi.len() as u8,
            num_transforms: self.transforms.len() as u8,
        };
        let mut packet = Vec::with_capacity(packet_length);
        packet.extend_from_slice(header.as_bytes());
        packet.extend_from_slice(&self.spi);
        packet.extend(transforms);
        Ok(packet)
    }
}

impl Transform {
    /// Convert a [Transform] into a network-level vector of bytes
    ///
    /// The argument `last` defines if any transform is following this
    /// transform (false) or if this transform is the last transform in the
    /// proposal (true).
    pub(crate) fn build(&self, last: bool) -> Vec<u8> {
        let (transform_type, transform_id, attributes) = match self {
            Transform::Encryption(algorithm, key_length) => (
                TransformType::EncryptionAlgorithm,
                *algorithm as u16,
                match key_length {
                    None => vec![],
                    Some(bits) => AttributeHeader {
                        attribute_type: U16::from(ATTRIBUTE_TYPE_KEY_LENGTH | FLAG_ATTRIBUTE_FORMAT),
                        attribute_value: U16::from(*bits),
                    }
                    .as_bytes()
                    .to_vec(),
                },
            ),
            Transform::PseudoRandomFunction(function) => {
                (TransformType::PseudoRandomFunction, *function as u16, vec![])
            }
            Transform::Integrity(integrity) => {
                (TransformType::IntegrityAlgorithm, *integrity as u16, vec![])
            }
            Transform::KeyExchange(group) => {
                (TransformType::KeyExchangeMethod, *group as u16, vec![])
            }
            Transform::SequenceNumber(esn) => {
                (TransformType::SequenceNumber, *esn as u16, vec![])
            }
        };

        let packet_length = size_of::<TransformHeader>() + attributes.len();
        let header = TransformHeader {
            last_substruct: if last { 0 } else { 3 },
            reserved: 0,
            transform_length: U16::from(packet_length as u16),
            transform_type: transform_type as u8,
            reserved2: 0,
            transform_id: U16::from(transform_id),
        };
        let mut packet = Vec::with_capacity(packet_length);
        packet.extend_from_slice(header.as_bytes());
        packet.extend(attributes);
        packet
    }
}

#[cfg(test)]
mod tests {
    use crate::definitions::params::{DhGroupId, EncryptionId};
    use crate::definitions::Transform;

    #[test]
    fn key_exchange() {
        assert_eq!(
            Transform::KeyExchange(DhGroupId::ModP2048).build(true),
            vec![0x00, 0x00, 0x00, 0x08, 0x04, 0x00, 0x00, 0x0e]
        );
        assert_eq!(
            Transform::KeyExchange(DhGroupId::ModP1024).build(false),
            vec![0x03, 0x00, 0x00, 0x08, 0x04, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn encryption() {
        assert_eq!(
            Transform::Encryption(EncryptionId::AesCbc, Some(128)).build(false),
            vec![0x03, 0x00, 0x00, 0x0c, 0x01, 0x00, 0x00, 0x0c, 0x80, 0x0e, 0x00, 0x80]
        );
        assert_eq!(
            Transform::Encryption(EncryptionId::AesGcm16, Some(256)).build(true),
            vec![0x00, 0x00, 0x00, 0x0c, 0x01, 0x00, 0x00, 0x14, 0x80, 0x0e, 0x01, 0x00]
        );
    }
}
