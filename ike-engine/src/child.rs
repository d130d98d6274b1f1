//! Child SA negotiation helpers: proposal matching, traffic selector
//! narrowing and the simultaneous-rekey tie break

use itertools::Itertools;

use ikev2_wire::definitions::{Proposal, TrafficSelector, Transform};

use crate::IkeProtocolError;

/// An installed child SA as the session tracks it
#[derive(Debug, Clone)]
pub struct EstablishedChild {
    /// SPI this end chose for inbound traffic
    pub local_spi: u32,
    /// SPI the peer chose for its inbound traffic
    pub remote_spi: u32,
    /// The proposal the pair agreed on
    pub proposal: Proposal,
    /// Narrowed selectors for traffic this end may send
    pub local_ts: Vec<TrafficSelector>,
    /// Narrowed selectors for traffic the peer may send
    pub remote_ts: Vec<TrafficSelector>,
}

/// Validate the responder's chosen proposal against what was offered:
/// the proposal number must name one of ours and every transform must
/// have been part of that offer. Returns the accepted proposal with the
/// peer's SPI attached.
pub fn accept_chosen_proposal(
    offered: &[Proposal],
    chosen: &Proposal,
) -> Result<Proposal, IkeProtocolError> {
    let offer = offered
        .iter()
        .find(|p| p.number == chosen.number)
        .ok_or(IkeProtocolError::NoProposalChosen)?;
    if offer.protocol != chosen.protocol || chosen.transforms.is_empty() {
        return Err(IkeProtocolError::NoProposalChosen);
    }
    for transform in &chosen.transforms {
        if !offer.transforms.contains(transform) {
            return Err(IkeProtocolError::NoProposalChosen);
        }
    }
    Ok(chosen.clone())
}

/// Validate that the responder narrowed the selectors instead of widening
/// them: every selector it confirmed must be contained in one we offered
pub fn accept_narrowed_selectors(
    offered: &[TrafficSelector],
    confirmed: &[TrafficSelector],
) -> Result<Vec<TrafficSelector>, IkeProtocolError> {
    if confirmed.is_empty() {
        return Err(IkeProtocolError::InvalidSelectors);
    }
    for narrowed in confirmed {
        if !offered.iter().any(|wide| wide.contains(narrowed)) {
            return Err(IkeProtocolError::InvalidSelectors);
        }
    }
    Ok(confirmed.to_vec())
}

/// Pairwise intersection of two selector lists, used when this end acts
/// as the responder of a simultaneous rekey
pub fn narrow_selectors(
    ours: &[TrafficSelector],
    theirs: &[TrafficSelector],
) -> Vec<TrafficSelector> {
    ours.iter()
        .cartesian_product(theirs.iter())
        .filter_map(|(ours, theirs)| {
            if ours.contains(theirs) {
                Some(*theirs)
            } else if theirs.contains(ours) {
                Some(*ours)
            } else {
                None
            }
        })
        .collect()
}

/// The simultaneous-rekey tie break of RFC 7296, section 2.8.1: both
/// peers initiated, the SA created with the lowest of the competing
/// nonces loses, and the losing initiator deletes the SA it created.
/// Returns `true` when this end lost.
pub fn rekey_tie_break_lost(our_nonce: &[u8], peer_nonce: &[u8]) -> bool {
    our_nonce < peer_nonce
}

/// Extract the one transform of each kind that a chosen child proposal
/// pins down, for logging
pub fn describe_proposal(proposal: &Proposal) -> String {
    proposal
        .transforms
        .iter()
        .map(|t| match t {
            Transform::Encryption(id, Some(bits)) => format!("{id:?}/{bits}"),
            Transform::Encryption(id, None) => format!("{id:?}"),
            Transform::PseudoRandomFunction(id) => format!("{id:?}"),
            Transform::Integrity(id) => format!("{id:?}"),
            Transform::KeyExchange(id) => format!("{id:?}"),
            Transform::SequenceNumber(id) => format!("{id:?}"),
        })
        .join("+")
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use ikev2_wire::definitions::params::{
        EncryptionId, IntegrityId, Protocol, TsType,
    };

    use super::*;

    fn offer() -> Vec<Proposal> {
        vec![Proposal::new(
            1,
            Protocol::EncapsulatingSecurityPayload,
            vec![
                Transform::Encryption(EncryptionId::AesCbc, Some(256)),
                Transform::Encryption(EncryptionId::AesGcm16, Some(256)),
                Transform::Integrity(IntegrityId::HmacSha2_256_128),
            ],
        )]
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn chosen_subset_is_accepted() {
        let chosen = Proposal {
            number: 1,
            protocol: Protocol::EncapsulatingSecurityPayload,
            spi: vec![0x01, 0x02, 0x03, 0x04],
            transforms: vec![
                Transform::Encryption(EncryptionId::AesGcm16, Some(256)),
            ],
        };
        let accepted = accept_chosen_proposal(&offer(), &chosen).unwrap();
        assert_eq!(accepted.spi, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn foreign_transform_is_rejected() {
        let chosen = Proposal {
            number: 1,
            protocol: Protocol::EncapsulatingSecurityPayload,
            spi: vec![],
            transforms: vec![Transform::Encryption(EncryptionId::AesCtr, Some(256))],
        };
        assert_eq!(
            accept_chosen_proposal(&offer(), &chosen),
            Err(IkeProtocolError::NoProposalChosen)
        );
    }

    #[test]
    fn wrong_proposal_number_is_rejected() {
        let chosen = Proposal {
            number: 2,
            protocol: Protocol::EncapsulatingSecurityPayload,
            spi: vec![],
            transforms: vec![Transform::Encryption(EncryptionId::AesCbc, Some(256))],
        };
        assert_eq!(
            accept_chosen_proposal(&offer(), &chosen),
            Err(IkeProtocolError::NoProposalChosen)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn narrowing_is_accepted_widening_is_not() {
        let offered = vec![TrafficSelector::all_ipv4()];
        let narrow = TrafficSelector::new(
            TsType::Ipv4AddrRange,
            0,
            0,
            65535,
            "10.0.0.0".parse::<IpAddr>().unwrap(),
            "10.255.255.255".parse::<IpAddr>().unwrap(),
        )
        .unwrap();
        assert_eq!(
            accept_narrowed_selectors(&offered, &[narrow]).unwrap(),
            vec![narrow]
        );
        // an IPv6 selector was never offered
        assert_eq!(
            accept_narrowed_selectors(&offered, &[TrafficSelector::all_ipv6()]),
            Err(IkeProtocolError::InvalidSelectors)
        );
        assert_eq!(
            accept_narrowed_selectors(&offered, &[]),
            Err(IkeProtocolError::InvalidSelectors)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn intersection_keeps_the_narrower_side() {
        let narrow = TrafficSelector::new(
            TsType::Ipv4AddrRange,
            0,
            80,
            443,
            "10.0.0.0".parse::<IpAddr>().unwrap(),
            "10.0.0.255".parse::<IpAddr>().unwrap(),
        )
        .unwrap();
        let narrowed = narrow_selectors(&[TrafficSelector::all_ipv4()], &[narrow]);
        assert_eq!(narrowed, vec![narrow]);
        // disjoint families produce nothing
        assert!(narrow_selectors(&[TrafficSelector::all_ipv6()], &[narrow]).is_empty());
    }

    #[test]
    fn lowest_nonce_loses_the_rekey_tie_break() {
        assert!(rekey_tie_break_lost(&[0x01, 0xff], &[0x02, 0x00]));
        assert!(!rekey_tie_break_lost(&[0x02, 0x00], &[0x01, 0xff]));
        assert!(!rekey_tie_break_lost(&[0x01], &[0x01]));
    }
}
