//! Decoders for the bodies of the individual payload types
//!
//! Every function takes the payload body without the generic header and
//! validates the payload-specific invariants on top of the structural
//! checks the chain walker already performed.

use std::net::IpAddr;

use zerocopy::FromBytes;

use crate::definitions::header::{
    AuthenticationHeader, ConfigurationAttributeHeader, ConfigurationHeader, DeleteHeader,
    EncryptedFragmentHeader, GenericPayloadHeader, IdentificationHeader, KeyExchangeHeader,
    NotifyHeader, TrafficSelectorHeader, TrafficSelectorPayloadHeader,
};
use crate::definitions::params::{
    AuthMethod, CertEncoding, CfgType, DhGroupId, IdType, PayloadType, Protocol, TsType,
};
use crate::definitions::{
    Authentication, CertificateData, Configuration, Delete, EncryptedData, EncryptedFragment,
    Identification, KeyExchange, Notification, NotifyType, Payload, TrafficSelector,
};
use crate::parser::{proposal, DecodeError};

/// Dispatch the body of a recognized payload type to its decoder
pub(crate) fn decode_body(
    payload_type: PayloadType,
    header: &GenericPayloadHeader,
    body: &[u8],
) -> Result<Payload, DecodeError> {
    Ok(match payload_type {
        PayloadType::NoNextPayload => return Err(DecodeError::ProtocolViolation),
        PayloadType::SecurityAssociation => {
            Payload::SecurityAssociation(proposal::parse_security_association(body)?)
        }
        PayloadType::KeyExchange => Payload::KeyExchange(parse_key_exchange(body)?),
        PayloadType::IdentificationInitiator => Payload::IdInitiator(parse_identification(body)?),
        PayloadType::IdentificationResponder => Payload::IdResponder(parse_identification(body)?),
        PayloadType::Certificate => Payload::Certificate(parse_certificate(body)?),
        PayloadType::CertificateRequest => Payload::CertificateRequest(parse_certificate(body)?),
        PayloadType::Authentication => Payload::Authentication(parse_authentication(body)?),
        PayloadType::Nonce => Payload::Nonce(body.to_vec()),
        PayloadType::Notify => Payload::Notify(parse_notification(body)?),
        PayloadType::Delete => Payload::Delete(parse_delete(body)?),
        PayloadType::VendorID => Payload::VendorId(body.to_vec()),
        PayloadType::TrafficSelectorInitiator => {
            Payload::TsInitiator(parse_traffic_selectors(body)?)
        }
        PayloadType::TrafficSelectorResponder => {
            Payload::TsResponder(parse_traffic_selectors(body)?)
        }
        PayloadType::EncryptedAndAuthenticated => Payload::Encrypted(EncryptedData {
            first_inner: header.next_payload,
            data: body.to_vec(),
        }),
        PayloadType::Configuration => Payload::Configuration(parse_configuration(body)?),
        PayloadType::ExtensibleAuthentication => Payload::Eap(body.to_vec()),
        PayloadType::EncryptedAndAuthenticatedFragment => {
            Payload::EncryptedFragment(parse_encrypted_fragment(header, body)?)
        }
    })
}

fn parse_key_exchange(body: &[u8]) -> Result<KeyExchange, DecodeError> {
    let header = KeyExchangeHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    Ok(KeyExchange {
        dh_group: DhGroupId::try_from(header.dh_group_num.get())?,
        data: body[size_of::<KeyExchangeHeader>()..].to_vec(),
    })
}

fn parse_identification(body: &[u8]) -> Result<Identification, DecodeError> {
    let header = IdentificationHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    Ok(Identification {
        id_type: IdType::try_from(header.id_type)?,
        data: body[size_of::<IdentificationHeader>()..].to_vec(),
    })
}

fn parse_certificate(body: &[u8]) -> Result<CertificateData, DecodeError> {
    let (encoding, data) = body.split_first().ok_or(DecodeError::BufferTooSmall)?;
    Ok(CertificateData {
        encoding: CertEncoding::try_from(*encoding)?,
        data: data.to_vec(),
    })
}

fn parse_authentication(body: &[u8]) -> Result<Authentication, DecodeError> {
    let header = AuthenticationHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    Ok(Authentication {
        method: AuthMethod::try_from(header.auth_method)?,
        data: body[size_of::<AuthenticationHeader>()..].to_vec(),
    })
}

/// Parses a notify payload body. The SPI rules of RFC 7296, section 3.10
/// apply: a notification concerning the IKE SA must not carry an SPI, and
/// when no SPI is present the protocol ID must be sent as zero.
fn parse_notification(body: &[u8]) -> Result<Notification, DecodeError> {
    let header = NotifyHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    let spi_size = header.spi_size as usize;
    if body.len() - size_of::<NotifyHeader>() < spi_size {
        return Err(DecodeError::InvalidPayloadLength);
    }

    let (protocol, spi) = if spi_size > 0 {
        let protocol = Protocol::try_from(header.protocol_id)?;
        if protocol == Protocol::InternetKeyExchange {
            // It is not legal to have both an SPI and use IKE
            return Err(DecodeError::ProtocolViolation);
        }
        let spi = body[size_of::<NotifyHeader>()..size_of::<NotifyHeader>() + spi_size].to_vec();
        (Some(protocol), Some(spi))
    } else {
        if header.protocol_id != 0 {
            return Err(DecodeError::ProtocolViolation);
        }
        (None, None)
    };

    Ok(Notification {
        protocol,
        spi,
        notify_type: NotifyType::from(header.notify_message_type.get()),
        data: body[size_of::<NotifyHeader>() + spi_size..].to_vec(),
    })
}

fn parse_delete(body: &[u8]) -> Result<Delete, DecodeError> {
    let header = DeleteHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    let protocol = Protocol::try_from(header.protocol_id)?;
    let spi_size = header.spi_size as usize;
    let num_spis = header.num_spis.get() as usize;

    if protocol == Protocol::InternetKeyExchange && spi_size != 0 {
        return Err(DecodeError::ProtocolViolation);
    }
    let expected = spi_size
        .checked_mul(num_spis)
        .ok_or(DecodeError::InvalidPayloadLength)?;
    if body.len() - size_of::<DeleteHeader>() != expected {
        return Err(DecodeError::InvalidPayloadLength);
    }

    let spis = body[size_of::<DeleteHeader>()..]
        .chunks_exact(spi_size.max(1))
        .map(<[u8]>::to_vec)
        .collect();
    Ok(Delete {
        protocol,
        spis: if spi_size == 0 { vec![] } else { spis },
    })
}

fn parse_traffic_selectors(body: &[u8]) -> Result<Vec<TrafficSelector>, DecodeError> {
    let header =
        TrafficSelectorPayloadHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    let mut offset = size_of::<TrafficSelectorPayloadHeader>();
    let mut selectors = vec![];

    for _ in 0..header.number_of_ts {
        let selector = TrafficSelectorHeader::ref_from_prefix(&body[offset..])
            .ok_or(DecodeError::BufferTooSmall)?;
        let ts_type = TsType::try_from(selector.ts_type)?;
        let declared = selector.selector_length.get() as usize;
        let addr_len = match ts_type {
            TsType::Ipv4AddrRange => 4,
            TsType::Ipv6AddrRange => 16,
        };
        if declared != size_of::<TrafficSelectorHeader>() + 2 * addr_len
            || declared > body.len() - offset
        {
            return Err(DecodeError::InvalidPayloadLength);
        }
        let addrs = &body[offset + size_of::<TrafficSelectorHeader>()..offset + declared];
        let (start_addr, end_addr) = parse_addr_pair(ts_type, addrs);
        selectors.push(
            TrafficSelector::new(
                ts_type,
                selector.ip_protocol_id,
                selector.start_port.get(),
                selector.end_port.get(),
                start_addr,
                end_addr,
            )
            .map_err(|_| DecodeError::InvalidTrafficSelector)?,
        );
        offset += declared;
    }

    if offset != body.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(selectors)
}

fn parse_addr_pair(ts_type: TsType, addrs: &[u8]) -> (IpAddr, IpAddr) {
    match ts_type {
        TsType::Ipv4AddrRange => {
            let mut start = [0u8; 4];
            let mut end = [0u8; 4];
            start.copy_from_slice(&addrs[..4]);
            end.copy_from_slice(&addrs[4..]);
            (IpAddr::V4(start.into()), IpAddr::V4(end.into()))
        }
        TsType::Ipv6AddrRange => {
            let mut start = [0u8; 16];
            let mut end = [0u8; 16];
            start.copy_from_slice(&addrs[..16]);
            end.copy_from_slice(&addrs[16..]);
            (IpAddr::V6(start.into()), IpAddr::V6(end.into()))
        }
    }
}

fn parse_configuration(body: &[u8]) -> Result<Configuration, DecodeError> {
    let header = ConfigurationHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    let cfg_type = CfgType::try_from(header.cfg_type)?;

    let mut offset = size_of::<ConfigurationHeader>();
    let mut attributes = vec![];
    while offset < body.len() {
        let attribute = ConfigurationAttributeHeader::ref_from_prefix(&body[offset..])
            .ok_or(DecodeError::BufferTooSmall)?;
        let value_len = attribute.length.get() as usize;
        offset += size_of::<ConfigurationAttributeHeader>();
        if value_len > body.len() - offset {
            return Err(DecodeError::InvalidPayloadLength);
        }
        attributes.push((
            attribute.attribute_type.get() & 0x7fff,
            body[offset..offset + value_len].to_vec(),
        ));
        offset += value_len;
    }
    Ok(Configuration {
        cfg_type,
        attributes,
    })
}

fn parse_encrypted_fragment(
    header: &GenericPayloadHeader,
    body: &[u8],
) -> Result<EncryptedFragment, DecodeError> {
    let fragment =
        EncryptedFragmentHeader::ref_from_prefix(body).ok_or(DecodeError::BufferTooSmall)?;
    let fragment_num = fragment.fragment_number.get();
    let total_fragments = fragment.total_fragments.get();
    if fragment_num == 0 || fragment_num > total_fragments {
        return Err(DecodeError::ProtocolViolation);
    }
    Ok(EncryptedFragment {
        first_inner: header.next_payload,
        fragment_num,
        total_fragments,
        data: body[size_of::<EncryptedFragmentHeader>()..].to_vec(),
    })
}
