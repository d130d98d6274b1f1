use std::net::IpAddr;

use zerocopy::network_endian::U16;
use zerocopy::AsBytes;

use crate::definitions::header::{
    AuthenticationHeader, ConfigurationAttributeHeader, ConfigurationHeader, DeleteHeader,
    EncryptedFragmentHeader, GenericPayloadHeader, IdentificationHeader, KeyExchangeHeader,
    NotifyHeader, TrafficSelectorHeader, TrafficSelectorPayloadHeader, FLAG_CRITICAL,
};
use crate::definitions::{Notification, Payload, TrafficSelector};
use crate::generator::BuildError;

impl Payload {
    pub(crate) fn try_build(&self, next_payload: u8) -> Result<Vec<u8>, BuildError> {
        let (critical, body) = match self {
            Payload::SecurityAssociation(sa) => (false, sa.try_build_body()?),
            Payload::KeyExchange(ke) => {
                let header = KeyExchangeHeader {
                    dh_group_num: U16::from(ke.dh_group as u16),
                    reserved: U16::from(0),
                };
                let mut body = Vec::with_capacity(size_of::<KeyExchangeHeader>() + ke.data.len());
                body.extend_from_slice(header.as_bytes());
                body.extend_from_slice(&ke.data);
                (false, body)
            }
            Payload::IdInitiator(id) | Payload::IdResponder(id) => {
                let header = IdentificationHeader {
                    id_type: id.id_type as u8,
                    reserved: [0; 3],
                };
                let mut body = Vec::with_capacity(size_of::<IdentificationHeader>() + id.data.len());
                body.extend_from_slice(header.as_bytes());
                body.extend_from_slice(&id.data);
                (false, body)
            }
            Payload::Certificate(cert) | Payload::CertificateRequest(cert) => {
                let mut body = Vec::with_capacity(1 + cert.data.len());
                body.push(cert.encoding as u8);
                body.extend_from_slice(&cert.data);
                (false, body)
            }
            Payload::Authentication(auth) => {
                let header = AuthenticationHeader {
                    auth_method: auth.method as u8,
                    reserved: [0; 3],
                };
                let mut body =
                    Vec::with_capacity(size_of::<AuthenticationHeader>() + auth.data.len());
                body.extend_from_slice(header.as_bytes());
                body.extend_from_slice(&auth.data);
                (false, body)
            }
            Payload::Nonce(nonce) => {
                if nonce.len() < 16 || nonce.len() > 256 {
                    return Err(BuildError::InvalidNonceLength);
                }
                (false, nonce.clone())
            }
            Payload::Notify(notify) => (false, notify.build_body()?),
            Payload::Delete(delete) => {
                let spi_size = delete.spis.first().map(Vec::len).unwrap_or(0);
                if spi_size > 255 {
                    return Err(BuildError::SpiTooLarge);
                }
                let header = DeleteHeader {
                    protocol_id: delete.protocol as u8,
                    spi_size: spi_size as u8,
                    num_spis: U16::from(delete.spis.len() as u16),
                };
                let mut body =
                    Vec::with_capacity(size_of::<DeleteHeader>() + spi_size * delete.spis.len());
                body.extend_from_slice(header.as_bytes());
                for spi in &delete.spis {
                    body.extend_from_slice(spi);
                }
                (false, body)
            }
            Payload::VendorId(data) => (false, data.clone()),
            Payload::TsInitiator(selectors) | Payload::TsResponder(selectors) => {
                (false, build_traffic_selectors(selectors)?)
            }
            Payload::Encrypted(sk) => (false, sk.data.clone()),
            Payload::Configuration(cfg) => {
                let mut body = Vec::with_capacity(size_of::<ConfigurationHeader>());
                let header = ConfigurationHeader {
                    cfg_type: cfg.cfg_type as u8,
                    reserved: [0; 3],
                };
                body.extend_from_slice(header.as_bytes());
                for (attribute_type, value) in &cfg.attributes {
                    let attribute = ConfigurationAttributeHeader {
                        attribute_type: U16::from(attribute_type & 0x7fff),
                        length: U16::from(value.len() as u16),
                    };
                    body.extend_from_slice(attribute.as_bytes());
                    body.extend_from_slice(value);
                }
                (false, body)
            }
            Payload::Eap(data) => (false, data.clone()),
            Payload::EncryptedFragment(skf) => {
                let header = EncryptedFragmentHeader {
                    fragment_number: U16::from(skf.fragment_num),
                    total_fragments: U16::from(skf.total_fragments),
                };
                let mut body =
                    Vec::with_capacity(size_of::<EncryptedFragmentHeader>() + skf.data.len());
                body.extend_from_slice(header.as_bytes());
                body.extend_from_slice(&skf.data);
                (false, body)
            }
            Payload::Unsupported(unsupported) => (unsupported.critical, unsupported.data.clone()),
        };

        // SK and SKF carry the first inner payload type in their generic
        // header; the caller passes the regular next payload for the rest
        let next = match self {
            Payload::Encrypted(sk) => sk.first_inner,
            Payload::EncryptedFragment(skf) => skf.first_inner,
            _ => next_payload,
        };
        build_generic(next, critical, &body)
    }
}

fn build_generic(next_payload: u8, critical: bool, data: &[u8]) -> Result<Vec<u8>, BuildError> {
    let length = data.len() + size_of::<GenericPayloadHeader>();
    if length > u16::MAX as usize {
        return Err(BuildError::PayloadTooLarge);
    }
    let header = GenericPayloadHeader {
        next_payload,
        critical_reserved: if critical { FLAG_CRITICAL } else { 0 },
        payload_length: U16::from(length as u16),
    };
    let mut packet = Vec::with_capacity(length);
    packet.extend_from_slice(header.as_bytes());
    packet.extend_from_slice(data);
    Ok(packet)
}

impl Notification {
    fn build_body(&self) -> Result<Vec<u8>, BuildError> {
        let spi_len = match &self.spi {
            Some(spi) if spi.len() > 255 => return Err(BuildError::SpiTooLarge),
            Some(spi) => spi.len(),
            None => 0,
        };
        let header = NotifyHeader {
            protocol_id: self.protocol.map(|p| p as u8).unwrap_or(0),
            spi_size: spi_len as u8,
            notify_message_type: U16::from(self.notify_type.value()),
        };
        let mut body = Vec::with_capacity(size_of::<NotifyHeader>() + spi_len + self.data.len());
        body.extend_from_slice(header.as_bytes());
        if let Some(spi) = &self.spi {
            body.extend_from_slice(spi);
        }
        body.extend_from_slice(&self.data);
        Ok(body)
    }
}

fn build_traffic_selectors(selectors: &[TrafficSelector]) -> Result<Vec<u8>, BuildError> {
    if selectors.len() >= 255 {
        return Err(BuildError::TooManySelectors);
    }
    let header = TrafficSelectorPayloadHeader {
        number_of_ts: selectors.len() as u8,
        reserved: [0; 3],
    };
    let mut body = Vec::with_capacity(
        size_of::<TrafficSelectorPayloadHeader>()
            + selectors.iter().map(TrafficSelector::encoded_len).sum::<usize>(),
    );
    body.extend_from_slice(header.as_bytes());
    for selector in selectors {
        let selector_header = TrafficSelectorHeader {
            ts_type: selector.ts_type() as u8,
            ip_protocol_id: selector.ip_protocol_id(),
            selector_length: U16::from(selector.encoded_len() as u16),
            start_port: U16::from(selector.start_port()),
            end_port: U16::from(selector.end_port()),
        };
        body.extend_from_slice(selector_header.as_bytes());
        match (selector.start_addr(), selector.end_addr()) {
            (IpAddr::V4(start), IpAddr::V4(end)) => {
                body.extend_from_slice(&start.octets());
                body.extend_from_slice(&end.octets());
            }
            (IpAddr::V6(start), IpAddr::V6(end)) => {
                body.extend_from_slice(&start.octets());
                body.extend_from_slice(&end.octets());
            }
            // excluded by the TrafficSelector constructor
            _ => {}
        }
    }
    Ok(body)
}
