use std::net::IpAddr;

use strum::IntoEnumIterator;

use crate::definitions::params::{
    DhGroupId, EncryptionId, EsnId, ExchangeType, IntegrityId, NotifyError, NotifyStatus,
    PayloadType, PrfId, Protocol, TsType,
};
use crate::definitions::{
    EncryptedFragment, IkeMessage, Notification, NotifyType, Payload, Proposal,
    SecurityAssociation, TrafficSelector, Transform, UnsupportedPayload,
};
use crate::parser::{decode_payload_list, DecodeError};

#[test]
#[allow(clippy::unwrap_used)]
fn parse_empty_message() {
    let buff = vec![
        0x00, 0x04, 0xc0, 0x1d, 0xb4, 0x00, 0xb0, 0xc9, // initiator SPI
        0x00, 0x00, 0x00, 0x00, 0x11, 0xf1, 0x5b, 0xa3, // responder SPI
        0x00, // next payload
        0x20, // version
        0x25, // exchange type
        0x20, // flags, 0b00100000
        0x00, 0x00, 0x00, 0x02, // message ID
        0x00, 0x00, 0x00, 0x1c, // length
    ];
    let message = IkeMessage::try_parse(buff.as_slice()).unwrap();
    assert_eq!(message.initiator_spi, 1337133713371337);
    assert_eq!(message.responder_spi, 301030307);
    assert_eq!(message.message_id, 2);
    assert_eq!(message.exchange_type, ExchangeType::Informational);
    assert!(message.response);
    assert!(!message.initiator);
    assert_eq!(message.payloads.len(), 0);
}

#[test]
fn reject_wrong_length() {
    let mut buff = vec![
        0x00, 0x04, 0xc0, 0x1d, 0xb4, 0x00, 0xb0, 0xc9, // initiator SPI
        0x00, 0x00, 0x00, 0x00, 0x11, 0xf1, 0x5b, 0xa3, // responder SPI
        0x00, 0x20, 0x25, 0x20, // next payload, version, exchange, flags
        0x00, 0x00, 0x00, 0x02, // message ID
        0x00, 0x00, 0x00, 0x1d, // length, one more than the buffer holds
    ];
    assert_eq!(
        IkeMessage::try_parse(buff.as_slice()),
        Err(DecodeError::MessageLengthMismatch)
    );
    buff[27] = 0x1c;
    buff[17] = 0x10; // version 1.0
    assert_eq!(
        IkeMessage::try_parse(buff.as_slice()),
        Err(DecodeError::WrongVersion)
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn decode_ipv4_traffic_selector() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x18, // generic payload header, terminal
        0x01, 0x00, 0x00, 0x00, // one selector
        0x07, 0x00, 0x00, 0x10, // type 7, any protocol, length 16
        0x00, 0x10, 0xff, 0xf0, // ports 16..65520
        0xc0, 0x00, 0x02, 0x64, // 192.0.2.100
        0xc0, 0x00, 0x03, 0x65, // 192.0.3.101
    ];
    let payloads = decode_payload_list(
        PayloadType::TrafficSelectorInitiator as u8,
        buff.as_slice(),
    )
    .unwrap();
    assert_eq!(payloads.len(), 1);
    let Payload::TsInitiator(selectors) = &payloads[0] else {
        panic!("expected a TSi payload");
    };
    assert_eq!(selectors.len(), 1);
    let ts = &selectors[0];
    assert_eq!(ts.ts_type(), TsType::Ipv4AddrRange);
    assert_eq!(ts.ip_protocol_id(), 0);
    assert_eq!(ts.start_port(), 16);
    assert_eq!(ts.end_port(), 65520);
    assert_eq!(ts.start_addr(), "192.0.2.100".parse::<IpAddr>().unwrap());
    assert_eq!(ts.end_addr(), "192.0.3.101".parse::<IpAddr>().unwrap());
}

#[test]
fn reject_traffic_selector_with_inverted_ports() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x18, // generic payload header
        0x01, 0x00, 0x00, 0x00, // one selector
        0x07, 0x00, 0x00, 0x10, // type 7, any protocol, length 16
        0x22, 0x22, 0x11, 0x11, // start port above end port
        0xc0, 0x00, 0x02, 0x64, // 192.0.2.100
        0xc0, 0x00, 0x03, 0x65, // 192.0.3.101
    ];
    assert_eq!(
        decode_payload_list(PayloadType::TrafficSelectorInitiator as u8, &buff),
        Err(DecodeError::InvalidTrafficSelector)
    );
}

#[test]
fn reject_traffic_selector_with_trailing_bytes() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x1a, // generic payload header
        0x01, 0x00, 0x00, 0x00, // one selector
        0x07, 0x00, 0x00, 0x10, // type 7, any protocol, length 16
        0x00, 0x10, 0xff, 0xf0, // ports 16..65520
        0xc0, 0x00, 0x02, 0x64, // 192.0.2.100
        0xc0, 0x00, 0x03, 0x65, // 192.0.3.101
        0xff, 0xff, // garbage after the declared selector
    ];
    assert_eq!(
        decode_payload_list(PayloadType::TrafficSelectorInitiator as u8, &buff),
        Err(DecodeError::TrailingBytes)
    );
}

#[test]
fn selector_containment() {
    let all = TrafficSelector::all_ipv4();
    assert!(all.contains(&all));
    #[allow(clippy::unwrap_used)]
    let narrow = TrafficSelector::new(
        TsType::Ipv4AddrRange,
        6,
        80,
        443,
        "10.0.0.1".parse().unwrap(),
        "10.0.0.9".parse().unwrap(),
    )
    .unwrap();
    assert!(all.contains(&narrow));
    assert!(!narrow.contains(&all));
    assert!(!narrow.contains(&TrafficSelector::all_ipv6()));
}

#[test]
fn reject_payload_shorter_than_its_header() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x04, // generic payload header declaring only itself
    ];
    assert_eq!(
        decode_payload_list(PayloadType::Nonce as u8, &buff),
        Err(DecodeError::InvalidPayloadLength)
    );
}

#[test]
fn reject_payload_longer_than_buffer() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x20, // declares 32 octets
        0x01, 0x02, 0x03, 0x04, // but only 8 are present
    ];
    assert_eq!(
        decode_payload_list(PayloadType::VendorID as u8, &buff),
        Err(DecodeError::InvalidPayloadLength)
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn unsupported_critical_payload_collects_types() {
    let buff = vec![
        0x36, 0x80, 0x00, 0x08, // unknown type 54 follows, critical
        0xde, 0xad, 0xbe, 0xef, // body of unknown type 49
        0x00, 0x80, 0x00, 0x06, // terminal, critical
        0x13, 0x37, // body of unknown type 54
    ];
    assert_eq!(
        decode_payload_list(49, &buff),
        Err(DecodeError::UnsupportedCriticalPayload(vec![49, 54]))
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn unsupported_noncritical_payload_is_preserved() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x08, // terminal, not critical
        0xde, 0xad, 0xbe, 0xef, // body of unknown type 49
    ];
    let payloads = decode_payload_list(49, &buff).unwrap();
    assert_eq!(
        payloads,
        vec![Payload::Unsupported(UnsupportedPayload {
            payload_type: 49,
            critical: false,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        })]
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn generate_and_parse_sa_message() {
    let message = IkeMessage {
        initiator_spi: 0x48cfb887c03b2e7f, // random data
        responder_spi: 0,
        exchange_type: ExchangeType::IkeSaInit,
        initiator: true,
        response: false,
        message_id: 0,
        payloads: vec![
            Payload::SecurityAssociation(SecurityAssociation {
                proposals: vec![Proposal::new(
                    1,
                    Protocol::InternetKeyExchange,
                    vec![
                        Transform::Encryption(EncryptionId::AesCbc, Some(256)),
                        Transform::PseudoRandomFunction(PrfId::HmacSha2_256),
                        Transform::Integrity(IntegrityId::HmacSha2_256_128),
                        Transform::KeyExchange(DhGroupId::ModP2048),
                    ],
                )],
            }),
            Payload::Nonce(vec![0xab; 32]),
        ],
    };
    let encoded = message.try_build().unwrap();
    let reparsed = IkeMessage::try_parse(&encoded).unwrap();
    assert_eq!(message, reparsed);
    // a chain decoded from X bytes re-encodes to exactly X bytes
    assert_eq!(reparsed.try_build().unwrap(), encoded);
}

#[test]
#[allow(clippy::unwrap_used)]
fn generate_and_parse_notify_cookie() {
    let cookie = Notification::status(NotifyStatus::Cookie, vec![0x13; 24]);
    let message = IkeMessage {
        initiator_spi: 7,
        responder_spi: 9,
        exchange_type: ExchangeType::IkeSaInit,
        initiator: false,
        response: true,
        message_id: 0,
        payloads: vec![Payload::Notify(cookie.clone())],
    };
    let encoded = message.try_build().unwrap();
    let reparsed = IkeMessage::try_parse(&encoded).unwrap();
    assert_eq!(reparsed.payloads, vec![Payload::Notify(cookie)]);
}

#[test]
#[allow(clippy::unwrap_used)]
fn unknown_notify_type_is_preserved() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x0a, // generic payload header
        0x00, 0x00, 0x67, 0x2a, // no SPI, type 26410 (unassigned status)
        0xca, 0xfe, // notification data
    ];
    let payloads = decode_payload_list(PayloadType::Notify as u8, &buff).unwrap();
    let Payload::Notify(notification) = &payloads[0] else {
        panic!("expected a notify payload");
    };
    assert_eq!(notification.notify_type, NotifyType::Other(26410));
    assert!(!notification.notify_type.is_error());
    assert_eq!(notification.data, vec![0xca, 0xfe]);
}

#[test]
#[allow(clippy::unwrap_used)]
fn encrypted_fragment_round_trip() {
    let skf = EncryptedFragment {
        first_inner: 0,
        fragment_num: 2,
        total_fragments: 3,
        data: vec![0x55; 40],
    };
    let message = IkeMessage {
        initiator_spi: 1,
        responder_spi: 2,
        exchange_type: ExchangeType::IkeAuth,
        initiator: true,
        response: false,
        message_id: 1,
        payloads: vec![Payload::EncryptedFragment(skf.clone())],
    };
    let encoded = message.try_build().unwrap();
    let reparsed = IkeMessage::try_parse(&encoded).unwrap();
    assert_eq!(reparsed.payloads, vec![Payload::EncryptedFragment(skf)]);
}

#[test]
fn reject_fragment_number_zero() {
    let buff = vec![
        0x00, 0x00, 0x00, 0x0c, // generic payload header
        0x00, 0x00, 0x00, 0x03, // fragment 0 of 3
        0xaa, 0xbb, 0xcc, 0xdd, // opaque fragment data
    ];
    assert_eq!(
        decode_payload_list(
            PayloadType::EncryptedAndAuthenticatedFragment as u8,
            &buff
        ),
        Err(DecodeError::ProtocolViolation)
    );
}

#[test]
fn all_transform_ids_survive_their_wire_value() {
    for id in EncryptionId::iter() {
        assert_eq!(EncryptionId::try_from(id as u16), Ok(id));
    }
    for id in PrfId::iter() {
        assert_eq!(PrfId::try_from(id as u16), Ok(id));
    }
    for id in IntegrityId::iter() {
        assert_eq!(IntegrityId::try_from(id as u16), Ok(id));
    }
    for id in DhGroupId::iter() {
        assert_eq!(DhGroupId::try_from(id as u16), Ok(id));
    }
    for id in EsnId::iter() {
        assert_eq!(EsnId::try_from(id as u16), Ok(id));
    }
}

#[test]
fn error_notify_classification() {
    assert_eq!(
        NotifyType::from(7),
        NotifyType::Error(NotifyError::InvalidSyntax)
    );
    assert_eq!(
        NotifyType::from(16390),
        NotifyType::Status(NotifyStatus::Cookie)
    );
    assert!(NotifyType::from(7).is_error());
    assert!(!NotifyType::from(16390).is_error());
}
