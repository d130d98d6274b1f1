//! The encrypted message envelope: SK sealing and opening, and the SKF
//! fragmentation of RFC 7383
//!
//! Sealing takes the inner payload chain, pads it to the cipher block
//! alignment with a trailing pad-length octet, encrypts it and protects
//! the whole message either with the external integrity MAC (checksum
//! over header, SK header, IV and ciphertext) or with the combined mode's
//! tag where header and SK header are the associated data. Opening
//! verifies before it decrypts and reports every failure as
//! [CryptoError::IntegrityFailure] so the caller can discard the packet
//! silently, without revealing the decryption outcome.

use std::collections::BTreeMap;

use rand::RngCore;
use thiserror::Error;
use tokio::time::Instant;

use ikev2_wire::definitions::params::ExchangeType;
use ikev2_wire::definitions::{EncryptedData, EncryptedFragment, IkeMessage, Payload};
use ikev2_wire::generator::encode_payload_list;

use crate::crypto::{CryptoError, CryptoSuite};
use crate::IkeInternalError;

/// Header fields of a message under construction, everything except the
/// payloads
#[derive(Debug, Clone, Copy)]
pub struct MessageMeta {
    /// SPI chosen by the original initiator
    pub initiator_spi: u64,
    /// SPI chosen by the responder
    pub responder_spi: u64,
    /// The exchange this message belongs to
    pub exchange_type: ExchangeType,
    /// Whether this end is the original initiator
    pub initiator: bool,
    /// Whether this message answers a request
    pub response: bool,
    /// The message ID
    pub message_id: u32,
}

impl MessageMeta {
    fn message(&self, payloads: Vec<Payload>) -> IkeMessage {
        IkeMessage {
            initiator_spi: self.initiator_spi,
            responder_spi: self.responder_spi,
            exchange_type: self.exchange_type,
            initiator: self.initiator,
            response: self.response,
            message_id: self.message_id,
            payloads,
        }
    }
}

/// Seal a payload chain into one SK-protected message, or into several
/// SKF fragments when the single message would exceed `mtu` and the peer
/// negotiated fragmentation support
pub fn seal(
    suite: &CryptoSuite,
    sk_e: &[u8],
    sk_a: &[u8],
    meta: &MessageMeta,
    inner: &[Payload],
    mtu: Option<usize>,
) -> Result<Vec<Vec<u8>>, IkeInternalError> {
    let plain = encode_payload_list(inner)?;
    let first_inner = inner.first().map(Payload::type_value).unwrap_or(0);

    let whole = seal_chunk(suite, sk_e, sk_a, meta, first_inner, &plain, None)?;
    let mtu = match mtu {
        Some(mtu) if whole.len() > mtu => mtu,
        _ => return Ok(vec![whole]),
    };

    // worst-case per-fragment overhead: header, SKF headers, IV, padding
    // and checksum or tag
    let overhead = ikev2_wire::IKE_HEADER_LEN
        + 8
        + suite.cipher.iv_len()
        + suite.cipher.block_align()
        + 1
        + suite.checksum_len();
    let chunk_len = mtu.saturating_sub(overhead).max(1);
    let chunks: Vec<&[u8]> = plain.chunks(chunk_len).collect();
    let total = chunks.len() as u16;

    let mut fragments = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.into_iter().enumerate() {
        let fragment_num = i as u16 + 1;
        fragments.push(seal_chunk(
            suite,
            sk_e,
            sk_a,
            meta,
            if fragment_num == 1 { first_inner } else { 0 },
            chunk,
            Some((fragment_num, total)),
        )?);
    }
    Ok(fragments)
}

fn seal_chunk(
    suite: &CryptoSuite,
    sk_e: &[u8],
    sk_a: &[u8],
    meta: &MessageMeta,
    first_inner: u8,
    plain: &[u8],
    fragment: Option<(u16, u16)>,
) -> Result<Vec<u8>, IkeInternalError> {
    // pad up to the block alignment, the last octet is the pad length
    let align = suite.cipher.block_align();
    let pad_len = (align - (plain.len() + 1) % align) % align;
    let mut padded = plain.to_vec();
    padded.resize(plain.len() + pad_len, 0);
    padded.push(pad_len as u8);

    let mut iv = vec![0u8; suite.cipher.iv_len()];
    rand::thread_rng().fill_bytes(&mut iv);

    let checksum_len = suite.checksum_len();
    let body_len = iv.len() + padded.len() + checksum_len;

    // build the message with a placeholder body to fix every length field,
    // then encrypt and protect in place
    let placeholder = vec![0u8; body_len];
    let payload = match fragment {
        None => Payload::Encrypted(EncryptedData {
            first_inner,
            data: placeholder,
        }),
        Some((fragment_num, total_fragments)) => Payload::EncryptedFragment(EncryptedFragment {
            first_inner,
            fragment_num,
            total_fragments,
            data: placeholder,
        }),
    };
    let mut packet = meta.message(vec![payload]).try_build()?;
    let body_start = packet.len() - body_len;
    packet[body_start..body_start + iv.len()].copy_from_slice(&iv);

    match &suite.integrity {
        Some(integrity) => {
            let ciphertext = suite.cipher.encrypt(sk_e, &iv, &padded)?;
            let ct_start = body_start + iv.len();
            packet[ct_start..ct_start + ciphertext.len()].copy_from_slice(&ciphertext);
            let checksum_start = packet.len() - checksum_len;
            let checksum = integrity.compute(sk_a, &packet[..checksum_start])?;
            packet[checksum_start..].copy_from_slice(&checksum);
        }
        None => {
            let aad = packet[..body_start].to_vec();
            let sealed = suite.cipher.seal(sk_e, &iv, &aad, &padded)?;
            let ct_start = body_start + iv.len();
            packet[ct_start..ct_start + sealed.len()].copy_from_slice(&sealed);
        }
    }
    Ok(packet)
}

/// Open the SK or SKF body of a received message
///
/// `raw` is the complete datagram as received, `sk_body` the opaque body
/// of its terminal SK or SKF payload. Returns the decrypted inner payload
/// chain bytes. Every verification failure comes back as
/// [CryptoError::IntegrityFailure].
pub fn open(
    suite: &CryptoSuite,
    sk_e: &[u8],
    sk_a: &[u8],
    raw: &[u8],
    sk_body: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let iv_len = suite.cipher.iv_len();
    let checksum_len = suite.checksum_len();
    if sk_body.len() < iv_len + checksum_len + 1 || sk_body.len() > raw.len() {
        return Err(CryptoError::IntegrityFailure);
    }
    let iv = &sk_body[..iv_len];

    let padded = match &suite.integrity {
        Some(integrity) => {
            let (protected, checksum) = raw.split_at(raw.len() - checksum_len);
            integrity
                .verify(sk_a, protected, checksum)
                .map_err(|_| CryptoError::IntegrityFailure)?;
            let ciphertext = &sk_body[iv_len..sk_body.len() - checksum_len];
            suite
                .cipher
                .decrypt(sk_e, iv, ciphertext)
                .map_err(|_| CryptoError::IntegrityFailure)?
        }
        None => {
            let aad = &raw[..raw.len() - sk_body.len()];
            let ciphertext = &sk_body[iv_len..];
            suite
                .cipher
                .open(sk_e, iv, aad, ciphertext)
                .map_err(|_| CryptoError::IntegrityFailure)?
        }
    };

    // strip the pad length octet and the padding it counts
    let Some((&pad_len, rest)) = padded.split_last() else {
        return Err(CryptoError::IntegrityFailure);
    };
    if pad_len as usize > rest.len() {
        return Err(CryptoError::IntegrityFailure);
    }
    Ok(rest[..rest.len() - pad_len as usize].to_vec())
}

/// Failure while collecting the fragments of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum ReassemblyError {
    #[error("Fragment belongs to a different message")]
    MessageIdMismatch,
    #[error("Fragment disagrees about the total fragment count")]
    TotalMismatch,
    #[error("Fragment number is outside 1..=total")]
    OutOfRange,
}

/// Collects decrypted fragments of one message until all are present
///
/// Fragments may arrive in any order; a duplicate fragment number is
/// ignored rather than overwritten. When the deadline passes before the
/// set completes, the whole buffer is dropped and nothing is delivered.
pub struct FragmentBuffer {
    message_id: u32,
    total: u16,
    first_inner: u8,
    parts: BTreeMap<u16, Vec<u8>>,
    /// When the incomplete set is discarded
    pub deadline: Instant,
}

impl FragmentBuffer {
    /// Start collecting fragments of the given message
    pub fn new(message_id: u32, total: u16, deadline: Instant) -> Self {
        Self {
            message_id,
            total,
            first_inner: 0,
            parts: BTreeMap::new(),
            deadline,
        }
    }

    /// The message the buffer collects
    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Add one decrypted fragment
    pub fn insert(
        &mut self,
        message_id: u32,
        fragment: &EncryptedFragment,
        plaintext: Vec<u8>,
    ) -> Result<(), ReassemblyError> {
        if message_id != self.message_id {
            return Err(ReassemblyError::MessageIdMismatch);
        }
        if fragment.total_fragments != self.total {
            return Err(ReassemblyError::TotalMismatch);
        }
        if fragment.fragment_num == 0 || fragment.fragment_num > self.total {
            return Err(ReassemblyError::OutOfRange);
        }
        if fragment.fragment_num == 1 {
            self.first_inner = fragment.first_inner;
        }
        // duplicates are idempotent
        self.parts.entry(fragment.fragment_num).or_insert(plaintext);
        Ok(())
    }

    /// Whether every fragment arrived
    pub fn is_complete(&self) -> bool {
        self.parts.len() == self.total as usize
    }

    /// Concatenate the fragments in order; only valid when complete
    pub fn assemble(self) -> (u8, Vec<u8>) {
        let mut out = vec![];
        for (_, part) in self.parts {
            out.extend(part);
        }
        (self.first_inner, out)
    }
}

#[cfg(test)]
mod tests {
    use ikev2_wire::definitions::params::{
        EncryptionId, IntegrityId, NotifyStatus, PayloadType, PrfId,
    };
    use ikev2_wire::definitions::Notification;
    use ikev2_wire::parser::decode_payload_list;

    use super::*;
    use crate::crypto::{Cipher, Integrity, Prf};

    #[allow(clippy::unwrap_used)]
    fn cbc_suite() -> CryptoSuite {
        CryptoSuite {
            cipher: Cipher::from_transform(EncryptionId::AesCbc, Some(128)).unwrap(),
            integrity: Integrity::from_transform(IntegrityId::HmacSha2_256_128).unwrap(),
            prf: Prf::from_transform(PrfId::HmacSha2_256).unwrap(),
        }
    }

    #[allow(clippy::unwrap_used)]
    fn gcm_suite() -> CryptoSuite {
        CryptoSuite {
            cipher: Cipher::from_transform(EncryptionId::AesGcm16, Some(128)).unwrap(),
            integrity: None,
            prf: Prf::from_transform(PrfId::HmacSha2_256).unwrap(),
        }
    }

    fn meta() -> MessageMeta {
        MessageMeta {
            initiator_spi: 0x1111,
            responder_spi: 0x2222,
            exchange_type: ExchangeType::Informational,
            initiator: true,
            response: false,
            message_id: 3,
        }
    }

    fn inner() -> Vec<Payload> {
        vec![Payload::Notify(Notification::status(
            NotifyStatus::InitialContact,
            vec![],
        ))]
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn seal_and_open_round_trip_cbc() {
        let suite = cbc_suite();
        let sk_e = [0x11; 16];
        let sk_a = [0x22; 32];
        let packets = seal(&suite, &sk_e, &sk_a, &meta(), &inner(), None).unwrap();
        assert_eq!(packets.len(), 1);

        let message = IkeMessage::try_parse(&packets[0]).unwrap();
        let Payload::Encrypted(sk) = &message.payloads[0] else {
            panic!("expected an SK payload");
        };
        let plain = open(&suite, &sk_e, &sk_a, &packets[0], &sk.data).unwrap();
        let payloads = decode_payload_list(sk.first_inner, &plain).unwrap();
        assert_eq!(payloads, inner());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn seal_and_open_round_trip_gcm() {
        let suite = gcm_suite();
        let sk_e = [0x33; 20];
        let packets = seal(&suite, &sk_e, &[], &meta(), &inner(), None).unwrap();

        let message = IkeMessage::try_parse(&packets[0]).unwrap();
        let Payload::Encrypted(sk) = &message.payloads[0] else {
            panic!("expected an SK payload");
        };
        let plain = open(&suite, &sk_e, &[], &packets[0], &sk.data).unwrap();
        let payloads = decode_payload_list(sk.first_inner, &plain).unwrap();
        assert_eq!(payloads, inner());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn tampered_packet_is_rejected() {
        let suite = cbc_suite();
        let sk_e = [0x11; 16];
        let sk_a = [0x22; 32];
        let mut packets = seal(&suite, &sk_e, &sk_a, &meta(), &inner(), None).unwrap();
        let raw = &mut packets[0];
        let flip = raw.len() / 2;
        raw[flip] ^= 0x01;

        let message = IkeMessage::try_parse(raw);
        if let Ok(message) = message {
            if let Payload::Encrypted(sk) = &message.payloads[0] {
                assert_eq!(
                    open(&suite, &sk_e, &sk_a, raw, &sk.data),
                    Err(CryptoError::IntegrityFailure)
                );
            }
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn large_messages_fragment_and_reassemble_in_any_order() {
        let suite = gcm_suite();
        let sk_e = [0x44; 20];
        // a vendor payload too large for the tiny MTU below
        let big = vec![Payload::VendorId(vec![0xab; 600])];
        let packets = seal(&suite, &sk_e, &[], &meta(), &big, Some(300)).unwrap();
        assert!(packets.len() > 1);

        // deliver in reverse order
        let deadline = Instant::now() + std::time::Duration::from_secs(60);
        let mut buffer: Option<FragmentBuffer> = None;
        for packet in packets.iter().rev() {
            let message = IkeMessage::try_parse(packet).unwrap();
            let Payload::EncryptedFragment(skf) = &message.payloads[0] else {
                panic!("expected an SKF payload");
            };
            let plain = open(&suite, &sk_e, &[], packet, &skf.data).unwrap();
            let buf = buffer.get_or_insert_with(|| {
                FragmentBuffer::new(message.message_id, skf.total_fragments, deadline)
            });
            buf.insert(message.message_id, skf, plain).unwrap();
        }

        let buffer = buffer.unwrap();
        assert!(buffer.is_complete());
        let (first_inner, plain) = buffer.assemble();
        assert_eq!(first_inner, PayloadType::VendorID as u8);
        let payloads = decode_payload_list(first_inner, &plain).unwrap();
        assert_eq!(payloads, big);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn missing_fragment_never_delivers() {
        let suite = gcm_suite();
        let sk_e = [0x44; 20];
        let big = vec![Payload::VendorId(vec![0xab; 600])];
        let packets = seal(&suite, &sk_e, &[], &meta(), &big, Some(300)).unwrap();
        assert!(packets.len() >= 2);

        let deadline = Instant::now() + std::time::Duration::from_secs(60);
        let mut buffer: Option<FragmentBuffer> = None;
        // drop the second fragment
        for packet in packets.iter().take(1).chain(packets.iter().skip(2)) {
            let message = IkeMessage::try_parse(packet).unwrap();
            let Payload::EncryptedFragment(skf) = &message.payloads[0] else {
                panic!("expected an SKF payload");
            };
            let plain = open(&suite, &sk_e, &[], packet, &skf.data).unwrap();
            let buf = buffer.get_or_insert_with(|| {
                FragmentBuffer::new(message.message_id, skf.total_fragments, deadline)
            });
            buf.insert(message.message_id, skf, plain).unwrap();
        }
        assert!(!buffer.unwrap().is_complete());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn duplicate_fragments_are_idempotent() {
        let deadline = Instant::now() + std::time::Duration::from_secs(60);
        let mut buffer = FragmentBuffer::new(7, 2, deadline);
        let fragment = EncryptedFragment {
            first_inner: 41,
            fragment_num: 1,
            total_fragments: 2,
            data: vec![],
        };
        buffer.insert(7, &fragment, vec![0x01]).unwrap();
        // the duplicate carries different bytes and must not overwrite
        buffer.insert(7, &fragment, vec![0xff]).unwrap();
        assert_eq!(
            buffer.insert(8, &fragment, vec![]),
            Err(ReassemblyError::MessageIdMismatch)
        );
        let with_other_total = EncryptedFragment {
            total_fragments: 3,
            ..fragment.clone()
        };
        assert_eq!(
            buffer.insert(7, &with_other_total, vec![]),
            Err(ReassemblyError::TotalMismatch)
        );

        let second = EncryptedFragment {
            first_inner: 0,
            fragment_num: 2,
            total_fragments: 2,
            data: vec![],
        };
        buffer.insert(7, &second, vec![0x02]).unwrap();
        assert!(buffer.is_complete());
        assert_eq!(buffer.assemble(), (41, vec![0x01, 0x02]));
    }
}
