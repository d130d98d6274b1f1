//! Codec for the Diameter-style AVPs carried inside the EAP-TTLS tunnel
//! (RFC 5281, section 10)
//!
//! An AVP is a 4-octet code, a flag octet (V for vendor, M for mandatory),
//! a 3-octet length covering code through data, an optional 4-octet vendor
//! ID, the data, and zero padding up to the next 4-octet boundary.

use thiserror::Error;

/// AVP code of the EAP-Message AVP tunnelling the inner conversation
pub const AVP_CODE_EAP_MESSAGE: u32 = 79;

/// Vendor flag: a vendor ID octet group is present
pub const AVP_FLAG_VENDOR: u8 = 0x80;
/// Mandatory flag: the receiver must understand this AVP
pub const AVP_FLAG_MANDATORY: u8 = 0x40;

/// Failure while decoding an AVP stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum AvpDecodeError {
    #[error("Buffer too small to hold an AVP header")]
    BufferTooSmall,
    #[error("Declared AVP length is smaller than its header")]
    LengthTooSmall,
    #[error("Declared AVP length exceeds the buffer")]
    LengthExceedsBuffer,
}

/// A single AVP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avp {
    /// The AVP code
    pub code: u32,
    /// Whether the mandatory flag is set
    pub mandatory: bool,
    /// The vendor ID, when the vendor flag is set
    pub vendor_id: Option<u32>,
    /// The data octets, without padding
    pub data: Vec<u8>,
}

impl Avp {
    /// Construct the EAP-Message AVP wrapping an inner EAP packet
    pub fn eap_message(packet: Vec<u8>) -> Self {
        Self {
            code: AVP_CODE_EAP_MESSAGE,
            mandatory: true,
            vendor_id: None,
            data: packet,
        }
    }

    /// Size of the AVP header in octets, depending on the vendor flag
    fn header_len(vendored: bool) -> usize {
        if vendored {
            12
        } else {
            8
        }
    }

    /// Parse a sequence of AVPs from a decrypted tunnel record
    pub fn parse_stream(buf: &[u8]) -> Result<Vec<Avp>, AvpDecodeError> {
        let mut avps = vec![];
        let mut offset = 0usize;
        while offset < buf.len() {
            let (avp, consumed) = Self::try_parse(&buf[offset..])?;
            avps.push(avp);
            // consume the padding up to the next 4-octet boundary
            let padded = consumed + (4 - consumed % 4) % 4;
            offset += padded.min(buf.len() - offset);
        }
        Ok(avps)
    }

    /// Parse a single AVP, returning it and the unpadded length consumed
    pub fn try_parse(buf: &[u8]) -> Result<(Avp, usize), AvpDecodeError> {
        if buf.len() < Self::header_len(false) {
            return Err(AvpDecodeError::BufferTooSmall);
        }
        let code = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let flags = buf[4];
        let length = u32::from_be_bytes([0, buf[5], buf[6], buf[7]]) as usize;
        let vendored = flags & AVP_FLAG_VENDOR == AVP_FLAG_VENDOR;
        let header_len = Self::header_len(vendored);

        if length < header_len {
            return Err(AvpDecodeError::LengthTooSmall);
        }
        if length > buf.len() {
            return Err(AvpDecodeError::LengthExceedsBuffer);
        }

        let vendor_id = if vendored {
            Some(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]))
        } else {
            None
        };

        Ok((
            Avp {
                code,
                mandatory: flags & AVP_FLAG_MANDATORY == AVP_FLAG_MANDATORY,
                vendor_id,
                data: buf[header_len..length].to_vec(),
            },
            length,
        ))
    }

    /// Encode the AVP including trailing padding
    pub fn build(&self) -> Vec<u8> {
        let header_len = Self::header_len(self.vendor_id.is_some());
        let length = header_len + self.data.len();
        let padded = length + (4 - length % 4) % 4;

        let mut out = Vec::with_capacity(padded);
        out.extend_from_slice(&self.code.to_be_bytes());
        out.push(
            if self.vendor_id.is_some() {
                AVP_FLAG_VENDOR
            } else {
                0
            } | if self.mandatory { AVP_FLAG_MANDATORY } else { 0 },
        );
        out.extend_from_slice(&(length as u32).to_be_bytes()[1..]);
        if let Some(vendor_id) = self.vendor_id {
            out.extend_from_slice(&vendor_id.to_be_bytes());
        }
        out.extend_from_slice(&self.data);
        out.resize(padded, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn eap_message_avp_round_trip() {
        let avp = Avp::eap_message(vec![0x02, 0x01, 0x00, 0x09, 0x01, 0x61, 0x62, 0x63, 0x64]);
        let encoded = avp.build();
        // code 79, flags M, length 8 + 9 = 17, padded to 20
        assert_eq!(encoded.len(), 20);
        assert_eq!(&encoded[..8], &[0, 0, 0, 79, 0x40, 0, 0, 17]);
        assert_eq!(&encoded[17..], &[0, 0, 0]);

        let (parsed, consumed) = Avp::try_parse(&encoded).unwrap();
        assert_eq!(consumed, 17);
        assert_eq!(parsed, avp);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn vendored_avp_round_trip() {
        let avp = Avp {
            code: 99,
            mandatory: false,
            vendor_id: Some(0x1337),
            data: vec![0xaa, 0xbb, 0xcc, 0xdd],
        };
        let encoded = avp.build();
        assert_eq!(encoded.len(), 16);
        let (parsed, _) = Avp::try_parse(&encoded).unwrap();
        assert_eq!(parsed, avp);
    }

    #[test]
    fn reject_length_smaller_than_header() {
        // vendor flag set but length declares only 8 octets
        let buff = [0, 0, 0, 79, 0x80, 0, 0, 8, 0, 0, 0, 0];
        assert_eq!(
            Avp::try_parse(&buff),
            Err(AvpDecodeError::LengthTooSmall)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn parse_stream_skips_padding() {
        let first = Avp::eap_message(vec![0x02, 0x01, 0x00, 0x05, 0x01]);
        let second = Avp::eap_message(vec![0x02, 0x02, 0x00, 0x04]);
        let mut buf = first.build();
        buf.extend(second.build());
        let avps = Avp::parse_stream(&buf).unwrap();
        assert_eq!(avps, vec![first, second]);
    }
}
