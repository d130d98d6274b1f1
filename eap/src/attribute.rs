//! Codec for the attribute TLVs shared by EAP-SIM, EAP-AKA and EAP-AKA'
//!
//! Attributes carry their length in multiples of 4 octets and are always
//! 4-octet aligned (RFC 4187, section 8.1). The type data of these methods
//! starts with a 1-octet subtype and 2 reserved octets before the first
//! attribute.

use crate::message::EapDecodeError;

/// Attribute type values from the EAP-SIM/AKA registry
#[allow(missing_docs)]
pub mod types {
    pub const AT_RAND: u8 = 1;
    pub const AT_AUTN: u8 = 2;
    pub const AT_RES: u8 = 3;
    pub const AT_AUTS: u8 = 4;
    pub const AT_PADDING: u8 = 6;
    pub const AT_NONCE_MT: u8 = 7;
    pub const AT_PERMANENT_ID_REQ: u8 = 10;
    pub const AT_MAC: u8 = 11;
    pub const AT_NOTIFICATION: u8 = 12;
    pub const AT_ANY_ID_REQ: u8 = 13;
    pub const AT_IDENTITY: u8 = 14;
    pub const AT_VERSION_LIST: u8 = 15;
    pub const AT_SELECTED_VERSION: u8 = 16;
    pub const AT_FULLAUTH_ID_REQ: u8 = 17;
    pub const AT_CLIENT_ERROR_CODE: u8 = 22;
    pub const AT_KDF_INPUT: u8 = 23;
    pub const AT_KDF: u8 = 24;
}

/// A single attribute of an EAP-SIM/AKA/AKA' message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimAkaAttribute {
    /// One or more 16-octet RAND challenges, concatenated
    AtRand(Vec<u8>),
    /// The UMTS authentication token
    AtAutn([u8; 16]),
    /// The UMTS authentication result, length counted in bits
    AtRes {
        /// Length of the RES in bits, a multiple of 8 between 32 and 128
        bit_len: u16,
        /// The RES octets
        res: Vec<u8>,
    },
    /// The resynchronization token produced on a sequence number mismatch
    AtAuts([u8; 14]),
    /// Alignment padding; the value octets must be zero
    AtPadding(usize),
    /// The peer nonce of the EAP-SIM start round
    AtNonceMt([u8; 16]),
    /// Server asks for the permanent identity
    AtPermanentIdReq,
    /// Server asks for any identity
    AtAnyIdReq,
    /// Server asks for a full-authentication identity
    AtFullauthIdReq,
    /// Message authentication code over the whole EAP packet
    AtMac([u8; 16]),
    /// Notification code
    AtNotification(u16),
    /// The identity, not padded
    AtIdentity(Vec<u8>),
    /// EAP-SIM version list as sent by the server
    AtVersionList(Vec<u16>),
    /// The version selected by the peer
    AtSelectedVersion(u16),
    /// Error code the peer reports to the server
    AtClientErrorCode(u16),
    /// The network name input to the EAP-AKA' key derivation
    AtKdfInput(Vec<u8>),
    /// A key derivation function identifier of EAP-AKA'
    AtKdf(u16),
    /// An attribute this crate does not interpret, preserved raw
    Unknown {
        /// The attribute type value
        attribute_type: u8,
        /// The value octets, everything after the length octet
        value: Vec<u8>,
    },
}

impl SimAkaAttribute {
    /// The attribute type value on the wire
    pub fn type_value(&self) -> u8 {
        match self {
            SimAkaAttribute::AtRand(_) => types::AT_RAND,
            SimAkaAttribute::AtAutn(_) => types::AT_AUTN,
            SimAkaAttribute::AtRes { .. } => types::AT_RES,
            SimAkaAttribute::AtAuts(_) => types::AT_AUTS,
            SimAkaAttribute::AtPadding(_) => types::AT_PADDING,
            SimAkaAttribute::AtNonceMt(_) => types::AT_NONCE_MT,
            SimAkaAttribute::AtPermanentIdReq => types::AT_PERMANENT_ID_REQ,
            SimAkaAttribute::AtAnyIdReq => types::AT_ANY_ID_REQ,
            SimAkaAttribute::AtFullauthIdReq => types::AT_FULLAUTH_ID_REQ,
            SimAkaAttribute::AtMac(_) => types::AT_MAC,
            SimAkaAttribute::AtNotification(_) => types::AT_NOTIFICATION,
            SimAkaAttribute::AtIdentity(_) => types::AT_IDENTITY,
            SimAkaAttribute::AtVersionList(_) => types::AT_VERSION_LIST,
            SimAkaAttribute::AtSelectedVersion(_) => types::AT_SELECTED_VERSION,
            SimAkaAttribute::AtClientErrorCode(_) => types::AT_CLIENT_ERROR_CODE,
            SimAkaAttribute::AtKdfInput(_) => types::AT_KDF_INPUT,
            SimAkaAttribute::AtKdf(_) => types::AT_KDF,
            SimAkaAttribute::Unknown { attribute_type, .. } => *attribute_type,
        }
    }

    /// Encode the attribute including its type and length octets
    pub fn build(&self) -> Vec<u8> {
        let mut value = match self {
            SimAkaAttribute::AtRand(rands) => {
                let mut v = vec![0, 0];
                v.extend_from_slice(rands);
                v
            }
            SimAkaAttribute::AtAutn(autn) => {
                let mut v = vec![0, 0];
                v.extend_from_slice(autn);
                v
            }
            SimAkaAttribute::AtRes { bit_len, res } => {
                let mut v = bit_len.to_be_bytes().to_vec();
                v.extend_from_slice(res);
                v
            }
            SimAkaAttribute::AtAuts(auts) => auts.to_vec(),
            SimAkaAttribute::AtPadding(len) => vec![0; len - 2],
            SimAkaAttribute::AtNonceMt(nonce) => {
                let mut v = vec![0, 0];
                v.extend_from_slice(nonce);
                v
            }
            SimAkaAttribute::AtPermanentIdReq
            | SimAkaAttribute::AtAnyIdReq
            | SimAkaAttribute::AtFullauthIdReq => vec![0, 0],
            SimAkaAttribute::AtMac(mac) => {
                let mut v = vec![0, 0];
                v.extend_from_slice(mac);
                v
            }
            SimAkaAttribute::AtNotification(code) => code.to_be_bytes().to_vec(),
            SimAkaAttribute::AtIdentity(identity) => {
                let mut v = (identity.len() as u16).to_be_bytes().to_vec();
                v.extend_from_slice(identity);
                v
            }
            SimAkaAttribute::AtVersionList(versions) => {
                let mut v = ((versions.len() * 2) as u16).to_be_bytes().to_vec();
                for version in versions {
                    v.extend_from_slice(&version.to_be_bytes());
                }
                v
            }
            SimAkaAttribute::AtSelectedVersion(version) => version.to_be_bytes().to_vec(),
            SimAkaAttribute::AtClientErrorCode(code) => code.to_be_bytes().to_vec(),
            SimAkaAttribute::AtKdfInput(name) => {
                let mut v = (name.len() as u16).to_be_bytes().to_vec();
                v.extend_from_slice(name);
                v
            }
            SimAkaAttribute::AtKdf(kdf) => kdf.to_be_bytes().to_vec(),
            SimAkaAttribute::Unknown { value, .. } => value.clone(),
        };
        // zero pad the value so the whole attribute is 4-octet aligned
        while (value.len() + 2) % 4 != 0 {
            value.push(0);
        }
        let mut out = Vec::with_capacity(2 + value.len());
        out.push(self.type_value());
        out.push(((value.len() + 2) / 4) as u8);
        out.extend(value);
        out
    }

    fn try_parse(attribute_type: u8, value: &[u8]) -> Result<Self, EapDecodeError> {
        Ok(match attribute_type {
            types::AT_RAND => {
                if value.len() < 2 || (value.len() - 2) % 16 != 0 {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                SimAkaAttribute::AtRand(value[2..].to_vec())
            }
            types::AT_AUTN => SimAkaAttribute::AtAutn(fixed(&value[2.min(value.len())..])?),
            types::AT_RES => {
                if value.len() < 2 {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                let bit_len = u16::from_be_bytes([value[0], value[1]]);
                if bit_len % 8 != 0 || !(32..=128).contains(&bit_len) {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                let byte_len = bit_len as usize / 8;
                if value.len() - 2 < byte_len {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                SimAkaAttribute::AtRes {
                    bit_len,
                    res: value[2..2 + byte_len].to_vec(),
                }
            }
            types::AT_AUTS => SimAkaAttribute::AtAuts(fixed(value)?),
            types::AT_PADDING => {
                if value.iter().any(|b| *b != 0) {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                SimAkaAttribute::AtPadding(value.len() + 2)
            }
            types::AT_NONCE_MT => SimAkaAttribute::AtNonceMt(fixed(&value[2.min(value.len())..])?),
            types::AT_PERMANENT_ID_REQ => SimAkaAttribute::AtPermanentIdReq,
            types::AT_ANY_ID_REQ => SimAkaAttribute::AtAnyIdReq,
            types::AT_FULLAUTH_ID_REQ => SimAkaAttribute::AtFullauthIdReq,
            types::AT_MAC => SimAkaAttribute::AtMac(fixed(&value[2.min(value.len())..])?),
            types::AT_NOTIFICATION => SimAkaAttribute::AtNotification(two_octets(value)?),
            types::AT_IDENTITY => {
                let actual = two_octets(value)? as usize;
                if value.len() - 2 < actual {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                SimAkaAttribute::AtIdentity(value[2..2 + actual].to_vec())
            }
            types::AT_VERSION_LIST => {
                let actual = two_octets(value)? as usize;
                if actual % 2 != 0 || value.len() - 2 < actual {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                SimAkaAttribute::AtVersionList(
                    value[2..2 + actual]
                        .chunks_exact(2)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect(),
                )
            }
            types::AT_SELECTED_VERSION => SimAkaAttribute::AtSelectedVersion(two_octets(value)?),
            types::AT_CLIENT_ERROR_CODE => SimAkaAttribute::AtClientErrorCode(two_octets(value)?),
            types::AT_KDF_INPUT => {
                let actual = two_octets(value)? as usize;
                if value.len() - 2 < actual {
                    return Err(EapDecodeError::InvalidAttribute);
                }
                SimAkaAttribute::AtKdfInput(value[2..2 + actual].to_vec())
            }
            types::AT_KDF => SimAkaAttribute::AtKdf(two_octets(value)?),
            _ => SimAkaAttribute::Unknown {
                attribute_type,
                value: value.to_vec(),
            },
        })
    }
}

fn fixed<const N: usize>(value: &[u8]) -> Result<[u8; N], EapDecodeError> {
    value.try_into().map_err(|_| EapDecodeError::InvalidAttribute)
}

fn two_octets(value: &[u8]) -> Result<u16, EapDecodeError> {
    if value.len() < 2 {
        return Err(EapDecodeError::InvalidAttribute);
    }
    Ok(u16::from_be_bytes([value[0], value[1]]))
}

/// The decoded type data of an EAP-SIM/AKA/AKA' message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimAkaTypeData {
    /// The subtype octet
    pub subtype: u8,
    /// The attributes in wire order
    pub attributes: Vec<SimAkaAttribute>,
}

impl SimAkaTypeData {
    /// Construct type data from a subtype and attributes
    pub fn new(subtype: u8, attributes: Vec<SimAkaAttribute>) -> Self {
        Self {
            subtype,
            attributes,
        }
    }

    /// Parse the type data of an EAP-SIM/AKA message: subtype, 2 reserved
    /// octets and a sequence of aligned attributes.
    ///
    /// An attribute whose declared length times 4 exceeds the remaining
    /// type data fails with [EapDecodeError::AttributeOverrun]; the caller
    /// answers that with an AT_CLIENT_ERROR_CODE response.
    pub fn try_parse(type_data: &[u8]) -> Result<Self, EapDecodeError> {
        if type_data.len() < 3 {
            return Err(EapDecodeError::BufferTooSmall);
        }
        let subtype = type_data[0];
        let mut offset = 3;
        let mut attributes = vec![];
        while offset < type_data.len() {
            if type_data.len() - offset < 2 {
                return Err(EapDecodeError::AttributeOverrun);
            }
            let attribute_type = type_data[offset];
            let byte_len = type_data[offset + 1] as usize * 4;
            if byte_len < 2 || byte_len > type_data.len() - offset {
                return Err(EapDecodeError::AttributeOverrun);
            }
            attributes.push(SimAkaAttribute::try_parse(
                attribute_type,
                &type_data[offset + 2..offset + byte_len],
            )?);
            offset += byte_len;
        }
        Ok(Self {
            subtype,
            attributes,
        })
    }

    /// Encode the type data: subtype, 2 reserved octets, attributes
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![self.subtype, 0, 0];
        for attribute in &self.attributes {
            out.extend(attribute.build());
        }
        out
    }

    /// The first attribute matching the predicate
    pub fn find<'a, T>(&'a self, select: impl Fn(&'a SimAkaAttribute) -> Option<T>) -> Option<T> {
        self.attributes.iter().find_map(select)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn client_error_code_round_trip() {
        let buff = vec![22, 1, 0x00, 0x01];
        let parsed = SimAkaAttribute::try_parse(buff[0], &buff[2..]).unwrap();
        assert_eq!(parsed, SimAkaAttribute::AtClientErrorCode(1));
        assert_eq!(parsed.build(), buff);
        assert_eq!(parsed.build().len(), 4);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn identity_is_padded_to_alignment() {
        let attribute = SimAkaAttribute::AtIdentity(b"0test@example".to_vec());
        let encoded = attribute.build();
        assert_eq!(encoded.len() % 4, 0);
        assert_eq!(encoded[0], types::AT_IDENTITY);
        assert_eq!(encoded[1] as usize * 4, encoded.len());

        let type_data = SimAkaTypeData::new(10, vec![attribute.clone()]);
        let reparsed = SimAkaTypeData::try_parse(&type_data.build()).unwrap();
        assert_eq!(reparsed.attributes, vec![attribute]);
    }

    #[test]
    fn attribute_overrunning_type_data_fails() {
        // subtype + reserved, then an attribute declaring 8 octets with 4 present
        let type_data = vec![11, 0, 0, 1, 2, 0, 0, 0];
        assert_eq!(
            SimAkaTypeData::try_parse(&type_data),
            Err(EapDecodeError::AttributeOverrun)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn version_list_round_trip() {
        let type_data = SimAkaTypeData::new(
            10,
            vec![
                SimAkaAttribute::AtVersionList(vec![1]),
                SimAkaAttribute::AtSelectedVersion(1),
                SimAkaAttribute::AtNonceMt([0xaa; 16]),
            ],
        );
        let reparsed = SimAkaTypeData::try_parse(&type_data.build()).unwrap();
        assert_eq!(reparsed, type_data);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn unknown_attribute_survives_round_trip() {
        let unknown = SimAkaAttribute::Unknown {
            attribute_type: 133,
            value: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
        };
        let encoded = unknown.build();
        let parsed = SimAkaAttribute::try_parse(encoded[0], &encoded[2..]).unwrap();
        assert_eq!(parsed, unknown);
    }
}
