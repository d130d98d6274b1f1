//! Session configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use eap::config::EapSessionConfig;
use ikev2_wire::definitions::params::{EncryptionId, IdType, IntegrityId, PrfId};
use ikev2_wire::definitions::params::DhGroupId;
use ikev2_wire::definitions::{Identification, Proposal, TrafficSelector, Transform};
use ikev2_wire::definitions::params::Protocol;

/// How the initiator proves its identity in IKE_AUTH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthConfig {
    /// Shared-key message integrity code over the signed octets
    PresharedKey(Vec<u8>),
    /// EAP authentication; the final AUTH payloads are keyed with the MSK
    Eap(EapSessionConfig),
}

/// Parameters of the child SA negotiated during IKE_AUTH or later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildSessionConfig {
    /// ESP proposals in preference order
    pub proposals: Vec<Proposal>,
    /// Selectors for traffic this end may send
    pub local_ts: Vec<TrafficSelector>,
    /// Selectors for traffic the peer may send
    pub remote_ts: Vec<TrafficSelector>,
    /// Negotiate transport mode instead of tunnel mode
    pub transport_mode: bool,
}

impl ChildSessionConfig {
    /// A tunnel-mode child session from proposals alone: both selector
    /// lists default to the full IPv4 and IPv6 ranges
    pub fn tunnel(proposals: Vec<Proposal>) -> Self {
        let all = vec![TrafficSelector::all_ipv4(), TrafficSelector::all_ipv6()];
        Self {
            proposals,
            local_ts: all.clone(),
            remote_ts: all,
            transport_mode: false,
        }
    }

    /// A reasonable default ESP proposal set for testing and bring-up
    pub fn default_esp_proposals() -> Vec<Proposal> {
        vec![Proposal::new_esp(
            1,
            vec![
                Transform::Encryption(EncryptionId::AesGcm16, Some(256)),
                Transform::Encryption(EncryptionId::AesCbc, Some(256)),
                Transform::Integrity(IntegrityId::HmacSha2_256_128),
                Transform::SequenceNumber(
                    ikev2_wire::definitions::params::EsnId::None,
                ),
            ],
        )]
    }
}

/// Everything one IKE session needs to run
///
/// The whole configuration serializes, including the recursive EAP
/// settings, so session parameters can be persisted and restored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IkeSessionConfig {
    /// Address the transport reaches the peer at
    pub peer: SocketAddr,
    /// Address the transport sends from, used for NAT detection hashes
    pub local: SocketAddr,
    /// IDi payload content
    pub local_identity: Identification,
    /// Expected IDr payload content
    pub remote_identity: Identification,
    /// Authentication material
    pub auth: AuthConfig,
    /// IKE SA proposals in preference order
    pub proposals: Vec<Proposal>,
    /// First child SA, negotiated inside IKE_AUTH
    pub child: ChildSessionConfig,
    /// Soft deadline for the full handshake
    pub handshake_timeout: Duration,
    /// Outbound messages above this size are fragmented when the peer
    /// announced RFC 7383 support
    pub fragment_mtu: usize,
    /// Inbound fragments older than this are discarded as a set
    pub reassembly_timeout: Duration,
}

impl IkeSessionConfig {
    /// Construct a config with the documented defaults: 30 s handshake
    /// deadline, 1280-octet fragmentation threshold, 60 s reassembly
    /// timeout
    pub fn new(
        peer: SocketAddr,
        local: SocketAddr,
        local_identity: Identification,
        remote_identity: Identification,
        auth: AuthConfig,
        proposals: Vec<Proposal>,
        child: ChildSessionConfig,
    ) -> Self {
        Self {
            peer,
            local,
            local_identity,
            remote_identity,
            auth,
            proposals,
            child,
            handshake_timeout: Duration::from_secs(30),
            fragment_mtu: 1280,
            reassembly_timeout: Duration::from_secs(60),
        }
    }

    /// A reasonable default IKE proposal set for testing and bring-up
    pub fn default_ike_proposals() -> Vec<Proposal> {
        vec![Proposal::new(
            1,
            Protocol::InternetKeyExchange,
            vec![
                Transform::Encryption(EncryptionId::AesGcm16, Some(256)),
                Transform::Encryption(EncryptionId::AesCbc, Some(256)),
                Transform::PseudoRandomFunction(PrfId::HmacSha2_256),
                Transform::Integrity(IntegrityId::HmacSha2_256_128),
                Transform::KeyExchange(DhGroupId::ModP2048),
                Transform::KeyExchange(DhGroupId::ModP3072),
            ],
        )]
    }

    /// An identity payload from a fully qualified domain name
    pub fn fqdn_identity(name: &str) -> Identification {
        Identification {
            id_type: IdType::Fqdn,
            data: name.as_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use ikev2_wire::definitions::params::TsType;

    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn tunnel_defaults_cover_everything() {
        let child = ChildSessionConfig::tunnel(ChildSessionConfig::default_esp_proposals());
        assert!(!child.transport_mode);
        for ts in [&child.local_ts, &child.remote_ts] {
            assert_eq!(ts.len(), 2);
            assert_eq!(ts[0].ts_type(), TsType::Ipv4AddrRange);
            assert_eq!(ts[0].start_port(), 0);
            assert_eq!(ts[0].end_port(), 65535);
            assert_eq!(ts[0].start_addr(), "0.0.0.0".parse::<IpAddr>().unwrap());
            assert_eq!(
                ts[0].end_addr(),
                "255.255.255.255".parse::<IpAddr>().unwrap()
            );
            assert_eq!(ts[1].ts_type(), TsType::Ipv6AddrRange);
            assert_eq!(ts[1].start_addr(), "::".parse::<IpAddr>().unwrap());
            assert_eq!(
                ts[1].end_addr(),
                "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff"
                    .parse::<IpAddr>()
                    .unwrap()
            );
        }
    }
}
