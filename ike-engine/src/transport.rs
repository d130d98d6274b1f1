//! The external collaborators of the engine: the packet transport and the
//! kernel SA installer
//!
//! The engine never opens sockets or touches the kernel itself. The
//! embedder supplies both services and delivers inbound datagrams to the
//! session worker through [crate::session::IkeSessionHandle].

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use ikev2_wire::definitions::TrafficSelector;

use crate::crypto::CryptoSuite;
use crate::crypto::keymat::ChildKeys;

/// Non-blocking datagram egress
///
/// Port 500 carries plain IKE; port 4500 carries UDP-encapsulated IKE
/// where the transport prepends the 4-octet non-ESP marker. Both concerns
/// live behind this trait.
pub trait PacketTransport: Send + Sync {
    /// Ship one datagram to the peer
    fn send(&self, packet: &[u8], peer: SocketAddr) -> io::Result<()>;
}

/// Failure reported by the SA installer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SA installation failed: {0}")]
pub struct SaInstallError(pub String);

/// Everything the kernel needs to program one child SA pair
pub struct ChildSaInstall {
    /// SPI chosen by this engine for inbound traffic
    pub local_spi: u32,
    /// SPI chosen by the peer for outbound traffic
    pub remote_spi: u32,
    /// The negotiated transforms
    pub suite: CryptoSuite,
    /// The four traffic keys
    pub keys: ChildKeys,
    /// Selectors for traffic this end may send
    pub local_ts: Vec<TrafficSelector>,
    /// Selectors for traffic the peer may send
    pub remote_ts: Vec<TrafficSelector>,
    /// Transport mode instead of tunnel mode
    pub transport_mode: bool,
}

/// Kernel IPsec SA programming, reached as an external service
pub trait SaInstaller: Send + Sync {
    /// Install a freshly negotiated child SA pair
    fn install_child_sa(&self, install: &ChildSaInstall) -> Result<(), SaInstallError>;

    /// Remove a child SA pair by the local inbound SPI
    fn delete_child_sa(&self, local_spi: u32) -> Result<(), SaInstallError>;
}
