//! The TLS client abstraction driven by EAP-TTLS
//!
//! The engine does not ship a TLS implementation; the embedder injects one
//! through [TlsSessionFactory], the same way the UDP socket and the UICC
//! are injected into the IKE session. The abstraction is record-oriented:
//! handshake records travel inside EAP-TTLS fragments, and after the
//! handshake the tunnel encrypts and decrypts whole AVP sequences.

use thiserror::Error;

/// Failure inside the injected TLS implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TlsError(pub String);

/// Progress of the TLS handshake after feeding it inbound records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsStatus {
    /// More handshake round trips are needed
    HandshakeInProgress,
    /// The handshake finished and the tunnel keys are available
    HandshakeComplete,
    /// The handshake failed; the session is unusable
    Failed,
}

/// Records produced by one handshake step together with the new status
#[derive(Debug, Clone)]
pub struct TlsOutput {
    /// TLS records to ship to the server, possibly empty
    pub records: Vec<u8>,
    /// Handshake progress after this step
    pub status: TlsStatus,
}

/// One TLS client session
pub trait TlsSession: Send {
    /// Produce the initial ClientHello records
    fn start_handshake(&mut self) -> Result<TlsOutput, TlsError>;

    /// Feed inbound handshake records, producing outbound records and the
    /// new handshake status
    fn process_handshake(&mut self, records: &[u8]) -> Result<TlsOutput, TlsError>;

    /// Encrypt application data into TLS records for the tunnel
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Decrypt inbound TLS records from the tunnel
    fn decrypt(&mut self, records: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Export the 128 octets of keying material labelled "ttls keying
    /// material" (RFC 5281, section 8): the first 64 octets become the MSK,
    /// the rest the EMSK. Only valid after the handshake completed.
    fn export_key_material(&mut self) -> Result<[u8; 128], TlsError>;
}

/// Creates TLS sessions for EAP-TTLS, optionally pinned to a trusted CA
pub trait TlsSessionFactory: Send + Sync {
    /// Open a fresh client session; `trusted_ca` is a DER-encoded
    /// certificate that, when present, replaces the system trust store
    fn create(&self, trusted_ca: Option<&[u8]>) -> Result<Box<dyn TlsSession>, TlsError>;
}
