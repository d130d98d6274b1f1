//! Bookkeeping for the single outstanding request of an IKE session
//!
//! The window size is 1: exactly one request may be in flight per
//! direction. Retransmission backs off exponentially from 500 ms, doubles
//! per attempt and caps at 30 s; after 6 attempts the peer is declared
//! dead.

use std::time::Duration;

use tokio::time::Instant;

/// First retransmission delay
pub const RETRANSMIT_BASE: Duration = Duration::from_millis(500);
/// Upper bound of the backoff
pub const RETRANSMIT_CAP: Duration = Duration::from_secs(30);
/// Attempts before the peer is declared dead
pub const RETRANSMIT_MAX_ATTEMPTS: u32 = 6;

/// What the outstanding request is part of, deciding how its response is
/// handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    /// IKE_SA_INIT
    SaInit,
    /// IKE_AUTH carrying the identities and the first child SA
    Auth,
    /// IKE_AUTH carrying only an EAP payload
    AuthEap,
    /// IKE_AUTH carrying the final AUTH payload after EAP
    AuthFinal,
    /// CREATE_CHILD_SA creating or rekeying a child SA; carries the SPI of
    /// the child being replaced when rekeying
    CreateChild {
        /// Local SPI of the child this exchange replaces
        rekeyed_spi: Option<u32>,
    },
    /// CREATE_CHILD_SA rekeying the IKE SA itself
    RekeyIke,
    /// INFORMATIONAL liveness check
    Liveness,
    /// INFORMATIONAL delete of a child SA
    DeleteChild,
    /// INFORMATIONAL delete of the IKE SA
    DeleteIke,
}

/// The one request in flight, with its retransmission state
#[derive(Debug)]
pub struct PendingRequest {
    /// Message ID of the request
    pub message_id: u32,
    /// Encoded datagrams; more than one when the request was fragmented
    pub packets: Vec<Vec<u8>>,
    /// What the request belongs to
    pub kind: ExchangeKind,
    /// Retransmissions performed so far
    pub attempt: u32,
    /// When the next retransmission fires
    pub deadline: Instant,
}

impl PendingRequest {
    /// Track a freshly sent request
    pub fn new(message_id: u32, packets: Vec<Vec<u8>>, kind: ExchangeKind) -> Self {
        Self {
            message_id,
            packets,
            kind,
            attempt: 0,
            deadline: Instant::now() + RETRANSMIT_BASE,
        }
    }

    /// The backoff applied after the given number of attempts
    pub fn backoff(attempt: u32) -> Duration {
        RETRANSMIT_BASE
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(RETRANSMIT_CAP)
            .min(RETRANSMIT_CAP)
    }

    /// Record a retransmission; `false` when the attempts are exhausted
    /// and the peer must be declared dead
    pub fn next_attempt(&mut self) -> bool {
        self.attempt += 1;
        if self.attempt >= RETRANSMIT_MAX_ATTEMPTS {
            return false;
        }
        self.deadline = Instant::now() + Self::backoff(self.attempt);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(PendingRequest::backoff(0), Duration::from_millis(500));
        assert_eq!(PendingRequest::backoff(1), Duration::from_secs(1));
        assert_eq!(PendingRequest::backoff(4), Duration::from_secs(8));
        assert_eq!(PendingRequest::backoff(6), Duration::from_secs(30));
        assert_eq!(PendingRequest::backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn attempts_exhaust_after_six() {
        let mut pending = PendingRequest::new(0, vec![vec![]], ExchangeKind::SaInit);
        for _ in 0..RETRANSMIT_MAX_ATTEMPTS - 1 {
            assert!(pending.next_attempt());
        }
        assert!(!pending.next_attempt());
    }
}
