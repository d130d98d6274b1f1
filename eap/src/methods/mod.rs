//! The EAP method state machines
//!
//! Method identity is a tagged variant; every machine exposes the same
//! `process` surface and stores its state as a value, transitioning
//! `Created -> working states -> Final`. Success and Failure frames are
//! handled by the session before dispatch and finalize the machine.

pub mod aka;
pub mod aka_prime;
pub mod mschapv2;
pub mod sim;
pub mod ttls;

use crate::message::{EapMessage, EapMethodType};
use crate::EapResult;

/// A running method state machine
pub(crate) enum Method {
    Sim(sim::EapSimMethod),
    Aka(aka::EapAkaMethod),
    AkaPrime(aka_prime::EapAkaPrimeMethod),
    MsChapV2(mschapv2::EapMsChapV2Method),
    Ttls(ttls::EapTtlsMethod),
}

impl Method {
    /// The EAP type value this machine answers to
    pub(crate) fn method_type(&self) -> EapMethodType {
        match self {
            Method::Sim(_) => EapMethodType::Sim,
            Method::Aka(_) => EapMethodType::Aka,
            Method::AkaPrime(_) => EapMethodType::AkaPrime,
            Method::MsChapV2(_) => EapMethodType::MsChapV2,
            Method::Ttls(_) => EapMethodType::Ttls,
        }
    }

    /// Feed one method-level request to the machine
    pub(crate) fn process(&mut self, message: &EapMessage) -> EapResult {
        match self {
            Method::Sim(m) => m.process(message),
            Method::Aka(m) => m.process(message),
            Method::AkaPrime(m) => m.process(message),
            Method::MsChapV2(m) => m.process(message),
            Method::Ttls(m) => m.process(message),
        }
    }

    /// The keys the machine derived, when its exchange got far enough
    pub(crate) fn keys(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match self {
            Method::Sim(m) => m.keys(),
            Method::Aka(m) => m.keys(),
            Method::AkaPrime(m) => m.keys(),
            Method::MsChapV2(m) => m.keys(),
            Method::Ttls(m) => m.keys(),
        }
    }

    /// Move the machine to its terminal state
    pub(crate) fn finalize(&mut self) {
        match self {
            Method::Sim(m) => m.finalize(),
            Method::Aka(m) => m.finalize(),
            Method::AkaPrime(m) => m.finalize(),
            Method::MsChapV2(m) => m.finalize(),
            Method::Ttls(m) => m.finalize(),
        }
    }
}
