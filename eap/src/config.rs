//! Per-session EAP configuration
//!
//! The configuration is a mapping from method type to method-specific
//! settings plus the identity used for the outer Identity exchange. It
//! serializes as a whole, including the recursive EAP-TTLS inner
//! configuration, which makes it the persistable session parameter bag.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::EapMethodType;
use crate::sim_auth::AppType;

/// Failure constructing an [EapSessionConfig]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("EAP-TTLS must not carry another EAP-TTLS as its inner method")]
    NestedTtls,
    #[error("At least one EAP method must be configured")]
    NoMethods,
}

/// EAP-SIM settings (RFC 4186)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapSimConfig {
    /// Subscription the UICC challenges are run against
    pub sub_id: i32,
    /// UICC application type
    pub app_type: AppType,
}

/// EAP-AKA settings (RFC 4187)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapAkaConfig {
    /// Subscription the UICC challenges are run against
    pub sub_id: i32,
    /// UICC application type
    pub app_type: AppType,
}

/// EAP-AKA' settings (RFC 5448)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapAkaPrimeConfig {
    /// Subscription the UICC challenges are run against
    pub sub_id: i32,
    /// UICC application type
    pub app_type: AppType,
    /// The network name expected in AT_KDF_INPUT
    pub network_name: String,
    /// Continue when the server's network name differs from the configured
    /// one instead of failing authentication
    pub allow_mismatched_network_names: bool,
}

/// EAP-MSCHAPv2 settings (RFC 2759)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapMsChapV2Config {
    /// The account name sent in the challenge response
    pub username: String,
    /// The password the NT hash is computed from
    pub password: String,
}

/// EAP-TTLS settings (RFC 5281)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapTtlsConfig {
    /// DER-encoded CA certificate overriding the system trust store
    pub trusted_ca: Option<Vec<u8>>,
    /// Configuration of the tunnelled inner EAP session; never contains
    /// EAP-TTLS itself
    pub inner: Box<EapSessionConfig>,
}

/// The full configuration of one EAP session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapSessionConfig {
    /// Identity for the outer Identity exchange, empty by default
    pub identity: Vec<u8>,
    /// EAP-SIM settings, when the method is enabled
    pub sim: Option<EapSimConfig>,
    /// EAP-AKA settings, when the method is enabled
    pub aka: Option<EapAkaConfig>,
    /// EAP-AKA' settings, when the method is enabled
    pub aka_prime: Option<EapAkaPrimeConfig>,
    /// EAP-MSCHAPv2 settings, when the method is enabled
    pub mschapv2: Option<EapMsChapV2Config>,
    /// EAP-TTLS settings, when the method is enabled
    pub ttls: Option<EapTtlsConfig>,
}

impl EapSessionConfig {
    /// Start building a configuration
    pub fn builder() -> EapSessionConfigBuilder {
        EapSessionConfigBuilder {
            config: EapSessionConfig::default(),
        }
    }

    /// Whether any settings exist for the given method type
    pub fn supports(&self, method: EapMethodType) -> bool {
        match method {
            EapMethodType::Sim => self.sim.is_some(),
            EapMethodType::Aka => self.aka.is_some(),
            EapMethodType::AkaPrime => self.aka_prime.is_some(),
            EapMethodType::MsChapV2 => self.mschapv2.is_some(),
            EapMethodType::Ttls => self.ttls.is_some(),
        }
    }
}

/// Builder enforcing the configuration invariants
#[derive(Debug, Clone)]
pub struct EapSessionConfigBuilder {
    config: EapSessionConfig,
}

impl EapSessionConfigBuilder {
    /// Identity for the outer Identity exchange
    pub fn identity(mut self, identity: Vec<u8>) -> Self {
        self.config.identity = identity;
        self
    }

    /// Enable EAP-SIM
    pub fn sim(mut self, sub_id: i32, app_type: AppType) -> Self {
        self.config.sim = Some(EapSimConfig { sub_id, app_type });
        self
    }

    /// Enable EAP-AKA
    pub fn aka(mut self, sub_id: i32, app_type: AppType) -> Self {
        self.config.aka = Some(EapAkaConfig { sub_id, app_type });
        self
    }

    /// Enable EAP-AKA'
    pub fn aka_prime(
        mut self,
        sub_id: i32,
        app_type: AppType,
        network_name: String,
        allow_mismatched_network_names: bool,
    ) -> Self {
        self.config.aka_prime = Some(EapAkaPrimeConfig {
            sub_id,
            app_type,
            network_name,
            allow_mismatched_network_names,
        });
        self
    }

    /// Enable EAP-MSCHAPv2
    pub fn mschapv2(mut self, username: String, password: String) -> Self {
        self.config.mschapv2 = Some(EapMsChapV2Config { username, password });
        self
    }

    /// Enable EAP-TTLS with the given inner session configuration
    ///
    /// Fails when the inner configuration itself enables EAP-TTLS;
    /// recursive tunnels are rejected at construction.
    pub fn ttls(
        mut self,
        trusted_ca: Option<Vec<u8>>,
        inner: EapSessionConfig,
    ) -> Result<Self, ConfigError> {
        if inner.ttls.is_some() {
            return Err(ConfigError::NestedTtls);
        }
        self.config.ttls = Some(EapTtlsConfig {
            trusted_ca,
            inner: Box::new(inner),
        });
        Ok(self)
    }

    /// Finish the configuration
    pub fn build(self) -> Result<EapSessionConfig, ConfigError> {
        let c = &self.config;
        if c.sim.is_none()
            && c.aka.is_none()
            && c.aka_prime.is_none()
            && c.mschapv2.is_none()
            && c.ttls.is_none()
        {
            return Err(ConfigError::NoMethods);
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn nested_ttls_is_rejected() {
        let inner_most = EapSessionConfig::builder()
            .mschapv2("user".into(), "pass".into())
            .build()
            .unwrap();
        let inner = EapSessionConfig::builder()
            .ttls(None, inner_most.clone())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            EapSessionConfig::builder().ttls(None, inner).err(),
            Some(ConfigError::NestedTtls)
        );
        // a single level stays legal
        assert!(EapSessionConfig::builder()
            .ttls(None, inner_most)
            .unwrap()
            .build()
            .is_ok());
    }

    #[test]
    fn empty_config_is_rejected() {
        assert_eq!(
            EapSessionConfig::builder().build().err(),
            Some(ConfigError::NoMethods)
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn config_round_trips_through_serde() {
        let config = EapSessionConfig::builder()
            .identity(b"0user@realm".to_vec())
            .aka_prime(1, AppType::Usim, "wlan.mnc015.mcc234".into(), false)
            .build()
            .unwrap();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: EapSessionConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, config);
    }
}
