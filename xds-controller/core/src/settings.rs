use anyhow::{bail, Result};
use envoy_types::pb::envoy::config::cluster::v3::cluster::DnsLookupFamily as EnvoyDnsLookupFamily;
use std::{path::PathBuf, str::FromStr};

/// Process-wide settings that influence translation.
#[derive(Clone, Debug)]
pub struct TranslatorSettings {
    /// The address Envoy listeners bind to.
    pub bind_address: String,

    /// DNS lookup family applied to DNS-discovered clusters.
    pub dns_lookup_family: DnsLookupFamily,

    /// When set, routes are additionally validated by running this Envoy binary in
    /// validation mode.
    pub envoy_validation_binary: Option<PathBuf>,
}

/// The DNS lookup family for STRICT_DNS and LOGICAL_DNS clusters. Defaults to `V4Preferred`
/// rather than Envoy's own `AUTO`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DnsLookupFamily {
    Auto,
    V4Only,
    V6Only,
    #[default]
    V4Preferred,
    All,
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            bind_address: "::".to_string(),
            dns_lookup_family: DnsLookupFamily::default(),
            envoy_validation_binary: None,
        }
    }
}

impl DnsLookupFamily {
    pub fn to_envoy(self) -> EnvoyDnsLookupFamily {
        match self {
            Self::Auto => EnvoyDnsLookupFamily::Auto,
            Self::V4Only => EnvoyDnsLookupFamily::V4Only,
            Self::V6Only => EnvoyDnsLookupFamily::V6Only,
            Self::V4Preferred => EnvoyDnsLookupFamily::V4Preferred,
            Self::All => EnvoyDnsLookupFamily::All,
        }
    }
}

impl FromStr for DnsLookupFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "V4_ONLY" => Ok(Self::V4Only),
            "V6_ONLY" => Ok(Self::V6Only),
            "V4_PREFERRED" => Ok(Self::V4Preferred),
            "ALL" => Ok(Self::All),
            _ => bail!("invalid DNS lookup family: {s}"),
        }
    }
}
