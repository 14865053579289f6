/// Domain verifier
///
/// `Start -> NameParsed -> KeysLookedUp -> (Verified | Failed)`.
/// Pure orchestration over the two key sources: no persistence, safe to
/// call concurrently.
use crate::{
    config::VerificationConfig,
    metrics,
    naming::{
        dns::{DnsKeySource, HickoryTxtResolver},
        match_key, parse_name,
        well_known::{WellKnownConfig, WellKnownKeySource},
        KeyLookupError, Protocol, PublicKey,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const ERR_UNPARSEABLE_NAME: &str = "could not parse record name";
pub const ERR_NO_PROTOCOL: &str = "no verification protocol specified in name";
pub const ERR_NO_KEYS: &str = "no OASF keys found for domain";
pub const ERR_KEY_MISMATCH: &str = "signing key does not match any domain key";

/// Outcome of one verification attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    pub domain: String,
    pub method: Protocol,
    pub verified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub matched_key_id: String,
}

impl VerificationResult {
    pub fn failed(domain: &str, error: impl Into<String>) -> Self {
        Self {
            verified: false,
            domain: domain.to_string(),
            method: Protocol::None,
            verified_at: Utc::now(),
            error: error.into(),
            matched_key_id: String::new(),
        }
    }

    fn succeeded(domain: &str, method: Protocol, key: &PublicKey) -> Self {
        Self {
            verified: true,
            domain: domain.to_string(),
            method,
            verified_at: Utc::now(),
            error: String::new(),
            matched_key_id: key.id.clone().unwrap_or_default(),
        }
    }
}

/// Key source selected by a name's protocol
enum KeySource<'a> {
    Dns(&'a DnsKeySource),
    WellKnown(&'a WellKnownKeySource),
}

impl KeySource<'_> {
    fn method(&self) -> Protocol {
        match self {
            KeySource::Dns(_) => Protocol::Dns,
            KeySource::WellKnown(_) => Protocol::WellKnown,
        }
    }

    async fn lookup(&self, domain: &str) -> Result<Vec<PublicKey>, KeyLookupError> {
        match self {
            KeySource::Dns(source) => source.lookup_keys(domain).await,
            KeySource::WellKnown(source) => source.fetch_keys(domain).await,
        }
    }
}

/// Verifies record names against domain-published keys
#[derive(Clone)]
pub struct Verifier {
    dns: DnsKeySource,
    well_known: WellKnownKeySource,
    timeout: Duration,
}

impl Verifier {
    pub fn new(dns: DnsKeySource, well_known: WellKnownKeySource, timeout: Duration) -> Self {
        Self {
            dns,
            well_known,
            timeout,
        }
    }

    /// Build a verifier using system DNS and HTTPS
    pub fn from_config(config: &VerificationConfig) -> Result<Self, KeyLookupError> {
        let dns = DnsKeySource::new(Arc::new(HickoryTxtResolver::from_system_conf()?));
        let well_known = WellKnownKeySource::new(WellKnownConfig {
            timeout: config.network_timeout,
            allow_insecure: config.allow_insecure_well_known,
            ..Default::default()
        })?;

        Ok(Self::new(dns, well_known, config.network_timeout))
    }

    fn key_source(&self, protocol: Protocol) -> Option<KeySource<'_>> {
        match protocol {
            Protocol::Dns => Some(KeySource::Dns(&self.dns)),
            Protocol::WellKnown => Some(KeySource::WellKnown(&self.well_known)),
            Protocol::None => None,
        }
    }

    /// Verify that `signing_key` is published by the domain `name` refers to
    pub async fn verify(&self, name: &str, signing_key: &[u8]) -> VerificationResult {
        let Some(parsed) = parse_name(name) else {
            return VerificationResult::failed("", ERR_UNPARSEABLE_NAME);
        };

        // No fallback between protocols: the prefix alone decides
        let Some(source) = self.key_source(parsed.protocol) else {
            return VerificationResult::failed(&parsed.domain, ERR_NO_PROTOCOL);
        };

        let method = source.method();
        let started = Instant::now();
        let lookup = tokio::time::timeout(self.timeout, source.lookup(&parsed.domain)).await;
        metrics::observe_key_lookup(method.as_str(), started.elapsed().as_secs_f64());

        let keys = match lookup {
            Ok(Ok(keys)) => keys,
            Ok(Err(e)) => {
                tracing::debug!(domain = %parsed.domain, %method, "Key lookup failed: {}", e);
                return VerificationResult::failed(&parsed.domain, e.to_string());
            }
            Err(_) => {
                let e = KeyLookupError::Timeout {
                    domain: parsed.domain.clone(),
                    secs: self.timeout.as_secs(),
                };
                tracing::debug!(domain = %parsed.domain, %method, "{}", e);
                return VerificationResult::failed(&parsed.domain, e.to_string());
            }
        };

        if keys.is_empty() {
            return VerificationResult::failed(&parsed.domain, ERR_NO_KEYS);
        }

        match match_key(signing_key, &keys) {
            Some(key) => VerificationResult::succeeded(&parsed.domain, method, key),
            None => VerificationResult::failed(&parsed.domain, ERR_KEY_MISMATCH),
        }
    }
}
