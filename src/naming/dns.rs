/// DNS key source
///
/// Domains publish keys as TXT records at `_oasf.<domain>`:
/// `v=oasf1; k=ed25519; p=<base64>`
use crate::naming::{
    split_host_port, KeyLookupError, KeyType, PublicKey, DNS_TXT_LABEL, DNS_TXT_VERSION,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hickory_resolver::TokioResolver;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// TXT record lookup seam
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// Return every TXT value at `name`; no records is an empty list, not an error
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, KeyLookupError>;
}

/// TXT resolver backed by the system DNS configuration
#[derive(Clone)]
pub struct HickoryTxtResolver {
    resolver: TokioResolver,
}

impl HickoryTxtResolver {
    /// Build from the system resolver configuration (`/etc/resolv.conf`)
    pub fn from_system_conf() -> Result<Self, KeyLookupError> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| KeyLookupError::Resolver {
                name: "system configuration".to_string(),
                reason: e.to_string(),
            })?
            .build();

        Ok(Self { resolver })
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, KeyLookupError> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    // A TXT value may be split into several character-strings
                    txt.txt_data()
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk))
                        .collect::<String>()
                })
                .collect()),
            Err(e) if e.is_no_records_found() => Ok(Vec::new()),
            Err(e) => Err(KeyLookupError::Resolver {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// In-memory TXT table for offline use and tests
#[derive(Default)]
pub struct StaticTxtResolver {
    records: RwLock<HashMap<String, Vec<String>>>,
    unreachable: RwLock<HashSet<String>>,
}

impl StaticTxtResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the TXT values published at `name`
    pub async fn set_records(&self, name: &str, values: Vec<String>) {
        self.records.write().await.insert(name.to_lowercase(), values);
    }

    /// Make lookups of `name` fail as if the resolver could not be reached
    pub async fn set_unreachable(&self, name: &str, unreachable: bool) {
        let mut set = self.unreachable.write().await;
        if unreachable {
            set.insert(name.to_lowercase());
        } else {
            set.remove(&name.to_lowercase());
        }
    }
}

#[async_trait]
impl TxtResolver for StaticTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, KeyLookupError> {
        let name = name.to_lowercase();
        if self.unreachable.read().await.contains(&name) {
            return Err(KeyLookupError::Resolver {
                name,
                reason: "server unreachable".to_string(),
            });
        }

        Ok(self.records.read().await.get(&name).cloned().unwrap_or_default())
    }
}

/// DNS key source
#[derive(Clone)]
pub struct DnsKeySource {
    resolver: Arc<dyn TxtResolver>,
}

impl DnsKeySource {
    pub fn new(resolver: Arc<dyn TxtResolver>) -> Self {
        Self { resolver }
    }

    /// Look up the keys a domain publishes in DNS
    ///
    /// Malformed TXT values are skipped. An error is returned only when
    /// values were published and none of them parsed.
    pub async fn lookup_keys(&self, domain: &str) -> Result<Vec<PublicKey>, KeyLookupError> {
        if let (_, Some(_)) = split_host_port(domain) {
            return Err(KeyLookupError::InvalidDomain(format!(
                "{} (ports are not valid in DNS names)",
                domain
            )));
        }

        let name = format!("{}.{}", DNS_TXT_LABEL, domain);
        let values = self.resolver.lookup_txt(&name).await?;

        let mut keys = Vec::new();
        let mut rejected = Vec::new();

        for value in &values {
            match parse_txt_record(value) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    tracing::debug!(%name, "Ignoring TXT value: {}", e);
                    rejected.push(e.to_string());
                }
            }
        }

        if keys.is_empty() && !rejected.is_empty() {
            return Err(KeyLookupError::NoValidKeys(rejected));
        }

        Ok(keys)
    }
}

/// Parse one `v=oasf1; k=<type>; p=<base64>` TXT value
pub fn parse_txt_record(value: &str) -> Result<PublicKey, KeyLookupError> {
    let mut version = None;
    let mut key_type = None;
    let mut public_key = None;

    for segment in value.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        // Split on the first '=' only; base64 padding contains more
        let (attr, val) = segment.split_once('=').ok_or_else(|| {
            KeyLookupError::MalformedEntry(format!("attribute without value: {:?}", segment))
        })?;

        match attr.trim() {
            "v" => version = Some(val.trim()),
            "k" => key_type = Some(val.trim()),
            "p" => public_key = Some(val.trim()),
            _ => {}
        }
    }

    match version {
        Some(DNS_TXT_VERSION) => {}
        Some(other) => {
            return Err(KeyLookupError::MalformedEntry(format!(
                "unsupported version {:?}",
                other
            )))
        }
        None => return Err(KeyLookupError::MalformedEntry("missing v=".to_string())),
    }

    let key_type: KeyType = key_type
        .ok_or_else(|| KeyLookupError::MalformedEntry("missing k=".to_string()))?
        .parse()?;

    let key_base64 = public_key
        .ok_or_else(|| KeyLookupError::MalformedEntry("missing p=".to_string()))?;
    let key = STANDARD
        .decode(key_base64)
        .map_err(|e| KeyLookupError::MalformedEntry(format!("invalid base64 key: {}", e)))?;
    if key.is_empty() {
        return Err(KeyLookupError::MalformedEntry("empty public key".to_string()));
    }

    Ok(PublicKey {
        id: None,
        key_type,
        key,
        key_base64: key_base64.to_string(),
    })
}
