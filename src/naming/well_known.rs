/// Well-known key source
///
/// Fetches `https://<domain>/.well-known/oasf.json`:
/// `{"version": 1, "keys": [{"id": "...", "type": "ed25519", "publicKey": "<base64>"}]}`
use crate::naming::{
    split_host_port, KeyLookupError, KeyType, PublicKey, WELL_KNOWN_PATH, WELL_KNOWN_VERSION,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Upper bound on the key document size
const MAX_DOCUMENT_BYTES: usize = 64 * 1024;

/// Well-known key document
#[derive(Debug, Deserialize)]
struct WellKnownDocument {
    version: u32,
    #[serde(default)]
    keys: Vec<serde_json::Value>,
}

/// One entry of the `keys` array
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WellKnownKey {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    key_type: String,
    public_key: String,
}

/// Well-known key source configuration
#[derive(Debug, Clone)]
pub struct WellKnownConfig {
    /// User-Agent header for HTTP requests
    pub user_agent: String,
    pub timeout: Duration,
    /// Use plain HTTP. Only for tests against local servers.
    pub allow_insecure: bool,
}

impl Default for WellKnownConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("agent-dir/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            allow_insecure: false,
        }
    }
}

/// HTTPS well-known key source
#[derive(Clone)]
pub struct WellKnownKeySource {
    http_client: reqwest::Client,
    config: WellKnownConfig,
}

impl WellKnownKeySource {
    /// Create a new well-known key source
    pub fn new(config: WellKnownConfig) -> Result<Self, KeyLookupError> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .https_only(!config.allow_insecure)
            .build()
            .map_err(|e| KeyLookupError::Fetch {
                url: WELL_KNOWN_PATH.to_string(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        if config.allow_insecure {
            tracing::warn!("Well-known key source allows plain HTTP; never enable this in production");
        }

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Key document URL for a domain
    ///
    /// The parsed URL must point at exactly `domain`: no userinfo, and a
    /// port only when plain HTTP is allowed.
    pub fn document_url(&self, domain: &str) -> Result<Url, KeyLookupError> {
        let scheme = if self.config.allow_insecure { "http" } else { "https" };
        let (host, port) = split_host_port(domain);

        if port.is_some() && !self.config.allow_insecure {
            return Err(KeyLookupError::InvalidDomain(format!(
                "{} (ports are only allowed for insecure test fetches)",
                domain
            )));
        }

        let url = Url::parse(&format!("{}://{}{}", scheme, domain, WELL_KNOWN_PATH))
            .map_err(|e| KeyLookupError::InvalidDomain(format!("{}: {}", domain, e)))?;

        let same_host = url
            .host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case(host));
        // Url drops a port equal to the scheme default
        let same_port = match port {
            Some(p) => p.parse::<u16>().ok() == url.port_or_known_default(),
            None => url.port().is_none(),
        };
        if !same_host
            || !same_port
            || !url.username().is_empty()
            || url.password().is_some()
            || url.path() != WELL_KNOWN_PATH
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(KeyLookupError::InvalidDomain(domain.to_string()));
        }

        Ok(url)
    }

    /// Fetch the keys a domain publishes at its well-known path
    ///
    /// Entries with an unsupported type or undecodable key are skipped.
    /// An error is returned only when entries were published and none of
    /// them were usable.
    pub async fn fetch_keys(&self, domain: &str) -> Result<Vec<PublicKey>, KeyLookupError> {
        let url = self.document_url(domain)?;
        if !self.config.allow_insecure && url.scheme() != "https" {
            return Err(KeyLookupError::InsecureScheme(url.to_string()));
        }

        let mut response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| KeyLookupError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(KeyLookupError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_DOCUMENT_BYTES as u64)
        {
            return Err(document_too_large());
        }

        // Content-Length may be absent, so the cap is enforced while streaming
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| KeyLookupError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })? {
            if body.len() + chunk.len() > MAX_DOCUMENT_BYTES {
                return Err(document_too_large());
            }
            body.extend_from_slice(&chunk);
        }

        parse_document(&body)
    }
}

fn document_too_large() -> KeyLookupError {
    KeyLookupError::InvalidDocument(format!(
        "document larger than {} bytes",
        MAX_DOCUMENT_BYTES
    ))
}

/// Parse a well-known key document body
pub fn parse_document(body: &[u8]) -> Result<Vec<PublicKey>, KeyLookupError> {
    let document: WellKnownDocument = serde_json::from_slice(body)
        .map_err(|e| KeyLookupError::InvalidDocument(e.to_string()))?;

    if document.version != WELL_KNOWN_VERSION {
        return Err(KeyLookupError::UnsupportedVersion(document.version));
    }

    let mut keys = Vec::new();
    let mut rejected = Vec::new();

    for (index, entry) in document.keys.into_iter().enumerate() {
        match parse_key_entry(entry) {
            Ok(key) => keys.push(key),
            Err(e) => {
                tracing::debug!(index, "Ignoring well-known key entry: {}", e);
                rejected.push(format!("keys[{}]: {}", index, e));
            }
        }
    }

    if keys.is_empty() && !rejected.is_empty() {
        return Err(KeyLookupError::NoValidKeys(rejected));
    }

    Ok(keys)
}

fn parse_key_entry(entry: serde_json::Value) -> Result<PublicKey, KeyLookupError> {
    let entry: WellKnownKey = serde_json::from_value(entry)
        .map_err(|e| KeyLookupError::MalformedEntry(e.to_string()))?;

    let key_type: KeyType = entry.key_type.parse()?;
    let key = STANDARD
        .decode(entry.public_key.trim())
        .map_err(|e| KeyLookupError::MalformedEntry(format!("invalid base64 key: {}", e)))?;
    if key.is_empty() {
        return Err(KeyLookupError::MalformedEntry("empty public key".to_string()));
    }

    Ok(PublicKey {
        id: entry.id.filter(|id| !id.is_empty()),
        key_type,
        key,
        key_base64: entry.public_key.trim().to_string(),
    })
}
