/// Referrer encoding for domain verifications and signing public keys
use crate::{
    error::{DirError, DirResult},
    naming::{Protocol, VerificationResult},
    store::{Referrer, DOMAIN_VERIFICATION_REFERRER_TYPE, PUBLIC_KEY_REFERRER_TYPE},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{pkcs8::DecodePublicKey, VerifyingKey};
use rustls_pki_types::{pem::PemObject, SubjectPublicKeyInfoDer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};

/// id-Ed25519 (RFC 8410)
const ED25519_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Durable form of a successful verification, attached to the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainVerification {
    pub domain: String,
    pub method: Protocol,
    #[serde(default)]
    pub key_id: String,
    pub verified_at: DateTime<Utc>,
}

impl DomainVerification {
    /// Only verified results have a durable form
    pub fn from_result(result: &VerificationResult) -> Option<Self> {
        result.verified.then(|| Self {
            domain: result.domain.clone(),
            method: result.method,
            key_id: result.matched_key_id.clone(),
            verified_at: result.verified_at,
        })
    }
}

/// Encode a domain verification as a referrer
pub fn encode_domain_verification(verification: &DomainVerification) -> DirResult<Referrer> {
    Referrer::new(
        DOMAIN_VERIFICATION_REFERRER_TYPE,
        serde_json::to_value(verification)?,
    )
}

/// Decode a domain verification referrer
pub fn decode_domain_verification(referrer: &Referrer) -> DirResult<DomainVerification> {
    if referrer.referrer_type != DOMAIN_VERIFICATION_REFERRER_TYPE {
        return Err(DirError::Validation(format!(
            "Referrer {} is a {}, not a domain verification",
            referrer.cid, referrer.referrer_type
        )));
    }

    Ok(serde_json::from_value(referrer.data.clone())?)
}

/// Build a public key referrer from PEM or base64 text
pub fn encode_public_key(public_key: &str) -> DirResult<Referrer> {
    let public_key = public_key.trim();
    if decode_public_key_text(public_key).is_none() {
        return Err(DirError::Validation(
            "Public key must be PEM or standard base64".to_string(),
        ));
    }

    Referrer::new(PUBLIC_KEY_REFERRER_TYPE, json!({ "publicKey": public_key }))
}

/// Extract raw key bytes from a public key referrer
///
/// Returns `None` for referrers that carry no parseable key.
pub fn decode_public_key(referrer: &Referrer) -> Option<Vec<u8>> {
    if referrer.referrer_type != PUBLIC_KEY_REFERRER_TYPE {
        return None;
    }

    referrer
        .data
        .get("publicKey")
        .and_then(|v| v.as_str())
        .and_then(decode_public_key_text)
}

/// PEM first, then raw base64
fn decode_public_key_text(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.starts_with("-----BEGIN ") {
        return decode_pem(text);
    }

    STANDARD.decode(text).ok().filter(|key| !key.is_empty())
}

fn decode_pem(text: &str) -> Option<Vec<u8>> {
    let der = SubjectPublicKeyInfoDer::from_pem_slice(text.as_bytes()).ok()?;
    unwrap_spki(der.as_ref())
}

/// Reduce a SubjectPublicKeyInfo to the raw key DNS and well-known publish
///
/// Ed25519 keys must be valid curve points. Other algorithms, including
/// compressed and uncompressed P-256 points, keep the subject key bits as-is.
fn unwrap_spki(der: &[u8]) -> Option<Vec<u8>> {
    if let Ok(key) = VerifyingKey::from_public_key_der(der) {
        return Some(key.to_bytes().to_vec());
    }

    let info = SubjectPublicKeyInfoRef::try_from(der).ok()?;
    if info.algorithm.oid == ED25519_OID {
        return None;
    }

    info.subject_public_key
        .as_bytes()
        .filter(|key| !key.is_empty())
        .map(<[u8]>::to_vec)
}
