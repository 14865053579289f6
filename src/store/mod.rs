/// Record Storage System
///
/// Content-addressed agent records and the referrers attached to them
/// (public keys, domain verifications). Referrers never mutate the record.

pub mod sqlite;

pub use sqlite::SqliteRecordStore;

use crate::error::DirResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::ControlFlow;

/// Referrer type carrying a record's signing public key
pub const PUBLIC_KEY_REFERRER_TYPE: &str = "dir.sign.v1.PublicKey";

/// Referrer type carrying a successful domain verification
pub const DOMAIN_VERIFICATION_REFERRER_TYPE: &str = "dir.naming.v1.DomainVerification";

/// Stored agent record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub cid: String,
    /// Declared name, empty when the record has none
    pub name: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Build a record from its JSON body, deriving the CID and name
    pub fn from_data(data: serde_json::Value) -> DirResult<Self> {
        let bytes = serde_json::to_vec(&data)?;
        let name = data
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(Self {
            cid: calculate_cid(&bytes),
            name,
            data,
            created_at: Utc::now(),
        })
    }
}

/// Content-addressed side object attached to a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referrer {
    pub cid: String,
    pub referrer_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Referrer {
    /// Create a referrer; the CID covers both type and payload
    pub fn new(referrer_type: &str, data: serde_json::Value) -> DirResult<Self> {
        let mut bytes = referrer_type.as_bytes().to_vec();
        bytes.push(b'\n');
        bytes.extend(serde_json::to_vec(&data)?);

        Ok(Self {
            cid: calculate_cid(&bytes),
            referrer_type: referrer_type.to_string(),
            data,
            created_at: Utc::now(),
        })
    }
}

/// Calculate the content address for a byte string
pub fn calculate_cid(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("bafyrei{}", hex::encode(hash))
}

/// Visitor callback for referrer walks; `Break` stops the walk
pub type ReferrerVisitor<'a> = dyn FnMut(Referrer) -> ControlFlow<()> + Send + 'a;

/// Record storage backend
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a record and return it with its CID
    async fn push(&self, data: serde_json::Value) -> DirResult<Record>;

    /// Retrieve a record by CID
    async fn pull(&self, cid: &str) -> DirResult<Option<Record>>;

    /// Referrer support, if the backend has it
    fn referrers(&self) -> Option<&dyn ReferrerStore> {
        None
    }
}

/// Referrer operations on top of a record store
#[async_trait]
pub trait ReferrerStore: Send + Sync {
    /// Attach a referrer. Pushing identical content twice is a no-op.
    async fn push_referrer(&self, record_cid: &str, referrer: &Referrer) -> DirResult<()>;

    /// Attach a referrer, removing every other referrer of the same type
    async fn replace_referrer(&self, record_cid: &str, referrer: &Referrer) -> DirResult<()>;

    /// Visit referrers in insertion order, optionally filtered by type,
    /// until the visitor breaks or the referrers run out
    async fn walk_referrers(
        &self,
        record_cid: &str,
        referrer_type: Option<&str>,
        visit: &mut ReferrerVisitor<'_>,
    ) -> DirResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_cid_is_content_address() {
        let a = Record::from_data(json!({"name": "dns://cisco.com/agent", "version": "1"})).unwrap();
        let b = Record::from_data(json!({"name": "dns://cisco.com/agent", "version": "1"})).unwrap();
        let c = Record::from_data(json!({"name": "dns://cisco.com/agent", "version": "2"})).unwrap();

        assert_eq!(a.cid, b.cid);
        assert_ne!(a.cid, c.cid);
        assert!(a.cid.starts_with("bafyrei"));
        assert_eq!(a.name, "dns://cisco.com/agent");
    }

    #[test]
    fn test_record_without_name() {
        let record = Record::from_data(json!({"description": "nameless"})).unwrap();
        assert!(record.name.is_empty());
    }

    #[test]
    fn test_referrer_cid_includes_type() {
        let data = json!({"publicKey": "SGVsbG8="});
        let a = Referrer::new(PUBLIC_KEY_REFERRER_TYPE, data.clone()).unwrap();
        let b = Referrer::new(DOMAIN_VERIFICATION_REFERRER_TYPE, data).unwrap();
        assert_ne!(a.cid, b.cid);
    }
}
