/// Domain Verification Controller
///
/// Request-facing orchestration around the verifier: idempotent
/// verification, referrer persistence, tracking rows for reverification,
/// and signing key retrieval for a record.

pub mod codec;
pub mod tracking;

pub use codec::DomainVerification;
pub use tracking::{
    NameVerification, NameVerificationStore, RecordNeedingVerification, VerificationStatus,
};

use crate::{
    error::{DirError, DirResult},
    metrics,
    naming::{parse_name, Protocol, VerificationResult, Verifier},
    store::{
        RecordStore, Referrer, ReferrerStore, DOMAIN_VERIFICATION_REFERRER_TYPE,
        PUBLIC_KEY_REFERRER_TYPE,
    },
};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;

pub const ERR_NO_VERIFICATION: &str = "no domain verification found";
pub const ERR_NO_NAME: &str = "record has no name";
pub const ERR_NO_PUBLIC_KEY: &str = "no public key attached to record";

/// Response for VerifyDomain and CheckDomainVerification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVerificationResponse {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<DomainVerification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DomainVerificationResponse {
    fn verified(verification: DomainVerification) -> Self {
        Self {
            verified: true,
            verification: Some(verification),
            error_message: None,
        }
    }

    fn not_verified(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            verification: None,
            error_message: Some(reason.into()),
        }
    }
}

/// Verification controller
#[derive(Clone)]
pub struct VerificationController {
    store: Arc<dyn RecordStore>,
    tracking: NameVerificationStore,
    verifier: Arc<Verifier>,
}

impl VerificationController {
    pub fn new(
        store: Arc<dyn RecordStore>,
        tracking: NameVerificationStore,
        verifier: Arc<Verifier>,
    ) -> Self {
        Self {
            store,
            tracking,
            verifier,
        }
    }

    fn referrer_store(&self) -> DirResult<&dyn ReferrerStore> {
        self.store.referrers().ok_or_else(|| {
            DirError::Configuration("record store does not support referrers".to_string())
        })
    }

    /// Verify a record's name against its domain
    ///
    /// An existing verification is returned as-is without touching the network.
    pub async fn verify_domain(&self, cid: &str) -> DirResult<DomainVerificationResponse> {
        let existing = self.check_domain_verification(cid).await?;
        if existing.verified {
            tracing::debug!(cid, "Record already verified, skipping");
            return Ok(existing);
        }

        self.run_verification(cid).await
    }

    /// Re-run verification even when a verification exists
    ///
    /// Used by the reverification workers so expired verifications are
    /// actually re-checked.
    pub async fn reverify(&self, cid: &str) -> DirResult<DomainVerificationResponse> {
        self.run_verification(cid).await
    }

    /// Return the record's domain verification, if any. No network I/O.
    pub async fn check_domain_verification(
        &self,
        cid: &str,
    ) -> DirResult<DomainVerificationResponse> {
        let referrers = self.referrer_store()?;

        let mut found = None;
        referrers
            .walk_referrers(
                cid,
                Some(DOMAIN_VERIFICATION_REFERRER_TYPE),
                &mut |referrer: Referrer| match codec::decode_domain_verification(&referrer) {
                    Ok(verification) => {
                        found = Some(verification);
                        ControlFlow::Break(())
                    }
                    Err(e) => {
                        tracing::warn!(cid = %referrer.cid, "Unreadable domain verification: {}", e);
                        ControlFlow::Continue(())
                    }
                },
            )
            .await?;

        Ok(match found {
            Some(verification) => DomainVerificationResponse::verified(verification),
            None => DomainVerificationResponse::not_verified(ERR_NO_VERIFICATION),
        })
    }

    /// List records verified for a domain
    ///
    /// Needs a domain to CID index that does not exist yet.
    pub async fn list_verified_agents(&self, domain: &str) -> DirResult<Vec<DomainVerification>> {
        Err(DirError::NotImplemented(format!(
            "listing verified agents for {} requires a domain index",
            domain
        )))
    }

    /// First parseable signing key attached to the record
    pub async fn signing_public_key(&self, cid: &str) -> DirResult<Option<Vec<u8>>> {
        let referrers = self.referrer_store()?;

        let mut key = None;
        referrers
            .walk_referrers(
                cid,
                Some(PUBLIC_KEY_REFERRER_TYPE),
                &mut |referrer: Referrer| match codec::decode_public_key(&referrer) {
                    Some(bytes) => {
                        key = Some(bytes);
                        ControlFlow::Break(())
                    }
                    None => {
                        tracing::debug!(cid = %referrer.cid, "Skipping unparseable public key");
                        ControlFlow::Continue(())
                    }
                },
            )
            .await?;

        Ok(key)
    }

    async fn run_verification(&self, cid: &str) -> DirResult<DomainVerificationResponse> {
        let referrers = self.referrer_store()?;

        let record = self
            .store
            .pull(cid)
            .await?
            .ok_or_else(|| DirError::NotFound(format!("Record not found: {}", cid)))?;

        let parsed = parse_name(&record.name);
        let method = parsed
            .as_ref()
            .map(|parsed| parsed.protocol)
            .unwrap_or_default();

        if record.name.is_empty() {
            return self.reject_before_lookup(cid, method, "", ERR_NO_NAME).await;
        }

        let Some(signing_key) = self.signing_public_key(cid).await? else {
            let domain = parsed.as_ref().map_or("", |parsed| parsed.domain.as_str());
            return self
                .reject_before_lookup(cid, method, domain, ERR_NO_PUBLIC_KEY)
                .await;
        };

        let result = self.verifier.verify(&record.name, &signing_key).await;
        metrics::record_verification(method.as_str(), result.verified);

        let verification = DomainVerification::from_result(&result);
        if let Some(verification) = &verification {
            let referrer = codec::encode_domain_verification(verification)?;
            referrers.replace_referrer(cid, &referrer).await?;
        }

        self.record_attempt(cid, method, &result).await?;

        match verification {
            Some(verification) => {
                tracing::info!(
                    cid,
                    domain = %verification.domain,
                    method = %verification.method,
                    "Domain verified"
                );
                Ok(DomainVerificationResponse::verified(verification))
            }
            None => {
                tracing::info!(cid, domain = %result.domain, "Domain verification failed: {}", result.error);
                Ok(DomainVerificationResponse::not_verified(result.error))
            }
        }
    }

    /// Track a failure found before any key lookup
    async fn reject_before_lookup(
        &self,
        cid: &str,
        method: Protocol,
        domain: &str,
        error: &str,
    ) -> DirResult<DomainVerificationResponse> {
        let result = VerificationResult::failed(domain, error);
        metrics::record_verification(method.as_str(), false);
        self.record_attempt(cid, method, &result).await?;

        tracing::info!(cid, domain, "Domain verification failed: {}", error);
        Ok(DomainVerificationResponse::not_verified(error))
    }

    /// Persist the outcome in the tracking table
    async fn record_attempt(
        &self,
        cid: &str,
        method: Protocol,
        result: &VerificationResult,
    ) -> DirResult<()> {
        let row = NameVerification::from_result(cid, method, result);

        if self.tracking.get_by_cid(cid).await?.is_some() {
            return self.tracking.update(&row).await;
        }

        match self.tracking.create(&row).await {
            // Lost a race with a concurrent first attempt
            Err(DirError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
                self.tracking.update(&row).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        naming::{
            verifier::{ERR_KEY_MISMATCH, ERR_NO_PROTOCOL},
            DnsKeySource, StaticTxtResolver, WellKnownConfig, WellKnownKeySource,
        },
        store::{Record, SqliteRecordStore},
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        controller: VerificationController,
        store: SqliteRecordStore,
        tracking: NameVerificationStore,
        dns: Arc<StaticTxtResolver>,
    }

    async fn harness() -> Harness {
        let pool = db::create_memory_pool().await.unwrap();
        let store = SqliteRecordStore::new(pool.clone());
        let tracking = NameVerificationStore::new(pool);
        let dns = Arc::new(StaticTxtResolver::new());
        dns.set_records(
            "_oasf.cisco.com",
            vec!["v=oasf1; k=ed25519; p=SGVsbG8=".to_string()],
        )
        .await;

        let verifier = Verifier::new(
            DnsKeySource::new(dns.clone()),
            WellKnownKeySource::new(WellKnownConfig::default()).unwrap(),
            Duration::from_secs(2),
        );
        let controller = VerificationController::new(
            Arc::new(store.clone()),
            tracking.clone(),
            Arc::new(verifier),
        );

        Harness {
            controller,
            store,
            tracking,
            dns,
        }
    }

    async fn signed(store: &SqliteRecordStore, name: &str, key: &str) -> String {
        let record = store.push(json!({ "name": name })).await.unwrap();
        let referrer = codec::encode_public_key(key).unwrap();
        store.push_referrer(&record.cid, &referrer).await.unwrap();
        record.cid
    }

    #[tokio::test]
    async fn test_verify_domain_success() {
        let h = harness().await;
        let cid = signed(&h.store, "dns://cisco.com/marketing-agent", "SGVsbG8=").await;

        let response = h.controller.verify_domain(&cid).await.unwrap();
        assert!(response.verified);
        let verification = response.verification.unwrap();
        assert_eq!(verification.domain, "cisco.com");
        assert_eq!(verification.method, Protocol::Dns);
        assert_eq!(verification.key_id, "");

        let row = h.tracking.get_by_cid(&cid).await.unwrap().unwrap();
        assert_eq!(row.status, VerificationStatus::Verified);
        assert_eq!(row.method, Protocol::Dns);
    }

    #[tokio::test]
    async fn test_verify_domain_mismatch() {
        let h = harness().await;
        let cid = signed(&h.store, "dns://cisco.com/marketing-agent", "V29ybGQ=").await;

        let response = h.controller.verify_domain(&cid).await.unwrap();
        assert!(!response.verified);
        assert_eq!(response.error_message.as_deref(), Some(ERR_KEY_MISMATCH));

        let row = h.tracking.get_by_cid(&cid).await.unwrap().unwrap();
        assert_eq!(row.status, VerificationStatus::Failed);
        assert_eq!(row.error, ERR_KEY_MISMATCH);
        assert_eq!(
            h.store
                .count_referrers(&cid, DOMAIN_VERIFICATION_REFERRER_TYPE)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_verify_domain_is_idempotent() {
        let h = harness().await;
        let cid = signed(&h.store, "dns://cisco.com/marketing-agent", "SGVsbG8=").await;

        let first = h.controller.verify_domain(&cid).await.unwrap();

        // Second call must not reach DNS
        h.dns.set_unreachable("_oasf.cisco.com", true).await;
        let second = h.controller.verify_domain(&cid).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            h.store
                .count_referrers(&cid, DOMAIN_VERIFICATION_REFERRER_TYPE)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_reverify_bypasses_existing_verification() {
        let h = harness().await;
        let cid = signed(&h.store, "dns://cisco.com/marketing-agent", "SGVsbG8=").await;
        h.controller.verify_domain(&cid).await.unwrap();

        h.dns.set_unreachable("_oasf.cisco.com", true).await;
        let response = h.controller.reverify(&cid).await.unwrap();
        assert!(!response.verified);

        // Stale referrer is kept, tracking row shows the failure
        let check = h.controller.check_domain_verification(&cid).await.unwrap();
        assert!(check.verified);
        let row = h.tracking.get_by_cid(&cid).await.unwrap().unwrap();
        assert_eq!(row.status, VerificationStatus::Failed);
        assert!(!row.error.is_empty());
    }

    #[tokio::test]
    async fn test_check_without_verification() {
        let h = harness().await;
        let cid = signed(&h.store, "dns://cisco.com/marketing-agent", "SGVsbG8=").await;

        let response = h.controller.check_domain_verification(&cid).await.unwrap();
        assert!(!response.verified);
        assert_eq!(response.error_message.as_deref(), Some(ERR_NO_VERIFICATION));
    }

    #[tokio::test]
    async fn test_verify_missing_record() {
        let h = harness().await;
        let err = h.controller.verify_domain("bafyreimissing").await.unwrap_err();
        assert!(matches!(err, DirError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_verify_record_without_name_or_key() {
        let h = harness().await;

        let nameless = h.store.push(json!({"description": "x"})).await.unwrap();
        let response = h.controller.verify_domain(&nameless.cid).await.unwrap();
        assert_eq!(response.error_message.as_deref(), Some(ERR_NO_NAME));

        let row = h.tracking.get_by_cid(&nameless.cid).await.unwrap().unwrap();
        assert_eq!(row.status, VerificationStatus::Failed);
        assert_eq!(row.error, ERR_NO_NAME);

        let unsigned = h.store.push(json!({"name": "dns://cisco.com/a"})).await.unwrap();
        let response = h.controller.verify_domain(&unsigned.cid).await.unwrap();
        assert_eq!(response.error_message.as_deref(), Some(ERR_NO_PUBLIC_KEY));

        let row = h.tracking.get_by_cid(&unsigned.cid).await.unwrap().unwrap();
        assert_eq!(row.status, VerificationStatus::Failed);
        assert_eq!(row.method, Protocol::Dns);
        assert_eq!(row.error, ERR_NO_PUBLIC_KEY);
    }

    #[tokio::test]
    async fn test_unprefixed_name_is_rejected() {
        let h = harness().await;
        let cid = signed(&h.store, "cisco.com/marketing-agent", "SGVsbG8=").await;

        let response = h.controller.verify_domain(&cid).await.unwrap();
        assert_eq!(response.error_message.as_deref(), Some(ERR_NO_PROTOCOL));

        let row = h.tracking.get_by_cid(&cid).await.unwrap().unwrap();
        assert_eq!(row.method, Protocol::None);
    }

    #[tokio::test]
    async fn test_signing_key_skips_unparseable_referrers() {
        let h = harness().await;
        let record = h.store.push(json!({"name": "dns://cisco.com/a"})).await.unwrap();

        let broken = Referrer::new(PUBLIC_KEY_REFERRER_TYPE, json!({"publicKey": "%%%"})).unwrap();
        h.store.push_referrer(&record.cid, &broken).await.unwrap();
        let good = codec::encode_public_key("SGVsbG8=").unwrap();
        h.store.push_referrer(&record.cid, &good).await.unwrap();

        let key = h.controller.signing_public_key(&record.cid).await.unwrap();
        assert_eq!(key.as_deref(), Some(&b"Hello"[..]));
    }

    #[tokio::test]
    async fn test_list_verified_agents_not_implemented() {
        let h = harness().await;
        let err = h.controller.list_verified_agents("cisco.com").await.unwrap_err();
        assert!(matches!(err, DirError::NotImplemented(_)));
    }

    struct PlainStore;

    #[async_trait]
    impl RecordStore for PlainStore {
        async fn push(&self, data: serde_json::Value) -> DirResult<Record> {
            Record::from_data(data)
        }

        async fn pull(&self, _cid: &str) -> DirResult<Option<Record>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_store_without_referrers_is_configuration_error() {
        let h = harness().await;
        let controller =
            VerificationController::new(Arc::new(PlainStore), h.tracking.clone(), h.controller.verifier.clone());

        let err = controller.verify_domain("bafyreianything").await.unwrap_err();
        assert!(matches!(err, DirError::Configuration(_)));
    }
}
