/// Reverification task implementations
use crate::{
    config::VerificationConfig,
    error::DirResult,
    verification::{NameVerificationStore, RecordNeedingVerification, VerificationController},
};

/// One record handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub record_cid: String,
    pub name: String,
    pub public_key_digest: String,
}

impl From<RecordNeedingVerification> for WorkItem {
    fn from(record: RecordNeedingVerification) -> Self {
        Self {
            record_cid: record.cid,
            name: record.name,
            public_key_digest: record.public_key_digest,
        }
    }
}

/// Find records whose verification is missing, failed or older than the TTL
pub async fn find_due_records(
    tracking: &NameVerificationStore,
    config: &VerificationConfig,
) -> DirResult<Vec<WorkItem>> {
    let records = tracking
        .records_needing_verification(config.ttl, config.scan_limit)
        .await?;

    Ok(records.into_iter().map(WorkItem::from).collect())
}

/// Re-run verification for one record, ignoring any existing verification
pub async fn reverify_record(
    controller: &VerificationController,
    item: &WorkItem,
) -> DirResult<bool> {
    let response = controller.reverify(&item.record_cid).await?;

    if response.verified {
        tracing::debug!(cid = %item.record_cid, name = %item.name, "Reverification succeeded");
    } else {
        tracing::info!(
            cid = %item.record_cid,
            name = %item.name,
            reason = response.error_message.as_deref().unwrap_or_default(),
            "Reverification failed, will retry next scan"
        );
    }

    Ok(response.verified)
}
