/// Name verification tracking - database layer for reverification scans
use crate::{
    db::{format_timestamp, parse_timestamp},
    error::{DirError, DirResult},
    naming::{Protocol, VerificationResult},
    store::PUBLIC_KEY_REFERRER_TYPE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;

/// Outcome of the most recent verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DirResult<Self> {
        match s {
            "verified" => Ok(VerificationStatus::Verified),
            "failed" => Ok(VerificationStatus::Failed),
            other => Err(DirError::Internal(format!("Unknown verification status: {}", other))),
        }
    }
}

/// Tracking row for one record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameVerification {
    pub record_cid: String,
    pub method: Protocol,
    pub key_id: String,
    pub status: VerificationStatus,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NameVerification {
    /// Build a tracking row from a verification attempt
    pub fn from_result(record_cid: &str, method: Protocol, result: &VerificationResult) -> Self {
        let status = if result.verified {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        };

        Self {
            record_cid: record_cid.to_string(),
            method,
            key_id: result.matched_key_id.clone(),
            status,
            error: result.error.clone(),
            created_at: result.verified_at,
            updated_at: result.verified_at,
        }
    }
}

/// Signed record with a verifiable name whose verification is missing or due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordNeedingVerification {
    pub cid: String,
    pub name: String,
    /// Content address of the record's first public key referrer
    pub public_key_digest: String,
}

/// Name verification tracking store
#[derive(Clone)]
pub struct NameVerificationStore {
    db: SqlitePool,
}

impl NameVerificationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a new tracking row
    pub async fn create(&self, obj: &NameVerification) -> DirResult<()> {
        sqlx::query(
            r#"
            INSERT INTO name_verification
                (record_cid, method, key_id, status, error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&obj.record_cid)
        .bind(obj.method.as_str())
        .bind(&obj.key_id)
        .bind(obj.status.as_str())
        .bind(&obj.error)
        .bind(format_timestamp(obj.created_at))
        .bind(format_timestamp(obj.updated_at))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Overwrite the latest outcome of an existing row
    ///
    /// `updated_at` never moves backwards.
    pub async fn update(&self, obj: &NameVerification) -> DirResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE name_verification SET
                method = ?2,
                key_id = ?3,
                status = ?4,
                error = ?5,
                updated_at = MAX(updated_at, ?6)
            WHERE record_cid = ?1
            "#,
        )
        .bind(&obj.record_cid)
        .bind(obj.method.as_str())
        .bind(&obj.key_id)
        .bind(obj.status.as_str())
        .bind(&obj.error)
        .bind(format_timestamp(obj.updated_at))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DirError::NotFound(format!(
                "No name verification for record {}",
                obj.record_cid
            )));
        }

        Ok(())
    }

    /// Get the tracking row for a record
    pub async fn get_by_cid(&self, record_cid: &str) -> DirResult<Option<NameVerification>> {
        let row = sqlx::query(
            r#"
            SELECT record_cid, method, key_id, status, error, created_at, updated_at
            FROM name_verification
            WHERE record_cid = ?1
            "#,
        )
        .bind(record_cid)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_verification).transpose()
    }

    /// Find signed records with a protocol-prefixed name that were never
    /// verified, whose last attempt failed, or whose verification is older
    /// than `ttl`. Oldest first.
    pub async fn records_needing_verification(
        &self,
        ttl: Duration,
        limit: i64,
    ) -> DirResult<Vec<RecordNeedingVerification>> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DirError::Validation(format!("Invalid verification TTL: {}", e)))?;
        let cutoff = format_timestamp(Utc::now() - ttl);

        let rows = sqlx::query(
            r#"
            SELECT
                r.cid,
                r.name,
                (SELECT k.cid FROM referrer k
                 WHERE k.record_cid = r.cid AND k.referrer_type = ?1
                 ORDER BY k.id ASC LIMIT 1) AS public_key_digest
            FROM record r
            LEFT JOIN name_verification nv ON nv.record_cid = r.cid
            WHERE EXISTS (
                    SELECT 1 FROM referrer k
                    WHERE k.record_cid = r.cid AND k.referrer_type = ?1
                )
              AND (substr(r.name, 1, 6) = 'dns://' OR substr(r.name, 1, 12) = 'wellknown://')
              AND (nv.record_cid IS NULL OR nv.status != 'verified' OR nv.updated_at < ?2)
            ORDER BY COALESCE(nv.updated_at, '') ASC, r.created_at ASC
            LIMIT ?3
            "#,
        )
        .bind(PUBLIC_KEY_REFERRER_TYPE)
        .bind(&cutoff)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> DirResult<RecordNeedingVerification> {
                Ok(RecordNeedingVerification {
                    cid: row.try_get("cid")?,
                    name: row.try_get("name")?,
                    public_key_digest: row
                        .try_get::<Option<String>, _>("public_key_digest")?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn row_to_verification(row: &SqliteRow) -> DirResult<NameVerification> {
    let method: String = row.try_get("method")?;
    Ok(NameVerification {
        record_cid: row.try_get("record_cid")?,
        method: Protocol::parse(&method)
            .ok_or_else(|| DirError::Internal(format!("Unknown verification method: {}", method)))?,
        key_id: row.try_get("key_id")?,
        status: VerificationStatus::parse(&row.try_get::<String, _>("status")?)?,
        error: row.try_get("error")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        store::{RecordStore, ReferrerStore, SqliteRecordStore},
        verification::codec::encode_public_key,
    };
    use serde_json::json;

    async fn setup() -> (SqliteRecordStore, NameVerificationStore) {
        let pool = db::create_memory_pool().await.unwrap();
        (
            SqliteRecordStore::new(pool.clone()),
            NameVerificationStore::new(pool),
        )
    }

    async fn signed_record(store: &SqliteRecordStore, name: &str) -> String {
        let record = store.push(json!({ "name": name })).await.unwrap();
        let key = encode_public_key("SGVsbG8=").unwrap();
        store.push_referrer(&record.cid, &key).await.unwrap();
        record.cid
    }

    fn row(cid: &str, status: VerificationStatus, at: DateTime<Utc>) -> NameVerification {
        NameVerification {
            record_cid: cid.to_string(),
            method: Protocol::Dns,
            key_id: String::new(),
            status,
            error: String::new(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let (store, tracking) = setup().await;
        let cid = signed_record(&store, "dns://cisco.com/agent").await;

        let now = Utc::now();
        tracking.create(&row(&cid, VerificationStatus::Failed, now)).await.unwrap();

        let mut updated = row(&cid, VerificationStatus::Verified, now + chrono::Duration::seconds(5));
        updated.key_id = "k1".to_string();
        tracking.update(&updated).await.unwrap();

        let stored = tracking.get_by_cid(&cid).await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::Verified);
        assert_eq!(stored.key_id, "k1");
        assert!(stored.updated_at > stored.created_at);
    }

    #[tokio::test]
    async fn test_updated_at_is_monotonic() {
        let (store, tracking) = setup().await;
        let cid = signed_record(&store, "dns://cisco.com/agent").await;

        let now = Utc::now();
        tracking.create(&row(&cid, VerificationStatus::Verified, now)).await.unwrap();
        tracking
            .update(&row(&cid, VerificationStatus::Failed, now - chrono::Duration::hours(1)))
            .await
            .unwrap();

        let stored = tracking.get_by_cid(&cid).await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::Failed);
        assert_eq!(format_timestamp(stored.updated_at), format_timestamp(now));
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let (_, tracking) = setup().await;
        let err = tracking
            .update(&row("bafyreimissing", VerificationStatus::Failed, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, DirError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_records_needing_verification() {
        let (store, tracking) = setup().await;
        let ttl = Duration::from_secs(3600);

        let never = signed_record(&store, "dns://never.com/a").await;
        let fresh = signed_record(&store, "dns://fresh.com/a").await;
        let stale = signed_record(&store, "wellknown://stale.com/a").await;
        let failed = signed_record(&store, "dns://failed.com/a").await;
        let _bare = signed_record(&store, "bare.com/a").await;
        let unsigned = store.push(json!({"name": "dns://unsigned.com/a"})).await.unwrap();

        let now = Utc::now();
        tracking.create(&row(&fresh, VerificationStatus::Verified, now)).await.unwrap();
        tracking
            .create(&row(&stale, VerificationStatus::Verified, now - chrono::Duration::hours(2)))
            .await
            .unwrap();
        tracking.create(&row(&failed, VerificationStatus::Failed, now)).await.unwrap();

        let due = tracking.records_needing_verification(ttl, 100).await.unwrap();
        let cids: Vec<&str> = due.iter().map(|r| r.cid.as_str()).collect();

        assert_eq!(due.len(), 3);
        assert!(cids.contains(&never.as_str()));
        assert!(cids.contains(&stale.as_str()));
        assert!(cids.contains(&failed.as_str()));
        assert!(!cids.contains(&fresh.as_str()));
        assert!(!cids.contains(&unsigned.cid.as_str()));
        assert!(due.iter().all(|r| r.public_key_digest.starts_with("bafyrei")));

        let limited = tracking.records_needing_verification(ttl, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
