/// SQLite-backed record and referrer store
use crate::{
    db::{format_timestamp, parse_timestamp},
    error::{DirError, DirResult},
    store::{Record, RecordStore, Referrer, ReferrerStore, ReferrerVisitor},
};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Record store keeping records and referrers in one SQLite database
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: SqlitePool,
}

impl SqliteRecordStore {
    /// Create a new store on an existing pool
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn ensure_record(&self, record_cid: &str) -> DirResult<()> {
        let exists = sqlx::query("SELECT 1 FROM record WHERE cid = ?1")
            .bind(record_cid)
            .fetch_optional(&self.db)
            .await?;

        if exists.is_none() {
            return Err(DirError::NotFound(format!("Record not found: {}", record_cid)));
        }
        Ok(())
    }

    /// Count referrers of a type attached to a record
    pub async fn count_referrers(&self, record_cid: &str, referrer_type: &str) -> DirResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM referrer WHERE record_cid = ?1 AND referrer_type = ?2",
        )
        .bind(record_cid)
        .bind(referrer_type)
        .fetch_one(&self.db)
        .await?;

        Ok(row.try_get("n")?)
    }
}

fn row_to_record(row: &SqliteRow) -> DirResult<Record> {
    let data: String = row.try_get("data")?;
    Ok(Record {
        cid: row.try_get("cid")?,
        name: row.try_get("name")?,
        data: serde_json::from_str(&data)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_referrer(row: &SqliteRow) -> DirResult<Referrer> {
    let data: String = row.try_get("data")?;
    Ok(Referrer {
        cid: row.try_get("cid")?,
        referrer_type: row.try_get("referrer_type")?,
        data: serde_json::from_str(&data)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn push(&self, data: serde_json::Value) -> DirResult<Record> {
        let record = Record::from_data(data)?;

        sqlx::query(
            r#"
            INSERT INTO record (cid, name, data, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(cid) DO NOTHING
            "#,
        )
        .bind(&record.cid)
        .bind(&record.name)
        .bind(serde_json::to_string(&record.data)?)
        .bind(format_timestamp(record.created_at))
        .execute(&self.db)
        .await?;

        tracing::debug!(cid = %record.cid, name = %record.name, "Stored record");

        // Return the stored copy so created_at is stable across re-pushes
        self.pull(&record.cid)
            .await?
            .ok_or_else(|| DirError::Internal(format!("Record vanished after push: {}", record.cid)))
    }

    async fn pull(&self, cid: &str) -> DirResult<Option<Record>> {
        let row = sqlx::query("SELECT cid, name, data, created_at FROM record WHERE cid = ?1")
            .bind(cid)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    fn referrers(&self) -> Option<&dyn ReferrerStore> {
        Some(self)
    }
}

#[async_trait]
impl ReferrerStore for SqliteRecordStore {
    async fn push_referrer(&self, record_cid: &str, referrer: &Referrer) -> DirResult<()> {
        self.ensure_record(record_cid).await?;

        sqlx::query(
            r#"
            INSERT INTO referrer (cid, record_cid, referrer_type, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(record_cid, cid) DO NOTHING
            "#,
        )
        .bind(&referrer.cid)
        .bind(record_cid)
        .bind(&referrer.referrer_type)
        .bind(serde_json::to_string(&referrer.data)?)
        .bind(format_timestamp(referrer.created_at))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn replace_referrer(&self, record_cid: &str, referrer: &Referrer) -> DirResult<()> {
        self.ensure_record(record_cid).await?;

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM referrer WHERE record_cid = ?1 AND referrer_type = ?2 AND cid != ?3")
            .bind(record_cid)
            .bind(&referrer.referrer_type)
            .bind(&referrer.cid)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO referrer (cid, record_cid, referrer_type, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(record_cid, cid) DO NOTHING
            "#,
        )
        .bind(&referrer.cid)
        .bind(record_cid)
        .bind(&referrer.referrer_type)
        .bind(serde_json::to_string(&referrer.data)?)
        .bind(format_timestamp(referrer.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn walk_referrers(
        &self,
        record_cid: &str,
        referrer_type: Option<&str>,
        visit: &mut ReferrerVisitor<'_>,
    ) -> DirResult<()> {
        let mut rows = sqlx::query(
            r#"
            SELECT cid, referrer_type, data, created_at
            FROM referrer
            WHERE record_cid = ?1 AND (?2 IS NULL OR referrer_type = ?2)
            ORDER BY id ASC
            "#,
        )
        .bind(record_cid)
        .bind(referrer_type)
        .fetch(&self.db);

        while let Some(row) = rows.try_next().await? {
            let referrer = match row_to_referrer(&row) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(record_cid, "Skipping unreadable referrer: {}", e);
                    continue;
                }
            };

            if visit(referrer).is_break() {
                break;
            }
        }

        Ok(())
    }
}
