/// SQLite journal backing the operation store
///
/// Every store mutation is written here before it becomes visible in memory,
/// so the arena can be rebuilt on startup by replaying the journal.
use crate::{
    error::{RegistrarError, RegistrarResult},
    operation::SignedOperation,
    store::{OperationStatus, RejectionCause, StoredOperation},
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Journal of operation log entries
#[derive(Clone)]
pub struct OperationJournal {
    db: SqlitePool,
}

impl OperationJournal {
    /// Create a journal over an existing pool and ensure the schema exists
    pub async fn new(db: SqlitePool) -> RegistrarResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operation_log (
                op_hash TEXT PRIMARY KEY NOT NULL,
                did TEXT NOT NULL,
                local_seq INTEGER NOT NULL,
                operation BLOB NOT NULL,
                status TEXT NOT NULL,
                ledger_position INTEGER,
                anchored_at TEXT,
                rejection_cause TEXT,
                rejection_reason TEXT,
                appended_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_operation_log_did ON operation_log(did, local_seq)",
        )
        .execute(&db)
        .await?;

        Ok(Self { db })
    }

    /// Insert a freshly appended entry
    pub async fn insert(&self, entry: &StoredOperation) -> RegistrarResult<()> {
        let operation_bytes = serde_cbor::to_vec(&entry.signed)
            .map_err(|e| RegistrarError::Internal(format!("Failed to encode operation: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO operation_log
                (op_hash, did, local_seq, operation, status, appended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&entry.hash)
        .bind(&entry.did)
        .bind(entry.local_seq as i64)
        .bind(&operation_bytes)
        .bind(entry.status.as_str())
        .bind(entry.appended_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Record a confirmation
    pub async fn mark_confirmed(
        &self,
        op_hash: &str,
        ledger_position: u64,
        anchored_at: DateTime<Utc>,
    ) -> RegistrarResult<()> {
        sqlx::query(
            r#"
            UPDATE operation_log
            SET status = ?2, ledger_position = ?3, anchored_at = ?4
            WHERE op_hash = ?1
            "#,
        )
        .bind(op_hash)
        .bind(OperationStatus::Confirmed.as_str())
        .bind(ledger_position as i64)
        .bind(anchored_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Record a rejection
    pub async fn mark_rejected(
        &self,
        op_hash: &str,
        cause: RejectionCause,
        reason: &str,
    ) -> RegistrarResult<()> {
        sqlx::query(
            r#"
            UPDATE operation_log
            SET status = ?2, rejection_cause = ?3, rejection_reason = ?4
            WHERE op_hash = ?1
            "#,
        )
        .bind(op_hash)
        .bind(OperationStatus::Rejected.as_str())
        .bind(cause.as_str())
        .bind(reason)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Load every entry in local append order
    pub async fn load_all(&self) -> RegistrarResult<Vec<StoredOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT op_hash, did, local_seq, operation, status, ledger_position,
                   anchored_at, rejection_cause, rejection_reason, appended_at
            FROM operation_log
            ORDER BY local_seq ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    /// Test database connection
    pub async fn ping(&self) -> RegistrarResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

fn row_to_entry(row: sqlx::sqlite::SqliteRow) -> RegistrarResult<StoredOperation> {
    let operation_bytes: Vec<u8> = row.try_get("operation")?;
    let signed: SignedOperation = serde_cbor::from_slice(&operation_bytes)
        .map_err(|e| RegistrarError::Internal(format!("Failed to decode operation: {}", e)))?;

    let status: String = row.try_get("status")?;
    let cause: Option<String> = row.try_get("rejection_cause")?;

    Ok(StoredOperation {
        hash: row.try_get("op_hash")?,
        did: row.try_get("did")?,
        local_seq: row.try_get::<i64, _>("local_seq")? as u64,
        signed,
        status: status.parse()?,
        ledger_position: row
            .try_get::<Option<i64>, _>("ledger_position")?
            .map(|p| p as u64),
        anchored_at: row
            .try_get::<Option<String>, _>("anchored_at")?
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        rejection_cause: cause.map(|c| c.parse()).transpose()?,
        rejection_reason: row.try_get("rejection_reason")?,
        appended_at: parse_timestamp(&row.try_get::<String, _>("appended_at")?)?,
    })
}

/// Parse RFC3339 timestamp
fn parse_timestamp(s: &str) -> RegistrarResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RegistrarError::Internal(format!("Invalid timestamp: {}", e)))
}
