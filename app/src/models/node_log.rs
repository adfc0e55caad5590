use chrono::NaiveDateTime;
use grape_core::{CorrelationKey, TransmissionMetrics};

use super::IdRecord;
use crate::error::DBError;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct NodeLogDao {
    pub(crate) id: i32,
    pub(crate) node_id: i32,
    pub(crate) sequence: i32,
    pub(crate) delay: Option<f64>,
    pub(crate) payload_size: Option<f64>,
    pub(crate) throughput: Option<f64>,
    pub(crate) created_at: NaiveDateTime,
}

impl NodeLogDao {
    #[cfg(test)]
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(self.node_id, self.sequence)
    }

    #[cfg(test)]
    pub fn metrics(&self) -> Option<TransmissionMetrics> {
        Some(TransmissionMetrics {
            delay: self.delay?,
            payload_size: self.payload_size?,
            throughput: self.throughput?,
        })
    }

    /// True while no later message has reported delivery metrics for this row
    pub fn is_pending(&self) -> bool {
        self.delay.is_none() && self.payload_size.is_none() && self.throughput.is_none()
    }
}

/// Announces a transmission, its metrics stay NULL until backfilled
pub async fn insert(conn: &sqlx::PgPool, key: CorrelationKey) -> Result<i32, DBError> {
    let now = chrono::Utc::now().naive_utc();
    let record = sql_stmnt!(
        IdRecord,
        r#"INSERT INTO node_send_logs (node_id, sequence, delay, payload_size, throughput, created_at)
            VALUES ($1, $2, NULL, NULL, NULL, $3) RETURNING id"#,
        key.node_id,
        key.sequence,
        now
    )
    .fetch_one(conn)
    .await?;
    Ok(record.id)
}

/// Fills the metrics of the most recent still pending transmission for `target`
///
/// Returns the number of updated rows, which is at most one.
pub async fn backfill(
    conn: &sqlx::PgPool,
    target: CorrelationKey,
    metrics: &TransmissionMetrics,
) -> Result<u64, DBError> {
    let result = sql_stmnt!(
        r#"UPDATE node_send_logs SET delay = $1, payload_size = $2, throughput = $3
            WHERE id = (
                SELECT id FROM node_send_logs
                WHERE node_id = $4 AND sequence = $5
                AND delay IS NULL AND payload_size IS NULL AND throughput IS NULL
                ORDER BY created_at DESC, id DESC LIMIT 1
            )
            AND delay IS NULL AND payload_size IS NULL AND throughput IS NULL"#,
        metrics.delay,
        metrics.payload_size,
        metrics.throughput,
        target.node_id,
        target.sequence
    )
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Most recently created transmission for `key`, ties broken by the higher id
pub async fn latest_id(conn: &sqlx::PgPool, key: CorrelationKey) -> Result<Option<i32>, DBError> {
    let record = sql_stmnt!(
        IdRecord,
        r#"SELECT id FROM node_send_logs
            WHERE node_id = $1 AND sequence = $2
            ORDER BY created_at DESC, id DESC LIMIT 1"#,
        key.node_id,
        key.sequence
    )
    .fetch_optional(conn)
    .await?;
    Ok(record.map(|r| r.id))
}

// READ node_send_logs
#[cfg(test)]
pub async fn get(conn: &sqlx::PgPool, node_id: i32) -> Result<Vec<NodeLogDao>, DBError> {
    Ok(sql_stmnt!(
        NodeLogDao,
        "SELECT * FROM node_send_logs WHERE node_id = $1 ORDER BY id ASC",
        node_id
    )
    .fetch_all(conn)
    .await?)
}
