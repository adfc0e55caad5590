use chrono::NaiveDateTime;
use grape_core::{CorrelationKey, SoilSample};

use crate::error::DBError;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct SoilDao {
    pub(crate) id: i32,
    pub(crate) log_id: i32,
    pub(crate) sensor_order: Option<i32>,
    pub(crate) moisture: Option<f64>,
    pub(crate) sequence: i32,
    pub(crate) created_at: NaiveDateTime,
}

#[cfg(test)]
impl SoilDao {
    pub fn log_id(&self) -> i32 {
        self.log_id
    }

    pub fn sensor_order(&self) -> Option<i32> {
        self.sensor_order
    }
}

/// Inserts the whole batch in one transaction, either every sample lands or none
pub async fn insert_batch(
    conn: &sqlx::PgPool,
    log_id: i32,
    key: CorrelationKey,
    samples: &[SoilSample],
) -> Result<usize, DBError> {
    if samples.is_empty() {
        return Ok(0);
    }

    let now = chrono::Utc::now().naive_utc();
    let mut tx = conn.begin().await?;
    for sample in samples {
        sql_stmnt!(
            r#"INSERT INTO soil_moisture (log_id, sensor_order, moisture, sequence, created_at)
                VALUES ($1, $2, $3, $4, $5)"#,
            log_id,
            sample.order,
            sample.value,
            key.sequence,
            now
        )
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(samples.len())
}

// READ soil_moisture
#[cfg(test)]
pub async fn get(conn: &sqlx::PgPool, log_id: i32) -> Result<Vec<SoilDao>, DBError> {
    Ok(sql_stmnt!(
        SoilDao,
        "SELECT * FROM soil_moisture WHERE log_id = $1 ORDER BY sensor_order ASC, id ASC",
        log_id
    )
    .fetch_all(conn)
    .await?)
}
