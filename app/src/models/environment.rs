use chrono::NaiveDateTime;
use grape_core::{CorrelationKey, EnvironmentReading};

use crate::error::DBError;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct EnvironmentDao {
    pub(crate) id: i32,
    pub(crate) log_id: i32,
    pub(crate) temperature: Option<f64>,
    pub(crate) humidity: Option<f64>,
    pub(crate) sequence: i32,
    pub(crate) created_at: NaiveDateTime,
}

#[cfg(test)]
impl EnvironmentDao {
    pub fn log_id(&self) -> i32 {
        self.log_id
    }
}

pub async fn insert(
    conn: &sqlx::PgPool,
    log_id: i32,
    key: CorrelationKey,
    reading: &EnvironmentReading,
) -> Result<(), DBError> {
    let now = chrono::Utc::now().naive_utc();
    sql_stmnt!(
        r#"INSERT INTO dht (log_id, temperature, humidity, sequence, created_at)
            VALUES ($1, $2, $3, $4, $5)"#,
        log_id,
        reading.temperature,
        reading.humidity,
        key.sequence,
        now
    )
    .execute(conn)
    .await?;
    Ok(())
}

// READ dht
#[cfg(test)]
pub async fn get(conn: &sqlx::PgPool, log_id: i32) -> Result<Vec<EnvironmentDao>, DBError> {
    Ok(sql_stmnt!(
        EnvironmentDao,
        "SELECT * FROM dht WHERE log_id = $1 ORDER BY id ASC",
        log_id
    )
    .fetch_all(conn)
    .await?)
}
