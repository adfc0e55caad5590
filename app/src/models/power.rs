use chrono::NaiveDateTime;
use grape_core::{CorrelationKey, PowerReading};

use crate::error::DBError;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct PowerDao {
    pub(crate) id: i32,
    pub(crate) log_id: i32,
    pub(crate) current: Option<f64>,
    pub(crate) voltage: Option<f64>,
    pub(crate) power: Option<f64>,
    pub(crate) power_consumption: Option<f64>,
    pub(crate) sequence: i32,
    pub(crate) created_at: NaiveDateTime,
}

#[cfg(test)]
impl PowerDao {
    pub fn log_id(&self) -> i32 {
        self.log_id
    }
}

pub async fn insert(
    conn: &sqlx::PgPool,
    log_id: i32,
    key: CorrelationKey,
    reading: &PowerReading,
) -> Result<(), DBError> {
    let now = chrono::Utc::now().naive_utc();
    sql_stmnt!(
        r#"INSERT INTO ina (log_id, "current", voltage, power, power_consumption, sequence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        log_id,
        reading.current,
        reading.voltage,
        reading.power,
        reading.power_consumption,
        key.sequence,
        now
    )
    .execute(conn)
    .await?;
    Ok(())
}

// READ ina
#[cfg(test)]
pub async fn get(conn: &sqlx::PgPool, log_id: i32) -> Result<Vec<PowerDao>, DBError> {
    Ok(sql_stmnt!(
        PowerDao,
        r#"SELECT id, log_id, "current", voltage, power, power_consumption, sequence, created_at
            FROM ina WHERE log_id = $1 ORDER BY id ASC"#,
        log_id
    )
    .fetch_all(conn)
    .await?)
}
