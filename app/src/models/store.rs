use async_trait::async_trait;
use grape_core::{
    CorrelationKey, EnvironmentReading, PowerReading, SoilSample, TransmissionMetrics,
};

use super::{environment, node_log, power, soil};
use crate::error::DBError;

/// Access pattern the ingestion handlers need from the persistence layer.
///
/// Every call is a single statement (or a single transaction for a soil batch), so an
/// implementation never has to keep a connection across calls.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Inserts a transmission with NULL metrics and returns its id
    async fn insert_transmission(&self, key: CorrelationKey) -> Result<i32, DBError>;

    /// Sets the metrics of the most recent transmission for `target` whose three metric
    /// fields are all still NULL. Returns the number of updated rows (0 or 1).
    async fn backfill_metrics(
        &self,
        target: CorrelationKey,
        metrics: &TransmissionMetrics,
    ) -> Result<u64, DBError>;

    /// Id of the most recently created transmission for `key`.
    ///
    /// Ordered by creation time, equal timestamps fall back to the higher id.
    async fn latest_transmission(&self, key: CorrelationKey) -> Result<Option<i32>, DBError>;

    async fn insert_power(
        &self,
        log_id: i32,
        key: CorrelationKey,
        reading: &PowerReading,
    ) -> Result<(), DBError>;

    async fn insert_environment(
        &self,
        log_id: i32,
        key: CorrelationKey,
        reading: &EnvironmentReading,
    ) -> Result<(), DBError>;

    /// Inserts one row per sample, all referencing `log_id`. The batch is atomic.
    async fn insert_soil(
        &self,
        log_id: i32,
        key: CorrelationKey,
        samples: &[SoilSample],
    ) -> Result<usize, DBError>;
}

pub struct PgStore {
    conn: sqlx::PgPool,
}

impl PgStore {
    pub fn new(conn: sqlx::PgPool) -> Self {
        PgStore { conn }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.conn
    }
}

#[async_trait]
impl CorrelationStore for PgStore {
    async fn insert_transmission(&self, key: CorrelationKey) -> Result<i32, DBError> {
        node_log::insert(&self.conn, key).await
    }

    async fn backfill_metrics(
        &self,
        target: CorrelationKey,
        metrics: &TransmissionMetrics,
    ) -> Result<u64, DBError> {
        node_log::backfill(&self.conn, target, metrics).await
    }

    async fn latest_transmission(&self, key: CorrelationKey) -> Result<Option<i32>, DBError> {
        node_log::latest_id(&self.conn, key).await
    }

    async fn insert_power(
        &self,
        log_id: i32,
        key: CorrelationKey,
        reading: &PowerReading,
    ) -> Result<(), DBError> {
        power::insert(&self.conn, log_id, key, reading).await
    }

    async fn insert_environment(
        &self,
        log_id: i32,
        key: CorrelationKey,
        reading: &EnvironmentReading,
    ) -> Result<(), DBError> {
        environment::insert(&self.conn, log_id, key, reading).await
    }

    async fn insert_soil(
        &self,
        log_id: i32,
        key: CorrelationKey,
        samples: &[SoilSample],
    ) -> Result<usize, DBError> {
        soil::insert_batch(&self.conn, log_id, key, samples).await
    }
}
