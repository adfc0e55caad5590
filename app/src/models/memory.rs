use async_trait::async_trait;
use grape_core::{
    CorrelationKey, EnvironmentReading, PowerReading, SoilSample, TransmissionMetrics,
};
use parking_lot::Mutex;

use super::environment::EnvironmentDao;
use super::node_log::NodeLogDao;
use super::power::PowerDao;
use super::soil::SoilDao;
use super::store::CorrelationStore;
use crate::error::DBError;

/// Process local store, used when no database is configured
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    last_id: i32,
    node_logs: Vec<NodeLogDao>,
    power: Vec<PowerDao>,
    environment: Vec<EnvironmentDao>,
    soil: Vec<SoilDao>,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    fn latest(&self, key: CorrelationKey, pending_only: bool) -> Option<usize> {
        self.node_logs
            .iter()
            .enumerate()
            .filter(|(_, row)| row.key() == key && (!pending_only || row.is_pending()))
            .max_by_key(|(_, row)| (row.created_at, row.id))
            .map(|(index, _)| index)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    pub fn node_logs(&self) -> Vec<NodeLogDao> {
        self.tables.lock().node_logs.clone()
    }

    pub fn power(&self) -> Vec<PowerDao> {
        self.tables.lock().power.clone()
    }

    pub fn environment(&self) -> Vec<EnvironmentDao> {
        self.tables.lock().environment.clone()
    }

    pub fn soil(&self) -> Vec<SoilDao> {
        self.tables.lock().soil.clone()
    }

    pub fn row_count(&self) -> usize {
        let tables = self.tables.lock();
        tables.node_logs.len() + tables.power.len() + tables.environment.len() + tables.soil.len()
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn insert_transmission(&self, key: CorrelationKey) -> Result<i32, DBError> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        tables.node_logs.push(NodeLogDao {
            id,
            node_id: key.node_id,
            sequence: key.sequence,
            delay: None,
            payload_size: None,
            throughput: None,
            created_at: chrono::Utc::now().naive_utc(),
        });
        Ok(id)
    }

    async fn backfill_metrics(
        &self,
        target: CorrelationKey,
        metrics: &TransmissionMetrics,
    ) -> Result<u64, DBError> {
        let mut tables = self.tables.lock();
        match tables.latest(target, true) {
            Some(index) => {
                let row = &mut tables.node_logs[index];
                row.delay = Some(metrics.delay);
                row.payload_size = Some(metrics.payload_size);
                row.throughput = Some(metrics.throughput);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn latest_transmission(&self, key: CorrelationKey) -> Result<Option<i32>, DBError> {
        let tables = self.tables.lock();
        Ok(tables
            .latest(key, false)
            .map(|index| tables.node_logs[index].id))
    }

    async fn insert_power(
        &self,
        log_id: i32,
        key: CorrelationKey,
        reading: &PowerReading,
    ) -> Result<(), DBError> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        tables.power.push(PowerDao {
            id,
            log_id,
            current: reading.current,
            voltage: reading.voltage,
            power: reading.power,
            power_consumption: reading.power_consumption,
            sequence: key.sequence,
            created_at: chrono::Utc::now().naive_utc(),
        });
        Ok(())
    }

    async fn insert_environment(
        &self,
        log_id: i32,
        key: CorrelationKey,
        reading: &EnvironmentReading,
    ) -> Result<(), DBError> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        tables.environment.push(EnvironmentDao {
            id,
            log_id,
            temperature: reading.temperature,
            humidity: reading.humidity,
            sequence: key.sequence,
            created_at: chrono::Utc::now().naive_utc(),
        });
        Ok(())
    }

    async fn insert_soil(
        &self,
        log_id: i32,
        key: CorrelationKey,
        samples: &[SoilSample],
    ) -> Result<usize, DBError> {
        let now = chrono::Utc::now().naive_utc();
        let mut tables = self.tables.lock();
        for sample in samples {
            let id = tables.next_id();
            tables.soil.push(SoilDao {
                id,
                log_id,
                sensor_order: sample.order,
                moisture: sample.value,
                sequence: key.sequence,
                created_at: now,
            });
        }
        Ok(samples.len())
    }
}
