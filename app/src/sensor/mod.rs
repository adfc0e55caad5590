pub mod handler;


use crate::error::IngestError;
use crate::models::CorrelationStore;
use grape_core::{MessageKind, SensorMessage};

pub use handler::{record_environment, record_power, record_soil, record_transmission};

/// What a successful ingestion produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new transmission row with its id
    Transmission(i32),
    /// Number of auxiliary rows written
    Readings(usize),
}

/// Routes a complete request body to the handler registered for `path`.
///
/// Unknown paths are rejected before the body is looked at.
pub async fn dispatch(
    store: &dyn CorrelationStore,
    path: &str,
    body: &[u8],
) -> Result<IngestOutcome, IngestError> {
    let kind =
        MessageKind::from_path(path).ok_or_else(|| IngestError::UnknownPath(path.to_owned()))?;

    match SensorMessage::decode(kind, body)? {
        SensorMessage::NodeLog(msg) => record_transmission(store, msg)
            .await
            .map(IngestOutcome::Transmission),
        SensorMessage::Power(msg) => record_power(store, msg).await.map(IngestOutcome::Readings),
        SensorMessage::Environment(msg) => record_environment(store, msg)
            .await
            .map(IngestOutcome::Readings),
        SensorMessage::Soil(msg) => record_soil(store, msg).await.map(IngestOutcome::Readings),
    }
}
