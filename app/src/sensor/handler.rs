use crate::error::IngestError;
use crate::models::CorrelationStore;
use grape_core::{CorrelationKey, EnvironmentMessage, NodeLogMessage, PowerMessage, SoilMessage};
use tracing::{debug, info};

/// Announces a transmission and backfills the metrics the node reports for the
/// previous one.
///
/// Returns the id of the new transmission row.
#[tracing::instrument(skip(store))]
pub async fn record_transmission(
    store: &dyn CorrelationStore,
    msg: NodeLogMessage,
) -> Result<i32, IngestError> {
    let key = msg.identity.key()?;
    let log_id = store.insert_transmission(key).await?;

    if let (Some(metrics), Some(previous)) = (msg.metrics(), key.previous()) {
        let updated = store.backfill_metrics(previous, &metrics).await?;
        if updated == 0 {
            debug!(
                node_id = key.node_id,
                sequence = previous.sequence,
                "No pending transmission to backfill"
            );
        }
    }

    info!(
        node_id = key.node_id,
        sequence = key.sequence,
        log_id = log_id,
        "Recorded transmission"
    );
    Ok(log_id)
}

#[tracing::instrument(skip(store))]
pub async fn record_power(
    store: &dyn CorrelationStore,
    msg: PowerMessage,
) -> Result<usize, IngestError> {
    let key = msg.identity.key()?;
    let log_id = correlate(store, key).await?;
    store.insert_power(log_id, key, &msg.reading).await?;

    debug!(log_id = log_id, "Recorded power reading");
    Ok(1)
}

#[tracing::instrument(skip(store))]
pub async fn record_environment(
    store: &dyn CorrelationStore,
    msg: EnvironmentMessage,
) -> Result<usize, IngestError> {
    let key = msg.identity.key()?;
    let log_id = correlate(store, key).await?;
    store.insert_environment(log_id, key, &msg.reading).await?;

    debug!(log_id = log_id, "Recorded environment reading");
    Ok(1)
}

/// An empty or absent sample list still has to correlate, but writes nothing
#[tracing::instrument(skip(store))]
pub async fn record_soil(
    store: &dyn CorrelationStore,
    msg: SoilMessage,
) -> Result<usize, IngestError> {
    let key = msg.identity.key()?;
    let log_id = correlate(store, key).await?;

    let samples = msg.samples();
    if samples.is_empty() {
        return Ok(0);
    }
    let count = store.insert_soil(log_id, key, samples).await?;

    debug!(log_id = log_id, count = count, "Recorded soil readings");
    Ok(count)
}

async fn correlate(store: &dyn CorrelationStore, key: CorrelationKey) -> Result<i32, IngestError> {
    store
        .latest_transmission(key)
        .await?
        .ok_or(IngestError::CorrelationNotFound(key))
}
