// service.rs

// Configuration-driven service loop: builds one RakfLocalizer per `rakf`
// tracker, drains each tracker's ingest queue on a fixed interval,
// publishes estimates to the plm_walker and visual exchanges, and
// optionally loads/saves filter state from a StateStore across ticks.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::{self, TrackerConfig};
use crate::coordinator::{EstimateRecord, RakfLocalizer, TelemetryRecord};
use crate::error::ServiceError;
use crate::persistence::StateStore;
use crate::telemetry::IngestQueue;
use crate::transport::Transport;

const PLM_WALKER_EXCHANGE: &str = "plm_walker";
const VISUAL_EXCHANGE: &str = "visual";

/// A `rakf`-type tracker wired to its ingest queue, interval, and optional
/// persistence key. Construction fails fast on an unsupported dimension or
/// invalid filter parameter (`ConfigError`).
pub struct Tracker {
    pub id: String,
    pub localizer: RakfLocalizer,
    pub queue: Arc<IngestQueue>,
    pub interval: Duration,
}

fn build_tracker(tracker: &TrackerConfig) -> Result<Tracker, ServiceError> {
    let coordinator_config = config::coordinator_config(tracker)?;
    let localizer = RakfLocalizer::new(tracker.id.clone(), coordinator_config)
        .map_err(ServiceError::Config)?;
    Ok(Tracker {
        id: tracker.id.clone(),
        localizer,
        queue: Arc::new(IngestQueue::new()),
        interval: Duration::from_secs_f64(tracker.algorithm.interval),
    })
}

/// Builds one `Tracker` per `rakf`-typed entry in `trackers`.
pub fn build_trackers(trackers: &[TrackerConfig]) -> Result<Vec<Tracker>, ServiceError> {
    trackers
        .iter()
        .filter(|t| t.algorithm.kind == "rakf")
        .map(build_tracker)
        .collect()
}

fn reduced_record(estimate: &EstimateRecord) -> serde_json::Value {
    serde_json::json!({
        "id": estimate.input.id,
        "x_est_pos": estimate.x_est_pos,
        "y_est_pos": estimate.y_est_pos,
        "z_est_pos": estimate.z_est_pos,
        "timestamp": estimate.input.timestamp,
    })
}

async fn publish_estimate(transport: &dyn Transport, estimate: &EstimateRecord) {
    match serde_json::to_vec(&reduced_record(estimate)) {
        Ok(payload) => {
            if let Err(err) = transport.publish(PLM_WALKER_EXCHANGE, &payload).await {
                warn!("failed to publish to {PLM_WALKER_EXCHANGE}: {err}");
            }
        }
        Err(err) => warn!("failed to encode reduced estimate record: {err}"),
    }

    match serde_json::to_vec(estimate) {
        Ok(payload) => {
            if let Err(err) = transport.publish(VISUAL_EXCHANGE, &payload).await {
                warn!("failed to publish to {VISUAL_EXCHANGE}: {err}");
            }
        }
        Err(err) => warn!("failed to encode full estimate record: {err}"),
    }
}

/// One drain-and-publish pass for a single tracker, with an optional
/// persistence round trip: load state before the first message of the
/// batch, save state after the batch is processed.
pub async fn run_tick(
    tracker: &mut Tracker,
    transport: &dyn Transport,
    store: Option<&dyn StateStore>,
) {
    let pending: Vec<TelemetryRecord> = tracker.queue.drain();
    if pending.is_empty() {
        return;
    }
    debug!("tracker {}: draining {} queued record(s)", tracker.id, pending.len());

    if let Some(store) = store {
        match store.load_state(&tracker.id).await {
            Ok(Some(state)) => {
                if let Err(err) = tracker.localizer.update_state(state) {
                    warn!("tracker {}: failed to restore persisted state: {err}", tracker.id);
                }
            }
            Ok(None) => {
                warn!("tracker {}: no persisted state, skipping this batch", tracker.id);
                return;
            }
            Err(err) => {
                warn!("tracker {}: persistence load failed: {err}", tracker.id);
                return;
            }
        }
    }

    for record in &pending {
        let estimate = tracker.localizer.update(record);
        publish_estimate(transport, &estimate).await;
    }

    if let Some(store) = store {
        let snapshot = tracker.localizer.state_to_dict();
        if let Err(err) = store.save_state(&tracker.id, &snapshot).await {
            warn!("tracker {}: persistence save failed: {err}", tracker.id);
        }
    }
}

/// Runs all trackers until `shutdown` is cancelled. Each tracker sleeps for
/// its own configured interval between ticks; cancellation is checked
/// between ticks, never inside a step, so an in-flight batch always
/// completes before teardown.
pub async fn run(
    mut trackers: Vec<Tracker>,
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn StateStore>>,
    shutdown: CancellationToken,
) {
    info!("service loop starting with {} tracker(s)", trackers.len());

    loop {
        if shutdown.is_cancelled() {
            info!("shutdown signal received, tearing down service loop");
            break;
        }

        for tracker in trackers.iter_mut() {
            run_tick(tracker, transport.as_ref(), store.as_deref()).await;
        }

        let sleep_for = trackers
            .iter()
            .map(|t| t.interval)
            .min()
            .unwrap_or(Duration::from_secs(1));

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.cancelled() => {
                info!("shutdown signal received during sleep, tearing down service loop");
                break;
            }
        }
    }
}
