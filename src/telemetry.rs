// telemetry.rs

// Decodes textual bus payloads into TelemetryRecord, validating the
// required schema before a message is allowed onto a coordinator's ingest
// queue. Invalid records are dropped with a warning, never propagated as
// an error to the transport callback.

use log::warn;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::coordinator::TelemetryRecord;

/// Loosely-typed mirror of the wire record, used only to check for missing
/// keys before committing to the strict `TelemetryRecord` shape.
#[derive(Debug, Deserialize)]
struct RawRecord {
    id: Option<String>,
    data_aggregator_id: Option<String>,
    timestamp: Option<i64>,
    x_uwb_pos: Option<f64>,
    y_uwb_pos: Option<f64>,
    z_uwb_pos: Option<f64>,
    x_imu_vel: Option<f64>,
    y_imu_vel: Option<f64>,
    z_imu_vel: Option<f64>,
    #[serde(default)]
    x_imu_acc: f64,
    #[serde(default)]
    y_imu_acc: f64,
    #[serde(default)]
    z_imu_acc: f64,
}

/// Parses a JSON payload and validates the required key set, rejecting
/// non-finite numeric fields. Returns `None` (after logging a warning) for
/// any malformed or incomplete record rather than an error, matching the
/// "drop, don't propagate" contract for transport callbacks.
pub fn decode_and_validate(payload: &[u8]) -> Option<TelemetryRecord> {
    let raw: RawRecord = match serde_json::from_slice(payload) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("dropping telemetry record: malformed JSON: {err}");
            return None;
        }
    };

    let id = raw.id?;
    let data_aggregator_id = raw.data_aggregator_id?;
    let timestamp = raw.timestamp?;
    let x_uwb_pos = raw.x_uwb_pos?;
    let y_uwb_pos = raw.y_uwb_pos?;
    let z_uwb_pos = raw.z_uwb_pos?;
    let x_imu_vel = raw.x_imu_vel?;
    let y_imu_vel = raw.y_imu_vel?;
    let z_imu_vel = raw.z_imu_vel?;

    let numeric_fields = [
        x_uwb_pos, y_uwb_pos, z_uwb_pos, x_imu_vel, y_imu_vel, z_imu_vel,
        raw.x_imu_acc, raw.y_imu_acc, raw.z_imu_acc,
    ];
    if !numeric_fields.iter().all(|v| v.is_finite()) {
        warn!("dropping telemetry record for tag {id}: non-finite field");
        return None;
    }

    Some(TelemetryRecord {
        id,
        data_aggregator_id,
        timestamp,
        x_uwb_pos,
        y_uwb_pos,
        z_uwb_pos,
        x_imu_vel,
        y_imu_vel,
        z_imu_vel,
        x_imu_acc: raw.x_imu_acc,
        y_imu_acc: raw.y_imu_acc,
        z_imu_acc: raw.z_imu_acc,
    })
}

/// Unbounded, single-producer/single-consumer FIFO queue owned by a
/// coordinator. Backpressure is not propagated; the queue grows until
/// drained by the service loop.
pub struct IngestQueue {
    inner: Mutex<VecDeque<TelemetryRecord>>,
}

impl IngestQueue {
    pub fn new() -> Self {
        IngestQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Decodes and validates `payload`, enqueueing on success. Logs and
    /// drops on failure; never returns an error to the caller.
    pub fn ingest(&self, payload: &[u8]) {
        if let Some(record) = decode_and_validate(payload) {
            self.push_record(record);
        }
    }

    /// Enqueues an already-decoded record directly, skipping the JSON codec.
    /// Used when a transport hands back a typed record instead of raw bytes.
    pub fn push_record(&self, record: TelemetryRecord) {
        self.inner.lock().expect("ingest queue mutex poisoned").push_back(record);
    }

    /// Drains every currently queued record in arrival order.
    pub fn drain(&self) -> Vec<TelemetryRecord> {
        let mut guard = self.inner.lock().expect("ingest queue mutex poisoned");
        guard.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ingest queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IngestQueue {
    fn default() -> Self {
        Self::new()
    }
}
