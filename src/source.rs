//! Where readings come from.
//!
//! Producers of readings sit behind [`ReadingSource`]; [`forward`] drains one
//! onto the `sensor-data` topic, where the analyzer sees it in the same
//! ordered stream as settings patches and readings posted over HTTP.
//! [`ReplaySource`] stands in for a live sensor by replaying a historical
//! dataset at a fixed pace.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, SENSOR_DATA};
use crate::dataset;
use crate::models::SensorReading;

/// Pause before asking a source that had nothing for another reading.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(50);

// ---

#[async_trait]
pub trait ReadingSource: Send {
    /// Next reading, or `None` when nothing is available right now.
    ///
    /// A live source may return `None` while `has_more` stays true; the
    /// caller backs off before asking again.
    async fn next(&mut self) -> Option<SensorReading>;

    /// False once the source can never produce another reading.
    fn has_more(&self) -> bool;
}

/// Any JSON object is a reading (possibly an empty one); anything else is not.
pub fn parse_reading(payload: &str) -> Option<SensorReading> {
    // ---
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Replays a fixed list of readings, one per `interval`.
pub struct ReplaySource {
    pending: VecDeque<SensorReading>,
    interval: Duration,
    started: bool,
}

impl ReplaySource {
    pub fn new(readings: Vec<SensorReading>, interval: Duration) -> Self {
        Self {
            pending: readings.into(),
            interval,
            started: false,
        }
    }

    pub fn from_path(path: &Path, interval: Duration) -> anyhow::Result<Self> {
        // ---
        let dataset = dataset::load_jsonl(path)?;
        info!(
            readings = dataset.readings.len(),
            interval_ms = interval.as_millis() as u64,
            "Replay source ready"
        );
        Ok(Self::new(dataset.readings, interval))
    }
}

#[async_trait]
impl ReadingSource for ReplaySource {
    async fn next(&mut self) -> Option<SensorReading> {
        // ---
        if self.pending.is_empty() {
            return None;
        }
        if self.started && !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        self.started = true;

        let mut reading = self.pending.pop_front()?;
        if reading.emitted_at.is_none() {
            reading.emitted_at = Some(chrono::Utc::now().timestamp_micros() as f64 / 1e6);
        }
        Some(reading)
    }

    fn has_more(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Publish every reading of `source` to `sensor-data`, then return the count.
pub async fn forward<S: ReadingSource>(mut source: S, bus: MessageBus) -> usize {
    // ---
    let mut sent = 0;
    while source.has_more() {
        let Some(reading) = source.next().await else {
            tokio::time::sleep(IDLE_BACKOFF).await;
            continue;
        };
        match bus.publish_json(SENSOR_DATA, &reading) {
            Ok(subscribers) => {
                sent += 1;
                debug!(sent, subscribers, "Reading forwarded");
            }
            Err(e) => warn!(error = %e, "Failed to forward reading"),
        }
    }
    info!(sent, "Reading source exhausted");
    sent
}
