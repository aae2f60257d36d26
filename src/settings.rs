//! Live decision thresholds.
//!
//! The store holds exactly one [`Snapshot`] behind an `ArcSwap`. Decision
//! cycles call [`SettingsStore::get`] once and work from that value, so a
//! concurrent patch is either fully visible to a cycle or not at all. The
//! `overridden` flag travels inside the same snapshot and, once set by the
//! first accepted patch, stays set for the lifetime of the process.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{AdvisorError, Result};

// ---

pub const DEFAULT_RECIPIENT: &str = "agronomo@greenfield.it";

/// The six decision thresholds plus the notification recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Irrigate below this soil moisture (%).
    pub moisture_threshold: f64,
    /// Heat below this temperature (°C).
    pub temp_min: f64,
    /// Cool above this temperature (°C).
    pub temp_max: f64,
    pub n_threshold: f64,
    pub p_threshold: f64,
    pub k_threshold: f64,
    #[serde(alias = "recipient")]
    pub email: String,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            moisture_threshold: 40.0,
            temp_min: 18.0,
            temp_max: 28.0,
            n_threshold: 50.0,
            p_threshold: 30.0,
            k_threshold: 100.0,
            email: DEFAULT_RECIPIENT.to_string(),
        }
    }
}

/// A partial update received on `system-settings`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdPatch {
    pub moisture_threshold: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub n_threshold: Option<f64>,
    pub p_threshold: Option<f64>,
    pub k_threshold: Option<f64>,
    pub email: Option<String>,
}

impl ThresholdPatch {
    /// Parse a raw bus payload. Any malformed known key rejects the patch.
    pub fn from_json(payload: &str) -> Result<Self> {
        // ---
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| AdvisorError::InvalidPatch(format!("not JSON: {e}")))?;
        match value {
            Value::Object(map) => Self::from_map(&map),
            other => Err(AdvisorError::InvalidPatch(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        // ---
        let mut patch = ThresholdPatch::default();

        for (key, value) in map {
            match key.as_str() {
                "moisture_threshold" => patch.moisture_threshold = Some(threshold(key, value)?),
                "temp_min" => patch.temp_min = Some(temperature(key, value)?),
                "temp_max" => patch.temp_max = Some(temperature(key, value)?),
                "n_threshold" => patch.n_threshold = Some(threshold(key, value)?),
                "p_threshold" => patch.p_threshold = Some(threshold(key, value)?),
                "k_threshold" => patch.k_threshold = Some(threshold(key, value)?),
                "email" | "recipient" => match value {
                    Value::String(s) if !s.trim().is_empty() => {
                        patch.email = Some(s.trim().to_string())
                    }
                    _ => {
                        return Err(AdvisorError::InvalidPatch(format!(
                            "{key} must be a non-empty string"
                        )))
                    }
                },
                other => warn!(key = other, "Ignoring unknown settings key"),
            }
        }

        Ok(patch)
    }

    /// Overlay the supplied fields on `base`.
    pub fn apply_to(&self, base: &Thresholds) -> Result<Thresholds> {
        // ---
        let next = Thresholds {
            moisture_threshold: self.moisture_threshold.unwrap_or(base.moisture_threshold),
            temp_min: self.temp_min.unwrap_or(base.temp_min),
            temp_max: self.temp_max.unwrap_or(base.temp_max),
            n_threshold: self.n_threshold.unwrap_or(base.n_threshold),
            p_threshold: self.p_threshold.unwrap_or(base.p_threshold),
            k_threshold: self.k_threshold.unwrap_or(base.k_threshold),
            email: self.email.clone().unwrap_or_else(|| base.email.clone()),
        };

        if next.temp_min > next.temp_max {
            return Err(AdvisorError::InvalidPatch(format!(
                "temp_min {} exceeds temp_max {}",
                next.temp_min, next.temp_max
            )));
        }
        Ok(next)
    }
}

fn number(key: &str, value: &Value) -> Result<f64> {
    // ---
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(AdvisorError::InvalidPatch(format!("{key} out of range: {v}"))),
        None => Err(AdvisorError::InvalidPatch(format!("{key} must be a number, got {value}"))),
    }
}

/// Moisture and nutrient levels cannot go below zero.
fn threshold(key: &str, value: &Value) -> Result<f64> {
    // ---
    let v = number(key, value)?;
    if v < 0.0 {
        return Err(AdvisorError::InvalidPatch(format!("{key} out of range: {v}")));
    }
    Ok(v)
}

/// Temperatures only need to be finite; ordering is checked in `apply_to`.
fn temperature(key: &str, value: &Value) -> Result<f64> {
    number(key, value)
}

// ---

/// Immutable view of the live settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub thresholds: Thresholds,
    /// Sticky: true once any patch has been accepted.
    pub overridden: bool,
}

/// Process-wide holder of the single live [`Snapshot`].
pub struct SettingsStore {
    current: ArcSwap<Snapshot>,
}

impl SettingsStore {
    // ---
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot {
                thresholds,
                overridden: false,
            }),
        }
    }

    pub fn get(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Publish `patch` on top of the current snapshot.
    ///
    /// On error nothing is published and the previous snapshot stays live.
    pub fn apply(&self, patch: &ThresholdPatch) -> Result<Arc<Snapshot>> {
        // ---
        let mut outcome: Option<Result<Arc<Snapshot>>> = None;

        self.current.rcu(|current| match patch.apply_to(&current.thresholds) {
            Ok(thresholds) => {
                let next = Arc::new(Snapshot {
                    thresholds,
                    overridden: true,
                });
                outcome = Some(Ok(Arc::clone(&next)));
                next
            }
            Err(e) => {
                outcome = Some(Err(e));
                Arc::clone(current)
            }
        });

        let published = outcome.unwrap_or_else(|| Ok(self.get()))?;
        info!(
            moisture = published.thresholds.moisture_threshold,
            temp_min = published.thresholds.temp_min,
            temp_max = published.thresholds.temp_max,
            n = published.thresholds.n_threshold,
            p = published.thresholds.p_threshold,
            k = published.thresholds.k_threshold,
            "Settings updated"
        );
        Ok(published)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
