//! Data models for the advisory pipeline.
//!
//! `SensorReading` is what arrives on `sensor-data`; `AdvisoryPacket` is what
//! leaves on `system-advice`. Field names on the wire follow the historical
//! dataset columns, so both types carry explicit serde renames.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::settings::Thresholds;

// ---

/// Raw sensor reading as received from the bus.
///
/// Every field is optional: live readings are frequently partial. Numeric
/// fields accept JSON numbers or numeric strings; anything else is treated as
/// missing rather than failing the whole reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    // ---
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub ts: Option<f64>,

    /// Emission time stamped by replay producers.
    #[serde(
        rename = "_ts",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub emitted_at: Option<f64>,

    #[serde(
        rename = "Soil_moisture_pct",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub soil_moisture_pct: Option<f64>,

    #[serde(
        rename = "Temperature_C",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature_c: Option<f64>,

    #[serde(
        rename = "Temp_min_C",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub temp_min_c: Option<f64>,

    #[serde(
        rename = "Temp_max_C",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub temp_max_c: Option<f64>,

    #[serde(
        rename = "Humidity_pct",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub humidity_pct: Option<f64>,

    #[serde(
        rename = "Nitrogen_mg_kg",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub nitrogen_mg_kg: Option<f64>,

    #[serde(
        rename = "Phosphorus_mg_kg",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub phosphorus_mg_kg: Option<f64>,

    #[serde(
        rename = "Potassium_mg_kg",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub potassium_mg_kg: Option<f64>,

    #[serde(
        rename = "pH",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub ph: Option<f64>,

    #[serde(
        rename = "Solar_Radiation_ghi",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub solar_radiation_ghi: Option<f64>,

    #[serde(
        rename = "Wind_Speed",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub wind_speed: Option<f64>,

    #[serde(
        rename = "Days_planted",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub days_planted: Option<f64>,

    #[serde(
        rename = "Evapotranspiration_mm",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub evapotranspiration_mm: Option<f64>,

    #[serde(
        rename = "Reference_ET_mm",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_et_mm: Option<f64>,

    #[serde(
        rename = "Crop_stage",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub crop_stage: Option<String>,

    /// Ground-truth labels, present only in historical datasets.
    #[serde(
        rename = "Irrigation",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub irrigation_label: Option<String>,

    #[serde(
        rename = "Fertilization",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub fertilization_label: Option<String>,

    #[serde(
        rename = "Energy",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub energy_label: Option<String>,
}

impl SensorReading {
    // ---
    /// Best available timestamp: `ts`, then the producer's `_ts`.
    pub fn timestamp(&self) -> Option<f64> {
        self.ts.or(self.emitted_at)
    }

    /// Raw ground-truth label text for `target`, if the row carries one.
    pub fn label(&self, target: Target) -> Option<&str> {
        // ---
        match target {
            Target::Irrigation => self.irrigation_label.as_deref(),
            Target::Fertilization => self.fertilization_label.as_deref(),
            Target::Energy => self.energy_label.as_deref(),
        }
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    Ok(parsed.filter(|v| v.is_finite()))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

// ---

/// The three actuator domains the service advises on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Irrigation,
    Fertilization,
    Energy,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Irrigation, Target::Fertilization, Target::Energy];

    pub fn as_str(self) -> &'static str {
        // ---
        match self {
            Target::Irrigation => "irrigation",
            Target::Fertilization => "fertilization",
            Target::Energy => "energy",
        }
    }

    /// Tag used in alert reasons and notification subjects.
    pub fn alert_tag(self) -> &'static str {
        // ---
        match self {
            Target::Irrigation => "IRRIGATION",
            Target::Fertilization => "FERTILIZATION",
            Target::Energy => "ENERGY",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSet<T> {
    pub irrigation: T,
    pub fertilization: T,
    pub energy: T,
}

impl<T> TargetSet<T> {
    // ---
    pub fn from_fn(mut f: impl FnMut(Target) -> T) -> Self {
        Self {
            irrigation: f(Target::Irrigation),
            fertilization: f(Target::Fertilization),
            energy: f(Target::Energy),
        }
    }

    pub fn get(&self, target: Target) -> &T {
        // ---
        match target {
            Target::Irrigation => &self.irrigation,
            Target::Fertilization => &self.fertilization,
            Target::Energy => &self.energy,
        }
    }

    pub fn get_mut(&mut self, target: Target) -> &mut T {
        // ---
        match target {
            Target::Irrigation => &mut self.irrigation,
            Target::Fertilization => &mut self.fertilization,
            Target::Energy => &mut self.energy,
        }
    }
}

// ---

/// Nutrient sub-signal. `Check` is the statistical model's "some nutrient is
/// short" flag, which does not say which one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NutrientLevel {
    Low,
    #[default]
    Ok,
    Check,
}

impl NutrientLevel {
    pub fn is_deficient(self) -> bool {
        matches!(self, NutrientLevel::Low | NutrientLevel::Check)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NutrientLevels {
    pub n: NutrientLevel,
    pub p: NutrientLevel,
    pub k: NutrientLevel,
}

/// Categorical state of one target as produced by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Irrigation / energy actuator: `true` means ON.
    Switch(bool),
    /// Fertilization, split by nutrient.
    Nutrients(NutrientLevels),
}

impl Signal {
    pub fn is_active(&self) -> bool {
        // ---
        match self {
            Signal::Switch(on) => *on,
            Signal::Nutrients(l) => l.n.is_deficient() || l.p.is_deficient() || l.k.is_deficient(),
        }
    }

    /// The inactive signal for `target` (OFF, or all nutrients OK).
    pub fn inactive(target: Target) -> Self {
        // ---
        match target {
            Target::Fertilization => Signal::Nutrients(NutrientLevels::default()),
            Target::Irrigation | Target::Energy => Signal::Switch(false),
        }
    }
}

/// A strategy's verdict for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub signal: Signal,
    pub reason: String,
}

impl Decision {
    pub fn inactive(target: Target, reason: impl Into<String>) -> Self {
        Self {
            signal: Signal::inactive(target),
            reason: reason.into(),
        }
    }
}

// ---

/// Switch state on the wire. Energy reports its active state as `ACTIVE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchStatus {
    On,
    Active,
    #[default]
    Off,
}

impl SwitchStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SwitchStatus::On | SwitchStatus::Active)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchAdvice {
    #[serde(default)]
    pub status: SwitchStatus,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientAdvice {
    #[serde(rename = "N", default)]
    pub n: NutrientLevel,
    #[serde(rename = "P", default)]
    pub p: NutrientLevel,
    #[serde(rename = "K", default)]
    pub k: NutrientLevel,
    #[serde(default)]
    pub reason: String,
}

/// Per-target advice block (`rules` or `ai` in the packet).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetAdvice {
    #[serde(default)]
    pub irrigation: SwitchAdvice,
    #[serde(default)]
    pub fertilization: NutrientAdvice,
    #[serde(default)]
    pub energy: SwitchAdvice,
}

impl TargetAdvice {
    /// Render strategy decisions into the wire layout.
    pub fn from_decisions(decisions: TargetSet<Decision>) -> Self {
        // ---
        let TargetSet {
            irrigation,
            fertilization,
            energy,
        } = decisions;

        let levels = match fertilization.signal {
            Signal::Nutrients(levels) => levels,
            Signal::Switch(on) => NutrientLevels {
                n: if on { NutrientLevel::Check } else { NutrientLevel::Ok },
                ..NutrientLevels::default()
            },
        };

        TargetAdvice {
            irrigation: SwitchAdvice {
                status: if irrigation.signal.is_active() {
                    SwitchStatus::On
                } else {
                    SwitchStatus::Off
                },
                reason: irrigation.reason,
            },
            fertilization: NutrientAdvice {
                n: levels.n,
                p: levels.p,
                k: levels.k,
                reason: fertilization.reason,
            },
            energy: SwitchAdvice {
                status: if energy.signal.is_active() {
                    SwitchStatus::Active
                } else {
                    SwitchStatus::Off
                },
                reason: energy.reason,
            },
        }
    }
}

/// One published decision for one reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryPacket {
    // ---
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub rules: TargetAdvice,
    #[serde(default)]
    pub ai: TargetAdvice,
    #[serde(default)]
    pub config: Thresholds,
    #[serde(default)]
    pub settings_updated: bool,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reading_accepts_partial_and_string_values() {
        // ---
        let reading: SensorReading = serde_json::from_value(json!({
            "Soil_moisture_pct": "25,5",
            "Temperature_C": 22,
            "Crop_stage": "Mid stage",
            "Wind_Speed": "calm",
            "unrelated": [1, 2, 3]
        }))
        .unwrap();

        assert_eq!(reading.soil_moisture_pct, Some(25.5));
        assert_eq!(reading.temperature_c, Some(22.0));
        assert_eq!(reading.crop_stage.as_deref(), Some("Mid stage"));
        assert_eq!(reading.wind_speed, None);
        assert_eq!(reading.nitrogen_mg_kg, None);
    }

    #[test]
    fn test_timestamp_prefers_ts_over_producer_stamp() {
        // ---
        let both: SensorReading = serde_json::from_value(json!({"ts": 10.0, "_ts": 20.0})).unwrap();
        assert_eq!(both.timestamp(), Some(10.0));

        let stamped: SensorReading = serde_json::from_value(json!({"_ts": 20.0})).unwrap();
        assert_eq!(stamped.timestamp(), Some(20.0));
    }

    #[test]
    fn test_numeric_labels_become_text() {
        // ---
        let reading: SensorReading = serde_json::from_value(json!({"Irrigation": 1})).unwrap();
        assert_eq!(reading.label(Target::Irrigation), Some("1"));
        assert_eq!(reading.label(Target::Energy), None);
    }

    #[test]
    fn test_advice_wire_layout() {
        // ---
        let decisions = TargetSet {
            irrigation: Decision {
                signal: Signal::Switch(true),
                reason: "dry".into(),
            },
            fertilization: Decision {
                signal: Signal::Nutrients(NutrientLevels {
                    n: NutrientLevel::Low,
                    ..NutrientLevels::default()
                }),
                reason: "npk".into(),
            },
            energy: Decision {
                signal: Signal::Switch(true),
                reason: "cold".into(),
            },
        };

        let value = serde_json::to_value(TargetAdvice::from_decisions(decisions)).unwrap();
        assert_eq!(value["irrigation"]["status"], "ON");
        assert_eq!(value["energy"]["status"], "ACTIVE");
        assert_eq!(value["fertilization"]["N"], "LOW");
        assert_eq!(value["fertilization"]["P"], "OK");
        assert_eq!(value["fertilization"]["reason"], "npk");
    }

    #[test]
    fn test_switch_signal_on_fertilization_reports_check() {
        // ---
        let decisions = TargetSet::from_fn(|t| match t {
            Target::Fertilization => Decision {
                signal: Signal::Switch(true),
                reason: "model".into(),
            },
            other => Decision::inactive(other, "idle"),
        });

        let advice = TargetAdvice::from_decisions(decisions);
        assert_eq!(advice.fertilization.n, NutrientLevel::Check);
        assert_eq!(advice.fertilization.k, NutrientLevel::Ok);
        assert_eq!(advice.irrigation.status, SwitchStatus::Off);
    }

    #[test]
    fn test_packet_tolerates_missing_sections() {
        // ---
        let packet: AdvisoryPacket =
            serde_json::from_value(json!({"ts": 5.0, "rules": {"irrigation": {"status": "ON"}}}))
                .unwrap();

        assert_eq!(packet.rules.irrigation.status, SwitchStatus::On);
        assert_eq!(packet.rules.energy.status, SwitchStatus::Off);
        assert_eq!(packet.rules.fertilization.n, NutrientLevel::Ok);
        assert!(!packet.settings_updated);
    }
}
