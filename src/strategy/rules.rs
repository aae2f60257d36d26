//! Deterministic threshold rules.

use crate::error::Result;
use crate::features::{Feature, FeatureRow};
use crate::models::{Decision, NutrientLevel, NutrientLevels, Signal, Target};
use crate::settings::Thresholds;

use super::Strategy;

// ---

/// Threshold rules for one target.
///
/// Holds no thresholds of its own: every call reads the snapshot it is handed,
/// so a settings patch takes effect on the next reading.
#[derive(Debug, Clone, Copy)]
pub struct RuleStrategy {
    target: Target,
}

impl RuleStrategy {
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    /// Rule output used as training labels for the statistical models.
    pub fn label_rows(&self, rows: &[FeatureRow], thresholds: &Thresholds) -> Vec<bool> {
        // ---
        rows.iter()
            .map(|row| self.decide(row, thresholds).signal.is_active())
            .collect()
    }

    fn decide(&self, row: &FeatureRow, th: &Thresholds) -> Decision {
        // ---
        match self.target {
            Target::Irrigation => irrigation(row, th),
            Target::Fertilization => fertilization(row, th),
            Target::Energy => energy(row, th),
        }
    }
}

impl Strategy for RuleStrategy {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn target(&self) -> Target {
        self.target
    }

    fn train(&mut self, _rows: &[FeatureRow], _labels: &[bool]) -> Result<()> {
        Ok(())
    }

    fn predict(&self, row: &FeatureRow, thresholds: &Thresholds) -> Result<Decision> {
        Ok(self.decide(row, thresholds))
    }
}

fn irrigation(row: &FeatureRow, th: &Thresholds) -> Decision {
    // ---
    let limit = th.moisture_threshold;
    match row.get(Feature::SoilMoisture) {
        Some(m) if m < limit => Decision {
            signal: Signal::Switch(true),
            reason: format!("moisture {m}% < threshold {limit}%"),
        },
        Some(m) => Decision {
            signal: Signal::Switch(false),
            reason: format!("moisture {m}% >= threshold {limit}%"),
        },
        None => Decision::inactive(
            Target::Irrigation,
            format!("no moisture reading (threshold {limit}%)"),
        ),
    }
}

fn fertilization(row: &FeatureRow, th: &Thresholds) -> Decision {
    // ---
    let level = |feature: Feature, limit: f64| match row.get(feature) {
        Some(v) if v < limit => NutrientLevel::Low,
        _ => NutrientLevel::Ok,
    };

    Decision {
        signal: Signal::Nutrients(NutrientLevels {
            n: level(Feature::Nitrogen, th.n_threshold),
            p: level(Feature::Phosphorus, th.p_threshold),
            k: level(Feature::Potassium, th.k_threshold),
        }),
        reason: format!(
            "NPK thresholds: {}/{}/{} mg/kg",
            th.n_threshold, th.p_threshold, th.k_threshold
        ),
    }
}

fn energy(row: &FeatureRow, th: &Thresholds) -> Decision {
    // ---
    let t_min = row.get(Feature::TempMin).or(row.get(Feature::Temperature));
    let t_max = row.get(Feature::TempMax).or(row.get(Feature::Temperature));

    let heating = t_min.filter(|t| *t < th.temp_min);
    let cooling = t_max.filter(|t| *t > th.temp_max);

    let reason = match (heating, cooling) {
        (Some(lo), Some(hi)) => format!(
            "heating {lo}°C < {}°C and cooling {hi}°C > {}°C",
            th.temp_min, th.temp_max
        ),
        (Some(lo), None) => format!("heating: {lo}°C < {}°C", th.temp_min),
        (None, Some(hi)) => format!("cooling: {hi}°C > {}°C", th.temp_max),
        (None, None) if t_min.is_none() && t_max.is_none() => format!(
            "no temperature reading (range {}-{}°C)",
            th.temp_min, th.temp_max
        ),
        (None, None) => format!("within range {}-{}°C", th.temp_min, th.temp_max),
    };

    Decision {
        signal: Signal::Switch(heating.is_some() || cooling.is_some()),
        reason,
    }
}
