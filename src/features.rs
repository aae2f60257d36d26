//! Feature pipeline shared by training and live inference.
//!
//! A [`Pipeline`] is an ordered list of [`Transform`] stages applied to one
//! row at a time. Nothing in a stage looks at other rows, so a reading yields
//! the same [`FeatureRow`] whether it is transformed alone or inside a batch.
//!
//! ```text
//! SensorReading ──▶ Cleaner ──▶ DerivedFeatures ──▶ FeatureRow
//! ```
//!
//! The two modes differ only on rows that fail cleaning: [`Mode::Batch`]
//! rejects them (the batch drops the row), [`Mode::Inference`] blanks the
//! offending value and keeps going.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{AdvisorError, Result};
use crate::models::{SensorReading, Target, TargetSet};

// ---

/// Moisture below this is water stress. Fixed agronomic constant, unrelated
/// to the configurable irrigation threshold.
pub const WATER_STRESS_PCT: f64 = 30.0;
pub const HEAT_STRESS_C: f64 = 30.0;
pub const LOW_NITROGEN_MG_KG: f64 = 40.0;
pub const LOW_PHOSPHORUS_MG_KG: f64 = 20.0;
pub const LOW_POTASSIUM_MG_KG: f64 = 40.0;
/// Global horizontal irradiance (W/m²) above which the canopy is stressed.
pub const SOLAR_STRESS_GHI: f64 = 600.0;

pub const MOISTURE_RANGE: (f64, f64) = (0.0, 100.0);
/// Open interval.
pub const TEMPERATURE_RANGE: (f64, f64) = (-10.0, 55.0);

/// Named columns of a [`FeatureRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    SoilMoisture,
    Temperature,
    TempMin,
    TempMax,
    Humidity,
    Nitrogen,
    Phosphorus,
    Potassium,
    Ph,
    SolarRadiation,
    WindSpeed,
    DaysPlanted,
    Evapotranspiration,
    ReferenceEt,
    CropStage,
    WaterStress,
    HeatStress,
    SolarStress,
    LowNitrogen,
    LowPhosphorus,
    LowPotassium,
    EtRatio,
}

impl Feature {
    pub fn column(self) -> &'static str {
        // ---
        match self {
            Feature::SoilMoisture => "Soil_moisture_pct",
            Feature::Temperature => "Temperature_C",
            Feature::TempMin => "Temp_min_C",
            Feature::TempMax => "Temp_max_C",
            Feature::Humidity => "Humidity_pct",
            Feature::Nitrogen => "Nitrogen_mg_kg",
            Feature::Phosphorus => "Phosphorus_mg_kg",
            Feature::Potassium => "Potassium_mg_kg",
            Feature::Ph => "pH",
            Feature::SolarRadiation => "Solar_Radiation_ghi",
            Feature::WindSpeed => "Wind_Speed",
            Feature::DaysPlanted => "Days_planted",
            Feature::Evapotranspiration => "Evapotranspiration_mm",
            Feature::ReferenceEt => "Reference_ET_mm",
            Feature::CropStage => "Crop_stage_encoded",
            Feature::WaterStress => "water_stress",
            Feature::HeatStress => "heat_stress",
            Feature::SolarStress => "solar_stress",
            Feature::LowNitrogen => "low_nitrogen",
            Feature::LowPhosphorus => "low_phosphorus",
            Feature::LowPotassium => "low_potassium",
            Feature::EtRatio => "ET_ratio",
        }
    }
}

/// Columns a training row must carry.
pub const REQUIRED_FEATURES: [Feature; 7] = [
    Feature::SoilMoisture,
    Feature::Temperature,
    Feature::Humidity,
    Feature::Nitrogen,
    Feature::Phosphorus,
    Feature::Potassium,
    Feature::Ph,
];

/// Input layout of the statistical models, in order.
pub const MODEL_FEATURES: [Feature; 13] = [
    Feature::SoilMoisture,
    Feature::Temperature,
    Feature::Humidity,
    Feature::Nitrogen,
    Feature::Phosphorus,
    Feature::Potassium,
    Feature::Ph,
    Feature::WaterStress,
    Feature::HeatStress,
    Feature::LowNitrogen,
    Feature::LowPhosphorus,
    Feature::LowPotassium,
    Feature::EtRatio,
];

// ---

/// One reading after (partial) transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub ts: Option<f64>,
    values: BTreeMap<Feature, f64>,
    crop_stage_label: Option<String>,
    raw_labels: TargetSet<Option<String>>,
    /// Ground-truth labels once normalized by the cleaner.
    pub labels: TargetSet<Option<bool>>,
}

impl FeatureRow {
    pub fn from_reading(reading: &SensorReading) -> Self {
        // ---
        let raw = [
            (Feature::SoilMoisture, reading.soil_moisture_pct),
            (Feature::Temperature, reading.temperature_c),
            (Feature::TempMin, reading.temp_min_c),
            (Feature::TempMax, reading.temp_max_c),
            (Feature::Humidity, reading.humidity_pct),
            (Feature::Nitrogen, reading.nitrogen_mg_kg),
            (Feature::Phosphorus, reading.phosphorus_mg_kg),
            (Feature::Potassium, reading.potassium_mg_kg),
            (Feature::Ph, reading.ph),
            (Feature::SolarRadiation, reading.solar_radiation_ghi),
            (Feature::WindSpeed, reading.wind_speed),
            (Feature::DaysPlanted, reading.days_planted),
            (Feature::Evapotranspiration, reading.evapotranspiration_mm),
            (Feature::ReferenceEt, reading.reference_et_mm),
        ];

        Self {
            ts: reading.timestamp(),
            values: raw
                .into_iter()
                .filter_map(|(feature, value)| value.map(|v| (feature, v)))
                .collect(),
            crop_stage_label: reading.crop_stage.clone(),
            raw_labels: TargetSet::from_fn(|t| reading.label(t).map(str::to_string)),
            labels: TargetSet::from_fn(|_| None),
        }
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        self.values.insert(feature, value);
    }

    pub fn remove(&mut self, feature: Feature) -> Option<f64> {
        self.values.remove(&feature)
    }

    fn set_flag(&mut self, feature: Feature, flag: bool) {
        self.set(feature, if flag { 1.0 } else { 0.0 });
    }

    /// Values in `schema` order; absent columns are synthesized as zero.
    pub fn vector(&self, schema: &[Feature]) -> Vec<f64> {
        schema.iter().map(|f| self.get(*f).unwrap_or(0.0)).collect()
    }

    /// True when no raw sensor value survived.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Training: reject rows that fail cleaning.
    Batch,
    /// Live: never reject, blank bad values instead.
    Inference,
}

/// One stage of the pipeline. Must not depend on anything but the row.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, row: &mut FeatureRow, mode: Mode) -> Result<()>;
}

/// Label normalization, crop-stage encoding, required-field and domain checks.
#[derive(Debug, Default)]
pub struct Cleaner;

/// Map a yes/no label variant to a flag.
pub fn parse_label(raw: &str) -> Option<bool> {
    // ---
    match raw.trim().to_uppercase().as_str() {
        "SI" | "SÌ" | "YES" | "Y" | "TRUE" | "1" | "1.0" => Some(true),
        "NO" | "N" | "FALSE" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

/// Closed lookup from crop-stage label to ordinal.
pub fn encode_crop_stage(label: &str) -> Option<u8> {
    // ---
    match label.trim().to_lowercase().as_str() {
        "initial stage" => Some(0),
        "development stage" => Some(1),
        "mid stage" | "mid season" => Some(2),
        "last stage" | "late season" => Some(3),
        _ => None,
    }
}

fn label_column(target: Target) -> &'static str {
    // ---
    match target {
        Target::Irrigation => "Irrigation",
        Target::Fertilization => "Fertilization",
        Target::Energy => "Energy",
    }
}

impl Transform for Cleaner {
    fn name(&self) -> &'static str {
        "cleaner"
    }

    fn apply(&self, row: &mut FeatureRow, mode: Mode) -> Result<()> {
        // ---
        for target in Target::ALL {
            let Some(raw) = row.raw_labels.get(target).clone() else {
                continue;
            };
            let parsed = parse_label(&raw);
            if parsed.is_none() && mode == Mode::Batch {
                return Err(AdvisorError::MissingField(label_column(target)));
            }
            *row.labels.get_mut(target) = parsed;
        }

        if let Some(label) = row.crop_stage_label.clone() {
            match encode_crop_stage(&label) {
                Some(stage) => row.set(Feature::CropStage, f64::from(stage)),
                None if mode == Mode::Batch => {
                    return Err(AdvisorError::MissingField("Crop_stage"))
                }
                None => debug!(label = %label, "Unmapped crop stage"),
            }
        }

        if mode == Mode::Batch {
            if let Some(missing) = REQUIRED_FEATURES.iter().find(|f| row.get(**f).is_none()) {
                return Err(AdvisorError::MissingField(missing.column()));
            }
        }

        check_domain(row, Feature::SoilMoisture, mode, |v| {
            v >= MOISTURE_RANGE.0 && v <= MOISTURE_RANGE.1
        })?;
        check_domain(row, Feature::Temperature, mode, |v| {
            v > TEMPERATURE_RANGE.0 && v < TEMPERATURE_RANGE.1
        })?;

        Ok(())
    }
}

fn check_domain(
    row: &mut FeatureRow,
    feature: Feature,
    mode: Mode,
    in_domain: impl Fn(f64) -> bool,
) -> Result<()> {
    // ---
    let Some(value) = row.get(feature) else {
        return Ok(());
    };
    if in_domain(value) {
        return Ok(());
    }

    match mode {
        Mode::Batch => Err(AdvisorError::OutOfDomain {
            field: feature.column(),
            value,
        }),
        Mode::Inference => {
            debug!(field = feature.column(), value, "Out-of-domain value blanked");
            row.remove(feature);
            Ok(())
        }
    }
}

/// Deterministic per-row derived features.
#[derive(Debug, Default)]
pub struct DerivedFeatures;

impl Transform for DerivedFeatures {
    fn name(&self) -> &'static str {
        "derived_features"
    }

    fn apply(&self, row: &mut FeatureRow, _mode: Mode) -> Result<()> {
        // ---
        let flags: [(Feature, Feature, fn(f64) -> bool); 6] = [
            (Feature::SoilMoisture, Feature::WaterStress, |v: f64| v < WATER_STRESS_PCT),
            (Feature::Temperature, Feature::HeatStress, |v: f64| v > HEAT_STRESS_C),
            (Feature::Nitrogen, Feature::LowNitrogen, |v: f64| v < LOW_NITROGEN_MG_KG),
            (Feature::Phosphorus, Feature::LowPhosphorus, |v: f64| v < LOW_PHOSPHORUS_MG_KG),
            (Feature::Potassium, Feature::LowPotassium, |v: f64| v < LOW_POTASSIUM_MG_KG),
            (Feature::SolarRadiation, Feature::SolarStress, |v: f64| v > SOLAR_STRESS_GHI),
        ];
        for (source, derived, test) in flags {
            if let Some(v) = row.get(source) {
                row.set_flag(derived, test(v));
            }
        }

        if let Some(et) = row.get(Feature::Evapotranspiration) {
            let ratio = row
                .get(Feature::ReferenceEt)
                .map(|reference| et / reference)
                .filter(|r| r.is_finite())
                .unwrap_or(0.0);
            row.set(Feature::EtRatio, ratio);
        }

        Ok(())
    }
}

// ---

/// Rows dropped from a batch, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropStats {
    pub missing_field: usize,
    pub out_of_domain: usize,
}

impl DropStats {
    pub fn total(&self) -> usize {
        self.missing_field + self.out_of_domain
    }
}

#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub rows: Vec<FeatureRow>,
    pub dropped: DropStats,
}

/// Ordered chain of transforms.
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(vec![Box::new(Cleaner), Box::new(DerivedFeatures)])
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Transform>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    fn run(&self, reading: &SensorReading, mode: Mode) -> Result<FeatureRow> {
        // ---
        let mut row = FeatureRow::from_reading(reading);
        for stage in &self.stages {
            stage.apply(&mut row, mode)?;
        }
        Ok(row)
    }

    /// Transform a single live reading. Never fails.
    pub fn transform_one(&self, reading: &SensorReading) -> FeatureRow {
        // ---
        match self.run(reading, Mode::Inference) {
            Ok(row) => row,
            Err(e) => {
                debug!(error = %e, "Inference transform failed, using raw row");
                FeatureRow::from_reading(reading)
            }
        }
    }

    /// Transform a training batch, dropping rows that fail cleaning.
    pub fn transform_batch(&self, readings: &[SensorReading]) -> Batch {
        // ---
        let mut batch = Batch::default();
        for reading in readings {
            match self.run(reading, Mode::Batch) {
                Ok(row) => batch.rows.push(row),
                Err(AdvisorError::OutOfDomain { .. }) => batch.dropped.out_of_domain += 1,
                Err(_) => batch.dropped.missing_field += 1,
            }
        }
        batch
    }
}
