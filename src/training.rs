//! Startup fitting of the statistical strategies.
//!
//! The models learn to imitate the rule engine: each target's labels are the
//! [`RuleStrategy`] verdicts on the cleaned historical rows under the
//! thresholds live at startup. When the dataset also carries ground-truth
//! labels, agreement with them is reported alongside.

use tracing::{info, warn};

use crate::features::{DropStats, FeatureRow, Pipeline};
use crate::models::{SensorReading, Target, TargetSet};
use crate::settings::Thresholds;
use crate::strategy::{ModelStrategy, RuleStrategy, Strategy};

// ---

#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub target: Target,
    pub trained: bool,
    /// Fraction of training rows where the model matches the rules.
    pub rule_agreement: Option<f64>,
    /// Fraction of labelled rows where the model matches the ground truth.
    pub label_agreement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub rows: usize,
    pub dropped: DropStats,
    pub targets: Vec<TargetReport>,
}

/// Fit one model per target. A target that fails to train stays untrained;
/// the others are unaffected.
pub fn train_models(
    pipeline: &Pipeline,
    readings: &[SensorReading],
    thresholds: &Thresholds,
) -> (TargetSet<ModelStrategy>, TrainingReport) {
    // ---
    let batch = pipeline.transform_batch(readings);
    info!(
        rows = batch.rows.len(),
        dropped_missing = batch.dropped.missing_field,
        dropped_out_of_domain = batch.dropped.out_of_domain,
        "Training batch prepared"
    );

    let mut models = TargetSet::from_fn(ModelStrategy::new);
    let mut targets = Vec::with_capacity(Target::ALL.len());

    for target in Target::ALL {
        let labels = RuleStrategy::new(target).label_rows(&batch.rows, thresholds);
        let model = models.get_mut(target);

        let report = match model.train(&batch.rows, &labels) {
            Ok(()) => TargetReport {
                target,
                trained: true,
                rule_agreement: agreement(model, &batch.rows, thresholds, |i, _| Some(labels[i])),
                label_agreement: agreement(model, &batch.rows, thresholds, |_, row| {
                    *row.labels.get(target)
                }),
            },
            Err(e) => {
                warn!(%target, error = %e, "Model training failed, target stays rule-only");
                TargetReport {
                    target,
                    trained: false,
                    rule_agreement: None,
                    label_agreement: None,
                }
            }
        };

        info!(
            %target,
            trained = report.trained,
            rule_agreement = ?report.rule_agreement,
            label_agreement = ?report.label_agreement,
            "Training report"
        );
        targets.push(report);
    }

    let report = TrainingReport {
        rows: batch.rows.len(),
        dropped: batch.dropped,
        targets,
    };
    (models, report)
}

fn agreement(
    model: &ModelStrategy,
    rows: &[FeatureRow],
    thresholds: &Thresholds,
    expected: impl Fn(usize, &FeatureRow) -> Option<bool>,
) -> Option<f64> {
    // ---
    let mut total = 0usize;
    let mut matched = 0usize;

    for (i, row) in rows.iter().enumerate() {
        let Some(want) = expected(i, row) else {
            continue;
        };
        let Ok(decision) = model.predict(row, thresholds) else {
            continue;
        };
        total += 1;
        if decision.signal.is_active() == want {
            matched += 1;
        }
    }

    (total > 0).then(|| matched as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn reading(moisture: f64, nitrogen: f64, temperature: f64) -> SensorReading {
        // ---
        SensorReading {
            soil_moisture_pct: Some(moisture),
            temperature_c: Some(temperature),
            humidity_pct: Some(55.0),
            nitrogen_mg_kg: Some(nitrogen),
            phosphorus_mg_kg: Some(35.0),
            potassium_mg_kg: Some(140.0),
            ph: Some(6.5),
            irrigation_label: Some(if moisture < 40.0 { "SI" } else { "NO" }.into()),
            ..SensorReading::default()
        }
    }

    #[test]
    fn test_models_imitate_rules() {
        // ---
        let readings: Vec<_> = (0..120)
            .map(|i| {
                let i = i as f64;
                reading(i % 100.0, 20.0 + (i * 7.0) % 60.0, 10.0 + (i * 3.0) % 30.0)
            })
            .collect();

        let (models, report) =
            train_models(&Pipeline::default(), &readings, &Thresholds::default());

        assert_eq!(report.rows, 120);
        assert_eq!(report.dropped.total(), 0);
        for target in Target::ALL {
            assert!(models.get(target).is_trained(), "{target} untrained");
        }

        let irrigation = &report.targets[0];
        assert_eq!(irrigation.target, Target::Irrigation);
        assert!(irrigation.rule_agreement.unwrap() > 0.9);
        assert!(irrigation.label_agreement.unwrap() > 0.9);
        assert_eq!(report.targets[2].label_agreement, None);
    }

    #[test]
    fn test_empty_dataset_leaves_models_untrained() {
        // ---
        let (models, report) = train_models(&Pipeline::default(), &[], &Thresholds::default());

        assert_eq!(report.rows, 0);
        assert!(report.targets.iter().all(|t| !t.trained));
        assert!(!models.irrigation.is_trained());
    }
}
