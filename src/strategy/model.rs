//! Logistic-regression strategy.
//!
//! Inputs are standardized with the training means and standard deviations,
//! then fitted with plain batch gradient descent from a zero start. No
//! randomness is involved, so the same training set always yields the same
//! weights.

use tracing::{debug, info};

use crate::error::{AdvisorError, Result};
use crate::features::{Feature, FeatureRow, MODEL_FEATURES};
use crate::models::{Decision, Signal, Target};
use crate::settings::Thresholds;

use super::Strategy;

// ---

pub const MAX_ITER: usize = 500;
const LEARNING_RATE: f64 = 0.5;
const L2_PENALTY: f64 = 1e-3;
const TOLERANCE: f64 = 1e-6;

/// Fitted parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticModel {
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Set when every training label was the same; predictions are fixed.
    pub constant: Option<bool>,
    pub iterations: usize,
}

impl LogisticModel {
    /// Fit on row-major samples `x` with boolean labels `y`.
    pub fn fit(x: &[Vec<f64>], y: &[bool], max_iter: usize) -> Result<Self> {
        // ---
        if x.is_empty() {
            return Err(AdvisorError::Training("no training samples".into()));
        }
        if x.len() != y.len() {
            return Err(AdvisorError::Training(format!(
                "{} samples but {} labels",
                x.len(),
                y.len()
            )));
        }

        let n = x.len() as f64;
        let dim = x[0].len();
        if x.iter().any(|row| row.len() != dim) {
            return Err(AdvisorError::Training("ragged feature matrix".into()));
        }

        let mut means = vec![0.0; dim];
        for row in x {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut std_devs = vec![0.0; dim];
        for row in x {
            for ((s, v), m) in std_devs.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut std_devs {
            *s = (*s / n).sqrt();
            if *s < 1e-6 {
                *s = 1.0;
            }
        }

        let positives = y.iter().filter(|l| **l).count();
        if positives == 0 || positives == y.len() {
            return Ok(Self {
                means,
                std_devs,
                weights: vec![0.0; dim],
                bias: 0.0,
                constant: Some(positives > 0),
                iterations: 0,
            });
        }

        let mut model = Self {
            means,
            std_devs,
            weights: vec![0.0; dim],
            bias: 0.0,
            constant: None,
            iterations: 0,
        };
        let z: Vec<Vec<f64>> = x.iter().map(|row| model.standardize(row)).collect();

        for iter in 0..max_iter {
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;

            for (row, label) in z.iter().zip(y) {
                let err = sigmoid(model.logit(row)) - if *label { 1.0 } else { 0.0 };
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }

            let mut max_step: f64 = 0.0;
            for (w, g) in model.weights.iter_mut().zip(&grad_w) {
                let step = LEARNING_RATE * (g / n + L2_PENALTY * *w);
                *w -= step;
                max_step = max_step.max(step.abs());
            }
            let step_b = LEARNING_RATE * grad_b / n;
            model.bias -= step_b;
            max_step = max_step.max(step_b.abs());

            model.iterations = iter + 1;
            if max_step < TOLERANCE {
                break;
            }
        }

        Ok(model)
    }

    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        // ---
        row.iter()
            .zip(self.means.iter().zip(&self.std_devs))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    fn logit(&self, z: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(z).map(|(w, v)| w * v).sum::<f64>()
    }

    /// Probability of the positive class for one raw sample.
    pub fn probability(&self, row: &[f64]) -> f64 {
        // ---
        match self.constant {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None => sigmoid(self.logit(&self.standardize(row))),
        }
    }
}

fn sigmoid(t: f64) -> f64 {
    1.0 / (1.0 + (-t).exp())
}

// ---

/// Statistical strategy for one target. Must be trained exactly once.
#[derive(Debug, Clone)]
pub struct ModelStrategy {
    target: Target,
    schema: Vec<Feature>,
    max_iter: usize,
    model: Option<LogisticModel>,
}

impl ModelStrategy {
    pub fn new(target: Target) -> Self {
        Self::with_schema(target, MODEL_FEATURES.to_vec(), MAX_ITER)
    }

    pub fn with_schema(target: Target, schema: Vec<Feature>, max_iter: usize) -> Self {
        Self {
            target,
            schema,
            max_iter,
            model: None,
        }
    }

    pub fn model(&self) -> Option<&LogisticModel> {
        self.model.as_ref()
    }
}

impl Strategy for ModelStrategy {
    fn name(&self) -> &'static str {
        "logistic_regression"
    }

    fn target(&self) -> Target {
        self.target
    }

    fn train(&mut self, rows: &[FeatureRow], labels: &[bool]) -> Result<()> {
        // ---
        if self.model.is_some() {
            return Err(AdvisorError::AlreadyTrained);
        }

        let x: Vec<Vec<f64>> = rows.iter().map(|r| r.vector(&self.schema)).collect();
        let model = LogisticModel::fit(&x, labels, self.max_iter)?;

        info!(
            target = %self.target,
            samples = rows.len(),
            iterations = model.iterations,
            constant = ?model.constant,
            "Model trained"
        );
        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, row: &FeatureRow, _thresholds: &Thresholds) -> Result<Decision> {
        // ---
        let model = self.model.as_ref().ok_or(AdvisorError::NotTrained)?;
        let p = model.probability(&row.vector(&self.schema));
        debug!(target = %self.target, p, "Model prediction");

        Ok(Decision {
            signal: Signal::Switch(p >= 0.5),
            reason: format!("logistic regression (p={p:.2})"),
        })
    }

    fn is_trained(&self) -> bool {
        self.model.is_some()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::features::Pipeline;
    use crate::models::SensorReading;

    fn moisture_row(m: f64) -> FeatureRow {
        // ---
        Pipeline::default().transform_one(&SensorReading {
            soil_moisture_pct: Some(m),
            temperature_c: Some(22.0),
            ..SensorReading::default()
        })
    }

    #[test]
    fn test_predict_before_train_fails() {
        // ---
        let strategy = ModelStrategy::new(Target::Irrigation);
        assert!(!strategy.is_trained());
        let err = strategy
            .predict(&moisture_row(10.0), &Thresholds::default())
            .unwrap_err();
        assert_eq!(err, AdvisorError::NotTrained);
    }

    #[test]
    fn test_learns_a_threshold() {
        // ---
        let rows: Vec<_> = (0..100).map(|m| moisture_row(m as f64)).collect();
        let labels: Vec<bool> = (0..100).map(|m| m < 40).collect();

        let mut strategy = ModelStrategy::new(Target::Irrigation);
        strategy.train(&rows, &labels).unwrap();

        let th = Thresholds::default();
        assert!(strategy.predict(&moisture_row(5.0), &th).unwrap().signal.is_active());
        assert!(!strategy.predict(&moisture_row(90.0), &th).unwrap().signal.is_active());
    }

    #[test]
    fn test_second_training_is_rejected() {
        // ---
        let rows = vec![moisture_row(10.0), moisture_row(80.0)];
        let mut strategy = ModelStrategy::new(Target::Irrigation);
        strategy.train(&rows, &[true, false]).unwrap();
        assert_eq!(
            strategy.train(&rows, &[true, false]).unwrap_err(),
            AdvisorError::AlreadyTrained
        );
    }

    #[test]
    fn test_single_class_gives_constant_model() {
        // ---
        let rows = vec![moisture_row(10.0), moisture_row(20.0)];
        let mut strategy = ModelStrategy::new(Target::Energy);
        strategy.train(&rows, &[false, false]).unwrap();

        assert_eq!(strategy.model().unwrap().constant, Some(false));
        let d = strategy.predict(&moisture_row(5.0), &Thresholds::default()).unwrap();
        assert_eq!(d.signal, Signal::Switch(false));
    }

    #[test]
    fn test_bad_training_input() {
        // ---
        let mut strategy = ModelStrategy::new(Target::Irrigation);
        assert!(matches!(strategy.train(&[], &[]), Err(AdvisorError::Training(_))));
        assert!(matches!(
            strategy.train(&[moisture_row(1.0)], &[true, false]),
            Err(AdvisorError::Training(_))
        ));
        assert!(!strategy.is_trained());
    }

    #[test]
    fn test_fit_is_deterministic() {
        // ---
        let x: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<bool> = (0..50).map(|i| i > 20).collect();

        let a = LogisticModel::fit(&x, &y, MAX_ITER).unwrap();
        let b = LogisticModel::fit(&x, &y, MAX_ITER).unwrap();
        assert_eq!(a, b);
    }
}
