//! Predictors behind one contract.
//!
//! The analyzer holds a [`RuleStrategy`] and a [`ModelStrategy`] for every
//! [`Target`] and calls both through [`Strategy`], without caring which one it
//! is talking to.

use crate::error::Result;
use crate::features::FeatureRow;
use crate::models::{Decision, Target};
use crate::settings::Thresholds;

mod model;
mod rules;

pub use model::{LogisticModel, ModelStrategy, MAX_ITER};
pub use rules::RuleStrategy;

// ---

pub trait Strategy: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    fn target(&self) -> Target;

    /// Fit on transformed rows and their labels.
    fn train(&mut self, rows: &[FeatureRow], labels: &[bool]) -> Result<()>;

    /// Classify one transformed row under `thresholds`.
    fn predict(&self, row: &FeatureRow, thresholds: &Thresholds) -> Result<Decision>;

    fn is_trained(&self) -> bool {
        true
    }
}
