//! Decision orchestrator.
//!
//! One analyzer task consumes a single ordered subscription covering
//! `sensor-data` and `system-settings`. A settings patch is applied before
//! any reading published after it; each reading is advised against one
//! settings snapshot and published to `system-advice`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use crate::bus::{
    Message, MessageBus, Polled, Subscription, SENSOR_DATA, SYSTEM_ADVICE, SYSTEM_SETTINGS,
};
use crate::error::{AdvisorError, Result};
use crate::features::{FeatureRow, Pipeline};
use crate::models::{AdvisoryPacket, Decision, SensorReading, Target, TargetAdvice, TargetSet};
use crate::settings::{SettingsStore, Snapshot, ThresholdPatch};
use crate::source::parse_reading;
use crate::strategy::{ModelStrategy, RuleStrategy, Strategy};

// ---

pub struct Analyzer {
    settings: Arc<SettingsStore>,
    pipeline: Pipeline,
    rules: TargetSet<Box<dyn Strategy>>,
    models: TargetSet<Box<dyn Strategy>>,
}

impl Analyzer {
    pub fn new(
        settings: Arc<SettingsStore>,
        pipeline: Pipeline,
        models: TargetSet<ModelStrategy>,
    ) -> Self {
        // ---
        let TargetSet {
            irrigation,
            fertilization,
            energy,
        } = models;

        Self::with_strategies(
            settings,
            pipeline,
            TargetSet::from_fn(|t| Box::new(RuleStrategy::new(t)) as Box<dyn Strategy>),
            TargetSet {
                irrigation: Box::new(irrigation),
                fertilization: Box::new(fertilization),
                energy: Box::new(energy),
            },
        )
    }

    pub fn with_strategies(
        settings: Arc<SettingsStore>,
        pipeline: Pipeline,
        rules: TargetSet<Box<dyn Strategy>>,
        models: TargetSet<Box<dyn Strategy>>,
    ) -> Self {
        Self {
            settings,
            pipeline,
            rules,
            models,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn trained_targets(&self) -> Vec<Target> {
        Target::ALL
            .into_iter()
            .filter(|t| self.models.get(*t).is_trained())
            .collect()
    }

    /// Build the advisory packet for one reading. Never fails.
    pub fn advise(&self, reading: &SensorReading) -> AdvisoryPacket {
        // ---
        let snapshot = self.settings.get();
        let row = self.pipeline.transform_one(reading);

        let rules = TargetSet::from_fn(|t| rule_decision(&**self.rules.get(t), &row, &snapshot));
        let ai = TargetSet::from_fn(|t| model_decision(&**self.models.get(t), &row, &snapshot));

        let ts = row.ts.unwrap_or_else(now);
        let packet = AdvisoryPacket {
            ts,
            rules: TargetAdvice::from_decisions(rules),
            ai: TargetAdvice::from_decisions(ai),
            config: snapshot.thresholds.clone(),
            settings_updated: snapshot.overridden,
        };

        debug!(
            ts,
            irrigation = ?packet.rules.irrigation.status,
            energy = ?packet.rules.energy.status,
            n = ?packet.rules.fertilization.n,
            p = ?packet.rules.fertilization.p,
            k = ?packet.rules.fertilization.k,
            "Advisory built"
        );
        packet
    }

    /// Handle one inbound message. Returns the packet to publish, if any.
    #[instrument(level = "trace", skip_all, fields(topic = %message.topic))]
    pub fn handle(&self, message: &Message) -> Option<AdvisoryPacket> {
        // ---
        match message.topic.as_str() {
            SYSTEM_SETTINGS => {
                if let Err(e) = apply_settings_payload(&self.settings, &message.payload) {
                    warn!(error = %e, "Settings patch rejected, keeping previous thresholds");
                }
                None
            }
            SENSOR_DATA => match parse_reading(&message.payload) {
                Some(reading) => Some(self.advise(&reading)),
                None => {
                    warn!("Skipping reading payload that is not a JSON object");
                    None
                }
            },
            other => {
                debug!(topic = other, "Ignoring message on unexpected topic");
                None
            }
        }
    }

    /// Consume until the subscription closes.
    pub async fn run(
        self,
        mut subscription: Subscription,
        bus: MessageBus,
        poll_timeout: Duration,
    ) {
        // ---
        info!(models = ?self.trained_targets(), "Analyzer listening");
        loop {
            let message = match subscription.poll(poll_timeout).await {
                Polled::Message(message) => message,
                Polled::Idle => {
                    trace!("No inbound message within poll timeout");
                    continue;
                }
                Polled::Closed => {
                    info!("Inbound subscription closed, analyzer stopping");
                    return;
                }
            };

            let Some(packet) = self.handle(&message) else {
                continue;
            };
            match bus.publish_json(SYSTEM_ADVICE, &packet) {
                Ok(subscribers) => trace!(subscribers, ts = packet.ts, "Advisory published"),
                Err(e) => warn!(error = %e, "Failed to publish advisory"),
            }
        }
    }
}

/// Parse and apply one `system-settings` payload.
pub fn apply_settings_payload(store: &SettingsStore, payload: &str) -> Result<Arc<Snapshot>> {
    // ---
    let patch = ThresholdPatch::from_json(payload)?;
    store.apply(&patch)
}

fn rule_decision(strategy: &dyn Strategy, row: &FeatureRow, snapshot: &Snapshot) -> Decision {
    // ---
    let target = strategy.target();
    strategy.predict(row, &snapshot.thresholds).unwrap_or_else(|e| {
        warn!(%target, error = %e, "Rule evaluation failed");
        Decision::inactive(target, format!("rules unavailable: {e}"))
    })
}

fn model_decision(strategy: &dyn Strategy, row: &FeatureRow, snapshot: &Snapshot) -> Decision {
    // ---
    let target = strategy.target();
    if row.is_empty() {
        return Decision::inactive(target, "no sensor values");
    }

    match strategy.predict(row, &snapshot.thresholds) {
        Ok(decision) => decision,
        Err(e) => {
            if e == AdvisorError::NotTrained {
                debug!(%target, strategy = strategy.name(), "Model not trained");
            } else {
                warn!(%target, strategy = strategy.name(), error = %e, "Model prediction failed");
            }
            Decision::inactive(target, format!("model unavailable: {e}"))
        }
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{NutrientLevel, SwitchStatus};
    use crate::settings::Thresholds;
    use crate::training::train_models;

    fn thresholds_with_moisture(limit: f64) -> Thresholds {
        Thresholds {
            moisture_threshold: limit,
            ..Thresholds::default()
        }
    }

    fn untrained() -> Analyzer {
        Analyzer::new(
            Arc::new(SettingsStore::default()),
            Pipeline::default(),
            TargetSet::from_fn(ModelStrategy::new),
        )
    }

    fn reading_msg(json: &str) -> Message {
        Message {
            topic: SENSOR_DATA.into(),
            payload: json.into(),
        }
    }

    fn settings_msg(json: &str) -> Message {
        Message {
            topic: SYSTEM_SETTINGS.into(),
            payload: json.into(),
        }
    }

    const SCENARIO: &str = r#"{"ts": 1700000000, "Soil_moisture_pct": 25, "Nitrogen_mg_kg": 60,
        "Phosphorus_mg_kg": 40, "Potassium_mg_kg": 150, "Temperature_C": 22}"#;

    #[test]
    fn test_default_threshold_scenario() {
        // ---
        let packet = untrained().handle(&reading_msg(SCENARIO)).unwrap();

        assert_eq!(packet.ts, 1_700_000_000.0);
        assert_eq!(packet.rules.irrigation.status, SwitchStatus::On);
        assert_eq!(packet.rules.energy.status, SwitchStatus::Off);
        assert_eq!(packet.rules.fertilization.n, NutrientLevel::Ok);
        assert_eq!(packet.rules.fertilization.p, NutrientLevel::Ok);
        assert_eq!(packet.rules.fertilization.k, NutrientLevel::Ok);
        assert_eq!(packet.config, Thresholds::default());
        assert!(!packet.settings_updated);
    }

    #[test]
    fn test_untrained_models_degrade_to_off() {
        // ---
        let packet = untrained().handle(&reading_msg(SCENARIO)).unwrap();

        assert_eq!(packet.ai.irrigation.status, SwitchStatus::Off);
        assert_eq!(packet.ai.irrigation.reason, "model unavailable: model not trained");
        assert_eq!(packet.ai.fertilization.n, NutrientLevel::Ok);
    }

    #[test]
    fn test_patch_applies_to_readings_after_it() {
        // ---
        let analyzer = untrained();
        let reading = r#"{"ts": 1, "Soil_moisture_pct": 35}"#;

        let before = analyzer.handle(&reading_msg(reading)).unwrap();
        assert!(analyzer.handle(&settings_msg(r#"{"moisture_threshold": 30}"#)).is_none());
        let after = analyzer.handle(&reading_msg(reading)).unwrap();

        assert_eq!(before.rules.irrigation.status, SwitchStatus::On);
        assert_eq!(after.rules.irrigation.status, SwitchStatus::Off);
        assert_eq!(after.config, thresholds_with_moisture(30.0));
        assert!(after.settings_updated);
    }

    #[test]
    fn test_rejected_patch_keeps_thresholds() {
        // ---
        let analyzer = untrained();
        analyzer.handle(&settings_msg(r#"{"moisture_threshold": "wet"}"#));
        analyzer.handle(&settings_msg("[1, 2]"));

        let snapshot = analyzer.settings().get();
        assert_eq!(snapshot.thresholds, Thresholds::default());
        assert!(!snapshot.overridden);
    }

    #[test]
    fn test_replay_is_byte_identical() {
        // ---
        let analyzer = untrained();
        let a = serde_json::to_string(&analyzer.handle(&reading_msg(SCENARIO)).unwrap()).unwrap();
        let b = serde_json::to_string(&analyzer.handle(&reading_msg(SCENARIO)).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_reading_is_all_off() {
        // ---
        let packet = untrained().handle(&reading_msg("{}")).unwrap();

        assert!(packet.ts > 0.0);
        for advice in [&packet.rules, &packet.ai] {
            assert_eq!(advice.irrigation.status, SwitchStatus::Off);
            assert_eq!(advice.energy.status, SwitchStatus::Off);
            assert_eq!(advice.fertilization.n, NutrientLevel::Ok);
            assert_eq!(advice.fertilization.p, NutrientLevel::Ok);
            assert_eq!(advice.fertilization.k, NutrientLevel::Ok);
        }
        assert_eq!(packet.ai.energy.reason, "no sensor values");
    }

    #[test]
    fn test_non_object_payloads_are_skipped() {
        // ---
        let analyzer = untrained();
        assert!(analyzer.handle(&reading_msg("17")).is_none());
        assert!(analyzer.handle(&reading_msg("garbage")).is_none());
        assert!(analyzer
            .handle(&Message {
                topic: "elsewhere".into(),
                payload: "{}".into(),
            })
            .is_none());
    }

    struct Broken(Target);

    impl Strategy for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn target(&self) -> Target {
            self.0
        }
        fn train(&mut self, _rows: &[FeatureRow], _labels: &[bool]) -> Result<()> {
            Ok(())
        }
        fn predict(&self, _row: &FeatureRow, _th: &Thresholds) -> Result<Decision> {
            Err(AdvisorError::Training("diverged".into()))
        }
    }

    #[test]
    fn test_model_failure_is_isolated_per_target() {
        // ---
        let readings: Vec<SensorReading> = (0..60)
            .map(|i| SensorReading {
                soil_moisture_pct: Some(i as f64 * 1.5),
                temperature_c: Some(22.0),
                humidity_pct: Some(50.0),
                nitrogen_mg_kg: Some(60.0),
                phosphorus_mg_kg: Some(40.0),
                potassium_mg_kg: Some(150.0),
                ph: Some(6.5),
                ..SensorReading::default()
            })
            .collect();
        let (mut trained, _) =
            train_models(&Pipeline::default(), &readings, &Thresholds::default());

        let analyzer = Analyzer::with_strategies(
            Arc::new(SettingsStore::default()),
            Pipeline::default(),
            TargetSet::from_fn(|t| Box::new(RuleStrategy::new(t)) as Box<dyn Strategy>),
            TargetSet {
                irrigation: Box::new(std::mem::replace(
                    &mut trained.irrigation,
                    ModelStrategy::new(Target::Irrigation),
                )),
                fertilization: Box::new(Broken(Target::Fertilization)),
                energy: Box::new(Broken(Target::Energy)),
            },
        );

        let packet = analyzer.handle(&reading_msg(SCENARIO)).unwrap();
        assert_eq!(packet.rules.irrigation.status, SwitchStatus::On);
        assert_eq!(packet.ai.irrigation.status, SwitchStatus::On);
        assert!(packet.ai.irrigation.reason.starts_with("logistic regression"));
        assert_eq!(packet.ai.energy.status, SwitchStatus::Off);
        assert_eq!(packet.ai.energy.reason, "model unavailable: training failed: diverged");
        assert_eq!(analyzer.trained_targets().len(), 3);
    }

    #[tokio::test]
    async fn test_run_publishes_advice_in_order() {
        // ---
        let bus = MessageBus::new();
        let inbound = bus.subscribe(&[SENSOR_DATA, SYSTEM_SETTINGS]);
        let mut advice = bus.subscribe(&[SYSTEM_ADVICE]);

        bus.publish(SENSOR_DATA, r#"{"ts": 1, "Soil_moisture_pct": 35}"#).unwrap();
        bus.publish(SYSTEM_SETTINGS, r#"{"moisture_threshold": 30}"#).unwrap();
        bus.publish(SENSOR_DATA, r#"{"ts": 2, "Soil_moisture_pct": 35}"#).unwrap();

        let task = tokio::spawn(untrained().run(inbound, bus.clone(), Duration::from_millis(10)));

        let mut statuses = Vec::new();
        for _ in 0..2 {
            let Polled::Message(m) = advice.poll(Duration::from_secs(2)).await else {
                panic!("no advisory published");
            };
            let packet: AdvisoryPacket = serde_json::from_str(&m.payload).unwrap();
            statuses.push((packet.ts, packet.rules.irrigation.status));
        }
        task.abort();

        assert_eq!(statuses, vec![(1.0, SwitchStatus::On), (2.0, SwitchStatus::Off)]);
    }
}
