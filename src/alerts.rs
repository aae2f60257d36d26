//! Alert aggregation state machine.
//!
//! ```text
//!            rising edge
//!   Idle ─────────────────▶ Monitoring { countdown: 10, reasons }
//!    ▲                          │   ▲
//!    │                          │   │ rising edge: reasons ∪= edge
//!    │   countdown hits 0       │   │ (countdown untouched)
//!    └──── emit notification ◀──┘───┘
//! ```
//!
//! Every advisory packet is one cycle. The cycle that opens the window does
//! not count down; each later cycle does, so a window opened at cycle `k`
//! closes, and notifies, at cycle `k + 10`. Edges are tracked per signal
//! (irrigation, energy, N, P, K): a signal that stays active raises no new
//! edge until it has dropped back first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{Polled, Subscription};
use crate::models::{AdvisoryPacket, Target};
use crate::notify::NotificationSink;

// ---

/// Cycles between the opening edge and the notification.
pub const WINDOW_CYCLES: u32 = 10;
pub const HISTORY_LEN: usize = 15;

/// Rule-based signal states taken from one packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalSnapshot {
    pub irrigation: bool,
    pub energy: bool,
    pub n: bool,
    pub p: bool,
    pub k: bool,
}

impl SignalSnapshot {
    pub fn from_packet(packet: &AdvisoryPacket) -> Self {
        // ---
        let rules = &packet.rules;
        Self {
            irrigation: rules.irrigation.status.is_active(),
            energy: rules.energy.status.is_active(),
            n: rules.fertilization.n.is_deficient(),
            p: rules.fertilization.p.is_deficient(),
            k: rules.fertilization.k.is_deficient(),
        }
    }

    /// Alert tags for every signal that went inactive → active.
    pub fn rising_edges(&self, next: &SignalSnapshot) -> Vec<&'static str> {
        // ---
        let rose = |before: bool, after: bool| !before && after;
        let mut tags = Vec::new();

        if rose(self.irrigation, next.irrigation) {
            tags.push(Target::Irrigation.alert_tag());
        }
        if rose(self.energy, next.energy) {
            tags.push(Target::Energy.alert_tag());
        }
        if rose(self.n, next.n) || rose(self.p, next.p) || rose(self.k, next.k) {
            tags.push(Target::Fertilization.alert_tag());
        }
        tags
    }
}

/// Last [`HISTORY_LEN`] packets, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    items: VecDeque<AdvisoryPacket>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, packet: AdvisoryPacket) {
        // ---
        self.items.push_back(packet);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<AdvisoryPacket> {
        self.items.iter().cloned().collect()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(HISTORY_LEN)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertWindow {
    Idle,
    Monitoring {
        countdown: u32,
        /// Accumulated tags, first-seen order, no duplicates.
        reasons: Vec<String>,
        opened_at: f64,
    },
}

/// One coalesced report for a closed window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub reasons: Vec<String>,
    pub history: Vec<AdvisoryPacket>,
    pub opened_at: f64,
    pub closed_at: f64,
}

/// Single consumer of the advisory stream.
#[derive(Debug, Clone)]
pub struct AlertAggregator {
    window: AlertWindow,
    previous: SignalSnapshot,
    history: HistoryBuffer,
}

impl Default for AlertAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertAggregator {
    pub fn new() -> Self {
        Self {
            window: AlertWindow::Idle,
            previous: SignalSnapshot::default(),
            history: HistoryBuffer::default(),
        }
    }

    pub fn window(&self) -> &AlertWindow {
        &self.window
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Advance one cycle. Returns the notification when a window closes.
    pub fn observe(&mut self, packet: AdvisoryPacket) -> Option<Notification> {
        // ---
        let current = SignalSnapshot::from_packet(&packet);
        let edges = self.previous.rising_edges(&current);
        self.previous = current;

        let ts = packet.ts;
        let recipient = packet.config.email.clone();
        self.history.push(packet);

        match &mut self.window {
            AlertWindow::Idle => {
                if !edges.is_empty() {
                    info!(?edges, countdown = WINDOW_CYCLES, "New alert window opened");
                    let mut reasons = Vec::new();
                    merge(&mut reasons, &edges);
                    self.window = AlertWindow::Monitoring {
                        countdown: WINDOW_CYCLES,
                        reasons,
                        opened_at: ts,
                    };
                }
                None
            }
            AlertWindow::Monitoring {
                countdown,
                reasons,
                opened_at,
            } => {
                if !edges.is_empty() {
                    info!(?edges, countdown = *countdown, "Overlapping edge joined open window");
                    merge(reasons, &edges);
                }

                *countdown = countdown.saturating_sub(1);
                debug!(remaining = *countdown, "Alert window countdown");
                if *countdown > 0 {
                    return None;
                }

                let notification = Notification {
                    recipient,
                    reasons: std::mem::take(reasons),
                    history: self.history.snapshot(),
                    opened_at: *opened_at,
                    closed_at: ts,
                };
                self.window = AlertWindow::Idle;
                info!(reasons = ?notification.reasons, "Alert window closed");
                Some(notification)
            }
        }
    }

    /// Consume `system-advice` until the bus closes.
    pub async fn run(
        mut self,
        mut subscription: Subscription,
        sink: Arc<dyn NotificationSink>,
        poll_timeout: Duration,
    ) {
        // ---
        info!("Alert aggregator listening");
        loop {
            let message = match subscription.poll(poll_timeout).await {
                Polled::Message(message) => message,
                Polled::Idle => {
                    trace!("No advisory within poll timeout");
                    continue;
                }
                Polled::Closed => {
                    info!("Advisory subscription closed, aggregator stopping");
                    return;
                }
            };

            let packet: AdvisoryPacket = match serde_json::from_str(&message.payload) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed advisory packet");
                    continue;
                }
            };

            if let Some(notification) = self.observe(packet) {
                match sink.deliver(&notification).await {
                    Ok(()) => info!(recipient = %notification.recipient, "Notification delivered"),
                    Err(e) => error!(error = %e, "Notification delivery failed"),
                }
            }
        }
    }
}

fn merge(reasons: &mut Vec<String>, tags: &[&str]) {
    // ---
    for tag in tags {
        if !reasons.iter().any(|r| r == tag) {
            reasons.push((*tag).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::bus::{MessageBus, SYSTEM_ADVICE};
    use crate::error::{AdvisorError, Result};
    use crate::models::{NutrientLevel, SwitchStatus};

    /// Counts every delivery attempt and rejects all of them.
    #[derive(Default)]
    struct DownSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for DownSink {
        async fn deliver(&self, _notification: &Notification) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AdvisorError::SinkUnavailable("smtp relay down".into()))
        }
    }

    fn packet(ts: f64, irrigation: bool, energy: bool, n_low: bool) -> AdvisoryPacket {
        // ---
        let mut p = AdvisoryPacket {
            ts,
            ..AdvisoryPacket::default()
        };
        if irrigation {
            p.rules.irrigation.status = SwitchStatus::On;
        }
        if energy {
            p.rules.energy.status = SwitchStatus::Active;
        }
        if n_low {
            p.rules.fertilization.n = NutrientLevel::Low;
        }
        p
    }

    fn quiet(ts: f64) -> AdvisoryPacket {
        packet(ts, false, false, false)
    }

    #[test]
    fn test_rising_edges_per_signal() {
        // ---
        let off = SignalSnapshot::default();
        let on = SignalSnapshot {
            irrigation: true,
            energy: true,
            n: false,
            p: true,
            k: true,
        };

        assert_eq!(off.rising_edges(&on), vec!["IRRIGATION", "ENERGY", "FERTILIZATION"]);
        assert!(on.rising_edges(&on).is_empty());
        assert!(on.rising_edges(&off).is_empty());

        let n_rises = SignalSnapshot { n: true, ..on };
        assert_eq!(on.rising_edges(&n_rises), vec!["FERTILIZATION"]);
    }

    #[test]
    fn test_window_closes_exactly_ten_cycles_later() {
        // ---
        let mut agg = AlertAggregator::new();
        assert!(agg.observe(packet(1.0, true, false, false)).is_none());

        for cycle in 2..=10 {
            assert!(agg.observe(packet(cycle as f64, true, false, false)).is_none());
        }
        let n = agg.observe(packet(11.0, true, false, false)).unwrap();

        assert_eq!(n.reasons, vec!["IRRIGATION"]);
        assert_eq!(n.opened_at, 1.0);
        assert_eq!(n.closed_at, 11.0);
        assert_eq!(n.history.len(), 11);
        assert_eq!(agg.window(), &AlertWindow::Idle);
    }

    #[test]
    fn test_overlapping_edges_do_not_extend_window() {
        // ---
        let mut agg = AlertAggregator::new();
        let mut emitted = Vec::new();

        let script = [
            (true, false, false),  // 1: irrigation rises, window opens
            (true, false, false),
            (true, false, false),
            (true, true, false),   // 4: energy rises, joins
            (true, true, false),
            (false, true, true),   // 6: nitrogen rises, joins
            (true, true, true),    // 7: irrigation rises again, already a reason
            (true, true, true),
            (true, true, true),
            (true, true, true),
            (true, true, true),    // 11: window closes
            (true, true, true),
        ];
        for (i, (irr, nrg, n)) in script.iter().enumerate() {
            if let Some(note) = agg.observe(packet((i + 1) as f64, *irr, *nrg, *n)) {
                emitted.push((i + 1, note));
            }
        }

        assert_eq!(emitted.len(), 1);
        let (cycle, note) = &emitted[0];
        assert_eq!(*cycle, 11);
        assert_eq!(note.reasons, vec!["IRRIGATION", "ENERGY", "FERTILIZATION"]);
    }

    #[test]
    fn test_steady_signal_opens_one_window_only() {
        // ---
        let mut agg = AlertAggregator::new();
        let notes: Vec<_> = (1..=40)
            .filter_map(|c| agg.observe(packet(c as f64, true, false, false)))
            .collect();
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn test_edge_after_close_opens_new_window() {
        // ---
        let mut agg = AlertAggregator::new();
        agg.observe(packet(1.0, true, false, false));
        for c in 2..=10 {
            agg.observe(quiet(c as f64));
        }
        assert!(agg.observe(quiet(11.0)).is_some());

        agg.observe(packet(12.0, false, true, false));
        assert!(matches!(
            agg.window(),
            AlertWindow::Monitoring { countdown: 10, .. }
        ));
    }

    #[test]
    fn test_history_is_bounded() {
        // ---
        let mut agg = AlertAggregator::new();
        for c in 1..=40 {
            agg.observe(quiet(c as f64));
        }
        let history = agg.history().snapshot();
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history[0].ts, 26.0);
        assert_eq!(history[HISTORY_LEN - 1].ts, 40.0);
    }

    #[test]
    fn test_recipient_comes_from_closing_packet() {
        // ---
        let mut agg = AlertAggregator::new();
        agg.observe(packet(1.0, true, false, false));
        for c in 2..=10 {
            agg.observe(quiet(c as f64));
        }
        let mut last = quiet(11.0);
        last.config.email = "night-shift@farm.io".into();

        assert_eq!(agg.observe(last).unwrap().recipient, "night-shift@farm.io");
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_stop_later_windows() {
        // ---
        let bus = MessageBus::new();
        let subscription = bus.subscribe(&[SYSTEM_ADVICE]);
        let sink = Arc::new(DownSink::default());

        // Edges at cycles 1 and 15; windows close at 11 and 25.
        for cycle in 1..=30 {
            let irrigation = matches!(cycle, 1..=3 | 15..=17);
            let p = packet(cycle as f64, irrigation, false, false);
            bus.publish_json(SYSTEM_ADVICE, &p).unwrap();
        }
        drop(bus);

        AlertAggregator::new()
            .run(subscription, sink.clone(), Duration::from_millis(5))
            .await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    }
}
