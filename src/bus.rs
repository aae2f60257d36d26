//! In-process ordered publish/subscribe bus.
//!
//! Stands in for the external broker at its boundary: named topics, JSON
//! payloads, every subscriber sees every message of its topics in publish
//! order. Publishing holds the registry lock, so two subscribers never observe
//! two messages in different orders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{AdvisorError, Result};

// ---

pub const SENSOR_DATA: &str = "sensor-data";
pub const SYSTEM_SETTINGS: &str = "system-settings";
pub const SYSTEM_ADVICE: &str = "system-advice";

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

type Registry = HashMap<String, Vec<mpsc::UnboundedSender<Message>>>;

/// Cloneable handle to one bus instance.
#[derive(Clone, Default)]
pub struct MessageBus {
    topics: Arc<Mutex<Registry>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open one ordered subscription covering all of `topics`.
    pub fn subscribe(&self, topics: &[&str]) -> Subscription {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            registry
                .entry((*topic).to_string())
                .or_default()
                .push(tx.clone());
        }
        Subscription { rx }
    }

    /// Deliver `payload` to every live subscriber of `topic`.
    ///
    /// Returns how many subscribers received it. Publishing to a topic with
    /// no subscribers is not an error.
    pub fn publish(&self, topic: &str, payload: impl Into<String>) -> Result<usize> {
        // ---
        let message = Message {
            topic: topic.to_string(),
            payload: payload.into(),
        };

        let mut registry = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = registry.get_mut(topic) else {
            trace!(topic, "No subscribers");
            return Ok(0);
        };
        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(subscribers.len())
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> Result<usize> {
        // ---
        let payload =
            serde_json::to_string(value).map_err(|e| AdvisorError::Bus(e.to_string()))?;
        self.publish(topic, payload)
    }
}

/// Outcome of one bounded wait on a subscription.
#[derive(Debug, PartialEq)]
pub enum Polled {
    Message(Message),
    /// Nothing arrived within the timeout.
    Idle,
    /// The bus is gone; nothing more will arrive.
    Closed,
}

pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    /// Wait at most `timeout` for the next message.
    pub async fn poll(&mut self, timeout: Duration) -> Polled {
        // ---
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Polled::Message(message),
            Ok(None) => Polled::Closed,
            Err(_) => Polled::Idle,
        }
    }

    /// Take an already-delivered message without waiting.
    pub fn try_next(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}
