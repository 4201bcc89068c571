//! # Event Subscriptions
//!
//! Which events a session wants and how often it is willing to receive
//! them. Delivery filters are evaluated host-side so an uninterested or
//! rate-limited script costs nothing per event.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;

/// Handler ordering across sessions for one event. Higher runs later and
/// therefore gets the last word, with `Monitor` observing only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Monitor,
}

impl Priority {
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            Some("low") => Self::Low,
            Some("high") => Self::High,
            Some("monitor") => Self::Monitor,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub event: String,
    /// At most one delivery per tick.
    pub once_per_tick: bool,
    /// Minimum milliseconds between deliveries. Zero disables throttling.
    pub throttle_ms: u64,
    pub priority: Priority,
}

/// All subscriptions of one session, plus per-event delivery state.
#[derive(Default)]
pub struct SubscriptionSet {
    subscriptions: DashMap<String, Subscription>,
    delivered: Mutex<HashMap<String, Delivery>>,
}

struct Delivery {
    tick: u64,
    at: Instant,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-subscribing replaces the filters.
    pub fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.event.clone(), subscription);
    }

    pub fn priority_of(&self, event: &str) -> Option<Priority> {
        self.subscriptions.get(event).map(|s| s.priority)
    }

    /// Whether this session should receive `event` now, and if so, record
    /// the delivery.
    pub fn should_deliver(&self, event: &str, tick: u64) -> bool {
        let Some(subscription) = self.subscriptions.get(event) else {
            return false;
        };
        let now = Instant::now();
        let mut delivered = self.delivered.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = delivered.get(event) {
            if subscription.once_per_tick && last.tick == tick {
                return false;
            }
            if subscription.throttle_ms > 0
                && now.duration_since(last.at).as_millis() < subscription.throttle_ms as u128
            {
                return false;
            }
        }
        delivered.insert(event.to_string(), Delivery { tick, at: now });
        true
    }
}
