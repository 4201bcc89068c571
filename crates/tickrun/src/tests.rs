//! Tests for subscriptions, configuration, and script discovery.

use std::time::Duration;

use crate::config::BridgeConfig;
use crate::config::fresh_token;
use crate::launch::discover_scripts;
use crate::session::TokenLedger;
use crate::subscribe::Priority;
use crate::subscribe::Subscription;
use crate::subscribe::SubscriptionSet;

fn subscription(event: &str) -> Subscription {
    Subscription {
        event: event.to_string(),
        once_per_tick: false,
        throttle_ms: 0,
        priority: Priority::Normal,
    }
}

#[test]
fn priority_parses_and_orders() {
    assert_eq!(Priority::parse(Some("low")), Priority::Low);
    assert_eq!(Priority::parse(Some("high")), Priority::High);
    assert_eq!(Priority::parse(Some("monitor")), Priority::Monitor);
    assert_eq!(Priority::parse(Some("garbage")), Priority::Normal);
    assert_eq!(Priority::parse(None), Priority::Normal);
    assert!(Priority::Low < Priority::Normal);
    assert!(Priority::High < Priority::Monitor);
}

#[test]
fn unsubscribed_events_are_not_delivered() {
    let set = SubscriptionSet::new();
    assert!(!set.should_deliver("player_join", 1));
    set.insert(subscription("player_join"));
    assert!(set.should_deliver("player_join", 1));
    assert!(!set.should_deliver("player_quit", 1));
}

#[test]
fn once_per_tick_limits_to_one_delivery() {
    let set = SubscriptionSet::new();
    set.insert(Subscription {
        once_per_tick: true,
        ..subscription("block_break")
    });
    assert!(set.should_deliver("block_break", 7));
    assert!(!set.should_deliver("block_break", 7));
    assert!(set.should_deliver("block_break", 8));
}

#[test]
fn throttle_blocks_rapid_deliveries() {
    let set = SubscriptionSet::new();
    set.insert(Subscription {
        throttle_ms: 500,
        ..subscription("player_move")
    });
    assert!(set.should_deliver("player_move", 1));
    assert!(!set.should_deliver("player_move", 2));
}

#[test]
fn resubscribing_replaces_the_filters() {
    let set = SubscriptionSet::new();
    set.insert(Subscription {
        throttle_ms: 500,
        ..subscription("player_move")
    });
    assert!(set.should_deliver("player_move", 1));
    set.insert(subscription("player_move"));
    assert!(set.should_deliver("player_move", 1));
    assert_eq!(set.priority_of("player_move"), Some(Priority::Normal));
}

#[test]
fn config_defaults_match_the_protocol_deadlines() {
    let config = BridgeConfig::default();
    assert_eq!(config.event_wait, Duration::from_millis(1000));
    assert_eq!(config.batch_event_wait, Duration::from_millis(100));
    assert_eq!(config.shutdown_ack_timeout, Duration::from_secs(10));
    assert_eq!(config.kill_grace, Duration::from_secs(2));
    assert_eq!(config.connect_timeout, Duration::from_secs(30));
    assert_eq!(config.port, 0);
}

#[test]
fn tokens_are_unique_per_session() {
    assert_ne!(fresh_token(), fresh_token());
}

#[test]
fn issued_tokens_redeem_exactly_once() {
    let ledger = TokenLedger::new();
    let a = ledger.issue();
    let b = ledger.issue();
    assert_ne!(a, b);
    assert_eq!(ledger.outstanding(), 2);

    assert!(ledger.redeem(&a));
    assert!(!ledger.redeem(&a));
    assert!(!ledger.redeem("never-issued"));

    assert!(ledger.revoke(&b));
    assert!(!ledger.revoke(&b));
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn discovery_skips_helpers_and_other_extensions() {
    let dir = std::env::temp_dir().join(format!("tickrun-discovery-{}", fresh_token()));
    std::fs::create_dir_all(&dir).unwrap();
    for name in ["b.py", "a.py", "_helper.py", "notes.txt"] {
        std::fs::write(dir.join(name), "").unwrap();
    }

    let scripts = discover_scripts(&dir, "py").unwrap();
    let names: Vec<_> = scripts
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["a.py", "b.py"]);

    std::fs::remove_dir_all(&dir).unwrap();
}
