use super::*;
use std::collections::HashMap;

fn from_pairs(pairs: &[(&str, &str)]) -> RelayConfig {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    RelayConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn empty_environment_uses_defaults() {
    let cfg = from_pairs(&[]);
    assert_eq!(cfg, RelayConfig::default());
    assert_eq!(cfg.socket_addr().to_string(), "0.0.0.0:3000");
    assert!(!cfg.evict_empty);
}

#[test]
fn parses_overrides() {
    let cfg = from_pairs(&[
        ("PORT", "8080"),
        ("BIND_ADDR", "127.0.0.1"),
        ("RELAY_CLIENT_CHANNEL_CAPACITY", "16"),
        ("RELAY_MAX_VALUE_BYTES", "1024"),
        ("RELAY_EVICT_EMPTY", "true"),
    ]);
    assert_eq!(cfg.socket_addr().to_string(), "127.0.0.1:8080");
    assert_eq!(cfg.client_channel_capacity, 16);
    assert_eq!(cfg.max_value_bytes, 1024);
    assert!(cfg.evict_empty);
}

#[test]
fn garbage_falls_back_to_defaults() {
    let cfg = from_pairs(&[("PORT", "http"), ("BIND_ADDR", "localhost"), ("RELAY_EVICT_EMPTY", "maybe")]);
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.bind_addr, RelayConfig::default().bind_addr);
    assert!(!cfg.evict_empty);
}

#[test]
fn zero_channel_capacity_is_clamped() {
    let cfg = from_pairs(&[("RELAY_CLIENT_CHANNEL_CAPACITY", "0")]);
    assert_eq!(cfg.client_channel_capacity, 1);
}
