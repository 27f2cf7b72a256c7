//! Relay configuration parsed from environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::warn;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_MAX_VALUE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    pub bind_addr: IpAddr,
    /// Outbound frames buffered per client before broadcasts to it are dropped.
    pub client_channel_capacity: usize,
    /// Largest accepted `map:set` value, measured as serialized JSON.
    pub max_value_bytes: usize,
    /// Drop a container's state once its last client leaves.
    pub evict_empty: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            evict_empty: false,
        }
    }
}

impl RelayConfig {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `BIND_ADDR`: default `0.0.0.0`
    /// - `RELAY_CLIENT_CHANNEL_CAPACITY`: default 256
    /// - `RELAY_MAX_VALUE_BYTES`: default 65536
    /// - `RELAY_EVICT_EMPTY`: `true`/`false`, default false
    ///
    /// Unparseable values fall back to the default with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or("PORT", lookup("PORT"), defaults.port),
            bind_addr: parse_or("BIND_ADDR", lookup("BIND_ADDR"), defaults.bind_addr),
            client_channel_capacity: parse_or(
                "RELAY_CLIENT_CHANNEL_CAPACITY",
                lookup("RELAY_CLIENT_CHANNEL_CAPACITY"),
                defaults.client_channel_capacity,
            )
            .max(1),
            max_value_bytes: parse_or("RELAY_MAX_VALUE_BYTES", lookup("RELAY_MAX_VALUE_BYTES"), defaults.max_value_bytes),
            evict_empty: parse_bool("RELAY_EVICT_EMPTY", lookup("RELAY_EVICT_EMPTY"), defaults.evict_empty),
        }
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        warn!(key, value = %raw, "config: unparseable value, using default");
        default
    })
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> bool {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(key, value = %raw, "config: unparseable flag, using default");
            default
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
