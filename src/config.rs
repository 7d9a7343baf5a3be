use std::env;

use tracing::warn;

/// Selects the router URL.
pub const ROUTER_ENV: &str = "AUTOBAHN_DEMO_ROUTER";
pub const DEFAULT_ROUTER_URL: &str = "ws://127.0.0.1:8080/ws";
pub const REALM: &str = "realm1";

/// Number of events `wamp-publish` sends before leaving.
pub const PUBLISH_COUNT_ENV: &str = "WAMP_PUBLISH_COUNT";
pub const DEFAULT_PUBLISH_COUNT: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    pub url: String,
    pub realm: String,
}

impl RouterConfig {
    pub fn from_env() -> Self {
        Self::from_router_var(env::var(ROUTER_ENV).ok())
    }

    /// Builds the config from the raw value of [`ROUTER_ENV`]; a set value
    /// is used as-is.
    pub fn from_router_var(value: Option<String>) -> Self {
        RouterConfig {
            url: value.unwrap_or_else(|| DEFAULT_ROUTER_URL.to_string()),
            realm: REALM.to_string(),
        }
    }
}

pub fn publish_count_from_env() -> u64 {
    publish_count_from_var(env::var(PUBLISH_COUNT_ENV).ok())
}

pub fn publish_count_from_var(value: Option<String>) -> u64 {
    match value {
        None => DEFAULT_PUBLISH_COUNT,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, "{PUBLISH_COUNT_ENV} is not a number, using {DEFAULT_PUBLISH_COUNT}");
            DEFAULT_PUBLISH_COUNT
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_defaults_to_local_websocket() {
        let config = RouterConfig::from_router_var(None);
        assert_eq!(config.url, "ws://127.0.0.1:8080/ws");
        assert_eq!(config.realm, "realm1");
    }

    #[test]
    fn router_value_is_used_verbatim() {
        let config = RouterConfig::from_router_var(Some(" ws://crossbar:9000/ws ".into()));
        assert_eq!(config.url, " ws://crossbar:9000/ws ");
        assert_eq!(config.realm, "realm1");
    }

    #[test]
    fn publish_count_parsing() {
        assert_eq!(publish_count_from_var(None), 5);
        assert_eq!(publish_count_from_var(Some("12".into())), 12);
        assert_eq!(publish_count_from_var(Some("lots".into())), 5);
    }
}
