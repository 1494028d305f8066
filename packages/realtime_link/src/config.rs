use std::time::Duration;

/// Path of the realtime endpoint under the HTTP API base.
pub const WS_PATH: &str = "/infra/ws";

/// Connection tunables for the link (runtime view).
///
/// Built once and never mutated afterwards; overrides go through
/// [`WebSocketConfigOverrides`] at construction time.
#[derive(Clone, Debug, PartialEq)]
pub struct WebSocketConfig {
    /// Endpoint URL without query parameters, already using `ws`/`wss`.
    pub base_url: String,
    /// Interval between pings while the socket is open.
    pub heartbeat_interval: Duration,
    /// Ceiling for the generic (network-loss) retry track.
    pub max_reconnect_attempts: u32,
    /// Base delay for the exponential backoff.
    pub reconnect_interval: Duration,
    /// Log every inbound and outbound frame at debug level.
    pub debug: bool,
}

/// Optional per-field overrides applied on top of the defaults.
#[derive(Clone, Debug, Default)]
pub struct WebSocketConfigOverrides {
    pub base_url: Option<String>,
    pub heartbeat_interval: Option<Duration>,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_interval: Option<Duration>,
    pub debug: Option<bool>,
}

impl WebSocketConfig {
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
    pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

    /// Defaults derived from the HTTP API base, e.g.
    /// `https://admin.example.com/admin-api` → `wss://admin.example.com/admin-api/infra/ws`.
    pub fn from_http_base(http_base: &str) -> Self {
        Self {
            base_url: ws_url_from_http(&format!("{}{}", http_base.trim_end_matches('/'), WS_PATH)),
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            max_reconnect_attempts: Self::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval: Self::DEFAULT_RECONNECT_INTERVAL,
            debug: false,
        }
    }

    pub fn with_overrides(mut self, overrides: WebSocketConfigOverrides) -> Self {
        if let Some(base_url) = overrides.base_url {
            self.base_url = ws_url_from_http(&base_url);
        }
        if let Some(interval) = overrides.heartbeat_interval {
            self.heartbeat_interval = interval;
        }
        if let Some(max) = overrides.max_reconnect_attempts {
            self.max_reconnect_attempts = max;
        }
        if let Some(interval) = overrides.reconnect_interval {
            self.reconnect_interval = interval;
        }
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }
        self
    }

    /// How long a ping may go unanswered before the socket is force-closed.
    pub fn pong_timeout(&self) -> Duration {
        self.heartbeat_interval.mul_f64(1.5)
    }
}

/// Swap a leading `http` (any case) for `ws`, so `http` → `ws` and
/// `https` → `wss`. URLs that already use another scheme pass through.
pub fn ws_url_from_http(url: &str) -> String {
    match url.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("http") => format!("ws{}", &url[4..]),
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_swap() {
        assert_eq!(ws_url_from_http("http://a/b"), "ws://a/b");
        assert_eq!(ws_url_from_http("https://a/b"), "wss://a/b");
        assert_eq!(ws_url_from_http("HTTPS://a/b"), "wss://a/b");
        assert_eq!(ws_url_from_http("wss://a/b"), "wss://a/b");
        assert_eq!(ws_url_from_http("ht"), "ht");
    }

    #[test]
    fn test_defaults_from_http_base() {
        let config = WebSocketConfig::from_http_base("https://admin.example.com/admin-api/");
        assert_eq!(config.base_url, "wss://admin.example.com/admin-api/infra/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert!(!config.debug);
    }

    #[test]
    fn test_overrides() {
        let config = WebSocketConfig::from_http_base("http://localhost:48080").with_overrides(
            WebSocketConfigOverrides {
                heartbeat_interval: Some(Duration::from_secs(10)),
                max_reconnect_attempts: Some(2),
                debug: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(config.base_url, "ws://localhost:48080/infra/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert!(config.debug);
    }

    #[test]
    fn test_pong_timeout_is_one_and_a_half_intervals() {
        let config = WebSocketConfig::from_http_base("http://x");
        assert_eq!(config.pong_timeout(), Duration::from_secs(45));
    }
}
