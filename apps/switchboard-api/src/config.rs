use std::str::FromStr;
use std::time::Duration;

/// Default bound on the broadcast queue.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 4096;

/// Default time a single fan-out write may take before the peer is evicted.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;

/// Switchboard configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Maximum number of messages queued for fan-out. A full queue suspends
    /// the producing connection.
    pub broadcast_capacity: usize,
    /// How long a producer may stay suspended on a full queue before its
    /// connection is dropped. `None` waits indefinitely.
    pub enqueue_timeout: Option<Duration>,
    /// Per-connection write deadline used by the dispatcher.
    pub write_timeout: Duration,
    /// Name of the cookie carrying the session token.
    pub session_cookie: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse(&lookup, "PORT").unwrap_or(defaults.port),
            broadcast_capacity: parse(&lookup, "BROADCAST_CAPACITY")
                .filter(|capacity: &usize| *capacity > 0)
                .unwrap_or(defaults.broadcast_capacity),
            enqueue_timeout: parse(&lookup, "ENQUEUE_TIMEOUT_MS").map(Duration::from_millis),
            write_timeout: parse(&lookup, "WRITE_TIMEOUT_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.write_timeout),
            session_cookie: lookup("SESSION_COOKIE")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.session_cookie),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            enqueue_timeout: None,
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            session_cookie: "session".to_string(),
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}
