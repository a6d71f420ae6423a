//! Client configuration read from the environment.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::state::connection::{
    Backoff, ReconnectPolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY, DEFAULT_RECONNECT_MAX_DELAY,
};

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:3001";

/// Bound of the transport event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

pub const ENV_ENDPOINT: &str = "BLACKJACK_ENDPOINT";
pub const ENV_RECONNECT_ATTEMPTS: &str = "BLACKJACK_RECONNECT_ATTEMPTS";
pub const ENV_RECONNECT_DELAY_MS: &str = "BLACKJACK_RECONNECT_DELAY_MS";
pub const ENV_RECONNECT_MAX_DELAY_MS: &str = "BLACKJACK_RECONNECT_MAX_DELAY_MS";
pub const ENV_RECONNECT_BACKOFF: &str = "BLACKJACK_RECONNECT_BACKOFF";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "BLACKJACK_CONNECT_TIMEOUT_MS";
pub const ENV_EVENT_CAPACITY: &str = "BLACKJACK_EVENT_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket address of the session coordinator
    pub endpoint: Url,
    pub reconnect: ReconnectPolicy,
    /// Per-attempt limit for dial plus handshake
    pub connect_timeout: Duration,
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Config for `endpoint` with default reconnection settings.
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            endpoint: websocket_url(endpoint)?,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = match lookup(ENV_ENDPOINT) {
            Some(raw) => websocket_url(&raw)?,
            None => websocket_url(DEFAULT_ENDPOINT)?,
        };

        let backoff = match lookup(ENV_RECONNECT_BACKOFF) {
            None => Backoff::default(),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "fixed" => Backoff::Fixed,
                "exponential" => Backoff::Exponential,
                _ => {
                    return Err(Error::Config {
                        key: ENV_RECONNECT_BACKOFF,
                        value: raw,
                    })
                }
            },
        };

        let max_attempts = parse_or(&lookup, ENV_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_ATTEMPTS)?;
        let initial_delay = millis_or(&lookup, ENV_RECONNECT_DELAY_MS, DEFAULT_RECONNECT_DELAY)?;
        let max_delay =
            millis_or(&lookup, ENV_RECONNECT_MAX_DELAY_MS, DEFAULT_RECONNECT_MAX_DELAY)?;
        let reconnect = ReconnectPolicy {
            max_attempts,
            initial_delay,
            max_delay,
            backoff,
        };

        let event_capacity = parse_or(&lookup, ENV_EVENT_CAPACITY, DEFAULT_EVENT_CAPACITY)?;
        if event_capacity == 0 {
            return Err(Error::Config {
                key: ENV_EVENT_CAPACITY,
                value: "0".to_string(),
            });
        }

        let connect_timeout = millis_or(&lookup, ENV_CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT)?;

        Ok(Self {
            endpoint,
            reconnect,
            connect_timeout,
            event_capacity,
        })
    }
}

/// Parse `raw` as a coordinator address, rewriting `http(s)` to `ws(s)`.
pub fn websocket_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    let ws_scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        scheme => return Err(Error::InvalidScheme(scheme.to_string())),
    };
    if url.scheme() != ws_scheme {
        url.set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;
    }
    Ok(url)
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| Error::Config { key, value: raw }),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| Error::Config { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::new(DEFAULT_ENDPOINT).unwrap());
        assert_eq!(config.endpoint.as_str(), "ws://127.0.0.1:3001/");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_ENDPOINT, "https://tables.example.com:8443"),
            (ENV_RECONNECT_ATTEMPTS, "3"),
            (ENV_RECONNECT_DELAY_MS, "250"),
            (ENV_RECONNECT_MAX_DELAY_MS, "2000"),
            (ENV_RECONNECT_BACKOFF, "Fixed"),
            (ENV_CONNECT_TIMEOUT_MS, " 1500 "),
            (ENV_EVENT_CAPACITY, "32"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint.scheme(), "wss");
        assert_eq!(config.endpoint.port(), Some(8443));
        assert_eq!(
            config.reconnect,
            ReconnectPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(250),
                max_delay: Duration::from_millis(2000),
                backoff: Backoff::Fixed,
            }
        );
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.event_capacity, 32);
    }

    #[test]
    fn test_bad_values() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_RECONNECT_ATTEMPTS, "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                key: ENV_RECONNECT_ATTEMPTS,
                ..
            }
        ));

        let err =
            ClientConfig::from_lookup(lookup(&[(ENV_RECONNECT_BACKOFF, "linear")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for BLACKJACK_RECONNECT_BACKOFF: linear"
        );

        assert!(ClientConfig::from_lookup(lookup(&[(ENV_EVENT_CAPACITY, "0")])).is_err());
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://localhost:3001").unwrap().as_str(),
            "ws://localhost:3001/"
        );
        assert_eq!(websocket_url("wss://a.example/").unwrap().scheme(), "wss");
        assert!(matches!(
            websocket_url("ftp://a.example"),
            Err(Error::InvalidScheme(_))
        ));
        assert!(matches!(websocket_url("not a url"), Err(Error::Url(_))));
    }
}
