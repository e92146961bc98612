//! Runtime configuration, loaded once from the environment at startup.

use std::env;
use std::time::Duration;

use crate::nfc::{DetectionStrategy, Pn532Config};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Swap the real controller for the mock; lets the bridge run on
    /// machines without a PN532 attached.
    pub use_mock_pn532: bool,
    pub i2c_bus: u32,
    pub i2c_address: u16,
    /// Initialization handshake bound.
    pub ready_timeout: Duration,
    /// Per-session tag-wait bound.
    pub tagging_timeout: Duration,
    /// Per-session lifetime bound, counted from creation.
    pub session_timeout: Duration,
    /// Command retries after a missing ACK.
    pub max_retries: u32,
    pub detection: DetectionStrategy,
    /// Debug override: when set, every session emulates this URL.
    pub force_receipt_url: Option<String>,
    /// Base of the cloud redirect service, used when a caller sends no
    /// receipt URL.
    pub redirect_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            use_mock_pn532: false,
            i2c_bus: 1,
            i2c_address: 0x24,
            ready_timeout: Duration::from_millis(3000),
            tagging_timeout: Duration::from_millis(30_000),
            session_timeout: Duration::from_millis(60_000),
            max_retries: 2,
            detection: DetectionStrategy::InitResponse,
            force_receipt_url: None,
            redirect_base_url: "https://example.com".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            host: string_var("HOST").unwrap_or(defaults.host),
            port: parsed_var("PORT").unwrap_or(defaults.port),
            use_mock_pn532: flag_var("USE_MOCK_PN532"),
            i2c_bus: parsed_var("I2C_BUS").unwrap_or(defaults.i2c_bus),
            i2c_address: string_var("I2C_ADDRESS")
                .and_then(|v| parse_address(&v))
                .unwrap_or(defaults.i2c_address),
            ready_timeout: millis_var("READY_TIMEOUT_MS").unwrap_or(defaults.ready_timeout),
            tagging_timeout: millis_var("TAGGING_TIMEOUT_MS").unwrap_or(defaults.tagging_timeout),
            session_timeout: millis_var("SESSION_TIMEOUT_MS").unwrap_or(defaults.session_timeout),
            max_retries: parsed_var("MAX_RETRIES").unwrap_or(defaults.max_retries),
            detection: match string_var("TAG_DETECTION").as_deref() {
                Some("tg-get-data") => DetectionStrategy::TgGetData,
                _ => DetectionStrategy::InitResponse,
            },
            force_receipt_url: string_var("FORCE_RECEIPT_URL"),
            redirect_base_url: string_var("REDIRECT_BASE_URL").unwrap_or(defaults.redirect_base_url),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pn532(&self) -> Pn532Config {
        Pn532Config {
            i2c_bus: self.i2c_bus,
            i2c_address: self.i2c_address,
            ready_timeout: self.ready_timeout,
            max_retries: self.max_retries,
            detection: self.detection,
        }
    }
}

fn string_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    string_var(key).and_then(|value| value.parse().ok())
}

fn millis_var(key: &str) -> Option<Duration> {
    parsed_var::<u64>(key).map(Duration::from_millis)
}

fn flag_var(key: &str) -> bool {
    string_var(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Accept `0x24`-style hex or plain decimal.
fn parse_address(value: &str) -> Option<u16> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}
