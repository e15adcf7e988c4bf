use anyhow::{Context, Result};
use dotenvy::dotenv;
use ipnet::IpNet;
use std::env;
use std::time::Duration;

use crate::ledger::CircuitBreakerSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Without Redis, balances are cached in process.
    pub redis_url: Option<String>,
    pub ledger_url: String,
    /// May be absent when the secret is read from Vault.
    pub webhook_secret: Option<String>,
    pub webhook_max_age: Option<Duration>,
    pub webhook_allowed_ips: AllowedIps,
    /// Proxies in front of the service. Zero means `X-Forwarded-For` is ignored.
    pub trusted_proxy_depth: usize,
    pub ledger_breaker: CircuitBreakerSettings,
    pub balance_cache_ttl: Duration,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup.
    pub fn from_source<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| get(key).with_context(|| format!("{key} must be set"));
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let webhook_max_age_secs: u64 = or_default("WEBHOOK_MAX_AGE_SECS", "300")
            .parse()
            .context("WEBHOOK_MAX_AGE_SECS must be an integer")?;

        let failure_rate: f64 = or_default("LEDGER_FAILURE_RATE", "0.1")
            .parse()
            .context("LEDGER_FAILURE_RATE must be a number")?;
        if !(failure_rate > 0.0 && failure_rate < 1.0) {
            anyhow::bail!("LEDGER_FAILURE_RATE must be in (0, 1)");
        }

        let defaults = CircuitBreakerSettings::default();
        let ledger_breaker = CircuitBreakerSettings {
            failure_rate,
            min_requests: or_default("LEDGER_MIN_REQUESTS", &defaults.min_requests.to_string())
                .parse()
                .context("LEDGER_MIN_REQUESTS must be an integer")?,
            window: Duration::from_secs(
                or_default("LEDGER_WINDOW_SECS", &defaults.window.as_secs().to_string())
                    .parse()
                    .context("LEDGER_WINDOW_SECS must be an integer")?,
            ),
            cooldown: Duration::from_secs(
                or_default("LEDGER_COOLDOWN_SECS", &defaults.cooldown.as_secs().to_string())
                    .parse()
                    .context("LEDGER_COOLDOWN_SECS must be an integer")?,
            ),
        };

        let log_format = match or_default("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => anyhow::bail!("LOG_FORMAT must be 'json' or 'pretty', got '{other}'"),
        };

        let config = Config {
            server_port: or_default("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: require("DATABASE_URL")?,
            redis_url: get("REDIS_URL").filter(|url| !url.is_empty()),
            ledger_url: require("LEDGER_URL")?,
            webhook_secret: get("PADDLE_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            webhook_max_age: (webhook_max_age_secs > 0)
                .then(|| Duration::from_secs(webhook_max_age_secs)),
            webhook_allowed_ips: parse_allowed_ips(&or_default("WEBHOOK_ALLOWED_IPS", "*"))?,
            trusted_proxy_depth: or_default("TRUSTED_PROXY_DEPTH", "0")
                .parse()
                .context("TRUSTED_PROXY_DEPTH must be an integer")?,
            ledger_breaker,
            balance_cache_ttl: Duration::from_secs(
                or_default("BALANCE_CACHE_TTL_SECS", "180")
                    .parse()
                    .context("BALANCE_CACHE_TTL_SECS must be an integer")?,
            ),
            log_format,
        };

        url::Url::parse(&config.ledger_url).context("LEDGER_URL is not a valid URL")?;
        Ok(config)
    }
}

pub fn parse_allowed_ips(raw: &str) -> Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<IpNet>)
        .collect::<Result<Vec<_>, _>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("WEBHOOK_ALLOWED_IPS must be '*' or a comma-separated list of CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/cores"),
        ("LEDGER_URL", "http://ledger.internal"),
    ];

    #[test]
    fn test_defaults() {
        let config = config_from(&REQUIRED).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.webhook_max_age, Some(Duration::from_secs(300)));
        assert_eq!(config.webhook_allowed_ips, AllowedIps::Any);
        assert_eq!(config.ledger_breaker.cooldown, Duration::from_secs(5));
        assert_eq!(config.balance_cache_ttl, Duration::from_secs(180));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.redis_url.is_none());
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn test_missing_database_url() {
        let err = config_from(&[("LEDGER_URL", "http://ledger.internal")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_invalid_ledger_url() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/cores"),
            ("LEDGER_URL", "not-a-url"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("LEDGER_URL"));
    }

    #[test]
    fn test_zero_max_age_disables_window() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WEBHOOK_MAX_AGE_SECS", "0"));
        assert_eq!(config_from(&pairs).unwrap().webhook_max_age, None);
    }

    #[test]
    fn test_failure_rate_bounds() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("LEDGER_FAILURE_RATE", "1.5"));
        assert!(config_from(&pairs).is_err());
    }

    #[test]
    fn test_parse_allowed_ips() {
        assert_eq!(parse_allowed_ips("*").unwrap(), AllowedIps::Any);
        let parsed = parse_allowed_ips("34.232.58.13/32, 34.195.105.136/32").unwrap();
        assert!(matches!(parsed, AllowedIps::Cidrs(ref c) if c.len() == 2));
        assert!(parse_allowed_ips(" , ").is_err());
        assert!(parse_allowed_ips("not-an-ip").is_err());
    }
}
