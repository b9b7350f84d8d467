//! Environment configuration.
//!
//! | key | default |
//! |---|---|
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `DATABASE_URL` | unset (in-memory stores) |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `INBOUND_DOMAIN` | `mail.localhost` |
//! | `INBOUND_WEBHOOK_SECRET` | unset (unsigned webhooks accepted) |
//! | `EMAIL_TRANSPORT` | `log` (`http`, `smtp`) |
//! | `EMAIL_API_URL`, `EMAIL_API_KEY` | required for `http` |
//! | `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD` | `SMTP_HOST` required for `smtp`, port `587` |
//! | `EMAIL_DEFAULT_FROM`, `EMAIL_DEFAULT_FROM_NAME` | `no-reply@<INBOUND_DOMAIN>` |
//! | `PROCESSOR_ENABLED` | `true` |
//! | `PROCESSOR_INTERVAL_SECS` | `30` |
//! | `PROCESSOR_BATCH_SIZE` | `10` |
//! | `MAX_RETRIES` | `3` |
//! | `RETRY_DELAY_SECS` | `300` |
//! | `RETRY_STRATEGY` | `fixed` |
//! | `CLAIM_TIMEOUT_SECS` | `600` |
//! | `WORKER_ID` | `<HOSTNAME>-<pid>`, else generated |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use hireflow_core::{EmailAddress, WorkerId};
use hireflow_mail::{BackoffStrategy, Mailbox, RetryPolicy, MAX_RETRIES_LIMIT};

use crate::processor::ProcessorConfig;
use crate::transport::HttpApiConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Which transport delivers queued mail.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Log,
    Http(HttpApiConfig),
    Smtp(SmtpConfig),
}

impl TransportConfig {
    pub fn name(&self) -> &'static str {
        match self {
            TransportConfig::Log => "log",
            TransportConfig::Http(_) => "http",
            TransportConfig::Smtp(_) => "smtp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: usize,
    pub claim_timeout: Duration,
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database: Option<DatabaseConfig>,
    pub inbound_domain: String,
    pub webhook_secret: Option<String>,
    pub transport: TransportConfig,
    pub default_from: Mailbox,
    pub processor: ProcessorSettings,
    pub retry_policy: RetryPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let bind_addr = env.parse_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let database = match env.get("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: env.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            }),
            None => None,
        };

        let inbound_domain = env
            .get("INBOUND_DOMAIN")
            .unwrap_or_else(|| "mail.localhost".to_string())
            .trim()
            .trim_start_matches('@')
            .to_ascii_lowercase();

        let transport = match env.get("EMAIL_TRANSPORT").as_deref().unwrap_or("log") {
            "log" => TransportConfig::Log,
            "http" => TransportConfig::Http(HttpApiConfig::new(
                env.require("EMAIL_API_URL")?,
                env.require("EMAIL_API_KEY")?,
            )),
            "smtp" => TransportConfig::Smtp(SmtpConfig {
                host: env.require("SMTP_HOST")?,
                port: env.parse_or("SMTP_PORT", 587)?,
                username: env.get("SMTP_USERNAME"),
                password: env.get("SMTP_PASSWORD"),
            }),
            other => {
                return Err(ConfigError::Invalid {
                    key: "EMAIL_TRANSPORT",
                    value: other.to_string(),
                    reason: "expected log, http or smtp".into(),
                });
            }
        };

        let from_raw = env
            .get("EMAIL_DEFAULT_FROM")
            .unwrap_or_else(|| format!("no-reply@{inbound_domain}"));
        let from_address = EmailAddress::parse(&from_raw).map_err(|e| ConfigError::Invalid {
            key: "EMAIL_DEFAULT_FROM",
            value: from_raw.clone(),
            reason: e.to_string(),
        })?;
        let default_from = Mailbox::new(from_address, env.get("EMAIL_DEFAULT_FROM_NAME"));

        let processor = ProcessorSettings {
            enabled: env.parse_bool_or("PROCESSOR_ENABLED", true)?,
            interval: Duration::from_secs(env.parse_or("PROCESSOR_INTERVAL_SECS", 30u64)?.max(1)),
            batch_size: env.parse_or("PROCESSOR_BATCH_SIZE", 10usize)?.max(1),
            claim_timeout: Duration::from_secs(env.parse_or("CLAIM_TIMEOUT_SECS", 600u64)?),
            worker_id: env
                .get("WORKER_ID")
                .map(WorkerId::new)
                .unwrap_or_else(default_worker_id),
        };

        let strategy_raw = env.get("RETRY_STRATEGY").unwrap_or_else(|| "fixed".into());
        let strategy = BackoffStrategy::parse(&strategy_raw).map_err(|e| ConfigError::Invalid {
            key: "RETRY_STRATEGY",
            value: strategy_raw.clone(),
            reason: e.to_string(),
        })?;
        let delay = Duration::from_secs(env.parse_or("RETRY_DELAY_SECS", 300u64)?);
        let max_retries = env.parse_or("MAX_RETRIES", 3u32)?.max(1);
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid {
                key: "MAX_RETRIES",
                value: max_retries.to_string(),
                reason: format!("must be at most {MAX_RETRIES_LIMIT}"),
            });
        }
        let retry_policy = RetryPolicy {
            default_max_retries: max_retries,
            base_delay: delay,
            max_delay: delay.max(Duration::from_secs(3600)),
            strategy,
            ..RetryPolicy::default()
        };

        Ok(Self {
            bind_addr,
            database,
            inbound_domain,
            webhook_secret: env.get("INBOUND_WEBHOOK_SECRET"),
            transport,
            default_from,
            processor,
            retry_policy,
        })
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            worker_id: self.processor.worker_id.clone(),
            poll_interval: self.processor.enabled.then_some(self.processor.interval),
            batch_size: self.processor.batch_size,
            claim_timeout: self.processor.claim_timeout,
            retry_policy: self.retry_policy.clone(),
        }
    }
}

fn default_worker_id() -> WorkerId {
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.trim().is_empty() => {
            WorkerId::new(format!("{}-{}", host.trim(), std::process::id()))
        }
        _ => WorkerId::generate(),
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn parse_bool_or(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                key,
                value: v,
                reason: "expected a boolean".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(cfg.database.is_none());
        assert_eq!(cfg.inbound_domain, "mail.localhost");
        assert_eq!(cfg.transport.name(), "log");
        assert_eq!(cfg.default_from.address.as_str(), "no-reply@mail.localhost");
        assert!(cfg.processor.enabled);
        assert_eq!(cfg.processor.interval, Duration::from_secs(30));
        assert_eq!(cfg.processor.batch_size, 10);
        assert_eq!(cfg.retry_policy, RetryPolicy::default());

        let processor = cfg.processor_config();
        assert_eq!(processor.poll_interval, Some(Duration::from_secs(30)));
        assert_eq!(processor.claim_timeout, Duration::from_secs(600));
    }

    #[test]
    fn overrides() {
        let cfg = load(&[
            ("DATABASE_URL", "postgres://localhost/hireflow"),
            ("INBOUND_DOMAIN", "@Mail.Hireflow.IO"),
            ("EMAIL_TRANSPORT", "http"),
            ("EMAIL_API_URL", "https://api.mail.test/send"),
            ("EMAIL_API_KEY", "k"),
            ("PROCESSOR_ENABLED", "false"),
            ("RETRY_DELAY_SECS", "0"),
            ("RETRY_STRATEGY", "exponential"),
            ("MAX_RETRIES", "5"),
            ("WORKER_ID", "api-1"),
        ])
        .unwrap();

        assert_eq!(cfg.database.as_ref().unwrap().max_connections, 10);
        assert_eq!(cfg.inbound_domain, "mail.hireflow.io");
        assert!(matches!(cfg.transport, TransportConfig::Http(ref h) if h.api_key == "k"));
        assert_eq!(cfg.retry_policy.default_max_retries, 5);
        assert_eq!(cfg.retry_policy.base_delay, Duration::ZERO);
        assert_eq!(cfg.retry_policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(cfg.processor.worker_id.as_str(), "api-1");
        assert_eq!(cfg.processor_config().poll_interval, None);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_eq!(
            load(&[("EMAIL_TRANSPORT", "http")]).unwrap_err(),
            ConfigError::Missing("EMAIL_API_URL")
        );
        assert!(matches!(
            load(&[("PROCESSOR_BATCH_SIZE", "ten")]),
            Err(ConfigError::Invalid { key: "PROCESSOR_BATCH_SIZE", .. })
        ));
        assert!(matches!(
            load(&[("EMAIL_TRANSPORT", "carrier-pigeon")]),
            Err(ConfigError::Invalid { key: "EMAIL_TRANSPORT", .. })
        ));
        assert!(matches!(
            load(&[("PROCESSOR_ENABLED", "maybe")]),
            Err(ConfigError::Invalid { key: "PROCESSOR_ENABLED", .. })
        ));
        assert!(matches!(
            load(&[("MAX_RETRIES", "1000")]),
            Err(ConfigError::Invalid { key: "MAX_RETRIES", .. })
        ));
    }
}
