//! Application configuration loaded from environment variables.

use std::collections::HashSet;
use std::time::Duration;

use domain::{Money, ReferralTerms};
use fulfillment::{FulfillmentConfig, PollPolicy, ProviderWebhookAuth};
use provider::ProviderConfig;
use thiserror::Error;

pub const DEFAULT_ESIM_API_BASE_URL: &str = "https://api.esimaccess.com";

/// A variable that is set but cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

/// Server configuration.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `DATABASE_URL`: PostgreSQL; unset selects the in-memory store
/// - `ESIM_API_BASE_URL`, `ESIM_ACCESS_CODE`, `ESIM_SECRET_KEY`,
///   `ESIM_REQUEST_TIMEOUT_SECS`: provisioning API credentials
/// - `ESIM_TERMINAL_ERROR_CODES`: comma separated provider codes that fail an order
/// - `PAYMENT_WEBHOOK_SECRET`: payment processor endpoint secret
/// - `POLL_INTERVAL_MS`, `POLL_MAX_ATTEMPTS`: profile poll loop
/// - `REFERRAL_WELCOME_BONUS_CENTS`: credit for a referred user's first order
///
/// Empty values count as unset.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub esim_base_url: String,
    pub esim_access_code: String,
    pub esim_secret_key: Option<String>,
    pub esim_request_timeout: Duration,
    pub terminal_error_codes: HashSet<String>,
    pub payment_webhook_secret: Option<String>,
    pub poll: PollPolicy,
    pub welcome_bonus: Money,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT")?.unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: var("DATABASE_URL"),
            esim_base_url: var("ESIM_API_BASE_URL").unwrap_or(defaults.esim_base_url),
            esim_access_code: var("ESIM_ACCESS_CODE").unwrap_or_default(),
            esim_secret_key: var("ESIM_SECRET_KEY"),
            esim_request_timeout: parse(&var, "ESIM_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.esim_request_timeout),
            terminal_error_codes: var("ESIM_TERMINAL_ERROR_CODES")
                .map(|codes| {
                    codes
                        .split(',')
                        .map(str::trim)
                        .filter(|code| !code.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            payment_webhook_secret: var("PAYMENT_WEBHOOK_SECRET"),
            poll: PollPolicy {
                interval: parse(&var, "POLL_INTERVAL_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.poll.interval),
                max_attempts: parse(&var, "POLL_MAX_ATTEMPTS")?
                    .unwrap_or(defaults.poll.max_attempts),
            },
            welcome_bonus: parse(&var, "REFERRAL_WELCOME_BONUS_CENTS")?
                .map(Money::from_cents)
                .unwrap_or(defaults.welcome_bonus),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the outbound provider client. Without a secret key,
    /// requests are signed with an empty key and will be refused upstream.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(
            &self.esim_base_url,
            &self.esim_access_code,
            self.esim_secret_key.clone().unwrap_or_default(),
        )
        .with_timeout(self.esim_request_timeout)
    }

    pub fn fulfillment_config(&self) -> FulfillmentConfig {
        FulfillmentConfig {
            poll: self.poll,
            referral: ReferralTerms {
                welcome_bonus: self.welcome_bonus,
            },
            terminal_error_codes: self.terminal_error_codes.clone(),
        }
    }

    pub fn webhook_auth(&self) -> ProviderWebhookAuth {
        ProviderWebhookAuth {
            access_code: self.esim_access_code.clone(),
            secret_key: self.esim_secret_key.clone(),
        }
    }
}

fn parse<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { name, value }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            esim_base_url: DEFAULT_ESIM_API_BASE_URL.to_string(),
            esim_access_code: String::new(),
            esim_secret_key: None,
            esim_request_timeout: provider::config::DEFAULT_TIMEOUT,
            terminal_error_codes: HashSet::new(),
            payment_webhook_secret: None,
            poll: PollPolicy::default(),
            welcome_bonus: ReferralTerms::default().welcome_bonus,
        }
    }
}
