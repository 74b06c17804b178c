// src/config.rs

use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;

const SANDBOX_PROCESS_URL: &str = "https://sandbox.payfast.co.za/eng/process";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Operator identities that always resolve to the admin tier. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    emails: Arc<HashSet<String>>,
}

impl AdminAllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self {
            emails: Arc::new(emails),
        }
    }

    /// Parses a comma-separated list.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PayfastConfig {
    pub merchant_id: String,
    pub merchant_key: String,
    pub passphrase: String,
    pub process_url: String,
    /// Server-to-server confirmation endpoint; skipped when unset.
    pub validate_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub client_database_url: Option<String>,
    pub bind_addr: String,
    pub port: u16,
    pub jwt_secret: String,
    pub public_base_url: String,
    pub payfast: PayfastConfig,
    pub admins: AdminAllowList,
    pub store_timeout: Duration,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Reads configuration from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let passphrase = required("PAYFAST_PASSPHRASE")?;
        let store_timeout_ms: u64 = parsed("STORE_TIMEOUT_MS", 5_000)?;
        if store_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "STORE_TIMEOUT_MS",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            database_url: optional("DATABASE_URL"),
            client_database_url: optional("CLIENT_DATABASE_URL"),
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed("PORT", 8065)?,
            jwt_secret: required("JWT_SECRET")?,
            public_base_url: optional("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8065".to_string())
                .trim_end_matches('/')
                .to_string(),
            payfast: PayfastConfig {
                merchant_id: required("PAYFAST_MERCHANT_ID")?,
                merchant_key: required("PAYFAST_MERCHANT_KEY")?,
                passphrase,
                process_url: optional("PAYFAST_PROCESS_URL")
                    .unwrap_or_else(|| SANDBOX_PROCESS_URL.to_string()),
                validate_url: optional("PAYFAST_VALIDATE_URL"),
            },
            admins: AdminAllowList::parse(&optional("ADMIN_EMAILS").unwrap_or_default()),
            store_timeout: Duration::from_millis(store_timeout_ms),
        })
    }
}
