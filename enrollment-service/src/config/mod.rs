use anyhow::{Context, Result};
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub paystack: PaystackConfig,
    pub verification: VerificationConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PaystackConfig {
    pub secret_key: Secret<String>,
    pub api_base_url: String,
    /// Hard timeout applied to every provider call.
    pub timeout_seconds: u64,
}

impl PaystackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Tuning for the verification pipeline.
#[derive(Deserialize, Clone, Debug)]
pub struct VerificationConfig {
    pub rate_limit_attempts: u32,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_block_seconds: u64,
    /// Absolute tolerance when comparing the provider amount to the course price.
    pub amount_tolerance: Decimal,
    pub allowed_currencies: Vec<String>,
    pub home_currency: String,
    /// Retry bound for the commit step (transient database failures).
    pub commit_max_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("ENROLLMENT_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("ENROLLMENT_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()
            .context("ENROLLMENT_SERVICE_PORT must be a valid port")?;

        let db_url = env::var("ENROLLMENT_DATABASE_URL")
            .context("ENROLLMENT_DATABASE_URL must be set")?;
        let max_connections = parse_or("ENROLLMENT_DATABASE_MAX_CONNECTIONS", 10)?;
        let min_connections = parse_or("ENROLLMENT_DATABASE_MIN_CONNECTIONS", 1)?;

        let paystack_secret = env::var("PAYSTACK_SECRET_KEY").unwrap_or_default();
        let paystack_base_url = env::var("PAYSTACK_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.paystack.co".to_string());
        let paystack_timeout = parse_or("PAYSTACK_TIMEOUT_SECONDS", 10)?;

        let amount_tolerance = Decimal::from_str(
            &env::var("VERIFY_AMOUNT_TOLERANCE").unwrap_or_else(|_| "0.01".to_string()),
        )
        .context("VERIFY_AMOUNT_TOLERANCE must be a decimal")?;

        let allowed_currencies = env::var("VERIFY_ALLOWED_CURRENCIES")
            .unwrap_or_else(|_| "NGN,USD".to_string())
            .split(',')
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();

        let home_currency =
            env::var("VERIFY_HOME_CURRENCY").unwrap_or_else(|_| "NGN".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            paystack: PaystackConfig {
                secret_key: Secret::new(paystack_secret),
                api_base_url: paystack_base_url,
                timeout_seconds: paystack_timeout,
            },
            verification: VerificationConfig {
                rate_limit_attempts: parse_or("VERIFY_RATE_LIMIT_ATTEMPTS", 10)?,
                rate_limit_window_seconds: parse_or("VERIFY_RATE_LIMIT_WINDOW_SECONDS", 60)?,
                rate_limit_block_seconds: parse_or("VERIFY_RATE_LIMIT_BLOCK_SECONDS", 300)?,
                amount_tolerance,
                allowed_currencies,
                home_currency,
                commit_max_retries: parse_or("VERIFY_COMMIT_MAX_RETRIES", 3)?,
            },
            service_name: "enrollment-service".to_string(),
        })
    }
}

fn parse_or<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must parse as a number (got '{}')", var, raw)),
        Err(_) => Ok(default),
    }
}
