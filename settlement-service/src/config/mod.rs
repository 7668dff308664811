//! Configuration module for settlement-service.

use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::gateway::FeeBearer;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub payments: PaymentSettings,
    pub notifications: NotificationSettings,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Option<Secret<String>>,
    pub timeout: Duration,
    pub country: String,
    pub fee_bearer: FeeBearer,
}

/// Policy knobs for the payment ledger.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// Percentage added on top of mobile-money collections.
    pub mobile_money_surcharge_percent: Decimal,
    /// Let a guardian pay when their login e-mail matches the student's
    /// registered guardian contact, even without an explicit link.
    pub guardian_email_fallback: bool,
    /// Upper bound on a single gateway initiation.
    pub gateway_timeout: Duration,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            mobile_money_surcharge_percent: Decimal::new(25, 1),
            guardian_email_fallback: true,
            gateway_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub service_url: Option<String>,
    pub queue_size: usize,
    pub rate_per_second: u32,
    pub max_retry: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            service_url: None,
            queue_size: 1024,
            rate_per_second: 10,
            max_retry: Duration::from_secs(300),
        }
    }
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("{key} is required")))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{key} has an invalid value"))),
        Err(_) => Ok(default),
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let timeout = Duration::from_secs(parsed("GATEWAY_TIMEOUT_SECS", 30u64)?);
        let fee_bearer = env::var("GATEWAY_FEE_BEARER")
            .unwrap_or_else(|_| "customer".to_string())
            .parse::<FeeBearer>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "settlement-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                uri: Secret::new(required("MONGODB_URI")?),
                database: env::var("MONGODB_DATABASE")
                    .unwrap_or_else(|_| "settlement_db".to_string()),
            },
            gateway: GatewayConfig {
                base_url: required("GATEWAY_BASE_URL")?,
                api_key: Secret::new(required("GATEWAY_API_KEY")?),
                webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(Secret::new),
                timeout,
                country: env::var("GATEWAY_COUNTRY").unwrap_or_else(|_| "CM".to_string()),
                fee_bearer,
            },
            payments: PaymentSettings {
                mobile_money_surcharge_percent: parsed(
                    "MOBILE_MONEY_SURCHARGE_PERCENT",
                    Decimal::new(25, 1),
                )?,
                guardian_email_fallback: parsed("GUARDIAN_EMAIL_FALLBACK", true)?,
                gateway_timeout: timeout,
            },
            notifications: NotificationSettings {
                service_url: env::var("NOTIFICATION_SERVICE_URL").ok(),
                queue_size: parsed("NOTIFICATION_QUEUE_SIZE", 1024usize)?,
                rate_per_second: parsed("NOTIFICATION_RATE_PER_SECOND", 10u32)?,
                max_retry: Duration::from_secs(parsed("NOTIFICATION_MAX_RETRY_SECS", 300u64)?),
            },
            rate_limit_per_minute: parsed("RATE_LIMIT_PER_MINUTE", 600u32)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_surcharge_is_two_and_a_half_percent() {
        assert_eq!(
            PaymentSettings::default().mobile_money_surcharge_percent,
            dec!(2.5)
        );
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let err = required("SETTLEMENT_TEST_SURELY_UNSET_KEY").unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(err.to_string().contains("SETTLEMENT_TEST_SURELY_UNSET_KEY"));
    }
}
