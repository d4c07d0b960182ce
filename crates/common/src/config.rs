use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (credit ledger + intake list)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Twilio account SID
    pub twilio_account_sid: Option<String>,

    /// Twilio auth token
    pub twilio_auth_token: Option<String>,

    /// Twilio sender number (E.164)
    pub twilio_number: Option<String>,

    /// URL Twilio posts delivery status updates to
    pub twilio_status_callback_url: Option<String>,

    /// Branch that inbound SMS from unknown senders are filed under
    pub twilio_inbound_branch: Option<String>,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// WhatsApp Cloud API access token
    pub whatsapp_access_token: Option<String>,

    /// WhatsApp Cloud API sender phone number id
    pub whatsapp_phone_number_id: Option<String>,

    /// Pause between two sends on the same queue, in milliseconds (default: 2000)
    pub burst_delay_ms: u64,

    /// Base daemon sleep in seconds, multiplied by the backoff multiplier (default: 60)
    pub base_interval_secs: u64,

    /// Longest daemon sleep in seconds (default: 3600 = 1 hour)
    pub max_interval_secs: u64,

    /// Minimum spacing between two accepted wake signals in seconds (default: 300)
    pub debounce_secs: u64,

    /// Total email send attempts on transient errors (default: 3)
    pub email_max_attempts: u32,

    /// Cool-down between email attempts in seconds (default: 20)
    pub email_cool_down_secs: u64,

    /// Network timeout applied to every provider request in seconds (default: 30)
    pub transport_timeout_secs: u64,

    /// Redis list that other processes push outbound messages onto
    pub intake_queue_key: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            twilio_account_sid: std::env::var("TWILIO_ACCOUNT_SID").ok(),
            twilio_auth_token: std::env::var("TWILIO_AUTH_TOKEN").ok(),
            twilio_number: std::env::var("TWILIO_NUMBER").ok(),
            twilio_status_callback_url: std::env::var("TWILIO_STATUS_CALLBACK_URL").ok(),
            twilio_inbound_branch: std::env::var("TWILIO_INBOUND_BRANCH").ok(),
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            whatsapp_access_token: std::env::var("WHATSAPP_ACCESS_TOKEN").ok(),
            whatsapp_phone_number_id: std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok(),
            burst_delay_ms: parse_var("DISPATCH_BURST_DELAY_MS", 2000)?,
            base_interval_secs: parse_var("DISPATCH_BASE_INTERVAL_SECS", 60)?,
            max_interval_secs: parse_var("DISPATCH_MAX_INTERVAL_SECS", 3600)?,
            debounce_secs: parse_var("DISPATCH_DEBOUNCE_SECS", 300)?,
            email_max_attempts: parse_var("EMAIL_MAX_ATTEMPTS", 3)?,
            email_cool_down_secs: parse_var("EMAIL_COOL_DOWN_SECS", 20)?,
            transport_timeout_secs: parse_var("TRANSPORT_TIMEOUT_SECS", 30)?,
            intake_queue_key: std::env::var("INTAKE_QUEUE_KEY")
                .unwrap_or_else(|_| "courier:outbound".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the scheduler cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_interval_secs == 0 {
            anyhow::bail!("DISPATCH_BASE_INTERVAL_SECS must be greater than zero");
        }
        if self.max_interval_secs < self.base_interval_secs {
            anyhow::bail!(
                "DISPATCH_MAX_INTERVAL_SECS ({}) must not be below DISPATCH_BASE_INTERVAL_SECS ({})",
                self.max_interval_secs,
                self.base_interval_secs
            );
        }
        if self.email_max_attempts == 0 {
            anyhow::bail!("EMAIL_MAX_ATTEMPTS must be at least 1");
        }
        Ok(())
    }
}

/// Read a numeric environment variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://unused".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            db_max_connections: 5,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_number: None,
            twilio_status_callback_url: None,
            twilio_inbound_branch: None,
            resend_api_key: None,
            email_from: None,
            whatsapp_access_token: None,
            whatsapp_phone_number_id: None,
            burst_delay_ms: 2000,
            base_interval_secs: 60,
            max_interval_secs: 3600,
            debounce_secs: 300,
            email_max_attempts: 3,
            email_cool_down_secs: 20,
            transport_timeout_secs: 30,
            intake_queue_key: "courier:outbound".to_string(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_base_interval_rejected() {
        let mut config = base_config();
        config.base_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ceiling_below_base_rejected() {
        let mut config = base_config();
        config.max_interval_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_email_attempts_rejected() {
        let mut config = base_config();
        config.email_max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_var_falls_back_when_unset() {
        let value: u64 = parse_var("COURIER_TEST_SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
