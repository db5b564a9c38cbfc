use std::time::Duration;

use serde::Deserialize;

use crate::checkout::CheckoutPolicy;
use crate::doku::DokuConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,

    pub doku_client_id: String,
    pub doku_secret_key: String,
    pub doku_base_url: String,
    pub doku_callback_url: Option<String>,
    pub doku_verify_notifications: bool,
    pub gateway_timeout_secs: u64,

    pub currency: String,
    pub order_ttl_minutes: i64,
    pub flash_sale_window_minutes: i64,
    /// Business timezone as minutes east of UTC (WIB by default).
    pub utc_offset_minutes: i32,
    /// Period of the background expiry sweep; 0 turns it off.
    pub sweep_interval_secs: u64,
    /// Token required by `POST /payments/sweep`; unset disables the endpoint.
    pub sweep_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(config::Environment::default())
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .set_default("server_port", 8000)?
            .set_default("database_max_connections", 8)?
            .set_default("doku_base_url", "https://api-sandbox.doku.com")?
            .set_default("doku_verify_notifications", true)?
            .set_default("gateway_timeout_secs", 30)?
            .set_default("currency", "IDR")?
            .set_default("order_ttl_minutes", 24 * 60)?
            .set_default("flash_sale_window_minutes", 15)?
            .set_default("utc_offset_minutes", 7 * 60)?
            .set_default("sweep_interval_secs", 60)?
            .add_source(source)
            .build()?;
        config.try_deserialize()
    }

    pub fn doku(&self) -> DokuConfig {
        DokuConfig {
            client_id: self.doku_client_id.clone(),
            secret_key: self.doku_secret_key.clone(),
            base_url: self.doku_base_url.trim_end_matches('/').to_string(),
            callback_url: self.doku_callback_url.clone(),
            timeout: Duration::from_secs(self.gateway_timeout_secs),
        }
    }

    pub fn checkout_policy(&self) -> CheckoutPolicy {
        CheckoutPolicy {
            currency: self.currency.clone(),
            order_ttl: chrono::Duration::minutes(self.order_ttl_minutes),
            flash_sale_window: chrono::Duration::minutes(self.flash_sale_window_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default().source(Some(vars)).try_parsing(true)
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let cfg = Config::from_source(env(&[
            ("DATABASE_URL", "postgres://localhost/games"),
            ("DOKU_CLIENT_ID", "BRN-1"),
            ("DOKU_SECRET_KEY", "SK-1"),
        ]))
        .unwrap();

        assert_eq!(cfg.server_port, 8000);
        assert_eq!(cfg.currency, "IDR");
        assert!(cfg.doku_verify_notifications);
        assert_eq!(cfg.doku_callback_url, None);
        assert_eq!(cfg.sweep_token, None);

        let policy = cfg.checkout_policy();
        assert_eq!(policy.order_ttl, chrono::Duration::hours(24));
        assert_eq!(policy.flash_sale_window, chrono::Duration::minutes(15));
        assert_eq!(cfg.doku().base_url, "https://api-sandbox.doku.com");
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = Config::from_source(env(&[
            ("DATABASE_URL", "postgres://localhost/games"),
            ("DOKU_CLIENT_ID", "BRN-1"),
            ("DOKU_SECRET_KEY", "SK-1"),
            ("DOKU_BASE_URL", "https://api.doku.com/"),
            ("FLASH_SALE_WINDOW_MINUTES", "5"),
            ("SERVER_PORT", "9090"),
            ("SWEEP_TOKEN", "ops-secret"),
        ]))
        .unwrap();

        assert_eq!(cfg.sweep_token.as_deref(), Some("ops-secret"));
        assert_eq!(cfg.server_port, 9090);
        assert_eq!(cfg.flash_sale_window_minutes, 5);
        assert_eq!(cfg.doku().base_url, "https://api.doku.com");
    }

    #[test]
    fn credentials_are_required() {
        assert!(Config::from_source(env(&[("DATABASE_URL", "postgres://localhost/games")])).is_err());
    }
}
