use mogulate_usage::{CyclePolicy, UsageError};
use std::time::Duration;
use thiserror::Error;

pub const DEV_TOKEN: &str = "dev-token";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: UsageError,
    },
}

/// Hosted database and auth settings. Absent means local in-memory mode.
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
    pub anon_key: String,
}

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub starter_price: Option<String>,
    pub pro_price: Option<String>,
    pub pro_min_cents: i64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub supabase: Option<SupabaseConfig>,
    pub openai: GeneratorConfig,
    pub perplexity: GeneratorConfig,
    pub stripe: StripeConfig,
    pub upstream_timeout: Duration,
    pub payments_timeout: Duration,
    pub cycle_policy: CyclePolicy,
    pub dev_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            supabase: None,
            openai: GeneratorConfig::empty(),
            perplexity: GeneratorConfig::empty(),
            stripe: StripeConfig {
                secret_key: String::new(),
                webhook_secret: None,
                starter_price: None,
                pro_price: None,
                pro_min_cents: 2000,
            },
            upstream_timeout: Duration::from_secs(30),
            payments_timeout: Duration::from_secs(15),
            cycle_policy: CyclePolicy::default(),
            dev_token: DEV_TOKEN.to_string(),
        }
    }
}

impl GeneratorConfig {
    fn empty() -> Self {
        Self {
            api_key: String::new(),
            model: None,
            base_url: None,
        }
    }

    fn from_env(prefix: &str) -> Self {
        Self {
            api_key: var(&format!("{prefix}_API_KEY")).unwrap_or_default(),
            model: var(&format!("{prefix}_MODEL")),
            base_url: var(&format!("{prefix}_BASE_URL")),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    var(name).and_then(|v| v.trim().parse().ok())
}

fn cycle_policy(raw: Option<String>, default: CyclePolicy) -> Result<CyclePolicy, ConfigError> {
    match raw {
        Some(raw) => raw.parse().map_err(|source| ConfigError::Invalid {
            name: "BILLING_CYCLE",
            source,
        }),
        None => Ok(default),
    }
}

impl ServerConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a local `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let supabase = var("SUPABASE_URL").map(|url| SupabaseConfig {
            url: url.trim_end_matches('/').to_string(),
            service_role_key: var("SUPABASE_SERVICE_ROLE_KEY").unwrap_or_default(),
            anon_key: var("SUPABASE_ANON_KEY").unwrap_or_default(),
        });

        let cycle_policy = cycle_policy(var("BILLING_CYCLE"), defaults.cycle_policy)?;

        Ok(Self {
            host: var("MOGULATE_HOST").unwrap_or(defaults.host),
            port: parsed("MOGULATE_PORT").unwrap_or(defaults.port),
            supabase,
            openai: GeneratorConfig::from_env("OPENAI"),
            perplexity: GeneratorConfig::from_env("PERPLEXITY"),
            stripe: StripeConfig {
                secret_key: var("STRIPE_SECRET_KEY").unwrap_or_default(),
                webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
                starter_price: var("STRIPE_PRICE_STARTER"),
                pro_price: var("STRIPE_PRICE_PRO"),
                pro_min_cents: parsed("STRIPE_PRO_MIN_CENTS")
                    .unwrap_or(defaults.stripe.pro_min_cents),
            },
            upstream_timeout: parsed("UPSTREAM_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            payments_timeout: parsed("PAYMENTS_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.payments_timeout),
            cycle_policy,
            dev_token: var("MOGULATE_DEV_TOKEN").unwrap_or(defaults.dev_token),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert_eq!(config.payments_timeout, Duration::from_secs(15));
        assert_eq!(config.cycle_policy, CyclePolicy::CalendarMonth);
        assert!(config.supabase.is_none());
    }

    #[test]
    fn test_cycle_policy_setting() {
        assert_eq!(
            cycle_policy(None, CyclePolicy::CalendarMonth).unwrap(),
            CyclePolicy::CalendarMonth
        );
        assert_eq!(
            cycle_policy(Some("30d".to_string()), CyclePolicy::CalendarMonth).unwrap(),
            CyclePolicy::FixedDays(30)
        );

        let err = cycle_policy(Some("fortnight".to_string()), CyclePolicy::CalendarMonth)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "BILLING_CYCLE",
                ..
            }
        ));
        assert!(err.to_string().starts_with("BILLING_CYCLE: "));
    }
}
