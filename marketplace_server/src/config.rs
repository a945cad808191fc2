use std::{env, io::Write, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use mkt_common::{parse_boolean_flag, Money, Secret, DEFAULT_CURRENCY_CODE};
use order_engine::{
    order_objects::{
        CheckoutSettings,
        ReconciliationSettings,
        DEFAULT_QUERY_TIMEOUT,
        DEFAULT_SHIPPING_FEE,
        DEFAULT_VERIFY_LIMIT,
        DEFAULT_VERIFY_WINDOW_SECS,
    },
    providers::{MomoConfig, PayOsConfig, StripeConfig, ZaloPayConfig, DEFAULT_SIGNATURE_TOLERANCE_SECS},
};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde_json::json;
use tempfile::NamedTempFile;

use crate::errors::ServerError;

const DEFAULT_MKT_HOST: &str = "127.0.0.1";
const DEFAULT_MKT_PORT: u16 = 4444;
const DEFAULT_RETURN_URL: &str = "http://localhost:3000/checkout/result";
const DEFAULT_UNPAID_ORDER_TIMEOUT: Duration = Duration::hours(24);
const DEFAULT_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(300);
const DEFAULT_SWEEP_MIN_AGE: Duration = Duration::minutes(10);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(24);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub auth: AuthConfig,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address.
    pub use_forwarded: bool,
    /// Flat shipping fee added to every order when a payment is requested.
    pub shipping_fee: Money,
    /// Where payment gateways send the buyer once they have paid.
    pub return_url: String,
    /// The public base URL of this server. Gateways deliver webhooks to `{public_url}/payments/{provider}/webhook`.
    pub public_url: String,
    /// Upper bound on a single status query to a gateway during payment verification.
    pub provider_query_timeout: StdDuration,
    pub verify_rate_limit: u32,
    pub verify_rate_window: Duration,
    /// The time before an unpaid order is voided.
    pub unpaid_order_timeout: Duration,
    /// How often pending payments are checked with their gateways.
    pub sweep_interval: StdDuration,
    /// Orders younger than this are left to their webhooks.
    pub sweep_min_age: Duration,
    pub providers: ProviderConfigs,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MKT_HOST.to_string(),
            port: DEFAULT_MKT_PORT,
            database_url: String::default(),
            auth: AuthConfig::default(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            shipping_fee: Money::from(DEFAULT_SHIPPING_FEE),
            return_url: DEFAULT_RETURN_URL.to_string(),
            public_url: format!("http://{DEFAULT_MKT_HOST}:{DEFAULT_MKT_PORT}"),
            provider_query_timeout: DEFAULT_QUERY_TIMEOUT,
            verify_rate_limit: DEFAULT_VERIFY_LIMIT,
            verify_rate_window: Duration::seconds(DEFAULT_VERIFY_WINDOW_SECS),
            unpaid_order_timeout: DEFAULT_UNPAID_ORDER_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_min_age: DEFAULT_SWEEP_MIN_AGE,
            providers: ProviderConfigs::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("MKT_HOST").ok().unwrap_or_else(|| DEFAULT_MKT_HOST.into());
        let port = env::var("MKT_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for MKT_PORT. {e} Using the default, {DEFAULT_MKT_PORT}, instead."
                    );
                    DEFAULT_MKT_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_MKT_PORT);
        let database_url = env::var("MKT_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ MKT_DATABASE_URL is not set. Please set it to the URL for the marketplace database.");
            String::default()
        });
        let auth = AuthConfig::try_from_env().unwrap_or_else(|e| {
            warn!(
                "🪛️ Could not load the authentication configuration from environment variables. {e}. Reverting to the \
                 default configuration."
            );
            AuthConfig::default()
        });
        let use_x_forwarded_for = parse_boolean_flag(env::var("MKT_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("MKT_USE_FORWARDED").ok(), false);
        let shipping_fee = env_number("MKT_SHIPPING_FEE", DEFAULT_SHIPPING_FEE);
        let return_url = env::var("MKT_RETURN_URL").ok().unwrap_or_else(|| {
            info!("🪛️ MKT_RETURN_URL is not set. Buyers will be sent back to {DEFAULT_RETURN_URL} after paying.");
            DEFAULT_RETURN_URL.into()
        });
        let public_url = env::var("MKT_PUBLIC_URL").ok().unwrap_or_else(|| {
            let url = format!("http://{host}:{port}");
            warn!("🪛️ MKT_PUBLIC_URL is not set. Gateways will be told to deliver webhooks to {url}.");
            url
        });
        let timeout_ms = env_number("MKT_PROVIDER_QUERY_TIMEOUT_MS", DEFAULT_QUERY_TIMEOUT.as_millis() as i64);
        let verify_rate_limit = env_number("MKT_VERIFY_RATE_LIMIT", i64::from(DEFAULT_VERIFY_LIMIT));
        let verify_rate_window = env_number("MKT_VERIFY_RATE_WINDOW", DEFAULT_VERIFY_WINDOW_SECS);
        let unpaid_order_timeout = env_number("MKT_UNPAID_ORDER_TIMEOUT", DEFAULT_UNPAID_ORDER_TIMEOUT.num_hours());
        let sweep_interval = env_number("MKT_SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL.as_secs() as i64);
        let sweep_min_age = env_number("MKT_SWEEP_MIN_AGE", DEFAULT_SWEEP_MIN_AGE.num_minutes());
        let providers = ProviderConfigs::from_env();
        Self {
            host,
            port,
            database_url,
            auth,
            use_x_forwarded_for,
            use_forwarded,
            shipping_fee: Money::from(shipping_fee),
            return_url,
            public_url: public_url.trim_end_matches('/').to_string(),
            provider_query_timeout: StdDuration::from_millis(timeout_ms.max(1) as u64),
            verify_rate_limit: u32::try_from(verify_rate_limit.max(1)).unwrap_or(DEFAULT_VERIFY_LIMIT),
            verify_rate_window: Duration::seconds(verify_rate_window.max(1)),
            unpaid_order_timeout: Duration::hours(unpaid_order_timeout),
            sweep_interval: StdDuration::from_secs(sweep_interval.max(1) as u64),
            sweep_min_age: Duration::minutes(sweep_min_age),
            providers,
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig { use_x_forwarded_for: self.use_x_forwarded_for, use_forwarded: self.use_forwarded }
    }

    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            shipping_fee: self.shipping_fee,
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            return_url: self.return_url.clone(),
            callback_base_url: self.public_url.clone(),
        }
    }

    pub fn reconciliation_settings(&self) -> ReconciliationSettings {
        ReconciliationSettings {
            shipping_fee: self.shipping_fee,
            query_timeout: self.provider_query_timeout,
            verify_limit: self.verify_rate_limit,
            verify_window: self.verify_rate_window,
        }
    }
}

/// How to work out a caller's address when the server sits behind a proxy.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyConfig {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
}

/// Reads an integer setting, logging the fallback when it is missing or malformed.
fn env_number(name: &str, default: i64) -> i64 {
    env::var(name)
        .map_err(|_| info!("🪛️ {name} is not set. Using the default value of {default}."))
        .and_then(|s| s.trim().parse::<i64>().map_err(|e| warn!("🪛️ Invalid configuration value for {name}. {e}")))
        .ok()
        .unwrap_or(default)
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

//-----------------------------------------------  ProviderConfigs  ----------------------------------------------------
/// Gateway credentials. A provider whose credentials are missing is not registered, so it cannot be chosen at
/// checkout and its webhooks are refused.
#[derive(Clone, Debug, Default)]
pub struct ProviderConfigs {
    pub momo: Option<MomoConfig>,
    pub payos: Option<PayOsConfig>,
    pub stripe: Option<StripeConfig>,
    pub zalopay: Option<ZaloPayConfig>,
}

impl ProviderConfigs {
    pub fn from_env() -> Self {
        let momo = match (
            env_string("MKT_MOMO_PARTNER_CODE"),
            env_string("MKT_MOMO_ACCESS_KEY"),
            env_string("MKT_MOMO_SECRET_KEY"),
        ) {
            (Some(partner_code), Some(access_key), Some(secret_key)) => {
                let secret_key = Secret::new(secret_key);
                let mut config = MomoConfig { partner_code, access_key, secret_key, ..Default::default() };
                if let Some(endpoint) = env_string("MKT_MOMO_ENDPOINT") {
                    config.endpoint = endpoint;
                }
                Some(config)
            },
            _ => None,
        };
        let payos = match (
            env_string("MKT_PAYOS_CLIENT_ID"),
            env_string("MKT_PAYOS_API_KEY"),
            env_string("MKT_PAYOS_CHECKSUM_KEY"),
        ) {
            (Some(client_id), Some(api_key), Some(checksum_key)) => {
                let mut config = PayOsConfig {
                    client_id,
                    api_key: Secret::new(api_key),
                    checksum_key: Secret::new(checksum_key),
                    ..Default::default()
                };
                if let Some(endpoint) = env_string("MKT_PAYOS_ENDPOINT") {
                    config.endpoint = endpoint;
                }
                Some(config)
            },
            _ => None,
        };
        let stripe = match (env_string("MKT_STRIPE_SECRET_KEY"), env_string("MKT_STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => {
                let mut config = StripeConfig {
                    secret_key: Secret::new(secret_key),
                    webhook_secret: Secret::new(webhook_secret),
                    ..Default::default()
                };
                if let Some(endpoint) = env_string("MKT_STRIPE_ENDPOINT") {
                    config.endpoint = endpoint;
                }
                config.signature_tolerance_secs =
                    env_number("MKT_STRIPE_SIGNATURE_TOLERANCE", DEFAULT_SIGNATURE_TOLERANCE_SECS).max(1);
                Some(config)
            },
            _ => None,
        };
        let zalopay_keys = (env_string("MKT_ZALOPAY_KEY1"), env_string("MKT_ZALOPAY_KEY2"));
        let zalopay = match (env_string("MKT_ZALOPAY_APP_ID"), zalopay_keys) {
            (Some(app_id), (Some(key1), Some(key2))) => {
                let mut config =
                    ZaloPayConfig { app_id, key1: Secret::new(key1), key2: Secret::new(key2), ..Default::default() };
                if let Some(endpoint) = env_string("MKT_ZALOPAY_ENDPOINT") {
                    config.endpoint = endpoint;
                }
                Some(config)
            },
            _ => None,
        };
        let configs = Self { momo, payos, stripe, zalopay };
        let enabled = configs.enabled();
        if enabled.is_empty() {
            warn!("🪛️ No payment provider is configured. Checkout will create orders, but nobody will be able to pay.");
        } else {
            info!("🪛️ Payment providers enabled: {}", enabled.join(", "));
        }
        configs
    }

    pub fn enabled(&self) -> Vec<&'static str> {
        [
            self.momo.as_ref().map(|_| "momo"),
            self.payos.as_ref().map(|_| "payos"),
            self.stripe.as_ref().map(|_| "stripe"),
            self.zalopay.as_ref().map(|_| "zalopay"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

//-------------------------------------------------  AuthConfig  -------------------------------------------------------
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// The HMAC secret used to sign and verify access tokens (HS256).
    pub jwt_secret: Secret<String>,
    /// How long tokens issued by this server remain valid.
    pub token_lifetime: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        warn!(
            "🚨️🚨️🚨️ The JWT secret has not been set. I'm using a random value for this session. DO NOT operate on \
             production like this since every issued token becomes invalid on restart. 🚨️🚨️🚨️"
        );
        let secret = thread_rng().sample_iter(&Alphanumeric).take(48).map(char::from).collect::<String>();
        let mut tmpfile = NamedTempFile::new().ok().and_then(|f| f.keep().ok());
        match &mut tmpfile {
            Some((f, p)) => {
                let key_data = json!({ "jwt_secret": secret }).to_string();
                match writeln!(f, "{key_data}") {
                    Ok(()) => warn!(
                        "🚨️🚨️🚨️ The JWT secret for this session was written to {}. If this is a production instance, \
                         you are doing it wrong! Set the MKT_JWT_SECRET environment variable instead. 🚨️🚨️🚨️",
                        p.to_str().unwrap_or("???")
                    ),
                    Err(e) => warn!("🪛️ Could not write the JWT secret to the temporary file. {e}"),
                }
            },
            None => {
                warn!("🪛️ Could not create a temporary file to store the JWT secret. ");
            },
        }
        Self { jwt_secret: Secret::new(secret), token_lifetime: DEFAULT_TOKEN_LIFETIME }
    }
}

impl AuthConfig {
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self { jwt_secret: Secret::new(secret.into()), token_lifetime: DEFAULT_TOKEN_LIFETIME }
    }

    pub fn try_from_env() -> Result<Self, ServerError> {
        let secret = env::var("MKT_JWT_SECRET")
            .map_err(|e| ServerError::ConfigurationError(format!("{e} [MKT_JWT_SECRET]")))?;
        if secret.len() < 32 {
            return Err(ServerError::ConfigurationError(
                "MKT_JWT_SECRET must be at least 32 characters long".to_string(),
            ));
        }
        let lifetime = env_number("MKT_TOKEN_LIFETIME", DEFAULT_TOKEN_LIFETIME.num_hours());
        Ok(Self { jwt_secret: Secret::new(secret), token_lifetime: Duration::hours(lifetime.max(1)) })
    }
}
