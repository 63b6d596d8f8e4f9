use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `COMMERCE_METERING__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Payment retry policy and billing-view settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Consecutive failed payment notifications before suspension.
    #[serde(default = "default_max_payment_retries")]
    pub max_payment_retries: u32,
    #[serde(default = "default_billing_cycle_days")]
    pub billing_cycle_days: i64,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default = "default_recent_payments_limit")]
    pub recent_payments_limit: usize,
}

/// Write retry policy applied in front of the backing store.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_put_attempts")]
    pub put_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_max_payment_retries() -> u32 {
    3
}
fn default_billing_cycle_days() -> i64 {
    30
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_recent_payments_limit() -> usize {
    10
}
fn default_put_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            max_payment_retries: default_max_payment_retries(),
            billing_cycle_days: default_billing_cycle_days(),
            default_currency: default_currency(),
            recent_payments_limit: default_recent_payments_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            put_attempts: default_put_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            billing: BillingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("COMMERCE_METERING")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
