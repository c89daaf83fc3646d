//! Configuration loading and runtime paths.
//!
//! Human-tunable knobs live in a TOML file loaded here; secrets live in
//! the environment / `.env` file and are handled by [`crate::credentials`].
//! Every field has a sane default so a fresh deployment can start from an
//! empty `config.toml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration, loaded from `config.toml` plus environment
/// overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Subscription and trial knobs.
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    /// Funnel and broadcast dispatcher knobs.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Payment gateway (Robokassa) knobs.
    #[serde(default)]
    pub payments: PaymentsConfig,
    /// HTTP server knobs for the payment webhook.
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subscription: SubscriptionConfig::default(),
            dispatch: DispatchConfig::default(),
            payments: PaymentsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn default_trial_days() -> i64 {
    3
}

fn default_trial_enabled() -> bool {
    true
}

fn default_referral_commission_pct() -> f64 {
    15.0
}

/// Trial length, enable flag, referral commission rate.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Length of the trial period in days.
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,
    /// Whether new users are granted a trial on first `/start`.
    #[serde(default = "default_trial_enabled")]
    pub trial_enabled: bool,
    /// Percentage of a payment credited to the referrer.
    #[serde(default = "default_referral_commission_pct")]
    pub referral_commission_pct: f64,
    /// Days added to `subscription_expires_at` per payment.
    #[serde(default = "default_subscription_days_per_payment")]
    pub subscription_days_per_payment: i64,
    /// Tokens added to a bot's budget per token-purchase payment.
    #[serde(default = "default_tokens_per_purchase")]
    pub tokens_per_purchase: i64,
}

fn default_subscription_days_per_payment() -> i64 {
    30
}

fn default_tokens_per_purchase() -> i64 {
    100_000
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            trial_days: default_trial_days(),
            trial_enabled: default_trial_enabled(),
            referral_commission_pct: default_referral_commission_pct(),
            subscription_days_per_payment: default_subscription_days_per_payment(),
            tokens_per_purchase: default_tokens_per_purchase(),
        }
    }
}

fn default_funnel_poll_interval_secs() -> u64 {
    30
}

fn default_broadcast_poll_interval_secs() -> u64 {
    10
}

fn default_funnel_batch_size() -> i64 {
    100
}

fn default_broadcast_batch_size() -> i64 {
    50
}

fn default_inter_send_delay_ms() -> u64 {
    100
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

/// Dispatcher tick rates and batch sizes.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Funnel dispatcher poll interval, seconds.
    #[serde(default = "default_funnel_poll_interval_secs")]
    pub funnel_poll_interval_secs: u64,
    /// Mass-broadcast dispatcher poll interval, seconds.
    #[serde(default = "default_broadcast_poll_interval_secs")]
    pub broadcast_poll_interval_secs: u64,
    /// Max funnel rows claimed per tick.
    #[serde(default = "default_funnel_batch_size")]
    pub funnel_batch_size: i64,
    /// Max broadcast deliveries claimed per tick.
    #[serde(default = "default_broadcast_batch_size")]
    pub broadcast_batch_size: i64,
    /// Pause between sends within a batch, milliseconds.
    #[serde(default = "default_inter_send_delay_ms")]
    pub inter_send_delay_ms: u64,
    /// Fleet Supervisor reconcile tick, seconds.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            funnel_poll_interval_secs: default_funnel_poll_interval_secs(),
            broadcast_poll_interval_secs: default_broadcast_poll_interval_secs(),
            funnel_batch_size: default_funnel_batch_size(),
            broadcast_batch_size: default_broadcast_batch_size(),
            inter_send_delay_ms: default_inter_send_delay_ms(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

fn default_is_test() -> bool {
    false
}

/// Robokassa merchant identity (non-secret half lives here; passwords live
/// in [`crate::credentials`]).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PaymentsConfig {
    /// Merchant login shown to Robokassa.
    #[serde(default)]
    pub merchant_login: String,
    /// Whether to operate against the Robokassa test harness.
    #[serde(default = "default_is_test")]
    pub is_test: bool,
}

fn default_port() -> u16 {
    8080
}

/// HTTP server bind settings for the payment webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port the webhook server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// Filesystem layout for the running process: every path it touches,
/// collected in one place instead of scattering `PathBuf::from` calls.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root data directory.
    pub root: PathBuf,
    /// Path to `config.toml`.
    pub config_toml: PathBuf,
    /// Path to the `.env` credentials file.
    pub env_file: PathBuf,
    /// SQLite database file.
    pub database_file: PathBuf,
    /// Directory for rotated log files.
    pub logs_dir: PathBuf,
}

/// Resolve the platform-appropriate config directory, honoring
/// `TELEFORGE_HOME` for container/test deployments.
#[must_use]
pub fn runtime_paths(override_root: Option<&Path>) -> RuntimePaths {
    let root = override_root.map(PathBuf::from).unwrap_or_else(|| {
        directories::ProjectDirs::from("com", "teleforge", "teleforge")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"))
    });

    RuntimePaths {
        config_toml: root.join("config.toml"),
        env_file: root.join(".env"),
        database_file: root.join("teleforge.db"),
        logs_dir: root.join("logs"),
        root,
    }
}

/// Load `config.toml` from `path`, falling back to defaults for any field
/// (and the whole file) that is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed as TOML.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}
