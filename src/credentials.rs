//! Secret resolution: the `.env`-sourced keys this platform needs.
//!
//! A map of resolved secrets with a custom [`std::fmt::Debug`] impl that
//! never prints values, so a stray `{:?}` in a log statement cannot leak
//! a token.

use std::collections::BTreeMap;

use anyhow::Context;

const KEYS: &[&str] = &[
    "MASTER_BOT_TOKEN",
    "DATABASE_URL",
    "ROBOKASSA_MERCHANT_LOGIN",
    "ROBOKASSA_PASSWORD1",
    "ROBOKASSA_PASSWORD2",
    "ROBOKASSA_PAYMENT_AMOUNT",
    "ROBOKASSA_TOKENS_AMOUNT",
    "ROBOKASSA_IS_TEST",
    "TOKENS_PER_PURCHASE",
    "TRIAL_DAYS",
    "TRIAL_ENABLED",
    "ADMIN_CHAT_ID",
    "OPENAI_API_KEY",
    "PORT",
];

/// Resolved environment-sourced secrets. Never logged in full.
#[derive(Clone, Default)]
pub struct Credentials {
    values: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        f.debug_struct("Credentials")
            .field("present_keys", &keys)
            .finish()
    }
}

impl Credentials {
    /// Load a `.env` file if present (never required — production
    /// deployments may set real environment variables instead), then read
    /// every key in [`KEYS`] from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the required `MASTER_BOT_TOKEN` key is absent.
    pub fn load(env_file: &std::path::Path) -> anyhow::Result<Self> {
        if env_file.exists() {
            dotenvy::from_path(env_file)
                .with_context(|| format!("failed to load {}", env_file.display()))?;
        }

        let mut values = BTreeMap::new();
        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                values.insert((*key).to_owned(), value);
            }
        }

        if !values.contains_key("MASTER_BOT_TOKEN") {
            anyhow::bail!("MASTER_BOT_TOKEN is required but not set");
        }

        Ok(Self { values })
    }

    /// Fetch a required key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key was not resolved.
    pub fn require(&self, key: &str) -> anyhow::Result<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .with_context(|| format!("missing required credential: {key}"))
    }

    /// Fetch an optional key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The master bot's Telegram token.
    ///
    /// # Errors
    ///
    /// Returns an error if unset.
    pub fn master_bot_token(&self) -> anyhow::Result<&str> {
        self.require("MASTER_BOT_TOKEN")
    }

    /// The super-admin's chat id, for `/file_id` gating.
    ///
    /// # Errors
    ///
    /// Returns an error if unset or not an integer.
    pub fn admin_chat_id(&self) -> anyhow::Result<i64> {
        self.require("ADMIN_CHAT_ID")?
            .parse()
            .context("ADMIN_CHAT_ID is not a valid integer")
    }
}
