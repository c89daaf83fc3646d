//! Queries against the `users` table.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::models::{SubscriptionStatus, User};
use super::{fmt_dt, parse_dt, Store};

type UserRow = (
    i64,
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<i64>,
    i64,
    String,
    String,
);

fn row_into_user(row: UserRow) -> anyhow::Result<User> {
    let (
        user_id,
        admin_chat_id,
        subscription_status,
        trial_started_at,
        subscription_expires_at,
        referral_code,
        referred_by,
        total_referrals,
        referral_earnings,
        created_at,
    ) = row;

    Ok(User {
        user_id,
        admin_chat_id,
        subscription_status: subscription_status.parse()?,
        trial_started_at: trial_started_at.map(|s| parse_dt(&s)).transpose()?,
        subscription_expires_at: subscription_expires_at.map(|s| parse_dt(&s)).transpose()?,
        referral_code,
        referred_by,
        total_referrals,
        referral_earnings,
        created_at: parse_dt(&created_at)?,
    })
}

/// Generate a short, URL-safe referral code.
fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

impl Store {
    /// Fetch a user by external Telegram id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored enum/timestamp is
    /// malformed.
    pub async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, admin_chat_id, subscription_status, trial_started_at, \
             subscription_expires_at, referral_code, referred_by, total_referrals, \
             referral_earnings, created_at FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch user")?;

        row.map(row_into_user).transpose()
    }

    /// Fetch a user by their referral code.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored enum/timestamp is
    /// malformed.
    pub async fn get_user_by_referral_code(
        &self,
        code: &str,
    ) -> anyhow::Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, admin_chat_id, subscription_status, trial_started_at, \
             subscription_expires_at, referral_code, referred_by, total_referrals, \
             referral_earnings, created_at FROM users WHERE referral_code = ?",
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch user by referral code")?;

        row.map(row_into_user).transpose()
    }

    /// Register a brand-new user, assigning a fresh referral code and
    /// optionally starting the trial.
    ///
    /// If the user already exists this is a no-op that returns the existing
    /// row, making repeated `/start` calls idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails after repeated referral-code
    /// collisions, or if the resulting row cannot be re-read.
    pub async fn get_or_create_user(
        &self,
        user_id: i64,
        admin_chat_id: i64,
        referred_by: Option<i64>,
        trial_enabled: bool,
    ) -> anyhow::Result<User> {
        if let Some(existing) = self.get_user(user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let status = if trial_enabled {
            SubscriptionStatus::Trial
        } else {
            SubscriptionStatus::Free
        };
        let trial_started_at = trial_enabled.then_some(now);

        // Referral codes are short and random; collisions are rare but the
        // unique constraint will reject them, so retry a handful of times.
        for _ in 0..5 {
            let code = generate_referral_code();
            let result = sqlx::query(
                "INSERT INTO users (user_id, admin_chat_id, subscription_status, \
                 trial_started_at, referral_code, referred_by, total_referrals, \
                 referral_earnings, created_at) VALUES (?, ?, ?, ?, ?, ?, 0, '0.00', ?)",
            )
            .bind(user_id)
            .bind(admin_chat_id)
            .bind(status.to_string())
            .bind(trial_started_at.map(fmt_dt))
            .bind(&code)
            .bind(referred_by)
            .bind(fmt_dt(now))
            .execute(self.pool())
            .await;

            match result {
                Ok(_) => {
                    return self
                        .get_user(user_id)
                        .await?
                        .context("user row vanished immediately after insert");
                }
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => continue,
                Err(err) => return Err(err).context("failed to insert user"),
            }
        }

        anyhow::bail!("failed to allocate a unique referral code after 5 attempts")
    }

    /// Transition a user's subscription status directly (used when a trial
    /// or paid period lapses).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_subscription_status(
        &self,
        user_id: i64,
        status: SubscriptionStatus,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET subscription_status = ? WHERE user_id = ?")
            .bind(status.to_string())
            .bind(user_id)
            .execute(self.pool())
            .await
            .context("failed to update subscription status")?;
        Ok(())
    }

    /// Extend (or start) a user's paid subscription by `days`, stacking on
    /// any remaining paid time, and mark them `paid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or the user does not exist.
    pub async fn extend_subscription(
        &self,
        user_id: i64,
        days: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<DateTime<Utc>> {
        let user = self
            .get_user(user_id)
            .await?
            .context("cannot extend subscription for unknown user")?;

        let base = user.subscription_expires_at.filter(|exp| *exp > now).unwrap_or(now);
        let new_expiry = base + chrono::Duration::days(days);

        sqlx::query(
            "UPDATE users SET subscription_status = 'paid', subscription_expires_at = ? \
             WHERE user_id = ?",
        )
        .bind(fmt_dt(new_expiry))
        .bind(user_id)
        .execute(self.pool())
        .await
        .context("failed to extend subscription")?;

        Ok(new_expiry)
    }

    /// Credit a referrer's earnings and referral count.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn credit_referral_earnings(
        &self,
        referrer_user_id: i64,
        amount: &str,
    ) -> anyhow::Result<()> {
        let amount: f64 = amount
            .parse()
            .with_context(|| format!("invalid commission amount: {amount}"))?;

        sqlx::query(
            "UPDATE users SET total_referrals = total_referrals + 1, \
             referral_earnings = printf('%.2f', CAST(referral_earnings AS REAL) + ?) \
             WHERE user_id = ?",
        )
        .bind(amount)
        .bind(referrer_user_id)
        .execute(self.pool())
        .await
        .context("failed to credit referral earnings")?;

        Ok(())
    }

    /// List every user whose paid subscription has lapsed as of `now` but
    /// whose row still shows `paid`. Trial expiry is checked separately by
    /// the caller since it depends on the configured `trial_days`, which
    /// the store does not know about.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_lapsed_paid_users(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT user_id, admin_chat_id, subscription_status, trial_started_at, \
             subscription_expires_at, referral_code, referred_by, total_referrals, \
             referral_earnings, created_at FROM users \
             WHERE subscription_status = 'paid' AND subscription_expires_at < ?",
        )
        .bind(fmt_dt(now))
        .fetch_all(self.pool())
        .await
        .context("failed to list lapsed paid users")?;

        rows.into_iter().map(row_into_user).collect()
    }

    /// Total registered users, for the super-admin `admin_stats` callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_users(&self) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await
            .context("failed to count users")?;
        Ok(count)
    }

    /// List every user still marked `trial` (the caller filters by
    /// `trial_started_at + trial_days < now`).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_trial_users(&self) -> anyhow::Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT user_id, admin_chat_id, subscription_status, trial_started_at, \
             subscription_expires_at, referral_code, referred_by, total_referrals, \
             referral_earnings, created_at FROM users WHERE subscription_status = 'trial'",
        )
        .fetch_all(self.pool())
        .await
        .context("failed to list trial users")?;

        rows.into_iter().map(row_into_user).collect()
    }
}
