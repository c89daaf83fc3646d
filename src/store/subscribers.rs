//! Queries against the `subscribers` table.

use anyhow::Context;
use chrono::Utc;

use super::models::Subscriber;
use super::{fmt_dt, parse_dt, Store};

type SubscriberRow = (
    String,
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    i64,
    i64,
);

fn row_into_subscriber(row: SubscriberRow) -> anyhow::Result<Subscriber> {
    let (
        bot_id,
        user_id,
        chat_id,
        first_name,
        username,
        last_name,
        funnel_started_at,
        last_broadcast_message,
        funnel_enabled,
        is_active,
    ) = row;

    Ok(Subscriber {
        bot_id,
        user_id,
        chat_id,
        first_name,
        username,
        last_name,
        funnel_started_at: funnel_started_at.map(|s| parse_dt(&s)).transpose()?,
        last_broadcast_message,
        funnel_enabled: funnel_enabled != 0,
        is_active: is_active != 0,
    })
}

const SUBSCRIBER_COLUMNS: &str = "bot_id, user_id, chat_id, first_name, username, last_name, \
    funnel_started_at, last_broadcast_message, funnel_enabled, is_active";

impl Store {
    /// Insert a subscriber if absent, or reactivate/refresh display fields
    /// if present. Returns whether the row was newly inserted — callers use
    /// this to decide whether to fire `onSubscriberActivated`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert_subscriber(
        &self,
        bot_id: &str,
        user_id: i64,
        chat_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
        last_name: Option<&str>,
    ) -> anyhow::Result<bool> {
        let existing = self.get_subscriber(bot_id, user_id).await?;

        sqlx::query(
            "INSERT INTO subscribers (bot_id, user_id, chat_id, first_name, username, \
             last_name, funnel_enabled, is_active) VALUES (?, ?, ?, ?, ?, ?, 1, 1) \
             ON CONFLICT(bot_id, user_id) DO UPDATE SET \
             chat_id = excluded.chat_id, first_name = excluded.first_name, \
             username = excluded.username, last_name = excluded.last_name, is_active = 1",
        )
        .bind(bot_id)
        .bind(user_id)
        .bind(chat_id)
        .bind(first_name)
        .bind(username)
        .bind(last_name)
        .execute(self.pool())
        .await
        .context("failed to upsert subscriber")?;

        Ok(existing.is_none())
    }

    /// Fetch a single subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_subscriber(
        &self,
        bot_id: &str,
        user_id: i64,
    ) -> anyhow::Result<Option<Subscriber>> {
        let row: Option<SubscriberRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE bot_id = ? AND user_id = ?"
        ))
        .bind(bot_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch subscriber")?;

        row.map(row_into_subscriber).transpose()
    }

    /// Mark `funnel_started_at = now` the first time a subscriber is
    /// activated; a no-op on repeat calls (duplicate-materialisation guard).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_funnel_started(&self, bot_id: &str, user_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE subscribers SET funnel_started_at = ? \
             WHERE bot_id = ? AND user_id = ? AND funnel_started_at IS NULL",
        )
        .bind(fmt_dt(Utc::now()))
        .bind(bot_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .context("failed to mark funnel started")?;
        Ok(())
    }

    /// Take a consistent snapshot of active subscribers for a bot, used by
    /// mass-broadcast materialisation.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_active_subscribers(&self, bot_id: &str) -> anyhow::Result<Vec<Subscriber>> {
        let rows: Vec<SubscriberRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE bot_id = ? AND is_active = 1"
        ))
        .bind(bot_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list active subscribers")?;

        rows.into_iter().map(row_into_subscriber).collect()
    }

    /// Deactivate a subscriber, e.g. on a `left_chat_member` update.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn deactivate_subscriber(&self, bot_id: &str, user_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE subscribers SET is_active = 0 WHERE bot_id = ? AND user_id = ?",
        )
        .bind(bot_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .context("failed to deactivate subscriber")?;
        Ok(())
    }

    /// Record the highest funnel step delivered to a subscriber, for
    /// display/diagnostics purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_last_broadcast_message(
        &self,
        bot_id: &str,
        user_id: i64,
        message_number: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE subscribers SET last_broadcast_message = ? \
             WHERE bot_id = ? AND user_id = ? \
             AND (last_broadcast_message IS NULL OR last_broadcast_message < ?)",
        )
        .bind(message_number)
        .bind(bot_id)
        .bind(user_id)
        .bind(message_number)
        .execute(self.pool())
        .await
        .context("failed to update last broadcast message")?;
        Ok(())
    }
}
