//! Queries against the `user_bots` table.

use anyhow::Context;
use uuid::Uuid;

use super::models::{AiProvider, BotStatus, UserBot};
use super::{fmt_dt, parse_dt, Store};

type BotRow = (
    String,
    i64,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<i64>,
    i64,
    i64,
    i64,
    String,
);

#[allow(clippy::too_many_lines)]
fn row_into_bot(row: BotRow) -> anyhow::Result<UserBot> {
    let (
        bot_id,
        owner_user_id,
        token,
        bot_username,
        status,
        is_running,
        welcome_message,
        welcome_button_text,
        confirmation_message,
        goodbye_message,
        goodbye_button_text,
        goodbye_button_url,
        ai_enabled,
        ai_assistant_id,
        ai_provider,
        ai_model,
        ai_system_prompt,
        ai_settings,
        tokens_limit_total,
        tokens_input_used,
        tokens_output_used,
        token_notification_sent,
        created_at,
    ) = row;

    Ok(UserBot {
        bot_id,
        owner_user_id,
        token,
        bot_username,
        status: status.parse()?,
        is_running: is_running != 0,
        welcome_message,
        welcome_button_text,
        confirmation_message,
        goodbye_message,
        goodbye_button_text,
        goodbye_button_url,
        ai_enabled: ai_enabled != 0,
        ai_assistant_id,
        ai_provider: ai_provider.parse()?,
        ai_model,
        ai_system_prompt,
        ai_settings: serde_json::from_str(&ai_settings).unwrap_or(serde_json::Value::Null),
        tokens_limit_total,
        tokens_input_used,
        tokens_output_used,
        token_notification_sent: token_notification_sent != 0,
        created_at: parse_dt(&created_at)?,
    })
}

const BOT_COLUMNS: &str = "bot_id, owner_user_id, token, bot_username, status, is_running, \
    welcome_message, welcome_button_text, confirmation_message, goodbye_message, \
    goodbye_button_text, goodbye_button_url, ai_enabled, ai_assistant_id, ai_provider, \
    ai_model, ai_system_prompt, ai_settings, tokens_limit_total, tokens_input_used, \
    tokens_output_used, token_notification_sent, created_at";

impl Store {
    /// Register a new bot token under `owner_user_id`, returning the
    /// freshly assigned `bot_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_bot(
        &self,
        owner_user_id: i64,
        token: &str,
        bot_username: &str,
    ) -> anyhow::Result<String> {
        let bot_id = Uuid::new_v4().to_string();
        let now = fmt_dt(chrono::Utc::now());

        sqlx::query(
            "INSERT INTO user_bots (bot_id, owner_user_id, token, bot_username, status, \
             is_running, ai_provider, ai_settings, tokens_input_used, tokens_output_used, \
             token_notification_sent, created_at) \
             VALUES (?, ?, ?, ?, 'active', 0, 'none', '{}', 0, 0, 0, ?)",
        )
        .bind(&bot_id)
        .bind(owner_user_id)
        .bind(token)
        .bind(bot_username)
        .bind(&now)
        .execute(self.pool())
        .await
        .context("failed to insert bot")?;

        Ok(bot_id)
    }

    /// Fetch a single bot by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored enum is malformed.
    pub async fn get_bot(&self, bot_id: &str) -> anyhow::Result<Option<UserBot>> {
        let row: Option<BotRow> = sqlx::query_as(&format!(
            "SELECT {BOT_COLUMNS} FROM user_bots WHERE bot_id = ?"
        ))
        .bind(bot_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch bot")?;

        row.map(row_into_bot).transpose()
    }

    /// List every bot owned by `owner_user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_bots_for_owner(&self, owner_user_id: i64) -> anyhow::Result<Vec<UserBot>> {
        let rows: Vec<BotRow> = sqlx::query_as(&format!(
            "SELECT {BOT_COLUMNS} FROM user_bots WHERE owner_user_id = ? ORDER BY created_at"
        ))
        .bind(owner_user_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list bots for owner")?;

        rows.into_iter().map(row_into_bot).collect()
    }

    /// List every bot the Fleet Supervisor considers eligible to run
    /// (`status = active`), used by `start()` and `reconcile()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_active_bots(&self) -> anyhow::Result<Vec<UserBot>> {
        let rows: Vec<BotRow> = sqlx::query_as(&format!(
            "SELECT {BOT_COLUMNS} FROM user_bots WHERE status = 'active'"
        ))
        .fetch_all(self.pool())
        .await
        .context("failed to list active bots")?;

        rows.into_iter().map(row_into_bot).collect()
    }

    /// Update `status` and `is_running` together, the two fields the
    /// Supervisor's reconcile loop diffs against.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_bot_run_state(
        &self,
        bot_id: &str,
        status: BotStatus,
        is_running: bool,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE user_bots SET status = ?, is_running = ? WHERE bot_id = ?")
            .bind(status.to_string())
            .bind(i64::from(is_running))
            .bind(bot_id)
            .execute(self.pool())
            .await
            .context("failed to update bot run state")?;
        Ok(())
    }

    /// Persist the result of provider auto-detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_ai_provider(
        &self,
        bot_id: &str,
        provider: AiProvider,
        assistant_id: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE user_bots SET ai_provider = ?, ai_assistant_id = ?, ai_enabled = 1 \
             WHERE bot_id = ?",
        )
        .bind(provider.to_string())
        .bind(assistant_id)
        .bind(bot_id)
        .execute(self.pool())
        .await
        .context("failed to persist ai provider")?;
        Ok(())
    }

    /// Atomically debit both token counters by the exact reported amounts
    /// and recompute `token_notification_sent` thresholds. Always writes,
    /// even for a zero-usage turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn debit_tokens(
        &self,
        bot_id: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE user_bots SET tokens_input_used = tokens_input_used + ?, \
             tokens_output_used = tokens_output_used + ? WHERE bot_id = ?",
        )
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(bot_id)
        .execute(self.pool())
        .await
        .context("failed to debit tokens")?;
        Ok(())
    }

    /// Increase a bot's total token budget, e.g. after a token top-up
    /// purchase, and clear the exhaustion-notification flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn add_token_budget(&self, bot_id: &str, extra_tokens: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE user_bots SET \
             tokens_limit_total = COALESCE(tokens_limit_total, 0) + ?, \
             token_notification_sent = 0 WHERE bot_id = ?",
        )
        .bind(extra_tokens)
        .bind(bot_id)
        .execute(self.pool())
        .await
        .context("failed to add token budget")?;
        Ok(())
    }

    /// Mark that the low-budget or exhaustion notification has fired, so
    /// it is not sent again until the flag is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_token_notification_sent(&self, bot_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE user_bots SET token_notification_sent = 1 WHERE bot_id = ?")
            .bind(bot_id)
            .execute(self.pool())
            .await
            .context("failed to mark token notification sent")?;
        Ok(())
    }

    /// Update the welcome/goodbye/AI-config slots in place, for the
    /// settings wizard; does not touch `status`/`is_running`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_bot_welcome_message(
        &self,
        bot_id: &str,
        welcome_message: &str,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE user_bots SET welcome_message = ? WHERE bot_id = ?")
            .bind(welcome_message)
            .bind(bot_id)
            .execute(self.pool())
            .await
            .context("failed to update welcome message")?;
        Ok(())
    }

    /// Total registered bots, for the super-admin `admin_stats` callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_bots(&self) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_bots")
            .fetch_one(self.pool())
            .await
            .context("failed to count bots")?;
        Ok(count)
    }

    /// Permanently delete a bot and everything that references it. Only
    /// reachable via an explicit owner confirmation (`confirm_delete_<id>`).
    ///
    /// # Errors
    ///
    /// Returns an error if the deletes fail.
    pub async fn delete_bot(&self, bot_id: &str) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await.context("failed to start tx")?;

        sqlx::query("DELETE FROM scheduled_messages WHERE bot_id = ?")
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete scheduled messages")?;
        sqlx::query("DELETE FROM subscribers WHERE bot_id = ?")
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete subscribers")?;
        sqlx::query(
            "DELETE FROM broadcast_deliveries WHERE broadcast_id IN \
             (SELECT id FROM mass_broadcasts WHERE bot_id = ?)",
        )
        .bind(bot_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete broadcast deliveries")?;
        sqlx::query("DELETE FROM mass_broadcasts WHERE bot_id = ?")
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete mass broadcasts")?;
        sqlx::query("DELETE FROM conversations WHERE bot_id = ?")
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete conversations")?;
        sqlx::query("DELETE FROM user_bots WHERE bot_id = ?")
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete bot row")?;

        tx.commit().await.context("failed to commit bot deletion")?;
        Ok(())
    }
}
