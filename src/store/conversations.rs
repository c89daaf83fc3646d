//! Queries against the `conversations` table.

use anyhow::Context;
use chrono::Utc;

use super::models::Conversation;
use super::{fmt_dt, parse_dt, Store};

impl Store {
    /// Fetch a conversation handle, if one has ever been started.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_conversation(
        &self,
        bot_id: &str,
        user_id: i64,
    ) -> anyhow::Result<Option<Conversation>> {
        let row: Option<(String, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT bot_id, user_id, response_id, updated_at FROM conversations \
             WHERE bot_id = ? AND user_id = ?",
        )
        .bind(bot_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch conversation")?;

        row.map(|(bot_id, user_id, response_id, updated_at)| {
            Ok(Conversation {
                bot_id,
                user_id,
                response_id,
                updated_at: parse_dt(&updated_at)?,
            })
        })
        .transpose()
    }

    /// Overwrite the stored thread handle after a successful response.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn set_conversation_response_id(
        &self,
        bot_id: &str,
        user_id: i64,
        response_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO conversations (bot_id, user_id, response_id, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(bot_id, user_id) DO UPDATE SET \
             response_id = excluded.response_id, updated_at = excluded.updated_at",
        )
        .bind(bot_id)
        .bind(user_id)
        .bind(response_id)
        .bind(fmt_dt(Utc::now()))
        .execute(self.pool())
        .await
        .context("failed to persist conversation response id")?;
        Ok(())
    }

    /// Clear a conversation's thread handle, restarting context next time
    /// ("Exit conversation" button).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn clear_conversation(&self, bot_id: &str, user_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO conversations (bot_id, user_id, response_id, updated_at) \
             VALUES (?, ?, NULL, ?) \
             ON CONFLICT(bot_id, user_id) DO UPDATE SET \
             response_id = NULL, updated_at = excluded.updated_at",
        )
        .bind(bot_id)
        .bind(user_id)
        .bind(fmt_dt(Utc::now()))
        .execute(self.pool())
        .await
        .context("failed to clear conversation")?;
        Ok(())
    }
}
