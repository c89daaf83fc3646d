//! Queries backing the Funnel Scheduler: sequences, message
//! templates, buttons, and materialised `scheduled_messages` rows.

use anyhow::Context;
use chrono::{DateTime, Utc};

use super::models::{
    BroadcastMessage, BroadcastSequence, MediaType, MessageButton, ScheduledMessage,
};
use super::{fmt_dt, parse_dt, Store};

type MessageRow = (
    i64,
    i64,
    i64,
    String,
    f64,
    Option<String>,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    i64,
    Option<String>,
    Option<String>,
);

#[allow(clippy::too_many_lines)]
fn row_into_message(row: MessageRow) -> anyhow::Result<BroadcastMessage> {
    let (
        message_id,
        sequence_id,
        message_number,
        message_text,
        delay_hours,
        media_file_id,
        media_type,
        media_file_unique_id,
        media_file_size,
        media_filename,
        is_active,
        utm_campaign,
        utm_content,
    ) = row;

    Ok(BroadcastMessage {
        message_id,
        sequence_id,
        message_number,
        message_text,
        delay_hours,
        media_file_id,
        media_type: media_type.parse()?,
        media_file_unique_id,
        media_file_size,
        media_filename,
        is_active: is_active != 0,
        utm_campaign,
        utm_content,
    })
}

const MESSAGE_COLUMNS: &str = "message_id, sequence_id, message_number, message_text, \
    delay_hours, media_file_id, media_type, media_file_unique_id, media_file_size, \
    media_filename, is_active, utm_campaign, utm_content";

type ScheduledRow = (i64, String, i64, i64, String, String, Option<String>);

fn row_into_scheduled(row: ScheduledRow) -> anyhow::Result<ScheduledMessage> {
    let (id, bot_id, subscriber_id, message_id, scheduled_at, status, error_message) = row;

    Ok(ScheduledMessage {
        id,
        bot_id,
        subscriber_id,
        message_id,
        scheduled_at: parse_dt(&scheduled_at)?,
        status: status.parse()?,
        error_message,
    })
}

const SCHEDULED_COLUMNS: &str =
    "id, bot_id, subscriber_id, message_id, scheduled_at, status, error_message";

impl Store {
    /// Fetch or lazily create the single `BroadcastSequence` container for a
    /// bot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query/insert fails.
    pub async fn get_or_create_sequence(&self, bot_id: &str) -> anyhow::Result<BroadcastSequence> {
        let existing: Option<(i64, i64)> = sqlx::query_as(
            "SELECT sequence_id, is_enabled FROM broadcast_sequences WHERE bot_id = ?",
        )
        .bind(bot_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch broadcast sequence")?;

        if let Some((sequence_id, is_enabled)) = existing {
            return Ok(BroadcastSequence {
                sequence_id,
                is_enabled: is_enabled != 0,
            });
        }

        let inserted = sqlx::query(
            "INSERT INTO broadcast_sequences (bot_id, is_enabled) VALUES (?, 1)",
        )
        .bind(bot_id)
        .execute(self.pool())
        .await
        .context("failed to create broadcast sequence")?;

        Ok(BroadcastSequence {
            sequence_id: inserted.last_insert_rowid(),
            is_enabled: true,
        })
    }

    /// Toggle a sequence's gate without touching already-scheduled rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_sequence_enabled(
        &self,
        sequence_id: i64,
        enabled: bool,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE broadcast_sequences SET is_enabled = ? WHERE sequence_id = ?")
            .bind(i64::from(enabled))
            .bind(sequence_id)
            .execute(self.pool())
            .await
            .context("failed to toggle sequence")?;
        Ok(())
    }

    /// List every active funnel step template for a sequence, ordered by
    /// `message_number`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_active_messages(
        &self,
        sequence_id: i64,
    ) -> anyhow::Result<Vec<BroadcastMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM broadcast_messages \
             WHERE sequence_id = ? AND is_active = 1 ORDER BY message_number"
        ))
        .bind(sequence_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list funnel messages")?;

        rows.into_iter().map(row_into_message).collect()
    }

    /// Fetch a single funnel step template.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_message(&self, message_id: i64) -> anyhow::Result<Option<BroadcastMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM broadcast_messages WHERE message_id = ?"
        ))
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch funnel message")?;

        row.map(row_into_message).transpose()
    }

    /// Insert a new funnel step. If `requested_number` is taken, advances
    /// to the next free integer without shifting existing rows, so
    /// already-materialised `ScheduledMessage` references stay valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_message(
        &self,
        sequence_id: i64,
        requested_number: i64,
        message_text: &str,
        delay_hours: f64,
        media_file_id: Option<&str>,
        media_type: MediaType,
    ) -> anyhow::Result<i64> {
        let taken: Vec<(i64,)> = sqlx::query_as(
            "SELECT message_number FROM broadcast_messages \
             WHERE sequence_id = ? AND message_number >= ? ORDER BY message_number",
        )
        .bind(sequence_id)
        .bind(requested_number)
        .fetch_all(self.pool())
        .await
        .context("failed to probe message numbers")?;

        let mut number = requested_number;
        for (existing,) in taken {
            if existing == number {
                number = number.saturating_add(1);
            } else {
                break;
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO broadcast_messages \
             (sequence_id, message_number, message_text, delay_hours, media_file_id, \
              media_type, is_active) VALUES (?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(sequence_id)
        .bind(number)
        .bind(message_text)
        .bind(delay_hours)
        .bind(media_file_id)
        .bind(media_type.to_string())
        .execute(self.pool())
        .await
        .context("failed to insert funnel message")?;

        Ok(inserted.last_insert_rowid())
    }

    /// List the inline buttons on a funnel message, in display order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_message_buttons(
        &self,
        message_id: i64,
    ) -> anyhow::Result<Vec<MessageButton>> {
        let rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
            "SELECT message_id, position, button_text, button_url FROM message_buttons \
             WHERE message_id = ? ORDER BY position",
        )
        .bind(message_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list message buttons")?;

        Ok(rows
            .into_iter()
            .map(|(message_id, position, button_text, button_url)| MessageButton {
                message_id,
                position,
                button_text,
                button_url,
            })
            .collect())
    }

    /// Materialise one `ScheduledMessage` per active step in `sequence_id`
    /// for `subscriber_id`, anchored at `activated_at`. Steps already
    /// materialised for this subscriber are skipped via the
    /// `unique(bot_id, subscriber_id, message_id)` constraint — re-entry is
    /// therefore a no-op for those rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn materialise_funnel(
        &self,
        bot_id: &str,
        subscriber_id: i64,
        sequence_id: i64,
        activated_at: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let messages = self.list_active_messages(sequence_id).await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await.context("failed to start tx")?;
        let mut inserted = 0usize;

        for message in &messages {
            #[allow(clippy::cast_possible_truncation)]
            let delay_seconds = (message.delay_hours * 3600.0) as i64;
            let scheduled_at = activated_at + chrono::Duration::seconds(delay_seconds);

            let result = sqlx::query(
                "INSERT INTO scheduled_messages \
                 (bot_id, subscriber_id, message_id, scheduled_at, status) \
                 VALUES (?, ?, ?, ?, 'pending')",
            )
            .bind(bot_id)
            .bind(subscriber_id)
            .bind(message.message_id)
            .bind(fmt_dt(scheduled_at))
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => inserted = inserted.saturating_add(1),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {}
                Err(err) => return Err(err).context("failed to materialise funnel row"),
            }
        }

        tx.commit().await.context("failed to commit materialisation")?;
        Ok(inserted)
    }

    /// Reschedule every `pending` row referencing `message_id` to
    /// `created_at + new_delay`, leaving terminal rows untouched.
    ///
    /// `created_at` here is each row's own `scheduled_at - old_delay`,
    /// i.e. the subscriber's activation moment, recovered without a
    /// separate column by subtracting the template's delay *before* the
    /// edit from the row's current `scheduled_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn reschedule_pending(
        &self,
        message_id: i64,
        old_delay_hours: f64,
        new_delay_hours: f64,
    ) -> anyhow::Result<u64> {
        #[allow(clippy::cast_possible_truncation)]
        let delta_seconds = ((new_delay_hours - old_delay_hours) * 3600.0) as i64;

        let result = sqlx::query(
            "UPDATE scheduled_messages \
             SET scheduled_at = datetime(scheduled_at, printf('%+d seconds', ?)) \
             WHERE message_id = ? AND status = 'pending'",
        )
        .bind(delta_seconds)
        .bind(message_id)
        .execute(self.pool())
        .await
        .context("failed to reschedule pending rows")?;

        sqlx::query("UPDATE broadcast_messages SET delay_hours = ? WHERE message_id = ?")
            .bind(new_delay_hours)
            .bind(message_id)
            .execute(self.pool())
            .await
            .context("failed to update message delay")?;

        Ok(result.rows_affected())
    }

    /// Deactivate a funnel step and cascade-cancel its `pending` deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if either update fails.
    pub async fn delete_message(&self, message_id: i64) -> anyhow::Result<u64> {
        sqlx::query("UPDATE broadcast_messages SET is_active = 0 WHERE message_id = ?")
            .bind(message_id)
            .execute(self.pool())
            .await
            .context("failed to deactivate message")?;

        let result = sqlx::query(
            "UPDATE scheduled_messages SET status = 'cancelled' \
             WHERE message_id = ? AND status = 'pending'",
        )
        .bind(message_id)
        .execute(self.pool())
        .await
        .context("failed to cancel pending rows")?;

        Ok(result.rows_affected())
    }

    /// Claim up to `batch_size` due `pending` rows across every bot,
    /// ordered by `scheduled_at`, and mark them claimed in the same
    /// transaction so no other dispatcher worker can pick them up.
    ///
    /// Claimed rows are returned still logically `pending`; the caller
    /// resolves each to `sent`/`failed`/back-to-`pending` itself. SQLite has
    /// no multi-worker contention in this deployment (the dispatcher is a
    /// single task), so the claim here is simply the transaction boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn claim_due_scheduled_messages(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> anyhow::Result<Vec<ScheduledMessage>> {
        let rows: Vec<ScheduledRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULED_COLUMNS} FROM scheduled_messages \
             WHERE status = 'pending' AND scheduled_at <= ? \
             ORDER BY scheduled_at LIMIT ?"
        ))
        .bind(fmt_dt(now))
        .bind(batch_size)
        .fetch_all(self.pool())
        .await
        .context("failed to claim due scheduled messages")?;

        rows.into_iter().map(row_into_scheduled).collect()
    }

    /// Resolve a claimed row to `sent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_scheduled_sent(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE scheduled_messages SET status = 'sent' WHERE id = ? AND status = 'pending'")
            .bind(id)
            .execute(self.pool())
            .await
            .context("failed to mark scheduled message sent")?;
        Ok(())
    }

    /// Resolve a claimed row to `failed` with a reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_scheduled_failed(&self, id: i64, reason: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE scheduled_messages SET status = 'failed', error_message = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(reason)
        .bind(id)
        .execute(self.pool())
        .await
        .context("failed to mark scheduled message failed")?;
        Ok(())
    }

    /// Whether a sequence is currently enabled (checked at dispatch time,
    /// not at materialisation time).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn is_sequence_enabled_for_message(
        &self,
        message_id: i64,
    ) -> anyhow::Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT bs.is_enabled FROM broadcast_sequences bs \
             JOIN broadcast_messages bm ON bm.sequence_id = bs.sequence_id \
             WHERE bm.message_id = ?",
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to check sequence enabled state")?;

        Ok(row.is_some_and(|(enabled,)| enabled != 0))
    }
}
