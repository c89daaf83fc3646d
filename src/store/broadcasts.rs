//! Queries backing the Mass-Broadcast Engine.

use anyhow::Context;
use chrono::{DateTime, Utc};

use super::models::{
    BroadcastDelivery, BroadcastKind, BroadcastStatus, DeliveryStatus, MassBroadcast, MediaType,
};
use super::{fmt_dt, parse_dt, Store};

type BroadcastRow = (
    i64,
    String,
    i64,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
);

#[allow(clippy::too_many_lines)]
fn row_into_broadcast(row: BroadcastRow) -> anyhow::Result<MassBroadcast> {
    let (
        id,
        bot_id,
        created_by,
        title,
        message_text,
        media_file_id,
        media_type,
        button_text,
        button_url,
        broadcast_type,
        scheduled_at,
        status,
        created_at,
    ) = row;

    Ok(MassBroadcast {
        id,
        bot_id,
        created_by,
        title,
        message_text,
        media_file_id,
        media_type: media_type.parse()?,
        button_text,
        button_url,
        broadcast_type: broadcast_type.parse()?,
        scheduled_at: scheduled_at.map(|s| parse_dt(&s)).transpose()?,
        status: status.parse()?,
        created_at: parse_dt(&created_at)?,
    })
}

const BROADCAST_COLUMNS: &str = "id, bot_id, created_by, title, message_text, media_file_id, \
    media_type, button_text, button_url, broadcast_type, scheduled_at, status, created_at";

type DeliveryRow = (i64, i64, i64, String, Option<i64>, Option<String>, Option<String>);

fn row_into_delivery(row: DeliveryRow) -> anyhow::Result<BroadcastDelivery> {
    let (id, broadcast_id, user_id, status, telegram_message_id, error_message, attempted_at) =
        row;

    Ok(BroadcastDelivery {
        id,
        broadcast_id,
        user_id,
        status: status.parse()?,
        telegram_message_id,
        error_message,
        attempted_at: attempted_at.map(|s| parse_dt(&s)).transpose()?,
    })
}

const DELIVERY_COLUMNS: &str =
    "id, broadcast_id, user_id, status, telegram_message_id, error_message, attempted_at";

impl Store {
    /// Create a new broadcast in `draft` state.
    ///
    /// # Errors
    ///
    /// Returns an error if `broadcast_type = scheduled` without
    /// `scheduled_at`, if `scheduled_at` is closer than 5 minutes out,
    /// or if the insert fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_broadcast(
        &self,
        bot_id: &str,
        created_by: i64,
        title: &str,
        message_text: &str,
        media_file_id: Option<&str>,
        media_type: MediaType,
        button_text: Option<&str>,
        button_url: Option<&str>,
        broadcast_type: BroadcastKind,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<i64> {
        match (broadcast_type, scheduled_at) {
            (BroadcastKind::Scheduled, None) => {
                anyhow::bail!("scheduled broadcasts require scheduled_at")
            }
            (BroadcastKind::Scheduled, Some(at)) if at < Utc::now() + chrono::Duration::minutes(5) => {
                anyhow::bail!("scheduled_at must be at least 5 minutes in the future")
            }
            (BroadcastKind::Instant, Some(_)) => {
                anyhow::bail!("instant broadcasts must not set scheduled_at")
            }
            _ => {}
        }

        let status = BroadcastStatus::Draft;
        let inserted = sqlx::query(
            "INSERT INTO mass_broadcasts \
             (bot_id, created_by, title, message_text, media_file_id, media_type, \
              button_text, button_url, broadcast_type, scheduled_at, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bot_id)
        .bind(created_by)
        .bind(title)
        .bind(message_text)
        .bind(media_file_id)
        .bind(media_type.to_string())
        .bind(button_text)
        .bind(button_url)
        .bind(broadcast_type.to_string())
        .bind(scheduled_at.map(fmt_dt))
        .bind(status.to_string())
        .bind(fmt_dt(Utc::now()))
        .execute(self.pool())
        .await
        .context("failed to insert broadcast")?;

        Ok(inserted.last_insert_rowid())
    }

    /// Fetch a single broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_broadcast(&self, id: i64) -> anyhow::Result<Option<MassBroadcast>> {
        let row: Option<BroadcastRow> = sqlx::query_as(&format!(
            "SELECT {BROADCAST_COLUMNS} FROM mass_broadcasts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch broadcast")?;

        row.map(row_into_broadcast).transpose()
    }

    /// List broadcasts in `scheduled` state whose `scheduled_at` has been
    /// reached, for the scheduler tick that flips them to `sending`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_due_scheduled_broadcasts(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MassBroadcast>> {
        let rows: Vec<BroadcastRow> = sqlx::query_as(&format!(
            "SELECT {BROADCAST_COLUMNS} FROM mass_broadcasts \
             WHERE status = 'scheduled' AND scheduled_at <= ?"
        ))
        .bind(fmt_dt(now))
        .fetch_all(self.pool())
        .await
        .context("failed to list due broadcasts")?;

        rows.into_iter().map(row_into_broadcast).collect()
    }

    /// Transition a broadcast to `scheduled` (admin picked a future time).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn schedule_broadcast(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE mass_broadcasts SET status = 'scheduled' WHERE id = ? AND status = 'draft'")
            .bind(id)
            .execute(self.pool())
            .await
            .context("failed to schedule broadcast")?;
        Ok(())
    }

    /// Transactionally transition a broadcast into `sending` and
    /// materialise one `BroadcastDelivery{pending}` per currently active
    /// subscriber, so a retried/replayed transition cannot double-insert
    /// deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails, or if the broadcast is
    /// not currently `draft` or `scheduled`.
    pub async fn start_sending(&self, broadcast_id: i64) -> anyhow::Result<usize> {
        let broadcast = self
            .get_broadcast(broadcast_id)
            .await?
            .context("broadcast not found")?;

        if !matches!(
            broadcast.status,
            BroadcastStatus::Draft | BroadcastStatus::Scheduled
        ) {
            anyhow::bail!(
                "cannot start sending broadcast {broadcast_id} from state {:?}",
                broadcast.status
            );
        }

        let recipients = self.list_active_subscribers(&broadcast.bot_id).await?;

        let mut tx = self.pool().begin().await.context("failed to start tx")?;

        let updated = sqlx::query(
            "UPDATE mass_broadcasts SET status = 'sending' \
             WHERE id = ? AND status IN ('draft', 'scheduled')",
        )
        .bind(broadcast_id)
        .execute(&mut *tx)
        .await
        .context("failed to transition broadcast to sending")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.ok();
            anyhow::bail!("broadcast {broadcast_id} was concurrently started");
        }

        for recipient in &recipients {
            sqlx::query(
                "INSERT INTO broadcast_deliveries (broadcast_id, user_id, status) \
                 VALUES (?, ?, 'pending')",
            )
            .bind(broadcast_id)
            .bind(recipient.chat_id)
            .execute(&mut *tx)
            .await
            .context("failed to insert broadcast delivery")?;
        }

        tx.commit().await.context("failed to commit sending transition")?;
        Ok(recipients.len())
    }

    /// Cancel a non-terminal broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn cancel_broadcast(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE mass_broadcasts SET status = 'cancelled' \
             WHERE id = ? AND status NOT IN ('completed', 'cancelled', 'failed')",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .context("failed to cancel broadcast")?;
        Ok(())
    }

    /// Claim up to `batch_size` pending deliveries for a `sending`
    /// broadcast (default batch 50).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn claim_pending_deliveries(
        &self,
        broadcast_id: i64,
        batch_size: i64,
    ) -> anyhow::Result<Vec<BroadcastDelivery>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM broadcast_deliveries \
             WHERE broadcast_id = ? AND status = 'pending' LIMIT ?"
        ))
        .bind(broadcast_id)
        .bind(batch_size)
        .fetch_all(self.pool())
        .await
        .context("failed to claim pending deliveries")?;

        rows.into_iter().map(row_into_delivery).collect()
    }

    /// Resolve a delivery to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn resolve_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        telegram_message_id: Option<i64>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE broadcast_deliveries SET status = ?, telegram_message_id = ?, \
             error_message = ?, attempted_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status.to_string())
        .bind(telegram_message_id)
        .bind(error_message)
        .bind(fmt_dt(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await
        .context("failed to resolve delivery")?;
        Ok(())
    }

    /// List every `sending` broadcast currently tracked, for the completion
    /// sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_sending_broadcasts(&self) -> anyhow::Result<Vec<MassBroadcast>> {
        let rows: Vec<BroadcastRow> = sqlx::query_as(&format!(
            "SELECT {BROADCAST_COLUMNS} FROM mass_broadcasts WHERE status = 'sending'"
        ))
        .fetch_all(self.pool())
        .await
        .context("failed to list sending broadcasts")?;

        rows.into_iter().map(row_into_broadcast).collect()
    }

    /// Count deliveries still `pending` for a broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_pending_deliveries(&self, broadcast_id: i64) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM broadcast_deliveries WHERE broadcast_id = ? AND status = 'pending'",
        )
        .bind(broadcast_id)
        .fetch_one(self.pool())
        .await
        .context("failed to count pending deliveries")?;

        Ok(count)
    }

    /// Mark a `sending` broadcast `completed` iff no `pending` deliveries
    /// remain. Returns whether the transition happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the queries fail.
    pub async fn try_complete_broadcast(&self, broadcast_id: i64) -> anyhow::Result<bool> {
        if self.count_pending_deliveries(broadcast_id).await? > 0 {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE mass_broadcasts SET status = 'completed' WHERE id = ? AND status = 'sending'",
        )
        .bind(broadcast_id)
        .execute(self.pool())
        .await
        .context("failed to complete broadcast")?;

        Ok(result.rows_affected() > 0)
    }
}
