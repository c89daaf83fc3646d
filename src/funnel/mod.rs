//! Funnel Scheduler — materialisation half of the contract. The dispatch
//! half lives in [`dispatcher`].

pub mod dispatcher;

use chrono::Utc;

use crate::store::Store;

/// Materialisation-side operations of the Funnel Scheduler contract.
#[derive(Clone)]
pub struct FunnelScheduler {
    store: Store,
}

impl FunnelScheduler {
    /// Construct a scheduler over a store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Called when a subscriber taps the welcome button. If the bot's
    /// sequence is enabled and non-empty, inserts one `ScheduledMessage`
    /// per step with `scheduled_at = now + delay_hours`.
    /// Idempotent: re-entry for an already-activated subscriber inserts
    /// nothing new thanks to the store's uniqueness guard.
    ///
    /// # Errors
    ///
    /// Returns an error if the store calls fail.
    pub async fn on_subscriber_activated(
        &self,
        bot_id: &str,
        subscriber_id: i64,
    ) -> anyhow::Result<usize> {
        let sequence = self.store.get_or_create_sequence(bot_id).await?;
        if !sequence.is_enabled {
            return Ok(0);
        }

        self.store.mark_funnel_started(bot_id, subscriber_id).await?;
        self.store
            .materialise_funnel(bot_id, subscriber_id, sequence.sequence_id, Utc::now())
            .await
    }

    /// Called whenever a funnel step's delay changes. Reschedules every
    /// `pending` row pointing at it; `sent`/`failed`/`cancelled` rows are
    /// immutable history.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not exist or the store update
    /// fails.
    pub async fn on_message_edited(
        &self,
        message_id: i64,
        new_delay_hours: f64,
    ) -> anyhow::Result<u64> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("funnel message {message_id} not found"))?;

        self.store
            .reschedule_pending(message_id, message.delay_hours, new_delay_hours)
            .await
    }

    /// Called when a funnel step is deleted. Cascades `cancelled` to every
    /// `pending` row referencing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub async fn on_message_deleted(&self, message_id: i64) -> anyhow::Result<u64> {
        self.store.delete_message(message_id).await
    }

    /// Toggle a bot's funnel gate without cancelling already-scheduled rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub async fn set_sequence_enabled(&self, bot_id: &str, enabled: bool) -> anyhow::Result<()> {
        let sequence = self.store.get_or_create_sequence(bot_id).await?;
        self.store
            .set_sequence_enabled(sequence.sequence_id, enabled)
            .await
    }
}
