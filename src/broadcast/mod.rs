//! Mass-Broadcast Engine: lifecycle operations over `mass_broadcasts`.
//! The dispatch half lives in [`dispatcher`].

pub mod dispatcher;

use chrono::{DateTime, Utc};

use crate::store::models::{BroadcastKind, MassBroadcast, MediaType};
use crate::store::Store;

/// Lifecycle operations over `mass_broadcasts`.
#[derive(Clone)]
pub struct BroadcastEngine {
    store: Store,
}

impl BroadcastEngine {
    /// Construct an engine over a store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a new broadcast in `draft` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduling invariants are violated or the
    /// insert fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
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
        self.store
            .create_broadcast(
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
            )
            .await
    }

    /// Admin picked a future send time for a `draft` broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub async fn schedule(&self, id: i64) -> anyhow::Result<()> {
        self.store.schedule_broadcast(id).await
    }

    /// Materialise deliveries and flip the broadcast to `sending`
    ///. Called immediately for `instant` broadcasts, or by
    /// the scheduled-broadcast sweep once `scheduled_at` is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the broadcast is not `draft`/`scheduled`, or the
    /// transaction fails.
    pub async fn start_sending(&self, id: i64) -> anyhow::Result<usize> {
        self.store.start_sending(id).await
    }

    /// Cancel any non-terminal broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub async fn cancel(&self, id: i64) -> anyhow::Result<()> {
        self.store.cancel_broadcast(id).await
    }

    /// Fetch a single broadcast by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, id: i64) -> anyhow::Result<Option<MassBroadcast>> {
        self.store.get_broadcast(id).await
    }

    /// Promote every `scheduled` broadcast whose time has come into
    /// `sending`.
    ///
    /// # Errors
    ///
    /// Returns an error if a store call fails.
    pub async fn start_due_broadcasts(&self) -> anyhow::Result<usize> {
        let due = self.store.list_due_scheduled_broadcasts(Utc::now()).await?;
        let mut started = 0usize;
        for broadcast in due {
            self.start_sending(broadcast.id).await?;
            started = started.saturating_add(1);
        }
        Ok(started)
    }
}
