//! Dispatch loop for materialised funnel deliveries.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::fleet::BotLookup;
use crate::store::Store;
use crate::telegram::render::render_template;
use crate::telegram::ui::funnel_keyboard;
use crate::telegram::{Outbound, OutboundMedia, SendOutcome};

/// Runs the funnel dispatch loop until `stop` fires: a cooperative stop
/// token checked at each iteration.
pub async fn run<L: BotLookup>(
    store: Store,
    lookup: L,
    config: DispatchConfig,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.funnel_poll_interval_secs));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = run_once(&store, &lookup, &config).await {
                    warn!(error = %err, "funnel dispatch tick failed");
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
        }
    }
}

/// One dispatch tick: claim due rows, render, send, resolve.
///
/// # Errors
///
/// Returns an error if claiming the batch fails; per-row failures are
/// recorded on the row itself and do not abort the batch.
pub async fn run_once<L: BotLookup>(
    store: &Store,
    lookup: &L,
    config: &DispatchConfig,
) -> anyhow::Result<usize> {
    let due = store
        .claim_due_scheduled_messages(Utc::now(), config.funnel_batch_size)
        .await?;

    let mut dispatched = 0usize;

    for row in due {
        if !store.is_sequence_enabled_for_message(row.message_id).await? {
            // Sequence disabled after materialisation: dispatcher simply
            // skips, leaving the row pending for when it's re-enabled
            //.
            continue;
        }

        let Some(message) = store.get_message(row.message_id).await? else {
            store
                .mark_scheduled_failed(row.id, "template_deleted")
                .await?;
            continue;
        };

        let Some(subscriber) = store.get_subscriber(&row.bot_id, row.subscriber_id).await? else {
            store.mark_scheduled_failed(row.id, "subscriber_missing").await?;
            continue;
        };

        let Some(transport) = lookup.transport_for(&row.bot_id) else {
            store.mark_scheduled_failed(row.id, "bot_unavailable").await?;
            continue;
        };

        let buttons = store.list_message_buttons(message.message_id).await?;
        let text = render_template(&message.message_text, &subscriber);
        let outbound = Outbound {
            chat_id: subscriber.chat_id,
            text,
            media: message.media_file_id.clone().map(|file_id| OutboundMedia {
                file_id,
                kind: message.media_type,
            }),
            keyboard: funnel_keyboard(&buttons),
        };

        match transport.send(&outbound).await {
            SendOutcome::Sent(_) => {
                store.mark_scheduled_sent(row.id).await?;
                store
                    .set_last_broadcast_message(&row.bot_id, row.subscriber_id, message.message_number)
                    .await?;
                dispatched = dispatched.saturating_add(1);
            }
            SendOutcome::Blocked => {
                store.mark_scheduled_failed(row.id, "blocked").await?;
            }
            SendOutcome::RateLimited { retry_after_secs } => {
                debug!(retry_after_secs, row_id = row.id, "funnel send rate limited, leaving pending");
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
            }
            SendOutcome::Failed(reason) => {
                store.mark_scheduled_failed(row.id, &reason).await?;
            }
        }

        tokio::time::sleep(Duration::from_millis(config.inter_send_delay_ms)).await;
    }

    Ok(dispatched)
}
