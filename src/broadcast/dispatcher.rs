//! Dispatch loop for mass-broadcast deliveries.
//!
//! Mirrors [`crate::funnel::dispatcher`]'s claim/render/send/resolve loop,
//! with three additions: a single inline URL button, the text-then-media
//! two-step send for caption-incapable media, and completion detection
//! after each batch.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::fleet::BotLookup;
use crate::store::models::{BroadcastStatus, DeliveryStatus, MassBroadcast};
use crate::store::Store;
use crate::telegram::render::render_template;
use crate::telegram::ui::broadcast_keyboard;
use crate::telegram::{Outbound, OutboundMedia, SendOutcome, TgTransport};

pub async fn run<L: BotLookup>(
    store: Store,
    lookup: L,
    config: DispatchConfig,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.broadcast_poll_interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = run_once(&store, &lookup, &config).await {
                    warn!(error = %err, "broadcast dispatch tick failed");
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() { break; }
            }
        }
    }
}

pub async fn run_once<L: BotLookup>(
    store: &Store,
    lookup: &L,
    config: &DispatchConfig,
) -> anyhow::Result<usize> {
    for due in store.list_due_scheduled_broadcasts(chrono::Utc::now()).await? {
        store.start_sending(due.id).await?;
    }

    let sending = store.list_sending_broadcasts().await?;
    let mut dispatched = 0usize;

    for broadcast in sending {
        let Some(transport) = lookup.transport_for(&broadcast.bot_id) else {
            continue;
        };

        let deliveries = store
            .claim_pending_deliveries(broadcast.id, config.broadcast_batch_size)
            .await?;

        for delivery in deliveries {
            let Some(subscriber) = store.get_subscriber(&broadcast.bot_id, delivery.user_id).await? else {
                store
                    .resolve_delivery(delivery.id, DeliveryStatus::Failed, None, Some("subscriber_missing"))
                    .await?;
                continue;
            };

            let outcome = send_broadcast(&transport, &broadcast, &subscriber).await;
            match outcome {
                SendOutcome::Sent(message_id) => {
                    store
                        .resolve_delivery(delivery.id, DeliveryStatus::Sent, Some(i64::from(message_id)), None)
                        .await?;
                    dispatched = dispatched.saturating_add(1);
                }
                SendOutcome::Blocked => {
                    store
                        .resolve_delivery(delivery.id, DeliveryStatus::Blocked, None, None)
                        .await?;
                }
                SendOutcome::RateLimited { retry_after_secs } => {
                    debug!(retry_after_secs, delivery_id = delivery.id, "broadcast send rate limited, leaving pending");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                }
                SendOutcome::Failed(reason) => {
                    store
                        .resolve_delivery(delivery.id, DeliveryStatus::Failed, None, Some(&reason))
                        .await?;
                }
            }

            tokio::time::sleep(Duration::from_millis(config.inter_send_delay_ms)).await;
        }

        store.try_complete_broadcast(broadcast.id).await?;
    }

    Ok(dispatched)
}

async fn send_broadcast(
    transport: &TgTransport,
    broadcast: &MassBroadcast,
    subscriber: &crate::store::models::Subscriber,
) -> SendOutcome {
    let text = render_template(&broadcast.message_text, subscriber);
    let keyboard = match (&broadcast.button_text, &broadcast.button_url) {
        (Some(label), Some(url)) => Some(broadcast_keyboard(label, url)),
        _ => None,
    };

    let Some(file_id) = broadcast.media_file_id.clone() else {
        return transport
            .send(&Outbound { chat_id: subscriber.chat_id, text, media: None, keyboard })
            .await;
    };

    if broadcast.media_type.supports_caption() {
        return transport
            .send(&Outbound {
                chat_id: subscriber.chat_id,
                text,
                media: Some(OutboundMedia { file_id, kind: broadcast.media_type }),
                keyboard,
            })
            .await;
    }

    // Caption-incapable media: send text first, then media. Both legs must
    // succeed for the delivery to count as sent.
    match transport
        .send(&Outbound { chat_id: subscriber.chat_id, text, media: None, keyboard: keyboard.clone() })
        .await
    {
        SendOutcome::Sent(_) => {
            transport
                .send(&Outbound {
                    chat_id: subscriber.chat_id,
                    text: String::new(),
                    media: Some(OutboundMedia { file_id, kind: broadcast.media_type }),
                    keyboard: None,
                })
                .await
        }
        other => other,
    }
}
