//! Integration tests exercising [`teleforge::store::Store`] against a real
//! in-memory SQLite database, covering the lifecycle invariants each
//! submodule's doc comments call out.

use chrono::{Duration, Utc};
use teleforge::store::models::{
    BroadcastKind, DeliveryStatus, MediaType, ReferralTransactionType,
};
use teleforge::store::Store;

#[tokio::test]
async fn repeat_start_is_idempotent() {
    let store = Store::open_in_memory().await.unwrap();

    let first = store.get_or_create_user(100, 100, None, true).await.unwrap();
    let second = store.get_or_create_user(100, 100, None, true).await.unwrap();

    assert_eq!(first.user_id, second.user_id);
    assert_eq!(first.referral_code, second.referral_code);
    assert_eq!(store.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn extend_subscription_stacks_remaining_time() {
    let store = Store::open_in_memory().await.unwrap();
    store.get_or_create_user(1, 1, None, false).await.unwrap();

    let now = Utc::now();
    let first_expiry = store.extend_subscription(1, 30, now).await.unwrap();
    assert!(first_expiry > now + Duration::days(29));

    // A second payment before the first period lapses stacks on top of it
    // rather than restarting from `now`.
    let second_expiry = store
        .extend_subscription(1, 30, now + Duration::days(5))
        .await
        .unwrap();
    assert!(second_expiry > first_expiry);

    let user = store.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.subscription_status.to_string(), "paid");
}

#[tokio::test]
async fn bot_crud_and_token_budget() {
    let store = Store::open_in_memory().await.unwrap();
    store.get_or_create_user(7, 7, None, false).await.unwrap();

    let bot_id = store.create_bot(7, "123:token", "somebot").await.unwrap();
    let bot = store.get_bot(&bot_id).await.unwrap().unwrap();
    assert_eq!(bot.owner_user_id, 7);
    assert!(bot.tokens_limit_total.is_none());
    assert!(bot.remaining_tokens().is_none());

    store.add_token_budget(&bot_id, 1000).await.unwrap();
    store.debit_tokens(&bot_id, 400, 500).await.unwrap();

    let bot = store.get_bot(&bot_id).await.unwrap().unwrap();
    assert_eq!(bot.remaining_tokens(), Some(100));

    store
        .set_ai_provider(&bot_id, teleforge::store::models::AiProvider::OpenAi, Some("asst_1"))
        .await
        .unwrap();
    let bot = store.get_bot(&bot_id).await.unwrap().unwrap();
    assert_eq!(bot.ai_provider, teleforge::store::models::AiProvider::OpenAi);
    assert!(bot.ai_enabled);

    assert_eq!(store.count_bots().await.unwrap(), 1);
    store.delete_bot(&bot_id).await.unwrap();
    assert!(store.get_bot(&bot_id).await.unwrap().is_none());
    assert_eq!(store.count_bots().await.unwrap(), 0);
}

#[tokio::test]
async fn funnel_materialisation_is_idempotent() {
    let store = Store::open_in_memory().await.unwrap();
    let bot_id = store.create_bot(1, "tok", "bot").await.unwrap();
    let sequence = store.get_or_create_sequence(&bot_id).await.unwrap();
    assert!(sequence.is_enabled);

    store
        .insert_message(sequence.sequence_id, 1, "hello", 0.0, None, MediaType::None)
        .await
        .unwrap();
    store
        .insert_message(sequence.sequence_id, 2, "later", 24.0, None, MediaType::None)
        .await
        .unwrap();

    store
        .upsert_subscriber(&bot_id, 42, 42, Some("Ann"), None, None)
        .await
        .unwrap();

    let now = Utc::now();
    let inserted = store
        .materialise_funnel(&bot_id, 42, sequence.sequence_id, now)
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    // Re-entry for the same subscriber is a no-op thanks to the unique
    // constraint on (bot_id, subscriber_id, message_id).
    let inserted_again = store
        .materialise_funnel(&bot_id, 42, sequence.sequence_id, now)
        .await
        .unwrap();
    assert_eq!(inserted_again, 0);

    let due = store.claim_due_scheduled_messages(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].message_id, 1);

    let later = store
        .claim_due_scheduled_messages(now + Duration::hours(25), 10)
        .await
        .unwrap();
    assert_eq!(later.len(), 2);
}

#[tokio::test]
async fn deleting_a_message_cancels_its_pending_deliveries() {
    let store = Store::open_in_memory().await.unwrap();
    let bot_id = store.create_bot(1, "tok", "bot").await.unwrap();
    let sequence = store.get_or_create_sequence(&bot_id).await.unwrap();
    let message_id = store
        .insert_message(sequence.sequence_id, 1, "hi", 0.0, None, MediaType::None)
        .await
        .unwrap();
    store
        .upsert_subscriber(&bot_id, 1, 1, None, None, None)
        .await
        .unwrap();
    store
        .materialise_funnel(&bot_id, 1, sequence.sequence_id, Utc::now())
        .await
        .unwrap();

    let cancelled = store.delete_message(message_id).await.unwrap();
    assert_eq!(cancelled, 1);

    let due = store
        .claim_due_scheduled_messages(Utc::now(), 10)
        .await
        .unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn broadcast_lifecycle_from_draft_to_completed() {
    let store = Store::open_in_memory().await.unwrap();
    let bot_id = store.create_bot(1, "tok", "bot").await.unwrap();
    store
        .upsert_subscriber(&bot_id, 1, 1001, None, None, None)
        .await
        .unwrap();
    store
        .upsert_subscriber(&bot_id, 2, 1002, None, None, None)
        .await
        .unwrap();

    let broadcast_id = store
        .create_broadcast(
            &bot_id,
            1,
            "announcement",
            "hello everyone",
            None,
            MediaType::None,
            None,
            None,
            BroadcastKind::Instant,
            None,
        )
        .await
        .unwrap();

    let recipients = store.start_sending(broadcast_id).await.unwrap();
    assert_eq!(recipients, 2);
    assert_eq!(store.count_pending_deliveries(broadcast_id).await.unwrap(), 2);

    let claimed = store.claim_pending_deliveries(broadcast_id, 50).await.unwrap();
    assert_eq!(claimed.len(), 2);

    for delivery in &claimed {
        store
            .resolve_delivery(delivery.id, DeliveryStatus::Sent, Some(555), None)
            .await
            .unwrap();
    }

    assert_eq!(store.count_pending_deliveries(broadcast_id).await.unwrap(), 0);
    let completed = store.try_complete_broadcast(broadcast_id).await.unwrap();
    assert!(completed);

    let broadcast = store.get_broadcast(broadcast_id).await.unwrap().unwrap();
    assert_eq!(broadcast.status.to_string(), "completed");
}

#[tokio::test]
async fn scheduled_broadcast_rejects_a_near_term_time() {
    let store = Store::open_in_memory().await.unwrap();
    let bot_id = store.create_bot(1, "tok", "bot").await.unwrap();

    let result = store
        .create_broadcast(
            &bot_id,
            1,
            "too soon",
            "body",
            None,
            MediaType::None,
            None,
            None,
            BroadcastKind::Scheduled,
            Some(Utc::now() + Duration::minutes(1)),
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn referral_transaction_is_idempotent_on_replay() {
    let store = Store::open_in_memory().await.unwrap();
    store.get_or_create_user(1, 1, None, false).await.unwrap();
    store.get_or_create_user(2, 2, Some(1), false).await.unwrap();

    let first = store
        .post_referral_transaction(
            1,
            2,
            ReferralTransactionType::Subscription,
            "349.00",
            "52.35",
            "inv-1",
        )
        .await
        .unwrap();
    assert!(first);

    // A replayed webhook for the same invoice must not double-credit.
    let second = store
        .post_referral_transaction(
            1,
            2,
            ReferralTransactionType::Subscription,
            "349.00",
            "52.35",
            "inv-1",
        )
        .await
        .unwrap();
    assert!(!second);

    let history = store.list_referral_history(1).await.unwrap();
    assert_eq!(history.len(), 1);
}
