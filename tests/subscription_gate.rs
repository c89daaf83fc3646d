//! Integration tests for [`teleforge::subscription::SubscriptionGate`]
//! against a real in-memory store.

use chrono::Utc;
use teleforge::config::SubscriptionConfig;
use teleforge::error::GateError;
use teleforge::store::Store;
use teleforge::subscription::SubscriptionGate;

fn trial_config(trial_days: i64) -> SubscriptionConfig {
    SubscriptionConfig {
        trial_days,
        trial_enabled: true,
        referral_commission_pct: 15.0,
        subscription_days_per_payment: 30,
        tokens_per_purchase: 100_000,
    }
}

#[tokio::test]
async fn unknown_user_is_denied_as_free() {
    let store = Store::open_in_memory().await.unwrap();
    let gate = SubscriptionGate::new(store, trial_config(3));

    let decision = gate.check_user_access(999).await.unwrap();
    assert_eq!(decision, Err(GateError::Free));
}

#[tokio::test]
async fn trial_user_is_granted_access() {
    let store = Store::open_in_memory().await.unwrap();
    store.get_or_create_user(1, 1, None, true).await.unwrap();
    let gate = SubscriptionGate::new(store, trial_config(3));

    assert_eq!(gate.check_user_access(1).await.unwrap(), Ok(()));
}

#[tokio::test]
async fn sweep_expires_lapsed_trial_and_paid_users() {
    let store = Store::open_in_memory().await.unwrap();

    // A zero-day trial is elapsed as soon as any time passes after
    // creation, avoiding a need to backdate `trial_started_at` directly.
    store.get_or_create_user(1, 1, None, true).await.unwrap();

    // A paid user whose subscription already lapsed.
    store.get_or_create_user(2, 2, None, false).await.unwrap();
    store
        .extend_subscription(2, 1, Utc::now() - chrono::Duration::days(5))
        .await
        .unwrap();

    let gate = SubscriptionGate::new(store, trial_config(0));
    let expired = gate.sweep_expirations().await.unwrap();
    assert_eq!(expired, 2);

    assert_eq!(
        gate.check_user_access(1).await.unwrap(),
        Err(GateError::TrialExpired)
    );
    assert_eq!(
        gate.check_user_access(2).await.unwrap(),
        Err(GateError::Expired)
    );
}
