//! Subscription & Token Gate: trial/paid status checks and per-bot token
//! budget enforcement.

pub mod payments;
pub mod tokens;

use chrono::Utc;

use crate::config::SubscriptionConfig;
use crate::error::GateError;
use crate::store::models::SubscriptionStatus;
use crate::store::Store;

/// Access decisions and lifecycle sweeps for the subscription state
/// machine.
#[derive(Clone)]
pub struct SubscriptionGate {
    store: Store,
    config: SubscriptionConfig,
}

impl SubscriptionGate {
    /// Construct a gate over a store and its subscription knobs.
    #[must_use]
    pub fn new(store: Store, config: SubscriptionConfig) -> Self {
        Self { store, config }
    }

    /// `checkUserAccess(user_id, feature)`. Consulted by the
    /// master bot (bot creation/management) and by every User-Bot Runtime
    /// (channel events, AI turns).
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails, or [`GateError`] if
    /// access is denied.
    pub async fn check_user_access(&self, user_id: i64) -> anyhow::Result<Result<(), GateError>> {
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(Err(GateError::Free));
        };

        let decision = match user.subscription_status {
            SubscriptionStatus::Paid | SubscriptionStatus::Trial => Ok(()),
            SubscriptionStatus::Expired if user.subscription_expires_at.is_some() => {
                Err(GateError::Expired)
            }
            SubscriptionStatus::Expired => Err(GateError::TrialExpired),
            SubscriptionStatus::Free => Err(GateError::Free),
        };

        Ok(decision)
    }

    /// Sweep every `trial` user whose `trial_started_at + trial_days` has
    /// elapsed and every `paid` user whose `subscription_expires_at` has
    /// passed, transitioning both to `expired`. Intended to
    /// run on the same reconcile cadence as the Fleet Supervisor.
    ///
    /// # Errors
    ///
    /// Returns an error if a store call fails.
    pub async fn sweep_expirations(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut expired = 0usize;

        for user in self.store.list_lapsed_paid_users(now).await? {
            self.store
                .set_subscription_status(user.user_id, SubscriptionStatus::Expired)
                .await?;
            expired = expired.saturating_add(1);
        }

        let trial_cutoff = chrono::Duration::days(self.config.trial_days);
        for user in self.store.list_trial_users().await? {
            let Some(started) = user.trial_started_at else {
                continue;
            };
            if started + trial_cutoff < now {
                self.store
                    .set_subscription_status(user.user_id, SubscriptionStatus::Expired)
                    .await?;
                expired = expired.saturating_add(1);
            }
        }

        Ok(expired)
    }

    /// Map a denial reason to the end-user-facing message naming whose
    /// subscription lapsed.
    #[must_use]
    pub fn denial_message(reason: &GateError) -> &'static str {
        match reason {
            GateError::Expired => {
                "Your subscription has expired. Renew to keep using this feature."
            }
            GateError::TrialExpired => {
                "Your trial period has ended. Subscribe to keep using this feature."
            }
            GateError::Free => "Start a trial or subscribe to use this feature.",
        }
    }
}
