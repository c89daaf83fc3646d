//! Fleet Supervisor: owns one [`runtime::UserBotRuntime`] per bot with
//! `status = active`, and reconciles that set against the store on a
//! tick and on demand.

pub mod runtime;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::ai::ConversationManager;
use crate::config::DispatchConfig;
use crate::store::models::BotStatus;
use crate::store::Store;
use crate::telegram::TgTransport;
use runtime::UserBotRuntime;

/// Lookup used by the funnel and broadcast dispatchers to find a live
/// transport for a `bot_id` without depending on [`FleetSupervisor`]'s
/// internals directly.
pub trait BotLookup: Send + Sync {
    /// Return a transport for `bot_id` if a runtime is currently attached
    /// and running for it.
    fn transport_for(&self, bot_id: &str) -> Option<TgTransport>;
}

/// Owns the set of running [`UserBotRuntime`]s and keeps it in sync with
/// `user_bots.status`.
#[derive(Clone)]
pub struct FleetSupervisor {
    store: Store,
    conversations: ConversationManager,
    dispatch: DispatchConfig,
    active: Arc<Mutex<HashMap<String, UserBotRuntime>>>,
}

impl FleetSupervisor {
    /// Construct a supervisor over a store and AI conversation manager.
    #[must_use]
    pub fn new(store: Store, conversations: ConversationManager, dispatch: DispatchConfig) -> Self {
        Self {
            store,
            conversations,
            dispatch,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a runtime for every bot with `status = active`, skipping any
    /// that fail to start (`getMe` rejection, bad token) rather than
    /// aborting the whole fleet`).
    ///
    /// # Errors
    ///
    /// Returns an error if the initial bot listing fails.
    pub async fn start(&self) -> anyhow::Result<()> {
        let bots = self.store.list_active_bots().await?;
        let Ok(mut active) = self.active.lock() else {
            anyhow::bail!("fleet runtime map lock poisoned");
        };

        for bot in bots {
            match UserBotRuntime::spawn(bot.clone(), self.store.clone(), self.conversations.clone()) {
                Ok(runtime) => {
                    info!(bot_id = %bot.bot_id, "user bot runtime started");
                    active.insert(bot.bot_id, runtime);
                }
                Err(err) => {
                    warn!(bot_id = %bot.bot_id, error = %err, "failed to start bot runtime");
                    let _ = self.store.set_bot_run_state(&bot.bot_id, BotStatus::Error, false).await;
                }
            }
        }

        Ok(())
    }

    /// Start (or restart) a single bot's runtime, e.g. right after
    /// registration`).
    ///
    /// # Errors
    ///
    /// Returns an error if the bot does not exist or the runtime fails to
    /// start.
    pub async fn add_bot(&self, bot_id: &str) -> anyhow::Result<()> {
        let bot = self
            .store
            .get_bot(bot_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("bot {bot_id} not found"))?;

        let runtime = UserBotRuntime::spawn(bot.clone(), self.store.clone(), self.conversations.clone())?;
        self.store.set_bot_run_state(bot_id, BotStatus::Active, true).await?;
        if let Ok(mut active) = self.active.lock() {
            active.insert(bot_id.to_owned(), runtime);
        }
        info!(bot_id, "user bot runtime added");
        Ok(())
    }

    /// Stop and drop a bot's runtime without touching its `status` row
    ///` — distinct from the owner disabling it).
    pub async fn remove_bot(&self, bot_id: &str) {
        let removed = self.active.lock().ok().and_then(|mut active| active.remove(bot_id));
        if let Some(runtime) = removed {
            runtime.shutdown();
            info!(bot_id, "user bot runtime removed");
        }
    }

    /// Stop, then immediately restart, a bot's runtime — used after a
    /// settings change that a running dispatcher wouldn't otherwise pick up.
    ///
    /// # Errors
    ///
    /// Returns an error if the bot no longer exists or fails to restart.
    pub async fn restart_bot(&self, bot_id: &str) -> anyhow::Result<()> {
        self.remove_bot(bot_id).await;
        self.add_bot(bot_id).await
    }

    /// Diff the live runtime set against a fresh snapshot of
    /// `status = active` bots: start any that are missing, stop any that
    /// are no longer active`, single-snapshot
    /// comparison to avoid acting on a stale read).
    ///
    /// # Errors
    ///
    /// Returns an error if the bot listing fails.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let desired = self.store.list_active_bots().await?;
        let desired_ids: std::collections::HashSet<String> =
            desired.iter().map(|b| b.bot_id.clone()).collect();

        let Ok(mut active) = self.active.lock() else {
            anyhow::bail!("fleet runtime map lock poisoned");
        };

        let stale: Vec<String> = active
            .keys()
            .filter(|id| !desired_ids.contains(*id))
            .cloned()
            .collect();
        for bot_id in stale {
            if let Some(runtime) = active.remove(&bot_id) {
                runtime.shutdown();
                info!(bot_id, "reconcile: stopped bot no longer active");
            }
        }

        for bot in desired {
            if active.contains_key(&bot.bot_id) {
                continue;
            }
            match UserBotRuntime::spawn(bot.clone(), self.store.clone(), self.conversations.clone()) {
                Ok(runtime) => {
                    info!(bot_id = %bot.bot_id, "reconcile: started missing bot");
                    active.insert(bot.bot_id, runtime);
                }
                Err(err) => {
                    warn!(bot_id = %bot.bot_id, error = %err, "reconcile: failed to start bot");
                }
            }
        }

        Ok(())
    }

    /// Run [`Self::reconcile`] on a fixed tick until `stop` fires.
    pub async fn run_reconcile_loop(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.dispatch.reconcile_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.reconcile().await {
                        warn!(error = %err, "fleet reconcile tick failed");
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
}

impl BotLookup for FleetSupervisor {
    fn transport_for(&self, bot_id: &str) -> Option<TgTransport> {
        self.active.lock().ok()?.get(bot_id).map(UserBotRuntime::transport)
    }
}
