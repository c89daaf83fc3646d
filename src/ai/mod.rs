//! Conversation Manager: per-`(bot_id, user_id)` LLM turns, gated by
//! subscription and token budget, serialized per key so a second message
//! for the same pair only starts once the prior turn's `response_id` write
//! has landed.
//!
//! One LLM session per (bot, user) pair, routed through a single
//! gate-check/call/debit turn since this platform has no tool-use loop.

pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use crate::store::models::{AiProvider, UserBot};
use crate::store::Store;
use crate::subscription::tokens::{check_token_limit, debit_and_classify, NotificationTrigger};
use crate::subscription::SubscriptionGate;
use providers::{build, CompletionRequest, ProviderError, ProviderKind};

/// One inbound turn queued for a conversation worker.
struct Turn {
    user_id: i64,
    is_owner: bool,
    first_name: Option<String>,
    username: Option<String>,
    message: String,
    reply: oneshot::Sender<TurnOutcome>,
}

/// What the Conversation Manager hands back to the User-Bot Runtime.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The assistant replied with this text.
    Reply(String),
    /// Access denied; show this message to the end-user.
    AccessDenied(String),
    /// Token budget exhausted; show this message.
    TokensExhausted,
    /// The provider rejected the request outright; no retry.
    TechnicalError,
}

const CHANNEL_CAPACITY: usize = 32;
const MAX_RETRYABLE_ATTEMPTS: u32 = 3;

/// Owns one worker task per `(bot_id, user_id)` pair, each draining its own
/// mpsc channel strictly in arrival order.
#[derive(Clone)]
pub struct ConversationManager {
    store: Store,
    gate: SubscriptionGate,
    workers: Arc<Mutex<HashMap<(String, i64), mpsc::Sender<Turn>>>>,
}

impl ConversationManager {
    /// Construct a manager over a store and the subscription gate it
    /// consults before every turn.
    #[must_use]
    pub fn new(store: Store, gate: SubscriptionGate) -> Self {
        Self {
            store,
            gate,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Route one inbound message to the `(bot_id, user_id)` worker,
    /// spawning it on first contact, and await its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker channel cannot be reached (it only
    /// closes when the process is shutting down).
    #[allow(clippy::too_many_arguments)]
    pub async fn send_message(
        &self,
        bot_id: &str,
        user_id: i64,
        is_owner: bool,
        first_name: Option<String>,
        username: Option<String>,
        message: String,
    ) -> anyhow::Result<TurnOutcome> {
        let key = (bot_id.to_owned(), user_id);
        let tx = self.worker_for(key).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let turn = Turn {
            user_id,
            is_owner,
            first_name,
            username,
            message,
            reply: reply_tx,
        };

        tx.send(turn)
            .await
            .map_err(|_| anyhow::anyhow!("conversation worker for {bot_id}/{user_id} is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("conversation worker for {bot_id}/{user_id} dropped the reply"))
    }

    async fn worker_for(&self, key: (String, i64)) -> mpsc::Sender<Turn> {
        let mut workers = self.workers.lock().await;
        if let Some(tx) = workers.get(&key) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let bot_id = key.0.clone();
        let store = self.store.clone();
        let gate = self.gate.clone();
        tokio::spawn(run_worker(bot_id, store, gate, rx));
        workers.insert(key, tx.clone());
        tx
    }
}

async fn run_worker(bot_id: String, store: Store, gate: SubscriptionGate, mut rx: mpsc::Receiver<Turn>) {
    while let Some(turn) = rx.recv().await {
        let outcome = process_turn(&bot_id, &store, &gate, &turn).await;
        let _ = turn.reply.send(outcome);
    }
}

async fn process_turn(bot_id: &str, store: &Store, gate: &SubscriptionGate, turn: &Turn) -> TurnOutcome {
    if !turn.is_owner {
        match gate.check_user_access(turn.user_id).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return TurnOutcome::AccessDenied(SubscriptionGate::denial_message(&reason).to_owned()),
            Err(err) => {
                warn!(bot_id, error = %err, "gate check failed");
                return TurnOutcome::TechnicalError;
            }
        }
    }

    let bot = match store.get_bot(bot_id).await {
        Ok(Some(bot)) => bot,
        Ok(None) => return TurnOutcome::TechnicalError,
        Err(err) => {
            warn!(bot_id, error = %err, "failed to load bot for ai turn");
            return TurnOutcome::TechnicalError;
        }
    };

    if check_token_limit(&bot).is_err() {
        return TurnOutcome::TokensExhausted;
    }

    if bot.ai_provider == AiProvider::None || !bot.ai_enabled {
        return TurnOutcome::TechnicalError;
    }

    run_completion(store, &bot, turn).await
}

async fn run_completion(store: &Store, bot: &UserBot, turn: &Turn) -> TurnOutcome {
    let Some(kind) = provider_kind(bot.ai_provider) else {
        return TurnOutcome::TechnicalError;
    };

    let Some(api_key) = bot.ai_assistant_id.clone() else {
        return TurnOutcome::TechnicalError;
    };

    let provider = build(kind, &api_key, bot.ai_model.as_deref().unwrap_or("default"));

    let previous_response_id = store
        .get_conversation(&bot.bot_id, turn.user_id)
        .await
        .ok()
        .flatten()
        .and_then(|c| c.response_id);

    let instructions = build_instructions(bot, turn);
    let request = CompletionRequest {
        model: bot.ai_model.clone().unwrap_or_else(|| "default".to_owned()),
        instructions: Some(instructions),
        input: turn.message.clone(),
        previous_response_id,
        tools: None,
        max_output_tokens: None,
    };

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match provider.complete(request.clone_for_retry()).await {
            Ok(response) => {
                if let Err(err) = store
                    .set_conversation_response_id(&bot.bot_id, turn.user_id, &response.response_id)
                    .await
                {
                    warn!(bot_id = %bot.bot_id, error = %err, "failed to persist conversation handle");
                }

                let (input_tokens, output_tokens) = estimate_usage(&response, &turn.message, &response.output_text);
                if let Err(err) = debit_and_classify(store, bot, input_tokens, output_tokens).await {
                    warn!(bot_id = %bot.bot_id, error = %err, "failed to debit tokens");
                } else {
                    notify_if_due(bot, input_tokens, output_tokens);
                }

                return TurnOutcome::Reply(response.output_text);
            }
            Err(ProviderError::RateLimit { retry_after_secs }) if attempt < MAX_RETRYABLE_ATTEMPTS => {
                tokio::time::sleep(std::time::Duration::from_secs(retry_after_secs)).await;
            }
            Err(ProviderError::Server { .. }) if attempt < MAX_RETRYABLE_ATTEMPTS => {
                let backoff = 2u64.saturating_pow(attempt).min(30);
                tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
            }
            Err(ProviderError::Auth) => {
                warn!(bot_id = %bot.bot_id, "provider rejected credentials, disabling ai");
                let _ = store.set_ai_provider(&bot.bot_id, AiProvider::None, None).await;
                return TurnOutcome::TechnicalError;
            }
            Err(_) => return TurnOutcome::TechnicalError,
        }
    }
}

impl CompletionRequest {
    /// `reqwest::Client::send` consumes the body; cloning per retry attempt
    /// keeps `run_completion`'s loop simple.
    fn clone_for_retry(&self) -> Self {
        self.clone()
    }
}

fn provider_kind(provider: AiProvider) -> Option<ProviderKind> {
    match provider {
        AiProvider::OpenAi => Some(ProviderKind::OpenAi),
        AiProvider::ChatForYou => Some(ProviderKind::ChatForYou),
        AiProvider::ProTalk => Some(ProviderKind::ProTalk),
        AiProvider::None => None,
    }
}

fn build_instructions(bot: &UserBot, turn: &Turn) -> String {
    let system = bot.ai_system_prompt.clone().unwrap_or_default();
    let name = turn.first_name.clone().unwrap_or_default();
    let username = turn.username.clone().unwrap_or_default();
    format!(
        "{system}\n\nUser context: first_name={name}, username={username}, admin={}",
        turn.is_owner
    )
}

/// Estimate usage when a provider reports none: whitespace-word count ×
/// 1.3, a conservative floor.
fn estimate_usage(response: &providers::CompletionResponse, input: &str, output: &str) -> (i64, i64) {
    if let Some(usage) = response.usage {
        if usage.input_tokens.is_some() || usage.output_tokens.is_some() {
            return (
                i64::from(usage.input_tokens.unwrap_or(0)),
                i64::from(usage.output_tokens.unwrap_or(0)),
            );
        }
    }

    let estimate = |text: &str| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let words = text.split_whitespace().count() as i64;
        (words as f64 * 1.3).ceil() as i64
    };

    (estimate(input), estimate(output))
}

fn notify_if_due(bot: &UserBot, input_tokens: i64, output_tokens: i64) {
    let remaining_after = bot.tokens_limit_total.map(|limit| {
        limit
            .saturating_sub(bot.tokens_input_used.saturating_add(input_tokens))
            .saturating_sub(bot.tokens_output_used.saturating_add(output_tokens))
    });

    match crate::subscription::tokens::notification_trigger(bot, remaining_after) {
        NotificationTrigger::Warning => info!(bot_id = %bot.bot_id, "token budget warning threshold crossed"),
        NotificationTrigger::Exhausted => info!(bot_id = %bot.bot_id, "token budget exhausted"),
        NotificationTrigger::None => {}
    }
}
