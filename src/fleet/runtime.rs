//! User-Bot Runtime: one long-poll dispatcher per active bot, restricted
//! to `{message, chat_member, chat_join_request, callback_query}`, with
//! handler priority owner-admin → AI dialog → welcome/exit text taps →
//! channel events.
//!
//! Uses the usual `dptree::entry().branch(...)` wiring and a
//! `dispatch_command` match-on-command-string shape, generalized to N
//! per-tenant bots, each carrying its own [`Bot`] client and its own
//! bounded-retry startup guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use teloxide::dispatching::{Dispatcher, ShutdownToken, UpdateFilterExt};
use teloxide::prelude::*;
use teloxide::types::{ChatMemberKind, ParseMode};
use tracing::{info, warn};

use crate::ai::{ConversationManager, TurnOutcome};
use crate::funnel::FunnelScheduler;
use crate::store::models::BotStatus;
use crate::store::Store;
use crate::telegram::ui::{escape_html, welcome_keyboard};
use crate::telegram::TgTransport;

const MAX_STARTUP_ATTEMPTS: u32 = 5;
const BASE_RETRY_SECS: u64 = 5;
const MAX_RETRY_SECS: u64 = 30;

/// Dependencies injected into this bot's teloxide handlers.
#[derive(Clone)]
struct RuntimeState {
    bot_id: String,
    owner_user_id: i64,
    store: Store,
    conversations: ConversationManager,
    funnel: FunnelScheduler,
}

/// One running Telegram session for one [`crate::store::models::UserBot`].
pub struct UserBotRuntime {
    transport: TgTransport,
    shutdown_token: Option<ShutdownToken>,
    task: tokio::task::JoinHandle<()>,
    intentional_shutdown: Arc<AtomicBool>,
}

impl UserBotRuntime {
    /// Build the dispatcher for `bot` and hand the retry/dispatch loop off
    /// to a background task. Returns immediately; startup failures surface
    /// asynchronously via the bot's own `status` row.
    ///
    /// # Errors
    ///
    /// Returns an error only if the bot token cannot be used to construct a
    /// client at all (never happens in practice — `Bot::new` does not
    /// validate the token synchronously).
    pub fn spawn(
        bot: crate::store::models::UserBot,
        store: Store,
        conversations: ConversationManager,
    ) -> anyhow::Result<Self> {
        let transport = TgTransport::new(&bot.token);
        let tg_bot = transport.bot().clone();

        let state = RuntimeState {
            bot_id: bot.bot_id.clone(),
            owner_user_id: bot.owner_user_id,
            store: store.clone(),
            conversations,
            funnel: FunnelScheduler::new(store.clone()),
        };

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(handle_message))
            .branch(Update::filter_chat_member().endpoint(handle_chat_member))
            .branch(Update::filter_chat_join_request().endpoint(handle_join_request));

        let mut dispatcher = Dispatcher::builder(tg_bot.clone(), handler)
            .dependencies(dptree::deps![state])
            .build();
        let shutdown_token = dispatcher.shutdown_token();

        let intentional_shutdown = Arc::new(AtomicBool::new(false));
        let bot_id = bot.bot_id.clone();
        let task_stop_flag = Arc::clone(&intentional_shutdown);

        let task = tokio::spawn(async move {
            if !wait_until_reachable(&tg_bot, &bot_id, &store, &task_stop_flag).await {
                return;
            }
            info!(bot_id, "user bot runtime dispatch starting");
            dispatcher.dispatch().await;
            info!(bot_id, "user bot runtime dispatch stopped");
        });

        Ok(Self {
            transport,
            shutdown_token: Some(shutdown_token),
            task,
            intentional_shutdown,
        })
    }

    /// A transport handle usable by other components (funnel/broadcast
    /// dispatchers) to send to this bot's subscribers.
    #[must_use]
    pub fn transport(&self) -> TgTransport {
        self.transport.clone()
    }

    /// Cancel the poll loop and any in-flight sends within a 5s bound,
    /// then detach the background task.
    pub fn shutdown(self) {
        self.intentional_shutdown.store(true, Ordering::SeqCst);
        if let Some(token) = self.shutdown_token {
            if let Ok(shutdown_done) = token.shutdown() {
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(Duration::from_secs(5), shutdown_done).await;
                });
            }
        }
        self.task.abort();
    }
}

/// Probe `getMe` with bounded exponential backoff before ever calling
/// `dispatch()`. Returns `false` (and marks the bot `status=error`) once
/// `MAX_STARTUP_ATTEMPTS` is exhausted without ever self-restarting.
async fn wait_until_reachable(
    bot: &Bot,
    bot_id: &str,
    store: &Store,
    stop_flag: &AtomicBool,
) -> bool {
    let mut attempt = 0u32;
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return false;
        }
        match bot.get_me().await {
            Ok(_) => return true,
            Err(err) => {
                attempt = attempt.saturating_add(1);
                if attempt >= MAX_STARTUP_ATTEMPTS {
                    warn!(bot_id, error = %err, attempt, "giving up on user bot runtime startup");
                    let _ = store.set_bot_run_state(bot_id, BotStatus::Error, false).await;
                    return false;
                }
                let backoff = BASE_RETRY_SECS.saturating_mul(2u64.saturating_pow(attempt - 1)).min(MAX_RETRY_SECS);
                warn!(bot_id, error = %err, attempt, backoff, "user bot runtime startup failed, retrying");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }
    }
}

async fn handle_message(bot: Bot, msg: Message, state: RuntimeState) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = i64::try_from(from.id.0).unwrap_or(0);
    let is_owner = user_id == state.owner_user_id;

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if let Some(bot_row) = fetch_bot(&state).await {
        if text.starts_with('/') {
            if is_owner {
                let reply = dispatch_admin_command(text, &state, &bot_row).await;
                bot.send_message(msg.chat.id, reply).parse_mode(ParseMode::Html).await?;
            }
            return Ok(());
        }

        if text.eq_ignore_ascii_case("exit conversation") {
            let _ = state.store.clear_conversation(&state.bot_id, user_id).await;
            bot.send_message(msg.chat.id, "Conversation cleared.").await?;
            return Ok(());
        }

        if let Some(button_text) = bot_row.welcome_button_text.as_deref() {
            if text == button_text {
                handle_welcome_tap(&bot, &msg, &state, &bot_row, user_id).await?;
                return Ok(());
            }
        }
    }

    let first_name = Some(from.first_name.clone());
    let username = from.username.clone();
    match state
        .conversations
        .send_message(&state.bot_id, user_id, is_owner, first_name, username, text.to_owned())
        .await
    {
        Ok(TurnOutcome::Reply(reply)) => {
            bot.send_message(msg.chat.id, reply).parse_mode(ParseMode::Html).await?;
        }
        Ok(TurnOutcome::AccessDenied(reason)) => {
            bot.send_message(msg.chat.id, reason).await?;
        }
        Ok(TurnOutcome::TokensExhausted) => {
            bot.send_message(msg.chat.id, "This bot has run out of AI tokens for now.").await?;
        }
        Ok(TurnOutcome::TechnicalError) => {
            bot.send_message(msg.chat.id, "Sorry, a technical error occurred.").await?;
        }
        Err(err) => {
            warn!(bot_id = %state.bot_id, error = %err, "conversation manager unreachable");
        }
    }

    Ok(())
}

async fn handle_welcome_tap(
    bot: &Bot,
    msg: &Message,
    state: &RuntimeState,
    bot_row: &crate::store::models::UserBot,
    user_id: i64,
) -> ResponseResult<()> {
    let _ = state
        .store
        .upsert_subscriber(
            &state.bot_id,
            user_id,
            msg.chat.id.0,
            msg.from.as_ref().map(|u| u.first_name.as_str()),
            msg.from.as_ref().and_then(|u| u.username.as_deref()),
            msg.from.as_ref().and_then(|u| u.last_name.as_deref()),
        )
        .await;

    if let Err(err) = state.funnel.on_subscriber_activated(&state.bot_id, user_id).await {
        warn!(bot_id = %state.bot_id, error = %err, "failed to materialise funnel on activation");
    }

    if let Some(confirmation) = bot_row.confirmation_message.as_deref() {
        bot.send_message(msg.chat.id, escape_html(confirmation)).await?;
    }
    Ok(())
}

async fn handle_chat_member(bot: Bot, update: ChatMemberUpdated, state: RuntimeState) -> ResponseResult<()> {
    if !(update.chat.is_group() || update.chat.is_supergroup()) {
        return Ok(());
    }

    let was_absent = matches!(
        update.old_chat_member.kind,
        ChatMemberKind::Left | ChatMemberKind::Banned(_)
    );
    let now_present = !matches!(
        update.new_chat_member.kind,
        ChatMemberKind::Left | ChatMemberKind::Banned(_)
    );
    if !(was_absent && now_present) {
        return Ok(());
    }

    let user_id = i64::try_from(update.new_chat_member.user.id.0).unwrap_or(0);
    send_welcome(&bot, &state, user_id, update.chat.id.0, &update.new_chat_member.user).await;
    Ok(())
}

async fn handle_join_request(bot: Bot, request: ChatJoinRequest, state: RuntimeState) -> ResponseResult<()> {
    if let Err(err) = bot
        .approve_chat_join_request(request.chat.id, request.from.id)
        .await
    {
        warn!(bot_id = %state.bot_id, error = %err, "failed to approve chat join request");
        return Ok(());
    }

    let user_id = i64::try_from(request.from.id.0).unwrap_or(0);
    send_welcome(&bot, &state, user_id, request.user_chat_id.0, &request.from).await;
    Ok(())
}

async fn send_welcome(bot: &Bot, state: &RuntimeState, user_id: i64, dm_chat_id: i64, from: &teloxide::types::User) {
    let Some(bot_row) = fetch_bot(state).await else {
        return;
    };

    let _ = state
        .store
        .upsert_subscriber(
            &state.bot_id,
            user_id,
            dm_chat_id,
            Some(from.first_name.as_str()),
            from.username.as_deref(),
            from.last_name.as_deref(),
        )
        .await;

    let Some(welcome_text) = bot_row.welcome_message.as_deref() else {
        return;
    };

    let mut request = bot.send_message(ChatId(dm_chat_id), escape_html(welcome_text));
    if let Some(button_text) = bot_row.welcome_button_text.as_deref() {
        request = request.reply_markup(welcome_keyboard(button_text));
    }
    if let Err(err) = request.await {
        warn!(bot_id = %state.bot_id, error = %err, "failed to send welcome message");
    }
}

async fn fetch_bot(state: &RuntimeState) -> Option<crate::store::models::UserBot> {
    match state.store.get_bot(&state.bot_id).await {
        Ok(bot) => bot,
        Err(err) => {
            warn!(bot_id = %state.bot_id, error = %err, "failed to load bot row");
            None
        }
    }
}

async fn dispatch_admin_command(
    text: &str,
    state: &RuntimeState,
    bot_row: &crate::store::models::UserBot,
) -> String {
    let without_slash = &text[1..];
    let command = without_slash.split('@').next().unwrap_or(without_slash);

    match command {
        "stats" => {
            let remaining = bot_row
                .remaining_tokens()
                .map_or_else(|| "unlimited".to_owned(), |n| n.to_string());
            format!(
                "Bot <code>{}</code>\nStatus: {}\nTokens remaining: {}",
                escape_html(&bot_row.bot_username),
                bot_row.status,
                remaining
            )
        }
        "settings" => {
            "To change this bot's welcome message, open a DM with the master bot, tap \"My bots\", \
             select this bot, then \"Configure\"."
                .to_owned()
        }
        "broadcast" => {
            "Mass broadcasts to this bot's subscribers aren't configurable from here yet; \
             contact the platform administrator."
                .to_owned()
        }
        _ => {
            let _ = &state.bot_id;
            format!("Unknown command: /{}", escape_html(command))
        }
    }
}
