//! Master Bot: the one platform-owned Telegram bot through which every
//! user registers, manages their fleet of user bots, and pays.
//!
//! Uses the usual `dptree::entry().branch(filter_message).branch(filter_callback_query)`
//! shape, a `dispatch_command` match-on-command-string dispatcher, and a
//! `handle_callback` answer-then-route flow. Multi-step flows
//! (`create_bot` asking for a token next message, `manage_configure_<id>`
//! asking for a new welcome message) are tracked with a lightweight
//! per-user FSM slot, modeled as a tagged-variant state kept in an
//! in-memory keyed store.

pub mod callbacks;
pub mod commands;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{info, warn};

use crate::config::{PaymentsConfig, SubscriptionConfig};
use crate::credentials::Credentials;
use crate::fleet::FleetSupervisor;
use crate::store::Store;
use crate::subscription::SubscriptionGate;
use crate::telegram::ui::escape_html;

/// The one thing the master bot tracks across messages: whether a user is
/// mid-way through a multi-step flow and what it's waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    /// `create_bot` was tapped; the next text message is the bot token.
    AwaitingBotToken,
    /// `manage_configure_<id>` was tapped; the next text message replaces
    /// that bot's welcome message.
    AwaitingWelcomeMessage(String),
}

#[derive(Clone)]
struct SharedState {
    store: Store,
    gate: SubscriptionGate,
    fleet: FleetSupervisor,
    subscription: SubscriptionConfig,
    payments: PaymentsConfig,
    credentials: Arc<Credentials>,
    admin_chat_id: Option<i64>,
    pending: Arc<Mutex<HashMap<i64, PendingAction>>>,
}

/// Start the master bot's dispatcher. Runs until the process exits; the
/// caller is expected to hold this task's `JoinHandle` alongside the
/// Fleet Supervisor's and the dispatcher tasks'.
///
/// # Errors
///
/// Returns an error if `getMe` never succeeds (bad token).
pub async fn run(
    token: String,
    store: Store,
    gate: SubscriptionGate,
    fleet: FleetSupervisor,
    subscription: SubscriptionConfig,
    payments: PaymentsConfig,
    credentials: Arc<Credentials>,
) -> anyhow::Result<()> {
    let bot = Bot::new(&token);
    bot.get_me().await.map_err(|e| anyhow::anyhow!("master bot token rejected: {e}"))?;

    let admin_chat_id = credentials.admin_chat_id().ok();

    let state = SharedState {
        store,
        gate,
        fleet,
        subscription,
        payments,
        credentials,
        admin_chat_id,
        pending: Arc::new(Mutex::new(HashMap::new())),
    };

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    info!("master bot dispatcher starting");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: SharedState) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else { return Ok(()) };
    let Ok(user_id) = i64::try_from(user.id.0) else { return Ok(()) };
    let Some(text) = msg.text() else { return Ok(()) };

    let is_super_admin = state.admin_chat_id == Some(msg.chat.id.0);

    if let Some(stripped) = text.strip_prefix('/') {
        let reply = commands::dispatch(stripped, &state, &bot, user_id, msg.chat.id.0, is_super_admin).await;
        bot.send_message(msg.chat.id, reply).parse_mode(ParseMode::Html).await?;
        return Ok(());
    }

    // Not a command: if this user tapped `create_bot` or `manage_configure_*`
    // and we're waiting on their reply, this message is it. Anything else
    // falls through silently; unhandled input is not an error.
    let pending = state.pending.lock().ok().and_then(|mut p| p.remove(&user_id));
    match pending {
        Some(PendingAction::AwaitingBotToken) => {
            let reply = commands::handle_bot_token_submission(&state, user_id, text.trim()).await;
            bot.send_message(msg.chat.id, reply).parse_mode(ParseMode::Html).await?;
        }
        Some(PendingAction::AwaitingWelcomeMessage(bot_id)) => {
            let reply = commands::handle_welcome_message_submission(&state, user_id, &bot_id, text.trim()).await;
            bot.send_message(msg.chat.id, reply).parse_mode(ParseMode::Html).await?;
        }
        None => {}
    }

    Ok(())
}

async fn handle_callback(bot: Bot, query: CallbackQuery, state: SharedState) -> ResponseResult<()> {
    let Ok(user_id) = i64::try_from(query.from.id.0) else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };
    let chat_id = query.message.as_ref().map(|m| m.chat().id.0).unwrap_or(user_id);
    let is_super_admin = state.admin_chat_id == Some(chat_id);

    let Some(data) = query.data.as_deref() else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };

    let outcome = callbacks::dispatch(&state, user_id, chat_id, is_super_admin, data).await;

    if let Err(err) = bot.answer_callback_query(&query.id).await {
        warn!(error = %err, "failed to answer callback query");
    }

    let mut request = bot.send_message(ChatId(chat_id), outcome.text).parse_mode(ParseMode::Html);
    if let Some(keyboard) = outcome.keyboard {
        request = request.reply_markup(keyboard);
    }
    request.await?;

    Ok(())
}

fn escape(text: &str) -> String {
    escape_html(text)
}
