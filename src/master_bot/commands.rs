//! Master bot slash commands: `/start [REF_<code>]`, `/help`,
//! and the super-admin-only `/file_id` / `/broadcast`.
//!
//! Each command is a small function returning the HTML reply body, called
//! from `dispatch`, which does the string matching against the leading
//! slash-command token.

use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::warn;

use super::{PendingAction, SharedState};
use crate::store::models::BotStatus;

const REFERRAL_PREFIX: &str = "REF_";

/// Parse and run a slash command (the leading `/` already stripped),
/// returning the HTML reply.
pub async fn dispatch(
    without_slash: &str,
    state: &SharedState,
    bot: &Bot,
    user_id: i64,
    chat_id: i64,
    is_super_admin: bool,
) -> String {
    let (full_command, args) = match without_slash.split_once(' ') {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (without_slash, ""),
    };
    let command = full_command.split('@').next().unwrap_or(full_command);

    match command {
        "start" => handle_start(state, user_id, chat_id, args).await,
        "help" => handle_help(),
        "file_id" if is_super_admin => handle_file_id_notice(),
        "broadcast" if is_super_admin => handle_admin_broadcast(state, bot, args).await,
        _ => unknown_command(command),
    }
}

async fn handle_start(state: &SharedState, user_id: i64, chat_id: i64, args: &str) -> String {
    let referred_by = match args.strip_prefix(REFERRAL_PREFIX) {
        Some(code) => match state.store.get_user_by_referral_code(code).await {
            Ok(Some(referrer)) if referrer.user_id != user_id => Some(referrer.user_id),
            _ => None,
        },
        None => None,
    };

    match state
        .store
        .get_or_create_user(user_id, chat_id, referred_by, state.subscription.trial_enabled)
        .await
    {
        Ok(user) => {
            let trial_note = if state.subscription.trial_enabled {
                format!(
                    " Your {}-day trial has started — create a bot with \"Create bot\" below.",
                    state.subscription.trial_days
                )
            } else {
                String::new()
            };
            format!(
                "Welcome! Your referral code is <code>{}</code>.{trial_note}\n\nUse /help to see what I can do.",
                super::escape(&user.referral_code)
            )
        }
        Err(err) => {
            warn!(error = %err, user_id, "failed to bootstrap user on /start");
            "Something went wrong starting your account. Please try again.".to_owned()
        }
    }
}

fn handle_help() -> String {
    "Commands:\n\
     /start — register and start your trial\n\
     /help — this message\n\n\
     Use the menu buttons to create a bot, manage your bots, check pricing, \
     and view your referral program."
        .to_owned()
}

fn handle_file_id_notice() -> String {
    "Send any photo, video, document, audio, voice note, or sticker and I'll reply with its file_id.".to_owned()
}

async fn handle_admin_broadcast(state: &SharedState, bot: &Bot, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /broadcast <message> — sends <message> to every registered user.".to_owned();
    }

    // The store has no single "list every user" query — every existing
    // listing is scoped to the lifecycle bucket its own dispatcher needs.
    // This is a rare, manual, super-admin-only action, so paying for two
    // listings here beats adding a store method used nowhere else.
    let mut recipients: Vec<i64> = Vec::new();
    match state.store.list_trial_users().await {
        Ok(users) => recipients.extend(users.into_iter().map(|u| u.admin_chat_id)),
        Err(err) => warn!(error = %err, "admin broadcast failed to list trial users"),
    }
    match state.store.list_lapsed_paid_users(chrono::Utc::now()).await {
        Ok(users) => recipients.extend(users.into_iter().map(|u| u.admin_chat_id)),
        Err(err) => warn!(error = %err, "admin broadcast failed to list lapsed users"),
    }

    let mut sent = 0usize;
    for chat_id in recipients {
        let result = bot
            .send_message(ChatId(chat_id), super::escape(args))
            .parse_mode(ParseMode::Html)
            .await;
        if result.is_ok() {
            sent += 1;
        }
    }

    format!("Broadcast sent to {sent} user(s).")
}

fn unknown_command(command: &str) -> String {
    format!("Unknown command: /{}", super::escape(command))
}

/// Handle the text message that follows a `create_bot` tap: validate the
/// token against `getMe`, register the bot, and start its runtime.
pub async fn handle_bot_token_submission(state: &SharedState, owner_user_id: i64, token: &str) -> String {
    let probe = Bot::new(token);
    let me = match probe.get_me().await {
        Ok(me) => me,
        Err(err) => {
            warn!(error = %err, owner_user_id, "bot token validation failed");
            return "That doesn't look like a valid bot token. Get one from @BotFather and send it again, \
                    or tap \"Create bot\" to start over."
                .to_owned();
        }
    };

    let username = me.user.username.clone().unwrap_or_else(|| me.user.first_name.clone());

    match state.store.create_bot(owner_user_id, token, &username).await {
        Ok(bot_id) => {
            if let Err(err) = state.fleet.add_bot(&bot_id).await {
                warn!(error = %err, bot_id, "failed to start newly registered bot");
                return format!(
                    "Bot @{} registered, but it failed to start. It will be retried automatically.",
                    super::escape(&username)
                );
            }
            let _ = state.store.set_bot_run_state(&bot_id, BotStatus::Active, true).await;
            format!("Bot @{} is now live. Use \"My bots\" to configure it.", super::escape(&username))
        }
        Err(err) => {
            warn!(error = %err, owner_user_id, "failed to register bot");
            "Failed to register that bot. Please try again.".to_owned()
        }
    }
}

/// Mark that the given user just tapped `create_bot` and is now expected
/// to send a bot token as their next message.
pub fn await_bot_token(state: &SharedState, user_id: i64) {
    if let Ok(mut pending) = state.pending.lock() {
        pending.insert(user_id, PendingAction::AwaitingBotToken);
    }
}

/// Mark that the given owner just tapped `manage_configure_<id>` and is now
/// expected to send a replacement welcome message for that bot.
pub fn await_welcome_message(state: &SharedState, user_id: i64, bot_id: &str) {
    if let Ok(mut pending) = state.pending.lock() {
        pending.insert(user_id, PendingAction::AwaitingWelcomeMessage(bot_id.to_owned()));
    }
}

/// Handle the text message that follows a `manage_configure_<id>` tap:
/// store it as the bot's new welcome message.
pub async fn handle_welcome_message_submission(
    state: &SharedState,
    owner_user_id: i64,
    bot_id: &str,
    new_message: &str,
) -> String {
    match state.store.get_bot(bot_id).await {
        Ok(Some(bot)) if bot.owner_user_id == owner_user_id => {}
        Ok(_) => return "That bot is no longer yours to configure.".to_owned(),
        Err(err) => {
            warn!(error = %err, bot_id, "failed to load bot for welcome message update");
            return "Something went wrong. Please try again.".to_owned();
        }
    }

    match state.store.update_bot_welcome_message(bot_id, new_message).await {
        Ok(()) => "Welcome message updated.".to_owned(),
        Err(err) => {
            warn!(error = %err, bot_id, "failed to update welcome message");
            "Failed to update the welcome message. Please try again.".to_owned()
        }
    }
}
