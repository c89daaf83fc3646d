//! Master bot inline-keyboard callbacks.
//!
//! `dispatch` strips the leading `kind_` prefix off callback data and
//! routes to the matching handler, which returns a reply that may carry
//! its own follow-up keyboard rather than just an answer-text.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::warn;

use super::{commands, SharedState};
use crate::subscription::payments::build_payment_url;

/// A callback's reply: HTML text, and an optional keyboard to drive the
/// next step.
pub struct CallbackOutcome {
    /// HTML-formatted reply body.
    pub text: String,
    /// Follow-up inline keyboard, if this action leads to another step.
    pub keyboard: Option<InlineKeyboardMarkup>,
}

impl CallbackOutcome {
    fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), keyboard: None }
    }

    fn with_keyboard(text: impl Into<String>, keyboard: InlineKeyboardMarkup) -> Self {
        Self { text: text.into(), keyboard: Some(keyboard) }
    }
}

/// Route one callback's `data` payload to its handler.
pub async fn dispatch(
    state: &SharedState,
    user_id: i64,
    _chat_id: i64,
    is_super_admin: bool,
    data: &str,
) -> CallbackOutcome {
    match data {
        "create_bot" => handle_create_bot(state, user_id).await,
        "my_bots" => handle_my_bots(state, user_id).await,
        "pricing" => handle_pricing(),
        "pay_subscription" => handle_pay_subscription(state, user_id),
        "check_payment_status" => handle_check_payment_status(state, user_id).await,
        "buy_tokens" => handle_buy_tokens(),
        "pay_tokens" => handle_pay_tokens(state, user_id),
        "referral_program" => handle_referral_program(state, user_id).await,
        "referral_history" => handle_referral_history(state, user_id).await,
        "admin_stats" if is_super_admin => handle_admin_stats(state).await,
        "admin_broadcast" if is_super_admin => handle_admin_broadcast_notice(),
        "admin_history" if is_super_admin => handle_admin_history(state).await,
        _ if data.starts_with("admin_") => denied("That action is for the platform administrator only."),
        _ => {
            if let Some(id) = data.strip_prefix("confirm_delete_") {
                handle_confirm_delete(state, user_id, id).await
            } else if let Some(id) = data.strip_prefix("manage_configure_") {
                handle_manage_configure(state, user_id, id).await
            } else if let Some(id) = data.strip_prefix("manage_stats_") {
                handle_manage_stats(state, user_id, id).await
            } else if let Some(id) = data.strip_prefix("manage_restart_") {
                handle_manage_restart(state, user_id, id).await
            } else if let Some(id) = data.strip_prefix("manage_delete_") {
                handle_manage_delete(state, user_id, id).await
            } else if let Some(id) = data.strip_prefix("bot_") {
                handle_bot_detail(state, user_id, id).await
            } else {
                CallbackOutcome::text("Unknown action.")
            }
        }
    }
}

fn denied(message: &str) -> CallbackOutcome {
    CallbackOutcome::text(message.to_owned())
}

async fn handle_create_bot(state: &SharedState, user_id: i64) -> CallbackOutcome {
    match state.gate.check_user_access(user_id).await {
        Ok(Ok(())) => {
            commands::await_bot_token(state, user_id);
            CallbackOutcome::text(
                "Send me the token for your bot (get one from @BotFather, then forward its message here).",
            )
        }
        Ok(Err(reason)) => denied(crate::subscription::SubscriptionGate::denial_message(&reason)),
        Err(err) => {
            warn!(error = %err, user_id, "gate check failed for create_bot");
            CallbackOutcome::text("Something went wrong. Please try again.")
        }
    }
}

async fn handle_my_bots(state: &SharedState, user_id: i64) -> CallbackOutcome {
    let bots = match state.store.list_bots_for_owner(user_id).await {
        Ok(bots) => bots,
        Err(err) => {
            warn!(error = %err, user_id, "failed to list bots");
            return CallbackOutcome::text("Failed to load your bots.");
        }
    };

    if bots.is_empty() {
        return CallbackOutcome::text("You don't have any bots yet. Tap \"Create bot\" to register one.");
    }

    let rows = bots
        .iter()
        .map(|bot| {
            vec![InlineKeyboardButton::callback(
                format!("@{} ({})", bot.bot_username, bot.status),
                format!("bot_{}", bot.bot_id),
            )]
        })
        .collect();

    CallbackOutcome::with_keyboard("Your bots:", InlineKeyboardMarkup::new(rows))
}

async fn handle_bot_detail(state: &SharedState, user_id: i64, bot_id: &str) -> CallbackOutcome {
    let Some(bot) = owned_bot(state, user_id, bot_id).await else {
        return denied("Bot not found.");
    };

    let text = format!(
        "@{}\nStatus: {}\nAI enabled: {}\nTokens remaining: {}",
        super::escape(&bot.bot_username),
        bot.status,
        bot.ai_enabled,
        bot.remaining_tokens().map_or("unlimited".to_owned(), |n| n.to_string()),
    );

    let rows = vec![
        vec![InlineKeyboardButton::callback("Configure", format!("manage_configure_{bot_id}"))],
        vec![InlineKeyboardButton::callback("Stats", format!("manage_stats_{bot_id}"))],
        vec![InlineKeyboardButton::callback("Restart", format!("manage_restart_{bot_id}"))],
        vec![InlineKeyboardButton::callback("Delete", format!("manage_delete_{bot_id}"))],
    ];

    CallbackOutcome::with_keyboard(text, InlineKeyboardMarkup::new(rows))
}

async fn handle_manage_configure(state: &SharedState, user_id: i64, bot_id: &str) -> CallbackOutcome {
    let Some(bot) = owned_bot(state, user_id, bot_id).await else {
        return denied("Bot not found.");
    };
    commands::await_welcome_message(state, user_id, bot_id);
    CallbackOutcome::text(format!(
        "Send the new welcome message for @{} as your next message.",
        super::escape(&bot.bot_username)
    ))
}

async fn handle_manage_stats(state: &SharedState, user_id: i64, bot_id: &str) -> CallbackOutcome {
    let Some(bot) = owned_bot(state, user_id, bot_id).await else {
        return denied("Bot not found.");
    };
    let subscribers = state.store.list_active_subscribers(bot_id).await.map(|s| s.len()).unwrap_or(0);
    CallbackOutcome::text(format!(
        "@{}\nActive subscribers: {subscribers}\nInput tokens used: {}\nOutput tokens used: {}",
        super::escape(&bot.bot_username),
        bot.tokens_input_used,
        bot.tokens_output_used,
    ))
}

async fn handle_manage_restart(state: &SharedState, user_id: i64, bot_id: &str) -> CallbackOutcome {
    if owned_bot(state, user_id, bot_id).await.is_none() {
        return denied("Bot not found.");
    }
    match state.fleet.restart_bot(bot_id).await {
        Ok(()) => CallbackOutcome::text("Bot restarted."),
        Err(err) => {
            warn!(error = %err, bot_id, "failed to restart bot");
            CallbackOutcome::text("Failed to restart the bot.")
        }
    }
}

async fn handle_manage_delete(state: &SharedState, user_id: i64, bot_id: &str) -> CallbackOutcome {
    let Some(bot) = owned_bot(state, user_id, bot_id).await else {
        return denied("Bot not found.");
    };
    let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Confirm delete",
        format!("confirm_delete_{bot_id}"),
    )]]);
    CallbackOutcome::with_keyboard(
        format!(
            "This permanently deletes @{} and all of its subscribers, funnel state, and broadcast history. This cannot be undone.",
            super::escape(&bot.bot_username)
        ),
        keyboard,
    )
}

async fn handle_confirm_delete(state: &SharedState, user_id: i64, bot_id: &str) -> CallbackOutcome {
    if owned_bot(state, user_id, bot_id).await.is_none() {
        return denied("Bot not found.");
    }
    state.fleet.remove_bot(bot_id).await;
    match state.store.delete_bot(bot_id).await {
        Ok(()) => CallbackOutcome::text("Bot deleted."),
        Err(err) => {
            warn!(error = %err, bot_id, "failed to delete bot");
            CallbackOutcome::text("Failed to delete the bot.")
        }
    }
}

async fn owned_bot(state: &SharedState, user_id: i64, bot_id: &str) -> Option<crate::store::models::UserBot> {
    match state.store.get_bot(bot_id).await {
        Ok(Some(bot)) if bot.owner_user_id == user_id => Some(bot),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, bot_id, "failed to load bot");
            None
        }
    }
}

fn handle_pricing() -> CallbackOutcome {
    let keyboard = InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("Subscribe", "pay_subscription")],
        vec![InlineKeyboardButton::callback("Buy tokens", "buy_tokens")],
    ]);
    CallbackOutcome::with_keyboard(
        "Subscription: unlocks bot creation and AI dialog.\nTokens: top up a bot's AI usage budget.",
        keyboard,
    )
}

fn handle_pay_subscription(state: &SharedState, user_id: i64) -> CallbackOutcome {
    match payment_link(state, user_id, false) {
        Ok(url) => {
            let keyboard = InlineKeyboardMarkup::new(vec![
                vec![InlineKeyboardButton::url("Pay", crate::telegram::ui::parse_url(&url))],
                vec![InlineKeyboardButton::callback("Check payment status", "check_payment_status")],
            ]);
            CallbackOutcome::with_keyboard("Tap to pay, then check your status once it's confirmed.", keyboard)
        }
        Err(message) => CallbackOutcome::text(message),
    }
}

fn handle_buy_tokens() -> CallbackOutcome {
    let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback("Pay", "pay_tokens")]]);
    CallbackOutcome::with_keyboard("Token top-up applies to every bot you own.", keyboard)
}

fn handle_pay_tokens(state: &SharedState, user_id: i64) -> CallbackOutcome {
    match payment_link(state, user_id, true) {
        Ok(url) => {
            let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
                "Pay",
                crate::telegram::ui::parse_url(&url),
            )]]);
            CallbackOutcome::with_keyboard("Tap to pay for a token top-up.", keyboard)
        }
        Err(message) => CallbackOutcome::text(message),
    }
}

fn payment_link(state: &SharedState, user_id: i64, for_tokens: bool) -> Result<String, String> {
    let merchant_login = state
        .credentials
        .get("ROBOKASSA_MERCHANT_LOGIN")
        .ok_or_else(|| "Payments are not configured yet.".to_owned())?;
    let password1 = state
        .credentials
        .get("ROBOKASSA_PASSWORD1")
        .ok_or_else(|| "Payments are not configured yet.".to_owned())?;
    let amount_key = if for_tokens { "ROBOKASSA_TOKENS_AMOUNT" } else { "ROBOKASSA_PAYMENT_AMOUNT" };
    let amount = state
        .credentials
        .get(amount_key)
        .ok_or_else(|| "Payments are not configured yet.".to_owned())?;

    let inv_id = chrono::Utc::now().timestamp();
    Ok(build_payment_url(
        merchant_login,
        password1,
        amount,
        user_id,
        for_tokens,
        state.payments.is_test,
        inv_id,
    ))
}

async fn handle_check_payment_status(state: &SharedState, user_id: i64) -> CallbackOutcome {
    match state.store.get_user(user_id).await {
        Ok(Some(user)) => CallbackOutcome::text(format!(
            "Subscription status: {}{}",
            user.subscription_status,
            user.subscription_expires_at
                .map(|exp| format!(", expires {}", exp.format("%Y-%m-%d")))
                .unwrap_or_default()
        )),
        Ok(None) => CallbackOutcome::text("Send /start first."),
        Err(err) => {
            warn!(error = %err, user_id, "failed to check payment status");
            CallbackOutcome::text("Failed to check status.")
        }
    }
}

async fn handle_referral_program(state: &SharedState, user_id: i64) -> CallbackOutcome {
    match state.store.get_user(user_id).await {
        Ok(Some(user)) => CallbackOutcome::text(format!(
            "Your referral code: <code>{}</code>\nShare it as /start REF_{}\n\nReferrals: {}\nEarnings: {} ({}%)",
            super::escape(&user.referral_code),
            super::escape(&user.referral_code),
            user.total_referrals,
            user.referral_earnings,
            state.subscription.referral_commission_pct
        )),
        Ok(None) => CallbackOutcome::text("Send /start first."),
        Err(err) => {
            warn!(error = %err, user_id, "failed to load referral program info");
            CallbackOutcome::text("Failed to load your referral program.")
        }
    }
}

async fn handle_referral_history(state: &SharedState, user_id: i64) -> CallbackOutcome {
    match state.store.list_referral_history(user_id).await {
        Ok(history) if history.is_empty() => CallbackOutcome::text("No referral earnings yet."),
        Ok(history) => {
            let lines: Vec<String> = history
                .iter()
                .take(20)
                .map(|t| format!("{}: +{} ({})", t.created_at.format("%Y-%m-%d"), t.commission_amount, t.transaction_type))
                .collect();
            CallbackOutcome::text(lines.join("\n"))
        }
        Err(err) => {
            warn!(error = %err, user_id, "failed to load referral history");
            CallbackOutcome::text("Failed to load referral history.")
        }
    }
}

async fn handle_admin_stats(state: &SharedState) -> CallbackOutcome {
    let users = state.store.count_users().await.unwrap_or(0);
    let bots = state.store.count_bots().await.unwrap_or(0);
    let active_bots = state.store.list_active_bots().await.map(|b| b.len()).unwrap_or(0);
    CallbackOutcome::text(format!("Users: {users}\nBots: {bots}\nActive bot runtimes: {active_bots}"))
}

fn handle_admin_broadcast_notice() -> CallbackOutcome {
    CallbackOutcome::text("Use /broadcast <message> to message every registered user.")
}

async fn handle_admin_history(state: &SharedState) -> CallbackOutcome {
    let trial = state.store.list_trial_users().await.map(|u| u.len()).unwrap_or(0);
    let lapsed = state
        .store
        .list_lapsed_paid_users(chrono::Utc::now())
        .await
        .map(|u| u.len())
        .unwrap_or(0);
    CallbackOutcome::text(format!("Trial users: {trial}\nLapsed paid users pending expiry sweep: {lapsed}"))
}
