//! Per-bot LLM token budget.

use crate::error::BudgetError;
use crate::store::models::UserBot;
use crate::store::Store;

/// Warning fires once remaining budget drops to this fraction of the
/// total limit.
const WARNING_THRESHOLD_PCT: f64 = 10.0;

/// Check whether a bot may start another AI turn. Called by the
/// Conversation Manager before every call to the LLM Bridge.
///
/// # Errors
///
/// Returns [`BudgetError::Exhausted`] if `remaining <= 0`. An unlimited
/// budget (`tokens_limit_total = None`) never refuses.
pub fn check_token_limit(bot: &UserBot) -> Result<(), BudgetError> {
    match bot.remaining_tokens() {
        Some(remaining) if remaining <= 0 => Err(BudgetError::Exhausted),
        _ => Ok(()),
    }
}

/// Outcome of debiting tokens after a turn: whether a warning or
/// exhaustion notification should now fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTrigger {
    /// No new notification is due.
    None,
    /// Remaining budget crossed below the warning threshold.
    Warning,
    /// Remaining budget reached zero or below.
    Exhausted,
}

/// Decide which notification (if any) should fire after debiting,
/// given the bot's state *before* the debit and its `remaining_tokens`
/// *after*. Idempotent via `token_notification_sent` — the caller only
/// acts on a non-`None` trigger when that flag was not already set.
#[must_use]
pub fn notification_trigger(bot: &UserBot, remaining_after: Option<i64>) -> NotificationTrigger {
    if bot.token_notification_sent {
        return NotificationTrigger::None;
    }

    let Some(limit) = bot.tokens_limit_total else {
        return NotificationTrigger::None;
    };
    let Some(remaining) = remaining_after else {
        return NotificationTrigger::None;
    };

    if remaining <= 0 {
        return NotificationTrigger::Exhausted;
    }

    if limit > 0 {
        #[allow(clippy::cast_precision_loss)]
        let pct_remaining = (remaining as f64 / limit as f64) * 100.0;
        if pct_remaining <= WARNING_THRESHOLD_PCT {
            return NotificationTrigger::Warning;
        }
    }

    NotificationTrigger::None
}

/// Apply a token debit against the store and report which notification
/// (if any) should fire. This always writes, even for a reported usage of
/// `(0, 0)`.
///
/// # Errors
///
/// Returns an error if the store write fails.
pub async fn debit_and_classify(
    store: &Store,
    bot: &UserBot,
    input_tokens: i64,
    output_tokens: i64,
) -> anyhow::Result<NotificationTrigger> {
    store
        .debit_tokens(&bot.bot_id, input_tokens, output_tokens)
        .await?;

    let remaining_after = bot.tokens_limit_total.map(|limit| {
        limit
            .saturating_sub(bot.tokens_input_used.saturating_add(input_tokens))
            .saturating_sub(bot.tokens_output_used.saturating_add(output_tokens))
    });

    let trigger = notification_trigger(bot, remaining_after);
    if !matches!(trigger, NotificationTrigger::None) {
        store.mark_token_notification_sent(&bot.bot_id).await?;
    }

    Ok(trigger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bot_with_budget(limit: Option<i64>, input_used: i64, output_used: i64) -> UserBot {
        UserBot {
            bot_id: "bot-1".to_owned(),
            owner_user_id: 1,
            token: "t".to_owned(),
            bot_username: "testbot".to_owned(),
            status: crate::store::models::BotStatus::Active,
            is_running: true,
            welcome_message: None,
            welcome_button_text: None,
            confirmation_message: None,
            goodbye_message: None,
            goodbye_button_text: None,
            goodbye_button_url: None,
            ai_enabled: true,
            ai_assistant_id: None,
            ai_provider: crate::store::models::AiProvider::OpenAi,
            ai_model: None,
            ai_system_prompt: None,
            ai_settings: serde_json::Value::Null,
            tokens_limit_total: limit,
            tokens_input_used: input_used,
            tokens_output_used: output_used,
            token_notification_sent: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unlimited_budget_never_refuses() {
        let bot = bot_with_budget(None, 1_000_000, 1_000_000);
        assert!(check_token_limit(&bot).is_ok());
    }

    #[test]
    fn exhausted_budget_refuses() {
        let bot = bot_with_budget(Some(1000), 600, 400);
        assert_eq!(check_token_limit(&bot), Err(BudgetError::Exhausted));
    }

    #[test]
    fn near_exhaustion_denies_next_turn() {
        let bot = bot_with_budget(Some(1000), 500, 495);
        assert_eq!(bot.remaining_tokens(), Some(5));
        assert!(check_token_limit(&bot).is_ok());

        let bot = bot_with_budget(Some(1000), 500, 500);
        assert_eq!(check_token_limit(&bot), Err(BudgetError::Exhausted));
    }

    #[test]
    fn warning_fires_at_or_below_ten_percent() {
        let bot = bot_with_budget(Some(1000), 450, 460);
        assert_eq!(
            notification_trigger(&bot, Some(90)),
            NotificationTrigger::Warning
        );
    }

    #[test]
    fn already_sent_flag_suppresses_further_notifications() {
        let mut bot = bot_with_budget(Some(1000), 990, 9);
        bot.token_notification_sent = true;
        assert_eq!(notification_trigger(&bot, Some(1)), NotificationTrigger::None);
    }
}
