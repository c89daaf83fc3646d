//! HTML escaping and inline keyboard helpers.
//!
//! All output uses HTML parse mode (never MarkdownV2) per project
//! convention.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::store::models::MessageButton;

/// Escape special HTML characters in user-provided text.
#[must_use]
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Build the inline keyboard for a funnel step from its stored buttons.
#[must_use]
pub fn funnel_keyboard(buttons: &[MessageButton]) -> Option<InlineKeyboardMarkup> {
    if buttons.is_empty() {
        return None;
    }

    let rows: Vec<Vec<InlineKeyboardButton>> = buttons
        .iter()
        .map(|b| vec![InlineKeyboardButton::url(b.button_text.clone(), parse_url(&b.button_url))])
        .collect();

    Some(InlineKeyboardMarkup::new(rows))
}

/// Build the single inline URL button a mass broadcast may carry.
#[must_use]
pub fn broadcast_keyboard(button_text: &str, button_url: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
        button_text.to_owned(),
        parse_url(button_url),
    )]])
}

pub(crate) fn parse_url(raw: &str) -> reqwest::Url {
    reqwest::Url::parse(raw).unwrap_or_else(|_| {
        reqwest::Url::parse("https://t.me").expect("static fallback URL is valid")
    })
}

/// Build the welcome-flow reply keyboard: a single persistent button whose
/// label the Runtime matches by text equality to trigger
/// `onSubscriberActivated` — a plain
/// `InlineKeyboardButton` would arrive as a callback query instead of a
/// message, so this needs the other keyboard kind.
#[must_use]
pub fn welcome_keyboard(button_text: &str) -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(button_text.to_owned())]])
        .resize_keyboard(true)
}
