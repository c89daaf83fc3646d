//! Thin wrapper over the Telegram Bot API surface this platform consumes
//!: `sendMessage`, the typed media sends, `sendMediaGroup`,
//! `setMyCommands`, `approveChatJoinRequest`, and long-polling.
//!
//! Covers the full typed-media matrix the funnel and broadcast dispatchers
//! need to resend, beyond plain `send_message`/`send_document`.

pub mod media;
pub mod render;
pub mod ui;

use anyhow::Context;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, InputFile, ParseMode};

use crate::store::models::MediaType;

/// A rendered outbound message, ready to hand to [`TgTransport::send`].
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Destination chat.
    pub chat_id: i64,
    /// HTML body. Ignored for caption-incapable media where a preceding
    /// plain message is required instead.
    pub text: String,
    /// Attached media, if any.
    pub media: Option<OutboundMedia>,
    /// Inline keyboard, if any.
    pub keyboard: Option<InlineKeyboardMarkup>,
}

/// Media attached to an [`Outbound`] message.
#[derive(Debug, Clone)]
pub struct OutboundMedia {
    /// Telegram `file_id` to resend by reference.
    pub file_id: String,
    /// Which typed send call to use.
    pub kind: MediaType,
}

/// Outcome of attempting to deliver one [`Outbound`] message.
#[derive(Debug)]
pub enum SendOutcome {
    /// Delivered; carries the resulting Telegram message id.
    Sent(i32),
    /// The recipient has blocked the bot.
    Blocked,
    /// Telegram asked the caller to wait before retrying.
    RateLimited {
        /// Seconds to wait before retrying, as reported by Telegram.
        retry_after_secs: u64,
    },
    /// Any other failure; carries a short description.
    Failed(String),
}

/// Thin, testable wrapper over a [`teloxide::Bot`].
#[derive(Clone)]
pub struct TgTransport {
    bot: Bot,
}

impl TgTransport {
    /// Construct a transport over a bot token.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    /// Borrow the underlying `teloxide::Bot` for call sites (poll loop,
    /// `getMe`) that need the raw client.
    #[must_use]
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Send one rendered message, dispatching to the typed media send that
    /// matches `media.kind`, or plain text if `media` is `None`. Always
    /// uses HTML parse mode.
    pub async fn send(&self, msg: &Outbound) -> SendOutcome {
        let result = match &msg.media {
            None => self.send_text(msg).await,
            Some(media) => self.send_media(msg, media).await,
        };

        match result {
            Ok(message_id) => SendOutcome::Sent(message_id.0),
            Err(teloxide::RequestError::RetryAfter(duration)) => SendOutcome::RateLimited {
                retry_after_secs: duration.as_secs(),
            },
            Err(teloxide::RequestError::Api(api_err))
                if api_err.to_string().to_lowercase().contains("blocked") =>
            {
                SendOutcome::Blocked
            }
            Err(other) => SendOutcome::Failed(other.to_string()),
        }
    }

    async fn send_text(
        &self,
        msg: &Outbound,
    ) -> Result<teloxide::types::MessageId, teloxide::RequestError> {
        let mut request = self
            .bot
            .send_message(ChatId(msg.chat_id), &msg.text)
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = msg.keyboard.clone() {
            request = request.reply_markup(keyboard);
        }
        request.await.map(|m| m.id)
    }

    async fn send_media(
        &self,
        msg: &Outbound,
        media: &OutboundMedia,
    ) -> Result<teloxide::types::MessageId, teloxide::RequestError> {
        let file = InputFile::file_id(media.file_id.clone());
        let chat_id = ChatId(msg.chat_id);
        let caption = msg.text.clone();
        let keyboard = msg.keyboard.clone();

        match media.kind {
            MediaType::Photo => {
                let mut req = self
                    .bot
                    .send_photo(chat_id, file)
                    .caption(caption)
                    .parse_mode(ParseMode::Html);
                if let Some(k) = keyboard {
                    req = req.reply_markup(k);
                }
                req.await.map(|m| m.id)
            }
            MediaType::Video => {
                let mut req = self
                    .bot
                    .send_video(chat_id, file)
                    .caption(caption)
                    .parse_mode(ParseMode::Html);
                if let Some(k) = keyboard {
                    req = req.reply_markup(k);
                }
                req.await.map(|m| m.id)
            }
            MediaType::Document => {
                let mut req = self
                    .bot
                    .send_document(chat_id, file)
                    .caption(caption)
                    .parse_mode(ParseMode::Html);
                if let Some(k) = keyboard {
                    req = req.reply_markup(k);
                }
                req.await.map(|m| m.id)
            }
            MediaType::Audio => {
                let mut req = self
                    .bot
                    .send_audio(chat_id, file)
                    .caption(caption)
                    .parse_mode(ParseMode::Html);
                if let Some(k) = keyboard {
                    req = req.reply_markup(k);
                }
                req.await.map(|m| m.id)
            }
            MediaType::Animation => {
                let mut req = self
                    .bot
                    .send_animation(chat_id, file)
                    .caption(caption)
                    .parse_mode(ParseMode::Html);
                if let Some(k) = keyboard {
                    req = req.reply_markup(k);
                }
                req.await.map(|m| m.id)
            }
            // Voice, video_note, sticker carry no caption on Telegram's
            // side; the dispatcher sends the text as a preceding plain
            // message and calls this path only for the media itself
            //.
            MediaType::Voice => self.bot.send_voice(chat_id, file).await.map(|m| m.id),
            MediaType::VideoNote => self.bot.send_video_note(chat_id, file).await.map(|m| m.id),
            MediaType::Sticker => self.bot.send_sticker(chat_id, file).await.map(|m| m.id),
            MediaType::None => self.send_text(msg).await,
        }
    }

    /// Approve a pending chat-join request.
    ///
    /// # Errors
    ///
    /// Returns an error if the Telegram API call fails.
    pub async fn approve_join_request(&self, chat_id: i64, user_id: i64) -> anyhow::Result<()> {
        self.bot
            .approve_chat_join_request(ChatId(chat_id), UserId(
                u64::try_from(user_id).context("user_id must be non-negative")?,
            ))
            .await
            .context("failed to approve chat join request")?;
        Ok(())
    }

    /// Register the bot's slash-command menu.
    ///
    /// # Errors
    ///
    /// Returns an error if the Telegram API call fails.
    pub async fn set_commands(
        &self,
        commands: Vec<teloxide::types::BotCommand>,
    ) -> anyhow::Result<()> {
        self.bot
            .set_my_commands(commands)
            .await
            .context("failed to set bot commands")?;
        Ok(())
    }
}
