//! Entity types for every row the store owns.
//!
//! Enums that are persisted as `TEXT` columns round-trip through
//! [`std::str::FromStr`] / [`std::fmt::Display`] rather than a derive macro,
//! matching the hand-rolled row-tuple conversion the store uses throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's position in the subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    /// Never started a trial or paid.
    Free,
    /// Inside the trial window.
    Trial,
    /// Has time remaining on a paid subscription.
    Paid,
    /// Trial or paid subscription has lapsed.
    Expired,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Trial => "trial",
            Self::Paid => "paid",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "trial" => Ok(Self::Trial),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            other => Err(anyhow::anyhow!("unknown subscription_status: {other}")),
        }
    }
}

/// One human Telegram account interacting with the master bot.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// External Telegram user id; natural key.
    pub user_id: i64,
    /// Chat id of the private chat with the master bot.
    pub admin_chat_id: i64,
    /// Current lifecycle position.
    pub subscription_status: SubscriptionStatus,
    /// When the trial began, if ever.
    pub trial_started_at: Option<DateTime<Utc>>,
    /// When the paid subscription lapses, if any.
    pub subscription_expires_at: Option<DateTime<Utc>>,
    /// Unique, immutable-once-set short referral token.
    pub referral_code: String,
    /// The user who referred this one, if any.
    pub referred_by: Option<i64>,
    /// Count of users this user has referred.
    pub total_referrals: i64,
    /// Cumulative referral commission earned, 2-dp decimal stored as text.
    pub referral_earnings: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Which AI provider a bot is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiProvider {
    /// No provider configured.
    None,
    /// OpenAI Responses-style API.
    OpenAi,
    /// ChatForYou assistant API.
    ChatForYou,
    /// ProTalk assistant API.
    ProTalk,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::OpenAi => "openai",
            Self::ChatForYou => "chatforyou",
            Self::ProTalk => "protalk",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AiProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "openai" => Ok(Self::OpenAi),
            "chatforyou" => Ok(Self::ChatForYou),
            "protalk" => Ok(Self::ProTalk),
            other => Err(anyhow::anyhow!("unknown ai_provider: {other}")),
        }
    }
}

/// Status of a [`UserBot`] poll-loop registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    /// Eligible to run; Fleet Supervisor keeps a Runtime alive for it.
    Active,
    /// Runtime exhausted its retry budget and stopped itself.
    Error,
    /// Owner disabled it explicitly.
    Disabled,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Error => "error",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BotStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "error" => Ok(Self::Error),
            "disabled" => Ok(Self::Disabled),
            other => Err(anyhow::anyhow!("unknown bot status: {other}")),
        }
    }
}

/// One Telegram bot token registered by a [`User`].
#[derive(Debug, Clone, PartialEq)]
pub struct UserBot {
    /// Opaque identifier, a UUID.
    pub bot_id: String,
    /// The user who registered this bot.
    pub owner_user_id: i64,
    /// Bot token, handled as a secret (never logged).
    pub token: String,
    /// `@username` of the bot, as reported by `getMe`.
    pub bot_username: String,
    /// Whether the Fleet Supervisor should be running a Runtime for it.
    pub status: BotStatus,
    /// Whether a Runtime is currently attached.
    pub is_running: bool,
    /// Welcome text shown to a brand-new subscriber.
    pub welcome_message: Option<String>,
    /// Label on the welcome inline button.
    pub welcome_button_text: Option<String>,
    /// Text shown after the welcome button is tapped.
    pub confirmation_message: Option<String>,
    /// Text shown when a subscriber leaves.
    pub goodbye_message: Option<String>,
    /// Label on the goodbye inline button.
    pub goodbye_button_text: Option<String>,
    /// URL behind the goodbye inline button.
    pub goodbye_button_url: Option<String>,
    /// Whether the AI dialog handler is active for this bot.
    pub ai_enabled: bool,
    /// Provider-side assistant/thread identifier, once detected.
    pub ai_assistant_id: Option<String>,
    /// Detected or configured provider.
    pub ai_provider: AiProvider,
    /// Model name passed to the provider.
    pub ai_model: Option<String>,
    /// System prompt prefixed to every turn.
    pub ai_system_prompt: Option<String>,
    /// Opaque settings blob (e.g. `enable_file_search`).
    pub ai_settings: serde_json::Value,
    /// Total token budget; `None` means unlimited.
    pub tokens_limit_total: Option<i64>,
    /// Cumulative prompt tokens consumed.
    pub tokens_input_used: i64,
    /// Cumulative completion tokens consumed.
    pub tokens_output_used: i64,
    /// Whether the low-budget warning has already fired.
    pub token_notification_sent: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

impl UserBot {
    /// Tokens left in the budget; `None` means unlimited.
    #[must_use]
    pub fn remaining_tokens(&self) -> Option<i64> {
        self.tokens_limit_total.map(|limit| {
            limit
                .saturating_sub(self.tokens_input_used)
                .saturating_sub(self.tokens_output_used)
        })
    }
}

/// One `(bot, end-user)` pair that entered a user bot's audience.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    /// Owning bot.
    pub bot_id: String,
    /// Telegram user id of the subscriber.
    pub user_id: i64,
    /// Chat id to send messages to.
    pub chat_id: i64,
    /// First name, for template substitution.
    pub first_name: Option<String>,
    /// `@username`, for template substitution.
    pub username: Option<String>,
    /// Last name, for template substitution.
    pub last_name: Option<String>,
    /// When the funnel was first materialised for this subscriber.
    pub funnel_started_at: Option<DateTime<Utc>>,
    /// Highest funnel `message_number` already delivered.
    pub last_broadcast_message: Option<i64>,
    /// Whether this subscriber currently participates in the funnel.
    pub funnel_enabled: bool,
    /// Whether the subscriber is still considered a live audience member.
    pub is_active: bool,
}

/// A bot's funnel container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSequence {
    /// Primary key.
    pub sequence_id: i64,
    /// Owning bot is looked up separately; kept out to avoid an owned
    /// `String` in a `Copy` type.
    pub is_enabled: bool,
}

/// The media kind attached to a funnel step or broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    /// No media attached.
    None,
    /// A photo.
    Photo,
    /// A video.
    Video,
    /// A generic document.
    Document,
    /// An audio file.
    Audio,
    /// A voice note.
    Voice,
    /// A round video note.
    VideoNote,
    /// An animated GIF.
    Animation,
    /// A sticker.
    Sticker,
}

impl MediaType {
    /// Telegram does not allow a caption on these send types.
    #[must_use]
    pub fn supports_caption(self) -> bool {
        !matches!(self, Self::Voice | Self::VideoNote | Self::Sticker)
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::VideoNote => "video_note",
            Self::Animation => "animation",
            Self::Sticker => "sticker",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "photo" => Ok(Self::Photo),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "audio" => Ok(Self::Audio),
            "voice" => Ok(Self::Voice),
            "video_note" => Ok(Self::VideoNote),
            "animation" => Ok(Self::Animation),
            "sticker" => Ok(Self::Sticker),
            other => Err(anyhow::anyhow!("unknown media_type: {other}")),
        }
    }
}

/// One inline-URL button on a funnel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageButton {
    /// Owning message.
    pub message_id: i64,
    /// Display order, 0-based.
    pub position: i64,
    /// Button label.
    pub button_text: String,
    /// Target URL.
    pub button_url: String,
}

/// One funnel step template.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    /// Primary key.
    pub message_id: i64,
    /// Owning sequence.
    pub sequence_id: i64,
    /// Unique-within-sequence, gap-tolerant ordinal.
    pub message_number: i64,
    /// HTML body, at most 4096 characters.
    pub message_text: String,
    /// Delay from subscriber activation, in hours (0 ≤ x ≤ 8760).
    pub delay_hours: f64,
    /// Telegram `file_id` of attached media, if any.
    pub media_file_id: Option<String>,
    /// Kind of attached media.
    pub media_type: MediaType,
    /// Telegram `file_unique_id`, for dedup/cache purposes.
    pub media_file_unique_id: Option<String>,
    /// Size of the attached media in bytes.
    pub media_file_size: Option<i64>,
    /// Original filename of attached media, if a document.
    pub media_filename: Option<String>,
    /// Whether this step currently participates in materialisation.
    pub is_active: bool,
    /// UTM campaign tag carried in rendered links.
    pub utm_campaign: Option<String>,
    /// UTM content tag carried in rendered links.
    pub utm_content: Option<String>,
}

/// Terminal/non-terminal state of a materialised funnel delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledMessageStatus {
    /// Awaiting its due time.
    Pending,
    /// Delivered successfully. Terminal.
    Sent,
    /// Delivery failed for the named reason. Terminal.
    Failed,
    /// Its template was deleted before it could send. Terminal.
    Cancelled,
}

impl std::fmt::Display for ScheduledMessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ScheduledMessageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(anyhow::anyhow!("unknown scheduled_message status: {other}")),
        }
    }
}

/// A materialised per-subscriber funnel delivery row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMessage {
    /// Primary key.
    pub id: i64,
    /// Owning bot.
    pub bot_id: String,
    /// Recipient subscriber's Telegram user id.
    pub subscriber_id: i64,
    /// The funnel step template this row was materialised from.
    pub message_id: i64,
    /// Absolute due time.
    pub scheduled_at: DateTime<Utc>,
    /// Current state.
    pub status: ScheduledMessageStatus,
    /// Reason for a `failed` state, if applicable.
    pub error_message: Option<String>,
}

/// How a [`MassBroadcast`] is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastKind {
    /// Sent immediately on admin action.
    Instant,
    /// Sent once `scheduled_at` is reached.
    Scheduled,
}

impl std::fmt::Display for BroadcastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Instant => "instant",
            Self::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BroadcastKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(Self::Instant),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(anyhow::anyhow!("unknown broadcast_type: {other}")),
        }
    }
}

/// Lifecycle state of a [`MassBroadcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastStatus {
    /// Being edited by the admin; not yet dispatched.
    Draft,
    /// Will transition to `sending` when `scheduled_at` is reached.
    Scheduled,
    /// Deliveries are materialised and being dispatched.
    Sending,
    /// No `pending` deliveries remain.
    Completed,
    /// Cancelled by an admin before completion.
    Cancelled,
    /// Hit an unrecoverable error.
    Failed,
}

impl std::fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BroadcastStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "sending" => Ok(Self::Sending),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(anyhow::anyhow!("unknown broadcast status: {other}")),
        }
    }
}

/// An admin-created blast.
#[derive(Debug, Clone, PartialEq)]
pub struct MassBroadcast {
    /// Primary key.
    pub id: i64,
    /// Owning bot.
    pub bot_id: String,
    /// Admin who created it.
    pub created_by: i64,
    /// Short admin-facing title.
    pub title: String,
    /// HTML body.
    pub message_text: String,
    /// Attached media `file_id`, if any.
    pub media_file_id: Option<String>,
    /// Kind of attached media.
    pub media_type: MediaType,
    /// Single inline button label, if any.
    pub button_text: Option<String>,
    /// Single inline button URL, if any.
    pub button_url: Option<String>,
    /// Instant or scheduled.
    pub broadcast_type: BroadcastKind,
    /// Required iff `broadcast_type = scheduled`.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: BroadcastStatus,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Status of a per-recipient [`BroadcastDelivery`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Awaiting dispatch.
    Pending,
    /// Delivered successfully.
    Sent,
    /// Recipient blocked the bot.
    Blocked,
    /// Delivery failed for another reason.
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "blocked" => Ok(Self::Blocked),
            "failed" => Ok(Self::Failed),
            other => Err(anyhow::anyhow!("unknown delivery status: {other}")),
        }
    }
}

/// Per-recipient row for a mass broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastDelivery {
    /// Primary key.
    pub id: i64,
    /// Owning broadcast.
    pub broadcast_id: i64,
    /// Recipient chat id.
    pub user_id: i64,
    /// Current state.
    pub status: DeliveryStatus,
    /// Telegram message id of the sent message, if any.
    pub telegram_message_id: Option<i64>,
    /// Failure reason, if `status = failed`.
    pub error_message: Option<String>,
    /// When this row was last attempted.
    pub attempted_at: Option<DateTime<Utc>>,
}

/// A conversation handle into an external LLM's stored thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Owning bot.
    pub bot_id: String,
    /// The end-user this thread belongs to.
    pub user_id: i64,
    /// Opaque provider-side handle to continue the thread.
    pub response_id: Option<String>,
    /// Last time this row was touched.
    pub updated_at: DateTime<Utc>,
}

/// What a referral commission was earned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferralTransactionType {
    /// Commission on a subscription payment.
    Subscription,
    /// Commission on a token top-up payment.
    Tokens,
}

impl std::fmt::Display for ReferralTransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Subscription => "subscription",
            Self::Tokens => "tokens",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ReferralTransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(Self::Subscription),
            "tokens" => Ok(Self::Tokens),
            other => Err(anyhow::anyhow!("unknown referral transaction type: {other}")),
        }
    }
}

/// A commission event credited to a referrer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralTransaction {
    /// Primary key.
    pub id: i64,
    /// The user who receives the commission.
    pub referrer_user_id: i64,
    /// The user whose payment generated the commission.
    pub referred_user_id: i64,
    /// What kind of payment this commission is on.
    pub transaction_type: ReferralTransactionType,
    /// The underlying payment amount, 2-dp decimal as text.
    pub payment_amount: String,
    /// 15% of `payment_amount`, 2-dp decimal as text.
    pub commission_amount: String,
    /// Whether the commission has been credited.
    pub status: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}
