//! Structured error types shared across components.
//!
//! Ad-hoc failures (config loading, startup, I/O) use [`anyhow::Error`] with
//! `.context(...)`. Errors a caller branches on get a `thiserror` enum here.

use thiserror::Error;

/// Errors raised while deciding whether a user may use a gated feature.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The user's trial or subscription has lapsed.
    #[error("subscription expired")]
    Expired,
    /// The user's trial period ran out without converting to paid.
    #[error("trial expired")]
    TrialExpired,
    /// The user never started a trial or subscription.
    #[error("no active subscription")]
    Free,
}

/// Errors raised while debiting or checking a bot's token budget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetError {
    /// The bot's token budget has been exhausted.
    #[error("token budget exhausted")]
    Exhausted,
}

/// Errors surfaced by the payment webhook handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The MD5 signature did not match the computed value.
    #[error("invalid payment signature")]
    InvalidSignature,
    /// A required form field was missing or malformed.
    #[error("malformed payment payload: {0}")]
    Malformed(String),
    /// The recipient user referenced by the payment does not exist.
    #[error("unknown payment recipient")]
    UnknownRecipient,
}
