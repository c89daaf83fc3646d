//! teleforge — multi-tenant Telegram bot hosting platform: a Fleet
//! Supervisor running one dispatcher per tenant bot, a funnel scheduler,
//! mass broadcasts, subscription/token gating, and an AI reply bridge,
//! all behind one platform-owned Master Bot.

pub mod ai;
pub mod broadcast;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fleet;
pub mod funnel;
pub mod logging;
pub mod master_bot;
pub mod store;
pub mod subscription;
pub mod telegram;
pub mod webhook;
