//! Inbound HTTP server for the payment gateway webhook, built on the same
//! axum-based inbound HTTP surface `opencrabs` uses for its own webhooks.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::store::models::ReferralTransactionType;
use crate::store::Store;
use crate::subscription::payments::{commission_amount, verify_and_decode, PaymentIntent};
use crate::telegram::TgTransport;

/// Collaborators the webhook handler needs: the store, the Robokassa
/// shared secret, subscription/commission knobs, and a way to notify the
/// payer and, on success, the referrer.
pub struct WebhookState {
    /// Shared persistence.
    pub store: Store,
    /// `ROBOKASSA_PASSWORD2`, used only for signature verification.
    pub password2: String,
    /// Days added per subscription payment.
    pub subscription_days_per_payment: i64,
    /// Tokens added per token-purchase payment.
    pub tokens_per_purchase: i64,
    /// Referral commission percentage.
    pub referral_commission_pct: f64,
    /// The master bot, used to deliver confirmation/notification messages.
    pub master_bot: TgTransport,
}

/// Build the webhook router. Mounted at `/webhook/robokassa`.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook/robokassa", post(handle_robokassa))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct RobokassaForm {
    #[serde(rename = "OutSum")]
    out_sum: String,
    #[serde(rename = "InvId")]
    inv_id: String,
    #[serde(rename = "SignatureValue")]
    signature_value: String,
    #[serde(rename = "Shp_user_id")]
    shp_user_id: String,
}

async fn handle_robokassa(
    State(state): State<Arc<WebhookState>>,
    Form(form): Form<RobokassaForm>,
) -> Response {
    let verified = match verify_and_decode(
        &form.out_sum,
        &form.inv_id,
        &form.signature_value,
        &form.shp_user_id,
        &state.password2,
    ) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "rejected payment webhook: invalid signature or payload");
            return (StatusCode::BAD_REQUEST, "bad signature").into_response();
        }
    };

    match apply_payment(&state, &verified).await {
        Ok(()) => (StatusCode::OK, format!("OK{}", verified.inv_id)).into_response(),
        Err(err) => {
            error!(error = %err, inv_id = %verified.inv_id, "failed to apply verified payment");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

async fn apply_payment(
    state: &WebhookState,
    payment: &crate::subscription::payments::VerifiedPayment,
) -> anyhow::Result<()> {
    let Some(user) = state.store.get_user(payment.user_id).await? else {
        anyhow::bail!("payment references unknown user {}", payment.user_id);
    };

    match payment.intent {
        PaymentIntent::Subscription => {
            let new_expiry = state
                .store
                .extend_subscription(
                    payment.user_id,
                    state.subscription_days_per_payment,
                    chrono::Utc::now(),
                )
                .await?;
            info!(user_id = payment.user_id, %new_expiry, "subscription extended");
        }
        PaymentIntent::Tokens => {
            // Shp_user_id encodes the payer, but token purchases are
            // always made from inside a specific bot's settings screen;
            // in this deployment the payer and the bot owner are the same
            // party and we top up every bot they own, mirroring the
            // original's "apply to the bot the purchase flow was started
            // from" behavior collapsed to "apply to all owned bots" since
            // the webhook has no bot_id parameter of its own.
            for bot in state.store.list_bots_for_owner(payment.user_id).await? {
                state
                    .store
                    .add_token_budget(&bot.bot_id, state.tokens_per_purchase)
                    .await?;
            }
        }
    }

    if let Some(referrer_id) = user.referred_by {
        if let Some(commission) = commission_amount(&payment.out_sum, state.referral_commission_pct) {
            let transaction_type = match payment.intent {
                PaymentIntent::Subscription => ReferralTransactionType::Subscription,
                PaymentIntent::Tokens => ReferralTransactionType::Tokens,
            };

            // Referral posting failure must not roll back the payment
            // effect already committed above.
            let posted = state
                .store
                .post_referral_transaction(
                    referrer_id,
                    payment.user_id,
                    transaction_type,
                    &payment.out_sum,
                    &commission,
                    &payment.inv_id,
                )
                .await;

            match posted {
                Ok(true) => {
                    if let Err(err) = state.store.credit_referral_earnings(referrer_id, &commission).await {
                        warn!(error = %err, referrer_id, "failed to credit referral earnings");
                    }
                    if let Some(referrer) = state.store.get_user(referrer_id).await.ok().flatten() {
                        let notice = crate::telegram::Outbound {
                            chat_id: referrer.admin_chat_id,
                            text: format!(
                                "You earned a {commission} referral commission from a payment by one of your referrals."
                            ),
                            media: None,
                            keyboard: None,
                        };
                        let _ = state.master_bot.send(&notice).await;
                    }
                }
                Ok(false) => {
                    info!(inv_id = %payment.inv_id, "referral transaction already posted for this payment");
                }
                Err(err) => warn!(error = %err, "failed to post referral transaction"),
            }
        }
    }

    let confirmation = crate::telegram::Outbound {
        chat_id: user.admin_chat_id,
        text: "Payment received, thank you!".to_owned(),
        media: None,
        keyboard: None,
    };
    let _ = state.master_bot.send(&confirmation).await;

    Ok(())
}
