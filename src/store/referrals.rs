//! Queries against the `referral_transactions` table.

use anyhow::Context;
use chrono::Utc;

use super::models::{ReferralTransaction, ReferralTransactionType};
use super::{fmt_dt, parse_dt, Store};

impl Store {
    /// Post a referral commission for `source_payment_ref`, a caller-chosen
    /// key unique to the originating payment (e.g. the Robokassa `InvId`).
    /// The `UNIQUE` constraint on that column makes this idempotent: a
    /// replayed webhook for the same payment posts at most one
    /// transaction.
    ///
    /// Returns `Ok(true)` if a new row was posted, `Ok(false)` if one
    /// already existed for this payment.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails for a reason other than the
    /// uniqueness guard.
    pub async fn post_referral_transaction(
        &self,
        referrer_user_id: i64,
        referred_user_id: i64,
        transaction_type: ReferralTransactionType,
        payment_amount: &str,
        commission_amount: &str,
        source_payment_ref: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO referral_transactions \
             (referrer_user_id, referred_user_id, transaction_type, payment_amount, \
              commission_amount, status, source_payment_ref, created_at) \
             VALUES (?, ?, ?, ?, ?, 'paid', ?, ?)",
        )
        .bind(referrer_user_id)
        .bind(referred_user_id)
        .bind(transaction_type.to_string())
        .bind(payment_amount)
        .bind(commission_amount)
        .bind(source_payment_ref)
        .bind(fmt_dt(Utc::now()))
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(err) => Err(err).context("failed to post referral transaction"),
        }
    }

    /// List commission history for a referrer, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_referral_history(
        &self,
        referrer_user_id: i64,
    ) -> anyhow::Result<Vec<ReferralTransaction>> {
        let rows: Vec<(i64, i64, i64, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, referrer_user_id, referred_user_id, transaction_type, payment_amount, \
             commission_amount, status, created_at FROM referral_transactions \
             WHERE referrer_user_id = ? ORDER BY created_at DESC",
        )
        .bind(referrer_user_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list referral history")?;

        rows.into_iter()
            .map(
                |(
                    id,
                    referrer_user_id,
                    referred_user_id,
                    transaction_type,
                    payment_amount,
                    commission_amount,
                    status,
                    created_at,
                )| {
                    Ok(ReferralTransaction {
                        id,
                        referrer_user_id,
                        referred_user_id,
                        transaction_type: transaction_type.parse()?,
                        payment_amount,
                        commission_amount,
                        status,
                        created_at: parse_dt(&created_at)?,
                    })
                },
            )
            .collect()
    }
}
