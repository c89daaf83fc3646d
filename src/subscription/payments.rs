//! Payment intake: signature verification and intent decoding. The HTTP
//! handler itself lives in [`crate::webhook`]; this module holds the pure,
//! independently-testable logic.

use md5::{Digest, Md5};

use crate::error::PaymentError;

/// The two ways a payment can be spent, decoded from the `Shp_user_id`
/// suffix convention (`...tokens` means a token purchase, anything else
/// a subscription payment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentIntent {
    /// Extend the payer's paid subscription.
    Subscription,
    /// Top up a specific bot's token budget.
    Tokens,
}

/// A verified, decoded Robokassa payment notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    /// Robokassa invoice id, echoed back in the `OK{InvId}` response.
    pub inv_id: String,
    /// Payment amount as Robokassa reported it (2-dp decimal string).
    pub out_sum: String,
    /// The Telegram user id the payment is attributed to.
    pub user_id: i64,
    /// What the payment should be applied to.
    pub intent: PaymentIntent,
}

/// Compute `MD5("{out_sum}:{inv_id}:{password2}:Shp_user_id={shp_user_id}")`
/// upper-cased hex, exactly the format Robokassa's server-side check uses.
#[must_use]
pub fn compute_signature(out_sum: &str, inv_id: &str, password2: &str, shp_user_id: &str) -> String {
    let payload = format!("{out_sum}:{inv_id}:{password2}:Shp_user_id={shp_user_id}");
    let digest = Md5::digest(payload.as_bytes());
    hex::encode_upper(digest)
}

/// Verify and decode an inbound Robokassa notification.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidSignature`] if the signature does not
/// match, [`PaymentError::Malformed`] if `Shp_user_id` is not a valid
/// Telegram user id.
pub fn verify_and_decode(
    out_sum: &str,
    inv_id: &str,
    signature_value: &str,
    shp_user_id: &str,
    password2: &str,
) -> Result<VerifiedPayment, PaymentError> {
    let expected = compute_signature(out_sum, inv_id, password2, shp_user_id);
    if !expected.eq_ignore_ascii_case(signature_value) {
        return Err(PaymentError::InvalidSignature);
    }

    let intent = if shp_user_id.ends_with("tokens") {
        PaymentIntent::Tokens
    } else {
        PaymentIntent::Subscription
    };

    let numeric_part = shp_user_id.strip_suffix("tokens").unwrap_or(shp_user_id);
    let user_id: i64 = numeric_part
        .parse()
        .map_err(|_| PaymentError::Malformed(format!("bad Shp_user_id: {shp_user_id}")))?;

    Ok(VerifiedPayment {
        inv_id: inv_id.to_owned(),
        out_sum: out_sum.to_owned(),
        user_id,
        intent,
    })
}

/// Build a Robokassa payment URL for `user_id`, with `Shp_user_id` carrying
/// the `tokens` suffix convention [`verify_and_decode`] recognizes when
/// `for_tokens` is set. The outbound signature is
/// `MerchantLogin:OutSum:InvId:password1:Shp_user_id=X`, a different field
/// set from the inbound verification signature in [`verify_and_decode`]
/// (which has no `MerchantLogin` and uses `password2`).
#[must_use]
pub fn build_payment_url(
    merchant_login: &str,
    password1: &str,
    amount: &str,
    user_id: i64,
    for_tokens: bool,
    is_test: bool,
    inv_id: i64,
) -> String {
    let shp_user_id = if for_tokens {
        format!("{user_id}tokens")
    } else {
        user_id.to_string()
    };

    let signature_payload = format!("{merchant_login}:{amount}:{inv_id}:{password1}:Shp_user_id={shp_user_id}");
    let signature = hex::encode_upper(Md5::digest(signature_payload.as_bytes()));

    let mut url = format!(
        "https://auth.robokassa.ru/Merchant/Index.aspx?MerchantLogin={merchant_login}\
         &OutSum={amount}&InvId={inv_id}&Shp_user_id={shp_user_id}&SignatureValue={signature}"
    );
    if is_test {
        url.push_str("&IsTest=1");
    }
    url
}

/// Compute a commission on `payment_amount` at `commission_pct`, 2-dp
/// rounded, as a decimal string.
#[must_use]
pub fn commission_amount(payment_amount: &str, commission_pct: f64) -> Option<String> {
    let amount: f64 = payment_amount.parse().ok()?;
    let commission = amount * (commission_pct / 100.0);
    Some(format!("{commission:.2}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        let sig = compute_signature("349.00", "1700000000", "secret2", "12345");
        assert_eq!(sig.len(), 32);
        assert_eq!(sig, sig.to_uppercase());
    }

    #[test]
    fn valid_signature_decodes_subscription_intent() {
        let sig = compute_signature("349.00", "1700000000", "secret2", "12345");
        let verified =
            verify_and_decode("349.00", "1700000000", &sig, "12345", "secret2").unwrap();
        assert_eq!(verified.user_id, 12345);
        assert_eq!(verified.intent, PaymentIntent::Subscription);
        assert_eq!(verified.inv_id, "1700000000");
    }

    #[test]
    fn tokens_suffix_decodes_token_intent() {
        let sig = compute_signature("99.00", "42", "secret2", "777tokens");
        let verified = verify_and_decode("99.00", "42", &sig, "777tokens", "secret2").unwrap();
        assert_eq!(verified.user_id, 777);
        assert_eq!(verified.intent, PaymentIntent::Tokens);
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let result = verify_and_decode("349.00", "1700000000", "deadbeef", "12345", "secret2");
        assert_eq!(result, Err(PaymentError::InvalidSignature));
    }

    #[test]
    fn commission_is_percentage_of_payment() {
        assert_eq!(commission_amount("349.00", 15.0).as_deref(), Some("52.35"));
    }

    #[test]
    fn payment_url_tags_tokens_purchases() {
        let url = build_payment_url("shop", "pw1", "99.00", 555, true, false, 42);
        assert!(url.contains("Shp_user_id=555tokens"));
        assert!(!url.contains("IsTest"));
    }

    #[test]
    fn payment_url_adds_test_flag() {
        let url = build_payment_url("shop", "pw1", "349.00", 555, false, true, 42);
        assert!(url.contains("Shp_user_id=555"));
        assert!(!url.contains("555tokens"));
        assert!(url.ends_with("&IsTest=1"));
    }

    #[test]
    fn signature_is_case_insensitive_on_input() {
        let sig = compute_signature("10.00", "1", "pw", "5");
        let verified = verify_and_decode("10.00", "1", &sig.to_lowercase(), "5", "pw");
        assert!(verified.is_ok());
    }
}
