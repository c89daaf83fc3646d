//! Template substitution shared by the Funnel and Mass-Broadcast
//! dispatchers: `{first_name}`, `{username}`,
//! `{user_id}`, `{mention}`, `{full_name}`.

use crate::store::models::Subscriber;

/// Replace the five recognized placeholders in `template` with values
/// drawn from `subscriber`. Unmatched braces are left verbatim — the
/// admin's own `{}` literal text is not escaped away.
#[must_use]
pub fn render_template(template: &str, subscriber: &Subscriber) -> String {
    let first_name = subscriber.first_name.clone().unwrap_or_default();
    let username = subscriber
        .username
        .as_ref()
        .map(|u| format!("@{u}"))
        .unwrap_or_default();
    let full_name = match (&subscriber.first_name, &subscriber.last_name) {
        (Some(first), Some(last)) => format!("{first} {last}"),
        (Some(first), None) => first.clone(),
        (None, Some(last)) => last.clone(),
        (None, None) => String::new(),
    };
    let mention = format!(
        "<a href=\"tg://user?id={}\">{}</a>",
        subscriber.user_id,
        crate::telegram::ui::escape_html(&first_name),
    );

    template
        .replace("{first_name}", &first_name)
        .replace("{username}", &username)
        .replace("{user_id}", &subscriber.user_id.to_string())
        .replace("{mention}", &mention)
        .replace("{full_name}", &full_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(first: Option<&str>, username: Option<&str>, last: Option<&str>) -> Subscriber {
        Subscriber {
            bot_id: "bot-1".to_owned(),
            user_id: 42,
            chat_id: 42,
            first_name: first.map(str::to_owned),
            username: username.map(str::to_owned),
            last_name: last.map(str::to_owned),
            funnel_started_at: None,
            last_broadcast_message: None,
            funnel_enabled: true,
            is_active: true,
        }
    }

    #[test]
    fn substitutes_all_known_placeholders() {
        let sub = subscriber(Some("Ada"), Some("ada_l"), Some("Lovelace"));
        let rendered = render_template(
            "Hi {first_name} (@{username} / {user_id}), full: {full_name}, {mention}",
            &sub,
        );
        assert!(rendered.contains("Hi Ada"));
        assert!(rendered.contains("@ada_l"));
        assert!(rendered.contains("42"));
        assert!(rendered.contains("full: Ada Lovelace"));
        assert!(rendered.contains("tg://user?id=42"));
    }

    #[test]
    fn missing_fields_render_as_empty() {
        let sub = subscriber(None, None, None);
        let rendered = render_template("[{first_name}][{username}]", &sub);
        assert_eq!(rendered, "[][]");
    }

    #[test]
    fn leaves_unrelated_braces_untouched() {
        let sub = subscriber(Some("Ada"), None, None);
        let rendered = render_template("code: {not_a_placeholder}", &sub);
        assert_eq!(rendered, "code: {not_a_placeholder}");
    }
}
