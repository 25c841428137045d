use serde_json::Value;

use crate::types::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Telegram,
    Discord,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::Telegram => "telegram",
            Provider::Discord => "discord",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "telegram" => Some(Provider::Telegram),
            "discord" => Some(Provider::Discord),
            _ => None,
        }
    }

    pub fn service(self) -> Service {
        match self {
            Provider::Telegram => Service::Telegram,
            Provider::Discord => Service::Discord,
        }
    }
}

type Matcher = fn(&Value) -> bool;

// first match wins
const PROVIDER_CHECKS: [(Provider, Matcher); 2] = [
    (Provider::Telegram, is_telegram_update),
    (Provider::Discord, is_discord_event),
];

const TELEGRAM_MESSAGE_KEYS: [&str; 5] = ["message_id", "from", "chat", "date", "text"];
const TELEGRAM_FROM_KEYS: [&str; 4] = ["id", "is_bot", "first_name", "language_code"];
const TELEGRAM_CHAT_KEYS: [&str; 3] = ["id", "first_name", "type"];
const TELEGRAM_CALLBACK_KEYS: [&str; 4] = ["id", "from", "message", "data"];

/// Classifies a raw webhook body. Never fails: anything that is not valid
/// JSON or does not have the shape of a known provider yields `None`.
pub fn identify_provider(raw_body: &[u8]) -> Option<Provider> {
    let payload = serde_json::from_slice::<Value>(raw_body).ok()?;
    PROVIDER_CHECKS
        .iter()
        .find(|(_, matches)| matches(&payload))
        .map(|(provider, _)| *provider)
}

fn has_keys(value: &Value, keys: &[&str]) -> bool {
    value
        .as_object()
        .is_some_and(|obj| keys.iter().all(|key| obj.contains_key(*key)))
}

fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

fn is_telegram_message(message: &Value) -> bool {
    has_keys(message, &TELEGRAM_MESSAGE_KEYS)
        && has_keys(field(message, "from"), &TELEGRAM_FROM_KEYS)
        && has_keys(field(message, "chat"), &TELEGRAM_CHAT_KEYS)
}

fn is_telegram_update(payload: &Value) -> bool {
    if !has_keys(payload, &["update_id"]) {
        return false;
    }
    if let Some(callback) = payload.get("callback_query") {
        // the inner message is the bot's own, so only its chat is checked
        return has_keys(callback, &TELEGRAM_CALLBACK_KEYS)
            && has_keys(field(callback, "from"), &TELEGRAM_FROM_KEYS)
            && has_keys(field(callback, "message"), &TELEGRAM_MESSAGE_KEYS)
            && has_keys(field(field(callback, "message"), "chat"), &TELEGRAM_CHAT_KEYS);
    }
    payload.get("message").is_some_and(is_telegram_message)
}

// Discord payloads are not accepted yet.
fn is_discord_event(_payload: &Value) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain_update() -> Value {
        json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "language_code": "pt"},
                "chat": {"id": 42, "first_name": "Ana", "type": "private"},
                "date": 0,
                "text": "start"
            }
        })
    }

    fn callback_update() -> Value {
        json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "language_code": "pt"},
                "message": {
                    "message_id": 7,
                    "from": {"id": 1, "is_bot": true, "first_name": "Bot"},
                    "chat": {"id": 42, "first_name": "Ana", "type": "private"},
                    "date": 0,
                    "text": "Welcome"
                },
                "data": "use_weni"
            }
        })
    }

    fn identify(value: &Value) -> Option<Provider> {
        identify_provider(value.to_string().as_bytes())
    }

    #[test]
    fn accepts_both_telegram_shapes() {
        assert_eq!(identify(&plain_update()), Some(Provider::Telegram));
        assert_eq!(identify(&callback_update()), Some(Provider::Telegram));
    }

    #[test]
    fn malformed_json_is_unknown() {
        assert_eq!(identify_provider(b"{not json"), None);
        assert_eq!(identify_provider(b""), None);
        assert_eq!(identify_provider(b"[1, 2, 3]"), None);
        assert_eq!(identify_provider(b"\"update_id\""), None);
    }

    #[test]
    fn any_missing_key_is_unknown() {
        let cases: [&[&str]; 6] = [
            &["update_id"],
            &["message", "text"],
            &["message", "from", "language_code"],
            &["message", "chat", "type"],
            &["message", "chat"],
            &["message"],
        ];
        for path in cases {
            let mut payload = plain_update();
            let (last, parents) = path.split_last().unwrap();
            let mut target = &mut payload;
            for key in parents {
                target = target.get_mut(*key).unwrap();
            }
            target.as_object_mut().unwrap().remove(*last);
            assert_eq!(identify(&payload), None, "missing {path:?}");
        }
    }

    #[test]
    fn callback_without_data_is_unknown() {
        let mut payload = callback_update();
        payload["callback_query"]
            .as_object_mut()
            .unwrap()
            .remove("data");
        assert_eq!(identify(&payload), None);
    }

    #[test]
    fn checks_presence_not_types() {
        let mut payload = plain_update();
        payload["message"]["text"] = json!(null);
        payload["message"]["from"]["id"] = json!("not-a-number");
        assert_eq!(identify(&payload), Some(Provider::Telegram));
    }

    #[test]
    fn provider_names_round_trip() {
        assert_eq!(Provider::from_name("Telegram"), Some(Provider::Telegram));
        assert_eq!(Provider::from_name("whatsapp"), None);
        assert_eq!(Provider::Telegram.service().code(), "0");
    }
}
