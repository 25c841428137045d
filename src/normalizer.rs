use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("payload has neither 'message' nor 'callback_query'")]
    UnsupportedUpdate,
    #[error("update carries no sender name")]
    MissingName,
    #[error("malformed telegram update: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Provider-independent view of one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedInbound {
    pub external_sender_id: String,
    pub chat_native_id: i64,
    pub display_name: String,
    pub text: String,
    pub is_callback: bool,
    pub callback_token: Option<String>,
    /// Message the event refers to: the user's message, or for callbacks the
    /// bot message carrying the pressed button.
    pub message_native_id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    from: TelegramUser,
    chat: TelegramChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramCallbackQuery {
    from: TelegramUser,
    message: TelegramMessage,
    #[serde(default)]
    data: Option<String>,
}

// chat name first, then the sender's own first name
fn display_name(chat: &TelegramChat, from: &TelegramUser) -> Result<String, NormalizeError> {
    [chat.first_name.as_deref(), from.first_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or(NormalizeError::MissingName)
}

/// Turns a Telegram update into a [`NormalizedInbound`]. A callback query
/// takes precedence over a plain message.
pub fn normalize(payload: &Value) -> Result<NormalizedInbound, NormalizeError> {
    let update = TelegramUpdate::deserialize(payload)?;

    if let Some(callback) = update.callback_query {
        let user_id = callback.from.id;
        return Ok(NormalizedInbound {
            external_sender_id: user_id.to_string(),
            chat_native_id: user_id,
            display_name: display_name(&callback.message.chat, &callback.from)?,
            text: callback.message.text.unwrap_or_default(),
            is_callback: true,
            callback_token: Some(callback.data.unwrap_or_default()),
            message_native_id: callback.message.message_id,
        });
    }

    let Some(message) = update.message else {
        return Err(NormalizeError::UnsupportedUpdate);
    };
    let user_id = message.from.id;
    Ok(NormalizedInbound {
        external_sender_id: user_id.to_string(),
        chat_native_id: user_id,
        display_name: display_name(&message.chat, &message.from)?,
        text: message.text.unwrap_or_default(),
        is_callback: false,
        callback_token: None,
        message_native_id: message.message_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain(text: &str) -> Value {
        json!({
            "update_id": 1,
            "message": {
                "message_id": 11,
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "language_code": "pt"},
                "chat": {"id": 42, "first_name": "Ana", "type": "private"},
                "date": 0,
                "text": text
            }
        })
    }

    fn callback(data: &str) -> Value {
        json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "language_code": "pt"},
                "message": {
                    "message_id": 12,
                    "from": {"id": 999, "is_bot": true, "first_name": "SupportBot"},
                    "chat": {"id": 42, "first_name": "Ana", "type": "private"},
                    "date": 0,
                    "text": "Welcome"
                },
                "data": data
            }
        })
    }

    #[test]
    fn plain_message_fields() {
        let inbound = normalize(&plain("start")).unwrap();
        assert_eq!(inbound.chat_native_id, 42);
        assert_eq!(inbound.external_sender_id, "42");
        assert_eq!(inbound.display_name, "Ana");
        assert_eq!(inbound.text, "start");
        assert_eq!(inbound.message_native_id, 11);
        assert!(!inbound.is_callback);
        assert_eq!(inbound.callback_token, None);
    }

    #[test]
    fn callback_fields_come_from_the_user_not_the_bot() {
        let inbound = normalize(&callback("use_weni")).unwrap();
        assert!(inbound.is_callback);
        assert_eq!(inbound.callback_token.as_deref(), Some("use_weni"));
        assert_eq!(inbound.chat_native_id, 42);
        assert_eq!(inbound.display_name, "Ana");
        assert_eq!(inbound.message_native_id, 12);
    }

    #[test]
    fn plain_then_callback_share_chat_id() {
        let first = normalize(&plain("start")).unwrap();
        let second = normalize(&callback("dont_use_weni")).unwrap();
        assert_eq!(first.chat_native_id, second.chat_native_id);
        assert_eq!(first.external_sender_id, second.external_sender_id);
    }

    #[test]
    fn missing_chat_name_falls_back_to_sender() {
        let mut payload = plain("start");
        payload["message"]["chat"]["first_name"] = json!(null);
        assert_eq!(normalize(&payload).unwrap().display_name, "Ana");

        let mut payload = callback("use_weni");
        payload["callback_query"]["message"]["chat"]["first_name"] = json!("  ");
        assert_eq!(normalize(&payload).unwrap().display_name, "Ana");
    }

    #[test]
    fn update_without_any_name_fails() {
        let mut payload = plain("start");
        payload["message"]["chat"]["first_name"] = json!(null);
        payload["message"]["from"]["first_name"] = json!("");
        assert!(matches!(
            normalize(&payload),
            Err(NormalizeError::MissingName)
        ));
    }

    #[test]
    fn update_without_message_or_callback_fails() {
        let err = normalize(&json!({"update_id": 3, "edited_message": {}})).unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedUpdate));
    }

    #[test]
    fn wrong_field_type_fails() {
        let mut payload = plain("start");
        payload["message"]["from"]["id"] = json!("forty-two");
        assert!(matches!(
            normalize(&payload),
            Err(NormalizeError::Malformed(_))
        ));
    }
}
