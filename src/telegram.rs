use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::channel::{ChannelError, OutboundReply, ReplyChannel};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

pub struct TelegramBot {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramBot {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call(&self, method: &str, payload: &Value) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&raw_body).unwrap_or(Value::Null);
        let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if status.is_success() && ok {
            return Ok(());
        }

        let description = body
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(raw_body);
        warn!(method, status = status.as_u16(), %description, "telegram rejected call");
        Err(ChannelError::Rejected {
            status: status.as_u16(),
            description,
        })
    }
}

fn inline_keyboard(reply: &OutboundReply) -> Option<Value> {
    if reply.keyboard.is_empty() {
        return None;
    }
    let rows = reply
        .keyboard
        .iter()
        .map(|button| json!([{ "text": button.label, "callback_data": button.token }]))
        .collect::<Vec<_>>();
    Some(json!({ "inline_keyboard": rows }))
}

pub fn send_message_payload(chat_id: i64, reply: &OutboundReply) -> Value {
    let mut payload = json!({
        "chat_id": chat_id,
        "text": reply.text,
    });
    if let Some(markup) = inline_keyboard(reply) {
        payload["reply_markup"] = markup;
    }
    payload
}

pub fn edit_message_payload(chat_id: i64, message_id: i64, reply: &OutboundReply) -> Value {
    let mut payload = send_message_payload(chat_id, reply);
    payload["message_id"] = json!(message_id);
    payload
}

#[async_trait]
impl ReplyChannel for TelegramBot {
    async fn send(&self, chat_id: i64, reply: &OutboundReply) -> Result<(), ChannelError> {
        self.call("sendMessage", &send_message_payload(chat_id, reply))
            .await
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        reply: &OutboundReply,
    ) -> Result<(), ChannelError> {
        self.call(
            "editMessageText",
            &edit_message_payload(chat_id, message_id, reply),
        )
        .await
    }
}
