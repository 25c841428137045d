use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{channel::BotRegistry, store::ConversationStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Service {
    Telegram,
    Discord,
}

impl Service {
    pub fn code(self) -> &'static str {
        match self {
            Service::Telegram => "0",
            Service::Discord => "1",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Service::Telegram),
            "1" => Some(Service::Discord),
            _ => None,
        }
    }
}

impl TryFrom<String> for Service {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Service::from_code(&value).ok_or_else(|| format!("unknown service code '{value}'"))
    }
}

impl From<Service> for String {
    fn from(value: Service) -> Self {
        value.code().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum SenderType {
    User,
    Bot,
    SupportAgent,
}

impl SenderType {
    pub fn code(self) -> i16 {
        match self {
            SenderType::User => 1,
            SenderType::Bot => 2,
            SenderType::SupportAgent => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SenderType::User => "User",
            SenderType::Bot => "Bot",
            SenderType::SupportAgent => "Support Agent",
        }
    }
}

impl TryFrom<i16> for SenderType {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SenderType::User),
            2 => Ok(SenderType::Bot),
            3 => Ok(SenderType::SupportAgent),
            other => Err(format!("unknown sender type {other}")),
        }
    }
}

impl From<SenderType> for i16 {
    fn from(value: SenderType) -> Self {
        value.code()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub telephone: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub chat_native_id: Option<String>,
    pub support_agent_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub closing_time: Option<DateTime<Utc>>,
    pub service: Service,
}

impl Chat {
    pub fn is_open(&self) -> bool {
        self.closing_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_type: SenderType,
    pub sender_type_display: &'static str,
    pub message_content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Stored agent row. `password` always holds a bcrypt hash.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportAgent {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportAgentProfile {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl From<&SupportAgent> for SupportAgentProfile {
    fn from(agent: &SupportAgent) -> Self {
        SupportAgentProfile {
            id: agent.id,
            first_name: agent.first_name.clone(),
            last_name: agent.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewContact {
    pub name: String,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub telephone: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub telephone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub sender_type: SenderType,
    pub message_content: String,
}

#[derive(Debug, Clone)]
pub struct NewSupportAgent {
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct SupportAgentPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: Option<String>,
}

/// Everything the store needs to record one inbound provider event.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub service: Service,
    pub external_sender_id: String,
    pub chat_native_id: String,
    pub display_name: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub contact: Contact,
    pub chat: Chat,
    pub message: Option<Message>,
}

pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub bots: BotRegistry,
    pub page_size: usize,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateContactBody {
    pub name: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub telephone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchContactBody {
    pub name: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub telephone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageBody {
    pub chat_id: i64,
    pub sender_type: Option<i16>,
    pub message_content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchMessageBody {
    pub message_content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSupportAgentBody {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchSupportAgentBody {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchChatBody {
    /// Absent leaves the assignment alone; `null` unassigns.
    #[serde(default, deserialize_with = "present_or_null")]
    pub support_agent_id: Option<Option<i64>>,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct AnswerMessageBody {
    pub bot_name: String,
    pub support_agent: i64,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}
