//! Persistence for contacts, chats, messages and support agents.
//!
//! [`ConversationStore`] is implemented by [`PgStore`] (sqlx/Postgres) and
//! [`MemoryStore`] (process memory, used for local runs and tests).

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    Chat, Contact, ContactPatch, Conversation, InboundRecord, Message, NewContact, NewMessage,
    NewSupportAgent, SupportAgent, SupportAgentPatch,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found.")]
    NotFound(&'static str),
    #[error("{0}")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub(crate) const DUPLICATE_EMAIL: &str = "A contact with this email already exists.";

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Resolves the contact and open chat for an inbound event and appends the
    /// user message when `inbound.text` is set. All writes happen atomically.
    async fn record_inbound(&self, inbound: &InboundRecord) -> Result<Conversation, StoreError>;

    async fn create_contact(&self, contact: NewContact) -> Result<Contact, StoreError>;
    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, StoreError>;
    async fn list_contacts(&self) -> Result<Vec<Contact>, StoreError>;
    async fn contacts_by_name(&self, name: &str) -> Result<Vec<Contact>, StoreError>;
    async fn update_contact(
        &self,
        id: i64,
        patch: ContactPatch,
    ) -> Result<Option<Contact>, StoreError>;
    /// Removes the contact together with its chats and their messages.
    async fn delete_contact(&self, id: i64) -> Result<bool, StoreError>;

    async fn get_chat(&self, id: i64) -> Result<Option<Chat>, StoreError>;
    async fn list_chats(&self) -> Result<Vec<Chat>, StoreError>;
    async fn assign_support_agent(
        &self,
        chat_id: i64,
        agent_id: Option<i64>,
    ) -> Result<Option<Chat>, StoreError>;
    /// Sets `closing_time` unless the chat is already closed.
    async fn close_chat(&self, id: i64, at: DateTime<Utc>) -> Result<Option<Chat>, StoreError>;
    async fn delete_chat(&self, id: i64) -> Result<bool, StoreError>;

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;
    async fn get_message(&self, id: i64) -> Result<Option<Message>, StoreError>;
    async fn list_messages(&self) -> Result<Vec<Message>, StoreError>;
    async fn messages_for_chat(&self, chat_id: i64) -> Result<Vec<Message>, StoreError>;
    async fn messages_by_contact(&self, contact_id: i64) -> Result<Vec<Message>, StoreError>;
    async fn messages_by_support_agent(&self, agent_id: i64)
        -> Result<Vec<Message>, StoreError>;
    async fn update_message(
        &self,
        id: i64,
        content: String,
    ) -> Result<Option<Message>, StoreError>;
    async fn delete_message(&self, id: i64) -> Result<bool, StoreError>;

    async fn create_support_agent(
        &self,
        agent: NewSupportAgent,
    ) -> Result<SupportAgent, StoreError>;
    async fn get_support_agent(&self, id: i64) -> Result<Option<SupportAgent>, StoreError>;
    async fn list_support_agents(&self) -> Result<Vec<SupportAgent>, StoreError>;
    async fn update_support_agent(
        &self,
        id: i64,
        patch: SupportAgentPatch,
    ) -> Result<Option<SupportAgent>, StoreError>;
    /// Removes the agent; chats it was assigned to become unassigned.
    async fn delete_support_agent(&self, id: i64) -> Result<bool, StoreError>;
}
