use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use tracing::info;

use super::{ConversationStore, StoreError, DUPLICATE_EMAIL};
use crate::types::{
    Chat, Contact, ContactPatch, Conversation, InboundRecord, Message, NewContact, NewMessage,
    NewSupportAgent, SenderType, Service, SupportAgent, SupportAgentPatch,
};

const CONTACT_COLUMNS: &str = "id, name, email, cpf, telephone, external_id";
const CHAT_COLUMNS: &str =
    "id, chat_native_id, support_agent_id, contact_id, start_time, closing_time, service";
const MESSAGE_COLUMNS: &str =
    "m.id, m.chat_id, m.sender_type, m.message_content, m.created_at, m.updated_at";
const AGENT_COLUMNS: &str = "id, first_name, last_name, password";

fn parse_contact_row(row: &PgRow) -> Result<Contact, StoreError> {
    Ok(Contact {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        cpf: row.try_get("cpf")?,
        telephone: row.try_get("telephone")?,
        external_id: row.try_get("external_id")?,
    })
}

fn parse_chat_row(row: &PgRow) -> Result<Chat, StoreError> {
    let code: String = row.try_get("service")?;
    let service = Service::from_code(&code)
        .ok_or_else(|| StoreError::Corrupt(format!("chat service code '{code}'")))?;
    Ok(Chat {
        id: row.try_get("id")?,
        chat_native_id: row.try_get("chat_native_id")?,
        support_agent_id: row.try_get("support_agent_id")?,
        contact_id: row.try_get("contact_id")?,
        start_time: row.try_get("start_time")?,
        closing_time: row.try_get("closing_time")?,
        service,
    })
}

fn parse_message_row(row: &PgRow) -> Result<Message, StoreError> {
    let sender_type = SenderType::try_from(row.try_get::<i16, _>("sender_type")?)
        .map_err(StoreError::Corrupt)?;
    Ok(Message {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        sender_type,
        sender_type_display: sender_type.label(),
        message_content: row.try_get("message_content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_agent_row(row: &PgRow) -> Result<SupportAgent, StoreError> {
    Ok(SupportAgent {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        password: row.try_get("password")?,
    })
}

fn parse_rows<T>(
    rows: Vec<PgRow>,
    parse: fn(&PgRow) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.iter().map(parse).collect()
}

fn email_conflict(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(DUPLICATE_EMAIL.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn missing_reference(err: sqlx::Error, entity: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound(entity),
        _ => StoreError::Database(err),
    }
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&db).await?;
        info!("postgres store ready");
        Ok(Self::from_pool(db))
    }

    /// Wraps an already migrated pool.
    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    async fn messages_where(&self, clause: &str, id: i64) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN chats c ON c.id = m.chat_id \
             WHERE {clause} = $1 ORDER BY m.created_at, m.id"
        ))
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        parse_rows(rows, parse_message_row)
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn record_inbound(&self, inbound: &InboundRecord) -> Result<Conversation, StoreError> {
        let mut tx = self.db.begin().await?;

        // no-op update so RETURNING yields the existing row on conflict
        let row = sqlx::query(&format!(
            "INSERT INTO contacts (name, external_id) VALUES ($1, $2) \
             ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id \
             RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(&inbound.display_name)
        .bind(&inbound.external_sender_id)
        .fetch_one(&mut *tx)
        .await?;
        let contact = parse_contact_row(&row)?;

        sqlx::query(
            "INSERT INTO chats (chat_native_id, contact_id, service) VALUES ($1, $2, $3) \
             ON CONFLICT (contact_id, service) WHERE closing_time IS NULL DO NOTHING",
        )
        .bind(&inbound.chat_native_id)
        .bind(contact.id)
        .bind(inbound.service.code())
        .execute(&mut *tx)
        .await?;
        let row = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats \
             WHERE contact_id = $1 AND service = $2 AND closing_time IS NULL"
        ))
        .bind(contact.id)
        .bind(inbound.service.code())
        .fetch_one(&mut *tx)
        .await?;
        let chat = parse_chat_row(&row)?;

        let message = match &inbound.text {
            Some(text) => {
                let row = sqlx::query(
                    "INSERT INTO messages AS m (chat_id, sender_type, message_content) \
                     VALUES ($1, $2, $3) \
                     RETURNING m.id, m.chat_id, m.sender_type, m.message_content, m.created_at, m.updated_at",
                )
                .bind(chat.id)
                .bind(SenderType::User.code())
                .bind(text)
                .fetch_one(&mut *tx)
                .await?;
                Some(parse_message_row(&row)?)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(Conversation {
            contact,
            chat,
            message,
        })
    }

    async fn create_contact(&self, contact: NewContact) -> Result<Contact, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO contacts (name, email, cpf, telephone, external_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.cpf)
        .bind(&contact.telephone)
        .bind(&contact.external_id)
        .fetch_one(&self.db)
        .await
        .map_err(email_conflict)?;
        parse_contact_row(&row)
    }

    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, StoreError> {
        let row = sqlx::query(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(parse_contact_row).transpose()
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY id"))
            .fetch_all(&self.db)
            .await?;
        parse_rows(rows, parse_contact_row)
    }

    async fn contacts_by_name(&self, name: &str) -> Result<Vec<Contact>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE name = $1 ORDER BY id"
        ))
        .bind(name)
        .fetch_all(&self.db)
        .await?;
        parse_rows(rows, parse_contact_row)
    }

    async fn update_contact(
        &self,
        id: i64,
        patch: ContactPatch,
    ) -> Result<Option<Contact>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE contacts SET name = COALESCE($1, name), email = COALESCE($2, email), \
             cpf = COALESCE($3, cpf), telephone = COALESCE($4, telephone) \
             WHERE id = $5 RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(&patch.name)
        .bind(&patch.email)
        .bind(&patch.cpf)
        .bind(&patch.telephone)
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(email_conflict)?;
        row.as_ref().map(parse_contact_row).transpose()
    }

    async fn delete_contact(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_chat(&self, id: i64) -> Result<Option<Chat>, StoreError> {
        let row = sqlx::query(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(parse_chat_row).transpose()
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {CHAT_COLUMNS} FROM chats ORDER BY id"))
            .fetch_all(&self.db)
            .await?;
        parse_rows(rows, parse_chat_row)
    }

    async fn assign_support_agent(
        &self,
        chat_id: i64,
        agent_id: Option<i64>,
    ) -> Result<Option<Chat>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE chats SET support_agent_id = $1 WHERE id = $2 RETURNING {CHAT_COLUMNS}"
        ))
        .bind(agent_id)
        .bind(chat_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| missing_reference(e, "Support agent"))?;
        row.as_ref().map(parse_chat_row).transpose()
    }

    async fn close_chat(&self, id: i64, at: DateTime<Utc>) -> Result<Option<Chat>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE chats SET closing_time = COALESCE(closing_time, $1) \
             WHERE id = $2 RETURNING {CHAT_COLUMNS}"
        ))
        .bind(at)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_chat_row).transpose()
    }

    async fn delete_chat(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let row = sqlx::query(
            "INSERT INTO messages AS m (chat_id, sender_type, message_content) \
             VALUES ($1, $2, $3) \
             RETURNING m.id, m.chat_id, m.sender_type, m.message_content, m.created_at, m.updated_at",
        )
        .bind(message.chat_id)
        .bind(message.sender_type.code())
        .bind(&message.message_content)
        .fetch_one(&self.db)
        .await
        .map_err(|e| missing_reference(e, "Chat"))?;
        parse_message_row(&row)
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_message_row).transpose()
    }

    async fn list_messages(&self) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m ORDER BY m.created_at, m.id"
        ))
        .fetch_all(&self.db)
        .await?;
        parse_rows(rows, parse_message_row)
    }

    async fn messages_for_chat(&self, chat_id: i64) -> Result<Vec<Message>, StoreError> {
        self.messages_where("c.id", chat_id).await
    }

    async fn messages_by_contact(&self, contact_id: i64) -> Result<Vec<Message>, StoreError> {
        self.messages_where("c.contact_id", contact_id).await
    }

    async fn messages_by_support_agent(
        &self,
        agent_id: i64,
    ) -> Result<Vec<Message>, StoreError> {
        self.messages_where("c.support_agent_id", agent_id).await
    }

    async fn update_message(
        &self,
        id: i64,
        content: String,
    ) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(
            "UPDATE messages AS m SET message_content = $1, updated_at = now() WHERE m.id = $2 \
             RETURNING m.id, m.chat_id, m.sender_type, m.message_content, m.created_at, m.updated_at",
        )
        .bind(&content)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_message_row).transpose()
    }

    async fn delete_message(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_support_agent(
        &self,
        agent: NewSupportAgent,
    ) -> Result<SupportAgent, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO support_agents (first_name, last_name, password) \
             VALUES ($1, $2, $3) RETURNING {AGENT_COLUMNS}"
        ))
        .bind(&agent.first_name)
        .bind(&agent.last_name)
        .bind(&agent.password_hash)
        .fetch_one(&self.db)
        .await?;
        parse_agent_row(&row)
    }

    async fn get_support_agent(&self, id: i64) -> Result<Option<SupportAgent>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM support_agents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_agent_row).transpose()
    }

    async fn list_support_agents(&self) -> Result<Vec<SupportAgent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM support_agents ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await?;
        parse_rows(rows, parse_agent_row)
    }

    async fn update_support_agent(
        &self,
        id: i64,
        patch: SupportAgentPatch,
    ) -> Result<Option<SupportAgent>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE support_agents SET first_name = COALESCE($1, first_name), \
             last_name = COALESCE($2, last_name), password = COALESCE($3, password) \
             WHERE id = $4 RETURNING {AGENT_COLUMNS}"
        ))
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.password_hash)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_agent_row).transpose()
    }

    async fn delete_support_agent(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM support_agents WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
