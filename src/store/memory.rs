use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{ConversationStore, StoreError, DUPLICATE_EMAIL};
use crate::types::{
    Chat, Contact, ContactPatch, Conversation, InboundRecord, Message, NewContact, NewMessage,
    NewSupportAgent, SenderType, SupportAgent, SupportAgentPatch,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    contacts: BTreeMap<i64, Contact>,
    chats: BTreeMap<i64, Chat>,
    messages: BTreeMap<i64, Message>,
    agents: BTreeMap<i64, SupportAgent>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.contacts
            .values()
            .any(|c| Some(c.id) != except && c.email.as_deref() == Some(email))
    }

    fn insert_message(&mut self, chat_id: i64, sender_type: SenderType, content: String) -> Message {
        let id = self.allocate_id();
        let message = Message {
            id,
            chat_id,
            sender_type,
            sender_type_display: sender_type.label(),
            message_content: content,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.messages.insert(id, message.clone());
        message
    }

    fn ordered_messages<F>(&self, keep: F) -> Vec<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let mut list = self
            .messages
            .values()
            .filter(|m| keep(*m))
            .cloned()
            .collect::<Vec<_>>();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    fn remove_chat(&mut self, chat_id: i64) -> bool {
        let removed = self.chats.remove(&chat_id).is_some();
        self.messages.retain(|_, m| m.chat_id != chat_id);
        removed
    }
}

/// Process-local store. A single lock guards every table, so each operation
/// (including [`ConversationStore::record_inbound`]) is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn record_inbound(&self, inbound: &InboundRecord) -> Result<Conversation, StoreError> {
        let mut db = self.tables.lock().await;

        let existing = db
            .contacts
            .values()
            .find(|c| c.external_id.as_deref() == Some(inbound.external_sender_id.as_str()))
            .cloned();
        let contact = match existing {
            Some(contact) => contact,
            None => {
                let id = db.allocate_id();
                let contact = Contact {
                    id,
                    name: inbound.display_name.clone(),
                    email: None,
                    cpf: None,
                    telephone: None,
                    external_id: Some(inbound.external_sender_id.clone()),
                };
                db.contacts.insert(id, contact.clone());
                contact
            }
        };

        let open_chat = db
            .chats
            .values()
            .filter(|c| {
                c.contact_id == Some(contact.id) && c.service == inbound.service && c.is_open()
            })
            .max_by_key(|c| c.start_time)
            .cloned();
        let chat = match open_chat {
            Some(chat) => chat,
            None => {
                let id = db.allocate_id();
                let chat = Chat {
                    id,
                    chat_native_id: Some(inbound.chat_native_id.clone()),
                    support_agent_id: None,
                    contact_id: Some(contact.id),
                    start_time: Utc::now(),
                    closing_time: None,
                    service: inbound.service,
                };
                db.chats.insert(id, chat.clone());
                chat
            }
        };

        let message = inbound
            .text
            .clone()
            .map(|text| db.insert_message(chat.id, SenderType::User, text));

        Ok(Conversation {
            contact,
            chat,
            message,
        })
    }

    async fn create_contact(&self, contact: NewContact) -> Result<Contact, StoreError> {
        let mut db = self.tables.lock().await;
        if let Some(email) = contact.email.as_deref() {
            if db.email_taken(email, None) {
                return Err(StoreError::Duplicate(DUPLICATE_EMAIL.to_string()));
            }
        }
        let id = db.allocate_id();
        let contact = Contact {
            id,
            name: contact.name,
            email: contact.email,
            cpf: contact.cpf,
            telephone: contact.telephone,
            external_id: contact.external_id,
        };
        db.contacts.insert(id, contact.clone());
        Ok(contact)
    }

    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, StoreError> {
        Ok(self.tables.lock().await.contacts.get(&id).cloned())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        Ok(self.tables.lock().await.contacts.values().cloned().collect())
    }

    async fn contacts_by_name(&self, name: &str) -> Result<Vec<Contact>, StoreError> {
        let db = self.tables.lock().await;
        Ok(db
            .contacts
            .values()
            .filter(|c| c.name == name)
            .cloned()
            .collect())
    }

    async fn update_contact(
        &self,
        id: i64,
        patch: ContactPatch,
    ) -> Result<Option<Contact>, StoreError> {
        let mut db = self.tables.lock().await;
        if let Some(email) = patch.email.as_deref() {
            if db.email_taken(email, Some(id)) {
                return Err(StoreError::Duplicate(DUPLICATE_EMAIL.to_string()));
            }
        }
        let Some(contact) = db.contacts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = patch.name {
            contact.name = v;
        }
        if let Some(v) = patch.email {
            contact.email = Some(v);
        }
        if let Some(v) = patch.cpf {
            contact.cpf = Some(v);
        }
        if let Some(v) = patch.telephone {
            contact.telephone = Some(v);
        }
        Ok(Some(contact.clone()))
    }

    async fn delete_contact(&self, id: i64) -> Result<bool, StoreError> {
        let mut db = self.tables.lock().await;
        if db.contacts.remove(&id).is_none() {
            return Ok(false);
        }
        let owned = db
            .chats
            .values()
            .filter(|c| c.contact_id == Some(id))
            .map(|c| c.id)
            .collect::<Vec<_>>();
        for chat_id in owned {
            db.remove_chat(chat_id);
        }
        Ok(true)
    }

    async fn get_chat(&self, id: i64) -> Result<Option<Chat>, StoreError> {
        Ok(self.tables.lock().await.chats.get(&id).cloned())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, StoreError> {
        Ok(self.tables.lock().await.chats.values().cloned().collect())
    }

    async fn assign_support_agent(
        &self,
        chat_id: i64,
        agent_id: Option<i64>,
    ) -> Result<Option<Chat>, StoreError> {
        let mut db = self.tables.lock().await;
        if let Some(agent_id) = agent_id {
            if !db.agents.contains_key(&agent_id) {
                return Err(StoreError::NotFound("Support agent"));
            }
        }
        let Some(chat) = db.chats.get_mut(&chat_id) else {
            return Ok(None);
        };
        chat.support_agent_id = agent_id;
        Ok(Some(chat.clone()))
    }

    async fn close_chat(&self, id: i64, at: DateTime<Utc>) -> Result<Option<Chat>, StoreError> {
        let mut db = self.tables.lock().await;
        let Some(chat) = db.chats.get_mut(&id) else {
            return Ok(None);
        };
        if chat.closing_time.is_none() {
            chat.closing_time = Some(at);
        }
        Ok(Some(chat.clone()))
    }

    async fn delete_chat(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.remove_chat(id))
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut db = self.tables.lock().await;
        if !db.chats.contains_key(&message.chat_id) {
            return Err(StoreError::NotFound("Chat"));
        }
        Ok(db.insert_message(message.chat_id, message.sender_type, message.message_content))
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, StoreError> {
        Ok(self.tables.lock().await.messages.get(&id).cloned())
    }

    async fn list_messages(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.tables.lock().await.ordered_messages(|_| true))
    }

    async fn messages_for_chat(&self, chat_id: i64) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .ordered_messages(|m| m.chat_id == chat_id))
    }

    async fn messages_by_contact(&self, contact_id: i64) -> Result<Vec<Message>, StoreError> {
        let db = self.tables.lock().await;
        Ok(db.ordered_messages(|m| {
            db.chats
                .get(&m.chat_id)
                .is_some_and(|c| c.contact_id == Some(contact_id))
        }))
    }

    async fn messages_by_support_agent(
        &self,
        agent_id: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let db = self.tables.lock().await;
        Ok(db.ordered_messages(|m| {
            db.chats
                .get(&m.chat_id)
                .is_some_and(|c| c.support_agent_id == Some(agent_id))
        }))
    }

    async fn update_message(
        &self,
        id: i64,
        content: String,
    ) -> Result<Option<Message>, StoreError> {
        let mut db = self.tables.lock().await;
        let Some(message) = db.messages.get_mut(&id) else {
            return Ok(None);
        };
        message.message_content = content;
        message.updated_at = Some(Utc::now());
        Ok(Some(message.clone()))
    }

    async fn delete_message(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.messages.remove(&id).is_some())
    }

    async fn create_support_agent(
        &self,
        agent: NewSupportAgent,
    ) -> Result<SupportAgent, StoreError> {
        let mut db = self.tables.lock().await;
        let id = db.allocate_id();
        let agent = SupportAgent {
            id,
            first_name: agent.first_name,
            last_name: agent.last_name,
            password: agent.password_hash,
        };
        db.agents.insert(id, agent.clone());
        Ok(agent)
    }

    async fn get_support_agent(&self, id: i64) -> Result<Option<SupportAgent>, StoreError> {
        Ok(self.tables.lock().await.agents.get(&id).cloned())
    }

    async fn list_support_agents(&self) -> Result<Vec<SupportAgent>, StoreError> {
        Ok(self.tables.lock().await.agents.values().cloned().collect())
    }

    async fn update_support_agent(
        &self,
        id: i64,
        patch: SupportAgentPatch,
    ) -> Result<Option<SupportAgent>, StoreError> {
        let mut db = self.tables.lock().await;
        let Some(agent) = db.agents.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = patch.first_name {
            agent.first_name = v;
        }
        if let Some(v) = patch.last_name {
            agent.last_name = v;
        }
        if let Some(v) = patch.password_hash {
            agent.password = v;
        }
        Ok(Some(agent.clone()))
    }

    async fn delete_support_agent(&self, id: i64) -> Result<bool, StoreError> {
        let mut db = self.tables.lock().await;
        if db.agents.remove(&id).is_none() {
            return Ok(false);
        }
        for chat in db.chats.values_mut() {
            if chat.support_agent_id == Some(id) {
                chat.support_agent_id = None;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Service;

    fn inbound(sender: &str, name: &str, text: Option<&str>) -> InboundRecord {
        InboundRecord {
            service: Service::Telegram,
            external_sender_id: sender.to_string(),
            chat_native_id: sender.to_string(),
            display_name: name.to_string(),
            text: text.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn record_inbound_reuses_contact_and_open_chat() {
        let store = MemoryStore::new();
        let first = store
            .record_inbound(&inbound("42", "Ana", Some("start")))
            .await
            .unwrap();
        let second = store
            .record_inbound(&inbound("42", "Ana", Some("hello again")))
            .await
            .unwrap();

        assert_eq!(first.contact.id, second.contact.id);
        assert_eq!(first.chat.id, second.chat.id);
        assert_eq!(store.list_contacts().await.unwrap().len(), 1);
        assert_eq!(store.list_chats().await.unwrap().len(), 1);

        let messages = store.messages_for_chat(first.chat.id).await.unwrap();
        let texts = messages
            .iter()
            .map(|m| m.message_content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["start", "hello again"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_share_contact_and_chat() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let handles = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_inbound(&inbound("42", "Ana", Some(&format!("msg {i}"))))
                        .await
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list_contacts().await.unwrap().len(), 1);
        let chats = store.list_chats().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(store.messages_for_chat(chats[0].id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn same_first_name_does_not_merge_people() {
        let store = MemoryStore::new();
        let ana = store
            .record_inbound(&inbound("1", "Ana", Some("hi")))
            .await
            .unwrap();
        let other_ana = store
            .record_inbound(&inbound("2", "Ana", Some("hi")))
            .await
            .unwrap();
        assert_ne!(ana.contact.id, other_ana.contact.id);
        assert_ne!(ana.chat.id, other_ana.chat.id);
    }

    #[tokio::test]
    async fn closed_chat_is_not_reused() {
        let store = MemoryStore::new();
        let first = store
            .record_inbound(&inbound("42", "Ana", Some("start")))
            .await
            .unwrap();
        store.close_chat(first.chat.id, Utc::now()).await.unwrap();

        let second = store
            .record_inbound(&inbound("42", "Ana", Some("start")))
            .await
            .unwrap();
        assert_ne!(first.chat.id, second.chat.id);
        assert_eq!(first.contact.id, second.contact.id);
    }

    #[tokio::test]
    async fn callback_records_no_message() {
        let store = MemoryStore::new();
        let conversation = store
            .record_inbound(&inbound("42", "Ana", None))
            .await
            .unwrap();
        assert!(conversation.message.is_none());
        assert!(store.list_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        let contact = NewContact {
            name: "Jane Doe".to_string(),
            email: Some("jane@example.com".to_string()),
            cpf: None,
            telephone: None,
            external_id: None,
        };
        store.create_contact(contact.clone()).await.unwrap();
        let err = store.create_contact(contact).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn deleting_contact_cascades_to_chats_and_messages() {
        let store = MemoryStore::new();
        let conversation = store
            .record_inbound(&inbound("42", "Ana", Some("start")))
            .await
            .unwrap();
        assert!(store.delete_contact(conversation.contact.id).await.unwrap());
        assert!(store.list_chats().await.unwrap().is_empty());
        assert!(store.list_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_agent_unassigns_chats() {
        let store = MemoryStore::new();
        let conversation = store
            .record_inbound(&inbound("42", "Ana", Some("start")))
            .await
            .unwrap();
        let agent = store
            .create_support_agent(NewSupportAgent {
                first_name: "Bia".to_string(),
                last_name: "Lima".to_string(),
                password_hash: "$2b$04$placeholder".to_string(),
            })
            .await
            .unwrap();
        store
            .assign_support_agent(conversation.chat.id, Some(agent.id))
            .await
            .unwrap();
        assert_eq!(
            store.messages_by_support_agent(agent.id).await.unwrap().len(),
            1
        );

        assert!(store.delete_support_agent(agent.id).await.unwrap());
        let chat = store.get_chat(conversation.chat.id).await.unwrap().unwrap();
        assert_eq!(chat.support_agent_id, None);
        assert_eq!(store.list_messages().await.unwrap().len(), 1);
    }
}
