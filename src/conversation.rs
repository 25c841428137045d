use tracing::info;

use crate::{
    error::AppError,
    normalizer::NormalizedInbound,
    store::ConversationStore,
    types::{Conversation, InboundRecord, Service},
};

/// Records one inbound event: resolves (or creates) the contact and its open
/// chat for `service`, and stores the user's text unless the event is a
/// button press. Empty text on a plain message is rejected before any write.
pub async fn upsert(
    store: &dyn ConversationStore,
    inbound: &NormalizedInbound,
    service: Service,
) -> Result<Conversation, AppError> {
    if inbound.display_name.trim().is_empty() {
        return Err(AppError::Validation("contact name must not be empty".to_string()));
    }
    let text = if inbound.is_callback {
        None
    } else {
        if inbound.text.trim().is_empty() {
            return Err(AppError::Validation(
                "message_content must not be empty".to_string(),
            ));
        }
        Some(inbound.text.clone())
    };

    let record = InboundRecord {
        service,
        external_sender_id: inbound.external_sender_id.clone(),
        chat_native_id: inbound.chat_native_id.to_string(),
        display_name: inbound.display_name.clone(),
        text,
    };
    let conversation = store.record_inbound(&record).await?;
    info!(
        contact_id = conversation.contact.id,
        chat_id = conversation.chat.id,
        stored_message = conversation.message.is_some(),
        "inbound recorded"
    );
    Ok(conversation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryStore, types::SenderType};

    fn inbound(text: &str, callback: Option<&str>) -> NormalizedInbound {
        NormalizedInbound {
            external_sender_id: "42".to_string(),
            chat_native_id: 42,
            display_name: "Ana".to_string(),
            text: text.to_string(),
            is_callback: callback.is_some(),
            callback_token: callback.map(str::to_string),
            message_native_id: 1,
        }
    }

    #[tokio::test]
    async fn first_message_creates_everything() {
        let store = MemoryStore::new();
        let conversation = upsert(&store, &inbound("start", None), Service::Telegram)
            .await
            .unwrap();

        assert_eq!(conversation.contact.name, "Ana");
        assert_eq!(conversation.chat.service, Service::Telegram);
        assert_eq!(conversation.chat.chat_native_id.as_deref(), Some("42"));
        assert_eq!(conversation.chat.contact_id, Some(conversation.contact.id));
        let message = conversation.message.unwrap();
        assert_eq!(message.sender_type, SenderType::User);
        assert_eq!(message.message_content, "start");
    }

    #[tokio::test]
    async fn callback_reuses_chat_without_message() {
        let store = MemoryStore::new();
        let first = upsert(&store, &inbound("start", None), Service::Telegram)
            .await
            .unwrap();
        let second = upsert(
            &store,
            &inbound("Welcome", Some("use_weni")),
            Service::Telegram,
        )
        .await
        .unwrap();

        assert_eq!(first.chat.id, second.chat.id);
        assert!(second.message.is_none());
        assert_eq!(store.list_messages().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_text_writes_nothing() {
        let store = MemoryStore::new();
        let err = upsert(&store, &inbound("   ", None), Service::Telegram)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.list_contacts().await.unwrap().is_empty());
        assert!(store.list_chats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_name_writes_nothing() {
        let store = MemoryStore::new();
        let mut record = inbound("start", None);
        record.display_name = " ".to_string();
        let err = upsert(&store, &record, Service::Telegram).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.list_contacts().await.unwrap().is_empty());
    }
}
