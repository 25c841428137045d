//! Provider-agnostic outbound messaging.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::validator::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// Text plus an optional keyboard; an empty keyboard means no buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub text: String,
    pub keyboard: Vec<Button>,
}

impl OutboundReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn tokens(&self) -> Vec<&str> {
        self.keyboard.iter().map(|b| b.token.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider rejected the call ({status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Send/edit primitives of one messaging provider. Every call performs at
/// most one request against the provider and is never retried here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send(&self, chat_id: i64, reply: &OutboundReply) -> Result<(), ChannelError>;

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        reply: &OutboundReply,
    ) -> Result<(), ChannelError>;
}

/// Adapters keyed by provider, built once at startup.
#[derive(Clone, Default)]
pub struct BotRegistry {
    bots: HashMap<Provider, Arc<dyn ReplyChannel>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bot(mut self, provider: Provider, bot: Arc<dyn ReplyChannel>) -> Self {
        self.bots.insert(provider, bot);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ReplyChannel>> {
        self.bots.get(&provider).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn ReplyChannel>> {
        Provider::from_name(name).and_then(|p| self.get(p))
    }
}
