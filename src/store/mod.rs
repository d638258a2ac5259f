use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub mod rest;
pub mod title;

pub use rest::RestStore;
pub use title::{generate_title, DEFAULT_TITLE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation persistence. Deleting a conversation also deletes its
/// messages.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recently updated first.
    async fn list(&self) -> Result<Vec<Conversation>, StoreError>;
    async fn create(&self, title: &str) -> Result<Conversation, StoreError>;
    async fn get(&self, id: i64) -> Result<Option<Conversation>, StoreError>;
    async fn rename(&self, id: i64, title: &str) -> Result<Conversation, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn append_message(&self, conversation_id: i64, role: Role, content: &str) -> Result<Message, StoreError>;
    /// Oldest first.
    async fn messages(&self, conversation_id: i64) -> Result<Vec<Message>, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    next_conversation: i64,
    next_message: i64,
    conversations: BTreeMap<i64, Conversation>,
    messages: BTreeMap<i64, Vec<Message>>,
}

/// Process-local store, used when no remote store is configured.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.inner.lock();
        let mut all: Vec<Conversation> = inner.conversations.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn create(&self, title: &str) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_conversation += 1;
        let now = Utc::now();
        let conversation = Conversation {
            id: inner.next_conversation,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        inner.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        Ok(self.inner.lock().conversations.get(&id).cloned())
    }

    async fn rename(&self, id: i64, title: &str) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock();
        let conversation = inner.conversations.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.messages.remove(&id);
        inner.conversations.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }

    async fn append_message(&self, conversation_id: i64, role: Role, content: &str) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        match inner.conversations.get_mut(&conversation_id) {
            Some(conversation) => conversation.updated_at = now,
            None => return Err(StoreError::NotFound(conversation_id)),
        }
        inner.next_message += 1;
        let message = Message {
            id: inner.next_message,
            conversation_id,
            role,
            content: content.to_string(),
            created_at: now,
        };
        inner.messages.entry(conversation_id).or_default().push(message.clone());
        Ok(message)
    }

    async fn messages(&self, conversation_id: i64) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock();
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(StoreError::NotFound(conversation_id));
        }
        Ok(inner.messages.get(&conversation_id).cloned().unwrap_or_default())
    }
}

/// Saves one completed question/answer pair and, for a conversation that
/// still carries the default title, names it after the question.
pub async fn record_exchange(
    store: &dyn ConversationStore,
    conversation_id: i64,
    question: &str,
    answer: &str,
) -> Result<(), StoreError> {
    let conversation = store.get(conversation_id).await?.ok_or(StoreError::NotFound(conversation_id))?;
    let first_exchange = store.messages(conversation_id).await?.is_empty();

    store.append_message(conversation_id, Role::User, question).await?;
    store.append_message(conversation_id, Role::Assistant, answer).await?;

    if first_exchange && conversation.title == DEFAULT_TITLE {
        store.rename(conversation_id, &generate_title(question)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_crud() {
        let store = MemoryStore::new();
        let a = store.create("Primeira").await.unwrap();
        let b = store.create("Segunda").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.get(a.id).await.unwrap().unwrap().title, "Primeira");

        let renamed = store.rename(a.id, "Renomeada").await.unwrap();
        assert_eq!(renamed.title, "Renomeada");
        assert_eq!(store.list().await.unwrap()[0].id, a.id);

        assert!(matches!(store.rename(99, "x").await, Err(StoreError::NotFound(99))));
        assert_eq!(store.get(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_cascades_messages() {
        let store = MemoryStore::new();
        let c = store.create(DEFAULT_TITLE).await.unwrap();
        store.append_message(c.id, Role::User, "oi").await.unwrap();
        assert_eq!(store.messages(c.id).await.unwrap().len(), 1);

        store.delete(c.id).await.unwrap();
        assert!(matches!(store.messages(c.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(c.id).await, Err(StoreError::NotFound(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_exchange_renames_default_title() {
        let store = MemoryStore::new();
        let c = store.create(DEFAULT_TITLE).await.unwrap();
        record_exchange(&store, c.id, "como criar um vetor em Rust", "Use Vec::new()").await.unwrap();

        let messages = store.messages(c.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "Use Vec::new()");
        assert_eq!(store.get(c.id).await.unwrap().unwrap().title, "Como criar um vetor em Rust");

        record_exchange(&store, c.id, "qual a diferença", "nenhuma").await.unwrap();
        assert_eq!(store.get(c.id).await.unwrap().unwrap().title, "Como criar um vetor em Rust");
    }

    #[tokio::test]
    async fn test_record_exchange_keeps_custom_title() {
        let store = MemoryStore::new();
        let c = store.create("Projeto X").await.unwrap();
        record_exchange(&store, c.id, "o que é ownership", "...").await.unwrap();
        assert_eq!(store.get(c.id).await.unwrap().unwrap().title, "Projeto X");
    }
}
