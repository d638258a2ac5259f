use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{Conversation, ConversationStore, Message, Role};
use crate::error::StoreError;

const CONVERSATION_COLUMNS: &str = "id,title,created_at,updated_at";
const MESSAGE_COLUMNS: &str = "id,conversation_id,role,content,created_at";

/// Conversation store backed by a Supabase (PostgREST) project, using the
/// `conversations` and `messages` tables.
pub struct RestStore {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rows<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<Vec<T>, StoreError> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Remote { status, body });
        }
        Ok(response.json().await?)
    }

    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<(), StoreError> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Remote { status, body });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationStore for RestStore {
    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        let builder = self
            .request(reqwest::Method::GET, "conversations")
            .query(&[("select", CONVERSATION_COLUMNS), ("order", "updated_at.desc")]);
        self.rows(builder).await
    }

    async fn create(&self, title: &str) -> Result<Conversation, StoreError> {
        let builder = self
            .request(reqwest::Method::POST, "conversations")
            .query(&[("select", CONVERSATION_COLUMNS)])
            .header("Prefer", "return=representation")
            .json(&json!({ "title": title }));
        let rows: Vec<Conversation> = self.rows(builder).await?;
        rows.into_iter().next().ok_or(StoreError::Remote {
            status: 200,
            body: "insert returned no row".to_string(),
        })
    }

    async fn get(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        let id_filter = format!("eq.{id}");
        let builder = self
            .request(reqwest::Method::GET, "conversations")
            .query(&[("select", CONVERSATION_COLUMNS), ("id", id_filter.as_str())]);
        let rows: Vec<Conversation> = self.rows(builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn rename(&self, id: i64, title: &str) -> Result<Conversation, StoreError> {
        let id_filter = format!("eq.{id}");
        let builder = self
            .request(reqwest::Method::PATCH, "conversations")
            .query(&[("select", CONVERSATION_COLUMNS), ("id", id_filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&json!({ "title": title, "updated_at": Utc::now() }));
        let rows: Vec<Conversation> = self.rows(builder).await?;
        rows.into_iter().next().ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        if self.get(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }

        let id_filter = format!("eq.{id}");
        self.execute(
            self.request(reqwest::Method::DELETE, "messages")
                .query(&[("conversation_id", id_filter.as_str())]),
        )
        .await?;
        self.execute(
            self.request(reqwest::Method::DELETE, "conversations")
                .query(&[("id", id_filter.as_str())]),
        )
        .await
    }

    async fn append_message(&self, conversation_id: i64, role: Role, content: &str) -> Result<Message, StoreError> {
        let builder = self
            .request(reqwest::Method::POST, "messages")
            .query(&[("select", MESSAGE_COLUMNS)])
            .header("Prefer", "return=representation")
            .json(&json!({ "conversation_id": conversation_id, "role": role, "content": content }));
        let rows: Vec<Message> = self.rows(builder).await?;
        rows.into_iter().next().ok_or(StoreError::NotFound(conversation_id))
    }

    async fn messages(&self, conversation_id: i64) -> Result<Vec<Message>, StoreError> {
        let id_filter = format!("eq.{conversation_id}");
        let builder = self
            .request(reqwest::Method::GET, "messages")
            .query(&[
                ("select", MESSAGE_COLUMNS),
                ("conversation_id", id_filter.as_str()),
                ("order", "created_at.asc"),
            ]);
        self.rows(builder).await
    }
}
