use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::fs::FileStore;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ChatFields {
    #[serde(default)]
    pub pergunta: String,
    #[serde(default)]
    pub file_content: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Bytes,
}

/// A chat request body, decoded once according to its content type.
#[derive(Debug)]
pub enum ChatInput {
    Json(ChatFields),
    Form { fields: ChatFields, upload: Option<Upload> },
}

impl ChatInput {
    pub fn fields(&self) -> &ChatFields {
        match self {
            ChatInput::Json(fields) => fields,
            ChatInput::Form { fields, .. } => fields,
        }
    }

    /// The trimmed question, or `EmptyQuestion`.
    pub fn question(&self) -> Result<String, ApiError> {
        let question = self.fields().pergunta.trim();
        if question.is_empty() {
            return Err(ApiError::EmptyQuestion);
        }
        Ok(question.to_string())
    }

    /// Context text for the prompt: explicit `file_content` wins; otherwise an
    /// uploaded file is stored and, when it is text, read back.
    pub async fn context(&self, files: &FileStore) -> Result<Option<String>, ApiError> {
        if let Some(content) = self.fields().file_content.as_ref().filter(|c| !c.trim().is_empty()) {
            return Ok(Some(content.clone()));
        }

        match self {
            ChatInput::Form { upload: Some(upload), .. } => {
                let path = files.save(&upload.name, &upload.bytes).await?;
                Ok(files.read(&path).await)
            }
            _ => Ok(None),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequest<S> for ChatInput
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mime = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match mime.as_str() {
            "application/json" => {
                let Json(fields) = Json::<ChatFields>::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                Ok(ChatInput::Json(fields))
            }
            "application/x-www-form-urlencoded" => {
                let Form(fields) = Form::<ChatFields>::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                Ok(ChatInput::Form { fields, upload: None })
            }
            "multipart/form-data" => {
                let multipart = Multipart::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                read_multipart(multipart).await
            }
            "" => Err(ApiError::UnsupportedMediaType("(ausente)".to_string())),
            other => Err(ApiError::UnsupportedMediaType(other.to_string())),
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<ChatInput, ApiError> {
    let mut fields = ChatFields::default();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        if let Some(file_name) = file_name {
            let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
            if !bytes.is_empty() {
                upload = Some(Upload { name: file_name, bytes });
            }
            continue;
        }

        let value = field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
        match name.as_str() {
            "pergunta" => fields.pergunta = value,
            "file_content" => fields.file_content = Some(value),
            "conversation_id" => {
                fields.conversation_id = match value.trim() {
                    "" => None,
                    id => Some(id.parse().map_err(|_| {
                        ApiError::BadRequest(format!("conversation_id inválido: {id}"))
                    })?),
                }
            }
            other => tracing::debug!(field = %other, "ignoring multipart field"),
        }
    }

    Ok(ChatInput::Form { fields, upload })
}
