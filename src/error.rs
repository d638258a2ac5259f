use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failures of a relay session. Each one ends the session with exactly one
/// `Error` event whose text is the `Display` output below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Não foi possível conectar ao Ollama em {0}. Verifique se o serviço está rodando.")]
    BackendUnreachable(String),

    #[error("Tempo limite excedido aguardando resposta do Ollama ({0}s)")]
    BackendTimeout(u64),

    #[error("Erro do Ollama ({status}): {body}")]
    BackendHttp { status: u16, body: String },

    #[error("Erro do Ollama: {0}")]
    Backend(String),

    #[error("Conexão com o Ollama encerrada antes do fim da resposta")]
    UpstreamEndedWithoutCompletion,

    #[error("{0}")]
    Unexpected(String),
}

impl RelayError {
    pub fn from_reqwest(err: reqwest::Error, endpoint: &str, timeout_secs: u64) -> Self {
        if err.is_connect() {
            RelayError::BackendUnreachable(endpoint.to_string())
        } else if err.is_timeout() {
            RelayError::BackendTimeout(timeout_secs)
        } else {
            RelayError::Unexpected(err.to_string())
        }
    }

    /// Errors while reading an already-open streaming body. A peer that closes
    /// a chunked response early surfaces as a body or decode error, which is
    /// the same as the stream ending without its completion frame.
    pub fn from_body_error(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            RelayError::BackendTimeout(timeout_secs)
        } else if err.is_body() || err.is_decode() {
            tracing::debug!(error = %err, "upstream body cut short");
            RelayError::UpstreamEndedWithoutCompletion
        } else {
            RelayError::Unexpected(err.to_string())
        }
    }
}

/// Errors returned synchronously by the HTTP surface, before or instead of a
/// relay session.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Pergunta não pode estar vazia")]
    EmptyQuestion,

    #[error("Tipo de conteúdo não suportado: {0}")]
    UnsupportedMediaType(String),

    #[error("Requisição inválida: {0}")]
    BadRequest(String),

    #[error("Conversa {0} não encontrada")]
    ConversationNotFound(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::EmptyQuestion | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(e) => e.status(),
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::BAD_GATEWAY,
            ApiError::Relay(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::warn!(%status, error = %self, "request rejected");
        }
        (status, Json(json!({ "erro": self.to_string() }))).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Nome de arquivo inválido")]
    InvalidName,

    #[error("Extensão não permitida: {0}")]
    DisallowedExtension(String),

    #[error("Arquivo excede o tamanho máximo de {max} bytes ({size} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Falha de E/S no armazenamento: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    fn status(&self) -> StatusCode {
        match self {
            StorageError::InvalidName | StorageError::DisallowedExtension(_) => StatusCode::BAD_REQUEST,
            StorageError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Conversa {0} não encontrada")]
    NotFound(i64),

    #[error("Armazenamento remoto respondeu {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Falha ao acessar o armazenamento remoto: {0}")]
    Transport(#[from] reqwest::Error),
}
