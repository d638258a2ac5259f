use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::Client;
use crate::envconfig::EnvConfig;
use crate::error::ApiError;
use crate::events::{Event, EventBus};
use crate::fs::FileStore;
use crate::relay::{prompt, Relay, RelayOutcome};
use crate::sse;
use crate::store::{self, ConversationStore, MemoryStore, RestStore, DEFAULT_TITLE};

pub mod input;

pub use input::{ChatFields, ChatInput, Upload};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EnvConfig>,
    pub relay: Relay,
    pub files: Arc<FileStore>,
    pub store: Arc<dyn ConversationStore>,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);
    let cors = crate::middleware::cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/ping", get(ping))
        .route("/status", get(status))
        .route("/chat", post(chat))
        .route("/chat/sync", post(chat_sync))
        .route("/upload", post(upload))
        .route("/files", get(list_files))
        .route("/api/conversations", get(list_conversations).post(create_conversation))
        .route(
            "/api/conversations/:id",
            get(get_conversation).patch(rename_conversation).delete(delete_conversation),
        )
        .route("/api/conversations/:id/messages", get(list_messages))
        // Slack for multipart framing on top of the file itself.
        .layer(DefaultBodyLimit::max(body_limit.saturating_add(64 * 1024)))
        .layer(axum::middleware::from_fn(crate::middleware::access_log_middleware))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(config: EnvConfig, events: Arc<EventBus>) -> Result<()> {
    let client = Client::new(&config.ollama_url, config.timeout())?;
    let relay = Relay::new(Arc::new(client), events.clone(), config.timeout());
    let files = Arc::new(FileStore::new(&config.upload_dir, config.max_upload_bytes)?);
    let store: Arc<dyn ConversationStore> = match &config.supabase {
        Some(supabase) => Arc::new(RestStore::new(&supabase.url, &supabase.key)),
        None => {
            tracing::info!("no SUPABASE_URL/SUPABASE_KEY set, conversations kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = config.listen_addr();
    let backend = config.ollama_url.clone();
    let state = AppState {
        config: Arc::new(config),
        relay,
        files,
        store,
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    events.publish(Event::ServerStarted { addr, backend });

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "message": "Backend está funcionando!" }))
}

async fn status(State(state): State<AppState>) -> Response {
    let backend = state.relay.backend();
    match backend.models().await {
        Ok(models) => Json(json!({
            "status": "online",
            "backend": backend.endpoint(),
            "model": state.config.model,
            "models": models,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "offline",
                "backend": backend.endpoint(),
                "model": state.config.model,
                "models": [],
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn chat(State(state): State<AppState>, input: ChatInput) -> Result<Response, ApiError> {
    let question = input.question()?;
    let context = input.context(&state.files).await?;
    let request = prompt::build_request(&state.config.model, &question, context.as_deref(), true);

    let (events, session) = state.relay.start(request);

    if let Some(conversation_id) = input.fields().conversation_id {
        let store = state.store.clone();
        tokio::spawn(async move {
            match session.await {
                Ok(RelayOutcome::Done { text, .. }) => {
                    if let Err(e) = store::record_exchange(store.as_ref(), conversation_id, &question, &text).await {
                        tracing::warn!(conversation_id, error = %e, "failed to record exchange");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "relay task aborted"),
            }
        });
    }

    Ok(sse::stream_response(events))
}

async fn chat_sync(State(state): State<AppState>, input: ChatInput) -> Result<Json<serde_json::Value>, ApiError> {
    let question = input.question()?;
    let context = input.context(&state.files).await?;
    let request = prompt::build_request(&state.config.model, &question, context.as_deref(), false);

    let answer = state.relay.backend().complete(&request).await?;
    tracing::info!(chars = answer.chars().count(), "sync answer sent");

    if let Some(conversation_id) = input.fields().conversation_id {
        if let Err(e) = store::record_exchange(state.store.as_ref(), conversation_id, &question, &answer).await {
            tracing::warn!(conversation_id, error = %e, "failed to record exchange");
        }
    }

    Ok(Json(json!({ "resposta": answer })))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<serde_json::Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let path = state.files.save(&name, &bytes).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        return Ok(Json(json!({
            "filename": filename,
            "path": path.to_string_lossy(),
            "size": bytes.len(),
        })));
    }

    Err(ApiError::BadRequest("campo 'file' ausente".to_string()))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let files = state.files.list().await?;
    Ok(Json(json!(files)))
}

#[derive(Debug, Default, Deserialize)]
struct TitleBody {
    #[serde(default)]
    title: Option<String>,
}

async fn list_conversations(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let conversations = state.store.list().await?;
    Ok(Json(json!(conversations)))
}

async fn create_conversation(
    State(state): State<AppState>,
    body: Option<Json<TitleBody>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let title = body
        .and_then(|Json(b)| b.title)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let conversation = state.store.create(&title).await?;
    Ok((StatusCode::CREATED, Json(json!(conversation))))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.store.get(id).await? {
        Some(conversation) => Ok(Json(json!(conversation))),
        None => Err(ApiError::ConversationNotFound(id)),
    }
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<TitleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let title = body
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("título não pode estar vazio".to_string()))?;
    let conversation = state.store.rename(id, &title).await?;
    Ok(Json(json!(conversation)))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let messages = state.store.messages(id).await?;
    Ok(Json(json!(messages)))
}
