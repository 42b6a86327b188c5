//! Knowledge base REST server.
//!
//! Every `/api/knowledge-bases` route requires an authenticated caller
//! (see [`AuthUser`]) and scopes its lookups to that user.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/api/knowledge-bases` | Caller's knowledge bases, newest first, with conversation previews |
//! | `POST`   | `/api/knowledge-bases` | Create a knowledge base |
//! | `PATCH`  | `/api/knowledge-bases/{id}` | Update name and/or description |
//! | `DELETE` | `/api/knowledge-bases/{id}` | Delete one of the caller's knowledge bases |
//! | `GET`    | `/api/knowledge-bases/{idOrSlug}/conversations` | Cursor-paginated member conversations |
//! | `POST`   | `/api/knowledge-bases/{idOrSlug}/addConversation` | Add a conversation |
//! | `POST`   | `/api/knowledge-bases/{idOrSlug}/removeConversation` | Remove a conversation |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Knowledge base not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `conflict` (409), `internal` (500). Internal errors carry the failing
//! operation and the underlying message.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use knowledge_hub_core::models::{KnowledgeBase, KnowledgeBaseListing, NewKnowledgeBase};
use knowledge_hub_core::pagination::{ConversationPage, CursorQuery};
use knowledge_hub_core::store::{ConversationLister, KnowledgeBaseStore};
use knowledge_hub_core::{IdRef, ObjectId, StoreError};

use crate::auth::{AuthUser, TokenIssuer};
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub knowledge_bases: Arc<dyn KnowledgeBaseStore>,
    pub conversations: Arc<dyn ConversationLister>,
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    pub fn new(
        config: Config,
        knowledge_bases: Arc<dyn KnowledgeBaseStore>,
        conversations: Arc<dyn ConversationLister>,
    ) -> anyhow::Result<Self> {
        let tokens = TokenIssuer::new(config.jwt_secret()?, config.auth.token_ttl_secs);
        Ok(Self {
            config: Arc::new(config),
            knowledge_bases,
            conversations,
            tokens: Arc::new(tokens),
        })
    }
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let knowledge_bases = Router::new()
        .route("/", get(handle_list).post(handle_create))
        .route("/{id}", patch(handle_update).delete(handle_delete))
        .route("/{id}/conversations", get(handle_conversations))
        .route("/{id}/addConversation", post(handle_add_conversation))
        .route("/{id}/removeConversation", post(handle_remove_conversation));

    Router::new()
        .nest("/api/knowledge-bases", knowledge_bases)
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the server on the address configured in `[server].bind`.
///
/// Applies migrations first, then serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let store = Arc::new(
        SqliteStore::new(pool)
            .with_page_limits(config.pagination.default_limit, config.pagination.max_limit),
    );
    let state = AppState::new(config.clone(), store.clone(), store)?;

    let listener = TcpListener::bind(&config.server.bind).await?;
    serve(listener, state).await
}

/// Serves the router on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "knowledge hub listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Maps a store failure to a 500, prefixed with the failed operation.
    fn from_store(context: &str, err: StoreError) -> Self {
        Self::internal(format!("{}: {}", context, err))
    }

    /// Create is the one route that reports conflicts and bad input.
    fn from_create(context: &str, err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => Self::conflict("Name already exists"),
            StoreError::Validation(msg) => Self::bad_request(msg),
            other => Self::from_store(context, other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

const KB_NOT_FOUND: &str = "Knowledge base not found";

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /{idOrSlug}/conversations ============

#[derive(Debug, Deserialize)]
struct ConversationsQuery {
    cursor: Option<String>,
    limit: Option<String>,
}

/// Integer prefix of `raw`, like a lenient `parseInt`; `None` when there is none.
fn parse_limit(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

async fn handle_conversations(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id_or_slug): Path<String>,
    Query(query): Query<ConversationsQuery>,
) -> Result<Json<ConversationPage>, AppError> {
    const CONTEXT: &str = "Failed to retrieve knowledge base conversations";

    let kb = state
        .knowledge_bases
        .find_for_user(&user.id, &id_or_slug)
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?
        .ok_or_else(|| AppError::not_found(KB_NOT_FOUND))?;

    let page = state
        .conversations
        .list_by_cursor(
            &user.id,
            CursorQuery {
                cursor: query.cursor.filter(|c| !c.is_empty()),
                limit: query.limit.as_deref().and_then(parse_limit),
                conversation_ids: Some(kb.conversation_ids),
            },
        )
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?;

    Ok(Json(page))
}

// ============ GET / ============

async fn handle_list(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<KnowledgeBaseListing>>, AppError> {
    let listings = state
        .knowledge_bases
        .list_for_user(&user.id, state.config.knowledge_bases.preview_limit)
        .await
        .map_err(|e| AppError::from_store("Failed to retrieve knowledge bases", e))?;
    Ok(Json(listings))
}

// ============ POST / ============

#[derive(Debug, Deserialize)]
struct CreateBody {
    /// Kept untyped so a non-string name is a 400, not a body rejection.
    name: Option<serde_json::Value>,
    description: Option<String>,
    slug: Option<String>,
}

async fn handle_create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<KnowledgeBase>), AppError> {
    let name = match body.name {
        Some(serde_json::Value::String(name)) if !name.trim().is_empty() => {
            name.trim().to_string()
        }
        _ => return Err(AppError::bad_request("Name is required")),
    };

    let mut data = NewKnowledgeBase::new(user.id, name);
    data.description = body.description;
    data.slug = body.slug;

    let kb = state
        .knowledge_bases
        .create(data)
        .await
        .map_err(|e| AppError::from_create("Failed to create knowledge base", e))?;

    tracing::info!(kb = %kb.id, user = %user.id, "knowledge base created");
    Ok((StatusCode::CREATED, Json(kb)))
}

// ============ PATCH /{id} ============

#[derive(Debug, Deserialize)]
struct UpdateBody {
    name: Option<String>,
    description: Option<String>,
}

/// Applies the name update, then the description update.
///
/// The two writes are sequential; a failing description update leaves the
/// new name in place. The response is the document after the last write.
async fn handle_update(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<Option<KnowledgeBase>>, AppError> {
    const CONTEXT: &str = "Failed to update knowledge base";

    let mut kb = None;
    if let Some(name) = body.name.as_deref() {
        kb = state
            .knowledge_bases
            .update_name(IdRef::from(&id), name)
            .await
            .map_err(|e| AppError::from_store(CONTEXT, e))?;
    }
    if let Some(description) = body.description.as_deref() {
        kb = state
            .knowledge_bases
            .update_description(IdRef::from(&id), description)
            .await
            .map_err(|e| AppError::from_store(CONTEXT, e))?;
    }
    Ok(Json(kb))
}

// ============ DELETE /{id} ============

/// Deletes the knowledge base when it belongs to the caller.
///
/// Ids that are absent or owned by someone else both answer `null`.
async fn handle_delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Option<KnowledgeBase>>, AppError> {
    const CONTEXT: &str = "Failed to delete knowledge base";

    let kb_id: ObjectId = IdRef::from(&id)
        .resolve()
        .map_err(|e| AppError::from_store(CONTEXT, e))?;

    let owned = state
        .knowledge_bases
        .find_for_user(&user.id, &kb_id.to_string())
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?;
    if owned.is_none() {
        return Ok(Json(None));
    }

    let deleted = state
        .knowledge_bases
        .delete_by_id(kb_id.into())
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?;
    Ok(Json(deleted))
}

// ============ POST /{idOrSlug}/addConversation, /removeConversation ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipBody {
    conversation_id: Option<String>,
}

async fn handle_add_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id_or_slug): Path<String>,
    Json(body): Json<MembershipBody>,
) -> Result<(StatusCode, Json<Option<KnowledgeBase>>), AppError> {
    const CONTEXT: &str = "Failed to add conversation to knowledge base";

    let conversation_id = body
        .conversation_id
        .ok_or_else(|| AppError::bad_request("conversationId is required"))?;
    let kb = state
        .knowledge_bases
        .find_for_user(&user.id, &id_or_slug)
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?
        .ok_or_else(|| AppError::not_found(KB_NOT_FOUND))?;

    let updated = state
        .knowledge_bases
        .add_conversation(kb.id.into(), conversation_id.into())
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?;
    Ok((StatusCode::CREATED, Json(updated)))
}

async fn handle_remove_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id_or_slug): Path<String>,
    Json(body): Json<MembershipBody>,
) -> Result<Json<Option<KnowledgeBase>>, AppError> {
    const CONTEXT: &str = "Failed to remove conversation from knowledge base";

    let conversation_id = body
        .conversation_id
        .ok_or_else(|| AppError::bad_request("conversationId is required"))?;
    let kb = state
        .knowledge_bases
        .find_for_user(&user.id, &id_or_slug)
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?
        .ok_or_else(|| AppError::not_found(KB_NOT_FOUND))?;

    let updated = state
        .knowledge_bases
        .remove_conversation(kb.id.into(), conversation_id.into())
        .await
        .map_err(|e| AppError::from_store(CONTEXT, e))?;
    Ok(Json(updated))
}
