//! HTTP request handlers

use super::sse::{feed_stream, turn_stream};
use super::types::{
    BranchListResponse, BranchResponse, ChatRequest, CommitExploreRequest,
    ConversationListResponse, ConversationResponse, CreateConversationRequest, ErrorResponse,
    ExploreRequest, MergeRequest, ModelsResponse, ViewQuery,
};
use super::AppState;
use crate::engine::{EngineError, ExploreProposal, Generator, MergeOutcome, SendMessage, Storage};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router<S, G>(state: AppState<S, G>) -> Router
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    Router::new()
        // Conversations
        .route("/api/conversations", get(list_conversations::<S, G>))
        .route("/api/conversations/new", post(create_conversation::<S, G>))
        .route("/api/conversations/:id", get(view_conversation::<S, G>))
        .route("/api/conversations/:id/stream", get(stream_conversation::<S, G>))
        // Graph operations
        .route("/api/chat", post(send_chat::<S, G>))
        .route("/api/explore", post(propose_explore::<S, G>))
        .route("/api/explore/commit", post(commit_explore::<S, G>))
        .route("/api/merge", post(merge_branches::<S, G>))
        .route("/api/branches/:id/abandon", post(abandon_branch::<S, G>))
        // Model info
        .route("/api/models", get(list_models::<S, G>))
        .route("/version", get(get_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================
// Conversations
// ============================================================

async fn list_conversations<S, G>(
    State(state): State<AppState<S, G>>,
) -> Result<Json<ConversationListResponse>, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let conversations = state.engine.list_conversations().await?;
    Ok(Json(ConversationListResponse { conversations }))
}

async fn create_conversation<S, G>(
    State(state): State<AppState<S, G>>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<ConversationResponse>, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let conversation = state.engine.create_conversation(req.title.as_deref()).await?;
    Ok(Json(ConversationResponse { conversation }))
}

async fn view_conversation<S, G>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Result<Response, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let snapshot = state.engine.view(&id, query.branch.as_deref()).await?;
    Ok(Json(snapshot.view()).into_response())
}

async fn stream_conversation<S, G>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<String>,
) -> Result<Response, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    // Subscribe before reading so nothing written in between is missed
    let broadcast_rx = state.engine.subscribe(&id).await;
    let snapshot = state.engine.view(&id, None).await?;
    Ok(feed_stream(&snapshot, broadcast_rx).into_response())
}

// ============================================================
// Graph operations
// ============================================================

async fn send_chat<S, G>(
    State(state): State<AppState<S, G>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let rx = state
        .engine
        .send_message(SendMessage {
            conversation_id: req.conversation_id,
            message: req.message,
            parent_node_id: req.parent_node_id,
            branch_id: req.branch_id,
        })
        .await?;
    Ok(turn_stream(rx).into_response())
}

async fn propose_explore<S, G>(
    State(state): State<AppState<S, G>>,
    Json(req): Json<ExploreRequest>,
) -> Result<Json<ExploreProposal>, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let proposal = state
        .engine
        .propose_explore(&req.conversation_id, &req.current_node_id)
        .await?;
    Ok(Json(proposal))
}

async fn commit_explore<S, G>(
    State(state): State<AppState<S, G>>,
    Json(req): Json<CommitExploreRequest>,
) -> Result<Json<BranchListResponse>, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let branches = state
        .engine
        .commit_explore(&req.conversation_id, &req.explore_root_node_id, &req.option_ids)
        .await?;
    Ok(Json(BranchListResponse { branches }))
}

async fn merge_branches<S, G>(
    State(state): State<AppState<S, G>>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeOutcome>, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let outcome = state
        .engine
        .merge_branches(&req.conversation_id, &req.branch_ids)
        .await?;
    Ok(Json(outcome))
}

async fn abandon_branch<S, G>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<String>,
) -> Result<Json<BranchResponse>, AppError>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    let branch = state.engine.abandon_branch(&id).await?;
    Ok(Json(BranchResponse { branch }))
}

// ============================================================
// Model Info
// ============================================================

async fn list_models<S, G>(State(state): State<AppState<S, G>>) -> Json<ModelsResponse>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    Json(ModelsResponse {
        models: state.llm_registry.available_model_info(),
        default: state.llm_registry.default_model_id().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("dagchat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::Validation(_) => AppError::BadRequest(message),
            EngineError::NotFound(_) => AppError::NotFound(message),
            EngineError::UpstreamGeneration(_) => AppError::BadGateway(message),
            EngineError::Persistence(_) | EngineError::Parse(_) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
