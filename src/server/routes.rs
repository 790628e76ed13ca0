//! HTTP route handlers for the graph memory API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::core::ids::GroupId;
use crate::memory::engine::GraphMemory;
use crate::memory::retrieval::hybrid_search::HybridSearchResult;
use crate::memory::tools::registry::{ToolDefinition, dispatch, tool_definitions};

use super::state::AppState;

/// Default number of search results.
const DEFAULT_SEARCH_LIMIT: usize = 10;

type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/memory/extract", post(extract))
        .route("/api/memory/search", post(search))
        .route("/api/memory/tools", get(list_tools))
        .route("/api/memory/tools/{name}", post(call_tool))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (memory, graph) = match &state.memory {
        Some(memory) if memory.graph().is_connected() => ("enabled", "connected"),
        Some(_) => ("enabled", "unavailable"),
        None => ("disabled", "unavailable"),
    };
    Json(serde_json::json!({
        "status": "ok",
        "service": "graph-memory",
        "version": env!("CARGO_PKG_VERSION"),
        "graph_memory": memory,
        "graph_store": graph
    }))
}

fn memory(state: &AppState) -> Result<&GraphMemory, ApiError> {
    state.memory.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "graph memory is disabled".to_string(),
    ))
}

fn group(state: &AppState, requested: Option<&str>) -> Result<GroupId, ApiError> {
    match requested {
        Some(raw) => GroupId::new(raw)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid group_id: {e}"))),
        None => Ok(state.default_group.clone()),
    }
}

/// Extraction request.
#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    /// Text to extract from.
    pub content: String,
    /// Prior turns used to resolve references.
    #[serde(default)]
    pub context: String,
    /// Partition; the default one when absent.
    pub group_id: Option<String>,
}

/// Extraction response.
#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    /// Pipeline status line.
    pub status: String,
}

/// Run the extraction pipeline.
async fn extract(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let memory = memory(&state)?;
    let group = group(&state, request.group_id.as_deref())?;
    let status = memory
        .extract_and_save_to_graph(&group, &request.content, &request.context)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Extraction failed: {e}")))?;
    Ok(Json(ExtractResponse { status }))
}

/// Hybrid search request.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// Query text.
    pub query: String,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Rerank candidates.
    #[serde(default)]
    pub use_reranking: bool,
    /// Use the vector index; the configured default when absent.
    pub use_vector_index: Option<bool>,
    /// Point-in-time for the graph branch.
    pub as_of: Option<DateTime<Utc>>,
    /// Partition; the default one when absent.
    pub group_id: Option<String>,
}

/// Hybrid search response.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// Results, best first.
    pub results: Vec<HybridSearchResult>,
    /// Number of results.
    pub count: usize,
}

/// Run a hybrid search.
async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let memory = memory(&state)?;
    let group = group(&state, request.group_id.as_deref())?;

    let mut query = memory.search_request(request.query, request.limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
    query.use_reranking = request.use_reranking;
    query.as_of = request.as_of;
    if let Some(use_index) = request.use_vector_index {
        query.use_vector_index = use_index;
    }

    let results = memory.hybrid_search(&group, &query).await;
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}

/// List the memory tools.
async fn list_tools() -> Json<Vec<ToolDefinition>> {
    Json(tool_definitions())
}

/// Tool call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
    /// Partition; the default one when absent.
    pub group_id: Option<String>,
}

/// Tool call response.
#[derive(Debug, Serialize)]
pub struct ToolCallResponse {
    /// Tool name.
    pub tool: String,
    /// Status text returned by the tool.
    pub result: String,
}

/// Call one memory tool.
async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<ToolCallRequest>,
) -> Result<Json<ToolCallResponse>, ApiError> {
    let memory = memory(&state)?;
    let group = group(&state, request.group_id.as_deref())?;
    let result = dispatch(memory.tools(), &group, &name, request.arguments).await;
    Ok(Json(ToolCallResponse { tool: name, result }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::memory::core::config::GraphMemoryConfig;
    use crate::memory::core::entity_types::EntityTypeRegistry;
    use crate::memory::engine::GraphMemoryParts;
    use crate::memory::ingest::prompts;
    use crate::memory::storage::graph_store::GraphConnection;
    use crate::memory::testing::{HashEmbedder, ScriptedModel, TEST_DIMS, memory_store, test_group};

    async fn app(model: Arc<ScriptedModel>) -> Router {
        let mut config = GraphMemoryConfig::default();
        config.embedding.ndims = TEST_DIMS;
        let parts = GraphMemoryParts {
            graph: GraphConnection::connected(memory_store().await),
            model,
            embedder: Arc::new(HashEmbedder::new(TEST_DIMS)),
            reranker: None,
            entity_types: Arc::new(EntityTypeRegistry::builtin().unwrap()),
        };
        let memory = GraphMemory::new(config, parts).unwrap();
        create_router(AppState::with_memory(Some(memory), test_group()))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_connected_store() {
        let app = app(Arc::new(ScriptedModel::new())).await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["graph_store"], "connected");
    }

    #[tokio::test]
    async fn disabled_memory_is_unavailable() {
        let app = create_router(AppState::with_memory(None, test_group()));
        let response = app
            .oneshot(post_json("/api/memory/search", &serde_json::json!({"query": "x"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn extract_then_search() {
        let model = Arc::new(ScriptedModel::new());
        model.push(
            prompts::EXTRACT_ENTITIES_SYSTEM,
            r#"{"extracted_entities": [{"name": "Alice", "entity_type_id": 1}, {"name": "Rust", "entity_type_id": 4}]}"#,
        );
        model.push(
            prompts::EXTRACT_EDGES_SYSTEM,
            r#"{"edges": [{"source_entity_id": 1, "target_entity_id": 2, "relation_type": "USES", "fact": "Alice uses Rust"}]}"#,
        );
        let app = app(model).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/memory/extract",
                &serde_json::json!({"content": "Alice uses Rust"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["status"].as_str().unwrap().starts_with("Added 2 entities and 1 relationships"));

        let response = app
            .oneshot(post_json(
                "/api/memory/search",
                &serde_json::json!({"query": "Alice", "limit": 5}),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert!(body["count"].as_u64().unwrap() >= 1);
        assert_eq!(body["results"][0]["name"], "Alice");
    }

    #[tokio::test]
    async fn tools_are_listed_and_callable() {
        let app = app(Arc::new(ScriptedModel::new())).await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/memory/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body.as_array().unwrap().len(), 5);

        let response = app
            .oneshot(post_json(
                "/api/memory/tools/add_memory_link",
                &serde_json::json!({"arguments": {"from": "A", "relation": "uses", "to": "B"}}),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["result"], "Added fact: A -[uses]-> B");
    }

    #[tokio::test]
    async fn invalid_group_is_rejected() {
        let app = app(Arc::new(ScriptedModel::new())).await;
        let response = app
            .oneshot(post_json(
                "/api/memory/search",
                &serde_json::json!({"query": "x", "group_id": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
