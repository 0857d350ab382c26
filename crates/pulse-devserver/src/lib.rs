//! Development stand-in for the pulse remote service.
//!
//! Serves the selections, datasets and content-block endpoints from in-memory
//! tables seeded by a [`Fixture`]. Faults can be injected at runtime (through
//! [`DevState::update_faults`] or `PUT /_dev/faults`) to exercise the client's
//! fallback and partial-failure paths.

pub mod fixture;
pub mod state;

pub use fixture::Fixture;
pub use state::{BlockFilter, DevState, Faults};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use pulse_core::SelectionKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const DEFAULT_DATASET_LIMIT: usize = 1000;
const DEFAULT_BLOCK_LIMIT: usize = 500;

/// Build the service router over `state`.
pub fn router(state: Arc<DevState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/selections/all", get(all_selections))
        .route(
            "/selections",
            get(scoped_selections)
                .post(create_selection)
                .delete(delete_selection),
        )
        .route("/datasets", get(list_datasets))
        .route("/questions/blocks", get(list_blocks))
        .route("/_dev/faults", get(get_faults).put(put_faults))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server and run until it fails.
///
/// # Errors
/// Returns error if binding fails or server encounters an error.
pub async fn serve(state: Arc<DevState>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    info!(address = %addr, "Starting dev server");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Serve on an ephemeral loopback port in a background task.
///
/// # Errors
/// Returns error if no port can be bound.
pub async fn spawn(state: Arc<DevState>) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(state);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Dev server stopped");
        }
    });

    debug!(address = %addr, "Spawned dev server");
    Ok(addr)
}

// --- Request/Response types ---

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ScopedQuery {
    user_id: String,
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
struct SelectionQuery {
    user_id: String,
    dataset_id: String,
    question_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateSelectionRequest {
    #[serde(alias = "userId")]
    user_id: String,
    #[serde(alias = "datasetId")]
    dataset_id: String,
    #[serde(alias = "questionId")]
    question_id: String,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_dataset_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct BlocksQuery {
    dataset_id: Option<String>,
    #[serde(default = "default_block_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    search: Option<String>,
}

const fn default_dataset_limit() -> usize {
    DEFAULT_DATASET_LIMIT
}

const fn default_block_limit() -> usize {
    DEFAULT_BLOCK_LIMIT
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Handlers ---

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn all_selections(
    State(state): State<Arc<DevState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<Value>>, AppError> {
    if state.faults().fast_path_disabled {
        return Err(AppError::new(StatusCode::NOT_FOUND, "not found"));
    }
    Ok(Json(state.all_selections(&q.user_id)))
}

async fn scoped_selections(
    State(state): State<Arc<DevState>>,
    Query(q): Query<ScopedQuery>,
) -> Result<Json<Vec<Value>>, AppError> {
    fail_if_injected(&state, &q.dataset_id)?;
    Ok(Json(state.scoped_selections(&q.user_id, &q.dataset_id)))
}

async fn create_selection(
    State(state): State<Arc<DevState>>,
    Json(req): Json<CreateSelectionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let key = parse_key(&req.user_id, &req.dataset_id, &req.question_id)?;
    let (inserted, row) = state.create_selection(req.user_id.trim(), &key);
    debug!(key = %key, inserted, "Create selection");

    let status = if inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(row)))
}

async fn delete_selection(
    State(state): State<Arc<DevState>>,
    Query(q): Query<SelectionQuery>,
) -> Result<StatusCode, AppError> {
    let key = parse_key(&q.user_id, &q.dataset_id, &q.question_id)?;
    if state.faults().failing_deletes.contains(&key) {
        return Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("injected delete failure for {key}"),
        ));
    }

    let existed = state.delete_selection(q.user_id.trim(), &key);
    debug!(key = %key, existed, "Delete selection");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_datasets(
    State(state): State<Arc<DevState>>,
    Query(q): Query<PageQuery>,
) -> Json<Value> {
    Json(state.datasets(q.limit, q.offset))
}

async fn list_blocks(
    State(state): State<Arc<DevState>>,
    Query(q): Query<BlocksQuery>,
) -> Result<Json<Value>, AppError> {
    if let Some(dataset_id) = &q.dataset_id {
        fail_if_injected(&state, dataset_id)?;
    }

    let filter = BlockFilter {
        dataset_id: q.dataset_id,
        search: q.search,
        limit: q.limit,
        offset: q.offset,
    };
    Ok(Json(state.blocks(&filter)?))
}

async fn get_faults(State(state): State<Arc<DevState>>) -> Json<Faults> {
    Json(state.faults())
}

async fn put_faults(
    State(state): State<Arc<DevState>>,
    Json(faults): Json<Faults>,
) -> Json<Faults> {
    info!(?faults, "Updating injected faults");
    state.set_faults(faults.clone());
    Json(faults)
}

fn fail_if_injected(state: &DevState, dataset_id: &str) -> Result<(), AppError> {
    if state.faults().failing_datasets.contains(dataset_id) {
        return Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("injected failure for dataset {dataset_id}"),
        ));
    }
    Ok(())
}

fn parse_key(user_id: &str, dataset_id: &str, question_id: &str) -> Result<SelectionKey, AppError> {
    let (user_id, dataset_id, question_id) = (user_id.trim(), dataset_id.trim(), question_id.trim());
    if user_id.is_empty() || dataset_id.is_empty() || question_id.is_empty() {
        return Err(AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "user_id, dataset_id and question_id are required",
        ));
    }
    Ok(SelectionKey::new(dataset_id, question_id))
}

// --- Error handling ---

struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: anyhow::anyhow!(message.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
        });

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}
