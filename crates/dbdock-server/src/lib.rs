use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use dbdock_common::ProvisionError;
use dbdock_core::{resolver, CreateRequest, LifecycleController, PortAllocator, UpdateRequest};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod types;
pub use types::{
    CreateDatabaseRequest, DatabaseResponse, StatusQuery, StatusUpdateResponse,
    UpdateDatabaseRequest,
};

#[cfg(test)]
mod tests;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
    /// Externally reachable address interpolated into connection URLs.
    pub public_host: String,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/databases", post(create_database))
        .route("/databases", get(list_databases))
        .route("/databases/:name", get(get_database))
        .route("/databases/:name", delete(delete_database))
        .route("/databases/:name/update", put(update_database))
        .route("/databases/:name/status", put(update_database_status))
        .route("/get-free-ports/:internal_port", get(get_free_ports))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wraps the core taxonomy so every handler can use `?` and still produce
/// the `{"detail": ...}` JSON bodies clients expect.
pub struct ApiError(ProvisionError);

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProvisionError::Validation(_) => StatusCode::BAD_REQUEST,
            ProvisionError::NotFound(_) => StatusCode::NOT_FOUND,
            ProvisionError::NameConflict(_)
            | ProvisionError::PortConflict(_)
            | ProvisionError::InvalidState { .. } => StatusCode::CONFLICT,
            ProvisionError::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
            ProvisionError::Runtime(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

fn respond(state: &AppState, instance: dbdock_common::Instance) -> DatabaseResponse {
    // Resolution fails only for instances missing mandatory credentials;
    // those still get their record back, just without a URL.
    let connection_url = resolver::resolve(&instance, &state.public_host).ok();
    DatabaseResponse {
        instance,
        connection_url,
    }
}

async fn create_database(
    State(state): State<AppState>,
    Json(req): Json<CreateDatabaseRequest>,
) -> Result<(StatusCode, Json<DatabaseResponse>), ApiError> {
    let engine = req.db_type.parse()?;
    let instance = state
        .controller
        .create(CreateRequest {
            name: req.name,
            engine,
            user_port: req.user_port,
            internal_port: req.internal_port,
            env_vars: req.env_vars,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(respond(&state, instance))))
}

async fn list_databases(State(state): State<AppState>) -> Json<Vec<DatabaseResponse>> {
    let databases = state
        .controller
        .list()
        .into_iter()
        .map(|instance| respond(&state, instance))
        .collect();
    Json(databases)
}

async fn get_database(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DatabaseResponse>, ApiError> {
    let instance = state.controller.get(&name)?;
    Ok(Json(respond(&state, instance)))
}

async fn update_database(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateDatabaseRequest>,
) -> Result<Json<DatabaseResponse>, ApiError> {
    let instance = state
        .controller
        .update(
            &name,
            UpdateRequest {
                new_env_vars: req.new_env_vars,
                new_user_port: req.new_user_port,
                new_internal_port: req.new_internal_port,
            },
        )
        .await?;
    Ok(Json(respond(&state, instance)))
}

async fn update_database_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusUpdateResponse>, ApiError> {
    match query.new_status.to_ascii_lowercase().as_str() {
        "running" => {
            let instance = state.controller.start(&name).await?;
            Ok(Json(StatusUpdateResponse {
                database: respond(&state, instance),
                runtime_error: None,
            }))
        }
        "stopped" => {
            let outcome = state.controller.stop(&name).await?;
            Ok(Json(StatusUpdateResponse {
                database: respond(&state, outcome.instance),
                runtime_error: outcome.runtime_error,
            }))
        }
        other => Err(ApiError(ProvisionError::Validation(format!(
            "invalid status {other:?}: use 'running' or 'stopped'"
        )))),
    }
}

async fn delete_database(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.controller.delete(&name).await?;
    Ok(Json(json!({ "message": "Database deleted", "name": name })))
}

async fn get_free_ports(
    State(state): State<AppState>,
    Path(internal_port): Path<u16>,
) -> Json<Vec<u16>> {
    Json(
        state
            .controller
            .free_ports(internal_port, PortAllocator::DEFAULT_COUNT),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
