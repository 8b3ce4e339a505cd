//! HTTP routes over the [`Controller`].
//!
//! Successful calls answer `{"data": ..}`, failures `{"error": ..}` with a
//! status derived from the error.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mdp_core::{ConfigDocument, ConfigError, ConfigKind};
use mdp_runtime::Controller;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const SUCCESSFUL: &str = "SUCCESSFUL";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing query parameter configType")]
    MissingConfigType,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingConfigType => StatusCode::BAD_REQUEST,
            Self::Config(ConfigError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Config(ConfigError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        warn!(status = status.as_u16(), error = %self, "request failed");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfigTypeQuery {
    #[serde(rename = "configType")]
    config_type: Option<String>,
}

impl ConfigTypeQuery {
    fn kind(&self) -> Result<ConfigKind, ApiError> {
        match self.config_type.as_deref() {
            None | Some("") => Err(ApiError::MissingConfigType),
            Some(s) => Ok(s.parse()?),
        }
    }
}

#[derive(Debug, Serialize)]
struct Data<T> {
    data: T,
}

fn data<T: Serialize>(value: T) -> Json<Data<T>> {
    Json(Data { data: value })
}

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/updateConfiguration", post(update_configuration))
        .route("/loadConfiguration", get(load_configuration))
        .route("/refreshConfiguration", post(refresh_configuration))
        .route("/health", get(health))
        .route("/workers", get(workers))
        .with_state(controller)
}

async fn update_configuration(
    State(controller): State<Arc<Controller>>,
    Query(query): Query<ConfigTypeQuery>,
    Json(doc): Json<ConfigDocument>,
) -> Result<Json<Data<&'static str>>, ApiError> {
    let kind = query.kind()?;
    controller.update_configuration(kind, &doc).await?;
    info!(kind = %kind, "configuration updated");
    Ok(data(SUCCESSFUL))
}

async fn load_configuration(
    State(controller): State<Arc<Controller>>,
    Query(query): Query<ConfigTypeQuery>,
) -> Result<Json<Data<ConfigDocument>>, ApiError> {
    let kind = query.kind()?;
    Ok(data(controller.load_configuration(kind).await?))
}

async fn refresh_configuration(
    State(controller): State<Arc<Controller>>,
    Query(query): Query<ConfigTypeQuery>,
) -> Result<Json<Data<&'static str>>, ApiError> {
    let kind = query.kind()?;
    controller.refresh_configuration(kind).await?;
    info!(kind = %kind, "configuration refreshed");
    Ok(data(SUCCESSFUL))
}

async fn health(State(controller): State<Arc<Controller>>) -> Json<Data<&'static str>> {
    data(controller.health())
}

async fn workers(State(controller): State<Arc<Controller>>) -> Json<Data<Vec<String>>> {
    data(controller.workers().names())
}
