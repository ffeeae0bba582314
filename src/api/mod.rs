// HTTP surface for the authentication gate

use axum::{
    Extension, Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthError, AuthExtractor, AuthenticatedIdentity};
use crate::filter::{OperationKind, OwnershipFilterer};

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<AuthExtractor>,
    pub filterer: OwnershipFilterer,
}

impl AppState {
    pub fn new(extractor: Arc<AuthExtractor>) -> Self {
        Self {
            extractor,
            filterer: OwnershipFilterer::new(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status_code(),
            Json(json!({ "detail": self.detail() })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

/// Middleware that authenticates the request and stores the
/// [`AuthenticatedIdentity`] in its extensions.
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let authorization = match request.headers().get(header::AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AuthError::InvalidHeaderFormat)?
                .to_string(),
        ),
        None => None,
    };

    let identity = state
        .extractor
        .extract_identity(authorization.as_deref())
        .await?;
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/whoami", get(whoami))
        .route("/authorize/{operation}", post(authorize))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn whoami(Extension(identity): Extension<AuthenticatedIdentity>) -> Json<AuthenticatedIdentity> {
    Json(identity)
}

async fn authorize(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthenticatedIdentity>,
    Path(operation): Path<String>,
    Json(mut payload): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let operation: OperationKind = operation.parse().map_err(|_| StatusCode::NOT_FOUND)?;

    let filter = state
        .filterer
        .authorize_operation(&identity, operation, &mut payload);

    Ok(Json(json!({
        "operation": operation,
        "filter": filter,
        "payload": payload
    })))
}
