pub mod health;
pub mod spaces;

use crate::{api_docs::ApiDoc, state::AppState};
use axum::{routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(spaces::routes())
        .route("/api-docs/openapi.json", get(openapi_spec))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
