//! HTTP surface: WebSocket upgrade routes, health check, API docs.

pub mod health;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document for the HTTP endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "tablecast",
        description = "Real-time relay of database row changes over WebSocket."
    ),
    paths(health::health_handler),
    components(schemas(health::HealthResponse)),
    tags((name = "System", description = "Service status"))
)]
pub struct ApiDoc;

/// Builds the complete router: WebSocket on `/` and `/ws`, `/health`, and
/// Swagger UI when the `swagger-ui` feature is on.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .merge(health::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_health() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
