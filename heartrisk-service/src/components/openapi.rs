use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{chat::ChatOpenApi, predict::PredictOpenApi};
use crate::server::{HealthOpenApi, MetricsOpenApi, RootOpenApi};

pub const SWAGGER_UI_PATH: &str = "/swagger-ui";
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// Serves the Swagger UI and the OpenAPI document of every public endpoint.
pub fn openapi_routes() -> Router {
    #[derive(OpenApi)]
    #[openapi(
        info(
            title = "Heart Risk Service",
            description = "Heart disease prediction and heart health assistant"
        ),
        tags(
            (name = "health", description = "Health check"),
            (name = "metrics", description = "Metrics"),
            (name = "predict", description = "Heart disease prediction"),
            (name = "chat", description = "Heart health assistant"),
        ),
        servers(
            (url = "http://localhost:8000"),
        )
    )]
    struct ApiDoc;

    let openapi = ApiDoc::openapi()
        .merge_from(RootOpenApi::openapi())
        .merge_from(HealthOpenApi::openapi())
        .merge_from(MetricsOpenApi::openapi())
        .merge_from(PredictOpenApi::openapi())
        .merge_from(ChatOpenApi::openapi());

    Router::new().merge(SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, openapi))
}
