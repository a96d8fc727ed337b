use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    delete_user_urls_handler, fallback_handler, list_user_urls_handler, ping_handler,
    redirect_handler, shorten_batch_handler, shorten_json_handler, shorten_text_handler,
    stats_handler,
};
use crate::state::AppState;

pub struct App {}

impl App {
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/", post(shorten_text_handler))
            .route("/ping", get(ping_handler))
            .route("/{code}", get(redirect_handler))
            .nest(
                "/api",
                Router::new()
                    .route("/shorten", post(shorten_json_handler))
                    .route("/shorten/batch", post(shorten_batch_handler))
                    .route(
                        "/user/urls",
                        get(list_user_urls_handler).delete(delete_user_urls_handler),
                    )
                    .route("/internal/stats", get(stats_handler)),
            )
            .fallback(fallback_handler)
            .method_not_allowed_fallback(fallback_handler)
            .layer(RequestDecompressionLayer::new())
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
