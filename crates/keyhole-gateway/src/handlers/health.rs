use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::error;

pub async fn ping_handler(State(state): State<AppState>) -> StatusCode {
    match state.shortener().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(error = %e, "storage ping failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
