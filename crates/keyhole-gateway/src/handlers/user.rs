use crate::error::{AppError, Result};
use crate::extract::Owner;
use crate::model::UserUrl;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keyhole_core::ShortCode;
use tracing::{debug, error, info};

pub async fn list_user_urls_handler(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Response> {
    if owner.is_anonymous() {
        return Err(AppError::Unauthorized);
    }

    let records = state.shortener().list_owned(&owner).await?;
    if records.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let urls: Vec<UserUrl> = records
        .into_iter()
        .map(|record| UserUrl {
            short_url: state.short_url(&record.short_code),
            original_url: record.original_url,
        })
        .collect();
    Ok(Json(urls).into_response())
}

/// Accepts a JSON array of short codes and deletes them in the background.
/// The task is tracked so that shutdown waits for it.
pub async fn delete_user_urls_handler(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Bytes,
) -> Result<StatusCode> {
    if owner.is_anonymous() {
        return Err(AppError::Unauthorized);
    }

    let requested: Vec<String> = serde_json::from_slice(&body)?;
    let codes: Vec<ShortCode> = requested
        .into_iter()
        .filter_map(|code| match ShortCode::new(code) {
            Ok(code) => Some(code),
            Err(e) => {
                debug!(error = %e, "skipping malformed short code");
                None
            }
        })
        .collect();

    let shortener = state.shortener().clone();
    state.background().spawn(async move {
        match shortener.delete_owned(&owner, &codes).await {
            Ok(deleted) => info!(owner = %owner, deleted, "background delete finished"),
            Err(e) => error!(owner = %owner, error = %e, "background delete failed"),
        }
    });

    Ok(StatusCode::ACCEPTED)
}
