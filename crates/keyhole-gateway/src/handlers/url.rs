use crate::error::{AppError, Result};
use crate::extract::Owner;
use crate::model::{BatchRequestItem, BatchResponseItem, ShortenRequest, ShortenResponse};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use keyhole_core::{ShortCode, Shortened};

fn status_of(shortened: &Shortened) -> StatusCode {
    if shortened.already_existed() {
        StatusCode::CONFLICT
    } else {
        StatusCode::CREATED
    }
}

/// `POST /` with the URL as a plain text body.
pub async fn shorten_text_handler(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Bytes,
) -> Result<(StatusCode, String)> {
    let url = std::str::from_utf8(&body)
        .map_err(|e| AppError::BadRequest(e.to_string()))?
        .trim();

    let shortened = state.shortener().shorten(url, &owner).await?;
    Ok((status_of(&shortened), state.short_url(shortened.code())))
}

pub async fn shorten_json_handler(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Bytes,
) -> Result<(StatusCode, Json<ShortenResponse>)> {
    let request: ShortenRequest = serde_json::from_slice(&body)?;

    let shortened = state.shortener().shorten(request.url.trim(), &owner).await?;
    let response = ShortenResponse {
        result: state.short_url(shortened.code()),
    };
    Ok((status_of(&shortened), Json(response)))
}

pub async fn shorten_batch_handler(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Bytes,
) -> Result<(StatusCode, Json<Vec<BatchResponseItem>>)> {
    let batch: Vec<BatchRequestItem> = serde_json::from_slice(&body)?;
    let urls: Vec<String> = batch
        .iter()
        .map(|item| item.original_url.trim().to_string())
        .collect();

    let codes = state.shortener().shorten_batch(&urls, &owner).await?;
    let response = batch
        .into_iter()
        .zip(codes)
        .map(|(item, code)| BatchResponseItem {
            correlation_id: item.correlation_id,
            short_url: state.short_url(&code),
        })
        .collect();
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /{code}`: 307 to the original URL, 410 when unknown or deleted.
pub async fn redirect_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response> {
    let code = ShortCode::new(code)?;

    match state.shortener().resolve(&code).await {
        Some(url) => {
            Ok((StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, url)]).into_response())
        }
        None => Ok(StatusCode::GONE.into_response()),
    }
}

pub async fn fallback_handler() -> StatusCode {
    StatusCode::BAD_REQUEST
}
