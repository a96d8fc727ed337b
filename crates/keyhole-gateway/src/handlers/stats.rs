use crate::error::{AppError, Result};
use crate::extract::ClientIp;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use keyhole_core::Stats;
use tracing::warn;

/// Aggregate counters, served only to clients inside the trusted subnet.
pub async fn stats_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<Stats>> {
    let trusted = match (state.trusted_subnet(), ip) {
        (Some(subnet), Some(ip)) => subnet.contains(ip),
        _ => false,
    };
    if !trusted {
        warn!(client_ip = ?ip, "stats requested from untrusted client");
        return Err(AppError::Forbidden);
    }

    let stats = state.shortener().stats().await?;
    Ok(Json(stats))
}
