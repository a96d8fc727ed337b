use crate::shortener::v1::{GetStatsResponse, ResolveRequest};
use keyhole_core as core;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("short code is required")]
    MissingCode,
    #[error("short code is malformed: {0}")]
    MalformedCode(String),
}

impl TryFrom<&ResolveRequest> for core::ShortCode {
    type Error = ConversionError;

    fn try_from(request: &ResolveRequest) -> Result<Self, Self::Error> {
        let code = request.short_code.trim();
        if code.is_empty() {
            return Err(ConversionError::MissingCode);
        }
        core::ShortCode::new(code).map_err(|e| ConversionError::MalformedCode(e.to_string()))
    }
}

impl From<core::Stats> for GetStatsResponse {
    fn from(stats: core::Stats) -> Self {
        Self {
            urls: stats.urls as u64,
            users: stats.users as u64,
        }
    }
}
