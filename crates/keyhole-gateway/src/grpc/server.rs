use std::net::IpAddr;

use keyhole_core::{OwnerId, ShortCode};
use keyhole_proto_schema::v1 as proto;
use keyhole_proto_schema::v1::shortener_service_server::ShortenerService;
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};

use crate::extract::{REAL_IP_HEADER, USER_ID_HEADER};
use crate::grpc::GrpcError;
use crate::state::AppState;

/// Serves the shortener over gRPC with the same state as the HTTP router.
pub struct ShortenerGrpcServer {
    state: AppState,
}

impl ShortenerGrpcServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

/// The caller's owner id from the `x-user-id` metadata entry.
fn owner_of<T>(request: &Request<T>) -> OwnerId {
    let id = request
        .metadata()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    OwnerId::new(id)
}

/// `x-real-ip` if present and valid, otherwise the peer address.
fn client_ip_of<T>(request: &Request<T>) -> Option<IpAddr> {
    request
        .metadata()
        .get(REAL_IP_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok())
        .or_else(|| request.remote_addr().map(|addr| addr.ip()))
}

fn require_owner<T>(request: &Request<T>) -> Result<OwnerId, GrpcError> {
    let owner = owner_of(request);
    if owner.is_anonymous() {
        return Err(GrpcError::Unauthenticated);
    }
    Ok(owner)
}

#[tonic::async_trait]
impl ShortenerService for ShortenerGrpcServer {
    async fn shorten(
        &self,
        request: Request<proto::ShortenRequest>,
    ) -> Result<Response<proto::ShortenResponse>, Status> {
        let owner = owner_of(&request);
        let url = request.into_inner().url;

        let shortened = self
            .state
            .shortener()
            .shorten(url.trim(), &owner)
            .await
            .map_err(GrpcError::from)?;
        Ok(Response::new(proto::ShortenResponse {
            short_url: self.state.short_url(shortened.code()),
            already_existed: shortened.already_existed(),
        }))
    }

    async fn resolve(
        &self,
        request: Request<proto::ResolveRequest>,
    ) -> Result<Response<proto::ResolveResponse>, Status> {
        let code = ShortCode::try_from(request.get_ref()).map_err(GrpcError::from)?;

        match self.state.shortener().resolve(&code).await {
            Some(original_url) => Ok(Response::new(proto::ResolveResponse { original_url })),
            None => Err(GrpcError::NotFound.into()),
        }
    }

    async fn shorten_batch(
        &self,
        request: Request<proto::ShortenBatchRequest>,
    ) -> Result<Response<proto::ShortenBatchResponse>, Status> {
        let owner = owner_of(&request);
        let items = request.into_inner().items;
        let urls: Vec<String> = items
            .iter()
            .map(|item| item.original_url.trim().to_string())
            .collect();

        let codes = self
            .state
            .shortener()
            .shorten_batch(&urls, &owner)
            .await
            .map_err(GrpcError::from)?;
        let items = items
            .into_iter()
            .zip(codes)
            .map(|(item, code)| proto::BatchResult {
                correlation_id: item.correlation_id,
                short_url: self.state.short_url(&code),
            })
            .collect();
        Ok(Response::new(proto::ShortenBatchResponse { items }))
    }

    async fn list_user_urls(
        &self,
        request: Request<proto::ListUserUrlsRequest>,
    ) -> Result<Response<proto::ListUserUrlsResponse>, Status> {
        let owner = require_owner(&request)?;

        let records = self
            .state
            .shortener()
            .list_owned(&owner)
            .await
            .map_err(GrpcError::from)?;
        let urls = records
            .into_iter()
            .map(|record| proto::UserUrl {
                short_url: self.state.short_url(&record.short_code),
                original_url: record.original_url,
            })
            .collect();
        Ok(Response::new(proto::ListUserUrlsResponse { urls }))
    }

    /// Unlike the HTTP endpoint, deletes before answering and reports the
    /// count.
    async fn delete_user_urls(
        &self,
        request: Request<proto::DeleteUserUrlsRequest>,
    ) -> Result<Response<proto::DeleteUserUrlsResponse>, Status> {
        let owner = require_owner(&request)?;
        let codes: Vec<ShortCode> = request
            .into_inner()
            .short_codes
            .into_iter()
            .filter_map(|code| match ShortCode::new(code) {
                Ok(code) => Some(code),
                Err(e) => {
                    debug!(error = %e, "skipping malformed short code");
                    None
                }
            })
            .collect();

        let deleted = self
            .state
            .shortener()
            .delete_owned(&owner, &codes)
            .await
            .map_err(GrpcError::from)?;
        Ok(Response::new(proto::DeleteUserUrlsResponse {
            deleted: deleted as u64,
        }))
    }

    async fn ping(
        &self,
        _request: Request<proto::PingRequest>,
    ) -> Result<Response<proto::PingResponse>, Status> {
        match self.state.shortener().ping().await {
            Ok(()) => Ok(Response::new(proto::PingResponse {})),
            Err(e) => {
                error!(error = %e, "storage ping failed");
                Err(Status::unavailable("storage unavailable"))
            }
        }
    }

    async fn get_stats(
        &self,
        request: Request<proto::GetStatsRequest>,
    ) -> Result<Response<proto::GetStatsResponse>, Status> {
        let ip = client_ip_of(&request);
        let trusted = match (self.state.trusted_subnet(), ip) {
            (Some(subnet), Some(ip)) => subnet.contains(ip),
            _ => false,
        };
        if !trusted {
            warn!(client_ip = ?ip, "stats requested from untrusted client");
            return Err(GrpcError::PermissionDenied.into());
        }

        let stats = self
            .state
            .shortener()
            .stats()
            .await
            .map_err(GrpcError::from)?;
        Ok(Response::new(stats.into()))
    }
}
