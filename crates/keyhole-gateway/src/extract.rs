//! Request metadata extractors.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use keyhole_core::OwnerId;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// The caller's owner id, taken verbatim from `X-User-Id`.
///
/// A missing or empty header yields the anonymous owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        Ok(Owner(OwnerId::new(id)))
    }
}

/// The client address: `X-Real-IP` if present and valid, otherwise the TCP
/// peer when the server was started with connect info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let real_ip = parts
            .headers
            .get(REAL_IP_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok());

        let ip = real_ip.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });
        Ok(ClientIp(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract<T: FromRequestParts<(), Rejection = Infallible>>(request: Request<()>) -> T {
        let (mut parts, _) = request.into_parts();
        match T::from_request_parts(&mut parts, &()).await {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    #[tokio::test]
    async fn owner_from_header() {
        let request = Request::builder()
            .header(USER_ID_HEADER, " alice ")
            .body(())
            .unwrap();
        let Owner(owner) = extract(request).await;
        assert_eq!(owner, OwnerId::new("alice"));
    }

    #[tokio::test]
    async fn missing_owner_is_anonymous() {
        let Owner(owner) = extract(Request::new(())).await;
        assert!(owner.is_anonymous());
    }

    #[tokio::test]
    async fn real_ip_wins_over_peer() {
        let mut request = Request::builder()
            .header(REAL_IP_HEADER, "10.0.0.7")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 0, 1], 4000))));

        let ClientIp(ip) = extract(request).await;
        assert_eq!(ip, Some(IpAddr::from([10, 0, 0, 7])));
    }

    #[tokio::test]
    async fn peer_address_fallback() {
        let mut request = Request::builder()
            .header(REAL_IP_HEADER, "garbage")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 0, 1], 4000))));

        let ClientIp(ip) = extract(request).await;
        assert_eq!(ip, Some(IpAddr::from([192, 168, 0, 1])));

        let ClientIp(ip) = extract(Request::new(())).await;
        assert_eq!(ip, None);
    }
}
