//! Caller identity and client address resolution for both front ends.

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, SignedCookieJar};
use linkshrink_core::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use tonic::metadata::MetadataMap;
use uuid::Uuid;

/// Name of the signed cookie carrying the HTTP caller's id.
pub const USER_COOKIE: &str = "user_id";

/// gRPC metadata entry carrying the caller's id.
pub const USER_METADATA: &str = "x-user-id";

/// Header set by the reverse proxy with the original client address.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Identity of the HTTP caller, inserted into request extensions by
/// [`identify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserId(pub String);

/// Middleware resolving the caller from the signed `user_id` cookie.
///
/// Requests without a valid cookie (absent, or failing signature
/// verification) get a fresh UUIDv4 identity, and the response carries the
/// newly signed cookie.
pub async fn identify(jar: SignedCookieJar, mut request: Request, next: Next) -> Response {
    let (jar, user_id) = match jar.get(USER_COOKIE) {
        Some(cookie) => (jar, cookie.value().to_owned()),
        None => {
            let user_id = Uuid::new_v4().to_string();
            tracing::debug!("Issuing new identity {user_id}");
            let cookie = Cookie::build((USER_COOKIE, user_id.clone()))
                .path("/")
                .http_only(true);
            (jar.add(cookie), user_id)
        }
    };

    request.extensions_mut().insert(UserId(user_id));
    let response = next.run(request).await;
    (jar, response).into_response()
}

/// Reads the caller id from gRPC metadata.
pub fn user_id_from_metadata(metadata: &MetadataMap) -> Result<String> {
    metadata
        .get(USER_METADATA)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .ok_or(Error::Unauthenticated)
}

/// Client address of an HTTP request: `X-Real-IP` when present, otherwise
/// the peer address of the connection.
pub fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> Option<IpAddr> {
    match headers.get(REAL_IP_HEADER) {
        Some(value) => value.to_str().ok()?.trim().parse().ok(),
        None => peer.map(|ConnectInfo(addr)| addr.ip()),
    }
}
