//! HTTP front end.
//!
//! All routes run behind the [`identify`] middleware, so every handler sees a
//! [`UserId`]. Responses are gzip-compressed when the client accepts it and
//! gzip request bodies are transparently decoded.

use super::identity::{UserId, client_ip, identify};
use crate::server::{
    pool::DeletionPool,
    telemetry::{increment_delete_requests, increment_links_created},
};
use axum::{
    Extension, Json, Router,
    extract::{ConnectInfo, FromRef, Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;
use ipnetwork::IpNetwork;
use linkshrink_core::{Error, storage::Repository, types::BatchItem};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{compression::CompressionLayer, decompression::RequestDecompressionLayer};

/// Shared state of every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Repository>,
    pub pool: Arc<DeletionPool>,
    pub base_url: Arc<str>,
    pub trusted_subnet: Option<IpNetwork>,
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl AppState {
    fn short_url(&self, short: &str) -> String {
        format!("{}/{short}", self.base_url)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(shorten_text))
        .route("/ping", get(ping))
        .route("/{id}", get(redirect))
        .route("/api/shorten", post(shorten_json))
        .route("/api/shorten/batch", post(shorten_batch))
        .route("/api/user/urls", get(user_urls).delete(delete_urls))
        .route("/api/internal/stats", get(stats))
        .layer(middleware::from_fn_with_state(state.clone(), identify))
        .layer(RequestDecompressionLayer::new().gzip(true))
        .layer(CompressionLayer::new().gzip(true))
        .with_state(state)
}

/// Failure of an HTTP handler, rendered as a plain-text body.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::invalid(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::LinkNotFound { .. } | Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::LinkGone { .. } => StatusCode::GONE,
            Error::AlreadyShortened { .. } => StatusCode::CONFLICT,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Cancelled | Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage { .. } | Error::Internal { .. } => {
                tracing::error!("Request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct ShortenRequest {
    url: String,
}

#[derive(Serialize)]
struct ShortenResponse {
    result: String,
}

#[derive(Serialize)]
struct BatchResponseItem {
    correlation_id: String,
    short_url: String,
}

#[derive(Serialize)]
struct UserUrl {
    short_url: String,
    original_url: String,
}

/// Saves `origin` and picks the status: 201 for a new link, 409 with the
/// existing short URL when the caller already shortened it.
async fn save(state: &AppState, user_id: &str, origin: &str) -> ApiResult<(StatusCode, String)> {
    let origin = origin.trim();
    if origin.is_empty() {
        return Err(Error::invalid("empty URL").into());
    }
    match state.storage.save(user_id, origin).await {
        Ok(short) => {
            increment_links_created(1);
            Ok((StatusCode::CREATED, state.short_url(&short)))
        }
        Err(Error::AlreadyShortened { short }) => Ok((StatusCode::CONFLICT, state.short_url(&short))),
        Err(e) => Err(e.into()),
    }
}

async fn shorten_text(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    body: String,
) -> ApiResult<(StatusCode, String)> {
    save(&state, &user_id, &body).await
}

async fn shorten_json(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    payload: Result<Json<ShortenRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ShortenResponse>)> {
    let Json(request) = payload?;
    let (status, result) = save(&state, &user_id, &request.url).await?;
    Ok((status, Json(ShortenResponse { result })))
}

async fn shorten_batch(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    payload: Result<Json<Vec<BatchItem>>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Vec<BatchResponseItem>>)> {
    let Json(items) = payload?;
    if items.is_empty() {
        return Err(Error::invalid("empty batch").into());
    }
    if items.iter().any(|item| item.origin.trim().is_empty()) {
        return Err(Error::invalid("batch contains an empty URL").into());
    }

    let results = state.storage.bunch_save(&user_id, items).await?;
    increment_links_created(results.len() as u64);

    let body = results
        .into_iter()
        .map(|result| BatchResponseItem {
            short_url: state.short_url(&result.short),
            correlation_id: result.correlation_id,
        })
        .collect();
    Ok((StatusCode::CREATED, Json(body)))
}

async fn redirect(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Redirect> {
    let origin = state.storage.link_by_short(&id).await?;
    Ok(Redirect::temporary(&origin))
}

async fn user_urls(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
) -> ApiResult<Response> {
    let links = state.storage.links_by_user(&user_id).await?;
    if links.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<UserUrl> = links
        .into_iter()
        .map(|link| UserUrl {
            short_url: state.short_url(&link.short),
            original_url: link.origin,
        })
        .collect();
    Ok(Json(body).into_response())
}

/// Queues a bulk soft deletion and answers before it is applied.
async fn delete_urls(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> ApiResult<StatusCode> {
    increment_delete_requests();
    let Json(ids) = payload?;
    if ids.is_empty() {
        return Err(Error::invalid("no ids to delete").into());
    }

    if state.pool.push(ids, user_id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(Error::invalid("deletion is unavailable").into())
    }
}

async fn ping(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.storage.ping().await?;
    Ok(StatusCode::OK)
}

async fn stats(State(state): State<AppState>, request: Request) -> ApiResult<Response> {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>();
    let ip = client_ip(request.headers(), peer);

    let trusted = match (state.trusted_subnet, ip) {
        (Some(subnet), Some(ip)) => subnet.contains(ip),
        _ => false,
    };
    if !trusted {
        tracing::debug!("Refusing stats to untrusted client {ip:?}");
        return Ok(StatusCode::FORBIDDEN.into_response());
    }

    Ok(Json(state.storage.stats().await?).into_response())
}
