//! gRPC service implementation.
//!
//! [`ShortenerService`] implements the [`Shortener`] service from the protobuf
//! schema on top of the same storage and deletion pool as the HTTP front end.
//! Callers identify themselves with the `x-user-id` metadata entry; storage
//! errors surface through `From<Error> for Status`.

use super::identity::{REAL_IP_HEADER, user_id_from_metadata};
use crate::server::{
    pool::DeletionPool,
    telemetry::{increment_delete_requests, increment_links_created},
};
use ipnetwork::IpNetwork;
use linkshrink_core::{
    Error,
    proto::{
        BatchResult, DeleteRequest, DeleteResponse, OriginRequest, OriginResponse, PingRequest,
        PingResponse, ShortenBatchRequest, ShortenBatchResponse, ShortenRequest, ShortenResponse,
        StatsRequest, StatsResponse, UserLink, UserLinksRequest, UserLinksResponse,
        shortener_server::Shortener,
    },
    storage::Repository,
    types::BatchItem,
};
use std::{net::IpAddr, sync::Arc};
use tonic::{Request, Response, Status};

#[derive(Clone)]
pub struct ShortenerService {
    storage: Arc<dyn Repository>,
    pool: Arc<DeletionPool>,
    base_url: Arc<str>,
    trusted_subnet: Option<IpNetwork>,
}

impl ShortenerService {
    pub fn new(
        storage: Arc<dyn Repository>,
        pool: Arc<DeletionPool>,
        base_url: Arc<str>,
        trusted_subnet: Option<IpNetwork>,
    ) -> Self {
        Self {
            storage,
            pool,
            base_url,
            trusted_subnet,
        }
    }

    fn short_url(&self, short: &str) -> String {
        format!("{}/{short}", self.base_url)
    }

    fn is_trusted<T>(&self, request: &Request<T>) -> bool {
        let ip = match request.metadata().get(REAL_IP_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|raw| raw.trim().parse::<IpAddr>().ok()),
            None => request.remote_addr().map(|addr| addr.ip()),
        };
        matches!((self.trusted_subnet, ip), (Some(subnet), Some(ip)) if subnet.contains(ip))
    }
}

#[tonic::async_trait]
impl Shortener for ShortenerService {
    async fn shorten(
        &self,
        request: Request<ShortenRequest>,
    ) -> Result<Response<ShortenResponse>, Status> {
        let user_id = user_id_from_metadata(request.metadata())?;
        let url = request.into_inner().url;
        if url.trim().is_empty() {
            return Err(Error::invalid("empty URL").into());
        }

        let (short, existed) = match self.storage.save(&user_id, url.trim()).await {
            Ok(short) => {
                increment_links_created(1);
                (short, false)
            }
            Err(Error::AlreadyShortened { short }) => (short, true),
            Err(e) => return Err(e.into()),
        };
        Ok(Response::new(ShortenResponse {
            short_url: self.short_url(&short),
            existed,
        }))
    }

    async fn shorten_batch(
        &self,
        request: Request<ShortenBatchRequest>,
    ) -> Result<Response<ShortenBatchResponse>, Status> {
        let user_id = user_id_from_metadata(request.metadata())?;
        let items: Vec<BatchItem> = request
            .into_inner()
            .items
            .into_iter()
            .map(|item| BatchItem {
                correlation_id: item.correlation_id,
                origin: item.original_url,
            })
            .collect();
        if items.is_empty() || items.iter().any(|item| item.origin.trim().is_empty()) {
            return Err(Error::invalid("batch is empty or contains an empty URL").into());
        }

        let saved = self.storage.bunch_save(&user_id, items).await?;
        increment_links_created(saved.len() as u64);

        let results = saved
            .into_iter()
            .map(|result| BatchResult {
                short_url: self.short_url(&result.short),
                correlation_id: result.correlation_id,
            })
            .collect();
        Ok(Response::new(ShortenBatchResponse { results }))
    }

    async fn origin(
        &self,
        request: Request<OriginRequest>,
    ) -> Result<Response<OriginResponse>, Status> {
        let short = request.into_inner().short;
        let original_url = self.storage.link_by_short(&short).await?;
        Ok(Response::new(OriginResponse { original_url }))
    }

    async fn user_links(
        &self,
        request: Request<UserLinksRequest>,
    ) -> Result<Response<UserLinksResponse>, Status> {
        let user_id = user_id_from_metadata(request.metadata())?;
        let links = self
            .storage
            .links_by_user(&user_id)
            .await?
            .into_iter()
            .map(|link| UserLink {
                short_url: self.short_url(&link.short),
                original_url: link.origin,
            })
            .collect();
        Ok(Response::new(UserLinksResponse { links }))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        increment_delete_requests();
        let user_id = user_id_from_metadata(request.metadata())?;
        let ids = request.into_inner().ids;
        if ids.is_empty() {
            return Err(Error::invalid("no ids to delete").into());
        }

        if !self.pool.push(ids, user_id) {
            return Err(Error::ServiceShutdown.into());
        }
        Ok(Response::new(DeleteResponse { accepted: true }))
    }

    async fn stats(
        &self,
        request: Request<StatsRequest>,
    ) -> Result<Response<StatsResponse>, Status> {
        if !self.is_trusted(&request) {
            return Err(Status::permission_denied("Client is outside the trusted subnet"));
        }
        let stats = self.storage.stats().await?;
        Ok(Response::new(StatsResponse {
            urls: stats.urls as u64,
            users: stats.users as u64,
        }))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        self.storage.ping().await?;
        Ok(Response::new(PingResponse {}))
    }
}
