//! Source Resolver
//!
//! Turns a user-supplied URL into a live upstream response, walking through
//! Google Drive's confirmation handshake when the URL is a Drive share link.

use std::time::Duration;

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use reqwest::{redirect, Client, Response};
use tracing::{debug, info, warn};
use url::Url;

use super::drive;
use super::errors::FetchError;

/// Maximum redirects followed per upstream request
const MAX_REDIRECTS: usize = 10;

/// Resolved fetch descriptor for one request
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    /// Final URL requested
    pub url: Url,
    /// Extra request headers (the Drive session cookie on a confirmed download)
    pub headers: HeaderMap,
}

impl UpstreamTarget {
    fn plain(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }
}

/// A successful upstream response and the request that produced it
#[derive(Debug)]
pub struct ResolvedSource {
    pub target: UpstreamTarget,
    pub response: Response,
}

/// Fetches sources on behalf of the relay
#[derive(Clone)]
pub struct SourceResolver {
    /// HTTP client for making requests
    http_client: Client,
    /// Where Drive export and relative confirmation URLs point
    drive_base: Url,
}

impl SourceResolver {
    /// Create a resolver with a connect timeout and Drive endpoint base
    pub fn new(connect_timeout: Duration, drive_base: Url) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("drive-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            drive_base,
        })
    }

    /// Resolve `raw_url` to a successful upstream response
    ///
    /// Drive share links go through the export endpoint (and its confirmation
    /// form, if one is served); everything else is fetched directly. A
    /// non-success final status is returned as [`FetchError::UpstreamStatus`].
    pub async fn resolve(&self, raw_url: &str) -> Result<ResolvedSource, FetchError> {
        let source = match drive::extract_file_id(raw_url) {
            Some(file_id) => {
                debug!(file_id = file_id, "Google Drive share link detected");
                self.resolve_drive(file_id).await?
            }
            None => {
                let url =
                    Url::parse(raw_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
                self.fetch(UpstreamTarget::plain(url)).await?
            }
        };

        let status = source.response.status();
        if !status.is_success() {
            warn!(url = %source.target.url, status = status.as_u16(), "Upstream returned an error status");
            return Err(FetchError::from_status(status));
        }

        Ok(source)
    }

    /// Download a Drive file, confirming the virus-scan interstitial if needed
    async fn resolve_drive(&self, file_id: &str) -> Result<ResolvedSource, FetchError> {
        let export = drive::export_url(&self.drive_base, file_id)
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let first = self.fetch(UpstreamTarget::plain(export)).await?;

        if !drive::is_interstitial(first.response.headers()) {
            return Ok(first);
        }

        let cookie = drive::session_cookie(first.response.headers());
        let page = first.response.text().await?;
        let confirm = drive::confirmation_url(&page, &self.drive_base);

        let (url, cookie) = match (confirm, cookie) {
            (Some(url), Some(cookie)) => (url, cookie),
            (confirm, cookie) => {
                warn!(
                    file_id = file_id,
                    has_form = confirm.is_some(),
                    has_cookie = cookie.is_some(),
                    "Drive confirmation page incomplete"
                );
                return Err(FetchError::ConfirmationUnavailable);
            }
        };

        let mut headers = HeaderMap::new();
        let cookie =
            HeaderValue::from_str(&cookie).map_err(|_| FetchError::ConfirmationUnavailable)?;
        headers.insert(COOKIE, cookie);

        info!(file_id = file_id, url = %url, "Confirming Drive download");
        self.fetch(UpstreamTarget { url, headers }).await
    }

    async fn fetch(&self, target: UpstreamTarget) -> Result<ResolvedSource, FetchError> {
        debug!(url = %target.url, "Fetching upstream");

        let response = self
            .http_client
            .get(target.url.clone())
            .headers(target.headers.clone())
            .send()
            .await?;

        Ok(ResolvedSource { target, response })
    }
}
