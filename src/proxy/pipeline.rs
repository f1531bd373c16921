//! Proxy Pipeline
//!
//! Per request: derive the cache key, serve a fresh entry verbatim, or on a
//! miss resolve the source, derive headers, and tee the upstream body into
//! the client response and a new cache entry.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderName, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::Notify;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use super::disposition;
use super::error::ProxyError;
use crate::cache::{CacheKey, CacheStore, CacheWriter, EntryMeta};
use crate::upstream::SourceResolver;

/// Reports whether a response came from the cache
pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");

/// Parameters of one relay request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub url: String,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Orchestrates cache, resolver and deriver for each request
pub struct Pipeline {
    store: Arc<CacheStore>,
    resolver: SourceResolver,
    /// Longest wait for the next upstream chunk before giving up
    idle_timeout: Duration,
    /// Bytes a client may fall behind the upstream on a miss
    client_buffer: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<CacheStore>,
        resolver: SourceResolver,
        idle_timeout: Duration,
        client_buffer: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            idle_timeout,
            client_buffer,
        }
    }

    /// Serve one request
    ///
    /// On a miss the returned response streams while a background task keeps
    /// reading upstream, so the cache still fills if the client goes away.
    pub async fn serve(&self, request: &ProxyRequest) -> Result<Response, ProxyError> {
        let key = CacheKey::compute(&request.url, request.filename.as_deref());

        if let Some(entry) = self.store.lookup(&key).await {
            debug!(key = %key, url = %request.url, "Cache HIT");
            return self.respond(
                CacheStatus::Hit,
                &entry.meta,
                Some(entry.size),
                Body::from_stream(ReaderStream::new(entry.body)),
            );
        }

        debug!(key = %key, url = %request.url, "Cache MISS");

        let source = self.resolver.resolve(&request.url).await?;
        let descriptor = disposition::derive(
            request.filename.as_deref(),
            source.response.headers(),
            &request.url,
        );
        let meta = descriptor.to_meta();

        let sink = match self.store.open_for_write(&key).await {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache unavailable, relaying without caching");
                None
            }
        };

        let expected_len = source.response.content_length();
        let upstream = source
            .response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();

        let (client, client_rx) = mpsc::unbounded();
        let buffer = ClientBuffer::new(self.client_buffer);
        let body = Body::from_stream(client_body(client_rx, Arc::clone(&buffer)));
        let response = self.respond(CacheStatus::Miss, &meta, None, body)?;

        info!(
            key = %key,
            url = %source.target.url,
            filename = %descriptor.filename,
            content_type = %descriptor.content_type,
            "Relaying upstream file"
        );

        let tee = Tee {
            key,
            upstream,
            client,
            buffer,
            sink,
            meta,
            expected_len,
            idle_timeout: self.idle_timeout,
        };
        tokio::spawn(tee.run());

        Ok(response)
    }

    fn respond(
        &self,
        status: CacheStatus,
        meta: &EntryMeta,
        length: Option<u64>,
        body: Body,
    ) -> Result<Response, ProxyError> {
        let cache_control = format!(
            "public, max-age={}, immutable",
            self.store.fresh_for().as_secs()
        );

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, meta.content_type.as_str())
            .header(CONTENT_DISPOSITION, meta.content_disposition.as_str())
            .header(CACHE_CONTROL, cache_control)
            .header(X_CACHE_STATUS, status.as_str());
        if let Some(length) = length {
            builder = builder.header(CONTENT_LENGTH, length);
        }

        builder.body(body).map_err(ProxyError::unexpected)
    }
}

/// Bytes queued for a client body that it has not read yet
///
/// Only the tee adds to the count; the body stream subtracts as it is polled.
struct ClientBuffer {
    queued: AtomicUsize,
    drained: Notify,
    limit: usize,
}

impl ClientBuffer {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            queued: AtomicUsize::new(0),
            drained: Notify::new(),
            limit,
        })
    }

    /// Account for `len` more bytes if they fit. A chunk larger than the
    /// limit is still admitted into an empty buffer.
    fn reserve(&self, len: usize) -> bool {
        let queued = self.queued.load(Ordering::Acquire);
        if queued > 0 && queued.saturating_add(len) > self.limit {
            return false;
        }
        self.queued.fetch_add(len, Ordering::AcqRel);
        true
    }

    fn release(&self, len: usize) {
        self.queued.fetch_sub(len, Ordering::AcqRel);
        self.drained.notify_one();
    }

    fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

/// Wakes a tee waiting on the buffer once the body is dropped
struct DrainOnDrop(Arc<ClientBuffer>);

impl Drop for DrainOnDrop {
    fn drop(&mut self) {
        self.0.drained.notify_one();
    }
}

/// The client half of a tee, releasing buffer space as chunks are polled
fn client_body(
    rx: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    buffer: Arc<ClientBuffer>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let guard = DrainOnDrop(buffer);
    rx.inspect(move |item| {
        if let Ok(chunk) = item {
            guard.0.release(chunk.len());
        }
    })
}

/// What a tee run achieved
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TeeReport {
    /// Bytes read from upstream
    received: u64,
    /// The client was still attached when upstream finished
    client_complete: bool,
    /// A cache entry was committed
    cached: bool,
}

/// One upstream body feeding two independent sinks
///
/// A client may fall at most `buffer.limit` bytes behind. Past that it is cut
/// off while the cache keeps filling, or, with no cache writer, the tee waits
/// for it. Cache failures drop the writer and leave the client stream
/// untouched.
struct Tee {
    key: CacheKey,
    upstream: BoxStream<'static, io::Result<Bytes>>,
    client: mpsc::UnboundedSender<io::Result<Bytes>>,
    buffer: Arc<ClientBuffer>,
    sink: Option<CacheWriter>,
    meta: EntryMeta,
    expected_len: Option<u64>,
    idle_timeout: Duration,
}

impl Tee {
    async fn run(mut self) -> TeeReport {
        let mut report = TeeReport::default();
        let mut client_open = true;

        let result = loop {
            let next = match tokio::time::timeout(self.idle_timeout, self.upstream.next()).await {
                Ok(next) => next,
                Err(_) => break Err(io::Error::new(io::ErrorKind::TimedOut, "upstream stalled")),
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            };
            report.received += chunk.len() as u64;

            if let Some(writer) = self.sink.as_mut() {
                if let Err(e) = writer.write_chunk(&chunk).await {
                    error!(key = %self.key, error = %e, "Cache write failed, relaying without caching");
                    self.sink = None;
                }
            }

            if client_open {
                client_open = self.forward(chunk).await;
            }

            if !client_open && self.sink.is_none() {
                break Err(io::Error::new(io::ErrorKind::BrokenPipe, "no consumers left"));
            }
        };

        match result {
            Ok(()) => {
                // Let the client finish before the commit's fsyncs
                self.client.close_channel();
                report.client_complete = client_open;

                if let Some(writer) = self.sink.take() {
                    match self.expected_len {
                        Some(expected) if expected != writer.bytes_written() => {
                            warn!(
                                key = %self.key,
                                expected = expected,
                                received = writer.bytes_written(),
                                "Upstream length mismatch, not caching"
                            );
                            writer.discard();
                        }
                        _ => match writer.commit(&self.meta).await {
                            Ok(size) => {
                                info!(key = %self.key, size = size, "Cache set");
                                report.cached = true;
                            }
                            Err(e) => {
                                error!(key = %self.key, error = %e, "Could not write to cache");
                            }
                        },
                    }
                }
            }
            Err(e) => {
                warn!(
                    key = %self.key,
                    received = report.received,
                    error = %e,
                    "Upstream relay aborted"
                );
                if let Some(writer) = self.sink.take() {
                    writer.discard();
                }
                if client_open {
                    let _ = self.client.unbounded_send(Err(e));
                }
            }
        }

        report
    }

    /// Hand a chunk to the client; `false` once the client is gone
    async fn forward(&mut self, chunk: Bytes) -> bool {
        let len = chunk.len();
        while !self.buffer.reserve(len) {
            if self.sink.is_some() {
                warn!(
                    key = %self.key,
                    queued = self.buffer.queued(),
                    "Client fell too far behind, dropping it and filling cache"
                );
                let _ = self.client.unbounded_send(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "client too slow",
                )));
                self.client.close_channel();
                return false;
            }
            if self.client.is_closed() {
                return false;
            }
            let drained = tokio::time::timeout(self.idle_timeout, self.buffer.drained.notified());
            if drained.await.is_err() {
                warn!(key = %self.key, "Client stalled, aborting relay");
                let _ = self.client.unbounded_send(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "client stalled",
                )));
                self.client.close_channel();
                return false;
            }
        }

        if self.client.unbounded_send(Ok(chunk)).is_err() {
            debug!(key = %self.key, "Client disconnected, still filling cache");
            return false;
        }
        true
    }
}
