//! Streaming downloads and file transfers
//!
//! Streams are opened lazily on first poll and re-chunked to the caller's
//! chunk size. The pooled connection and the server lease are held for the
//! life of the stream; the connection is returned to the pool once the body
//! has been read to the end. Streamed bodies skip
//! payload decryption and are not cached or retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use netweave_domain::constants::{HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE};
use netweave_domain::{
    Headers, NetworkError, NetworkResult, Request, RequestError, RequestResult, Response,
};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::RequestPipeline;
use crate::balancer::ServerLease;
use crate::breaker::open_circuit_error;
use crate::pool::PooledConnection;
use crate::ports::ByteStream;

/// Progress of an upload or download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    /// Known when the server sent `Content-Length` (downloads) or from the
    /// file size (uploads)
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `[0, 1]`, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// An exchange whose body has not been read yet
struct OpenedStream {
    headers: Headers,
    body: ByteStream,
    connection: PooledConnection,
    lease: Option<ServerLease>,
}

enum StreamState {
    Pending(Arc<RequestPipeline>, Request),
    Open {
        pipeline: Arc<RequestPipeline>,
        body: ByteStream,
        buffer: Vec<u8>,
        connection: PooledConnection,
        lease: Option<ServerLease>,
    },
    Done,
}

/// Removes a partially written download unless it was committed
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl RequestPipeline {
    /// Lazily stream a response body in chunks of at most `chunk_size`
    /// bytes. The stream yields `Cancelled` once if `cancel` fires and ends.
    pub fn stream(self: &Arc<Self>, request: Request, chunk_size: usize, cancel: CancellationToken) -> ByteStream {
        let chunk_size = chunk_size.max(1);
        let initial = StreamState::Pending(Arc::clone(self), request);

        stream::unfold(initial, move |mut state| {
            let cancel = cancel.clone();
            async move {
                loop {
                    match state {
                        StreamState::Done => return None,
                        StreamState::Pending(pipeline, request) => {
                            let opened = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => Err(NetworkError::Cancelled),
                                opened = pipeline.open_stream(request) => opened,
                            };
                            match opened {
                                Ok(opened) => {
                                    state = StreamState::Open {
                                        pipeline,
                                        body: opened.body,
                                        buffer: Vec::with_capacity(chunk_size),
                                        connection: opened.connection,
                                        lease: opened.lease,
                                    };
                                }
                                Err(error) => return Some((Err(error), StreamState::Done)),
                            }
                        }
                        StreamState::Open { pipeline, mut body, mut buffer, connection, lease } => {
                            if buffer.len() >= chunk_size {
                                let chunk: Vec<u8> = buffer.drain(..chunk_size).collect();
                                let next = StreamState::Open { pipeline, body, buffer, connection, lease };
                                return Some((Ok(chunk), next));
                            }

                            let next = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => Some(Err(NetworkError::Cancelled)),
                                next = body.next() => next,
                            };
                            match next {
                                Some(Ok(bytes)) => {
                                    pipeline.parts.monitor.record_bytes_received(bytes.len() as u64);
                                    buffer.extend_from_slice(&bytes);
                                    state = StreamState::Open { pipeline, body, buffer, connection, lease };
                                }
                                Some(Err(error)) => return Some((Err(error), StreamState::Done)),
                                None => {
                                    if let Err(error) = pipeline.parts.pool.release(connection) {
                                        debug!(%error, "stream connection not returned to pool");
                                    }
                                    drop(lease);
                                    if buffer.is_empty() {
                                        return None;
                                    }
                                    return Some((Ok(buffer), StreamState::Done));
                                }
                            }
                        }
                    }
                }
            }
        })
        .boxed()
    }

    /// Send the file at `path` as the body of `request`. Progress is
    /// reported before dispatch and once the server has accepted the body.
    #[instrument(skip_all, fields(endpoint = %request.endpoint(), path = %path.display()))]
    pub async fn upload_file(
        &self,
        request: Request,
        path: &Path,
        mut progress: impl FnMut(TransferProgress) + Send,
        cancel: &CancellationToken,
    ) -> RequestResult<Response> {
        let (method, endpoint) = (request.method(), request.endpoint().to_string());
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| RequestError::new(method, &endpoint, 0, NetworkError::Io(format!("{}: {e}", path.display()))))?;
        let total = body.len() as u64;

        let request = if request.headers().contains(HEADER_CONTENT_TYPE) {
            request
        } else {
            request.with_header(HEADER_CONTENT_TYPE, "application/octet-stream")
        };
        progress(TransferProgress { bytes_transferred: 0, total_bytes: Some(total) });
        let response = self.execute(request.with_body(body), cancel).await?;
        progress(TransferProgress { bytes_transferred: total, total_bytes: Some(total) });
        info!(bytes = total, "upload finished");
        Ok(response)
    }

    /// Stream the response to `request` into `path`, reporting progress per
    /// chunk. Data lands in `<path>.part` and is renamed into place once
    /// complete; a failed or abandoned download leaves nothing behind.
    #[instrument(skip_all, fields(endpoint = %request.endpoint(), path = %path.display()))]
    pub async fn download_file(
        &self,
        request: Request,
        path: &Path,
        mut progress: impl FnMut(TransferProgress) + Send,
        cancel: &CancellationToken,
    ) -> RequestResult<u64> {
        let (method, endpoint) = (request.method(), request.endpoint().to_string());
        let wrap = |attempts: u32| {
            let endpoint = endpoint.clone();
            move |error: NetworkError| RequestError::new(method, endpoint, attempts, error)
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
            opened = self.open_stream(request) => opened,
        }
        .map_err(wrap(0))?;
        let OpenedStream { headers, mut body, connection, lease } = opened;
        let total = headers.get(HEADER_CONTENT_LENGTH).and_then(|v| v.trim().parse::<u64>().ok());

        let mut partial = PartialFile { path: partial_path(path), committed: false };
        let mut file = tokio::fs::File::create(&partial.path).await.map_err(|e| wrap(1)(e.into()))?;
        let mut written = 0u64;
        progress(TransferProgress { bytes_transferred: 0, total_bytes: total });

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(NetworkError::Cancelled)),
                next = body.next() => next,
            };
            let chunk = match next {
                Some(chunk) => chunk.map_err(wrap(1))?,
                None => break,
            };
            file.write_all(&chunk).await.map_err(|e| wrap(1)(e.into()))?;
            written += chunk.len() as u64;
            self.parts.monitor.record_bytes_received(chunk.len() as u64);
            progress(TransferProgress { bytes_transferred: written, total_bytes: total });
        }

        file.flush().await.map_err(|e| wrap(1)(e.into()))?;
        drop(file);
        tokio::fs::rename(&partial.path, path).await.map_err(|e| wrap(1)(e.into()))?;
        partial.committed = true;

        if let Err(error) = self.parts.pool.release(connection) {
            debug!(%error, "download connection not returned to pool");
        }
        drop(lease);
        info!(bytes = written, "download finished");
        Ok(written)
    }

    /// Run the pre-dispatch stages and open a streamed exchange
    async fn open_stream(&self, request: Request) -> NetworkResult<OpenedStream> {
        let request = self.parts.interceptors.process(request);
        self.parts.security.validate(&request).await?;

        let endpoint = request.endpoint().to_string();
        let breaker = self.parts.breakers.get_or_create(&endpoint)?;
        let permit = breaker.try_acquire().map_err(|rejection| open_circuit_error(&endpoint, &rejection))?;

        let started = Instant::now();
        let timeout = self.timeout_for(&request);
        let outgoing = self.prepare(&request, timeout, false).await?;
        let connection = self.parts.pool.acquire(&outgoing.host, timeout).await?;
        let lease = outgoing.server.as_ref().map(|server| server.lease());

        let exchange = self
            .parts
            .transport
            .open_stream(outgoing.transport_request(&request, connection.id(), timeout));
        let opened = tokio::time::timeout(timeout, exchange)
            .await
            .unwrap_or(Err(NetworkError::Timeout(timeout)))
            .and_then(|response| {
                if (200..300).contains(&response.status) {
                    Ok(response)
                } else {
                    Err(NetworkError::http(response.status, Vec::new()))
                }
            });

        match opened {
            Ok(response) => {
                permit.success();
                self.parts.monitor.record_success(&endpoint, started.elapsed(), outgoing.bytes_sent(), 0);
                debug!(status = response.status, "stream opened");
                Ok(OpenedStream { headers: response.headers, body: response.body, connection, lease })
            }
            Err(error) => {
                if error.counts_against_endpoint() {
                    permit.failure();
                }
                self.parts.monitor.record_failure(&endpoint, started.elapsed(), &error);
                Err(error)
            }
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        let half = TransferProgress { bytes_transferred: 50, total_bytes: Some(100) };
        assert_eq!(half.fraction(), Some(0.5));
        assert_eq!(TransferProgress { bytes_transferred: 0, total_bytes: Some(0) }.fraction(), Some(1.0));
        assert_eq!(TransferProgress { bytes_transferred: 10, total_bytes: None }.fraction(), None);
    }

    #[test]
    fn test_partial_path_keeps_directory() {
        let partial = partial_path(Path::new("/tmp/out/report.pdf"));
        assert_eq!(partial, PathBuf::from("/tmp/out/report.pdf.part"));
    }
}
