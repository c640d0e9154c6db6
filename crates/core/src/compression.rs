//! Request and response body encoding
//!
//! Outgoing bodies are compressed when enabled, above the size threshold,
//! and only when compression actually shrinks them. Incoming bodies are
//! decoded according to their `Content-Encoding` header.

use std::fmt;
use std::sync::Arc;

use netweave_common::compression::{self, CompressionAlgorithm};
use netweave_domain::constants::HEADER_CONTENT_ENCODING;
use netweave_domain::{CompressionConfig, Headers, NetworkError, NetworkResult};
use parking_lot::RwLock;
use tracing::trace;

use crate::monitor::{NetworkHealth, PerformanceMonitor};

/// Body bytes and the encoding they are in (`None` = identity)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub encoding: Option<CompressionAlgorithm>,
}

impl EncodedPayload {
    pub fn identity(bytes: Vec<u8>) -> Self {
        Self { bytes, encoding: None }
    }
}

/// Chooses among the configured algorithms for one payload
pub trait AlgorithmSelector: Send + Sync {
    /// `candidates` is never empty and is in order of preference
    fn select(&self, candidates: &[CompressionAlgorithm], payload_len: usize) -> CompressionAlgorithm;
}

/// Always the first preference
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferredSelector;

impl AlgorithmSelector for PreferredSelector {
    fn select(&self, candidates: &[CompressionAlgorithm], _payload_len: usize) -> CompressionAlgorithm {
        candidates[0]
    }
}

/// First preference while the network is healthy, cheapest algorithm once
/// the monitor reports degraded conditions
pub struct AdaptiveSelector {
    monitor: Arc<PerformanceMonitor>,
}

impl AdaptiveSelector {
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        Self { monitor }
    }
}

impl AlgorithmSelector for AdaptiveSelector {
    fn select(&self, candidates: &[CompressionAlgorithm], _payload_len: usize) -> CompressionAlgorithm {
        if self.monitor.health() == NetworkHealth::Healthy {
            return candidates[0];
        }
        candidates.iter().copied().min_by_key(|a| a.relative_cost()).unwrap_or(candidates[0])
    }
}

impl fmt::Debug for AdaptiveSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveSelector").field("health", &self.monitor.health()).finish()
    }
}

/// Compression settings plus algorithm selection
pub struct CompressionCodec {
    config: RwLock<CompressionConfig>,
    selector: RwLock<Arc<dyn AlgorithmSelector>>,
}

impl CompressionCodec {
    pub fn new(config: CompressionConfig, selector: Arc<dyn AlgorithmSelector>) -> Self {
        Self { config: RwLock::new(config), selector: RwLock::new(selector) }
    }

    pub fn config(&self) -> CompressionConfig {
        self.config.read().clone()
    }

    pub fn reconfigure(&self, config: CompressionConfig) {
        *self.config.write() = config;
    }

    pub fn set_selector(&self, selector: Arc<dyn AlgorithmSelector>) {
        *self.selector.write() = selector;
    }

    /// Encode an outgoing body
    pub fn compress(&self, payload: &[u8]) -> NetworkResult<EncodedPayload> {
        let config = self.config();
        if !config.enabled || config.algorithms.is_empty() || payload.len() <= config.min_size_threshold {
            return Ok(EncodedPayload::identity(payload.to_vec()));
        }

        let selector = Arc::clone(&self.selector.read());
        let algorithm = selector.select(&config.algorithms, payload.len());
        let compressed = compression::compress(algorithm, payload, config.level)
            .map_err(|e| NetworkError::Encoding(e.to_string()))?;

        if compressed.len() >= payload.len() {
            trace!(%algorithm, original = payload.len(), "compression did not shrink payload");
            return Ok(EncodedPayload::identity(payload.to_vec()));
        }
        trace!(
            %algorithm,
            original = payload.len(),
            compressed = compressed.len(),
            "payload compressed"
        );
        Ok(EncodedPayload { bytes: compressed, encoding: Some(algorithm) })
    }

    /// Decode a payload produced by [`compress`](Self::compress) or received
    /// from a server
    pub fn decompress(&self, payload: &EncodedPayload) -> NetworkResult<Vec<u8>> {
        match payload.encoding {
            None => Ok(payload.bytes.clone()),
            Some(algorithm) => compression::decompress(algorithm, &payload.bytes)
                .map_err(|e| NetworkError::Decoding(e.to_string())),
        }
    }

    /// Decode a response body by its `Content-Encoding` header, removing the
    /// header once the body is decoded
    pub fn decode_response(&self, headers: &mut Headers, body: Vec<u8>) -> NetworkResult<Vec<u8>> {
        let Some(value) = headers.get(HEADER_CONTENT_ENCODING).map(str::to_string) else {
            return Ok(body);
        };
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("identity") {
            headers.remove(HEADER_CONTENT_ENCODING);
            return Ok(body);
        }
        let algorithm = CompressionAlgorithm::from_content_encoding(value)
            .ok_or_else(|| NetworkError::Decoding(format!("unsupported content encoding {value}")))?;
        let decoded = self.decompress(&EncodedPayload { bytes: body, encoding: Some(algorithm) })?;
        headers.remove(HEADER_CONTENT_ENCODING);
        Ok(decoded)
    }

    /// Value for `Accept-Encoding`
    pub fn accept_encoding(&self) -> String {
        CompressionAlgorithm::ALL.iter().map(|a| a.content_encoding()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Debug for CompressionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionCodec").field("config", &*self.config.read()).finish_non_exhaustive()
    }
}
