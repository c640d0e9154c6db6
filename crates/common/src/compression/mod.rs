//! Payload compression codecs backed by `flate2`.
//!
//! Each [`CompressionAlgorithm`] maps to an HTTP `Content-Encoding` token so
//! callers can tag outgoing bodies and decode incoming ones by header value.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Compression algorithms supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// RFC 1952 gzip framing (`Content-Encoding: gzip`)
    Gzip,
    /// RFC 1950 zlib framing (`Content-Encoding: deflate`)
    #[serde(alias = "deflate")]
    Zlib,
}

impl CompressionAlgorithm {
    /// Every supported algorithm, cheapest to run first.
    pub const ALL: [CompressionAlgorithm; 2] = [Self::Zlib, Self::Gzip];

    /// The `Content-Encoding` token for this algorithm.
    pub fn content_encoding(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zlib => "deflate",
        }
    }

    /// Parse a `Content-Encoding` header value. Unknown tokens yield `None`.
    pub fn from_content_encoding(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" | "zlib" => Some(Self::Zlib),
            _ => None,
        }
    }

    /// Relative CPU cost, lower is cheaper.
    pub fn relative_cost(self) -> u8 {
        match self {
            Self::Zlib => 1,
            Self::Gzip => 2,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_encoding())
    }
}

/// Compress `data` with `algorithm` at `level` (clamped to 0..=9).
pub fn compress(algorithm: CompressionAlgorithm, data: &[u8], level: u32) -> CommonResult<Vec<u8>> {
    let level = Compression::new(level.min(9));
    let fail = |e: std::io::Error| CommonError::compression(algorithm.content_encoding(), e.to_string());

    match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
            encoder.write_all(data).map_err(fail)?;
            encoder.finish().map_err(fail)
        }
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
            encoder.write_all(data).map_err(fail)?;
            encoder.finish().map_err(fail)
        }
    }
}

/// Decompress `data` that was produced with `algorithm`.
pub fn decompress(algorithm: CompressionAlgorithm, data: &[u8]) -> CommonResult<Vec<u8>> {
    let fail = |e: std::io::Error| CommonError::compression(algorithm.content_encoding(), e.to_string());
    let mut out = Vec::with_capacity(data.len().saturating_mul(2));

    match algorithm {
        CompressionAlgorithm::Gzip => {
            GzDecoder::new(data).read_to_end(&mut out).map_err(fail)?;
        }
        CompressionAlgorithm::Zlib => {
            ZlibDecoder::new(data).read_to_end(&mut out).map_err(fail)?;
        }
    }
    Ok(out)
}

/// Space saved as a percentage of the original size.
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - (compressed as f64 / original as f64)) * 100.0
}
