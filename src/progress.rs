//! Classification of raw output chunks from the downloader.
//!
//! Chunks arrive with no line-boundary guarantee. Every rule here matches
//! within a single chunk, so no state is kept between calls to [`classify`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Phase;

/// Markers printed when the merge utility takes over.
const FINALIZE_MARKERS: [&str; 3] = ["[Merger]", "[ffmpeg]", "[ExtractAudio]"];

/// Prefix added to error-stream chunks before they reach the presentation layer.
pub const ERROR_PREFIX: &str = "ERROR: ";

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[download\]\s+([0-9]{1,3}\.?[0-9]*)%").unwrap_or_else(|_| unreachable!())
});

/// Which pipe a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Result of classifying one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Downloading { percent: f64 },
    Finalizing,
    ErrorLine(String),
}

impl Classification {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Downloading { .. } => Phase::Downloading,
            Self::Finalizing => Phase::Finalizing,
            Self::ErrorLine(_) => Phase::RawErrorLine,
        }
    }
}

/// Classify a chunk. Returns `None` for chunks that carry nothing reportable.
pub fn classify(chunk: &str, source: StreamSource) -> Option<Classification> {
    if chunk.trim().is_empty() {
        return None;
    }

    if source == StreamSource::Stderr {
        return Some(Classification::ErrorLine(format!("{ERROR_PREFIX}{chunk}")));
    }

    // The merge marker wins over any percentage in the same chunk.
    if FINALIZE_MARKERS.iter().any(|m| chunk.contains(m)) {
        return Some(Classification::Finalizing);
    }

    parse_percent(chunk).map(|percent| Classification::Downloading { percent })
}

/// First `[download] NN.N%` value in the chunk, clamped to `[0, 100]`.
pub fn parse_percent(chunk: &str) -> Option<f64> {
    let caps = PERCENT_RE.captures(chunk)?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(percent.clamp(0.0, 100.0))
}

/// Percentage as shown in the downloads list.
pub fn percent_label(percent: f64) -> String {
    format!("{:.0}%", percent.round())
}

/// Turns raw byte reads into text without splitting multi-byte characters
/// across chunk boundaries.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    carry: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, holding back an incomplete trailing UTF-8 sequence for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let keep_from = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.carry.len(),
        };
        let rest = self.carry.split_off(keep_from);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = rest;
        text
    }

    /// Whatever is still held back, lossily decoded.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        text
    }
}
