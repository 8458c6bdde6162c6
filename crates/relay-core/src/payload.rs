//! Decoding of externally pushed import payloads
//!
//! A payload is one UTF-8 JSON document: either a single asset descriptor
//! object or an array of them.
//!
//! ```json
//! [{"path": "/Downloads/Megascans/rock_a", "name": "Rock A", "resolution": "4K"}]
//! ```
//!
//! A document that is not valid UTF-8 JSON fails as a whole. Individual
//! elements that are malformed or point at a path that does not exist are
//! dropped while the rest of the batch is kept.

use crate::schema::ImportRequest;
use crate::thumbnail::ThumbnailFinder;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Byte sequence a producer sends, as a single receive, to stop the listener
pub const SHUTDOWN_SENTINEL: &[u8] = b"Bye Megascans";

/// One element of an ingested payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetDescriptor {
    /// Asset directory or file (required)
    pub path: String,
    /// Display name; falls back to the last path segment
    #[serde(default)]
    pub name: Option<String>,
    /// Texture resolution hint, e.g. `"2K"`
    #[serde(default)]
    pub resolution: Option<String>,
}

/// Why a payload, or one element of it, was rejected
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload must be an object or an array of objects")]
    UnexpectedShape,

    #[error("element {index} is not a valid asset descriptor: {source}")]
    InvalidElement {
        index: usize,
        source: serde_json::Error,
    },

    #[error("element {index} points at missing path {path}")]
    MissingPath { index: usize, path: PathBuf },
}

/// Outcome of decoding a well-formed document
#[derive(Debug, Default)]
pub struct DecodedPayload {
    pub requests: Vec<ImportRequest>,
    /// Elements that were dropped, with the reason
    pub rejected: Vec<DecodeError>,
}

/// Decode raw received bytes into import requests.
///
/// # Errors
///
/// Fails only when the whole document is unusable (bad UTF-8, bad JSON, or
/// neither object nor array). Per-element problems land in
/// [`DecodedPayload::rejected`].
pub fn decode_payload(bytes: &[u8], thumbnails: &ThumbnailFinder) -> Result<DecodedPayload, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    let document: Value = serde_json::from_str(text)?;

    let elements = match document {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Err(DecodeError::UnexpectedShape),
    };

    let mut decoded = DecodedPayload::default();
    for (index, element) in elements.into_iter().enumerate() {
        match decode_element(index, element, thumbnails) {
            Ok(request) => decoded.requests.push(request),
            Err(e) => decoded.rejected.push(e),
        }
    }
    Ok(decoded)
}

/// Decode one payload element.
pub fn decode_element(
    index: usize,
    element: Value,
    thumbnails: &ThumbnailFinder,
) -> Result<ImportRequest, DecodeError> {
    let descriptor: AssetDescriptor = serde_json::from_value(element)
        .map_err(|source| DecodeError::InvalidElement { index, source })?;

    let asset_path = PathBuf::from(&descriptor.path);
    if descriptor.path.trim().is_empty() || !asset_path.exists() {
        return Err(DecodeError::MissingPath {
            index,
            path: asset_path,
        });
    }

    let raw_name = descriptor
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| last_segment(&asset_path));

    Ok(ImportRequest {
        thumbnail_path: thumbnails.find(&asset_path),
        asset_name: normalize_asset_name(&raw_name),
        asset_path,
        texture_resolution: descriptor.resolution,
    })
}

/// Replace spaces with underscores, trimming the ends.
pub fn normalize_asset_name(name: &str) -> String {
    name.trim().replace(' ', "_")
}

fn last_segment(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
