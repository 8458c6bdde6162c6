//! Import request schema

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single asset import, normalized from one element of an ingested payload.
///
/// Requests are immutable once built and are consumed exactly once by the
/// scene importer of whichever process they are routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Asset directory (or file) on local disk
    pub asset_path: PathBuf,

    /// Display name with spaces replaced by underscores
    pub asset_name: String,

    /// Preview image discovered next to the asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,

    /// Requested texture resolution (e.g. `"4K"`), passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture_resolution: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_request_minimal_json() {
        let json = r#"{"asset_path": "/tmp/rock", "asset_name": "Rock_A"}"#;
        let req: ImportRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.asset_path, PathBuf::from("/tmp/rock"));
        assert_eq!(req.asset_name, "Rock_A");
        assert!(req.thumbnail_path.is_none());
        assert!(req.texture_resolution.is_none());

        let out = serde_json::to_string(&req).unwrap();
        assert!(!out.contains("thumbnail_path"));
        assert!(!out.contains("texture_resolution"));
    }
}
