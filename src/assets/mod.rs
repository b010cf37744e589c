//! Asset naming, classification and stylesheet rewriting
//!
//! Everything the cacher needs to know about an asset that does not involve
//! I/O lives here:
//! - `script_key` / `asset_key`: deterministic storage keys
//! - `AssetRewriter`: stylesheet URL extraction, resolution and rewriting
//! - `content_type_for_path` / `is_stylesheet`: media type classification

pub mod mime;
pub mod rewriter;

pub use mime::{content_type_for_path, is_stylesheet};
pub use rewriter::AssetRewriter;

use sha2::{Digest, Sha256};
use url::Url;

/// Prefix under which session-independent scripts are stored
const SCRIPT_PREFIX: &str = "js";

/// Longest path extension carried over into a storage key
const MAX_KEY_EXTENSION_LEN: usize = 8;

/// Storage key for a script shared by every session
pub fn script_key(url: &Url) -> String {
    format!("{}/{}", SCRIPT_PREFIX, url_digest_name(url))
}

/// Storage key for an asset recorded by one session
pub fn asset_key(session_id: u64, url: &Url) -> String {
    format!("{}/{}", session_id, url_digest_name(url))
}

/// Hex SHA-256 of the full URL, followed by the path extension if it has a
/// usable one.
fn url_digest_name(url: &Url) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_str().as_bytes()));
    match path_extension(url.path()) {
        Some(ext) => format!("{}.{}", digest, ext),
        None => digest,
    }
}

/// Lowercased extension of the last path segment, if it is short and
/// alphanumeric.
pub(crate) fn path_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_KEY_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
