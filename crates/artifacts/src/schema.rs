use serde::{Deserialize, Serialize};

/// Recognized model artifact extensions, lowercase with leading dot.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".gguf"];

/// Receipt for a stored artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub file_name: String,
    pub path: String,
    pub size_bytes: u64,
    pub content_hash: String, // blake3, hex
    pub stored_at: u64,       // epoch seconds
}

/// Reduce an untrusted upload filename to its final path component.
/// Returns `None` when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

pub fn is_allowed_file_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub(crate) fn now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}
