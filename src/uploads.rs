//! Attachment intake and serving.
//!
//! Uploaded files keep their original name behind an epoch-milliseconds
//! prefix, e.g. `1755945600123-foto.png`, inside one flat upload directory.
//! The directory is created on first use, not at startup. Stored bytes are
//! never inspected or transformed.

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

#[derive(Clone)]
pub struct UploadArea {
    dir: PathBuf,
}

impl UploadArea {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &PathBuf { &self.dir }

    /// Store attachment bytes under a timestamp-prefixed name, creating the
    /// upload directory on demand. Returns the generated file name, which is
    /// what gets recorded on the inventory entry.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await.ok();
        let name = format!("{}-{}", Utc::now().timestamp_millis(), sanitize_name(original_name));
        let path = self.dir.join(&name);
        tokio::fs::write(&path, bytes).await
            .with_context(|| format!("write upload '{}'", path.display()))?;
        debug!(target: "estoque::uploads", "saved attachment '{}' ({} bytes)", name, bytes.len());
        Ok(name)
    }

    /// Resolve a stored attachment name to its path for serving. Names with
    /// path separators or dot segments never resolve, and neither do names
    /// that were never stored.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if !is_safe_name(name) {
            return None;
        }
        let path = self.dir.join(name);
        if path.is_file() { Some(path) } else { None }
    }
}

/// Keep only the final path component of a client-supplied file name; some
/// browsers send full paths. Empty or dot-only names fall back to a fixed
/// placeholder so the generated name stays well formed.
fn sanitize_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let cleaned: String = base.chars().filter(|c| *c != '\0').collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "arquivo".to_string()
    } else {
        cleaned
    }
}

fn is_safe_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') {
        return false;
    }
    if name.contains('/') || name.contains('\\') {
        return false;
    }
    name != "." && name != ".."
}

/// Best-effort content type from the file extension; anything unknown is
/// served as raw bytes.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
