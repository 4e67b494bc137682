use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schema::{is_allowed_file_name, now, sanitize_file_name, ArtifactRecord};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("empty filename")]
    EmptyFilename,
    #[error("disallowed extension: {0}")]
    DisallowedExtension(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Filesystem store holding at most one model artifact at a time.
///
/// `store` deletes every previously retained artifact before the new one
/// becomes visible, so `latest` never points at a superseded file.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate, supersede, persist. The write goes through a temp file and
    /// a rename so a half-written artifact is never observable as latest.
    pub fn store(&self, bytes: &[u8], file_name: &str) -> Result<ArtifactRecord> {
        let name = sanitize_file_name(file_name).ok_or(ArtifactError::EmptyFilename)?;
        if !is_allowed_file_name(&name) {
            return Err(ArtifactError::DisallowedExtension(name));
        }

        fs::create_dir_all(&self.dir)?;
        self.remove_retained()?;

        // The .part suffix keeps the in-flight file invisible to latest().
        let tmp = self.dir.join(format!(".{name}.part"));
        fs::write(&tmp, bytes)?;
        let path = self.dir.join(&name);
        fs::rename(&tmp, &path)?;

        Ok(ArtifactRecord {
            file_name: name,
            path: path.to_string_lossy().into_owned(),
            size_bytes: bytes.len() as u64,
            content_hash: blake3::hash(bytes).to_hex().to_string(),
            stored_at: now(),
        })
    }

    /// Most recently modified retained artifact, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_allowed_file_name(name) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                best = Some((modified, entry.path()));
            }
        }
        Ok(best.map(|(_, p)| p))
    }

    fn remove_retained(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if is_allowed_file_name(name) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }
}
