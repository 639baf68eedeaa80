use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The directory downloads are staged into. Every download gets a unique
/// path; files are removed when their handle drops, and anything left
/// behind by a crash is swept on startup.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A unique path for one download of `name`.
    pub fn unique_path(&self, name: &str) -> PathBuf {
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let sanitized: String = file_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root
            .join(format!("{}-{sanitized}", uuid::Uuid::new_v4()))
    }

    /// Best-effort removal of everything under the scratch root, used at
    /// boot to clear leftovers of a previous process.
    pub fn sweep(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            if let Err(err) = fs::remove_file(entry.path()) {
                tracing::debug!(path = %entry.path().display(), %err, "failed to sweep scratch file");
            }
        }
    }
}

/// A downloaded file that removes itself when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Option<u64> {
        fs::metadata(&self.path).map(|m| m.len()).ok()
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(path = %self.path.display(), %err, "failed to remove scratch file");
            }
        }
    }
}
