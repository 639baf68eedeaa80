//! Feed over a local directory of uploaded files. Used for spreadsheet
//! integrations where an admin drops exports into a watched folder instead
//! of us pulling them from a remote server.

use crate::{Artifact, FeedError, FilePattern, FileFeed, ScratchDir, ScratchFile};
use models::{ConfigError, SpreadsheetConfig, TestOutcome};
use std::fs;
use std::path::PathBuf;

pub struct LocalDirFeed {
    directory: PathBuf,
    pattern: FilePattern,
}

impl LocalDirFeed {
    pub fn new(cfg: &SpreadsheetConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            directory: PathBuf::from(&cfg.directory),
            pattern: FilePattern::new(&cfg.file_pattern)?,
        })
    }

    fn list_blocking(&self) -> Result<Vec<Artifact>, FeedError> {
        let entries = fs::read_dir(&self.directory).map_err(|err| {
            FeedError::NotFound(format!("{}: {err}", self.directory.display()))
        })?;
        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.pattern.matches(&name) {
                continue;
            }
            artifacts.push(Artifact {
                name,
                size: Some(meta.len()),
                modified_at: meta
                    .modified()
                    .ok()
                    .map(chrono::DateTime::<chrono::Utc>::from),
            });
        }
        Ok(artifacts)
    }
}

#[async_trait::async_trait]
impl FileFeed for LocalDirFeed {
    async fn test(&self) -> TestOutcome {
        match self.list_blocking() {
            Ok(artifacts) => TestOutcome {
                ok: true,
                message: format!(
                    "{} file(s) match in {}",
                    artifacts.len(),
                    self.directory.display()
                ),
                sample_count: Some(artifacts.len() as u64),
            },
            Err(err) => TestOutcome {
                ok: false,
                message: err.to_string(),
                sample_count: None,
            },
        }
    }

    async fn list(&self) -> Result<Vec<Artifact>, FeedError> {
        self.list_blocking()
    }

    async fn download(&self, name: &str, scratch: &ScratchDir) -> Result<ScratchFile, FeedError> {
        // Copy into scratch so parsing and cleanup behave exactly like a
        // remote download.
        let source = self.directory.join(name);
        let dest = scratch.unique_path(name);
        let scratch_file = ScratchFile::new(dest.clone());
        fs::copy(&source, &dest)
            .map_err(|err| FeedError::NotFound(format!("{}: {err}", source.display())))?;
        Ok(scratch_file)
    }
}
