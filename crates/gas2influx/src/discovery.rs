use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A candidate raw file and its ledger key (the file name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub identifier: String,
}

impl DiscoveredFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let identifier = path.file_name()?.to_str()?.to_string();
        Some(Self { path, identifier })
    }
}

/// Snapshot of the `*.csv` regular files in `dir`, sorted by name.
pub fn discover_files(dir: &Path) -> Result<Vec<DiscoveredFile>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list input directory: {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let path = entry.path();

        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if !is_csv {
            continue;
        }
        // Follows symlinks
        if !path.is_file() {
            continue;
        }

        match DiscoveredFile::from_path(&path) {
            Some(file) => files.push(file),
            None => warn!(path = %path.display(), "Skipping file with non UTF-8 name"),
        }
    }

    files.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    debug!(dir = %dir.display(), count = files.len(), "Discovered input files");
    Ok(files)
}
