//! Path resolution: root directory, daily sub-directory, file name, extension.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::{LabstoreError, Result};
use crate::naming::generic_filename;

/// Supplies the directory used when a storage has no explicit root.
pub trait DataRoot: Send + Sync + fmt::Debug {
    fn default_data_root(&self, create_missing: bool) -> Result<PathBuf>;
}

/// `~/labstore/Data`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomeDataRoot;

impl DataRoot for HomeDataRoot {
    fn default_data_root(&self, create_missing: bool) -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            LabstoreError::InvalidConfig("could not determine the home directory".into())
        })?;
        let root = home.join("labstore").join("Data");
        ensure_dir(&root, create_missing)?;
        Ok(root)
    }
}

/// A fixed directory.
#[derive(Debug, Clone)]
pub struct FixedDataRoot(pub PathBuf);

impl DataRoot for FixedDataRoot {
    fn default_data_root(&self, create_missing: bool) -> Result<PathBuf> {
        ensure_dir(&self.0, create_missing)?;
        Ok(self.0.clone())
    }
}

// ─── Directory helpers ────────────────────────────────────────────────────────

/// `YYYY/MM/YYYY-MM-DD`
pub fn daily_subpath(timestamp: NaiveDateTime) -> PathBuf {
    let date = timestamp.date();
    PathBuf::from(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
        .join(date.format("%Y-%m-%d").to_string())
}

fn ensure_dir(path: &Path, create_missing: bool) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if !create_missing {
        return Err(LabstoreError::DirectoryNotFound(path.to_path_buf()));
    }
    debug!(path = %path.display(), "Creating directory");
    fs::create_dir_all(path)?;
    Ok(())
}

/// Data files in `dir` with the given extension (with or without the leading
/// dot), sorted by name. A missing directory yields an empty list.
pub fn list_data_files(dir: &Path, extension: Option<&str>) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let wanted = extension.map(|e| e.trim_start_matches('.').to_lowercase());
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if wanted.as_ref().map_or(true, |w| *w == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Turns (filename | nametag + timestamp) into a full path under the
/// configured root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: Option<PathBuf>,
    use_daily_dir: bool,
    data_root: Arc<dyn DataRoot>,
}

impl PathResolver {
    pub fn new(root: Option<PathBuf>, use_daily_dir: bool) -> Self {
        Self {
            root,
            use_daily_dir,
            data_root: Arc::new(HomeDataRoot),
        }
    }

    pub fn with_data_root(mut self, data_root: Arc<dyn DataRoot>) -> Self {
        self.data_root = data_root;
        self
    }

    /// Directory files for `timestamp` are written to.
    pub fn directory(&self, timestamp: NaiveDateTime, create_missing: bool) -> Result<PathBuf> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => self.data_root.default_data_root(create_missing)?,
        };
        let dir = if self.use_daily_dir {
            root.join(daily_subpath(timestamp))
        } else {
            root
        };
        ensure_dir(&dir, create_missing)?;
        Ok(dir)
    }

    /// Resolve the full path of a file. An explicit `filename` wins over the
    /// generated name; `extension` is appended unless already present.
    pub fn resolve(
        &self,
        filename: Option<&str>,
        nametag: Option<&str>,
        timestamp: NaiveDateTime,
        extension: &str,
        create_missing: bool,
    ) -> Result<PathBuf> {
        let mut name = match filename {
            Some(name) => name.to_string(),
            None => generic_filename(timestamp, nametag)?,
        };
        if !extension.is_empty() && !name.ends_with(extension) {
            name.push_str(extension);
        }
        let path = self.directory(timestamp, create_missing)?.join(name);
        debug!(path = %path.display(), "Resolved data path");
        Ok(path)
    }
}
