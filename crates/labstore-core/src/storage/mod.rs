//! Storage engines.
//!
//! Every backend implements [`DataStorage`]: a header rendered from global
//! and local metadata, followed by the numeric data. The text backends write
//! both into one file; the binary backend writes an NPY array plus a text
//! sidecar holding the header.

mod npy;
mod text;

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, SubsecRound};
use tracing::info;

use crate::error::{LabstoreError, Result};
use crate::header::{self, HeaderStyle};
use crate::models::{ColumnHeaders, ImageFormat, LoadedData, Metadata, NumericArray, WriteResult};
use crate::number_format::NumberFormats;
use crate::paths::{DataRoot, PathResolver};
use crate::registry::GlobalMetadata;
use crate::settings::StorageSettings;

pub use npy::{read_npy, write_npy, BinaryArrayStorage};
pub use text::DelimitedTextStorage;

/// Per-call options for [`DataStorage::save_data`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub metadata: Metadata,
    pub notes: Option<String>,
    /// Label appended to the generated file name.
    pub nametag: Option<String>,
    /// Defaults to the current local time, truncated to seconds.
    pub timestamp: Option<NaiveDateTime>,
    /// Explicit file name; overrides the generated one.
    pub filename: Option<String>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_nametag(mut self, nametag: impl Into<String>) -> Self {
        self.nametag = Some(nametag.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub(crate) fn timestamp_or_now(&self) -> NaiveDateTime {
        self.timestamp.unwrap_or_else(now)
    }
}

pub(crate) fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

/// Something that can draw itself as an image. The storage layer only picks
/// the path and the format.
pub trait Figure {
    fn render(&self, format: ImageFormat, out: &mut dyn Write) -> std::io::Result<()>;
}

/// State shared by every backend: validated settings, the path resolver and
/// the global metadata registry.
#[derive(Debug)]
pub struct StorageCore {
    settings: StorageSettings,
    formats: NumberFormats,
    column_headers: Option<ColumnHeaders>,
    extension: String,
    resolver: PathResolver,
    global: Arc<GlobalMetadata>,
}

impl StorageCore {
    pub(crate) fn new(settings: StorageSettings, default_extension: &str) -> Result<Self> {
        settings.validated_delimiter()?;
        let formats = settings.number_format.resolve()?;
        let column_headers = ColumnHeaders::normalized(settings.column_headers.clone())?;
        let extension = settings.extension_or(default_extension)?;
        let resolver = PathResolver::new(settings.root_dir.clone(), settings.use_daily_dir);
        Ok(Self {
            settings,
            formats,
            column_headers,
            extension,
            resolver,
            global: GlobalMetadata::shared(),
        })
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn column_headers(&self) -> Option<&ColumnHeaders> {
        self.column_headers.as_ref()
    }

    pub fn global_metadata(&self) -> &Arc<GlobalMetadata> {
        &self.global
    }

    pub(crate) fn formats(&self) -> &NumberFormats {
        &self.formats
    }

    pub(crate) fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub(crate) fn set_global_metadata(&mut self, global: Arc<GlobalMetadata>) {
        self.global = global;
    }

    pub(crate) fn set_data_root(&mut self, data_root: Arc<dyn DataRoot>) {
        self.resolver = self.resolver.clone().with_data_root(data_root);
    }

    /// Global metadata (when enabled) overridden by `local`.
    pub fn merged_metadata(&self, local: &Metadata) -> Result<Metadata> {
        local.validate()?;
        if self.settings.include_global_metadata {
            Ok(self.global.get().merged(local))
        } else {
            Ok(local.clone())
        }
    }

    /// Path of a new file for `options` with this storage's extension.
    pub(crate) fn resolve(&self, options: &SaveOptions, timestamp: NaiveDateTime) -> Result<PathBuf> {
        self.resolver.resolve(
            options.filename.as_deref(),
            options.nametag.as_deref(),
            timestamp,
            &self.extension,
            true,
        )
    }
}

/// The contract shared by all storage backends.
pub trait DataStorage: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    fn core(&self) -> &StorageCore;

    fn header_style(&self) -> &HeaderStyle;

    /// Write `data` with a fresh header to a new file, replacing any file
    /// already at the resolved path.
    fn save_data(&self, data: &NumericArray, options: &SaveOptions) -> Result<WriteResult>;

    /// Append rows to an existing file.
    fn append_data(&self, data: &NumericArray, path: Option<&Path>) -> Result<WriteResult>;

    /// Read back a file written by this backend.
    fn load_data(&self, path: &Path) -> Result<LoadedData>;

    /// Render the header for this backend, merging in global metadata.
    fn create_header(
        &self,
        metadata: &Metadata,
        notes: Option<&str>,
        timestamp: NaiveDateTime,
    ) -> Result<String> {
        let core = self.core();
        let metadata = core.merged_metadata(metadata)?;
        Ok(header::render(
            self.header_style(),
            &metadata,
            notes,
            timestamp,
            core.column_headers(),
            true,
        ))
    }

    /// Render `figure` next to the data files in the configured image
    /// format. The figure is dropped once written.
    fn save_thumbnail(&self, figure: Box<dyn Figure>, options: &SaveOptions) -> Result<PathBuf> {
        let core = self.core();
        let format = core.settings().image_format;
        let timestamp = options.timestamp_or_now();
        let path = core.resolver().resolve(
            options.filename.as_deref(),
            options.nametag.as_deref(),
            timestamp,
            format.extension(),
            true,
        )?;

        let mut writer = BufWriter::new(File::create(&path)?);
        figure.render(format, &mut writer)?;
        writer.flush()?;
        drop(figure);

        info!(path = %path.display(), format = %format, "Saved thumbnail");
        Ok(path)
    }
}

// ─── Backend selection ───────────────────────────────────────────────────────

/// The available storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Text,
    Csv,
    Binary,
}

impl StorageKind {
    /// Guess the backend from a file extension; anything unknown is text.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv") => StorageKind::Csv,
            Some("npy") => StorageKind::Binary,
            _ => StorageKind::Text,
        }
    }

    /// Build a backend of this kind on the process-wide registry.
    pub fn open(self, settings: StorageSettings) -> Result<Box<dyn DataStorage>> {
        self.open_with(settings, GlobalMetadata::shared())
    }

    /// Build a backend of this kind that merges `global` into its headers.
    pub fn open_with(
        self,
        settings: StorageSettings,
        global: Arc<GlobalMetadata>,
    ) -> Result<Box<dyn DataStorage>> {
        Ok(match self {
            StorageKind::Text => {
                Box::new(DelimitedTextStorage::new(settings)?.with_global_metadata(global))
            }
            StorageKind::Csv => {
                Box::new(DelimitedTextStorage::csv(settings)?.with_global_metadata(global))
            }
            StorageKind::Binary => {
                Box::new(BinaryArrayStorage::new(settings)?.with_global_metadata(global))
            }
        })
    }
}

impl FromStr for StorageKind {
    type Err = LabstoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" | "dat" => Ok(StorageKind::Text),
            "csv" => Ok(StorageKind::Csv),
            "npy" | "binary" => Ok(StorageKind::Binary),
            other => Err(LabstoreError::InvalidConfig(format!(
                "unknown storage format {other:?}"
            ))),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Text => write!(f, "text"),
            StorageKind::Csv => write!(f, "csv"),
            StorageKind::Binary => write!(f, "npy"),
        }
    }
}
