//! Storage settings, loadable from YAML.
//!
//! ```yaml
//! root_dir: /data/measurements
//! use_daily_dir: true
//! delimiter: "\t"
//! number_format: ["%d", "%.6e"]
//! comments: "# "
//! include_global_metadata: true
//! column_headers: [time, counts]
//! image_format: pdf
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LabstoreError, Result};
use crate::models::{ColumnHeaders, ImageFormat};
use crate::number_format::{NumberFormat, NumberFormats, DEFAULT_NUMBER_FORMAT};

/// A single printf-style specifier, or one per column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberFormatSetting {
    Single(String),
    PerColumn(Vec<String>),
}

impl NumberFormatSetting {
    pub fn resolve(&self) -> Result<NumberFormats> {
        match self {
            NumberFormatSetting::Single(spec) => Ok(NumberFormats::Uniform(spec.parse()?)),
            NumberFormatSetting::PerColumn(specs) if specs.is_empty() => Err(
                LabstoreError::InvalidConfig("per-column number formats must not be empty".into()),
            ),
            NumberFormatSetting::PerColumn(specs) => Ok(NumberFormats::PerColumn(
                specs
                    .iter()
                    .map(|s| s.parse::<NumberFormat>())
                    .collect::<Result<_>>()?,
            )),
        }
    }
}

impl Default for NumberFormatSetting {
    fn default() -> Self {
        NumberFormatSetting::Single(DEFAULT_NUMBER_FORMAT.to_string())
    }
}

/// Settings for one storage instance. Fixed once the storage is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory; `None` falls back to the default data root.
    pub root_dir: Option<PathBuf>,
    /// Save into `<root>/YYYY/MM/YYYY-MM-DD`.
    pub use_daily_dir: bool,
    /// File extension; `None` uses the backend default.
    pub file_extension: Option<String>,
    pub delimiter: String,
    pub number_format: NumberFormatSetting,
    /// Comment marker for header lines; `None` or empty disables it.
    pub comments: Option<String>,
    pub include_global_metadata: bool,
    pub column_headers: Option<ColumnHeaders>,
    pub image_format: ImageFormat,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root_dir: None,
            use_daily_dir: false,
            file_extension: None,
            delimiter: "\t".to_string(),
            number_format: NumberFormatSetting::default(),
            comments: Some("# ".to_string()),
            include_global_metadata: true,
            column_headers: None,
            image_format: ImageFormat::Png,
        }
    }
}

impl StorageSettings {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: Some(root_dir.into()),
            ..Default::default()
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn save_yaml(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn with_daily_dir(mut self, enabled: bool) -> Self {
        self.use_daily_dir = enabled;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = Some(extension.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn with_number_format(mut self, spec: impl Into<String>) -> Self {
        self.number_format = NumberFormatSetting::Single(spec.into());
        self
    }

    pub fn with_column_formats<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.number_format =
            NumberFormatSetting::PerColumn(specs.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_comments(mut self, comments: Option<&str>) -> Self {
        self.comments = comments.map(str::to_string);
        self
    }

    pub fn with_global_metadata(mut self, include: bool) -> Self {
        self.include_global_metadata = include;
        self
    }

    pub fn with_column_headers(mut self, headers: ColumnHeaders) -> Self {
        self.column_headers = Some(headers);
        self
    }

    pub fn with_image_format(mut self, format: ImageFormat) -> Self {
        self.image_format = format;
        self
    }

    /// The configured extension with a leading `.`, or `default`.
    pub(crate) fn extension_or(&self, default: &str) -> Result<String> {
        match self.file_extension.as_deref().map(str::trim) {
            None | Some("") => Ok(default.to_string()),
            Some(ext) if ext.contains(['/', '\\']) => Err(LabstoreError::InvalidConfig(format!(
                "file extension {ext:?} must not contain path separators"
            ))),
            Some(ext) if ext.starts_with('.') => Ok(ext.to_string()),
            Some(ext) => Ok(format!(".{ext}")),
        }
    }

    pub(crate) fn validated_delimiter(&self) -> Result<&str> {
        if self.delimiter.is_empty() || self.delimiter.contains('\n') {
            return Err(LabstoreError::InvalidConfig(
                "delimiter must be a non-empty single-line string".into(),
            ));
        }
        Ok(&self.delimiter)
    }
}
