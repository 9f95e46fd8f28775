//! Delimited text storage (plain text and CSV).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::{now, DataStorage, SaveOptions, StorageCore};
use crate::error::{LabstoreError, Result};
use crate::header::{self, parse_row, FormatVariant, HeaderStyle};
use crate::models::{ColumnHeaders, LoadedData, NumericArray, WriteResult};
use crate::paths::DataRoot;
use crate::registry::GlobalMetadata;
use crate::settings::StorageSettings;

pub const TEXT_EXTENSION: &str = ".dat";
pub const CSV_EXTENSION: &str = ".csv";

/// Writes a commented header followed by one line per data row.
///
/// Files can be created empty with [`new_data_file`](Self::new_data_file)
/// and filled incrementally with [`append_data_file`](Self::append_data_file);
/// the most recently created file is remembered as the append target.
#[derive(Debug)]
pub struct DelimitedTextStorage {
    core: StorageCore,
    style: HeaderStyle,
    open_file: Mutex<Option<PathBuf>>,
}

impl DelimitedTextStorage {
    /// Plain delimited text, `.dat` by default.
    pub fn new(settings: StorageSettings) -> Result<Self> {
        let core = StorageCore::new(settings, TEXT_EXTENSION)?;
        let style = HeaderStyle::text(
            core.settings().comments.as_deref(),
            &core.settings().delimiter,
        )
        .with_column_line(core.column_headers().is_some());
        Ok(Self {
            core,
            style,
            open_file: Mutex::new(None),
        })
    }

    /// CSV: the delimiter is always `,` and the column header row is left
    /// uncommented so the file reads as CSV from that row on.
    pub fn csv(settings: StorageSettings) -> Result<Self> {
        let core = StorageCore::new(settings.with_delimiter(","), CSV_EXTENSION)?;
        let style = HeaderStyle::csv(core.settings().comments.as_deref())
            .with_column_line(core.column_headers().is_some());
        Ok(Self {
            core,
            style,
            open_file: Mutex::new(None),
        })
    }

    pub fn with_global_metadata(mut self, global: Arc<GlobalMetadata>) -> Self {
        self.core.set_global_metadata(global);
        self
    }

    pub fn with_data_root(mut self, data_root: Arc<dyn DataRoot>) -> Self {
        self.core.set_data_root(data_root);
        self
    }

    pub fn variant(&self) -> FormatVariant {
        self.style.variant
    }

    /// The file `append_data_file` writes to when no path is given.
    pub fn open_file(&self) -> Option<PathBuf> {
        self.open_file.lock().clone()
    }

    /// Create a file holding only the header and remember it as the open
    /// file. The returned shape is `(0, 0)`.
    pub fn new_data_file(&self, options: &SaveOptions) -> Result<WriteResult> {
        let timestamp = options.timestamp_or_now();
        let header = self.create_header(&options.metadata, options.notes.as_deref(), timestamp)?;
        let path = self.core.resolve(options, timestamp)?;

        fs::write(&path, header)?;
        *self.open_file.lock() = Some(path.clone());

        info!(path = %path.display(), "Created data file");
        Ok(WriteResult {
            path,
            timestamp,
            shape: (0, 0),
        })
    }

    /// Append rows to `path`, or to the open file when `path` is `None`.
    /// A 1-D array is written as a single row.
    pub fn append_data_file(&self, data: &NumericArray, path: Option<&Path>) -> Result<WriteResult> {
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => self.open_file().ok_or_else(|| {
                LabstoreError::NoOpenFile("no data file has been created yet".into())
            })?,
        };
        if !target.is_file() {
            return Err(LabstoreError::NoOpenFile(target.display().to_string()));
        }

        let (rows, columns) = row_shape(data)?;
        let formats = self.core.formats();
        formats.check_columns(columns)?;

        let mut body = String::new();
        for row in data.rows()? {
            body.push_str(&formats.format_row(row, &self.style.delimiter));
            body.push('\n');
        }

        let mut file = OpenOptions::new().append(true).open(&target)?;
        file.write_all(body.as_bytes())?;

        info!(path = %target.display(), rows, columns, "Appended data");
        Ok(WriteResult {
            path: target,
            timestamp: now(),
            shape: (rows, columns),
        })
    }

    fn read_rows(&self, path: &Path, lines: &[&str]) -> Result<Vec<Vec<f64>>> {
        match self.style.variant {
            FormatVariant::Csv => {
                let body = lines.join("\n");
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .trim(csv::Trim::All)
                    .from_reader(body.as_bytes());
                let mut rows = vec![];
                for record in reader.records() {
                    let record = record.map_err(|e| LabstoreError::parse(path, e.to_string()))?;
                    let row = record
                        .iter()
                        .map(|field| field.parse::<f64>())
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|e| LabstoreError::parse(path, e.to_string()))?;
                    rows.push(row);
                }
                Ok(rows)
            }
            _ => lines
                .iter()
                .enumerate()
                .map(|(i, line)| {
                    parse_row(line, &self.style.delimiter)
                        .ok_or_else(|| LabstoreError::parse(path, format!("bad data row {}", i + 1)))
                })
                .collect(),
        }
    }
}

/// Table shape of `data`; rows without any column cannot be written as lines.
fn row_shape(data: &NumericArray) -> Result<(usize, usize)> {
    let (rows, columns) = data.table_shape()?;
    if rows > 0 && columns == 0 {
        return Err(LabstoreError::ShapeMismatch(format!(
            "{rows} rows without columns cannot be stored as text"
        )));
    }
    Ok((rows, columns))
}

impl DataStorage for DelimitedTextStorage {
    fn name(&self) -> &'static str {
        match self.style.variant {
            FormatVariant::Csv => "csv",
            _ => "text",
        }
    }

    fn core(&self) -> &StorageCore {
        &self.core
    }

    fn header_style(&self) -> &HeaderStyle {
        &self.style
    }

    fn save_data(&self, data: &NumericArray, options: &SaveOptions) -> Result<WriteResult> {
        let (_, columns) = row_shape(data)?;
        self.core.formats().check_columns(columns)?;

        let created = self.new_data_file(options)?;
        let appended = self.append_data_file(data, Some(&created.path))?;
        Ok(WriteResult {
            timestamp: created.timestamp,
            ..appended
        })
    }

    fn append_data(&self, data: &NumericArray, path: Option<&Path>) -> Result<WriteResult> {
        self.append_data_file(data, path)
    }

    fn load_data(&self, path: &Path) -> Result<LoadedData> {
        let content = fs::read_to_string(path)?;
        let lines: Vec<&str> = content.lines().collect();
        let (parsed, data_start) =
            header::parse(&self.style, &lines).map_err(|m| LabstoreError::parse(path, m))?;

        let rows = self.read_rows(path, &lines[data_start..])?;
        let data =
            NumericArray::from_rows(rows).map_err(|e| LabstoreError::parse(path, e.to_string()))?;
        let columns = data.shape()[1];
        let column_headers = parsed.column_line.as_deref().map(|line| {
            ColumnHeaders::decode(line, &self.style.delimiter, (columns > 0).then_some(columns))
        });

        Ok(LoadedData {
            data,
            metadata: parsed.metadata,
            column_headers,
            notes: parsed.notes,
            timestamp: parsed.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::TempDir;

    use super::*;
    use crate::models::Metadata;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, 30)
            .unwrap()
            .and_hms_opt(11, 30, 59)
            .unwrap()
    }

    fn storage(tmp: &TempDir, settings: StorageSettings) -> DelimitedTextStorage {
        DelimitedTextStorage::new(StorageSettings {
            root_dir: Some(tmp.path().to_path_buf()),
            ..settings
        })
        .unwrap()
        .with_global_metadata(Arc::new(GlobalMetadata::new()))
    }

    #[test]
    fn test_append_without_open_file() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp, StorageSettings::default());
        let err = storage
            .append_data_file(&NumericArray::from_row(vec![1.0]), None)
            .unwrap_err();
        assert!(matches!(err, LabstoreError::NoOpenFile(_)));

        let missing = tmp.path().join("missing.dat");
        let err = storage
            .append_data_file(&NumericArray::from_row(vec![1.0]), Some(&missing))
            .unwrap_err();
        assert!(matches!(err, LabstoreError::NoOpenFile(_)));
    }

    #[test]
    fn test_incremental_append_to_open_file() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp, StorageSettings::default().with_number_format("%.1f"));

        let created = storage
            .new_data_file(&SaveOptions::new().with_timestamp(ts()))
            .unwrap();
        assert_eq!(storage.open_file(), Some(created.path.clone()));

        for i in 0..3 {
            let row = NumericArray::from_row(vec![i as f64, 0.5]);
            let written = storage.append_data_file(&row, None).unwrap();
            assert_eq!(written.shape, (1, 2));
        }

        let loaded = storage.load_data(&created.path).unwrap();
        assert_eq!(loaded.data.shape(), &[3, 2]);
        assert_eq!(loaded.data.values(), &[0.0, 0.5, 1.0, 0.5, 2.0, 0.5]);
    }

    #[test]
    fn test_newest_file_becomes_open_file() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp, StorageSettings::default());
        storage
            .new_data_file(&SaveOptions::new().with_filename("first"))
            .unwrap();
        let second = storage
            .new_data_file(&SaveOptions::new().with_filename("second"))
            .unwrap();
        assert_eq!(storage.open_file(), Some(second.path));
    }

    #[test]
    fn test_format_mismatch_creates_no_file() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(
            &tmp,
            StorageSettings::default().with_column_formats(["%d", "%.2f", "%.2f"]),
        );
        let data = NumericArray::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        let err = storage
            .save_data(&data, &SaveOptions::new().with_filename("x"))
            .unwrap_err();
        assert!(matches!(
            err,
            LabstoreError::FormatMismatch {
                expected: 3,
                found: 2
            }
        ));
        assert!(!tmp.path().join("x.dat").exists());
    }

    #[test]
    fn test_uncommented_round_trip() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(
            &tmp,
            StorageSettings::default()
                .with_comments(None)
                .with_delimiter(" ")
                .with_column_headers(ColumnHeaders::names(["a", "b"])),
        );
        let data = NumericArray::from_rows(vec![vec![1.5, -2.0], vec![3.0, 4.25]]).unwrap();
        let metadata = Metadata::new().with("sample", "quartz").with("temp", 4.2);
        let written = storage
            .save_data(
                &data,
                &SaveOptions::new()
                    .with_metadata(metadata.clone())
                    .with_notes("cooled overnight")
                    .with_timestamp(ts()),
            )
            .unwrap();

        let loaded = storage.load_data(&written.path).unwrap();
        assert_eq!(loaded.data, data);
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.notes.as_deref(), Some("cooled overnight"));
        assert_eq!(loaded.column_headers, Some(ColumnHeaders::names(["a", "b"])));
        assert_eq!(loaded.timestamp, Some(ts()));
    }

    #[test]
    fn test_csv_forces_comma_and_bare_header_row() {
        let tmp = TempDir::new().unwrap();
        let storage = DelimitedTextStorage::csv(
            StorageSettings::new(tmp.path())
                .with_delimiter("\t")
                .with_number_format("%.2f")
                .with_column_headers(ColumnHeaders::names(["x", "y"])),
        )
        .unwrap()
        .with_global_metadata(Arc::new(GlobalMetadata::new()));
        assert_eq!(storage.variant(), FormatVariant::Csv);

        let data = NumericArray::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        let written = storage
            .save_data(&data, &SaveOptions::new().with_timestamp(ts()))
            .unwrap();
        assert_eq!(
            written.path,
            tmp.path().join("20210130-1130-59.csv")
        );

        let content = fs::read_to_string(&written.path).unwrap();
        assert!(content.ends_with("# Data:\n# =====\nx,y\n1.00,2.00\n"));

        let loaded = storage.load_data(&written.path).unwrap();
        assert_eq!(loaded.data, data);
        assert_eq!(loaded.column_headers, Some(ColumnHeaders::names(["x", "y"])));
    }

    #[test]
    fn test_numeric_column_names_round_trip() {
        let tmp = TempDir::new().unwrap();
        let wavelengths = ColumnHeaders::names(["400", "500"]);
        let data = NumericArray::from_rows(vec![vec![1.0, 2.0]]).unwrap();

        let csv = DelimitedTextStorage::csv(
            StorageSettings::new(tmp.path()).with_column_headers(wavelengths.clone()),
        )
        .unwrap()
        .with_global_metadata(Arc::new(GlobalMetadata::new()));
        let uncommented = storage(
            &tmp,
            StorageSettings::default()
                .with_comments(None)
                .with_column_headers(wavelengths.clone()),
        );
        let storages: [&dyn DataStorage; 2] = [&csv, &uncommented];

        for (i, storage) in storages.into_iter().enumerate() {
            let written = storage
                .save_data(&data, &SaveOptions::new().with_filename(format!("spectrum{i}")))
                .unwrap();
            let loaded = storage.load_data(&written.path).unwrap();
            assert_eq!(loaded.data, data, "{}", storage.name());
            assert_eq!(loaded.column_headers, Some(wavelengths.clone()), "{}", storage.name());
        }
    }

    #[test]
    fn test_zero_columns_rejected_before_creating_file() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp, StorageSettings::default());
        let err = storage
            .save_data(
                &NumericArray::from_row(vec![]),
                &SaveOptions::new().with_filename("empty"),
            )
            .unwrap_err();
        assert!(matches!(err, LabstoreError::ShapeMismatch(_)));
        assert!(!tmp.path().join("empty.dat").exists());

        let created = storage
            .new_data_file(&SaveOptions::new().with_filename("open"))
            .unwrap();
        let empty_rows = NumericArray::from_shape_vec(vec![3, 0], vec![]).unwrap();
        let err = storage.append_data_file(&empty_rows, None).unwrap_err();
        assert!(matches!(err, LabstoreError::ShapeMismatch(_)));

        let loaded = storage.load_data(&created.path).unwrap();
        assert_eq!(loaded.data.shape(), &[0, 0]);
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp, StorageSettings::default());
        let path = tmp.path().join("foreign.dat");
        fs::write(&path, "hello\nworld\n1\t2\n").unwrap();
        assert!(matches!(
            storage.load_data(&path),
            Err(LabstoreError::LoadParseError { .. })
        ));
    }
}
