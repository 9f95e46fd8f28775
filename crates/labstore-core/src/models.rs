//! Data models for labstore.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{LabstoreError, Result};
use crate::number_format::format_scientific;

/// Fractional digits used when rendering float metadata values.
pub const METADATA_FLOAT_PRECISION: usize = 18;

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Parse a rendered value back into the most specific variant.
    pub fn parse(text: &str) -> Self {
        if let Ok(v) = text.parse::<i64>() {
            return MetadataValue::Int(v);
        }
        if let Ok(v) = text.parse::<f64>() {
            return MetadataValue::Float(v);
        }
        MetadataValue::Text(text.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Text(_) => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => {
                f.write_str(&format_scientific(*v, METADATA_FLOAT_PRECISION, false))
            }
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}
impl From<f32> for MetadataValue {
    fn from(v: f32) -> Self {
        MetadataValue::Float(v as f64)
    }
}
impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}
impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        MetadataValue::Int(v as i64)
    }
}
impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Int(v as i64)
    }
}
impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Int(v as i64)
    }
}
impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Text(if v { "True" } else { "False" }.to_string())
    }
}
impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}
impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

/// Insertion-ordered metadata mapping. Inserting an existing key replaces
/// its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Option<MetadataValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Right-biased merge: keys in `other` win, new keys keep their order.
    pub fn merged(&self, other: &Metadata) -> Metadata {
        let mut merged = self.clone();
        merged.extend(other.clone());
        merged
    }

    /// Keys must be non-empty single lines without `": "`; text values must
    /// be single lines. Anything else would not survive a header round trip.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.iter() {
            let bad_key = key.trim().is_empty() || key.contains('\n') || key.contains(": ");
            let bad_value = matches!(value, MetadataValue::Text(t) if t.contains('\n'));
            if bad_key || bad_value {
                return Err(LabstoreError::InvalidMetadata(key.to_string()));
            }
        }
        Ok(())
    }
}

impl Extend<(String, MetadataValue)> for Metadata {
    fn extend<I: IntoIterator<Item = (String, MetadataValue)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

impl IntoIterator for Metadata {
    type Item = (String, MetadataValue);
    type IntoIter = std::vec::IntoIter<(String, MetadataValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Column headers written above the data rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnHeaders {
    /// Written verbatim.
    Raw(String),
    /// Joined with the storage delimiter.
    Names(Vec<String>),
}

impl ColumnHeaders {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnHeaders::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn render(&self, delimiter: &str) -> String {
        match self {
            ColumnHeaders::Raw(line) => line.clone(),
            ColumnHeaders::Names(names) => names.join(delimiter),
        }
    }

    /// Decode a rendered header line. The line is read as a list of names
    /// when splitting on `delimiter` yields exactly one name per data column
    /// (or more than one name if the column count is unknown).
    pub fn decode(line: &str, delimiter: &str, columns: Option<usize>) -> Self {
        let parts: Vec<&str> = line.split(delimiter).collect();
        let is_names = match columns {
            Some(n) => parts.len() == n && (n > 1 || !line.is_empty()),
            None => parts.len() > 1,
        };
        if is_names {
            ColumnHeaders::names(parts)
        } else {
            ColumnHeaders::Raw(line.to_string())
        }
    }

    /// Empty headers are treated as absent; names must be non-empty.
    pub(crate) fn normalized(headers: Option<ColumnHeaders>) -> Result<Option<ColumnHeaders>> {
        match headers {
            None => Ok(None),
            Some(ColumnHeaders::Raw(line)) if line.is_empty() => Ok(None),
            Some(ColumnHeaders::Names(names)) if names.is_empty() => Ok(None),
            Some(ColumnHeaders::Raw(line)) if line.contains('\n') => Err(
                LabstoreError::InvalidConfig("column header line must be a single line".into()),
            ),
            Some(ColumnHeaders::Names(names)) => {
                if names.iter().any(|n| n.is_empty() || n.contains('\n')) {
                    return Err(LabstoreError::InvalidConfig(
                        "column header names must be non-empty single-line strings".into(),
                    ));
                }
                Ok(Some(ColumnHeaders::Names(names)))
            }
            Some(raw) => Ok(Some(raw)),
        }
    }
}

/// Number of elements in an array of `shape`, `None` on overflow.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

/// Row-major array of `f64` values with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl NumericArray {
    /// A 1-D array.
    pub fn from_row(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    /// A 2-D array; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let columns = rows.first().map_or(0, Vec::len);
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns) {
            return Err(LabstoreError::ShapeMismatch(format!(
                "row {index} has {} values, expected {columns}",
                row.len()
            )));
        }
        Ok(Self {
            shape: vec![rows.len(), columns],
            values: rows.into_iter().flatten().collect(),
        })
    }

    /// Any rank. The product of `shape` must equal `values.len()`.
    pub fn from_shape_vec(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let expected = element_count(&shape).ok_or_else(|| {
            LabstoreError::ShapeMismatch(format!("shape {shape:?} overflows the address space"))
        })?;
        if expected != values.len() {
            return Err(LabstoreError::ShapeMismatch(format!(
                "shape {shape:?} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// (rows, columns) as written to a table; a 1-D array is a single row.
    pub fn table_shape(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            [n] => Ok((1, *n)),
            [rows, columns] => Ok((*rows, *columns)),
            _ => Err(LabstoreError::UnsupportedShape { ndim: self.ndim() }),
        }
    }

    /// Iterate table rows.
    pub fn rows(&self) -> Result<impl Iterator<Item = &[f64]>> {
        let (rows, columns) = self.table_shape()?;
        Ok((0..rows).map(move |i| &self.values[i * columns..(i + 1) * columns]))
    }
}

/// Outcome of a successful save or append.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    pub path: PathBuf,
    pub timestamp: NaiveDateTime,
    /// (rows, columns) written.
    pub shape: (usize, usize),
}

/// Everything recovered from a stored data set.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedData {
    pub data: NumericArray,
    pub metadata: Metadata,
    pub column_headers: Option<ColumnHeaders>,
    pub notes: Option<String>,
    /// Timestamp from the header title line, if it could be read.
    pub timestamp: Option<NaiveDateTime>,
}

/// Image format used for thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageFormat {
    #[default]
    Png,
    Pdf,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => ".png",
            ImageFormat::Pdf => ".pdf",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = LabstoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "pdf" => Ok(ImageFormat::Pdf),
            _ => Err(LabstoreError::UnsupportedImageFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for ImageFormat {
    type Error = LabstoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ImageFormat> for String {
    fn from(format: ImageFormat) -> Self {
        format.to_string()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Pdf => write!(f, "pdf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_metadata_value_rendering() {
        assert_eq!(MetadataValue::Int(5).to_string(), "5");
        assert_eq!(
            MetadataValue::Float(0.5).to_string(),
            "5.000000000000000000e-01"
        );
        assert_eq!(MetadataValue::from("laser on").to_string(), "laser on");
    }

    #[test]
    fn test_metadata_value_parse() {
        assert_eq!(MetadataValue::parse("5"), MetadataValue::Int(5));
        assert_eq!(MetadataValue::parse("-12"), MetadataValue::Int(-12));
        assert_eq!(
            MetadataValue::parse("2.500000000000000000e+00"),
            MetadataValue::Float(2.5)
        );
        assert_eq!(
            MetadataValue::parse("sample A"),
            MetadataValue::Text("sample A".into())
        );
    }

    #[test]
    fn test_metadata_preserves_insertion_order() {
        let mut metadata = Metadata::new().with("b", 1).with("a", 2);
        assert_eq!(metadata.insert("b", 3), Some(MetadataValue::Int(1)));
        let keys: Vec<&str> = metadata.keys().collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(metadata.get("b"), Some(&MetadataValue::Int(3)));
    }

    #[test]
    fn test_merge_is_right_biased() {
        let global = Metadata::new().with("gain", 1).with("operator", "ada");
        let local = Metadata::new().with("gain", 5).with("run", 7);
        let merged = global.merged(&local);
        let keys: Vec<&str> = merged.keys().collect();
        assert_eq!(keys, ["gain", "operator", "run"]);
        assert_eq!(merged.get("gain"), Some(&MetadataValue::Int(5)));
    }

    #[test]
    fn test_validate() {
        assert!(Metadata::new().with("ok", 1).validate().is_ok());
        for bad in ["", "  ", "two\nlines", "a: b"] {
            let err = Metadata::new().with(bad, 1).validate().unwrap_err();
            assert!(matches!(err, LabstoreError::InvalidMetadata(_)));
        }
        let err = Metadata::new().with("note", "a\nb").validate().unwrap_err();
        assert!(matches!(err, LabstoreError::InvalidMetadata(ref k) if k == "note"));
    }

    #[test]
    fn test_metadata_serializes_as_map() {
        let metadata = Metadata::new().with("gain", 5).with("label", "x");
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"gain":5,"label":"x"}"#);
    }

    #[test]
    fn test_column_header_decode() {
        assert_eq!(
            ColumnHeaders::decode("x\ty", "\t", Some(2)),
            ColumnHeaders::names(["x", "y"])
        );
        assert_eq!(
            ColumnHeaders::decode("time (s)", "\t", Some(2)),
            ColumnHeaders::Raw("time (s)".into())
        );
        assert_eq!(
            ColumnHeaders::decode("a,b,c", ",", None),
            ColumnHeaders::names(["a", "b", "c"])
        );
    }

    #[test]
    fn test_numeric_array_shapes() {
        let row = NumericArray::from_row(vec![1.0, 2.0, 3.0]);
        assert_eq!(row.table_shape().unwrap(), (1, 3));

        let table = NumericArray::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(table.shape(), &[2, 2]);
        let rows: Vec<&[f64]> = table.rows().unwrap().collect();
        assert_eq!(rows, vec![&[1.0, 2.0][..], &[3.0, 4.0][..]]);

        let cube = NumericArray::from_shape_vec(vec![2, 2, 2], vec![0.0; 8]).unwrap();
        assert!(matches!(
            cube.table_shape(),
            Err(LabstoreError::UnsupportedShape { ndim: 3 })
        ));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = NumericArray::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, LabstoreError::ShapeMismatch(_)));
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        assert_eq!(element_count(&[usize::MAX, 2]), None);
        assert_eq!(element_count(&[3, 0, usize::MAX]), Some(0));
        let err = NumericArray::from_shape_vec(vec![1 << 32, 1 << 32], vec![]).unwrap_err();
        assert!(matches!(err, LabstoreError::ShapeMismatch(_)));
    }

    #[test]
    fn test_image_format_parse() {
        assert_eq!("png".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert_eq!(".PDF".parse::<ImageFormat>().unwrap(), ImageFormat::Pdf);
        assert!(matches!(
            "svg".parse::<ImageFormat>(),
            Err(LabstoreError::UnsupportedImageFormat(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_merge_keeps_every_key_and_prefers_local(
            global in prop::collection::btree_map("[a-e]", 0i64..100, 0..5),
            local in prop::collection::btree_map("[a-e]", 100i64..200, 0..5),
        ) {
            let global: Metadata = global.into_iter().collect();
            let local: Metadata = local.into_iter().collect();
            let merged = global.merged(&local);

            for key in global.keys().chain(local.keys()) {
                prop_assert!(merged.contains_key(key));
            }
            for (key, value) in local.iter() {
                prop_assert_eq!(merged.get(key), Some(value));
            }
            let distinct = global.keys().filter(|k| !local.contains_key(k)).count() + local.len();
            prop_assert_eq!(merged.len(), distinct);
        }
    }
}
