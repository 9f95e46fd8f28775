//! Binary array storage: an NPY file for the data plus a text sidecar for
//! the header.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{info, warn};

use super::{DataStorage, SaveOptions, StorageCore};
use crate::error::{LabstoreError, Result};
use crate::header::{self, HeaderStyle, SIDECAR_DELIMITER};
use crate::models::{element_count, ColumnHeaders, LoadedData, NumericArray, WriteResult};
use crate::paths::DataRoot;
use crate::registry::GlobalMetadata;
use crate::settings::StorageSettings;

pub const NPY_EXTENSION: &str = ".npy";
pub const SIDECAR_SUFFIX: &str = "_metadata.txt";

const MAGIC: &[u8] = b"\x93NUMPY";
const DESCR: &str = "<f8";
const ALIGNMENT: usize = 64;

// ─── NPY codec ───────────────────────────────────────────────────────────────

/// Write `data` as an NPY v1.0 array of little-endian `f64` in C order.
pub fn write_npy<W: Write>(writer: &mut W, data: &NumericArray) -> io::Result<()> {
    let shape = match data.shape() {
        [n] => format!("({n},)"),
        dims => {
            let dims: Vec<String> = dims.iter().map(usize::to_string).collect();
            format!("({})", dims.join(", "))
        }
    };
    let mut dict = format!("{{'descr': '{DESCR}', 'fortran_order': False, 'shape': {shape}, }}");
    // magic + version + u16 length + dict + newline, padded to the alignment
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let header_len = u16::try_from(dict.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NPY header too long"))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_u16::<LittleEndian>(header_len)?;
    writer.write_all(dict.as_bytes())?;
    for value in data.values() {
        writer.write_f64::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Read an NPY array of little-endian `f64` in C order (format version 1.0
/// or 2.0). Anything else is `InvalidData`.
pub fn read_npy<R: Read>(reader: &mut R) -> io::Result<NumericArray> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid("not an NPY file"));
    }
    let major = reader.read_u8()?;
    let _minor = reader.read_u8()?;
    let header_len = match major {
        1 => reader.read_u16::<LittleEndian>()? as usize,
        2 => reader.read_u32::<LittleEndian>()? as usize,
        v => return Err(invalid(&format!("unsupported NPY version {v}"))),
    };
    let mut dict = vec![0u8; header_len];
    reader.read_exact(&mut dict)?;
    let dict = String::from_utf8(dict).map_err(|_| invalid("NPY header is not UTF-8"))?;

    let descr = dict_value(&dict, "descr")
        .and_then(|v| v.strip_prefix(['\'', '"']))
        .and_then(|v| v.split(['\'', '"']).next())
        .ok_or_else(|| invalid("NPY header has no descr"))?;
    if descr != DESCR {
        return Err(invalid(&format!("unsupported dtype {descr}, expected {DESCR}")));
    }
    if !dict_value(&dict, "fortran_order").is_some_and(|v| v.starts_with("False")) {
        return Err(invalid("Fortran-ordered arrays are not supported"));
    }
    let shape = dict_value(&dict, "shape")
        .and_then(|v| v.strip_prefix('('))
        .and_then(|v| v.split(')').next())
        .ok_or_else(|| invalid("NPY header has no shape"))?;
    let shape = shape
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>().map_err(|_| invalid(&format!("bad dimension {d:?}"))))
        .collect::<io::Result<Vec<usize>>>()?;

    let mut bytes = vec![];
    reader.read_to_end(&mut bytes)?;
    let needed = element_count(&shape)
        .and_then(|count| count.checked_mul(8))
        .filter(|&needed| needed <= bytes.len())
        .ok_or_else(|| {
            invalid(&format!(
                "shape {shape:?} does not fit the {} data bytes in the file",
                bytes.len()
            ))
        })?;
    let mut values = vec![0.0; needed / 8];
    LittleEndian::read_f64_into(&bytes[..needed], &mut values);
    NumericArray::from_shape_vec(shape, values).map_err(|e| invalid(&e.to_string()))
}

fn dict_value<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = dict.find(&pattern)? + pattern.len();
    Some(dict[start..].trim_start())
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// `<dir>/<stem>_metadata.txt` for a primary file `<dir>/<stem>.npy`.
pub fn sidecar_path(primary: &Path) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    primary.with_file_name(format!("{stem}{SIDECAR_SUFFIX}"))
}

// ─── Storage ─────────────────────────────────────────────────────────────────

/// Saves arrays as `.npy` files with the header in a sidecar text file.
/// Appending is not supported.
#[derive(Debug)]
pub struct BinaryArrayStorage {
    core: StorageCore,
    style: HeaderStyle,
}

impl BinaryArrayStorage {
    /// The configured extension is ignored; files always end in `.npy`.
    pub fn new(settings: StorageSettings) -> Result<Self> {
        let settings = StorageSettings {
            file_extension: Some(NPY_EXTENSION.to_string()),
            ..settings
        };
        Ok(Self {
            core: StorageCore::new(settings, NPY_EXTENSION)?,
            style: HeaderStyle::sidecar(),
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
}

impl DataStorage for BinaryArrayStorage {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn core(&self) -> &StorageCore {
        &self.core
    }

    fn header_style(&self) -> &HeaderStyle {
        &self.style
    }

    fn save_data(&self, data: &NumericArray, options: &SaveOptions) -> Result<WriteResult> {
        let (rows, columns) = data.table_shape()?;
        let timestamp = options.timestamp_or_now();
        let header = self.create_header(&options.metadata, options.notes.as_deref(), timestamp)?;
        let path = self.core.resolve(options, timestamp)?;

        let mut writer = BufWriter::new(File::create(&path)?);
        write_npy(&mut writer, data)?;
        writer.flush()?;

        let sidecar = sidecar_path(&path);
        if let Err(source) = fs::write(&sidecar, header) {
            warn!(
                primary = %path.display(),
                sidecar = %sidecar.display(),
                error = %source,
                "Sidecar write failed, data file left in place"
            );
            return Err(LabstoreError::PartialWriteFailure {
                primary: path,
                sidecar,
                source,
            });
        }

        info!(path = %path.display(), rows, columns, "Saved data");
        Ok(WriteResult {
            path,
            timestamp,
            shape: (rows, columns),
        })
    }

    fn append_data(&self, _data: &NumericArray, _path: Option<&Path>) -> Result<WriteResult> {
        Err(LabstoreError::Unsupported {
            backend: self.name(),
            operation: "append_data",
        })
    }

    fn load_data(&self, path: &Path) -> Result<LoadedData> {
        let mut reader = BufReader::new(File::open(path)?);
        let data = read_npy(&mut reader).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                LabstoreError::parse(path, e.to_string())
            }
            _ => LabstoreError::Io(e),
        })?;

        let sidecar = sidecar_path(path);
        let content = fs::read_to_string(&sidecar)?;
        let lines: Vec<&str> = content.lines().collect();
        let (parsed, _) =
            header::parse(&self.style, &lines).map_err(|m| LabstoreError::parse(&sidecar, m))?;

        let columns = data.table_shape().ok().map(|(_, c)| c);
        let column_headers = parsed
            .column_line
            .as_deref()
            .map(|line| ColumnHeaders::decode(line, SIDECAR_DELIMITER, columns));

        Ok(LoadedData {
            data,
            metadata: parsed.metadata,
            column_headers,
            notes: parsed.notes,
            timestamp: parsed.timestamp,
        })
    }
}
