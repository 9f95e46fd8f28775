//! labstore-core: measurement data persistence.
//!
//! Tabular numeric data is written together with a human-readable header
//! (timestamp, notes, metadata, column headers) by one of several storage
//! backends sharing the [`DataStorage`] contract. A process-wide
//! [`GlobalMetadata`] registry is merged into every header unless disabled.

pub mod error;
pub mod fitting;
pub mod header;
pub mod models;
pub mod naming;
pub mod number_format;
pub mod paths;
pub mod registry;
pub mod settings;
pub mod storage;

pub use error::{LabstoreError, Result};
pub use fitting::{FitConfiguration, FitConfigurations, FitContainer, FitModel, FitResult, NO_FIT};
pub use header::FormatVariant;
pub use models::{
    ColumnHeaders, ImageFormat, LoadedData, Metadata, MetadataValue, NumericArray, WriteResult,
};
pub use naming::{generic_filename, normalize_nametag};
pub use paths::{daily_subpath, list_data_files, DataRoot, FixedDataRoot, HomeDataRoot, PathResolver};
pub use registry::GlobalMetadata;
pub use settings::StorageSettings;
pub use storage::{
    BinaryArrayStorage, DataStorage, DelimitedTextStorage, Figure, SaveOptions, StorageKind,
};
