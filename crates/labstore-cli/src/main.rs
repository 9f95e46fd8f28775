//! labstore CLI: save numeric tables with metadata headers, inspect and
//! export stored data files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use labstore::{
    list_data_files, ColumnHeaders, DataStorage, LoadedData, Metadata, MetadataValue,
    NumericArray, SaveOptions, StorageKind, StorageSettings,
};

#[derive(Parser)]
#[command(
    name = "labstore",
    about = "labstore: measurement data files with metadata headers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a numeric table (whitespace or comma separated) with a header
    Save {
        /// Input table; lines starting with '#' are skipped
        input: PathBuf,
        /// Storage format
        #[arg(long, short, default_value = "text", value_parser = ["text", "csv", "npy"])]
        format: String,
        /// Root directory (overrides the settings file)
        #[arg(long, short)]
        dir: Option<PathBuf>,
        /// Label appended to the generated file name
        #[arg(long, short)]
        nametag: Option<String>,
        /// Explicit file name instead of the generated one
        #[arg(long)]
        filename: Option<String>,
        /// Free-form notes written into the header
        #[arg(long)]
        notes: Option<String>,
        /// Metadata entry, repeatable
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
        /// Column names, comma separated
        #[arg(long)]
        columns: Option<String>,
        /// Storage settings (YAML)
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Save into a YYYY/MM/YYYY-MM-DD sub-directory
        #[arg(long)]
        daily: bool,
    },
    /// Show header, metadata and shape of a data file
    Inspect {
        file: PathBuf,
        /// Storage format (default: from the file extension)
        #[arg(long, short, value_parser = ["text", "csv", "npy"])]
        format: Option<String>,
        /// Storage settings (YAML) the file was written with
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Export a data file to CSV or JSON
    Export {
        file: PathBuf,
        /// Storage format (default: from the file extension)
        #[arg(long, short, value_parser = ["text", "csv", "npy"])]
        format: Option<String>,
        /// Output format
        #[arg(long, default_value = "csv", value_parser = ["csv", "json"])]
        to: String,
        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Storage settings (YAML) the file was written with
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// List data files in a directory
    List {
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Only files with this extension
        #[arg(long, short)]
        ext: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Save {
            input,
            format,
            dir,
            nametag,
            filename,
            notes,
            meta,
            columns,
            config,
            daily,
        } => {
            let mut settings = load_settings(config.as_deref())?;
            if let Some(dir) = dir {
                settings.root_dir = Some(dir);
            }
            if daily {
                settings.use_daily_dir = true;
            }
            if let Some(columns) = columns {
                settings.column_headers =
                    Some(ColumnHeaders::names(columns.split(',').map(str::trim)));
            }
            let options = SaveOptions {
                metadata: parse_meta(&meta)?,
                notes,
                nametag,
                timestamp: None,
                filename,
            };
            cmd_save(&input, parse_kind(&format)?, settings, &options)?;
        }
        Commands::Inspect {
            file,
            format,
            config,
        } => {
            let loaded = load(&file, format.as_deref(), config.as_deref())?;
            cmd_inspect(&file, &loaded);
        }
        Commands::Export {
            file,
            format,
            to,
            output,
            config,
        } => {
            let loaded = load(&file, format.as_deref(), config.as_deref())?;
            cmd_export(&loaded, &to, output)?;
        }
        Commands::List { dir, ext } => {
            cmd_list(&dir, ext.as_deref())?;
        }
    }

    Ok(())
}

// ─── Command implementations ──────────────────────────────────────────────────

fn cmd_save(
    input: &Path,
    kind: StorageKind,
    settings: StorageSettings,
    options: &SaveOptions,
) -> Result<()> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let data = parse_table(&content)
        .with_context(|| format!("Failed to parse table in {}", input.display()))?;

    let storage = kind.open(settings).context("Invalid storage settings")?;
    let written = storage.save_data(&data, options)?;

    let (rows, columns) = written.shape;
    println!("Saved {rows}x{columns} {kind} data to {}", written.path.display());
    Ok(())
}

fn cmd_inspect(file: &Path, loaded: &LoadedData) {
    println!("File: {}", file.display());
    if let Some(ts) = loaded.timestamp {
        println!("Saved: {}", ts.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("Shape: {:?}", loaded.data.shape());
    if let Some(headers) = &loaded.column_headers {
        println!("Columns: {}", headers.render(", "));
    }
    println!();

    if let Some(notes) = &loaded.notes {
        println!("── Notes ───────────────────────────────");
        println!("{notes}");
        println!();
    }

    if loaded.metadata.is_empty() {
        println!("No metadata");
        return;
    }

    println!("── Metadata ({}) ────────────────────────", loaded.metadata.len());
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Key", "Value", "Type"]);
    for (key, value) in loaded.metadata.iter() {
        table.add_row([key, &value.to_string(), value_type(value)]);
    }
    println!("{table}");
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    timestamp: Option<NaiveDateTime>,
    notes: Option<&'a str>,
    metadata: &'a Metadata,
    column_headers: Option<&'a ColumnHeaders>,
    shape: &'a [usize],
    data: Vec<&'a [f64]>,
}

fn cmd_export(loaded: &LoadedData, to: &str, output: Option<PathBuf>) -> Result<()> {
    let rows: Vec<&[f64]> = loaded.data.rows()?.collect();

    let content = match to {
        "json" => {
            let document = ExportDocument {
                timestamp: loaded.timestamp,
                notes: loaded.notes.as_deref(),
                metadata: &loaded.metadata,
                column_headers: loaded.column_headers.as_ref(),
                shape: loaded.data.shape(),
                data: rows.clone(),
            };
            serde_json::to_string_pretty(&document)? + "\n"
        }
        "csv" => {
            let mut out = String::new();
            if let Some(headers) = &loaded.column_headers {
                out += &(headers.render(",") + "\n");
            }
            for row in &rows {
                let cells: Vec<String> = row.iter().map(f64::to_string).collect();
                out += &(cells.join(",") + "\n");
            }
            out
        }
        _ => anyhow::bail!("Unknown export format: {}", to),
    };

    match output {
        Some(path) => {
            fs::write(&path, &content)?;
            println!("Exported {} rows to {}", rows.len(), path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

fn cmd_list(dir: &Path, ext: Option<&str>) -> Result<()> {
    let files = list_data_files(dir, ext)?;
    if files.is_empty() {
        println!("No data files found in '{}'", dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["File", "Format", "Size"]);
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        table.add_row([
            name.as_str(),
            &StorageKind::from_path(path).to_string(),
            &format!("{size} B"),
        ]);
    }

    println!("Data files in: {}", dir.display());
    println!("{table}");
    Ok(())
}

// ─── Utilities ────────────────────────────────────────────────────────────────

fn load_settings(config: Option<&Path>) -> Result<StorageSettings> {
    match config {
        Some(path) => StorageSettings::from_yaml_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(StorageSettings::default()),
    }
}

fn parse_kind(format: &str) -> Result<StorageKind> {
    Ok(format.parse::<StorageKind>()?)
}

fn load(file: &Path, format: Option<&str>, config: Option<&Path>) -> Result<LoadedData> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let kind = match format {
        Some(format) => parse_kind(format)?,
        None => StorageKind::from_path(file),
    };
    let storage = kind.open(load_settings(config)?)?;
    storage
        .load_data(file)
        .with_context(|| format!("Failed to load {}", file.display()))
}

fn parse_meta(entries: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("Metadata entry {entry:?} is not KEY=VALUE"))?;
        metadata.insert(key.trim(), MetadataValue::parse(value.trim()));
    }
    Ok(metadata)
}

/// Rows of numbers separated by commas and/or whitespace. Blank lines and
/// lines starting with `#` are skipped.
fn parse_table(content: &str) -> Result<NumericArray> {
    let mut rows = vec![];
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .map(|field| {
                field
                    .parse::<f64>()
                    .with_context(|| format!("line {}: {field:?} is not a number", index + 1))
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    if rows.is_empty() {
        anyhow::bail!("no data rows");
    }
    let data = NumericArray::from_rows(rows)?;
    debug!(shape = ?data.shape(), "Parsed input table");
    Ok(data)
}

fn value_type(value: &MetadataValue) -> &'static str {
    match value {
        MetadataValue::Int(_) => "int",
        MetadataValue::Float(_) => "float",
        MetadataValue::Text(_) => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_mixed_separators() {
        let data = parse_table("# comment\n1, 2 3\n\n4 5,6\n").unwrap();
        assert_eq!(data.shape(), &[2, 3]);
        assert_eq!(data.values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_parse_table_errors() {
        assert!(parse_table("1 2\n3\n").is_err());
        assert!(parse_table("1 x\n").is_err());
        assert!(parse_table("# only comments\n").is_err());
    }

    #[test]
    fn test_parse_meta() {
        let metadata =
            parse_meta(&["gain=5".to_string(), "sample = quartz".to_string()]).unwrap();
        assert_eq!(metadata.get("gain"), Some(&MetadataValue::Int(5)));
        assert_eq!(
            metadata.get("sample"),
            Some(&MetadataValue::Text("quartz".into()))
        );
        assert!(parse_meta(&["novalue".to_string()]).is_err());
    }
}
