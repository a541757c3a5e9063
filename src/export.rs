//! CSV export of a rendered table through polars, optionally compressed.

use crate::record::display_value;
use crate::table::RenderableTable;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use opdash_cli::CompressionFormat;
use polars::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub delimiter: u8,
    pub include_header: bool,
    /// `None` detects the format from the file extension.
    pub compression: Option<CompressionFormat>,
    /// Export every filtered row instead of the current page only.
    pub all_rows: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            include_header: true,
            compression: None,
            all_rows: false,
        }
    }
}

/// Build a string-typed DataFrame of the rows being exported, in view order.
pub fn table_to_dataframe(table: &RenderableTable, all_rows: bool) -> Result<DataFrame> {
    let rows = if all_rows {
        table.visible_rows()
    } else {
        table.current_page()
    };
    let columns: Vec<Column> = table
        .columns()
        .iter()
        .map(|name| {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| {
                    row.get(name)
                        .filter(|v| !v.is_null())
                        .map(display_value)
                })
                .collect();
            Series::new(name.as_str().into(), values).into()
        })
        .collect();
    DataFrame::new(columns).map_err(|e| eyre!("Failed to build export frame: {}", e))
}

/// Write the table to `path`. Returns the number of data rows written.
pub fn write_csv(table: &RenderableTable, path: &Path, options: &ExportOptions) -> Result<usize> {
    let mut df = table_to_dataframe(table, options.all_rows)?;
    let compression = options
        .compression
        .or_else(|| CompressionFormat::from_extension(path));

    let file = File::create(path)
        .map_err(|e| eyre!("Failed to create {}: {}", path.display(), e))?;
    let writer: Box<dyn Write> = match compression {
        Some(CompressionFormat::Gzip) => Box::new(flate2::write::GzEncoder::new(
            file,
            flate2::Compression::default(),
        )),
        Some(CompressionFormat::Zstd) => Box::new(zstd::Encoder::new(file, 0)?.auto_finish()),
        Some(CompressionFormat::Bzip2) => Box::new(bzip2::write::BzEncoder::new(
            file,
            bzip2::Compression::default(),
        )),
        Some(CompressionFormat::Xz) => Box::new(xz2::write::XzEncoder::new(file, 6)),
        None => Box::new(file),
    };
    CsvWriter::new(writer)
        .with_separator(options.delimiter)
        .include_header(options.include_header)
        .finish(&mut df)?;

    tracing::debug!(path = %path.display(), rows = df.height(), ?compression, "exported csv");
    Ok(df.height())
}

/// Render the table as uncompressed CSV text.
pub fn to_csv_string(table: &RenderableTable, options: &ExportOptions) -> Result<String> {
    let mut df = table_to_dataframe(table, options.all_rows)?;
    let mut buf: Vec<u8> = Vec::new();
    CsvWriter::new(&mut buf)
        .with_separator(options.delimiter)
        .include_header(options.include_header)
        .finish(&mut df)?;
    String::from_utf8(buf).map_err(|e| eyre!("Export produced invalid UTF-8: {}", e))
}
