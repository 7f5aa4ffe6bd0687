use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use calamine::{Data, Reader, Xlsx};
use thiserror::Error;
use tracing::{debug, info};

use crate::seller::SellerRecord;

/// UTF-8 signature written ahead of the CSV so spreadsheet apps detect the encoding.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid XLSX: {0}")]
    Xlsx(#[from] calamine::XlsxError),
    #[error("Workbook has no worksheets")]
    EmptyWorkbook,
    #[error("Unsupported input format: {0} (expected .csv or .xlsx)")]
    UnsupportedFormat(String),
    #[error("Row {row}: seller id {value:?} is not a number")]
    InvalidSellerId { row: usize, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Xlsx,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self, SpreadsheetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_name(ext)
    }

    pub fn from_name(name: &str) -> Result<Self, SpreadsheetError> {
        match name.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" => Ok(Self::Xlsx),
            other => Err(SpreadsheetError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn read_seller_ids(path: &Path) -> Result<Vec<u64>, SpreadsheetError> {
    let format = InputFormat::from_path(path)?;
    info!("Reading seller ids from {:?}", path);
    let bytes = fs::read(path)?;
    read_seller_ids_from_bytes(&bytes, format)
}

/// Seller ids from the first column; the first row is a header and blank cells are skipped.
pub fn read_seller_ids_from_bytes(
    bytes: &[u8],
    format: InputFormat,
) -> Result<Vec<u64>, SpreadsheetError> {
    let ids = match format {
        InputFormat::Csv => csv_first_column(bytes)?,
        InputFormat::Xlsx => xlsx_first_column(bytes)?,
    };
    info!("Found {} seller ids", ids.len());
    Ok(ids)
}

fn csv_first_column(bytes: &[u8]) -> Result<Vec<u64>, SpreadsheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut ids = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let cell = record.get(0).unwrap_or_default();
        if let Some(id) = parse_seller_id(cell, idx + 2)? {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn xlsx_first_column(bytes: &[u8]) -> Result<Vec<u64>, SpreadsheetError> {
    let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SpreadsheetError::EmptyWorkbook)??;

    let mut ids = Vec::new();
    for (idx, row) in range.rows().enumerate().skip(1) {
        let row_number = idx + 1;
        let id = match row.first() {
            None | Some(Data::Empty) => None,
            Some(Data::Int(i)) => Some(u64::try_from(*i).map_err(|_| {
                SpreadsheetError::InvalidSellerId {
                    row: row_number,
                    value: i.to_string(),
                }
            })?),
            Some(Data::Float(f)) => Some(float_id(*f, row_number)?),
            Some(Data::String(s)) => parse_seller_id(s, row_number)?,
            Some(other) => {
                return Err(SpreadsheetError::InvalidSellerId {
                    row: row_number,
                    value: other.to_string(),
                })
            }
        };
        if let Some(id) = id {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Accepts `123`, `123.0` and surrounding whitespace; blank means "skip row".
pub fn parse_seller_id(cell: &str, row: usize) -> Result<Option<u64>, SpreadsheetError> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    if let Ok(id) = trimmed.parse::<u64>() {
        return Ok(Some(id));
    }
    match trimmed.parse::<f64>() {
        Ok(f) => float_id(f, row).map(Some),
        Err(_) => Err(SpreadsheetError::InvalidSellerId {
            row,
            value: trimmed.to_string(),
        }),
    }
}

fn float_id(value: f64, row: usize) -> Result<u64, SpreadsheetError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Ok(value as u64)
    } else {
        Err(SpreadsheetError::InvalidSellerId {
            row,
            value: value.to_string(),
        })
    }
}

/// Writes the enriched table as BOM-prefixed CSV.
pub fn write_records<W: Write>(mut writer: W, records: &[SellerRecord]) -> Result<(), SpreadsheetError> {
    writer.write_all(UTF8_BOM)?;
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    if records.is_empty() {
        wtr.write_record([
            "id_consultado",
            "nickname",
            "city",
            "state",
            "power_seller_status",
            "cnpj_encontrado",
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv_bytes(records: &[SellerRecord]) -> Result<Vec<u8>, SpreadsheetError> {
    let mut buffer = Vec::new();
    write_records(&mut buffer, records)?;
    Ok(buffer)
}

pub fn export_to_csv(records: &[SellerRecord], path: &Path) -> Result<(), SpreadsheetError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_records(BufWriter::new(file), records)?;
    info!("💾 Exported {} records to {:?}", records.len(), path);
    Ok(())
}

/// Timestamped default output path.
pub fn generate_output_filename() -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let name = format!("output/resultados_enriquecidos_{}.csv", timestamp);
    debug!("Generated output filename {}", name);
    name
}
