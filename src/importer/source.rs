//! Upload formats and per-sheet readers.
//!
//! Readers are blocking and meant to run on the blocking thread pool. Each
//! call opens the file, reads one sheet's first column and drops the parsed
//! document before returning, so at most one sheet per worker is resident.

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader};

use crate::error::ImportError;

/// Number of leading rows treated as a header and skipped.
pub const HEADER_ROWS: u32 = 1;

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Xlsx,
    Xls,
    Csv,
}

impl FileFormat {
    /// Detects the format from a file name's extension (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `ImportError::UnsupportedFormat` for any other extension.
    pub fn detect(file_name: &str) -> Result<Self, ImportError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match extension.as_str() {
            "xlsx" => Ok(FileFormat::Xlsx),
            "xls" => Ok(FileFormat::Xls),
            "csv" => Ok(FileFormat::Csv),
            _ => Err(ImportError::UnsupportedFormat {
                file: file_name.to_string(),
                extension,
            }),
        }
    }

    pub fn is_workbook(self) -> bool {
        matches!(self, FileFormat::Xlsx | FileFormat::Xls)
    }
}

/// An uploaded file on disk plus the name the client gave it.
///
/// Upload handlers usually store bodies under temporary names, so the
/// format and CSV sheet naming come from `original_name`, not `path`.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub original_name: String,
}

impl UploadedFile {
    pub fn new(path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_name: original_name.into(),
        }
    }

    /// Uses the path's own file name as the original name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            original_name,
        }
    }
}

/// One logical sheet of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSpec {
    /// Value written to the `type` column.
    pub kind: String,
    /// Worksheet to load; `None` for CSV, which is a single sheet.
    pub worksheet: Option<String>,
}

/// Lists the sheets of an upload without loading their cells.
///
/// Opening the workbook here also validates the file before the importer
/// truncates anything.
pub fn list_sheets(
    upload: &UploadedFile,
    format: FileFormat,
) -> Result<Vec<SheetSpec>, ImportError> {
    if format == FileFormat::Csv {
        // Surface a missing or unreadable file now rather than per sheet.
        std::fs::metadata(&upload.path)?;
        let stem = Path::new(&upload.original_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(vec![SheetSpec {
            kind: format!("{} (CSV)", stem),
            worksheet: None,
        }]);
    }

    let workbook = open_workbook_auto(&upload.path).map_err(|e| ImportError::Workbook {
        file: upload.original_name.clone(),
        message: e.to_string(),
    })?;

    Ok(workbook
        .sheet_names()
        .into_iter()
        .map(|name| SheetSpec {
            kind: name.clone(),
            worksheet: Some(name),
        })
        .collect())
}

/// Reads the trimmed, non-blank first-column values of one sheet, in
/// source order, skipping the header row.
pub fn read_sheet_keywords(path: &Path, sheet: &SheetSpec) -> Result<Vec<String>, ImportError> {
    match &sheet.worksheet {
        Some(worksheet) => read_worksheet_column(path, worksheet),
        None => read_csv_column(path),
    }
}

fn read_worksheet_column(path: &Path, worksheet: &str) -> Result<Vec<String>, ImportError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ImportError::Sheet {
        sheet: worksheet.to_string(),
        message: e.to_string(),
    })?;
    let range = workbook
        .worksheet_range(worksheet)
        .map_err(|e| ImportError::Sheet {
            sheet: worksheet.to_string(),
            message: e.to_string(),
        })?;
    drop(workbook);

    Ok(first_column_values(&range))
}

/// Collects column A below the header. Range positions are absolute sheet
/// coordinates, so a sheet whose data starts below row 1 still treats row 1
/// as the header.
fn first_column_values(range: &Range<Data>) -> Vec<String> {
    let (Some(start), Some(end)) = (range.start(), range.end()) else {
        return Vec::new();
    };
    if start.1 > 0 {
        // Nothing in column A.
        return Vec::new();
    }

    (start.0.max(HEADER_ROWS)..=end.0)
        .filter_map(|row| range.get_value((row, 0)))
        .map(cell_text)
        .filter(|value| !value.is_empty())
        .collect()
}

/// Display text of a cell, trimmed. Whole floats render without `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn read_csv_column(path: &Path) -> Result<Vec<String>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut values = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let Some(field) = record.get(0) else {
            continue;
        };
        // Spreadsheet exports are not always UTF-8; keep what decodes.
        let value = String::from_utf8_lossy(field).trim().to_string();
        if !value.is_empty() {
            values.push(value);
        }
    }

    Ok(values)
}
