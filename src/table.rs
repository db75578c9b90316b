use std::borrow::Cow;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem::take;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::extract::ExtractedValue;

const INPUT_SEP: char = ',';

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("input file not found: {0}")]
    NotFound(PathBuf),
    #[error("input is not a .csv file: {0}")]
    NotCsv(PathBuf),
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("{actual} extracted values for {expected} data rows; refusing to write a misaligned table")]
    Misaligned { expected: usize, actual: usize },
}

/// Parsed CSV with the optional header split off.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" | "w" | "w+" => Ok(WriteMode::Overwrite),
            "append" | "a" | "a+" => Ok(WriteMode::Append),
            other => Err(format!("unknown out_mode {:?} (expected overwrite or append)", other)),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Overwrite => f.write_str("overwrite"),
            WriteMode::Append => f.write_str("append"),
        }
    }
}

/* ---------------- Validation ---------------- */

/// The input must be an existing regular file with a `.csv` extension.
pub fn validate_source(path: &Path) -> Result<(), TableError> {
    if !path.is_file() {
        return Err(TableError::NotFound(path.to_path_buf()));
    }
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if !is_csv {
        return Err(TableError::NotCsv(path.to_path_buf()));
    }
    Ok(())
}

/* ---------------- Reading ---------------- */

pub fn read_table(path: &Path, has_header: bool) -> Result<Table, TableError> {
    validate_source(path)?;
    let text = fs::read_to_string(path).map_err(|source| TableError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let Records { mut rows, blank_lines } = parse_records(&text, INPUT_SEP);
    if blank_lines > 0 {
        debug!(blank_lines, "skipped blank lines in {}", path.display());
    }
    let header = if has_header && !rows.is_empty() {
        Some(rows.remove(0))
    } else {
        None
    };
    Ok(Table { header, rows })
}

/// One cell per data row. Rows too short for `column` give "".
pub fn read_column(path: &Path, column: usize, has_header: bool) -> Result<Vec<String>, TableError> {
    let table = read_table(path, has_header)?;
    Ok(column_of(&table, column))
}

pub fn column_of(table: &Table, column: usize) -> Vec<String> {
    table
        .rows
        .iter()
        .map(|row| row.get(column).map(|c| c.trim().to_string()).unwrap_or_default())
        .collect()
}

/// Rows parsed from a CSV source.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Records {
    pub rows: Vec<Vec<String>>,
    /// Empty lines dropped while parsing. Data row `i` is not file line `i` when this is non-zero.
    pub blank_lines: usize,
}

#[derive(Default)]
struct RecordParser {
    records: Records,
    row: Vec<String>,
    field: String,
    in_quotes: bool,
}

impl RecordParser {
    fn end_field(&mut self) {
        self.row.push(take(&mut self.field));
    }

    fn end_line(&mut self) {
        self.end_field();
        if self.row.len() == 1 && self.row[0].is_empty() {
            self.row.clear();
            self.records.blank_lines += 1;
        } else {
            self.records.rows.push(take(&mut self.row));
        }
    }

    fn finish(mut self) -> Records {
        if !self.field.is_empty() || !self.row.is_empty() {
            self.end_line();
        }
        self.records
    }
}

/// Quotes with doubled-quote escapes, CRLF or LF line ends, and quoted fields that span
/// lines. Blank lines are dropped and counted.
pub fn parse_records(text: &str, sep: char) -> Records {
    let mut p = RecordParser::default();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if p.in_quotes {
            match ch {
                '"' if chars.next_if_eq(&'"').is_some() => p.field.push('"'),
                '"' => p.in_quotes = false,
                _ => p.field.push(ch),
            }
            continue;
        }
        match ch {
            '"' => p.in_quotes = true,
            '\r' => {
                chars.next_if_eq(&'\n');
                p.end_line();
            }
            '\n' => p.end_line(),
            c if c == sep => p.end_field(),
            _ => p.field.push(ch),
        }
    }
    p.finish()
}

/* ---------------- Writing ---------------- */

fn quote_cell(cell: &str, sep: char) -> Cow<'_, str> {
    if cell.contains([sep, '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", cell.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(cell)
    }
}

/// One output line. Cells holding the delimiter, a quote or a line break are quoted.
pub fn write_row<W: Write>(mut w: W, row: &[String], sep: char) -> io::Result<()> {
    let cells: Vec<Cow<'_, str>> = row.iter().map(|c| quote_cell(c, sep)).collect();
    writeln!(w, "{}", cells.join(&sep.to_string()))
}

/// Build the augmented rows: `values[i]` appended to data row `i`.
///
/// `header_names` is appended to the source header when the source has one.
pub fn augment(
    table: &Table,
    header_names: Option<&[String]>,
    values: &[ExtractedValue],
) -> Result<Vec<Vec<String>>, TableError> {
    if values.len() != table.rows.len() {
        return Err(TableError::Misaligned {
            expected: table.rows.len(),
            actual: values.len(),
        });
    }

    let mut out = Vec::with_capacity(table.rows.len() + 1);
    if let Some(header) = &table.header {
        let mut row = header.clone();
        row.extend(header_names.unwrap_or_default().iter().cloned());
        out.push(row);
    }
    for (row, value) in table.rows.iter().zip(values) {
        let mut row = row.clone();
        row.extend(value.cells());
        out.push(row);
    }
    Ok(out)
}

/// Re-read `source`, append the extracted cells, and write to `dest`.
///
/// Alignment is checked before `dest` is opened. Returns the number of rows written.
pub fn write_augmented(
    source: &Path,
    dest: &Path,
    mode: WriteMode,
    delimiter: char,
    header_names: Option<&[String]>,
    values: &[ExtractedValue],
) -> Result<usize, TableError> {
    let table = read_table(source, header_names.is_some())?;
    let rows = augment(&table, header_names, values)?;

    let write_err = |source: io::Error| TableError::Write {
        path: dest.to_path_buf(),
        source,
    };
    let file = match mode {
        WriteMode::Overwrite => OpenOptions::new().write(true).create(true).truncate(true).open(dest),
        WriteMode::Append => OpenOptions::new().append(true).create(true).open(dest),
    }
    .map_err(write_err)?;

    let mut w = BufWriter::new(file);
    for row in &rows {
        write_row(&mut w, row, delimiter).map_err(write_err)?;
    }
    w.flush().map_err(write_err)?;

    debug!(rows = rows.len(), mode = %mode, "wrote {}", dest.display());
    Ok(rows.len())
}
