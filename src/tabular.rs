//! CSV reading and writing for module import/export.
//!
//! The reader is strict: structural problems are reported with the line they
//! start on instead of being patched over.

use crate::errors::{AppError, AppResult};
use crate::models::Record;
use serde_json::Value;
use std::collections::HashSet;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    /// 1-based line the row starts on.
    pub line: usize,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<CsvRow>,
}

impl CsvTable {
    /// Rows keyed by header. Blank cells become `null`.
    pub fn into_records(self) -> Vec<(usize, Record)> {
        let headers = self.headers;
        self.rows
            .into_iter()
            .map(|row| {
                let record = headers
                    .iter()
                    .zip(row.cells)
                    .map(|(header, cell)| {
                        let value = if cell.trim().is_empty() {
                            Value::Null
                        } else {
                            Value::String(cell)
                        };
                        (header.clone(), value)
                    })
                    .collect::<Record>();
                (row.line, record)
            })
            .collect()
    }
}

pub fn parse_csv(text: &str) -> AppResult<CsvTable> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = RecordReader::new(text);

    let header = loop {
        match records.next_record()? {
            Some(row) if is_blank_row(&row.cells) => continue,
            Some(row) => break row,
            None => return Err(AppError::Import("CSV input has no header row".to_string())),
        }
    };

    let mut seen = HashSet::new();
    let mut headers = Vec::with_capacity(header.cells.len());
    for (index, cell) in header.cells.iter().enumerate() {
        let name = cell.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Import(format!(
                "line {}: header column {} is empty",
                header.line,
                index + 1
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(AppError::Import(format!(
                "line {}: duplicate header '{}'",
                header.line, name
            )));
        }
        headers.push(name);
    }

    let mut rows = Vec::new();
    while let Some(row) = records.next_record()? {
        if is_blank_row(&row.cells) {
            continue;
        }
        if row.cells.len() != headers.len() {
            return Err(AppError::Import(format!(
                "line {}: expected {} fields, found {}",
                row.line,
                headers.len(),
                row.cells.len()
            )));
        }
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

fn is_blank_row(cells: &[String]) -> bool {
    cells.len() == 1 && cells[0].trim().is_empty()
}

struct RecordReader<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> RecordReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    /// Consumes one line terminator (`\r\n`, `\n` or a lone `\r`) if it is next.
    fn take_newline(&mut self, ch: char) -> bool {
        match ch {
            '\n' => true,
            '\r' => {
                if self.chars.peek() == Some(&'\n') {
                    self.chars.next();
                }
                true
            }
            _ => false,
        }
    }

    fn next_record(&mut self) -> AppResult<Option<CsvRow>> {
        if self.chars.peek().is_none() {
            return Ok(None);
        }

        let start_line = self.line;
        let mut cells = Vec::new();
        let mut field = String::new();

        loop {
            let Some(ch) = self.chars.next() else {
                cells.push(field);
                break;
            };

            if ch == '"' && field.is_empty() {
                self.read_quoted(&mut field, start_line)?;
                match self.chars.next() {
                    None => {
                        cells.push(field);
                        break;
                    }
                    Some(',') => {
                        cells.push(std::mem::take(&mut field));
                    }
                    Some(next) if self.take_newline(next) => {
                        self.line += 1;
                        cells.push(field);
                        break;
                    }
                    Some(other) => {
                        return Err(AppError::Import(format!(
                            "line {}: unexpected '{}' after closing quote",
                            self.line, other
                        )));
                    }
                }
                continue;
            }

            if ch == ',' {
                cells.push(std::mem::take(&mut field));
            } else if self.take_newline(ch) {
                self.line += 1;
                cells.push(field);
                break;
            } else {
                field.push(ch);
            }
        }

        Ok(Some(CsvRow {
            line: start_line,
            cells,
        }))
    }

    /// Reads up to and including the closing quote. `""` is a literal quote.
    fn read_quoted(&mut self, field: &mut String, start_line: usize) -> AppResult<()> {
        loop {
            match self.chars.next() {
                None => {
                    return Err(AppError::Import(format!(
                        "line {}: unterminated quoted field",
                        start_line
                    )))
                }
                Some('"') => {
                    if self.chars.peek() == Some(&'"') {
                        self.chars.next();
                        field.push('"');
                    } else {
                        return Ok(());
                    }
                }
                Some(ch) => {
                    if ch == '\n' || ch == '\r' {
                        if ch == '\r' && self.chars.peek() == Some(&'\n') {
                            self.chars.next();
                            field.push('\r');
                            field.push('\n');
                        } else {
                            field.push(ch);
                        }
                        self.line += 1;
                    } else {
                        field.push(ch);
                    }
                }
            }
        }
    }
}

fn should_neutralize(value: &str) -> bool {
    let trimmed = value.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('\'') {
        return false;
    }
    matches!(trimmed.chars().next(), Some('=') | Some('+') | Some('-') | Some('@'))
}

fn csv_escape(value: &str, neutralize: bool) -> String {
    let safe = if neutralize && should_neutralize(value) {
        format!("'{value}")
    } else {
        value.to_string()
    };
    if safe.contains(',') || safe.contains('"') || safe.contains('\n') || safe.contains('\r') {
        format!("\"{}\"", safe.replace('"', "\"\""))
    } else {
        safe
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Header line of `columns`, then one line per row. Missing and null values
/// are written as empty cells.
pub fn write_csv(columns: &[String], rows: &[Record], neutralize: bool) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|column| csv_escape(column, false))
            .collect::<Vec<_>>()
            .join(","),
    );
    for row in rows {
        lines.push(
            columns
                .iter()
                .map(|column| csv_escape(&cell_text(row.get(column)), neutralize))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    let mut output = lines.join("\n");
    output.push('\n');
    output
}
