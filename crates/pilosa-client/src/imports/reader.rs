// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lazy CSV record sources.
//!
//! One record per line, no header. Column records are `row,column` with an
//! optional third timestamp column; value records are `column,value`. Blank
//! lines are skipped and surrounding whitespace is ignored.

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use std::io::Read;

use super::{ImportRecord, ImportValue};
use crate::error::{PilosaError, Result};
use crate::query::IdKey;
use crate::timestamp::parse_query_time;

/// Which of the row and column columns hold ids and which hold keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CsvFormat {
    /// `row-id,column-id`
    #[default]
    RowIdColumnId,
    /// `row-id,column-key`
    RowIdColumnKey,
    /// `row-key,column-id`
    RowKeyColumnId,
    /// `row-key,column-key`
    RowKeyColumnKey,
}

impl CsvFormat {
    fn keyed(self) -> (bool, bool) {
        match self {
            Self::RowIdColumnId => (false, false),
            Self::RowIdColumnKey => (false, true),
            Self::RowKeyColumnId => (true, false),
            Self::RowKeyColumnKey => (true, true),
        }
    }
}

/// Whether value records address columns by id or by key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CsvValueFormat {
    /// `column-id,value`
    #[default]
    ColumnId,
    /// `column-key,value`
    ColumnKey,
}

/// Turns the timestamp column into epoch seconds.
pub trait TimeParser {
    /// Parse `text`, or describe why it is not a timestamp.
    fn parse_time(&self, text: &str) -> std::result::Result<i64, String>;
}

impl<F> TimeParser for F
where
    F: Fn(&str) -> std::result::Result<i64, String>,
{
    fn parse_time(&self, text: &str) -> std::result::Result<i64, String> {
        self(text)
    }
}

/// Timestamps written as integer epoch seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochSeconds;

impl TimeParser for EpochSeconds {
    fn parse_time(&self, text: &str) -> std::result::Result<i64, String> {
        text.parse().map_err(|e| format!("{text:?} is not epoch seconds: {e}"))
    }
}

/// Timestamps written in query form, `YYYY-MM-DDTHH:MM`, UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTime;

impl TimeParser for QueryTime {
    fn parse_time(&self, text: &str) -> std::result::Result<i64, String> {
        parse_query_time(text).map_err(|e| e.to_string())
    }
}

/// Shared line handling for both readers.
struct Lines<R> {
    records: StringRecordsIntoIter<R>,
    line: u64,
}

impl<R: Read> Lines<R> {
    fn new(reader: R) -> Self {
        let records = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader)
            .into_records();
        Self { records, line: 0 }
    }

    /// Next non-blank record with its 1-based line number.
    fn next_record(&mut self) -> Option<Result<(u64, StringRecord)>> {
        loop {
            let next = self.records.next()?;
            self.line += 1;
            match next {
                Ok(record) => {
                    let line = record.position().map_or(self.line, csv::Position::line);
                    self.line = line;
                    if record.iter().all(str::is_empty) {
                        continue;
                    }
                    return Some(Ok((line, record)));
                }
                Err(err) => {
                    let line = err.position().map_or(self.line, csv::Position::line);
                    return Some(Err(invalid(line, err.to_string())));
                }
            }
        }
    }
}

fn invalid(line: u64, reason: impl Into<String>) -> PilosaError {
    PilosaError::InvalidRecord {
        line,
        reason: reason.into(),
    }
}

fn id_or_key(line: u64, what: &str, text: &str, keyed: bool) -> Result<IdKey> {
    if text.is_empty() {
        return Err(invalid(line, format!("empty {what}")));
    }
    if keyed {
        return Ok(IdKey::Key(text.to_owned()));
    }
    text.parse()
        .map(IdKey::Id)
        .map_err(|e| invalid(line, format!("{what} {text:?} is not an id: {e}")))
}

/// Row/column records read from CSV.
pub struct CsvColumnReader<R, P> {
    lines: Lines<R>,
    format: CsvFormat,
    parser: P,
}

impl<R: Read, P: TimeParser> CsvColumnReader<R, P> {
    fn parse(&self, line: u64, record: &StringRecord) -> Result<ImportRecord> {
        if !(2..=3).contains(&record.len()) {
            return Err(invalid(line, format!("expected 2 or 3 columns, found {}", record.len())));
        }
        let (row_keyed, column_keyed) = self.format.keyed();
        let row = id_or_key(line, "row", &record[0], row_keyed)?;
        let column = id_or_key(line, "column", &record[1], column_keyed)?;
        let timestamp = match record.get(2).filter(|t| !t.is_empty()) {
            Some(text) => Some(self.parser.parse_time(text).map_err(|reason| invalid(line, reason))?),
            None => None,
        };
        Ok(ImportRecord { row, column, timestamp })
    }
}

impl<R: Read, P: TimeParser> Iterator for CsvColumnReader<R, P> {
    type Item = Result<ImportRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.lines.next_record()?;
        Some(next.and_then(|(line, record)| self.parse(line, &record)))
    }
}

/// Column/value records read from CSV.
pub struct CsvValueReader<R> {
    lines: Lines<R>,
    format: CsvValueFormat,
}

impl<R: Read> Iterator for CsvValueReader<R> {
    type Item = Result<ImportValue>;

    fn next(&mut self) -> Option<Self::Item> {
        let (line, record) = match self.lines.next_record()? {
            Ok(next) => next,
            Err(err) => return Some(Err(err)),
        };
        if record.len() != 2 {
            return Some(Err(invalid(line, format!("expected 2 columns, found {}", record.len()))));
        }
        let keyed = self.format == CsvValueFormat::ColumnKey;
        let parsed = id_or_key(line, "column", &record[0], keyed).and_then(|column| {
            let value = record[1]
                .parse()
                .map_err(|e| invalid(line, format!("value {:?} is not an integer: {e}", &record[1])))?;
            Ok(ImportValue { column, value })
        });
        Some(parsed)
    }
}

/// Read row/column records lazily from `reader`.
pub fn csv_column_reader<R: Read, P: TimeParser>(reader: R, format: CsvFormat, parser: P) -> CsvColumnReader<R, P> {
    CsvColumnReader {
        lines: Lines::new(reader),
        format,
        parser,
    }
}

/// Read column/value records lazily from `reader`.
pub fn csv_value_reader<R: Read>(reader: R, format: CsvValueFormat) -> CsvValueReader<R> {
    CsvValueReader {
        lines: Lines::new(reader),
        format,
    }
}
