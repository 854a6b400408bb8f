// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bulk import.
//!
//! Records are pulled lazily from the source, grouped into batches, encoded
//! with the chosen [`ImportStrategy`], and sent through the client's node
//! failover. Batches are independent: a failed batch does not undo the ones
//! before it. The import succeeds only if every batch succeeded; otherwise it
//! fails with [`PilosaError::PartialImportFailure`] listing the failed
//! batches and their records.
//!
//! A read error, or a timestamp on a field without a time quantum, stops the
//! import at once; the batch being filled is not sent. If batches were
//! already sent, the error comes back as [`PilosaError::ImportAborted`] with
//! their tally and the failed ones, so nothing sent goes unreported.

mod batch;
pub mod bitmap;
pub mod reader;

use pilosa_proto::PQL_VERSION;
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, instrument, warn};

use crate::client::{ok_status, Client};
use crate::error::{PilosaError, Result};
use crate::query::{column_arg, row_arg, Call, IdKey, PqlBatchQuery, PqlQuery};
use crate::schema::{Field, FieldType, DEFAULT_SHARD_WIDTH};
use crate::transport::HttpRequest;
use batch::Batches;

pub use bitmap::{pack, ShardPayload, STANDARD_VIEW};
pub use reader::{
    csv_column_reader, csv_value_reader, CsvColumnReader, CsvFormat, CsvValueFormat, CsvValueReader, EpochSeconds,
    QueryTime, TimeParser,
};

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// One bit to set or clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Row id or key.
    pub row: IdKey,
    /// Column id or key.
    pub column: IdKey,
    /// Epoch seconds, for time fields.
    pub timestamp: Option<i64>,
}

impl ImportRecord {
    /// Record without a timestamp.
    pub fn new(row: impl Into<IdKey>, column: impl Into<IdKey>) -> Self {
        Self {
            row: row.into(),
            column: column.into(),
            timestamp: None,
        }
    }

    /// The same record at `timestamp`.
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// One integer value for a column of an int field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportValue {
    /// Column id or key.
    pub column: IdKey,
    /// Value to store.
    pub value: i64,
}

impl ImportValue {
    /// Value record.
    pub fn new(column: impl Into<IdKey>, value: i64) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// How batches are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportStrategy {
    /// One `Set`/`Clear` call per record, one batch query per batch.
    #[default]
    MutationCalls,
    /// Roaring bitmaps per shard, posted to the bulk endpoint. Ids only.
    BitmapTransfer,
}

/// Import settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Records per batch.
    pub batch_size: usize,
    /// Encoding.
    pub strategy: ImportStrategy,
    /// Clear the bits instead of setting them.
    pub clear: bool,
    /// Batches in flight at once; `1` sends them one after another.
    pub threads: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strategy: ImportStrategy::MutationCalls,
            clear: false,
            threads: 1,
        }
    }
}

/// Outcome of a successful import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Batches sent.
    pub batches: usize,
    /// Records sent.
    pub records: usize,
}

/// Records of a failed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedRecords {
    /// From [`Client::import_field`].
    Columns(Vec<ImportRecord>),
    /// From [`Client::import_values`].
    Values(Vec<ImportValue>),
}

impl FailedRecords {
    /// Number of records.
    pub fn len(&self) -> usize {
        match self {
            Self::Columns(records) => records.len(),
            Self::Values(values) => values.len(),
        }
    }

    /// True when there is no record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A batch the server did not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedBatch {
    /// 0-based position of the batch in the import.
    pub index: usize,
    /// The batch's records, for resubmission.
    pub records: FailedRecords,
    /// Why it failed.
    pub reason: String,
}

struct Outcome<T> {
    index: usize,
    records: Vec<T>,
    result: Result<()>,
}

impl Client {
    /// Import bits into `field`.
    ///
    /// With [`ImportStrategy::BitmapTransfer`] the index and the field must
    /// address rows and columns by id, and the field must be a set, time or
    /// bool field.
    #[instrument(name = "Client.ImportField", skip_all, fields(index = field.index_name(), field = field.name()))]
    pub fn import_field<I>(&self, field: &Field, records: I, options: &ImportOptions) -> Result<ImportSummary>
    where
        I: IntoIterator<Item = Result<ImportRecord>>,
    {
        if options.strategy == ImportStrategy::BitmapTransfer {
            bitmap::check_field(field)?;
        }
        let timed = !field.options().time_quantum().is_none();
        let records = records.into_iter().map(|record| {
            let record = record?;
            if !timed {
                if let Some(timestamp) = record.timestamp {
                    return Err(PilosaError::TimestampNotSupported {
                        field: field.name().to_owned(),
                        timestamp,
                    });
                }
            }
            row_arg(field, record.row.clone())?;
            column_arg(field.index(), record.column.clone())?;
            Ok(record)
        });
        let send = |batch: &[ImportRecord]| match options.strategy {
            ImportStrategy::MutationCalls => self.send_mutations(field, batch, options.clear),
            ImportStrategy::BitmapTransfer => self.send_bitmaps(field, batch, options.clear),
        };
        self.run_import(records, options, send, FailedRecords::Columns)
    }

    /// Import integer values into an int `field`.
    ///
    /// Values are always sent as mutation calls; clearing is not supported.
    #[instrument(name = "Client.ImportValues", skip_all, fields(index = field.index_name(), field = field.name()))]
    pub fn import_values<I>(&self, field: &Field, values: I, options: &ImportOptions) -> Result<ImportSummary>
    where
        I: IntoIterator<Item = Result<ImportValue>>,
    {
        if field.options().field_type() != FieldType::Int {
            return Err(PilosaError::UnsupportedImportStrategy {
                field: field.name().to_owned(),
                reason: "values need an int field",
            });
        }
        if options.clear {
            return Err(PilosaError::UnsupportedImportStrategy {
                field: field.name().to_owned(),
                reason: "values cannot be cleared by import",
            });
        }
        if options.strategy == ImportStrategy::BitmapTransfer {
            return Err(PilosaError::UnsupportedImportStrategy {
                field: field.name().to_owned(),
                reason: "values cannot be sent as bitmaps",
            });
        }
        let values = values.into_iter().map(|value| {
            let value = value?;
            column_arg(field.index(), value.column.clone())?;
            Ok(value)
        });
        let send = |batch: &[ImportValue]| {
            let calls = batch
                .iter()
                .map(|v| field.setvalue(v.column.clone(), v.value).map(PqlQuery::into_call))
                .collect::<Result<Vec<_>>>()?;
            self.query(&PqlBatchQuery::with_calls(field.index().clone(), calls)).map(drop)
        };
        self.run_import(values, options, send, FailedRecords::Values)
    }

    fn send_mutations(&self, field: &Field, batch: &[ImportRecord], clear: bool) -> Result<()> {
        let calls = batch
            .iter()
            .map(|r| {
                let query = if clear {
                    field.clear(r.row.clone(), r.column.clone())
                } else {
                    field.set_with(r.row.clone(), r.column.clone(), r.timestamp)
                };
                query.map(PqlQuery::into_call)
            })
            .collect::<Result<Vec<Call>>>()?;
        self.query(&PqlBatchQuery::with_calls(field.index().clone(), calls)).map(drop)
    }

    /// A batch is accepted only if every shard payload is.
    fn send_bitmaps(&self, field: &Field, batch: &[ImportRecord], clear: bool) -> Result<()> {
        for payload in pack(field, DEFAULT_SHARD_WIDTH, batch, clear)? {
            let path = format!(
                "/index/{}/field/{}/import-roaring/{}",
                field.index_name(),
                field.name(),
                payload.shard
            );
            let request = HttpRequest::post(path, payload.request.encode())
                .header("Content-Type", "application/x-protobuf")
                .header("Accept", "application/x-protobuf")
                .header("PQL-Version", PQL_VERSION);
            debug!(shard = payload.shard, views = payload.request.views.len(), "sending shard bitmap");
            ok_status(self.request(&request)?)?;
        }
        Ok(())
    }

    fn run_import<T, I, F>(
        &self,
        records: I,
        options: &ImportOptions,
        send: F,
        wrap: fn(Vec<T>) -> FailedRecords,
    ) -> Result<ImportSummary>
    where
        T: Send,
        I: Iterator<Item = Result<T>>,
        F: Fn(&[T]) -> Result<()> + Sync,
    {
        let batches = Batches::new(records, options.batch_size);
        let (outcomes, read_error) = if options.threads > 1 {
            run_concurrent(batches, options.threads, &send)
        } else {
            run_sequential(batches, &send)
        };
        match read_error {
            None => summarize(outcomes, wrap),
            Some(err) if outcomes.is_empty() => Err(err),
            Some(err) => {
                let (summary, _, failed) = tally(outcomes, wrap);
                warn!(
                    succeeded = summary.batches,
                    failed = failed.len(),
                    error = %err,
                    "import stopped"
                );
                Err(PilosaError::ImportAborted {
                    cause: Box::new(err),
                    succeeded_batches: summary.batches,
                    failed,
                })
            }
        }
    }
}

fn attempt<T, F>(index: usize, records: Vec<T>, send: &F) -> Outcome<T>
where
    F: Fn(&[T]) -> Result<()>,
{
    debug!(batch = index, records = records.len(), "sending import batch");
    let result = send(&records);
    if let Err(err) = &result {
        warn!(batch = index, error = %err, "import batch failed");
    }
    Outcome { index, records, result }
}

fn run_sequential<T, I, F>(batches: Batches<I>, send: &F) -> (Vec<Outcome<T>>, Option<PilosaError>)
where
    I: Iterator<Item = Result<T>>,
    F: Fn(&[T]) -> Result<()>,
{
    let mut outcomes = Vec::new();
    for (index, batch) in batches.enumerate() {
        match batch {
            Ok(records) => outcomes.push(attempt(index, records, send)),
            Err(err) => return (outcomes, Some(err)),
        }
    }
    (outcomes, None)
}

/// Workers pull whole batches from a bounded queue, so at most `threads`
/// batches wait in memory besides those in flight.
fn run_concurrent<T, I, F>(batches: Batches<I>, threads: usize, send: &F) -> (Vec<Outcome<T>>, Option<PilosaError>)
where
    T: Send,
    I: Iterator<Item = Result<T>>,
    F: Fn(&[T]) -> Result<()> + Sync,
{
    let (job_tx, job_rx) = mpsc::sync_channel::<(usize, Vec<T>)>(threads);
    let (done_tx, done_rx) = mpsc::channel::<Outcome<T>>();
    let job_rx: Mutex<Receiver<(usize, Vec<T>)>> = Mutex::new(job_rx);
    let mut read_error = None;
    thread::scope(|scope| {
        for _ in 0..threads {
            let done_tx = done_tx.clone();
            let job_rx = &job_rx;
            scope.spawn(move || loop {
                let job = match job_rx.lock() {
                    Ok(rx) => rx.recv().ok(),
                    Err(_) => None,
                };
                let Some((index, records)) = job else { break };
                if done_tx.send(attempt(index, records, send)).is_err() {
                    break;
                }
            });
        }
        for (index, batch) in batches.enumerate() {
            match batch {
                Ok(records) => {
                    if job_tx.send((index, records)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    read_error = Some(err);
                    break;
                }
            }
        }
        drop(job_tx);
    });
    drop(done_tx);
    (done_rx.try_iter().collect(), read_error)
}

/// Successful batches, the earliest error, and every failed batch.
fn tally<T>(
    mut outcomes: Vec<Outcome<T>>,
    wrap: fn(Vec<T>) -> FailedRecords,
) -> (ImportSummary, Option<PilosaError>, Vec<FailedBatch>) {
    outcomes.sort_by_key(|o| o.index);
    let mut summary = ImportSummary::default();
    let mut first_error = None;
    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(()) => {
                summary.batches += 1;
                summary.records += outcome.records.len();
            }
            Err(err) => {
                failed.push(FailedBatch {
                    index: outcome.index,
                    records: wrap(outcome.records),
                    reason: err.to_string(),
                });
                first_error.get_or_insert(err);
            }
        }
    }
    (summary, first_error, failed)
}

fn summarize<T>(outcomes: Vec<Outcome<T>>, wrap: fn(Vec<T>) -> FailedRecords) -> Result<ImportSummary> {
    let (summary, first_error, failed) = tally(outcomes, wrap);
    match first_error {
        None => {
            debug!(batches = summary.batches, records = summary.records, "import finished");
            Ok(summary)
        }
        Some(first_error) => Err(PilosaError::PartialImportFailure {
            succeeded_batches: summary.batches,
            first_error: Box::new(first_error),
            failed,
        }),
    }
}
