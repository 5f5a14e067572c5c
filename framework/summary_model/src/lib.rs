mod record;
mod scenario;

use std::io::{BufRead, Read, Write};
use std::path::Path;

pub use record::{
    fingerprint, BenchmarkRecord, EnvironmentInfo, FailureKind, FailureStage, GenerateOutcome,
    RecordOutcome, SummarizeOutcome,
};
pub use scenario::{BackendKind, Quantization, ScenarioDescriptor, Task, TaskSet};

/// Append a record to the results log.
///
/// The record is serialized to JSON and written as a single line followed by a newline, in one
/// write, so that concurrent readers never see a partial record. The file is created if it does
/// not exist and existing lines are never modified. The recommended file extension is `.jsonl`.
pub fn append_record(record: &BenchmarkRecord, path: &Path) -> anyhow::Result<()> {
    let mut line = Vec::new();
    store_record(record, &mut line)?;
    line.push(b'\n');

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

/// Serialize a record to a writer
pub fn store_record<W: Write>(record: &BenchmarkRecord, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, record)?;
    Ok(())
}

/// Load records from a reader containing one JSON object per line.
///
/// Blank lines are ignored. Lines that cannot be parsed are skipped with a warning, so that a log
/// written by another version of the harness, or cut short by a crash, can still be read.
pub fn load_records<R: Read>(reader: R) -> anyhow::Result<Vec<BenchmarkRecord>> {
    let reader = std::io::BufReader::new(reader);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("Skipping invalid record on line {}: {e}", index + 1),
        }
    }
    Ok(records)
}

/// Load records from a results log, see [load_records].
///
/// A log that does not exist yet holds no records.
pub fn load_records_from_file(path: &Path) -> anyhow::Result<Vec<BenchmarkRecord>> {
    match std::fs::File::open(path) {
        Ok(file) => load_records(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Count the lines in a results log that hold a record, without parsing them.
pub fn count_records(path: &Path) -> anyhow::Result<usize> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0;
    for line in std::io::BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
