mod operations_table;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tabled::settings::Style;
use tabled::Table;

use crate::report::operations_table::OperationRow;
use crate::OperationRecord;

/// Keeps every finished operation in memory so that a summary can be printed when a scenario
/// finishes.
#[derive(Debug, Default)]
pub struct Reporter {
    operation_records: Mutex<Vec<OperationRecord>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finished operation. Operations that were never finished are ignored.
    pub fn add_operation(&self, operation_record: &OperationRecord) {
        if operation_record.duration().is_none() {
            log::warn!(
                "Ignoring unfinished operation: {}",
                operation_record.operation_id()
            );
            return;
        }

        self.operation_records.lock().push(operation_record.clone());
    }

    pub fn operation_count(&self) -> usize {
        self.operation_records.lock().len()
    }

    /// Render a table of operation timings, grouped by operation id. Failed operations are counted
    /// but excluded from the timings.
    pub fn summary_table(&self) -> Option<String> {
        let records = self.operation_records.lock();
        if records.is_empty() {
            return None;
        }

        let rows = records
            .iter()
            .fold(BTreeMap::<&str, Vec<&OperationRecord>>::new(), |mut acc, record| {
                acc.entry(record.operation_id()).or_default().push(record);
                acc
            })
            .into_iter()
            .map(|(operation_id, operations)| {
                let timings_ms = operations
                    .iter()
                    .filter(|op| !op.is_error())
                    .filter_map(|op| op.duration())
                    .map(|d| d.as_secs_f64() * 1000.0)
                    .collect::<Vec<_>>();
                let succeeded = timings_ms.len();

                OperationRow {
                    operation_id: operation_id.to_string(),
                    avg_time_ms: if succeeded == 0 {
                        0.0
                    } else {
                        timings_ms.iter().sum::<f64>() / succeeded as f64
                    },
                    min_time_ms: timings_ms.iter().copied().reduce(f64::min).unwrap_or(0.0),
                    max_time_ms: timings_ms.iter().copied().reduce(f64::max).unwrap_or(0.0),
                    total_operations: operations.len(),
                    failed_operations: operations.len() - succeeded,
                }
            })
            .collect::<Vec<_>>();

        let mut table = Table::new(&rows);
        table.with(Style::modern());

        Some(table.to_string())
    }

    pub fn print_summary(&self) {
        if let Some(table) = self.summary_table() {
            println!("\nSummary of operations\n{table}");
        }
    }
}
