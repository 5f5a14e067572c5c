use std::path::Path;

use docbench_summary_model::{load_records_from_file, BenchmarkRecord, RecordOutcome};
use itertools::Itertools;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct RecordRow {
    scenario: String,
    outcome: String,
    #[tabled(display = "seconds")]
    summarize_s: Option<f64>,
    #[tabled(display = "seconds")]
    generate_s: Option<f64>,
    detail: String,
}

/// A timing of the latest result for a configuration compared with the result before it.
#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct Comparison {
    pub scenario: String,
    pub metric: &'static str,
    #[tabled(display = "float4")]
    pub previous_s: f64,
    #[tabled(display = "float4")]
    pub latest_s: f64,
    #[tabled(display = "percent")]
    pub change_pct: f64,
    pub regression: bool,
}

fn seconds(value: &Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".to_string())
}

fn float4(n: &f64) -> String {
    format!("{:.4}", n)
}

fn percent(n: &f64) -> String {
    format!("{:+.1}%", n)
}

/// Render the records of a run as a table, or nothing if there are none.
pub fn records_table(records: &[BenchmarkRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }

    let rows = records
        .iter()
        .map(|record| {
            let (outcome, detail) = match record.outcome() {
                RecordOutcome::Succeeded => ("succeeded", String::new()),
                RecordOutcome::Skipped => ("skipped", record.skipped.clone().unwrap_or_default()),
                RecordOutcome::Failed => (
                    "failed",
                    format!(
                        "{}: {}",
                        record
                            .failure_kind
                            .map(|kind| kind.to_string())
                            .unwrap_or_default(),
                        first_line(record.failure_reason.as_deref().unwrap_or_default())
                    ),
                ),
            };

            RecordRow {
                scenario: record.scenario.label(),
                outcome: outcome.to_string(),
                summarize_s: record.summarize_time,
                generate_s: record.generate_time,
                detail,
            }
        })
        .collect::<Vec<_>>();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    Some(table.to_string())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Compare the latest successful result of each configuration with the one before it.
///
/// Records are matched by fingerprint and taken in log order. A timing is a regression when it
/// grew by more than `threshold_pct` percent.
pub fn compare_latest(records: &[BenchmarkRecord], threshold_pct: f64) -> Vec<Comparison> {
    records
        .iter()
        .filter(|record| record.outcome() == RecordOutcome::Succeeded)
        .map(|record| (record.fingerprint.as_str(), record))
        .into_group_map()
        .into_values()
        .filter_map(|runs| {
            let [.., previous, latest] = runs.as_slice() else {
                return None;
            };
            Some((*previous, *latest))
        })
        .flat_map(|(previous, latest)| {
            [
                ("summarize", previous.summarize_time, latest.summarize_time),
                ("generate", previous.generate_time, latest.generate_time),
            ]
            .into_iter()
            .filter_map(move |(metric, before, after)| match (before, after) {
                (Some(before), Some(after)) if before > 0.0 => {
                    let change_pct = (after - before) / before * 100.0;
                    Some(Comparison {
                        scenario: latest.scenario.label(),
                        metric,
                        previous_s: before,
                        latest_s: after,
                        change_pct,
                        regression: change_pct > threshold_pct,
                    })
                }
                _ => None,
            })
        })
        .sorted_by(|a, b| a.scenario.cmp(&b.scenario).then(a.metric.cmp(&b.metric)))
        .collect()
}

/// Print the comparison for a results log. Fails if any timing regressed.
pub fn print_comparison(results_path: &Path, threshold_pct: f64) -> anyhow::Result<()> {
    let records = load_records_from_file(results_path)?;
    let comparisons = compare_latest(&records, threshold_pct);
    if comparisons.is_empty() {
        println!(
            "No configuration in {} has two successful results to compare",
            results_path.display()
        );
        return Ok(());
    }

    let mut table = Table::new(&comparisons);
    table.with(Style::modern());
    println!("\nLatest results compared with the previous run\n{table}");

    let regressions = comparisons.iter().filter(|c| c.regression).count();
    if regressions > 0 {
        anyhow::bail!("{regressions} timings regressed by more than {threshold_pct}%");
    }

    Ok(())
}
