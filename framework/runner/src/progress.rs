use std::time::Duration;

use docbench_summary_model::ScenarioDescriptor;
use indicatif::{ProgressBar, ProgressStyle};

/// Displays a progress bar while the matrix is running to show the user how much is left.
pub(crate) struct MatrixProgress {
    bar: ProgressBar,
}

impl MatrixProgress {
    pub(crate) fn start(total: usize, hidden: bool) -> Self {
        if hidden {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new(total as u64);
        match ProgressStyle::with_template(
            "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} scenarios [{elapsed_precise}] {msg}",
        ) {
            Ok(style) => bar.set_style(style.progress_chars("#>-")),
            Err(e) => log::warn!("Failed to set progress style: {e}"),
        }
        bar.enable_steady_tick(Duration::from_millis(250));

        Self { bar }
    }

    pub(crate) fn begin(&self, scenario: &ScenarioDescriptor) {
        self.bar.set_message(scenario.label());
    }

    pub(crate) fn complete(&self) {
        self.bar.inc(1);
    }

    pub(crate) fn finish(&self) {
        log::trace!("Progress finished");
        self.bar.finish_and_clear();
    }
}
