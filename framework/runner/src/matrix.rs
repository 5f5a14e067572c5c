use std::num::NonZeroU32;

use anyhow::bail;
use docbench_summary_model::{BackendKind, Quantization, ScenarioDescriptor, Task, TaskSet};
use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

/// The axes of the configuration matrix.
///
/// Every combination of one value from each axis is a candidate scenario. Combinations the backend
/// cannot serve are dropped, see [ScenarioDescriptor::is_supported].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatrixAxes {
    pub backends: Vec<BackendKind>,
    pub models: Vec<String>,
    pub tasks: Vec<TaskSet>,
    pub quantizations: Vec<Quantization>,
    pub gpu_counts: Vec<NonZeroU32>,
}

impl Default for MatrixAxes {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::InProcess],
            models: vec!["h2oai/h2ogpt-4096-llama2-7b-chat".to_string()],
            tasks: vec![TaskSet::new([Task::Summarize, Task::Generate]).expect("non-empty task set")],
            quantizations: Quantization::ALL.to_vec(),
            gpu_counts: [1, 2, 4, 8].into_iter().filter_map(NonZeroU32::new).collect(),
        }
    }
}

impl MatrixAxes {
    pub fn validate(&self) -> anyhow::Result<()> {
        let empty = [
            ("backends", self.backends.is_empty()),
            ("models", self.models.is_empty()),
            ("tasks", self.tasks.is_empty()),
            ("quantizations", self.quantizations.is_empty()),
            ("gpu_counts", self.gpu_counts.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, is_empty)| is_empty.then_some(name))
        .collect::<Vec<_>>();

        if !empty.is_empty() {
            bail!("The matrix has no values for: {}", empty.join(", "));
        }

        if self.models.iter().any(|model| model.trim().is_empty()) {
            bail!("Model ids must not be blank");
        }

        Ok(())
    }

    /// Replace each axis that was given on the command line.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if !args.backends.is_empty() {
            self.backends = args.backends.clone();
        }
        if !args.models.is_empty() {
            self.models = args.models.clone();
        }
        if !args.tasks.is_empty() {
            self.tasks = args.tasks.clone();
        }
        if !args.quantizations.is_empty() {
            self.quantizations = args.quantizations.clone();
        }
        if !args.gpu_counts.is_empty() {
            self.gpu_counts = args.gpu_counts.clone();
        }
    }

    fn combinations(&self) -> impl Iterator<Item = ScenarioDescriptor> + '_ {
        iproduct!(
            self.backends.iter(),
            self.models.iter(),
            self.tasks.iter(),
            self.quantizations.iter(),
            self.gpu_counts.iter()
        )
        .map(
            |(backend, model_id, tasks, quantization, gpu_count)| ScenarioDescriptor {
                backend: *backend,
                model_id: model_id.clone(),
                tasks: tasks.clone(),
                quantization: *quantization,
                gpu_count: *gpu_count,
            },
        )
    }

    /// The supported scenarios, in a fixed order.
    ///
    /// The order is backend, model, tasks, quantization, GPU count, with the last axis varying
    /// fastest. Scenarios are produced lazily and calling this again restarts from the beginning.
    pub fn scenarios(&self) -> impl Iterator<Item = ScenarioDescriptor> + '_ {
        self.combinations()
            .filter(ScenarioDescriptor::is_supported)
    }

    /// The combinations that were dropped because the backend cannot serve them.
    pub fn unsupported(&self) -> impl Iterator<Item = ScenarioDescriptor> + '_ {
        self.combinations()
            .filter(|scenario| !scenario.is_supported())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn gpus(counts: &[u32]) -> Vec<NonZeroU32> {
        counts.iter().copied().filter_map(NonZeroU32::new).collect()
    }

    #[test]
    fn default_matrix_enumerates_every_precision_and_gpu_count() {
        let axes = MatrixAxes::default();
        axes.validate().unwrap();

        let scenarios = axes.scenarios().collect::<Vec<_>>();
        assert_eq!(12, scenarios.len());
        assert_eq!(Quantization::Full, scenarios[0].quantization);
        assert_eq!(1, scenarios[0].gpu_count.get());
        assert_eq!(2, scenarios[1].gpu_count.get());
        assert_eq!(Quantization::EightBit, scenarios[4].quantization);
    }

    #[test]
    fn external_backends_drop_quantized_combinations() {
        let axes = MatrixAxes {
            backends: vec![BackendKind::InProcess, BackendKind::SingleService],
            models: vec!["a".to_string()],
            tasks: vec!["summarize".parse().unwrap()],
            quantizations: Quantization::ALL.to_vec(),
            gpu_counts: gpus(&[1]),
        };

        let labels = axes.scenarios().map(|s| s.label()).collect::<Vec<_>>();
        assert_eq!(
            vec![
                "in_process/a/summarize/full/1gpu",
                "in_process/a/summarize/8bit/1gpu",
                "in_process/a/summarize/4bit/1gpu",
                "single_service/a/summarize/full/1gpu",
            ],
            labels
        );
        assert_eq!(2, axes.unsupported().count());
    }

    #[test]
    fn iteration_restarts() {
        let axes = MatrixAxes::default();
        let first = axes.scenarios().take(3).collect::<Vec<_>>();
        let second = axes.scenarios().take(3).collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_axis_is_rejected() {
        let axes = MatrixAxes {
            gpu_counts: Vec::new(),
            models: Vec::new(),
            ..Default::default()
        };

        let err = axes.validate().unwrap_err();
        assert_eq!("The matrix has no values for: models, gpu_counts", err.to_string());
    }

    #[test]
    fn command_line_replaces_axes() {
        let mut axes = MatrixAxes::default();
        axes.apply_overrides(&RunArgs {
            models: vec!["other/model".to_string()],
            gpu_counts: gpus(&[2]),
            ..Default::default()
        });

        assert_eq!(vec!["other/model".to_string()], axes.models);
        assert_eq!(gpus(&[2]), axes.gpu_counts);
        assert_eq!(vec![BackendKind::InProcess], axes.backends);
    }
}
