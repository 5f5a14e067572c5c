use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// How the backend under test is brought up for a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The model is loaded from within the scenario's own execution context.
    InProcess,
    /// An inference container fronted by a summarization service container.
    SingleService,
    /// An inference container fronted by the in-process engine.
    ///
    /// Used where the external service lacks a feature, so the harness supplies that part itself.
    DualService,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::InProcess,
        BackendKind::SingleService,
        BackendKind::DualService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::InProcess => "in_process",
            BackendKind::SingleService => "single_service",
            BackendKind::DualService => "dual_service",
        }
    }

    /// Whether this kind launches external containers that must be stopped on teardown.
    pub fn owns_external_handles(&self) -> bool {
        !matches!(self, BackendKind::InProcess)
    }

    /// Whether the backend can serve a model at the given precision.
    ///
    /// The external inference service only serves full precision models, so any kind that
    /// launches it is limited to [Quantization::Full].
    pub fn supports(&self, quantization: Quantization) -> bool {
        match self {
            BackendKind::InProcess => true,
            BackendKind::SingleService | BackendKind::DualService => {
                quantization == Quantization::Full
            }
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                anyhow!(
                    "Unknown backend kind '{s}', expected one of: {}",
                    BackendKind::ALL.iter().join(", ")
                )
            })
    }
}

/// Precision the model weights are loaded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quantization {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "8bit")]
    EightBit,
    #[serde(rename = "4bit")]
    FourBit,
}

impl Quantization {
    pub const ALL: [Quantization; 3] = [
        Quantization::Full,
        Quantization::EightBit,
        Quantization::FourBit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::Full => "full",
            Quantization::EightBit => "8bit",
            Quantization::FourBit => "4bit",
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            Quantization::Full => 16,
            Quantization::EightBit => 8,
            Quantization::FourBit => 4,
        }
    }
}

impl Display for Quantization {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quantization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" | "16bit" | "16" => Ok(Quantization::Full),
            "8bit" | "8" => Ok(Quantization::EightBit),
            "4bit" | "4" => Ok(Quantization::FourBit),
            _ => bail!("Unknown quantization '{s}', expected one of: full, 8bit, 4bit"),
        }
    }
}

/// A single unit of work run against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Summarize,
    Generate,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Summarize => "summarize",
            Task::Generate => "generate",
        }
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The non-empty set of tasks a scenario runs.
///
/// Tasks always run in the order summarize, generate. The text form joins the task names with
/// `+`, for example `summarize+generate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskSet(BTreeSet<Task>);

impl TaskSet {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> anyhow::Result<Self> {
        let tasks = tasks.into_iter().collect::<BTreeSet<_>>();
        if tasks.is_empty() {
            bail!("A scenario must run at least one task");
        }

        Ok(Self(tasks))
    }

    pub fn contains(&self, task: Task) -> bool {
        self.0.contains(&task)
    }

    pub fn iter(&self) -> impl Iterator<Item = Task> + '_ {
        self.0.iter().copied()
    }
}

impl Display for TaskSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join("+"))
    }
}

impl FromStr for TaskSet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tasks = s
            .split('+')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part {
                "summarize" | "summary" => Ok(Task::Summarize),
                "generate" => Ok(Task::Generate),
                other => Err(anyhow!("Unknown task '{other}' in '{s}'")),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        TaskSet::new(tasks)
    }
}

impl TryFrom<String> for TaskSet {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskSet> for String {
    fn from(value: TaskSet) -> Self {
        value.to_string()
    }
}

/// One point in the configuration matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    pub backend: BackendKind,
    pub model_id: String,
    pub tasks: TaskSet,
    pub quantization: Quantization,
    pub gpu_count: NonZeroU32,
}

impl ScenarioDescriptor {
    /// Whether the combination can be run at all, see [BackendKind::supports].
    pub fn is_supported(&self) -> bool {
        self.backend.supports(self.quantization)
    }

    /// A short human readable name, used in logs and tables.
    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}gpu",
            self.backend, self.model_id, self.tasks, self.quantization, self.gpu_count
        )
    }
}
