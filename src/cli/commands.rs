//! CLI command definitions

use crate::core::{workflow::EngineSettings, TriggerContext};
use crate::execution::SchedulingStrategy;
use clap::Args;
use std::collections::BTreeMap;

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Trigger event type
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch the run is for
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Full git ref (defaults to refs/heads/<branch>)
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Who triggered the run
    #[arg(long, default_value = "local")]
    pub actor: String,

    /// Event payload values (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub payload: Vec<(String, String)>,

    /// Matrix values for this run (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub matrix: Vec<(String, String)>,

    /// Workflow inputs (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// Secret that must be present in the environment
    #[arg(long)]
    pub secret: Vec<String>,

    /// YAML file of NAME: value secrets
    #[arg(long)]
    pub secrets_file: Option<String>,

    /// Scheduling strategy (overrides workflow settings)
    #[arg(long, value_enum)]
    pub strategy: Option<SchedulingStrategyArg>,

    /// Maximum concurrently running stages (overrides --strategy)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrency: Option<u64>,

    /// Seconds running stages get to stop after cancellation
    #[arg(long)]
    pub grace_period: Option<u64>,

    /// Working directory for stage tools
    #[arg(long)]
    pub working_dir: Option<String>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Trigger context from the command-line flags
    pub fn trigger(&self) -> TriggerContext {
        let mut trigger = TriggerContext::new(&self.event, &self.branch).with_actor(&self.actor);
        if let Some(git_ref) = &self.git_ref {
            trigger = trigger.with_ref(git_ref);
        }
        for (k, v) in &self.payload {
            trigger = trigger.with_payload(k, v);
        }
        for (k, v) in &self.matrix {
            trigger = trigger.with_matrix(k, v);
        }
        trigger
    }

    pub fn inputs(&self) -> BTreeMap<String, String> {
        self.input.iter().cloned().collect()
    }

    /// `--concurrency`, then `--strategy`, then the workflow's settings
    pub fn strategy(&self, settings: Option<&EngineSettings>) -> SchedulingStrategy {
        if let Some(n) = self.concurrency {
            return match n {
                1 => SchedulingStrategy::Sequential,
                n => SchedulingStrategy::LimitedParallel(n as usize),
            };
        }
        match (self.strategy, settings) {
            (Some(arg), _) => arg.into(),
            (None, Some(settings)) => SchedulingStrategy::from_settings(settings),
            (None, None) => SchedulingStrategy::default(),
        }
    }
}

/// Validate a workflow definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List workflows with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show per-stage details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(4),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
