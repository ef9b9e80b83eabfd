use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use sitedeploy::events::{Event, EventName};
use sitedeploy::log_status;
use sitedeploy::summary::SummaryStats;
use sitedeploy::{Action, SummaryMap};

pub type CmdResult<T> = sitedeploy::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config: PathBuf,
}

impl GlobalArgs {
    /// Load and validate the config file, then wire an action with stage logging.
    pub fn action(&self) -> sitedeploy::Result<Action> {
        let config = sitedeploy::config::load(&self.config)?;
        let action = Action::new(Arc::new(config));
        action.events().subscribe(
            EventName::StageChanged,
            Arc::new(|event: &Event| {
                if let Event::StageChanged { to, .. } = event {
                    log_status!("action", "Stage: {:?}", to);
                }
            }),
        );
        Ok(action)
    }
}

/// Exit code for a command that completed: 1 when any host failed.
pub(crate) fn summary_exit_code(summary: &SummaryMap) -> i32 {
    if summary.has_errors() {
        1
    } else {
        0
    }
}

/// Output for commands that only report per-host results.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutput {
    pub command: String,
    pub sites: Vec<String>,
    pub summary: SummaryMap,
    pub stats: SummaryStats,
    pub has_errors: bool,
}

impl SummaryOutput {
    pub fn new(command: &str, sites: Vec<String>, summary: SummaryMap) -> (Self, i32) {
        let exit_code = summary_exit_code(&summary);
        let output = Self {
            command: command.to_string(),
            sites,
            stats: summary.summarize(),
            has_errors: summary.has_errors(),
            summary,
        };
        (output, exit_code)
    }
}

pub mod deploy;
pub mod logs;
pub mod service;
pub mod setup;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(command: crate::Commands, global: &GlobalArgs) -> (sitedeploy::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Logs(args) => dispatch!(args, global, logs),
        crate::Commands::Setup(args) => dispatch!(args, global, setup),
        crate::Commands::Start(args) => {
            crate::output::map_cmd_result_to_json(service::run(args, sitedeploy::task_builder::ServiceOp::Start, global))
        }
        crate::Commands::Stop(args) => {
            crate::output::map_cmd_result_to_json(service::run(args, sitedeploy::task_builder::ServiceOp::Stop, global))
        }
        crate::Commands::Restart(args) => crate::output::map_cmd_result_to_json(service::run(
            args,
            sitedeploy::task_builder::ServiceOp::Restart,
            global,
        )),
    }
}
