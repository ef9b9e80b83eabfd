use clap::Args;
use sitedeploy::task_builder::ServiceOp;

use super::{CmdResult, SummaryOutput};

#[derive(Args)]
pub struct ServiceArgs {
    /// Sites to act on (all configured sites when omitted)
    pub sites: Vec<String>,
}

pub fn run(args: ServiceArgs, op: ServiceOp, global: &crate::commands::GlobalArgs) -> CmdResult<SummaryOutput> {
    let action = global.action()?;
    let sites = action.config().resolve_sites(&args.sites)?;
    let summary = action.service(&sites, op)?;
    Ok(SummaryOutput::new(op.as_str(), sites, summary))
}
