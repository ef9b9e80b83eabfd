use clap::Args;

use super::{CmdResult, SummaryOutput};

#[derive(Args)]
pub struct SetupArgs {
    /// Sites to provision (all configured sites when omitted)
    pub sites: Vec<String>,
}

pub fn run(args: SetupArgs, global: &crate::commands::GlobalArgs) -> CmdResult<SummaryOutput> {
    let action = global.action()?;
    let sites = action.config().resolve_sites(&args.sites)?;
    let summary = action.setup(&sites)?;
    Ok(SummaryOutput::new("setup", sites, summary))
}
