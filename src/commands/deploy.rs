use std::path::PathBuf;

use clap::Args;
use sitedeploy::{DeployOptions, DeployReport, Deployment};

use super::{summary_exit_code, CmdResult};

#[derive(Args)]
pub struct DeployArgs {
    /// Sites to deploy (all configured sites when omitted)
    pub sites: Vec<String>,

    /// Deployment tag (defaults to a generated UUID)
    #[arg(long)]
    pub tag: Option<String>,

    /// Build directory
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// Use or produce the bundle archive at this path
    #[arg(long)]
    pub bundle_file: Option<PathBuf>,

    /// Remove the build directory after deploying
    #[arg(long)]
    pub clean: bool,
}

pub fn run(args: DeployArgs, global: &crate::commands::GlobalArgs) -> CmdResult<DeployReport> {
    let action = global.action()?;
    let deployment = Deployment::new(args.tag);
    let options = DeployOptions {
        build_dir: args.build_dir,
        bundle_file: args.bundle_file,
        clean: args.clean,
    };

    let report = action.deploy(&deployment, &args.sites, &options)?;
    let exit_code = summary_exit_code(&report.summary);
    Ok((report, exit_code))
}
