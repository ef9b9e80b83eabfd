use std::io::Write;
use std::sync::Arc;

use clap::Args;
use sitedeploy::session::OutputStream;
use sitedeploy::LogsOptions;

use super::{CmdResult, SummaryOutput};

#[derive(Args)]
pub struct LogsArgs {
    /// Site whose servers to read logs from
    pub site: String,

    /// Follow log output (like tail -f)
    #[arg(short = 'f', long)]
    pub tail: bool,
}

/// Log lines stream straight to the terminal as they arrive.
pub fn run(args: LogsArgs, global: &crate::commands::GlobalArgs) -> CmdResult<SummaryOutput> {
    let action = global.action()?;
    let options = LogsOptions { tail: args.tail };

    let summary = action.logs(
        &args.site,
        &options,
        Arc::new(|stream: OutputStream, line: &str| match stream {
            OutputStream::Stdout => {
                let _ = writeln!(std::io::stdout().lock(), "{}", line);
            }
            OutputStream::Stderr => {
                let _ = writeln!(std::io::stderr().lock(), "{}", line);
            }
        }),
    )?;

    Ok(SummaryOutput::new("logs", vec![args.site], summary))
}
