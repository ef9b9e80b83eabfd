use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    /// Output streams to the terminal; only errors get the JSON envelope.
    Raw,
}

mod commands;
mod output;

use commands::{deploy, logs, service, setup};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "sitedeploy")]
#[command(version = VERSION)]
#[command(about = "Build an application bundle and deploy it to fleets of servers")]
struct Cli {
    /// Config file (JSON or TOML)
    #[arg(long, global = true, default_value = "sitedeploy.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build once and deploy to the given sites
    Deploy(deploy::DeployArgs),
    /// Tail application logs on every server of a site
    Logs(logs::LogsArgs),
    /// Provision servers: directories, runtime, service, certificates
    Setup(setup::SetupArgs),
    /// Start the application service
    Start(service::ServiceArgs),
    /// Stop the application service
    Stop(service::ServiceArgs),
    /// Restart the application service
    Restart(service::ServiceArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Logs(_) => ResponseMode::Raw,
        _ => ResponseMode::Json,
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs { config: cli.config };
    let mode = response_mode(&cli.command);

    let (json_result, exit_code) = commands::run_json(cli.command, &global);

    match (mode, json_result) {
        (ResponseMode::Json, result) => {
            let _ = output::print_json_result(result);
        }
        (ResponseMode::Raw, Err(err)) => {
            let _ = output::print_json_result(Err(err));
        }
        (ResponseMode::Raw, Ok(_)) => {}
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
