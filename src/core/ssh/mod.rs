mod client;
mod session;

pub use client::{
    execute_local_command_passthrough, is_local_host,
    CommandOutput, SshClient, StdinSource,
};
pub use session::{script_payload, SshSession, SshSessionFactory};
