use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::os::OsTag;
use crate::session::{ExecOptions, ScriptRef, Session, SessionFactory};
use crate::summary::Vars;
use crate::utils::shell;

use super::client::{CommandOutput, SshClient, StdinSource};

/// [`Session`] backed by the system `ssh` binary.
pub struct SshSession {
    client: SshClient,
    os: OsTag,
    connected: Mutex<bool>,
}

impl SshSession {
    pub fn new(client: SshClient, os: OsTag) -> Self {
        Self {
            client,
            os,
            connected: Mutex::new(false),
        }
    }
}

impl Session for SshSession {
    fn host(&self) -> &str {
        &self.client.host
    }

    fn os(&self) -> OsTag {
        self.os
    }

    fn connect(&self) -> Result<()> {
        let mut connected = self
            .connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *connected {
            return Ok(());
        }
        log_status!("ssh", "Connecting to {}@{}", self.client.user, self.client.host);
        self.client.check_connection()?;
        *connected = true;
        Ok(())
    }

    fn execute(&self, command: &str, options: &ExecOptions) -> CommandOutput {
        self.client.execute(command, options)
    }

    fn execute_script(&self, script: &ScriptRef, vars: &Vars, options: &ExecOptions) -> CommandOutput {
        let source = match script.load() {
            Ok(source) => source,
            Err(err) => return CommandOutput::failed(-1, format!("{}: {}", err.message, err.details)),
        };
        let payload = script_payload(&source, vars);
        self.client
            .execute_with_input("bash -s", StdinSource::Bytes(payload.as_bytes()), options)
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> CommandOutput {
        self.client.upload_file(local_path, remote_path)
    }
}

/// Script text sent to the remote shell: bindings exported as quoted
/// variables, then the body unchanged. Values never become shell code.
pub fn script_payload(source: &str, vars: &Vars) -> String {
    let mut payload = String::new();
    for (name, value) in vars {
        if let Some(line) = shell::export_line(name, value) {
            payload.push_str(&line);
            payload.push('\n');
        }
    }
    payload.push_str(source);
    if !payload.ends_with('\n') {
        payload.push('\n');
    }
    payload
}

/// Creates [`SshSession`]s from server configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshSessionFactory;

impl SessionFactory for SshSessionFactory {
    fn create(&self, server: &ServerConfig) -> Result<Arc<dyn Session>> {
        let client = SshClient::from_server(server)?;
        Ok(Arc::new(SshSession::new(client, server.os)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn localhost() -> Arc<dyn Session> {
        let server = ServerConfig {
            host: "localhost".to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            os: OsTag::Linux,
            env: Vars::new(),
        };
        let session = SshSessionFactory.create(&server).unwrap();
        session.connect().unwrap();
        session
    }

    #[test]
    fn payload_exports_bindings_ahead_of_body() {
        let mut vars = Vars::new();
        vars.insert("appName".to_string(), "shop".to_string());
        vars.insert("not-exportable".to_string(), "x".to_string());

        let payload = script_payload("cd \"/opt/$appName\"", &vars);

        assert_eq!(payload, "export appName='shop'\ncd \"/opt/$appName\"\n");
    }

    #[test]
    fn payload_leaves_placeholders_unrendered() {
        let mut vars = Vars::new();
        vars.insert("deployTag".to_string(), "v1$(reboot)".to_string());

        let payload = script_payload("echo \"{{deployTag}}\"", &vars);

        assert_eq!(payload, "export deployTag='v1$(reboot)'\necho \"{{deployTag}}\"\n");
    }

    #[cfg(unix)]
    #[test]
    fn localhost_session_runs_scripts_locally() {
        let session = localhost();

        let mut vars = Vars::new();
        vars.insert("greeting".to_string(), "hello".to_string());
        let script = ScriptRef {
            name: "greet.sh".to_string(),
            path: None,
            builtin: Some("echo \"$greeting\""),
        };
        let output = session.execute_script(&script, &vars, &ExecOptions::default());
        assert!(output.success, "stderr: {}", output.stderr);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn hostile_deploy_tag_is_written_verbatim() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        fs::create_dir_all(dir.path().join("config")).unwrap();
        let session = localhost();

        for tag in [format!("v1$(touch {})", marker.display()), "v1\"broken".to_string()] {
            let mut vars = Vars::new();
            vars.insert("appRoot".to_string(), dir.path().display().to_string());
            vars.insert("deployTag".to_string(), tag.clone());
            let script = ScriptRef {
                name: "release.sh".to_string(),
                path: None,
                builtin: Some("printf '%s\\n' \"$deployTag\" > \"$appRoot/config/release\""),
            };

            let output = session.execute_script(&script, &vars, &ExecOptions::default());

            assert!(output.success, "stderr: {}", output.stderr);
            let written = fs::read_to_string(dir.path().join("config/release")).unwrap();
            assert_eq!(written.trim_end(), tag);
        }
        assert!(!marker.exists());
    }
}
