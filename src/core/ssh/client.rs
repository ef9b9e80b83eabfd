use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::session::{ExecOptions, OutputHandler, OutputStream};
use crate::utils::shell;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the server host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }

    /// Stderr if present, otherwise stdout, trimmed.
    pub fn error_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

/// What to feed the remote command on stdin.
#[derive(Clone, Copy)]
pub enum StdinSource<'a> {
    Empty,
    File(&'a Path),
    Bytes(&'a [u8]),
}

impl SshClient {
    pub fn from_server(server: &ServerConfig) -> Result<Self> {
        let identity_file = match &server.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(
                        server.host.clone(),
                        expanded,
                    ));
                }
                Some(expanded)
            }
            _ => None,
        };

        let is_local = is_local_host(&server.host);
        if is_local {
            log_status!("ssh", "Server '{}' is localhost, using local execution", server.host);
        }

        Ok(Self {
            host: server.host.clone(),
            user: server.user.clone(),
            port: server.port,
            identity_file,
            is_local,
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Fail fast on stalled connections or unexpected prompts.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());

        args
    }

    /// Open a throwaway channel to prove the host is reachable.
    pub fn check_connection(&self) -> Result<()> {
        if self.is_local {
            return Ok(());
        }
        let output = self.execute_with_retry("true", StdinSource::Empty, &ExecOptions::default(), 3);
        if output.success {
            Ok(())
        } else {
            Err(Error::ssh_connect_failed(
                self.host.clone(),
                output.exit_code,
                output.error_text(),
            ))
        }
    }

    /// Run `command` once. Remote steps are not safe to repeat, so only
    /// [`check_connection`](Self::check_connection) retries.
    pub fn execute(&self, command: &str, options: &ExecOptions) -> CommandOutput {
        self.execute_once(command, StdinSource::Empty, options)
    }

    pub fn execute_with_input(
        &self,
        command: &str,
        input: StdinSource<'_>,
        options: &ExecOptions,
    ) -> CommandOutput {
        self.execute_once(command, input, options)
    }

    pub fn upload_file(&self, local_path: &Path, remote_path: &str) -> CommandOutput {
        let parent = Path::new(remote_path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty());
        let remote_command = match parent {
            Some(dir) => format!(
                "mkdir -p {} && cat > {}",
                shell::quote_path(&dir),
                shell::quote_path(remote_path)
            ),
            None => format!("cat > {}", shell::quote_path(remote_path)),
        };
        self.execute_once(&remote_command, StdinSource::File(local_path), &ExecOptions::default())
    }

    fn execute_with_retry(
        &self,
        command: &str,
        input: StdinSource<'_>,
        options: &ExecOptions,
        max_attempts: u32,
    ) -> CommandOutput {
        let backoff_secs = [0, 2, 5]; // delays before retry 1, 2, 3
        let mut attempt = 0;

        loop {
            let result = self.execute_once(command, input, options);
            attempt += 1;

            // Only retry on transient connection errors, not command failures
            if result.success || attempt >= max_attempts || !is_transient_ssh_error(&result) {
                return result;
            }

            let delay = backoff_secs.get(attempt as usize).copied().unwrap_or(5);
            log_status!(
                "ssh",
                "{}: connection failed (attempt {}/{}), retrying in {}s...",
                self.host,
                attempt,
                max_attempts,
                delay
            );
            thread::sleep(Duration::from_secs(delay));
        }
    }

    fn execute_once(&self, command: &str, input: StdinSource<'_>, options: &ExecOptions) -> CommandOutput {
        // Local execution: run command directly instead of over SSH
        if self.is_local {
            return run_process(shell_command(command), input, options);
        }

        let mut cmd = Command::new("ssh");
        cmd.args(self.build_ssh_args(command));
        run_process(cmd, input, options)
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

/// Spawn `cmd`, feed it `input`, and collect stdout/stderr while forwarding
/// each line to the output handler.
fn run_process(mut cmd: Command, input: StdinSource<'_>, options: &ExecOptions) -> CommandOutput {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    match input {
        StdinSource::Empty => {
            cmd.stdin(Stdio::null());
        }
        StdinSource::File(path) => match std::fs::File::open(path) {
            Ok(file) => {
                cmd.stdin(file);
            }
            Err(err) => {
                return CommandOutput::failed(-1, format!("Failed to open stdin file: {}", err));
            }
        },
        StdinSource::Bytes(_) => {
            cmd.stdin(Stdio::piped());
        }
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return CommandOutput::failed(-1, format!("Command error: {}", e)),
    };

    let handler = options.on_output.as_ref();
    let (stdout, stderr) = thread::scope(|scope| {
        if let (StdinSource::Bytes(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            // Dropping the pipe at the end of the closure signals EOF.
            scope.spawn(move || {
                let _ = stdin.write_all(bytes);
            });
        }

        let stderr_reader = child
            .stderr
            .take()
            .map(|pipe| scope.spawn(move || collect_lines(pipe, OutputStream::Stderr, handler)));
        let stdout = child
            .stdout
            .take()
            .map(|pipe| collect_lines(pipe, OutputStream::Stdout, handler))
            .unwrap_or_default();
        let stderr = stderr_reader
            .map(|reader| reader.join().unwrap_or_default())
            .unwrap_or_default();
        (stdout, stderr)
    });

    match child.wait() {
        Ok(status) => CommandOutput {
            stdout,
            stderr,
            success: status.success(),
            exit_code: status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput {
            stdout,
            stderr: format!("Command error: {}", e),
            success: false,
            exit_code: -1,
        },
    }
}

fn collect_lines<R: Read>(pipe: R, stream: OutputStream, handler: Option<&OutputHandler>) -> String {
    let mut reader = BufReader::new(pipe);
    let mut collected = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if let Some(handler) = handler {
                    handler(stream, line.trim_end_matches(['\n', '\r']));
                }
                collected.push_str(&line);
            }
        }
    }
    collected
}

/// Execute local command with stdout/stderr passed through to terminal.
/// Returns only exit status, not captured output.
pub fn execute_local_command_passthrough(
    command: &str,
    current_dir: Option<&Path>,
    env: Option<&[(&str, &str)]>,
) -> CommandOutput {
    let mut cmd = shell_command(command);

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }

    if let Some(env_pairs) = env {
        cmd.envs(env_pairs.iter().copied());
    }

    // Build output belongs on stderr; stdout carries the JSON response.
    cmd.stdout(Stdio::from(std::io::stderr()));
    cmd.stderr(Stdio::inherit());

    match cmd.status() {
        Ok(status) => CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            success: status.success(),
            exit_code: status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::failed(-1, format!("Command error: {}", e)),
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    // SSH exit code 255 = connection error (not a remote command failure)
    let is_connection_exit = output.exit_code == 255;

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    is_connection_exit || transient_patterns.iter().any(|p| stderr.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn local_client() -> SshClient {
        SshClient {
            host: "localhost".to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            is_local: true,
        }
    }

    #[test]
    fn ssh_args_include_port_and_identity() {
        let client = SshClient {
            host: "10.0.0.5".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            identity_file: Some("/keys/id".to_string()),
            is_local: false,
        };
        let args = client.build_ssh_args("uptime");
        assert_eq!(&args[..4], &["-i", "/keys/id", "-p", "2222"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "deploy@10.0.0.5");
        assert_eq!(args[args.len() - 1], "uptime");
    }

    #[test]
    fn transient_detection() {
        assert!(is_transient_ssh_error(&CommandOutput::failed(255, "")));
        assert!(is_transient_ssh_error(&CommandOutput::failed(1, "Connection refused")));
        assert!(!is_transient_ssh_error(&CommandOutput::failed(1, "No such file")));
    }

    #[cfg(unix)]
    #[test]
    fn command_exiting_255_runs_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let runs = dir.path().join("runs");
        let command = format!("echo run >> {}; exit 255", shell::quote_path(&runs.to_string_lossy()));

        let output = local_client().execute(&command, &ExecOptions::default());

        assert_eq!(output.exit_code, 255);
        assert_eq!(std::fs::read_to_string(&runs).unwrap().lines().count(), 1);
    }

    #[test]
    fn missing_identity_file_is_rejected() {
        let server = ServerConfig {
            host: "web-1".to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: Some("/definitely/not/here.pem".to_string()),
            os: Default::default(),
            env: Default::default(),
        };
        let err = SshClient::from_server(&server).err().unwrap();
        assert_eq!(err.code.as_str(), "ssh.identity_file_not_found");
    }

    #[cfg(unix)]
    #[test]
    fn local_execution_streams_lines() {
        let seen: Arc<Mutex<Vec<(OutputStream, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = ExecOptions::streaming(Arc::new(move |stream: OutputStream, line: &str| {
            sink.lock().unwrap().push((stream, line.to_string()));
        }));

        let output = local_client().execute("echo one; echo two; echo oops >&2; exit 3", &options);

        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "one\ntwo\n");
        let seen = seen.lock().unwrap();
        assert!(seen.contains(&(OutputStream::Stdout, "two".to_string())));
        assert!(seen.contains(&(OutputStream::Stderr, "oops".to_string())));
    }

    #[cfg(unix)]
    #[test]
    fn local_execution_feeds_stdin_bytes() {
        let output = local_client().execute_with_input(
            "sh -s",
            StdinSource::Bytes(b"echo from-stdin\n"),
            &ExecOptions::default(),
        );
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "from-stdin");
    }
}
