//! Remote execution channels and their partition by operating system.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, ServerConfig, SiteConfig};
use crate::error::{Error, Result};
use crate::os::OsTag;
use crate::summary::Vars;
use crate::utils::io;

pub use crate::ssh::CommandOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives output lines as a command produces them.
pub type OutputHandler = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

/// Per-call execution options.
#[derive(Clone, Default)]
pub struct ExecOptions {
    pub on_output: Option<OutputHandler>,
}

impl ExecOptions {
    pub fn streaming(handler: OutputHandler) -> Self {
        Self {
            on_output: Some(handler),
        }
    }
}

/// A remote script located by the `<os>/<name>` convention.
///
/// A file under the configured scripts directory wins over the built-in copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRef {
    pub name: String,
    pub path: Option<PathBuf>,
    pub builtin: Option<&'static str>,
}

impl ScriptRef {
    pub fn load(&self) -> Result<String> {
        if let Some(path) = self.path.as_deref().filter(|p| p.exists()) {
            return io::read_file(path, "read remote script");
        }
        self.builtin.map(str::to_string).ok_or_else(|| {
            Error::internal_io(
                format!("Script '{}' not found", self.name),
                self.path.as_ref().map(|p| p.display().to_string()),
            )
        })
    }
}

/// Handle to one remote host's execution channel.
///
/// Non-zero exits come back as unsuccessful [`CommandOutput`]s; only a
/// failure to establish the channel is an `Err`.
pub trait Session: Send + Sync {
    fn host(&self) -> &str;

    fn os(&self) -> OsTag;

    /// Establish the channel. Calling it again once connected is a no-op.
    fn connect(&self) -> Result<()>;

    fn execute(&self, command: &str, options: &ExecOptions) -> CommandOutput;

    /// Run a script with `vars` substituted into it and exported to its environment.
    fn execute_script(&self, script: &ScriptRef, vars: &Vars, options: &ExecOptions) -> CommandOutput;

    fn upload(&self, local_path: &Path, remote_path: &str) -> CommandOutput;
}

/// Creates sessions from server configuration without connecting them.
pub trait SessionFactory: Send + Sync {
    fn create(&self, server: &ServerConfig) -> Result<Arc<dyn Session>>;
}

/// A session plus the read-only inputs resolved for it before fan-out.
#[derive(Clone)]
pub struct SiteSession {
    pub session: Arc<dyn Session>,
    pub env: Vars,
}

/// Sessions sharing one OS tag.
#[derive(Clone)]
pub struct SessionGroup {
    pub os: OsTag,
    pub sessions: Vec<SiteSession>,
}

/// One site's sessions partitioned by OS tag.
#[derive(Clone, Default)]
pub struct SessionsMap {
    groups: BTreeMap<OsTag, SessionGroup>,
}

impl SessionsMap {
    /// Partition sessions by their OS tag, keeping input order inside each group.
    pub fn partition(sessions: Vec<SiteSession>) -> Self {
        let mut groups: BTreeMap<OsTag, SessionGroup> = BTreeMap::new();
        for entry in sessions {
            let os = entry.session.os();
            groups
                .entry(os)
                .or_insert_with(|| SessionGroup {
                    os,
                    sessions: Vec::new(),
                })
                .sessions
                .push(entry);
        }
        Self { groups }
    }

    /// Create (but do not connect) a session for every server of a site.
    pub fn for_site(config: &Config, site: &SiteConfig, factory: &dyn SessionFactory) -> Result<Self> {
        let sessions = site
            .servers
            .iter()
            .map(|server| {
                Ok(SiteSession {
                    session: factory.create(server)?,
                    env: config.env_for(site, server),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::partition(sessions))
    }

    pub fn groups(&self) -> impl Iterator<Item = &SessionGroup> {
        self.groups.values()
    }

    pub fn group(&self, os: OsTag) -> Option<&SessionGroup> {
        self.groups.get(&os)
    }

    pub fn session_count(&self) -> usize {
        self.groups.values().map(|g| g.sessions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.session_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct StubSession {
        host: String,
        os: OsTag,
    }

    impl Session for StubSession {
        fn host(&self) -> &str {
            &self.host
        }
        fn os(&self) -> OsTag {
            self.os
        }
        fn connect(&self) -> Result<()> {
            Ok(())
        }
        fn execute(&self, _command: &str, _options: &ExecOptions) -> CommandOutput {
            CommandOutput::ok("")
        }
        fn execute_script(&self, _script: &ScriptRef, _vars: &Vars, _options: &ExecOptions) -> CommandOutput {
            CommandOutput::ok("")
        }
        fn upload(&self, _local_path: &Path, _remote_path: &str) -> CommandOutput {
            CommandOutput::ok("")
        }
    }

    fn entry(host: &str, os: OsTag) -> SiteSession {
        SiteSession {
            session: Arc::new(StubSession {
                host: host.to_string(),
                os,
            }),
            env: Vars::new(),
        }
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        let input = vec![
            entry("a", OsTag::Linux),
            entry("b", OsTag::SunOs),
            entry("c", OsTag::Linux),
            entry("d", OsTag::SunOs),
            entry("e", OsTag::Linux),
        ];
        let map = SessionsMap::partition(input);

        let mut seen = HashSet::new();
        for group in map.groups() {
            for s in &group.sessions {
                assert_eq!(s.session.os(), group.os);
                assert!(seen.insert(s.session.host().to_string()), "host in two groups");
            }
        }
        let expected: HashSet<String> = ["a", "b", "c", "d", "e"].iter().map(|h| h.to_string()).collect();
        assert_eq!(seen, expected);
        assert_eq!(map.session_count(), 5);

        let linux: Vec<&str> = map
            .group(OsTag::Linux)
            .unwrap()
            .sessions
            .iter()
            .map(|s| s.session.host())
            .collect();
        assert_eq!(linux, vec!["a", "c", "e"]);
    }

    #[test]
    fn empty_input_has_no_groups() {
        let map = SessionsMap::partition(Vec::new());
        assert!(map.is_empty());
        assert_eq!(map.groups().count(), 0);
    }

    #[test]
    fn script_prefers_override_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("deploy.sh");
        std::fs::write(&path, "echo override").unwrap();

        let script = ScriptRef {
            name: "deploy.sh".to_string(),
            path: Some(path),
            builtin: Some("echo builtin"),
        };
        assert_eq!(script.load().unwrap(), "echo override");

        let fallback = ScriptRef {
            path: Some(dir.path().join("missing.sh")),
            ..script
        };
        assert_eq!(fallback.load().unwrap(), "echo builtin");
    }
}
