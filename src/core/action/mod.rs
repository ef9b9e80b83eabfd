//! Top-level orchestration: build once, fan out over sites and their
//! sessions, merge every host's history into one summary.

mod deploy;
mod logs;

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::builder::{AppBuilder, Builder};
use crate::config::{Config, SiteConfig};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::os::OsTag;
use crate::runner::{SessionRunner, CONNECT_TASK};
use crate::session::{SessionFactory, SessionsMap, SiteSession};
use crate::ssh::SshSessionFactory;
use crate::summary::{SummaryMap, TaskResult};
use crate::task::{parallel, TaskContext, TaskList};
use crate::task_builder::{task_builder_for, ServiceOp};

pub use deploy::{DeployOptions, DeployReport};
pub use logs::LogsOptions;

/// Task name recorded for a host whose fan-out branch died outside the runner.
pub const EXECUTE_TASK: &str = "execute";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionStage {
    NotStarted,
    Building,
    Connecting,
    Executing,
    Merging,
    Completed,
    Failed,
}

/// Identity of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployment {
    pub tag: String,
}

impl Deployment {
    /// Use `tag` when given, otherwise a fresh UUID.
    pub fn new(tag: Option<String>) -> Self {
        let tag = tag
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self { tag }
    }

    /// The tag names the release on every host and the default build
    /// directory, so it is limited to a path- and shell-neutral alphabet.
    pub fn validate(&self) -> Result<()> {
        let mut chars = self.tag.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));
        if valid {
            return Ok(());
        }
        Err(Error::validation_invalid_argument(
            "tag",
            "must start with a letter or digit and contain only letters, digits, '.', '_', '+' or '-'",
            Some(self.tag.clone()),
            None,
        ))
    }
}

pub struct Action {
    config: Arc<Config>,
    builder: Arc<dyn Builder>,
    sessions: Arc<dyn SessionFactory>,
    events: EventBus,
    stage: Mutex<ActionStage>,
}

impl Action {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            builder: Arc::new(AppBuilder),
            sessions: Arc::new(SshSessionFactory),
            events: EventBus::new(),
            stage: Mutex::new(ActionStage::NotStarted),
        }
    }

    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_session_factory(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn stage(&self) -> ActionStage {
        *self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run first-time host provisioning on every server of `sites` (all sites when empty).
    pub fn setup(&self, sites: &[String]) -> Result<SummaryMap> {
        let result = self.config.resolve_sites(sites).and_then(|names| {
            self.execute_sites(&names, |site, os, _| {
                (task_builder_for(os).setup(&self.config, site), TaskContext::default())
            })
        });
        self.finish(result)
    }

    /// Start, stop or restart the application service on every server of `sites`.
    pub fn service(&self, sites: &[String], op: ServiceOp) -> Result<SummaryMap> {
        let result = self.config.resolve_sites(sites).and_then(|names| {
            self.execute_sites(&names, |_, os, _| {
                (task_builder_for(os).service(&self.config, op), TaskContext::default())
            })
        });
        self.finish(result)
    }

    fn transition(&self, to: ActionStage) {
        let from = {
            let mut stage = self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *stage, to)
        };
        if from != to {
            self.events.publish(Event::StageChanged { from, to });
        }
    }

    /// Record the terminal stage for `result`.
    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.transition(ActionStage::Completed),
            Err(err) => {
                log_status!("action", "Failed: {}", err.message);
                self.transition(ActionStage::Failed);
                self.events.publish(Event::ActionFailed {
                    code: err.code.as_str().to_string(),
                    message: err.message.clone(),
                });
            }
        }
        result
    }

    /// Two-level fan-out: sites concurrently, then every session of a site
    /// with at most `deploy.maxParallel` in flight. Histories merge session →
    /// group → site → final on the calling thread.
    fn execute_sites<P>(&self, site_names: &[String], plan: P) -> Result<SummaryMap>
    where
        P: Fn(&SiteConfig, OsTag, &SiteSession) -> (TaskList, TaskContext) + Sync,
    {
        self.transition(ActionStage::Connecting);
        let mut targets = Vec::with_capacity(site_names.len());
        for name in site_names {
            let site = self.config.site(name)?;
            let sessions = SessionsMap::for_site(&self.config, site, self.sessions.as_ref())?;
            let hosts: Vec<String> = sessions
                .groups()
                .flat_map(|g| g.sessions.iter().map(|s| s.session.host().to_string()))
                .collect();
            targets.push((site, sessions, hosts));
        }
        if targets.iter().all(|(_, sessions, _)| sessions.is_empty()) {
            return Err(Error::deploy_no_sessions(site_names.to_vec()));
        }

        self.transition(ActionStage::Executing);
        let runner = SessionRunner::new(self.events.clone());
        let limit = self.config.deploy.max_parallel;
        let site_count = targets.len();
        let outcomes = parallel(
            targets.iter().map(|(site, sessions, _)| (*site, sessions)).collect(),
            site_count,
            |(site, sessions)| execute_site(site, sessions, &runner, limit, &plan),
        );

        self.transition(ActionStage::Merging);
        let site_maps: Vec<SummaryMap> = outcomes
            .into_iter()
            .zip(&targets)
            .map(|(outcome, (_, _, hosts))| outcome.unwrap_or_else(|err| branch_failed(hosts, &err)))
            .collect();
        let summary = SummaryMap::merge_all(&site_maps);

        if all_unreachable(&summary) {
            return Err(Error::deploy_no_sessions(site_names.to_vec())
                .with_details("summary", serde_json::to_value(&summary).unwrap_or_default()));
        }

        Ok(summary)
    }
}

fn execute_site<P>(
    site: &SiteConfig,
    sessions: &SessionsMap,
    runner: &SessionRunner,
    limit: usize,
    plan: &P,
) -> SummaryMap
where
    P: Fn(&SiteConfig, OsTag, &SiteSession) -> (TaskList, TaskContext) + Sync,
{
    let units: Vec<(usize, OsTag, &SiteSession)> = sessions
        .groups()
        .enumerate()
        .flat_map(|(index, group)| group.sessions.iter().map(move |entry| (index, group.os, entry)))
        .collect();
    let group_count = sessions.groups().count();

    let results = parallel(units.clone(), limit, |(_, os, entry)| {
        let (tasks, ctx) = plan(site, os, entry);
        runner.execute(entry.session.as_ref(), &tasks, &ctx)
    });

    let mut group_maps = vec![SummaryMap::new(); group_count];
    for ((index, _, entry), result) in units.into_iter().zip(results) {
        let host_map = result.unwrap_or_else(|err| branch_failed(&[entry.session.host().to_string()], &err));
        group_maps[index] = group_maps[index].merge(&host_map);
    }
    SummaryMap::merge_all(&group_maps)
}

/// Failed entries for hosts whose branch produced no summary of its own.
fn branch_failed(hosts: &[String], err: &Error) -> SummaryMap {
    let maps: Vec<SummaryMap> = hosts
        .iter()
        .map(|host| {
            SummaryMap::for_host(
                host.clone(),
                vec![TaskResult::failure(host.clone(), EXECUTE_TASK, err.message.clone(), None)],
            )
        })
        .collect();
    SummaryMap::merge_all(&maps)
}

/// True when every host in `summary` failed at the connect step.
fn all_unreachable(summary: &SummaryMap) -> bool {
    !summary.is_empty()
        && summary.hosts().all(|host| {
            matches!(
                summary.history(host),
                Some([only]) if !only.success && only.task_name == CONNECT_TASK
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn deployment_tag_defaults_to_uuid() {
        let generated = Deployment::new(None);
        assert!(uuid::Uuid::parse_str(&generated.tag).is_ok());
        assert_eq!(Deployment::new(Some("v1.2".to_string())).tag, "v1.2");
        assert_ne!(Deployment::new(Some("  ".to_string())).tag, "  ");
    }

    #[test]
    fn tag_validation() {
        assert!(Deployment::new(None).validate().is_ok());
        assert!(Deployment::new(Some("v1.2.0+build_7".to_string())).validate().is_ok());

        for tag in ["v1$(reboot)", "v1\"broken", "../../etc", ".hidden", "a b"] {
            let err = Deployment::new(Some(tag.to_string())).validate().unwrap_err();
            assert_eq!(err.code, ErrorCode::ValidationInvalidArgument, "{}", tag);
            assert_eq!(err.details["id"], tag);
        }
    }

    #[test]
    fn unreachable_only_when_every_host_failed_to_connect() {
        let down = |host: &str| {
            SummaryMap::for_host(host, vec![TaskResult::failure(host, CONNECT_TASK, "refused", Some(255))])
        };
        let up = SummaryMap::for_host("c", vec![TaskResult::success("c", "deploy", "ok")]);

        assert!(all_unreachable(&down("a").merge(&down("b"))));
        assert!(!all_unreachable(&down("a").merge(&up)));
        assert!(!all_unreachable(&SummaryMap::new()));
    }

    #[test]
    fn branch_failure_marks_every_host() {
        let err = Error::internal_unexpected("Execution thread panicked: boom");
        let map = branch_failed(&["a".to_string(), "b".to_string()], &err);
        assert_eq!(map.len(), 2);
        assert_eq!(map.failed_hosts(), vec!["a", "b"]);
    }
}
