use std::panic::{self, AssertUnwindSafe};

use crate::events::{Event, EventBus};
use crate::session::Session;
use crate::summary::{SummaryMap, TaskResult};
use crate::task::{run_sequence, TaskContext, TaskList};
use crate::utils::fanout::panic_message;

/// Task name recorded when a session cannot be established.
pub const CONNECT_TASK: &str = "connect";

/// Runs a task list against exactly one session.
///
/// Everything that goes wrong on the host, including a panic, ends up as a
/// failed entry in the returned summary; nothing escapes to the fan-out.
#[derive(Clone, Default)]
pub struct SessionRunner {
    events: EventBus,
}

impl SessionRunner {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    pub fn execute(&self, session: &dyn Session, tasks: &TaskList, ctx: &TaskContext) -> SummaryMap {
        let host = session.host().to_string();
        let history = panic::catch_unwind(AssertUnwindSafe(|| self.run(session, tasks, ctx)))
            .unwrap_or_else(|payload| {
                vec![TaskResult::failure(
                    &host,
                    &tasks.name,
                    format!("Session runner panicked: {}", panic_message(payload.as_ref())),
                    None,
                )]
            });
        SummaryMap::for_host(host, history)
    }

    fn run(&self, session: &dyn Session, tasks: &TaskList, ctx: &TaskContext) -> Vec<TaskResult> {
        let host = session.host();

        if let Err(err) = session.connect() {
            log_status!("deploy", "{}: {}", host, err.message);
            let stderr = err.details.get("stderr").and_then(|v| v.as_str()).unwrap_or("");
            let exit_code = err
                .details
                .get("exitCode")
                .and_then(|v| v.as_i64())
                .map(|code| code as i32);
            let message = if stderr.is_empty() {
                err.message.clone()
            } else {
                format!("{}: {}", err.message, stderr.trim())
            };
            let result = TaskResult::failure(host, CONNECT_TASK, message, exit_code);
            self.events.publish(Event::TaskFinished {
                host: host.to_string(),
                task_name: CONNECT_TASK.to_string(),
                success: false,
            });
            return vec![result];
        }

        run_sequence(tasks.tasks(), session, ctx, |task, result| match result {
            None => {
                log_status!("deploy", "{}: {}", host, task.describe());
                self.events.publish(Event::TaskStarted {
                    host: host.to_string(),
                    task_name: task.name().to_string(),
                });
            }
            Some(result) => {
                if !result.success {
                    log_status!("deploy", "{}: {}", host, result.message);
                }
                self.events.publish(Event::TaskFinished {
                    host: host.to_string(),
                    task_name: result.task_name.clone(),
                    success: result.success,
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::os::OsTag;
    use crate::session::{CommandOutput, ExecOptions, ScriptRef};
    use crate::summary::Vars;
    use crate::task::{CommandTask, Task};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSession {
        reachable: bool,
        executed: AtomicUsize,
    }

    impl FakeSession {
        fn new(reachable: bool) -> Self {
            Self {
                reachable,
                executed: AtomicUsize::new(0),
            }
        }
    }

    impl Session for FakeSession {
        fn host(&self) -> &str {
            "db-1"
        }
        fn os(&self) -> OsTag {
            OsTag::Linux
        }
        fn connect(&self) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(Error::ssh_connect_failed("db-1", 255, "Connection refused"))
            }
        }
        fn execute(&self, command: &str, _options: &ExecOptions) -> CommandOutput {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if command == "boom" {
                panic!("transport exploded");
            }
            if command == "false" {
                CommandOutput::failed(3, "nope")
            } else {
                CommandOutput::ok("")
            }
        }
        fn execute_script(&self, _script: &ScriptRef, _vars: &Vars, options: &ExecOptions) -> CommandOutput {
            self.execute("script", options)
        }
        fn upload(&self, _local_path: &Path, _remote_path: &str) -> CommandOutput {
            CommandOutput::ok("")
        }
    }

    struct PanicInName;

    impl Task for PanicInName {
        fn name(&self) -> &str {
            panic!("name lookup failed")
        }
        fn run(&self, _session: &dyn Session, _ctx: &TaskContext) -> TaskResult {
            unreachable!()
        }
    }

    fn list(commands: &[&str]) -> TaskList {
        commands
            .iter()
            .fold(TaskList::new("deploy"), |list, c| list.add(CommandTask::new(*c, *c)))
    }

    #[test]
    fn history_stops_at_first_failure() {
        let session = FakeSession::new(true);
        let summary = SessionRunner::default().execute(&session, &list(&["true", "false", "true"]), &TaskContext::default());

        let history = summary.history("db-1").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].success);
        assert_eq!(history[1].exit_code, Some(3));
        assert_eq!(session.executed.load(Ordering::SeqCst), 2);
        assert!(summary.has_errors());
    }

    #[test]
    fn connect_failure_is_recorded_not_raised() {
        let session = FakeSession::new(false);
        let summary = SessionRunner::default().execute(&session, &list(&["true"]), &TaskContext::default());

        let history = summary.history("db-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].task_name, CONNECT_TASK);
        assert_eq!(history[0].exit_code, Some(255));
        assert!(history[0].message.contains("Connection refused"));
        assert_eq!(session.executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn task_panic_becomes_failed_result() {
        let session = FakeSession::new(true);
        let summary = SessionRunner::default().execute(&session, &list(&["true", "boom"]), &TaskContext::default());

        let history = summary.history("db-1").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[1].success);
        assert!(history[1].message.contains("transport exploded"));
    }

    #[test]
    fn runner_panic_is_contained() {
        let session = FakeSession::new(true);
        let tasks = TaskList::new("deploy").add(PanicInName);

        let summary = SessionRunner::default().execute(&session, &tasks, &TaskContext::default());

        let history = summary.history("db-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].task_name, "deploy");
        assert!(history[0].message.contains("name lookup failed"));
    }

    #[test]
    fn publishes_task_events_in_order() {
        let events = EventBus::new();
        let rx = events.channel();
        let session = FakeSession::new(true);

        SessionRunner::new(events).execute(&session, &list(&["true"]), &TaskContext::default());

        let received: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                Event::TaskStarted {
                    host: "db-1".to_string(),
                    task_name: "true".to_string(),
                },
                Event::TaskFinished {
                    host: "db-1".to_string(),
                    task_name: "true".to_string(),
                    success: true,
                },
            ]
        );
    }
}
