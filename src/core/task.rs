//! Units of remote work and the combinators that sequence them.
//!
//! Within one session tasks run strictly in order and stop at the first
//! failure ([`sync`], [`TaskList`]). Across sessions, independent units run
//! concurrently and are all awaited ([`parallel`]).

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::session::{CommandOutput, ExecOptions, ScriptRef, Session};
use crate::summary::{TaskResult, Vars};
use crate::utils::fanout::{self, panic_message};
use crate::utils::template;

/// A named unit of remote work.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Human-readable label for progress output.
    fn describe(&self) -> String {
        self.name().to_string()
    }

    fn run(&self, session: &dyn Session, ctx: &TaskContext) -> TaskResult;
}

/// Execution context threaded through a task sequence.
#[derive(Clone, Default)]
pub struct TaskContext {
    /// Bindings visible to the next task: initial inputs plus every export so far.
    pub vars: Vars,
    /// Result of the task that ran immediately before, if any.
    pub previous: Option<TaskResult>,
    pub options: ExecOptions,
}

impl TaskContext {
    pub fn new(vars: Vars) -> Self {
        Self {
            vars,
            previous: None,
            options: ExecOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    /// Context for the task that follows `result`.
    pub fn after(&self, result: &TaskResult) -> TaskContext {
        let mut vars = self.vars.clone();
        vars.extend(result.exports.iter().map(|(k, v)| (k.clone(), v.clone())));
        TaskContext {
            vars,
            previous: Some(result.clone()),
            options: self.options.clone(),
        }
    }
}

/// Run tasks in order against one session, stopping after the first failure.
///
/// Returns every result produced, so the last entry is the failure when
/// one occurred. A panicking task is recorded as a failed result.
pub fn run_sequence(
    tasks: &[Box<dyn Task>],
    session: &dyn Session,
    ctx: &TaskContext,
    mut observe: impl FnMut(&dyn Task, Option<&TaskResult>),
) -> Vec<TaskResult> {
    let mut results = Vec::with_capacity(tasks.len());
    let mut ctx = ctx.clone();

    for task in tasks {
        observe(task.as_ref(), None);
        let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(session, &ctx)))
            .unwrap_or_else(|payload| {
                TaskResult::failure(
                    session.host(),
                    task.name(),
                    format!("Task panicked: {}", panic_message(payload.as_ref())),
                    None,
                )
            });
        observe(task.as_ref(), Some(&result));

        let failed = !result.success;
        ctx = ctx.after(&result);
        results.push(result);
        if failed {
            break;
        }
    }

    results
}

/// Fan out over independent units with at most `limit` in flight and wait
/// for all of them. One unit's failure never prevents the others from
/// running or reporting.
pub fn parallel<T, R, F>(units: Vec<T>, limit: usize, run: F) -> Vec<Result<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    fanout::run_bounded(units, limit, run)
}

/// Ordered task sequence produced by a task builder for one operation.
pub struct TaskList {
    pub name: String,
    tasks: Vec<Box<dyn Task>>,
}

impl TaskList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn add(mut self, task: impl Task + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ============================================================================
// Task variants
// ============================================================================

fn result_from_output(
    session: &dyn Session,
    task: &dyn Task,
    output: CommandOutput,
    capture: Option<&str>,
) -> TaskResult {
    if output.success {
        let mut result = TaskResult::success(session.host(), task.name(), task.describe());
        if let Some(var) = capture {
            result = result.with_export(var, output.stdout.trim());
        }
        result
    } else {
        TaskResult::failure(
            session.host(),
            task.name(),
            format!(
                "{} failed (exit {}): {}",
                task.describe(),
                output.exit_code,
                output.error_text()
            ),
            Some(output.exit_code),
        )
    }
}

/// A single shell command. `{{var}}` placeholders are filled from the context.
pub struct CommandTask {
    name: String,
    command: String,
    capture: Option<String>,
}

impl CommandTask {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            capture: None,
        }
    }

    /// Export trimmed stdout as `var` for the tasks that follow.
    pub fn capture_as(mut self, var: impl Into<String>) -> Self {
        self.capture = Some(var.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, session: &dyn Session, ctx: &TaskContext) -> TaskResult {
        let command = template::render_map(&self.command, &ctx.vars);
        let output = session.execute(&command, &ctx.options);
        result_from_output(session, self, output, self.capture.as_deref())
    }
}

/// A script executed with variable bindings.
///
/// The task's own bindings are the defaults; variables threaded through
/// the context take precedence.
pub struct ScriptTask {
    name: String,
    script: ScriptRef,
    vars: Vars,
    capture: Option<String>,
}

impl ScriptTask {
    pub fn new(name: impl Into<String>, script: ScriptRef, vars: Vars) -> Self {
        Self {
            name: name.into(),
            script,
            vars,
            capture: None,
        }
    }

    pub fn capture_as(mut self, var: impl Into<String>) -> Self {
        self.capture = Some(var.into());
        self
    }

    pub fn script(&self) -> &ScriptRef {
        &self.script
    }
}

impl Task for ScriptTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.script.name)
    }

    fn run(&self, session: &dyn Session, ctx: &TaskContext) -> TaskResult {
        let mut vars = self.vars.clone();
        vars.extend(ctx.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        let output = session.execute_script(&self.script, &vars, &ctx.options);
        result_from_output(session, self, output, self.capture.as_deref())
    }
}

/// Copy a local file to the host.
pub struct UploadTask {
    name: String,
    local_path: PathBuf,
    remote_path: String,
}

impl UploadTask {
    pub fn new(name: impl Into<String>, local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }
}

impl Task for UploadTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, session: &dyn Session, _ctx: &TaskContext) -> TaskResult {
        let output = session.upload(&self.local_path, &self.remote_path);
        result_from_output(session, self, output, None)
    }
}

/// Settle time between two remote steps.
pub struct DelayTask {
    name: String,
    duration: Duration,
}

impl DelayTask {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

impl Task for DelayTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("{} ({}s)", self.name, self.duration.as_secs())
    }

    fn run(&self, session: &dyn Session, _ctx: &TaskContext) -> TaskResult {
        if !self.duration.is_zero() {
            thread::sleep(self.duration);
        }
        TaskResult::success(session.host(), &self.name, self.describe())
    }
}

/// Composite that runs its children in order and short-circuits on failure.
pub struct SyncTask {
    name: String,
    tasks: Vec<Box<dyn Task>>,
}

impl Task for SyncTask {
    fn name(&self) -> &str {
        &self.name
    }

    /// The first failing child's result verbatim, or a success carrying
    /// every child's exports.
    fn run(&self, session: &dyn Session, ctx: &TaskContext) -> TaskResult {
        let results = run_sequence(&self.tasks, session, ctx, |_, _| {});
        if let Some(failed) = results.iter().find(|r| !r.success) {
            return failed.clone();
        }

        let mut combined = TaskResult::success(
            session.host(),
            &self.name,
            format!("{} steps completed", results.len()),
        );
        for result in &results {
            combined
                .exports
                .extend(result.exports.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        combined
    }
}

/// Sequence `tasks` against the same session with short-circuit semantics.
pub fn sync(name: impl Into<String>, tasks: Vec<Box<dyn Task>>) -> SyncTask {
    SyncTask {
        name: name.into(),
        tasks,
    }
}
