// Public modules
pub mod action;
pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod os;
pub mod runner;
pub mod session;
pub mod ssh;
pub mod summary;
pub mod task;
pub mod task_builder;

// Re-export common types for convenience
pub use action::{Action, ActionStage, DeployOptions, DeployReport, Deployment, LogsOptions};
pub use error::{Error, ErrorCode, Result};
pub use os::OsTag;
pub use session::{Session, SessionGroup, SessionsMap};
pub use summary::{has_errors, have_errors, merge, SummaryMap, TaskResult};
pub use task::{parallel, sync, Task, TaskContext, TaskList};
