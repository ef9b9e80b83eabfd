use std::sync::Arc;

use crate::error::Result;
use crate::session::{ExecOptions, OutputHandler, OutputStream};
use crate::summary::SummaryMap;
use crate::task::TaskContext;
use crate::task_builder::task_builder_for;

use super::Action;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogsOptions {
    /// Keep following the log (`tail -f`).
    pub tail: bool,
}

impl Action {
    /// Tail the application log on every server of `site` concurrently.
    ///
    /// Each line reaches `on_line` prefixed with `[host] `.
    pub fn logs(&self, site: &str, options: &LogsOptions, on_line: OutputHandler) -> Result<SummaryMap> {
        let result = self.execute_sites(&[site.to_string()], |_, os, entry| {
            let prefix = format!("[{}] ", entry.session.host());
            let sink = Arc::clone(&on_line);
            let handler: OutputHandler = Arc::new(move |stream: OutputStream, line: &str| {
                sink(stream, &format!("{}{}", prefix, line))
            });
            (
                task_builder_for(os).logs(&self.config, options.tail),
                TaskContext::default().with_options(ExecOptions::streaming(handler)),
            )
        });
        self.finish(result)
    }
}

