//! Per-host result histories and their associative merge.
//!
//! A [`SummaryMap`] maps a host identifier to the ordered history of task
//! outcomes recorded for it. Maps are built by the session runner (one
//! host each) and combined upward with [`merge`]; combining never mutates
//! its inputs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name→value bindings threaded between tasks and substituted into scripts.
pub type Vars = BTreeMap<String, String>;

/// Outcome of one task executed against one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub host: String,
    pub task_name: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timestamp: DateTime<Utc>,
    /// Variables this task made available to the tasks that follow it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exports: Vars,
}

impl TaskResult {
    pub fn success(host: impl Into<String>, task_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            task_name: task_name.into(),
            success: true,
            message: message.into(),
            exit_code: Some(0),
            timestamp: Utc::now(),
            exports: Vars::new(),
        }
    }

    pub fn failure(
        host: impl Into<String>,
        task_name: impl Into<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            host: host.into(),
            task_name: task_name.into(),
            success: false,
            message: message.into(),
            exit_code,
            timestamp: Utc::now(),
            exports: Vars::new(),
        }
    }

    pub fn with_export(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.exports.insert(name.into(), value.into());
        self
    }
}

/// Host identifier → ordered task history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SummaryMap {
    hosts: BTreeMap<String, Vec<TaskResult>>,
}

impl SummaryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map holding a single host's history.
    pub fn for_host(host: impl Into<String>, history: Vec<TaskResult>) -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(host.into(), history);
        Self { hosts }
    }

    pub fn history(&self, host: &str) -> Option<&[TaskResult]> {
        self.hosts.get(host).map(Vec::as_slice)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// True iff any recorded task for any host failed.
    pub fn has_errors(&self) -> bool {
        self.hosts
            .values()
            .any(|history| history.iter().any(|result| !result.success))
    }

    /// True iff the host's history contains a failed task.
    pub fn host_failed(&self, host: &str) -> bool {
        self.hosts
            .get(host)
            .map(|history| history.iter().any(|result| !result.success))
            .unwrap_or(false)
    }

    /// Hosts whose history contains a failure, in key order.
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|(_, history)| history.iter().any(|result| !result.success))
            .map(|(host, _)| host.as_str())
            .collect()
    }

    /// Combine with another map. Shared hosts get `self`'s history followed
    /// by `other`'s.
    pub fn merge(&self, other: &SummaryMap) -> SummaryMap {
        let mut hosts = self.hosts.clone();
        for (host, history) in &other.hosts {
            hosts
                .entry(host.clone())
                .or_default()
                .extend(history.iter().cloned());
        }
        SummaryMap { hosts }
    }

    /// Fold any number of maps left to right.
    pub fn merge_all<'a>(maps: impl IntoIterator<Item = &'a SummaryMap>) -> SummaryMap {
        maps.into_iter()
            .fold(SummaryMap::new(), |acc, map| acc.merge(map))
    }

    pub fn summarize(&self) -> SummaryStats {
        let failed = self.failed_hosts().len();
        SummaryStats {
            total_hosts: self.hosts.len(),
            succeeded_hosts: self.hosts.len() - failed,
            failed_hosts: failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_hosts: usize,
    pub succeeded_hosts: usize,
    pub failed_hosts: usize,
}

pub fn merge(a: &SummaryMap, b: &SummaryMap) -> SummaryMap {
    a.merge(b)
}

pub fn has_errors(summary: &SummaryMap) -> bool {
    summary.has_errors()
}

pub fn have_errors(summaries: &[SummaryMap]) -> bool {
    summaries.iter().any(SummaryMap::has_errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(host: &str, task: &str) -> TaskResult {
        TaskResult::success(host, task, "done")
    }

    fn failed(host: &str, task: &str) -> TaskResult {
        TaskResult::failure(host, task, "exit 1", Some(1))
    }

    #[test]
    fn merge_concatenates_shared_host_histories() {
        let a = SummaryMap::for_host("hostA", vec![ok("hostA", "taskX")]);
        let b = SummaryMap::for_host("hostA", vec![failed("hostA", "taskY")]);

        let merged = merge(&a, &b);
        let names: Vec<&str> = merged
            .history("hostA")
            .unwrap()
            .iter()
            .map(|r| r.task_name.as_str())
            .collect();

        assert_eq!(names, vec!["taskX", "taskY"]);
        assert!(has_errors(&merged));
        assert!(!has_errors(&a));
    }

    #[test]
    fn merge_leaves_inputs_untouched() {
        let a = SummaryMap::for_host("a", vec![ok("a", "t")]);
        let b = SummaryMap::for_host("a", vec![ok("a", "u")]);
        let _ = a.merge(&b);
        assert_eq!(a.history("a").unwrap().len(), 1);
        assert_eq!(b.history("a").unwrap().len(), 1);
    }

    #[test]
    fn merge_is_commutative_on_disjoint_hosts() {
        let a = SummaryMap::for_host("a", vec![ok("a", "t")]);
        let b = SummaryMap::for_host("b", vec![failed("b", "t")]);
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn merge_is_associative() {
        let a = SummaryMap::for_host("a", vec![ok("a", "1")]);
        let b = SummaryMap::for_host("a", vec![ok("a", "2")]).merge(&SummaryMap::for_host("b", vec![ok("b", "1")]));
        let c = SummaryMap::for_host("b", vec![failed("b", "2")]);

        assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn stats_count_failed_hosts() {
        let map = SummaryMap::merge_all(&[
            SummaryMap::for_host("a", vec![ok("a", "t")]),
            SummaryMap::for_host("b", vec![ok("b", "t"), failed("b", "u")]),
        ]);
        assert_eq!(map.failed_hosts(), vec!["b"]);
        assert_eq!(
            map.summarize(),
            SummaryStats {
                total_hosts: 2,
                succeeded_hosts: 1,
                failed_hosts: 1
            }
        );
        assert!(have_errors(&[SummaryMap::new(), map]));
    }

    #[test]
    fn serializes_as_host_keyed_object() {
        let map = SummaryMap::for_host("web-1", vec![ok("web-1", "deploy")]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["web-1"][0]["taskName"], "deploy");
        assert_eq!(json["web-1"][0]["success"], true);
        assert!(json["web-1"][0]["timestamp"].is_string());
    }
}
