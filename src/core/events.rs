//! Lifecycle notifications for external observers (progress UIs, hooks).
//!
//! Delivery is best-effort: a panicking handler is ignored, a channel whose
//! receiver was dropped is unsubscribed, and publishing never returns an
//! error to the orchestrator.
//! Each published event reaches each matching subscriber at most once.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::action::ActionStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    BuildStarted,
    BuildFinished,
    ArchiveStarted,
    ArchiveFinished,
    Finished,
    Fail,
    BeforeBuilding,
    BeforeDeploying,
    AfterDeployed,
    StageChanged,
    ActionFailed,
    TaskStarted,
    TaskFinished,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::BuildStarted => "build.started",
            EventName::BuildFinished => "build.finished",
            EventName::ArchiveStarted => "archive.started",
            EventName::ArchiveFinished => "archive.finished",
            EventName::Finished => "finished",
            EventName::Fail => "fail",
            EventName::BeforeBuilding => "deploy.before_building",
            EventName::BeforeDeploying => "deploy.before_deploying",
            EventName::AfterDeployed => "deploy.after_deployed",
            EventName::StageChanged => "action.stage_changed",
            EventName::ActionFailed => "action.failed",
            EventName::TaskStarted => "task.started",
            EventName::TaskFinished => "task.finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPaths {
    pub bundle_path: PathBuf,
    pub build_location: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    BuildStarted(BuildPaths),
    BuildFinished(BuildPaths),
    ArchiveStarted(BuildPaths),
    ArchiveFinished(BuildPaths),
    Finished(BuildPaths),
    #[serde(rename_all = "camelCase")]
    Fail { message: String },
    #[serde(rename_all = "camelCase")]
    BeforeBuilding { deployment_tag: String },
    #[serde(rename_all = "camelCase")]
    BeforeDeploying { deployment_tag: String },
    #[serde(rename_all = "camelCase")]
    AfterDeployed { deployment_tag: String, has_errors: bool },
    StageChanged { from: ActionStage, to: ActionStage },
    ActionFailed { code: String, message: String },
    #[serde(rename_all = "camelCase")]
    TaskStarted { host: String, task_name: String },
    #[serde(rename_all = "camelCase")]
    TaskFinished { host: String, task_name: String, success: bool },
}

impl Event {
    pub fn name(&self) -> EventName {
        match self {
            Event::BuildStarted(_) => EventName::BuildStarted,
            Event::BuildFinished(_) => EventName::BuildFinished,
            Event::ArchiveStarted(_) => EventName::ArchiveStarted,
            Event::ArchiveFinished(_) => EventName::ArchiveFinished,
            Event::Finished(_) => EventName::Finished,
            Event::Fail { .. } => EventName::Fail,
            Event::BeforeBuilding { .. } => EventName::BeforeBuilding,
            Event::BeforeDeploying { .. } => EventName::BeforeDeploying,
            Event::AfterDeployed { .. } => EventName::AfterDeployed,
            Event::StageChanged { .. } => EventName::StageChanged,
            Event::ActionFailed { .. } => EventName::ActionFailed,
            Event::TaskStarted { .. } => EventName::TaskStarted,
            Event::TaskFinished { .. } => EventName::TaskFinished,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
enum Delivery {
    Callback(EventHandler),
    Channel(Sender<Event>),
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    filter: Option<EventName>,
    delivery: Delivery,
}

/// Publish/subscribe hub shared (cheaply cloned) by the orchestrator, the
/// builder and the session runner.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every event named `name`.
    ///
    /// Handlers run on the publishing thread and should return quickly;
    /// use [`EventBus::channel`] to consume events elsewhere.
    pub fn subscribe(&self, name: EventName, handler: EventHandler) {
        self.add(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            filter: Some(name),
            delivery: Delivery::Callback(handler),
        });
    }

    pub fn subscribe_all(&self, handler: EventHandler) {
        self.add(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            filter: None,
            delivery: Delivery::Callback(handler),
        });
    }

    /// Receive every event on a channel.
    pub fn channel(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.add(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            filter: None,
            delivery: Delivery::Channel(tx),
        });
        rx
    }

    pub fn publish(&self, event: Event) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let name = event.name();
        let mut closed = Vec::new();
        for subscriber in subscribers {
            if subscriber.filter.is_some_and(|filter| filter != name) {
                continue;
            }
            match subscriber.delivery {
                Delivery::Callback(handler) => {
                    let _ = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                }
                Delivery::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(subscriber.id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|s| !closed.contains(&s.id));
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn add(&self, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(subscriber);
    }
}
