//! Buffer watching and remediation
//!
//! Each configured condition of each buffer gets its own [`Watcher`]. Watchers poll the
//! buffer's metrics, evaluate the condition and, when it is violated, restart or stop the
//! containers selected by the condition's labels. A [`Supervisor`] runs them as a group.

mod dispatcher;
mod evaluator;
mod supervisor;
mod watcher;


pub use dispatcher::{ActionDispatcher, DispatchSummary};
pub use evaluator::{egress_idle, evaluate, ingress_idle, queue_backlogged, unix_now};
pub use supervisor::{FailurePolicy, Supervisor, SupervisorBuilder, WatcherFailure};
pub use watcher::{WatchContext, Watcher, WatcherId, WatcherState};
