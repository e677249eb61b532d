//! Core data models for the watchdog

use crate::error::{Result, WatchdogError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Remediation applied to the containers selected by a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Stop,
    Restart,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = WatchdogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            other => Err(WatchdogError::UnknownAction(other.to_string())),
        }
    }
}

/// Labels a container must carry all of, each either `key` or `key=value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Union of label sets; a container matched by several sets is selected several times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector(Vec<LabelSet>);

impl LabelSelector {
    pub fn new(sets: Vec<LabelSet>) -> Self {
        Self(sets)
    }

    pub fn sets(&self) -> &[LabelSet] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Watches the number of messages queued in a buffer
#[derive(Debug, Clone, PartialEq)]
pub struct QueueCondition {
    pub action: Action,
    /// Maximum tolerated queue length
    pub length: u64,
    pub cooldown: Duration,
    pub poll_interval: Duration,
    pub selector: LabelSelector,
}

/// Watches how long a buffer has gone without sending or receiving a message
#[derive(Debug, Clone, PartialEq)]
pub struct FlowCondition {
    pub action: Action,
    /// Maximum tolerated time without traffic
    pub idle: Duration,
    pub cooldown: Duration,
    pub poll_interval: Duration,
    pub selector: LabelSelector,
}

/// The kinds of condition a buffer can be watched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Queue,
    Egress,
    Ingress,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Queue => "queue",
            ConditionKind::Egress => "egress",
            ConditionKind::Ingress => "ingress",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of one condition of a [`WatchSpec`]
#[derive(Debug, Clone, Copy)]
pub enum ConditionRef<'a> {
    Queue(&'a QueueCondition),
    Egress(&'a FlowCondition),
    Ingress(&'a FlowCondition),
}

impl<'a> ConditionRef<'a> {
    pub fn kind(&self) -> ConditionKind {
        match self {
            ConditionRef::Queue(_) => ConditionKind::Queue,
            ConditionRef::Egress(_) => ConditionKind::Egress,
            ConditionRef::Ingress(_) => ConditionKind::Ingress,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            ConditionRef::Queue(c) => c.action,
            ConditionRef::Egress(c) | ConditionRef::Ingress(c) => c.action,
        }
    }

    pub fn cooldown(&self) -> Duration {
        match self {
            ConditionRef::Queue(c) => c.cooldown,
            ConditionRef::Egress(c) | ConditionRef::Ingress(c) => c.cooldown,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        match self {
            ConditionRef::Queue(c) => c.poll_interval,
            ConditionRef::Egress(c) | ConditionRef::Ingress(c) => c.poll_interval,
        }
    }

    pub fn selector(&self) -> &'a LabelSelector {
        match self {
            ConditionRef::Queue(c) => &c.selector,
            ConditionRef::Egress(c) | ConditionRef::Ingress(c) => &c.selector,
        }
    }
}

/// Everything watched on a single buffer
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSpec {
    /// `host:port` of the buffer metrics endpoint
    pub buffer: String,
    pub queue: Option<QueueCondition>,
    pub egress: Option<FlowCondition>,
    pub ingress: Option<FlowCondition>,
}

impl WatchSpec {
    /// Kinds of the conditions present on this buffer
    pub fn conditions(&self) -> Vec<ConditionKind> {
        [ConditionKind::Queue, ConditionKind::Egress, ConditionKind::Ingress]
            .into_iter()
            .filter(|kind| self.condition(*kind).is_some())
            .collect()
    }

    pub fn condition(&self, kind: ConditionKind) -> Option<ConditionRef<'_>> {
        match kind {
            ConditionKind::Queue => self.queue.as_ref().map(ConditionRef::Queue),
            ConditionKind::Egress => self.egress.as_ref().map(ConditionRef::Egress),
            ConditionKind::Ingress => self.ingress.as_ref().map(ConditionRef::Ingress),
        }
    }

    fn validate(&self) -> Result<()> {
        let kinds = self.conditions();
        if kinds.is_empty() {
            return Err(WatchdogError::Configuration(format!(
                "Watch config for buffer {} must include at least one of the following: queue, ingress, or egress.",
                self.buffer
            )));
        }

        for condition in kinds.into_iter().filter_map(|kind| self.condition(kind)) {
            validate_condition(&self.buffer, condition)?;
        }

        Ok(())
    }
}

fn validate_condition(buffer: &str, condition: ConditionRef<'_>) -> Result<()> {
    let kind = condition.kind();
    let selector = condition.selector();

    if selector.is_empty() {
        return Err(WatchdogError::Configuration(format!(
            "{} condition of buffer {} must select containers with at least one label set.",
            kind, buffer
        )));
    }
    if selector.sets().iter().any(LabelSet::is_empty) {
        return Err(WatchdogError::Configuration(format!(
            "{} condition of buffer {} contains an empty label set.",
            kind, buffer
        )));
    }
    if condition.poll_interval().is_zero() {
        return Err(WatchdogError::Configuration(format!(
            "{} condition of buffer {} must have a polling interval greater than zero.",
            kind, buffer
        )));
    }
    Ok(())
}

/// Validated, immutable watchdog configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogConfig {
    watch: Vec<Arc<WatchSpec>>,
}

impl WatchdogConfig {
    /// Validate the watch specs and build the configuration
    pub fn new(watch: Vec<WatchSpec>) -> Result<Self> {
        if watch.is_empty() {
            return Err(WatchdogError::Configuration(
                "No watch configs found in the config file. Please specify at least one.".to_string(),
            ));
        }

        for spec in &watch {
            spec.validate()?;
        }

        Ok(Self {
            watch: watch.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn watch(&self) -> &[Arc<WatchSpec>] {
        &self.watch
    }

    /// Total number of watchers the configuration fans out to
    pub fn watcher_count(&self) -> usize {
        self.watch.iter().map(|spec| spec.conditions().len()).sum()
    }
}
