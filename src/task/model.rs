//! Core types for scheduled automation tasks.
//!
//! A task is an ordered list of natural-language steps plus a schedule. The
//! steps are folded into a single numbered prompt when the task runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit for interval schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
}

impl IntervalUnit {
    /// Length of one unit in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
        }
    }
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        };
        write!(f, "{s}")
    }
}

/// When a task should fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    /// Fire every `interval_value` units, starting one interval from now.
    #[serde(rename_all = "camelCase")]
    Interval {
        interval_unit: IntervalUnit,
        interval_value: u32,
    },
    /// Declared for storage compatibility. Never yields a fire time.
    #[serde(rename_all = "camelCase")]
    Cron { cron_expression: String },
}

impl Schedule {
    /// Interval schedule helper.
    pub fn every(interval_value: u32, interval_unit: IntervalUnit) -> Self {
        Self::Interval {
            interval_unit,
            interval_value,
        }
    }

    /// Whether the task should re-arm itself after each fire.
    pub fn is_periodic(&self) -> bool {
        matches!(self, Self::Interval { .. })
    }

    /// The delay between fires, or `None` if the schedule cannot fire.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Interval {
                interval_unit,
                interval_value,
            } if *interval_value > 0 => {
                let millis = interval_unit.millis().checked_mul(i64::from(*interval_value))?;
                Some(Duration::from_millis(u64::try_from(millis).ok()?))
            }
            _ => None,
        }
    }

    /// Next fire time relative to `now`, or `None` for cron and zero intervals.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = self.interval()?;
        let delta = chrono::Duration::from_std(interval).ok()?;
        now.checked_add_signed(delta)
    }
}

/// One step of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub name: String,
    pub content: String,
    pub order: i32,
}

impl TaskStep {
    pub fn new(order: i32, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: format!("step-{order}"),
            name: content.chars().take(40).collect(),
            content,
            order,
        }
    }
}

/// A user-defined automation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<TaskStep>,
    pub schedule: Schedule,
}

impl TaskDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<TaskStep>,
        schedule: Schedule,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps,
            schedule,
        }
    }

    /// Boundary validation run before a descriptor enters the scheduler.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id must not be empty".to_string());
        }
        if let Schedule::Interval { interval_value, .. } = self.schedule
            && interval_value == 0
        {
            return Err("interval value must be positive".to_string());
        }
        Ok(())
    }
}

/// Fold steps into a numbered instruction list, ordered by `order`.
pub fn compose_prompt(steps: &[TaskStep]) -> String {
    let mut ordered: Vec<&TaskStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.order);

    ordered
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A dispatch that found no free slot, waiting for capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    pub task_id: String,
    pub task_name: String,
    pub steps: Vec<TaskStep>,
    pub scheduled_time: DateTime<Utc>,
}

impl QueuedTask {
    pub fn from_descriptor(task: &TaskDescriptor) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            steps: task.steps.clone(),
            scheduled_time: Utc::now(),
        }
    }
}

/// One in-flight run of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningTaskRecord {
    pub task_id: String,
    pub execution_id: Uuid,
    pub start_time: DateTime<Utc>,
}
