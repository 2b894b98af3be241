//! Stack convergence watcher.
//!
//! The watcher owns a working set of stack names and polls each one for new events,
//! its current status and its nested stacks until nothing is in progress. The set
//! only shrinks when the event listing reports that a stack no longer exists;
//! discovered nested stacks are added as they appear.

use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use pipewatch_api::DeploymentService;
use pipewatch_types::{StackEvent, StackState, StackStatus};
use pipewatch_util::{Clock, Sleeper, time_format::clock_time};
use tracing::{debug, info, warn};

use crate::{
    EngineError,
    poll::{PollSchedule, PollStep, drive},
};

/// Default pause between watch iterations.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Display tone of a stack event line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTone {
    Success,
    Neutral,
    Failure,
}

impl EventTone {
    /// Classify a rendered event line. Checks run in order; the first match wins.
    pub fn classify(line: &str) -> Self {
        if line.contains("_COMPLETE") {
            EventTone::Success
        } else if line.contains("_IN_PROGRESS") {
            EventTone::Neutral
        } else if line.contains("_FAILED") || line.contains("failed to create") {
            EventTone::Failure
        } else {
            EventTone::Neutral
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventTone::Success => "success",
            EventTone::Neutral => "neutral",
            EventTone::Failure => "failure",
        }
    }
}

/// Render an event as tab-separated fields, dropping repeated values.
pub fn event_line(stack_name: &str, event: &StackEvent) -> String {
    let fields = [
        clock_time(&event.timestamp),
        stack_name.to_string(),
        event.logical_resource_id.clone(),
        event.resource_status.clone(),
        event.reason.clone().unwrap_or_default(),
    ];
    let unique: IndexSet<String> = fields.into_iter().collect();
    unique.into_iter().collect::<Vec<_>>().join("\t")
}

/// Everything the watcher learned, including stacks that dropped out of the working set.
#[derive(Debug, Clone, Default)]
pub struct WatchReport {
    pub states: IndexMap<String, StackState>,
    pub working_set: IndexSet<String>,
    pub iterations: u32,
}

impl WatchReport {
    pub fn new<I, S>(stacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut report = WatchReport::default();
        for name in stacks {
            let name = name.into();
            report.states.entry(name.clone()).or_insert_with(|| StackState::new(name.clone()));
            report.working_set.insert(name);
        }
        report
    }

    /// Stacks whose last observed status is a failure.
    pub fn failed_stacks(&self) -> Vec<&str> {
        self.states
            .values()
            .filter(|state| state.status == StackStatus::Failed)
            .map(|state| state.name.as_str())
            .collect()
    }

    pub fn status_of(&self, stack_name: &str) -> Option<StackStatus> {
        self.states.get(stack_name).map(|state| state.status)
    }
}

/// What a single stack contributed to an iteration.
#[derive(Debug, Default)]
struct StackPoll {
    absent: bool,
    in_progress: bool,
    discovered: Vec<String>,
}

pub struct StackWatcher<'a> {
    service: &'a dyn DeploymentService,
    clock: &'a dyn Clock,
    sleeper: &'a dyn Sleeper,
    schedule: PollSchedule,
}

impl<'a> StackWatcher<'a> {
    pub fn new(service: &'a dyn DeploymentService, clock: &'a dyn Clock, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            service,
            clock,
            sleeper,
            schedule: PollSchedule::fixed(DEFAULT_WATCH_INTERVAL),
        }
    }

    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Block until every stack in the working set is gone or no longer in progress.
    pub fn watch<I, S>(&self, stacks: I) -> Result<WatchReport, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut report = WatchReport::new(stacks);
        info!(stacks = report.working_set.len(), "watching stacks");
        drive("watch stacks", &self.schedule, self.clock, self.sleeper, |_| {
            let in_progress = self.poll_once(&mut report);
            if report.working_set.is_empty() || !in_progress {
                Ok(PollStep::Ready(()))
            } else {
                Ok(PollStep::Pending)
            }
        })?;
        info!(iterations = report.iterations, remaining = report.working_set.len(), "stacks settled");
        Ok(report)
    }

    /// Run one iteration over the current working set. Returns true while any stack
    /// is still in progress.
    pub fn poll_once(&self, report: &mut WatchReport) -> bool {
        report.iterations += 1;
        let names: Vec<String> = report.working_set.iter().cloned().collect();
        let mut in_progress = false;

        for name in names {
            let state = report.states.entry(name.clone()).or_insert_with(|| StackState::new(name.clone()));
            let polled = self.poll_stack(state);

            if polled.absent {
                report.working_set.shift_remove(&name);
                continue;
            }
            in_progress |= polled.in_progress;

            for child in polled.discovered {
                if report.working_set.insert(child.clone()) {
                    info!(parent = %name, stack = %child, "nested stack discovered");
                }
                report.states.entry(child.clone()).or_insert_with(|| StackState::new(child));
            }
        }

        in_progress
    }

    fn poll_stack(&self, state: &mut StackState) -> StackPoll {
        let mut polled = StackPoll::default();
        let name = state.name.clone();

        match self.service.describe_events(&name, state.watermark) {
            Err(error) if error.is_absent() => {
                info!(stack = %name, "stack no longer exists");
                state.status = StackStatus::Absent;
                polled.absent = true;
                return polled;
            }
            Err(error) => warn!(stack = %name, error = %error, "could not list stack events"),
            Ok(mut events) => {
                events.sort_by_key(|event| event.timestamp);
                let fresh: Vec<StackEvent> = events.into_iter().filter(|event| state.is_unseen(event)).collect();
                for event in &fresh {
                    log_event(&name, event);
                    state.advance_watermark(event.timestamp);
                }
            }
        }

        match self.service.describe_status(&name) {
            Ok(status) => {
                state.status = status;
                polled.in_progress = status.is_in_progress();
            }
            Err(error) if error.is_absent() => debug!(stack = %name, "stack vanished before its status was read"),
            Err(error) => warn!(stack = %name, error = %error, "could not describe stack"),
        }

        match self.service.list_resources(&name) {
            Ok(resources) => {
                for child in resources.iter().filter_map(|resource| resource.nested_stack_name()) {
                    if state.children.insert(child.clone()) {
                        polled.discovered.push(child);
                    }
                }
            }
            Err(error) if error.is_absent() => debug!(stack = %name, "stack vanished before its resources were listed"),
            Err(error) => warn!(stack = %name, error = %error, "could not list stack resources"),
        }

        polled
    }
}

fn log_event(stack_name: &str, event: &StackEvent) {
    let line = event_line(stack_name, event);
    let tone = EventTone::classify(&line);
    match tone {
        EventTone::Failure => warn!(tone = tone.as_str(), stack = %stack_name, "{line}"),
        _ => info!(tone = tone.as_str(), stack = %stack_name, "{line}"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use pipewatch_api::InMemoryCloud;
    use pipewatch_types::StackDescriptor;
    use pipewatch_util::ManualClock;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    fn event(stack: &str, at: DateTime<Utc>, status: &str) -> StackEvent {
        StackEvent {
            timestamp: at,
            stack_name: stack.into(),
            logical_resource_id: stack.into(),
            resource_status: status.into(),
            reason: None,
        }
    }

    #[test]
    fn classification_follows_line_content() {
        assert_eq!(EventTone::classify("CREATE_COMPLETE"), EventTone::Success);
        assert_eq!(EventTone::classify("UPDATE_IN_PROGRESS"), EventTone::Neutral);
        assert_eq!(EventTone::classify("CREATE_FAILED"), EventTone::Failure);
        assert_eq!(EventTone::classify("Resource failed to create"), EventTone::Failure);
        assert_eq!(EventTone::classify("REVIEW"), EventTone::Neutral);
    }

    #[test]
    fn event_line_collapses_duplicate_fields() {
        let line = event_line("Stack", &event("Stack", start(), "CREATE_IN_PROGRESS"));
        assert_eq!(line, "09:30:00\tStack\tCREATE_IN_PROGRESS\t");
    }

    #[test]
    fn watch_waits_for_creation_to_finish() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone()).with_provision_delay(ChronoDuration::seconds(10));
        cloud
            .create_stack(&StackDescriptor::new("Stack", "https://bucket/stack.yaml"))
            .expect("create");

        let report = StackWatcher::new(&cloud, &clock, &clock).watch(["Stack"]).expect("watch");

        assert_eq!(report.status_of("Stack"), Some(StackStatus::Complete));
        assert_eq!(report.states["Stack"].watermark, Some(start() + ChronoDuration::seconds(10)));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5), Duration::from_secs(5)]);
        assert_eq!(report.iterations, 3);
    }

    #[test]
    fn nested_stacks_are_discovered_and_watched() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone()).with_provision_delay(ChronoDuration::seconds(10));
        cloud
            .create_stack(&StackDescriptor::new("Parent", "https://bucket/parent.yaml"))
            .expect("create");
        cloud.script_nested_stack(
            "Parent",
            start() + ChronoDuration::seconds(3),
            "ChildStack",
            "arn:aws:cloudformation:us-east-1:123456789012:stack/Parent-Child/abc-123",
        );
        cloud.script_stack_status("Parent-Child", start(), "CREATE_IN_PROGRESS");
        cloud.script_stack_status("Parent-Child", start() + ChronoDuration::seconds(20), "CREATE_COMPLETE");
        cloud.script_stack_event(event("Parent-Child", start() + ChronoDuration::seconds(20), "CREATE_COMPLETE"));

        let report = StackWatcher::new(&cloud, &clock, &clock).watch(["Parent"]).expect("watch");

        assert!(report.states["Parent"].children.contains("Parent-Child"));
        assert_eq!(report.status_of("Parent-Child"), Some(StackStatus::Complete));
        assert_eq!(clock.now(), start() + ChronoDuration::seconds(20));
    }

    #[test]
    fn failed_status_queries_are_warned_and_do_not_stop_the_pass() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.insert_stack(StackDescriptor::new("Throttled", "https://bucket/a.yaml"), "CREATE_COMPLETE");
        cloud.insert_stack(StackDescriptor::new("Healthy", "https://bucket/b.yaml"), "CREATE_IN_PROGRESS");
        cloud.fail_stack_queries("Throttled");
        let watcher = StackWatcher::new(&cloud, &clock, &clock);
        let mut report = WatchReport::new(["Throttled", "Healthy"]);

        let (in_progress, logged) = crate::test_support::capture_warnings(|| watcher.poll_once(&mut report));

        assert!(in_progress);
        assert_eq!(report.status_of("Healthy"), Some(StackStatus::Creating));
        assert!(report.working_set.contains("Throttled"));
        assert!(logged.contains("could not describe stack"), "{logged}");
        assert!(logged.contains("could not list stack resources"), "{logged}");
    }

    #[test]
    fn absent_stacks_leave_the_working_set() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.insert_stack(StackDescriptor::new("Old", "https://bucket/old.yaml"), "DELETE_IN_PROGRESS");
        cloud.remove_stack_at("Old", start() + ChronoDuration::seconds(5));

        let report = StackWatcher::new(&cloud, &clock, &clock).watch(["Old"]).expect("watch");

        assert!(report.working_set.is_empty());
        assert_eq!(report.status_of("Old"), Some(StackStatus::Absent));
    }

    #[test]
    fn event_failures_are_isolated_per_stack() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone()).with_provision_delay(ChronoDuration::seconds(10));
        cloud.insert_stack(StackDescriptor::new("Broken", "https://bucket/broken.yaml"), "CREATE_COMPLETE");
        cloud.fail_stack_events("Broken");
        cloud
            .create_stack(&StackDescriptor::new("Healthy", "https://bucket/healthy.yaml"))
            .expect("create");

        let report = StackWatcher::new(&cloud, &clock, &clock)
            .watch(["Broken", "Healthy"])
            .expect("watch");

        assert_eq!(report.working_set.len(), 2);
        assert_eq!(report.status_of("Broken"), Some(StackStatus::Complete));
        assert_eq!(report.status_of("Healthy"), Some(StackStatus::Complete));
    }

    #[test]
    fn events_are_processed_once_and_oldest_first() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.insert_stack(StackDescriptor::new("Stack", "https://bucket/stack.yaml"), "UPDATE_IN_PROGRESS");
        cloud.script_stack_event(event("Stack", start() - ChronoDuration::seconds(2), "UPDATE_IN_PROGRESS"));
        cloud.script_stack_event(event("Stack", start() - ChronoDuration::seconds(1), "UPDATE_COMPLETE"));

        let watcher = StackWatcher::new(&cloud, &clock, &clock);
        let mut report = WatchReport::new(["Stack"]);
        assert!(watcher.poll_once(&mut report));
        let first = report.states["Stack"].watermark;
        assert_eq!(first, Some(start() - ChronoDuration::seconds(1)));

        assert!(watcher.poll_once(&mut report));
        assert_eq!(report.states["Stack"].watermark, first);
    }

    #[test]
    fn stuck_stacks_time_out() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.insert_stack(StackDescriptor::new("Stuck", "https://bucket/stuck.yaml"), "UPDATE_IN_PROGRESS");

        let schedule = PollSchedule::fixed(DEFAULT_WATCH_INTERVAL).with_deadline(Some(Duration::from_secs(30)));
        let result = StackWatcher::new(&cloud, &clock, &clock).with_schedule(schedule).watch(["Stuck"]);

        assert!(matches!(result, Err(EngineError::TimeoutExceeded { operation: "watch stacks", .. })));
    }
}
