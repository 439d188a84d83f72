//! Minute-granularity task scheduler

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::core::DiagnosticsEngine;
use crate::events::EventLog;

const TICK: Duration = Duration::from_secs(60);

/// Longest gap between checks whose missed slots are still run.
const MAX_CATCH_UP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskName {
    CleanCache,
    ScanVulnerabilities,
    GenerateReport,
    RunDiagnostics,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CleanCache => write!(f, "cleanCache"),
            Self::ScanVulnerabilities => write!(f, "scanVulnerabilities"),
            Self::GenerateReport => write!(f, "generateReport"),
            Self::RunDiagnostics => write!(f, "runDiagnostics"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    /// Runs on `ScheduledTask::day`.
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task: TaskName,
    pub frequency: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<Weekday>,
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScheduledTask {
    pub fn daily(task: TaskName, hour: u32, minute: u32) -> Self {
        Self {
            task,
            frequency: Frequency::Daily,
            day: None,
            hour,
            minute,
            enabled: true,
        }
    }

    pub fn weekly(task: TaskName, day: Weekday, hour: u32, minute: u32) -> Self {
        Self {
            task,
            frequency: Frequency::Weekly,
            day: Some(day),
            hour,
            minute,
            enabled: true,
        }
    }

    /// True when `now` falls in this task's slot. A weekly task with no day
    /// never matches.
    pub fn matches(&self, now: &DateTime<Local>) -> bool {
        if !self.enabled || now.hour() != self.hour || now.minute() != self.minute {
            return false;
        }
        match self.frequency {
            Frequency::Daily => true,
            Frequency::Weekly => self.day == Some(now.weekday()),
        }
    }

    pub fn describe(&self) -> String {
        match (self.frequency, self.day) {
            (Frequency::Weekly, Some(day)) => {
                format!("weekly {day} {:02}:{:02}", self.hour, self.minute)
            }
            (Frequency::Weekly, None) => "weekly (no day set)".to_string(),
            (Frequency::Daily, _) => format!("daily {:02}:{:02}", self.hour, self.minute),
        }
    }
}

pub fn default_tasks() -> Vec<ScheduledTask> {
    vec![
        ScheduledTask::daily(TaskName::CleanCache, 3, 0),
        ScheduledTask::weekly(TaskName::ScanVulnerabilities, Weekday::Sun, 4, 0),
        ScheduledTask::weekly(TaskName::GenerateReport, Weekday::Mon, 9, 0),
    ]
}

/// Monitoring state, owned by whoever drives the scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerState {
    pub active: bool,
    pub last_runs: HashMap<TaskName, DateTime<Local>>,
    pub last_checked: Option<DateTime<Local>>,
}

fn floor_minute(at: DateTime<Local>) -> DateTime<Local> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

impl SchedulerState {
    /// Minutes in `(last_checked, now]`, oldest first, so a slow task that
    /// delays the next tick does not lose the slots it overran.
    fn pending_minutes(&self, now: DateTime<Local>) -> Vec<DateTime<Local>> {
        let Some(last) = self.last_checked else {
            return vec![now];
        };
        let missed = (floor_minute(now) - floor_minute(last))
            .num_minutes()
            .clamp(0, MAX_CATCH_UP_MINUTES);
        (0..missed)
            .rev()
            .map(|k| now - ChronoDuration::minutes(k))
            .collect()
    }

    fn ran_this_minute(&self, task: TaskName, now: &DateTime<Local>) -> bool {
        self.last_runs.get(&task).is_some_and(|last| {
            last.date_naive() == now.date_naive()
                && last.hour() == now.hour()
                && last.minute() == now.minute()
        })
    }
}

/// Executes a scheduled task and returns a one-line summary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: TaskName) -> Result<String>;
}

/// Runs tasks against the diagnostics engine and event log.
pub struct EngineTasks {
    engine: Arc<DiagnosticsEngine>,
    log: Arc<EventLog>,
    report_days: i64,
}

impl EngineTasks {
    pub fn new(engine: Arc<DiagnosticsEngine>, log: Arc<EventLog>) -> Self {
        Self {
            engine,
            log,
            report_days: 7,
        }
    }
}

#[async_trait]
impl TaskRunner for EngineTasks {
    async fn run_task(&self, task: TaskName) -> Result<String> {
        match task {
            TaskName::CleanCache => Ok(self.engine.clean_cache(None).await.message()),
            TaskName::ScanVulnerabilities => {
                let found = self.engine.scan_vulnerabilities().await;
                Ok(format!("{} potential vulnerabilities found", found.len()))
            }
            TaskName::GenerateReport => {
                let report = self.log.generate_report(self.report_days).await?;
                Ok(format!(
                    "report covers {} events",
                    report.summary.total_events
                ))
            }
            TaskName::RunDiagnostics => {
                let issues = self.engine.run().await;
                Ok(format!("{} issues found", issues.len()))
            }
        }
    }
}

pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(tasks: Vec<ScheduledTask>) -> Self {
        Self::with_state(tasks, SchedulerState::default())
    }

    pub fn with_state(tasks: Vec<ScheduledTask>, state: SchedulerState) -> Self {
        Self { tasks, state }
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn due_tasks(&self, now: &DateTime<Local>) -> Vec<TaskName> {
        self.tasks
            .iter()
            .filter(|t| t.matches(now))
            .filter(|t| !self.state.ran_this_minute(t.task, now))
            .map(|t| t.task)
            .collect()
    }

    pub fn mark_run(&mut self, task: TaskName, at: DateTime<Local>) {
        self.state.last_runs.insert(task, at);
    }

    /// Run every task whose slot fell between the previous check and `now`.
    /// A failing task is logged and does not stop the others.
    pub async fn tick(&mut self, runner: &dyn TaskRunner, now: DateTime<Local>) -> Vec<TaskName> {
        let mut due = Vec::new();
        for minute in self.state.pending_minutes(now) {
            for task in self.due_tasks(&minute) {
                if !due.contains(&task) {
                    due.push(task);
                }
            }
        }
        self.state.last_checked = Some(now);

        for task in &due {
            info!(%task, "running scheduled task");
            match runner.run_task(*task).await {
                Ok(summary) => info!(%task, %summary, "scheduled task finished"),
                Err(err) => error!(%task, error = %err, "scheduled task failed"),
            }
            self.mark_run(*task, now);
        }
        due
    }

    /// Check for due tasks every minute until `shutdown` resolves. Returns the
    /// final state so a caller can persist or inspect it.
    pub async fn run<F>(mut self, runner: &dyn TaskRunner, shutdown: F) -> SchedulerState
    where
        F: Future<Output = ()>,
    {
        self.state.active = true;
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(runner, Local::now()).await;
                }
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }

        self.state.active = false;
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("unambiguous local time")
    }

    // 2024-06-02 is a Sunday, 2024-06-03 a Monday
    #[test]
    fn default_tasks_fire_in_their_slots() {
        let scheduler = Scheduler::new(default_tasks());

        assert_eq!(
            scheduler.due_tasks(&local(2024, 6, 2, 3, 0)),
            vec![TaskName::CleanCache]
        );
        assert_eq!(
            scheduler.due_tasks(&local(2024, 6, 2, 4, 0)),
            vec![TaskName::ScanVulnerabilities]
        );
        assert_eq!(
            scheduler.due_tasks(&local(2024, 6, 3, 9, 0)),
            vec![TaskName::GenerateReport]
        );
        assert!(scheduler.due_tasks(&local(2024, 6, 3, 4, 0)).is_empty());
        assert!(scheduler.due_tasks(&local(2024, 6, 2, 3, 1)).is_empty());
    }

    #[test]
    fn disabled_tasks_never_fire() {
        let mut task = ScheduledTask::daily(TaskName::RunDiagnostics, 12, 30);
        task.enabled = false;
        let scheduler = Scheduler::new(vec![task]);
        assert!(scheduler.due_tasks(&local(2024, 6, 4, 12, 30)).is_empty());
    }

    #[tokio::test]
    async fn a_task_runs_once_per_slot() {
        let mut runner = MockTaskRunner::new();
        runner
            .expect_run_task()
            .times(2)
            .returning(|task| Ok(format!("{task} done")));

        let mut scheduler = Scheduler::new(vec![ScheduledTask::daily(TaskName::CleanCache, 3, 0)]);
        let slot = local(2024, 6, 4, 3, 0);

        assert_eq!(scheduler.tick(&runner, slot).await, vec![TaskName::CleanCache]);
        assert!(scheduler.tick(&runner, slot).await.is_empty());

        // Next day, same slot
        let next = local(2024, 6, 5, 3, 0);
        assert_eq!(scheduler.tick(&runner, next).await, vec![TaskName::CleanCache]);
        assert_eq!(scheduler.state.last_runs[&TaskName::CleanCache], next);
    }

    #[tokio::test]
    async fn slot_passed_during_a_slow_tick_still_runs() {
        let mut runner = MockTaskRunner::new();
        runner
            .expect_run_task()
            .withf(|t| *t == TaskName::CleanCache)
            .times(1)
            .returning(|_| Ok("ok".to_string()));

        let mut scheduler = Scheduler::new(vec![ScheduledTask::daily(TaskName::CleanCache, 3, 0)]);

        assert!(scheduler.tick(&runner, local(2024, 6, 4, 2, 59)).await.is_empty());
        // The next check lands two minutes late, past the 03:00 slot
        assert_eq!(
            scheduler.tick(&runner, local(2024, 6, 4, 3, 2)).await,
            vec![TaskName::CleanCache]
        );
        assert!(scheduler.tick(&runner, local(2024, 6, 4, 3, 3)).await.is_empty());
    }

    #[tokio::test]
    async fn failing_task_does_not_block_the_rest() {
        let mut runner = MockTaskRunner::new();
        runner
            .expect_run_task()
            .withf(|t| *t == TaskName::RunDiagnostics)
            .returning(|_| Err(anyhow::anyhow!("metrics unavailable")));
        runner
            .expect_run_task()
            .withf(|t| *t == TaskName::CleanCache)
            .times(1)
            .returning(|_| Ok("ok".to_string()));

        let mut scheduler = Scheduler::new(vec![
            ScheduledTask::daily(TaskName::RunDiagnostics, 8, 0),
            ScheduledTask::daily(TaskName::CleanCache, 8, 0),
        ]);

        let ran = scheduler.tick(&runner, local(2024, 6, 4, 8, 0)).await;
        assert_eq!(ran.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_shutdown_and_reports_inactive() {
        let runner = MockTaskRunner::new();
        let scheduler = Scheduler::new(Vec::new());

        let state = scheduler
            .run(&runner, tokio::time::sleep(Duration::from_secs(180)))
            .await;

        assert!(!state.active);
        assert!(state.last_runs.is_empty());
    }

    #[test]
    fn tasks_deserialize_from_config_spelling() {
        let task: ScheduledTask = toml::from_str(
            r#"
task = "scanVulnerabilities"
frequency = "weekly"
day = "Sunday"
hour = 4
"#,
        )
        .unwrap();

        assert_eq!(task, ScheduledTask::weekly(TaskName::ScanVulnerabilities, Weekday::Sun, 4, 0));
        assert_eq!(task.describe(), "weekly Sun 04:00");
    }
}
