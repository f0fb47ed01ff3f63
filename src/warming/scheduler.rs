//! Warming scheduler (C9)
//!
//! Registers cron-triggered warming jobs and reports which are due. The
//! cron-job host that actually calls [`WarmingScheduler::due_jobs`] on a
//! tick is an external concern; this module only owns the registry and
//! the next-run bookkeeping. Grounded on `scheduling::scheduler::Job`'s
//! `calculate_next_run`/`update_next_run` shape, narrowed to cron-only
//! schedules (no one-time or fixed-interval jobs, which this engine has
//! no use for).

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::warming::strategy::StrategyKind;

/// A warming job triggered on a cron schedule.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    schedule: Schedule,
    /// Strategy the triggered warm flow should use.
    pub strategy: StrategyKind,
    /// How many predicted/candidate keys to warm per firing.
    pub limit: usize,
    /// Priority assigned to tasks generated by this job.
    pub priority: u32,
    next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    fn new(
        id: &str,
        name: &str,
        cron_expr: &str,
        strategy: StrategyKind,
        limit: usize,
        priority: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| e.to_string())?;
        let next_run = schedule.after(&now).next();
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            schedule,
            strategy,
            limit,
            priority,
            next_run,
            last_run: None,
        })
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.map(|t| t <= now).unwrap_or(false)
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.next_run = self.schedule.after(&now).next();
    }
}

/// Registry of cron-triggered warming jobs.
pub struct WarmingScheduler {
    jobs: Vec<ScheduledJob>,
}

impl WarmingScheduler {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// A scheduler preloaded with the built-in jobs: a daily 02:00 local
    /// predictor-driven warmup and an hourly top-50 priority refresh.
    pub fn with_builtin_jobs(now: DateTime<Utc>) -> Self {
        let mut scheduler = Self::new();
        scheduler
            .register("daily-warmup", "daily warmup", "0 0 2 * * *", StrategyKind::PriorityBased, 100, 50, now)
            .expect("builtin cron expression is valid");
        scheduler
            .register("hourly-refresh", "hourly refresh", "0 0 * * * *", StrategyKind::PriorityBased, 50, 70, now)
            .expect("builtin cron expression is valid");
        scheduler
    }

    /// Register a new job. Fails if `cron_expr` doesn't parse.
    pub fn register(
        &mut self,
        id: &str,
        name: &str,
        cron_expr: &str,
        strategy: StrategyKind,
        limit: usize,
        priority: u32,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let job = ScheduledJob::new(id, name, cron_expr, strategy, limit, priority, now)?;
        self.jobs.push(job);
        Ok(())
    }

    /// Jobs whose next scheduled fire time has passed as of `now`.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<&ScheduledJob> {
        self.jobs.iter().filter(|j| j.is_due(now)).collect()
    }

    /// Record that `id` fired at `now`, advancing its next run.
    pub fn mark_fired(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
            job.advance(now);
        }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }
}

impl Default for WarmingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn builtin_jobs_register_without_error() {
        let now = at(2026, 7, 26, 10, 0, 0);
        let scheduler = WarmingScheduler::with_builtin_jobs(now);
        assert_eq!(scheduler.jobs().len(), 2);
    }

    #[test]
    fn hourly_job_is_due_after_an_hour_passes() {
        let now = at(2026, 7, 26, 10, 30, 0);
        let scheduler = WarmingScheduler::with_builtin_jobs(now);
        let later = at(2026, 7, 26, 11, 0, 1);
        let due: Vec<_> = scheduler.due_jobs(later).into_iter().map(|j| j.id.clone()).collect();
        assert!(due.contains(&"hourly-refresh".to_string()));
    }

    #[test]
    fn not_due_before_next_run() {
        let now = at(2026, 7, 26, 10, 30, 0);
        let scheduler = WarmingScheduler::with_builtin_jobs(now);
        assert!(scheduler.due_jobs(at(2026, 7, 26, 10, 45, 0)).is_empty());
    }

    #[test]
    fn mark_fired_advances_next_run_past_now() {
        let now = at(2026, 7, 26, 10, 30, 0);
        let mut scheduler = WarmingScheduler::new();
        scheduler
            .register("test", "test", "0 * * * * *", StrategyKind::BreadthFirst, 10, 0, now)
            .unwrap();

        let fire_time = at(2026, 7, 26, 10, 31, 0);
        assert!(!scheduler.due_jobs(fire_time).is_empty());
        scheduler.mark_fired("test", fire_time);
        assert!(scheduler.due_jobs(fire_time).is_empty());
        assert!(scheduler.jobs()[0].next_run().unwrap() > fire_time);
    }

    #[test]
    fn invalid_cron_expression_is_rejected() {
        let now = at(2026, 7, 26, 10, 0, 0);
        let mut scheduler = WarmingScheduler::new();
        let result = scheduler.register("bad", "bad", "not a cron expr", StrategyKind::BreadthFirst, 1, 0, now);
        assert!(result.is_err());
    }
}
