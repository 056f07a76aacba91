//! Cron scheduling for `on_schedule` handlers
//!
//! Schedules are user-facing standard 5-field cron expressions
//! (minute hour day-of-month month day-of-week). The `cron` parser wants a
//! seconds field, so a literal `0` is prefixed before parsing. Each job is
//! one tokio task that sleeps until the next occurrence; aborting the task
//! cancels the job immediately.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::RuntimeError;

/// Parse a standard 5-field cron expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule, RuntimeError> {
    if expr.split_whitespace().count() != 5 {
        return Err(RuntimeError::InvalidSchedule {
            expr: expr.to_string(),
            message: "expected 5 fields (minute hour day-of-month month day-of-week)".to_string(),
        });
    }
    let with_seconds = format!("0 {expr}");
    Schedule::from_str(&with_seconds).map_err(|err| RuntimeError::InvalidSchedule {
        expr: expr.to_string(),
        message: err.to_string(),
    })
}

/// Handle to a running cron job.
pub struct CronJob {
    handle: JoinHandle<()>,
}

impl CronJob {
    /// Spawn a job invoking `tick` at every occurrence of `schedule`.
    pub fn spawn<F, Fut>(schedule: Schedule, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                trace!(?wait, "cron job sleeping");
                tokio::time::sleep(wait).await;
                tick().await;
            }
        });
        Self { handle }
    }

    /// Cancel the job. Takes effect immediately.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for CronJob {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_five_field_expression() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn test_reject_wrong_field_count() {
        assert!(parse_schedule("* * * *").is_err());
        assert!(parse_schedule("0 * * * * *").is_err());
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn test_reject_garbage() {
        let err = parse_schedule("not a cron at all!").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidSchedule { .. }));
    }

    #[test]
    fn test_upcoming_is_in_the_future() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert!(next > Utc::now());
    }

    #[tokio::test]
    async fn test_cancel_stops_the_job() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let job = CronJob::spawn(schedule, || async {});
        job.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(job.handle.is_finished());
    }
}
