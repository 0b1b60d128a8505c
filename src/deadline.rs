use crate::error::PipelineError;
use std::time::Duration;
use time::OffsetDateTime;

/// Global wall-clock budget for one job, anchored at its `started_at`.
#[derive(Debug, Clone, Copy)]
pub struct JobDeadline {
    started_at: OffsetDateTime,
    budget: Duration,
}

impl JobDeadline {
    pub fn new(started_at: OffsetDateTime, budget: Duration) -> Self {
        Self { started_at, budget }
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        let elapsed = OffsetDateTime::now_utc() - self.started_at;
        elapsed.try_into().unwrap_or(Duration::ZERO)
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn is_exceeded(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Fails with `JobTimeout` once the budget is spent.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_exceeded() {
            return Err(PipelineError::JobTimeout {
                budget: self.budget,
            });
        }
        Ok(())
    }
}
