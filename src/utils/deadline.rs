/// Single wall-clock deadline shared by spawn, execution and drain
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    started: Instant,
    deadline: Instant,
}

impl TimeoutGuard {
    pub fn starting_at(started: Instant, budget: Duration) -> Self {
        Self {
            started,
            deadline: started + budget,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
