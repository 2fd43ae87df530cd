//! Wall-clock timing for named operations.
//!
//! ```rust
//! use chat_engine_core::timer::StepTimer;
//!
//! let timer = StepTimer::start("Chain.QA.ExecutionTime");
//! // ... run the step ...
//! let elapsed_ms = timer.stop();
//! assert!(elapsed_ms >= 0.0);
//! ```

use std::time::Instant;

/// A running measurement. Each [`StepTimer::start`] call is independent, so
/// timers for different labels can overlap freely.
#[derive(Debug)]
pub struct StepTimer {
    label: &'static str,
    started: Instant,
}

impl StepTimer {
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Stop the timer and return the elapsed time in milliseconds
    /// (sub-millisecond resolution).
    pub fn stop(self) -> f64 {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(metric = self.label, elapsed_ms, "timer stopped");
        elapsed_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_elapsed_is_measured() {
        let timer = StepTimer::start("test");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.stop() >= 5.0);
    }

    #[test]
    fn test_timers_are_independent() {
        let outer = StepTimer::start("outer");
        std::thread::sleep(Duration::from_millis(5));
        let inner = StepTimer::start("inner");
        let inner_ms = inner.stop();
        let outer_ms = outer.stop();
        assert!(outer_ms >= inner_ms);
        assert!(outer_ms >= 5.0);
    }
}
