//! Randomized pacing for remote interactions
//!
//! Settle delays, load timeouts and human-like interaction plans are drawn
//! from configured ranges with `fastrand`, so consecutive requests never
//! share an exact rhythm.

use std::time::Duration;

use crate::crawling::session::InteractionStep;
use crate::infrastructure::config::TimingConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    settle: (Duration, Duration),
    load_timeout: (Duration, Duration),
    post_load_scrolls: u32,
    extract_retry_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default())
    }
}

impl Pacing {
    #[must_use]
    pub const fn from_config(timing: &TimingConfig) -> Self {
        Self {
            settle: timing.settle_range(),
            load_timeout: timing.load_timeout_range(),
            post_load_scrolls: timing.post_load_scrolls,
            extract_retry_delay: timing.extract_retry_delay(),
        }
    }

    /// Pause right after navigation
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        uniform(self.settle.0, self.settle.1)
    }

    /// Bound for the load signal wait, fresh per task
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        uniform(self.load_timeout.0, self.load_timeout.1)
    }

    #[must_use]
    pub const fn extract_retry_delay(&self) -> Duration {
        self.extract_retry_delay
    }

    /// 1 to 5 small pointer moves, then a scroll 70% of the time
    #[must_use]
    pub fn interaction_plan(&self) -> Vec<InteractionStep> {
        let moves = fastrand::usize(1..=5);
        let mut steps = Vec::with_capacity(moves * 2 + 2);
        for _ in 0..moves {
            steps.push(InteractionStep::PointerMove {
                dx: fastrand::i32(-50..=50),
                dy: fastrand::i32(-50..=50),
            });
            steps.push(InteractionStep::Pause(millis_between(100, 300)));
        }
        if fastrand::f64() > 0.3 {
            steps.push(InteractionStep::Scroll {
                pixels: fastrand::u32(200..=600),
            });
            steps.push(InteractionStep::Pause(millis_between(500, 1_500)));
        }
        steps
    }

    /// Scrolls through the loaded results before extraction
    #[must_use]
    pub fn post_load_plan(&self) -> Vec<InteractionStep> {
        (0..self.post_load_scrolls)
            .flat_map(|_| {
                [
                    InteractionStep::Scroll {
                        pixels: fastrand::u32(200..=500),
                    },
                    InteractionStep::Pause(uniform(self.settle.0, self.settle.1)),
                ]
            })
            .collect()
    }
}

fn millis_between(min: u64, max: u64) -> Duration {
    Duration::from_millis(fastrand::u64(min..=max))
}

fn uniform(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    min + (max - min).mul_f64(fastrand::f64())
}
