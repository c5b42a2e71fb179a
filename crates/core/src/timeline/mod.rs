use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Number of recent frame times averaged by [`FrameClock::fps`].
const FPS_WINDOW: usize = 60;

/// Paces the render tick at a target frame rate.
#[derive(Debug, Clone)]
pub struct FrameClock {
    period: Duration,
    last_tick: Option<Instant>,
    frame_times: VecDeque<Duration>,
}

impl FrameClock {
    pub fn new(fps_target: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / fps_target.max(1),
            last_tick: None,
            frame_times: VecDeque::with_capacity(FPS_WINDOW),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleeps out the rest of the current frame and returns how long the
    /// frame took in total. The first call only starts the clock.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return Duration::ZERO;
        };

        let busy = now.duration_since(last);
        if busy < self.period {
            thread::sleep(self.period - busy);
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last);
        self.last_tick = Some(now);

        if self.frame_times.len() == FPS_WINDOW {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(elapsed);
        elapsed
    }

    /// Average frame rate over the recent window, 0 before two ticks.
    pub fn fps(&self) -> f32 {
        let total: Duration = self.frame_times.iter().sum();
        if total.is_zero() {
            return 0.0;
        }
        self.frame_times.len() as f32 / total.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_starts_the_clock() {
        let mut clock = FrameClock::new(60);
        assert_eq!(clock.tick(), Duration::ZERO);
        assert_eq!(clock.fps(), 0.0);
    }

    #[test]
    fn ticks_take_at_least_one_period() {
        let mut clock = FrameClock::new(100);
        assert_eq!(clock.period(), Duration::from_millis(10));

        clock.tick();
        for _ in 0..5 {
            assert!(clock.tick() >= Duration::from_millis(10));
        }

        let fps = clock.fps();
        assert!(fps > 0.0 && fps <= 100.5, "fps = {fps}");
    }

    #[test]
    fn zero_target_is_treated_as_one_fps() {
        assert_eq!(FrameClock::new(0).period(), Duration::from_secs(1));
    }
}
