use std::time::Instant;

/// Frame delta source for the main loop.
///
/// A wall-clock timer measures real time between ticks. A fixed timer
/// reports the same delta every tick, which keeps headless runs
/// reproducible.
pub struct FrameTimer {
    last: Instant,
    fixed: Option<f32>,
    pub dt: f32,
    /// Seconds reported since creation.
    pub elapsed: f32,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            fixed: None,
            dt: 0.0,
            elapsed: 0.0,
        }
    }

    pub fn fixed(dt: f32) -> Self {
        Self {
            fixed: Some(dt),
            ..Self::new()
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.dt = match self.fixed {
            Some(dt) => dt,
            None => now.duration_since(self.last).as_secs_f32(),
        };
        self.last = now;
        self.elapsed += self.dt;
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timer_repeats_delta() {
        let mut timer = FrameTimer::fixed(0.25);
        timer.tick();
        timer.tick();
        assert_eq!(timer.dt, 0.25);
        assert_eq!(timer.elapsed, 0.5);
    }
}
