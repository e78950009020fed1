//! Performance measurement tools.

use std::fmt;
use std::time::{Duration, Instant};

/// Measures and averages the time an operation takes.
///
/// Recorded timings are averaged and reset when the timer is displayed using
/// `{}` ([`std::fmt::Display`]).
pub struct Timer {
    name: &'static str,
    total: Duration,
    count: u32,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            total: Duration::ZERO,
            count: 0,
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&mut self, timee: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = timee();
        self.total += start.elapsed();
        self.count += 1;
        result
    }
}

/// Displays the average recorded time since the last display.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let avg_ms = if self.count == 0 {
            0.0
        } else {
            self.total.as_secs_f32() * 1000.0 / self.count as f32
        };
        write!(f, "{}: {}x{avg_ms:.01}ms", self.name, self.count)
    }
}

/// Logs frames per second once per second.
pub struct FpsCounter {
    name: String,
    frames: u32,
    start: Instant,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            start: Instant::now(),
        }
    }

    /// Advances the frame counter by 1 and logs FPS if one second has passed.
    pub fn tick(&mut self) {
        self.frames += 1;
        if self.start.elapsed() > Duration::from_secs(1) {
            log::debug!("{}: {} FPS", self.name, self.frames);
            self.frames = 0;
            self.start = Instant::now();
        }
    }
}
