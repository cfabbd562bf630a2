use std::time::{Duration, Instant};

/// Time source for everything that waits or expires. Production code uses [`SystemClock`];
/// tests drive time by hand so nothing sleeps on the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

/// Clock that only moves when slept on or advanced. Records every sleep.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: std::sync::Mutex<Duration>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: std::sync::Mutex::new(Duration::ZERO),
            sleeps: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, d: Duration) {
        *self.offset.lock().expect("clock lock") += d;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("clock lock").clone()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().expect("clock lock")
    }

    fn sleep(&self, d: Duration) {
        self.sleeps.lock().expect("clock lock").push(d);
        self.advance(d);
    }
}
