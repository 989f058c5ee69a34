use crate::core::time::format_countdown;

/// At or below this many seconds the countdown is shown as running low.
pub const LOW_TIME_THRESHOLD_SECONDS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Remaining(u32),
    /// The countdown hit zero and stopped itself.
    Expired,
}

/// Remaining-time bookkeeping for a timed exam. The owner drives it with
/// [`Countdown::tick`] once per period while it is running.
#[derive(Debug, Clone, Default)]
pub struct Countdown {
    remaining: Option<u32>,
    started: bool,
    running: bool,
}

impl Countdown {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Sets the initial value. Untimed exams leave the countdown idle.
    pub fn arm(&mut self, seconds: u32) {
        if self.started {
            return;
        }
        self.remaining = Some(seconds);
    }

    /// Starts ticking. Returns `true` only the first time, and only when armed.
    pub fn start(&mut self) -> bool {
        if self.started || self.remaining.is_none() {
            return false;
        }
        self.started = true;
        self.running = true;
        true
    }

    pub fn tick(&mut self) -> Option<Tick> {
        if !self.running {
            return None;
        }

        match self.remaining {
            Some(remaining) if remaining > 1 => {
                let next = remaining - 1;
                self.remaining = Some(next);
                Some(Tick::Remaining(next))
            }
            _ => {
                self.remaining = Some(0);
                self.running = false;
                Some(Tick::Expired)
            }
        }
    }

    /// Stops for good; a stopped countdown is never restarted.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn is_low(&self) -> bool {
        self.remaining.is_some_and(|remaining| remaining <= LOW_TIME_THRESHOLD_SECONDS)
    }

    pub fn display(&self) -> Option<String> {
        self.remaining.map(format_countdown)
    }
}
