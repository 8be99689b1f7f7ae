use chrono::Timelike;
use log::info;

/// Wall-clock reading handed over by the time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub valid: bool,
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            hour: 0,
            minute: 0,
        }
    }

    pub fn at(hour: u8, minute: u8) -> Self {
        Self {
            valid: true,
            hour,
            minute,
        }
    }

    pub fn from_time<T: Timelike>(time: &T) -> Self {
        // hour() < 24 and minute() < 60, both fit in u8.
        Self::at(time.hour() as u8, time.minute() as u8)
    }

    pub fn hhmm(&self) -> u16 {
        u16::from(self.hour) * 100 + u16::from(self.minute)
    }
}

/// `true` for a well-formed HHMM value (hour < 24, minute < 60).
pub fn is_valid_hhmm(value: u16) -> bool {
    value / 100 < 24 && value % 100 < 60
}

/// Daily interval `[start, end)` in HHMM; wraps past midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: u16,
    pub end: u16,
}

impl TimeWindow {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Always open when the window is empty or no valid time is known.
    pub fn contains(&self, clock: &WallClock) -> bool {
        if self.start == self.end || !clock.valid {
            return true;
        }

        let now = clock.hhmm();
        if self.start > self.end {
            now >= self.start || now < self.end
        } else {
            now >= self.start && now < self.end
        }
    }
}

/// Remembers the last gate result so callers only re-render on transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowGate {
    open: bool,
}

impl WindowGate {
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Re-evaluates the gate. Returns the new result when it changed, or
    /// unconditionally when `force` is set.
    pub fn evaluate(&mut self, window: TimeWindow, clock: &WallClock, force: bool) -> Option<bool> {
        let open = window.contains(clock);
        if open == self.open && !force {
            return None;
        }

        self.open = open;
        info!(
            "indicator window {} ({:04}-{:04})",
            if open { "open" } else { "closed" },
            window.start,
            window.end
        );
        Some(open)
    }
}
