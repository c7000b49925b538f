const URGENT_BELOW_SECS: u64 = 60;

/// Visible pairing deadline. Advisory only: reaching zero changes what is
/// rendered, nothing is cancelled remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining: u64,
}

impl Countdown {
    pub fn new(seconds: u64) -> Self {
        Self { remaining: seconds }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    pub fn is_urgent(&self) -> bool {
        self.remaining > 0 && self.remaining < URGENT_BELOW_SECS
    }

    /// Advances one second. Returns true on the tick that reaches zero.
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.remaining == 0
    }
}

pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_minutes_renders_then_ticks() {
        let mut countdown = Countdown::new(300);
        assert_eq!(format_clock(countdown.remaining()), "5:00");
        assert!(!countdown.tick());
        assert_eq!(format_clock(countdown.remaining()), "4:59");
        assert!(!countdown.is_urgent());
    }

    #[test]
    fn reaches_zero_exactly_once() {
        let mut countdown = Countdown::new(2);
        assert!(countdown.is_urgent());
        assert!(!countdown.tick());
        assert!(countdown.tick());
        assert!(countdown.is_expired());
        assert!(!countdown.tick());
        assert_eq!(format_clock(countdown.remaining()), "0:00");
        assert!(!countdown.is_urgent());
    }

    #[test]
    fn clock_pads_seconds() {
        assert_eq!(format_clock(61), "1:01");
        assert_eq!(format_clock(59), "0:59");
        assert_eq!(format_clock(3600), "60:00");
    }
}
