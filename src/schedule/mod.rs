use embassy_time::{Duration, Instant};

/// Fixed-interval schedule driven by an externally supplied clock.
///
/// The first observation anchors the schedule, the first cycle is due one
/// interval later. Ticks missed while the host was busy are coalesced into a
/// single cycle and the schedule resumes on the grid of its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingSchedule {
    interval: Duration,
    anchored: bool,
    /// `None` once anchored means the next tick lies beyond the clock range.
    next_due: Option<Instant>,
}

impl PollingSchedule {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            anchored: false,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A zero interval means the driver is only ever triggered manually.
    pub fn is_manual(&self) -> bool {
        self.interval.as_ticks() == 0
    }

    pub fn anchor(&mut self, now: Instant) {
        if !self.is_manual() {
            self.anchored = true;
            self.next_due = now.checked_add(self.interval);
        }
    }

    /// Returns `true` at most once per elapsed interval.
    pub fn due(&mut self, now: Instant) -> bool {
        if self.is_manual() {
            return false;
        }
        if !self.anchored {
            self.anchor(now);
            return false;
        }

        match self.next_due {
            Some(next) if now >= next => {
                let interval = self.interval.as_ticks();
                let missed = (now - next).as_ticks() / interval;
                self.next_due = (missed + 1)
                    .checked_mul(interval)
                    .and_then(|ticks| next.checked_add(Duration::from_ticks(ticks)));
                true
            }
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_one_interval() {
        let mut schedule = PollingSchedule::new(Duration::from_secs(60));
        let start = Instant::from_secs(1_000);

        assert!(!schedule.due(start));
        assert!(!schedule.due(start + Duration::from_secs(59)));

        let fired = (0..=61).filter(|s| schedule.due(start + Duration::from_secs(*s))).count();
        assert_eq!(fired, 1);
        assert_eq!(schedule.next_deadline(), Some(start + Duration::from_secs(120)));
    }

    #[test]
    fn coalesces_missed_ticks() {
        let mut schedule = PollingSchedule::new(Duration::from_secs(60));
        let start = Instant::from_secs(0);
        schedule.anchor(start);

        assert!(schedule.due(Instant::from_secs(250)));
        assert!(!schedule.due(Instant::from_secs(251)));
        assert_eq!(schedule.next_deadline(), Some(Instant::from_secs(300)));
        assert!(schedule.due(Instant::from_secs(300)));
    }

    #[test]
    fn zero_interval_never_fires() {
        let mut schedule = PollingSchedule::new(Duration::from_secs(0));

        assert!(schedule.is_manual());
        for s in [0, 60, 3_600, 86_400] {
            assert!(!schedule.due(Instant::from_secs(s)));
        }
        assert_eq!(schedule.next_deadline(), None);
    }

    #[test]
    fn interval_beyond_clock_range_never_fires() {
        let mut schedule = PollingSchedule::new(Duration::MAX);
        schedule.anchor(Instant::from_secs(10));

        assert_eq!(schedule.next_deadline(), None);
        assert!(!schedule.due(Instant::from_secs(86_400)));
        assert!(!schedule.due(Instant::MAX));
    }

    #[test]
    fn last_tick_before_clock_end_fires_then_stops() {
        let interval = Duration::from_ticks(Instant::MAX.as_ticks() / 2 + 1);
        let mut schedule = PollingSchedule::new(interval);
        schedule.anchor(Instant::from_ticks(0));

        assert!(schedule.due(Instant::MAX));
        assert_eq!(schedule.next_deadline(), None);
        assert!(!schedule.due(Instant::MAX));
    }
}
