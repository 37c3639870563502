//! Trigger timelines with at-most-once-per-day semantics.

use std::collections::HashSet;

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use tracing::debug;

/// One daily trigger timeline.
///
/// Each configured time fires at most once per (date, time). Fired state is
/// owned by the timeline, lives only in memory, and is pruned at local
/// midnight — after a restart that crossed a trigger time the trigger fires
/// once more, which is acceptable because defense application is
/// idempotent.
#[derive(Debug)]
pub struct Timeline {
    label: &'static str,
    times: Vec<NaiveTime>,
    fired: HashSet<(NaiveDate, NaiveTime)>,
}

impl Timeline {
    pub fn new(label: &'static str, times: Vec<NaiveTime>) -> Self {
        Self {
            label,
            times,
            fired: HashSet::new(),
        }
    }

    /// Return a configured time that is due at `now`, marking it fired.
    pub fn due(&mut self, now: DateTime<Local>) -> Option<NaiveTime> {
        self.due_at(now.date_naive(), now.time())
    }

    /// Clock-free core of [`Timeline::due`].
    pub fn due_at(&mut self, date: NaiveDate, time: NaiveTime) -> Option<NaiveTime> {
        // Midnight reset: state from previous days never blocks today.
        self.fired.retain(|(fired_date, _)| *fired_date == date);

        for &trigger in &self.times {
            if time >= trigger && !self.fired.contains(&(date, trigger)) {
                self.fired.insert((date, trigger));
                debug!(timeline = self.label, trigger = %trigger, "trigger due");
                return Some(trigger);
            }
        }
        None
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hhmm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn fires_exactly_once_per_day() {
        let mut timeline = Timeline::new("ioc", vec![hhmm(10, 0)]);

        assert_eq!(timeline.due_at(day(2), hhmm(9, 59)), None);
        assert_eq!(timeline.due_at(day(2), hhmm(10, 0)), Some(hhmm(10, 0)));
        assert_eq!(timeline.due_at(day(2), hhmm(10, 1)), None);
        assert_eq!(timeline.due_at(day(2), hhmm(23, 59)), None);
    }

    #[test]
    fn refires_on_the_next_day() {
        let mut timeline = Timeline::new("ioc", vec![hhmm(10, 0)]);

        assert!(timeline.due_at(day(2), hhmm(10, 0)).is_some());
        assert!(timeline.due_at(day(2), hhmm(12, 0)).is_none());
        assert!(timeline.due_at(day(3), hhmm(10, 0)).is_some());
    }

    #[test]
    fn late_start_still_fires_once() {
        // Process comes up after the trigger time: fire immediately, once.
        let mut timeline = Timeline::new("digest", vec![hhmm(6, 0)]);

        assert_eq!(timeline.due_at(day(2), hhmm(14, 30)), Some(hhmm(6, 0)));
        assert_eq!(timeline.due_at(day(2), hhmm(14, 31)), None);
    }

    #[test]
    fn multiple_times_fire_independently() {
        let mut timeline = Timeline::new("digest", vec![hhmm(6, 0), hhmm(18, 0)]);

        assert_eq!(timeline.due_at(day(2), hhmm(6, 0)), Some(hhmm(6, 0)));
        assert_eq!(timeline.due_at(day(2), hhmm(12, 0)), None);
        assert_eq!(timeline.due_at(day(2), hhmm(18, 0)), Some(hhmm(18, 0)));
        assert_eq!(timeline.due_at(day(2), hhmm(18, 5)), None);
    }

    #[test]
    fn one_trigger_per_tick() {
        // Both times are overdue; they drain across consecutive ticks.
        let mut timeline = Timeline::new("digest", vec![hhmm(6, 0), hhmm(7, 0)]);

        assert_eq!(timeline.due_at(day(2), hhmm(8, 0)), Some(hhmm(6, 0)));
        assert_eq!(timeline.due_at(day(2), hhmm(8, 0)), Some(hhmm(7, 0)));
        assert_eq!(timeline.due_at(day(2), hhmm(8, 0)), None);
    }
}
