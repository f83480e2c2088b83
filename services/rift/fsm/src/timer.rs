//! Timer scheduler.
//!
//! The scheduler indexes timers by expire time only. Each timer is identified
//! by a handle chosen by its owner; when a timer fires the handle is given back
//! to the caller, which routes it to the owning state machine.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Entry {
    expire: Instant,
    interval: Duration,
    periodic: bool,
}

/// Time-ordered timer dispatch for one node
#[derive(Debug)]
pub struct Scheduler<H> {
    by_expiry: BTreeMap<Instant, Vec<H>>,
    entries: HashMap<H, Entry>,
}

impl<H> Default for Scheduler<H> {
    fn default() -> Self {
        Self {
            by_expiry: BTreeMap::new(),
            entries: HashMap::new(),
        }
    }
}

impl<H: Copy + Eq + Hash + Debug> Scheduler<H> {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer to expire `interval` after `now`, replacing any
    /// pending expiry of the same handle
    pub fn schedule(&mut self, handle: H, now: Instant, interval: Duration, periodic: bool) {
        if periodic && interval.is_zero() {
            panic!("periodic timer {:?} scheduled with zero interval", handle);
        }
        if self.entries.contains_key(&handle) {
            self.unschedule(handle);
        }
        let entry = Entry {
            expire: now + interval,
            interval,
            periodic,
        };
        self.insert(handle, entry);
    }

    /// Remove a pending timer
    ///
    /// # Panics
    ///
    /// Panics if the timer is not scheduled.
    pub fn unschedule(&mut self, handle: H) {
        let entry = match self.entries.remove(&handle) {
            Some(entry) => entry,
            None => panic!("unschedule of timer {:?} that is not scheduled", handle),
        };
        if let Some(group) = self.by_expiry.get_mut(&entry.expire) {
            group.retain(|h| *h != handle);
            if group.is_empty() {
                self.by_expiry.remove(&entry.expire);
            }
        }
    }

    /// Whether a timer is pending
    pub fn is_scheduled(&self, handle: H) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Absolute expire time of a pending timer
    pub fn expire_time(&self, handle: H) -> Option<Instant> {
        self.entries.get(&handle).map(|entry| entry.expire)
    }

    /// Earliest pending expire time
    pub fn next_expiry(&self) -> Option<Instant> {
        self.by_expiry.keys().next().copied()
    }

    /// Whether any timer has expired at `now`
    pub fn expired_timers_pending(&self, now: Instant) -> bool {
        self.next_expiry().map_or(false, |expire| expire <= now)
    }

    /// Fire every timer whose expire time is at or before `now`.
    ///
    /// Periodic timers are rescheduled at `old_expire + interval`, so a late
    /// tick stays on its grid. A timer that missed more than one interval,
    /// after a suspend or a clock jump, fires once and is re-anchored at
    /// `now + interval`. Returns the time until the next pending expiry, or
    /// `None` when no timer is pending.
    pub fn trigger_all_expired_timers(
        &mut self,
        now: Instant,
        mut fire: impl FnMut(H),
    ) -> Option<Duration> {
        while let Some(expire) = self.next_expiry().filter(|expire| *expire <= now) {
            let group = self.by_expiry.remove(&expire).unwrap_or_default();
            for handle in group {
                let entry = match self.entries.remove(&handle) {
                    Some(entry) => entry,
                    None => continue,
                };
                if entry.periodic {
                    let mut expire = entry.expire + entry.interval;
                    if expire <= now {
                        expire = now + entry.interval;
                    }
                    self.insert(handle, Entry { expire, ..entry });
                }
                fire(handle);
            }
        }
        self.next_expiry()
            .map(|expire| expire.saturating_duration_since(now))
    }

    /// Drop every pending timer
    pub fn stop_all_timers(&mut self) {
        debug!("Stopping {} timers", self.entries.len());
        self.by_expiry.clear();
        self.entries.clear();
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timer is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, handle: H, entry: Entry) {
        self.by_expiry.entry(entry.expire).or_default().push(handle);
        self.entries.insert(handle, entry);
    }
}

/// A timer owned by a state machine: handle plus its configured interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer<H> {
    handle: H,
    interval: Duration,
    periodic: bool,
}

impl<H: Copy + Eq + Hash + Debug> Timer<H> {
    /// Timer that fires every `interval` once started
    pub fn periodic(handle: H, interval: Duration) -> Self {
        Self {
            handle,
            interval,
            periodic: true,
        }
    }

    /// Timer that fires once, `interval` after being started
    pub fn one_shot(handle: H, interval: Duration) -> Self {
        Self {
            handle,
            interval,
            periodic: false,
        }
    }

    /// Change the interval; takes effect on the next start
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Start or restart the timer
    pub fn start(&self, scheduler: &mut Scheduler<H>, now: Instant) {
        scheduler.schedule(self.handle, now, self.interval, self.periodic);
    }

    /// Stop the timer if running
    pub fn stop(&self, scheduler: &mut Scheduler<H>) {
        if scheduler.is_scheduled(self.handle) {
            scheduler.unschedule(self.handle);
        }
    }

    /// Whether the timer is pending
    pub fn is_running(&self, scheduler: &Scheduler<H>) -> bool {
        scheduler.is_scheduled(self.handle)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Handle {
        A,
        B,
        C,
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_one_shot_fires_once() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Handle::A, start, secs(2), false);

        let mut fired = Vec::new();
        let next = scheduler.trigger_all_expired_timers(start + secs(1), |h| fired.push(h));
        assert!(fired.is_empty());
        assert_eq!(next, Some(secs(1)));

        let next = scheduler.trigger_all_expired_timers(start + secs(2), |h| fired.push(h));
        assert_eq!(fired, vec![Handle::A]);
        assert_eq!(next, None);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_periodic_reschedules_from_old_expire() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Handle::A, start, secs(10), true);

        // Fired 3s late: the next expiry stays on the 10s grid.
        let mut count = 0;
        let next = scheduler.trigger_all_expired_timers(start + secs(13), |_| count += 1);
        assert_eq!(count, 1);
        assert_eq!(scheduler.expire_time(Handle::A), Some(start + secs(20)));
        assert_eq!(next, Some(secs(7)));
    }

    #[test]
    fn test_periodic_reanchors_after_missed_intervals() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Handle::A, start, secs(1), true);

        // An hour-long suspend fires the timer once, not 3600 times.
        let mut count = 0;
        let later = start + secs(3600);
        let next = scheduler.trigger_all_expired_timers(later, |_| count += 1);
        assert_eq!(count, 1);
        assert_eq!(scheduler.expire_time(Handle::A), Some(later + secs(1)));
        assert_eq!(next, Some(secs(1)));

        // An on-time tick keeps the grid.
        let mut count = 0;
        scheduler.trigger_all_expired_timers(later + secs(1), |_| count += 1);
        assert_eq!(count, 1);
        assert_eq!(scheduler.expire_time(Handle::A), Some(later + secs(2)));
    }

    #[test]
    fn test_same_expiry_fires_together() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Handle::A, start, secs(1), false);
        scheduler.schedule(Handle::B, start, secs(1), false);
        scheduler.schedule(Handle::C, start, secs(5), false);

        let mut fired = Vec::new();
        scheduler.trigger_all_expired_timers(start + secs(1), |h| fired.push(h));
        fired.sort_by_key(|h| format!("{:?}", h));
        assert_eq!(fired, vec![Handle::A, Handle::B]);
        assert!(scheduler.is_scheduled(Handle::C));
    }

    #[test]
    fn test_reschedule_replaces_expiry() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Handle::A, start, secs(1), false);
        scheduler.schedule(Handle::A, start, secs(5), false);
        assert_eq!(scheduler.len(), 1);
        assert!(!scheduler.expired_timers_pending(start + secs(2)));
        assert!(scheduler.expired_timers_pending(start + secs(5)));
    }

    #[test]
    #[should_panic(expected = "not scheduled")]
    fn test_unschedule_unknown_panics() {
        let mut scheduler: Scheduler<Handle> = Scheduler::new();
        scheduler.unschedule(Handle::A);
    }

    #[test]
    fn test_timer_start_stop() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        let timer = Timer::one_shot(Handle::B, secs(3));

        timer.start(&mut scheduler, start);
        assert!(timer.is_running(&scheduler));
        assert_eq!(scheduler.expire_time(Handle::B), Some(start + secs(3)));

        let mut timer = timer;
        timer.set_interval(secs(7));
        timer.start(&mut scheduler, start + secs(1));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.expire_time(Handle::B), Some(start + secs(8)));

        timer.stop(&mut scheduler);
        timer.stop(&mut scheduler);
        assert!(!timer.is_running(&scheduler));
    }

    #[test]
    fn test_stop_all_timers() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Handle::A, start, secs(1), true);
        scheduler.schedule(Handle::B, start, secs(2), false);
        scheduler.stop_all_timers();
        assert_eq!(scheduler.next_expiry(), None);
        assert_eq!(scheduler.trigger_all_expired_timers(start + secs(9), |_| {}), None);
    }
}
