use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

/// Counts cycles since a start time to report the average cycle interval.
#[derive(Debug, Clone)]
pub struct IntervalStats {
    started: Instant,
    count: u32,
}

impl Default for IntervalStats {
    fn default() -> Self {
        Self::start()
    }
}

impl IntervalStats {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            count: 0,
        }
    }

    pub fn restart(&mut self) {
        self.started = Instant::now();
        self.count = 0;
    }

    pub fn record(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn average(&self) -> Option<Duration> {
        average_interval(self.elapsed(), self.count)
    }
}

/// Average interval of `count` cycles spread over `elapsed`.
pub fn average_interval(elapsed: Duration, count: u32) -> Option<Duration> {
    if count == 0 {
        None
    } else {
        Some(elapsed / count)
    }
}

/// Deadline one `period` after `scheduled`. A loop that fell a whole period
/// behind skips the backlog and restarts its cadence from `now`.
pub fn next_deadline(scheduled: Instant, period: Duration, now: Instant) -> Instant {
    let next = scheduled + period;
    if next <= now {
        now + period
    } else {
        next
    }
}

/// Formats an interval the way the schedulers log it, in seconds.
pub fn format_interval(interval: Option<Duration>) -> String {
    match interval {
        Some(interval) => format!("{:.3}", interval.as_secs_f64()),
        None => "n/a".to_string(),
    }
}

/// Cooperative stop request that also serves as an interruptible sleep.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    shared: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, wake) = &*self.shared;
        if let Ok(mut stopped) = flag.lock() {
            *stopped = true;
        }
        wake.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        let (flag, _) = &*self.shared;
        flag.lock().map(|stopped| *stopped).unwrap_or(true)
    }

    /// Sleeps for `timeout` unless a stop is requested first. Returns whether
    /// a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    /// Sleeps until `deadline` unless a stop is requested first.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let (flag, wake) = &*self.shared;
        let Ok(mut stopped) = flag.lock() else {
            return true;
        };
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match wake.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => stopped = guard,
                Err(_) => return true,
            }
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_elapsed_over_count() {
        let average = average_interval(Duration::from_secs(1), 25).unwrap();
        assert!((average.as_secs_f64() - 0.04).abs() < 1e-9);

        let average = average_interval(Duration::from_millis(1_000), 10).unwrap();
        assert_eq!(average, Duration::from_millis(100));
    }

    #[test]
    fn no_cycles_means_no_average() {
        assert_eq!(average_interval(Duration::from_secs(3), 0), None);
        assert_eq!(format_interval(None), "n/a");
    }

    #[test]
    fn deadlines_keep_cadence_without_drift() {
        let start = Instant::now();
        let period = Duration::from_millis(40);

        let next = next_deadline(start, period, start + Duration::from_millis(3));
        assert_eq!(next, start + period);
    }

    #[test]
    fn deadlines_skip_backlog_when_late() {
        let start = Instant::now();
        let period = Duration::from_millis(40);
        let late = start + Duration::from_millis(130);

        assert_eq!(next_deadline(start, period, late), late + period);
    }

    #[test]
    fn restart_resets_the_counter() {
        let mut stats = IntervalStats::start();
        stats.record();
        stats.record();
        assert_eq!(stats.count(), 2);

        stats.restart();
        assert_eq!(stats.count(), 0);
        assert!(stats.average().is_none());
    }

    #[test]
    fn wait_returns_early_on_stop() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        let waiter = std::thread::spawn(move || {
            let started = Instant::now();
            let stopped = remote.wait_timeout(Duration::from_secs(5));
            (stopped, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(20));
        signal.request();
        let (stopped, waited) = waiter.join().unwrap();

        assert!(stopped);
        assert!(waited < Duration::from_secs(2));
        assert!(signal.is_requested());
    }

    #[test]
    fn wait_sleeps_until_the_deadline() {
        let signal = StopSignal::new();
        let started = Instant::now();

        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
