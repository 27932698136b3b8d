//! Minimum-interval, single-in-flight gate for outbound detection requests.

use std::time::{Duration, Instant};

/// Owns the "request in flight" flag and the time of the last send.
///
/// The flag is only set by [`RequestThrottler::try_begin_send`] and only
/// cleared by [`RequestThrottler::on_send_completed`]. A begun send that never
/// completes keeps the gate shut.
#[derive(Debug)]
pub struct RequestThrottler {
    interval: Duration,
    in_flight: bool,
    last_send: Option<Instant>,
}

impl RequestThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            in_flight: false,
            last_send: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_send(&self) -> Option<Instant> {
        self.last_send
    }

    /// Claim the right to send at `now`. On success the caller must issue the
    /// send and later report its outcome through `on_send_completed`.
    pub fn try_begin_send(&mut self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.in_flight = true;
        self.last_send = Some(now);
        true
    }

    /// Reopen the gate after a response, a decode failure or a transport error.
    pub fn on_send_completed(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_send_is_always_allowed() {
        let mut throttler = RequestThrottler::new(Duration::from_secs(10));
        assert!(throttler.try_begin_send(Instant::now()));
        assert!(throttler.in_flight());
    }

    #[test]
    fn in_flight_request_blocks_even_after_interval() {
        let start = Instant::now();
        let mut throttler = RequestThrottler::new(Duration::from_millis(100));
        assert!(throttler.try_begin_send(start));
        assert!(!throttler.try_begin_send(start + Duration::from_secs(5)));

        throttler.on_send_completed();
        assert!(throttler.try_begin_send(start + Duration::from_secs(5)));
    }

    #[test]
    fn interval_is_measured_from_last_send() {
        let start = Instant::now();
        let mut throttler = RequestThrottler::new(Duration::from_millis(300));
        assert!(throttler.try_begin_send(start));
        throttler.on_send_completed();

        assert!(!throttler.try_begin_send(start + Duration::from_millis(299)));
        assert!(throttler.try_begin_send(start + Duration::from_millis(300)));
        assert_eq!(
            throttler.last_send(),
            Some(start + Duration::from_millis(300))
        );
    }

    #[test]
    fn fast_ticks_send_once_per_interval() {
        // 20 frame-ready events 50ms apart with a 300ms interval and instant
        // responses: sends at 0, 300, 600 and 900ms.
        let start = Instant::now();
        let interval = Duration::from_millis(300);
        let mut throttler = RequestThrottler::new(interval);
        let mut sends = 0;
        for i in 0..20u32 {
            if throttler.try_begin_send(start + Duration::from_millis(50) * i) {
                sends += 1;
                throttler.on_send_completed();
            }
        }
        assert_eq!(sends, 4);
    }

    #[test]
    fn never_more_than_one_outstanding() {
        let start = Instant::now();
        let interval = Duration::from_millis(30);
        let mut throttler = RequestThrottler::new(interval);
        let mut outstanding = 0;
        let mut sends = 0u32;
        for i in 0..100u32 {
            let now = start + Duration::from_millis(7) * i;
            // Responses take three ticks to arrive.
            if outstanding > 0 && i % 3 == 0 {
                outstanding -= 1;
                throttler.on_send_completed();
            }
            if throttler.try_begin_send(now) {
                outstanding += 1;
                sends += 1;
            }
            assert!(outstanding <= 1);
        }
        let elapsed = Duration::from_millis(7) * 99;
        let bound = (elapsed.as_secs_f64() / interval.as_secs_f64()).ceil() as u32 + 1;
        assert!(sends <= bound, "{sends} sends exceeds bound {bound}");
    }
}
