//! Rate limiting for outbound state snapshots

use shared::BROADCAST_INTERVAL_MS;
use std::time::Duration;
use tokio::time::Instant;

/// What the event loop should do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Quiet channel: snapshot immediately.
    SendNow,
    /// Inside the cooldown: a flush was armed for the returned deadline.
    ScheduleAt(Instant),
    /// A flush is already armed and will pick this change up.
    AlreadyScheduled,
}

/// Coalesces bursts of state changes into at most one snapshot per interval.
///
/// The throttle only does bookkeeping. The event loop owns the timer and reads
/// game state when the deadline fires, so a deferred snapshot always carries
/// the state as of delivery, not as of scheduling. At most one flush is armed
/// at any time no matter how many changes pile up behind it.
#[derive(Debug)]
pub struct BroadcastThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    scheduled: Option<Instant>,
}

impl BroadcastThrottle {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(BROADCAST_INTERVAL_MS))
    }

    pub fn with_interval(interval: Duration) -> Self {
        BroadcastThrottle {
            interval,
            last_sent: None,
            scheduled: None,
        }
    }

    /// Registers a state change and decides how it reaches observers.
    /// `SendNow` counts as a send; the caller must actually broadcast.
    pub fn on_state_change(&mut self, now: Instant) -> FlushDecision {
        if self.scheduled.is_some() {
            return FlushDecision::AlreadyScheduled;
        }
        match self.last_sent {
            Some(last) if now.duration_since(last) < self.interval => {
                let deadline = last + self.interval;
                self.scheduled = Some(deadline);
                FlushDecision::ScheduleAt(deadline)
            }
            _ => {
                self.last_sent = Some(now);
                FlushDecision::SendNow
            }
        }
    }

    /// Marks the armed flush as delivered, opening a fresh cooldown.
    pub fn flushed(&mut self, now: Instant) {
        self.scheduled = None;
        self.last_sent = Some(now);
    }

    /// Deadline of the armed flush, if any.
    pub fn scheduled(&self) -> Option<Instant> {
        self.scheduled
    }

    /// Disarms a pending flush without sending. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        self.scheduled = None;
    }
}

impl Default for BroadcastThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle_33ms() -> BroadcastThrottle {
        BroadcastThrottle::with_interval(Duration::from_millis(33))
    }

    #[test]
    fn test_first_change_sends_immediately() {
        let mut throttle = throttle_33ms();
        let now = Instant::now();
        assert_eq!(throttle.on_state_change(now), FlushDecision::SendNow);
        assert_eq!(throttle.scheduled(), None);
    }

    #[test]
    fn test_change_within_cooldown_schedules_at_deadline() {
        let mut throttle = throttle_33ms();
        let t0 = Instant::now();
        throttle.on_state_change(t0);

        let decision = throttle.on_state_change(t0 + Duration::from_millis(5));
        assert_eq!(
            decision,
            FlushDecision::ScheduleAt(t0 + Duration::from_millis(33))
        );
        assert_eq!(throttle.scheduled(), Some(t0 + Duration::from_millis(33)));
    }

    #[test]
    fn test_burst_arms_exactly_one_flush() {
        let mut throttle = throttle_33ms();
        let t0 = Instant::now();

        let mut sends = 0;
        let mut schedules = 0;
        let mut piggybacks = 0;
        for i in 0..40 {
            match throttle.on_state_change(t0 + Duration::from_micros(i * 100)) {
                FlushDecision::SendNow => sends += 1,
                FlushDecision::ScheduleAt(_) => schedules += 1,
                FlushDecision::AlreadyScheduled => piggybacks += 1,
            }
        }

        assert_eq!(sends, 1);
        assert_eq!(schedules, 1);
        assert_eq!(piggybacks, 38);
    }

    #[test]
    fn test_flush_reopens_the_channel() {
        let mut throttle = throttle_33ms();
        let t0 = Instant::now();
        throttle.on_state_change(t0);
        throttle.on_state_change(t0 + Duration::from_millis(5));

        let deadline = throttle.scheduled().unwrap();
        throttle.flushed(deadline);
        assert_eq!(throttle.scheduled(), None);

        // Right after a flush the cooldown applies again.
        let decision = throttle.on_state_change(deadline + Duration::from_millis(1));
        assert_eq!(
            decision,
            FlushDecision::ScheduleAt(deadline + Duration::from_millis(33))
        );

        // A full interval later the channel is open.
        throttle.cancel();
        let decision = throttle.on_state_change(deadline + Duration::from_millis(33));
        assert_eq!(decision, FlushDecision::SendNow);
    }

    #[test]
    fn test_change_after_quiet_period_sends_now() {
        let mut throttle = throttle_33ms();
        let t0 = Instant::now();
        throttle.on_state_change(t0);

        let decision = throttle.on_state_change(t0 + Duration::from_millis(100));
        assert_eq!(decision, FlushDecision::SendNow);
    }

    #[test]
    fn test_steady_state_rate_is_one_per_interval() {
        let mut throttle = throttle_33ms();
        let t0 = Instant::now();

        // A change every millisecond for one simulated second, with flushes
        // delivered on time, settles at one snapshot per interval.
        let mut delivered = 0;
        for ms in 0..1000u64 {
            let now = t0 + Duration::from_millis(ms);
            if let Some(deadline) = throttle.scheduled() {
                if now >= deadline {
                    throttle.flushed(now);
                    delivered += 1;
                }
            }
            if let FlushDecision::SendNow = throttle.on_state_change(now) {
                delivered += 1;
            }
        }

        // 1000ms / 33ms is just over 30; allow the edges some slack.
        assert!(delivered >= 28, "only {} snapshots delivered", delivered);
        assert!(delivered <= 32, "{} snapshots delivered", delivered);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut throttle = throttle_33ms();
        let t0 = Instant::now();
        throttle.on_state_change(t0);
        throttle.on_state_change(t0 + Duration::from_millis(5));
        assert!(throttle.scheduled().is_some());

        throttle.cancel();
        assert_eq!(throttle.scheduled(), None);
        throttle.cancel();
        assert_eq!(throttle.scheduled(), None);
    }
}
