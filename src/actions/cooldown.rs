use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Plugins never repeat a gesture/command pair faster than this.
pub const MIN_COOLDOWN: Duration = Duration::from_millis(100);

/// Last-fired times per (gesture, command) pair, owned by one plugin.
#[derive(Debug)]
pub struct CooldownTracker {
    cooldown: Duration,
    last_fired: HashMap<(String, String), Instant>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: cooldown.max(MIN_COOLDOWN),
            last_fired: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown.max(MIN_COOLDOWN);
    }

    /// Time left before the pair may fire again, `None` when it is free.
    pub fn remaining(&self, gesture: &str, command: &str, now: Instant) -> Option<Duration> {
        let last = self
            .last_fired
            .get(&(gesture.to_string(), command.to_string()))?;
        let elapsed = now.saturating_duration_since(*last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    pub fn record(&mut self, gesture: &str, command: &str, now: Instant) {
        self.last_fired
            .insert((gesture.to_string(), command.to_string()), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_same_pair_until_cooldown_elapses() {
        let mut tracker = CooldownTracker::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(tracker.remaining("palm", "space", start).is_none());

        tracker.record("palm", "space", start);
        let remaining = tracker
            .remaining("palm", "space", start + Duration::from_millis(200))
            .unwrap_or_default();
        assert_eq!(remaining, Duration::from_millis(300));
        assert!(
            tracker
                .remaining("palm", "space", start + Duration::from_millis(500))
                .is_none()
        );
    }

    #[test]
    fn pairs_are_independent() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(1));
        let now = Instant::now();
        tracker.record("palm", "space", now);
        assert!(tracker.remaining("palm", "enter", now).is_none());
        assert!(tracker.remaining("fist", "space", now).is_none());
    }

    #[test]
    fn cooldown_has_a_floor() {
        let mut tracker = CooldownTracker::new(Duration::ZERO);
        assert_eq!(tracker.cooldown(), MIN_COOLDOWN);
        tracker.set_cooldown(Duration::from_millis(20));
        assert_eq!(tracker.cooldown(), MIN_COOLDOWN);
    }
}
