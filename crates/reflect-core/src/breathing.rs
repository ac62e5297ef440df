//! 4-7-8 breathing exercise

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreathPhase {
    Inhale,
    Hold,
    Exhale,
}

impl BreathPhase {
    pub fn seconds(&self) -> u32 {
        match self {
            Self::Inhale => 4,
            Self::Hold => 7,
            Self::Exhale => 8,
        }
    }

    pub fn next(&self) -> Self {
        match self {
            Self::Inhale => Self::Hold,
            Self::Hold => Self::Exhale,
            Self::Exhale => Self::Inhale,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inhale => "Inhale",
            Self::Hold => "Hold",
            Self::Exhale => "Exhale",
        }
    }
}

/// Length of one full inhale-hold-exhale cycle
pub fn cycle_duration() -> Duration {
    let secs: u32 = [BreathPhase::Inhale, BreathPhase::Hold, BreathPhase::Exhale]
        .iter()
        .map(BreathPhase::seconds)
        .sum();
    Duration::from_secs(u64::from(secs))
}

/// Countdown state, advanced once per second
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breathing {
    phase: BreathPhase,
    remaining: u32,
    completed_cycles: u32,
}

impl Default for Breathing {
    fn default() -> Self {
        Self::new()
    }
}

impl Breathing {
    pub fn new() -> Self {
        Self {
            phase: BreathPhase::Inhale,
            remaining: BreathPhase::Inhale.seconds(),
            completed_cycles: 0,
        }
    }

    pub fn phase(&self) -> BreathPhase {
        self.phase
    }

    /// Seconds left in the current phase, counting down to 1
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn completed_cycles(&self) -> u32 {
        self.completed_cycles
    }

    /// Advance one second
    pub fn tick(&mut self) {
        if self.remaining > 1 {
            self.remaining -= 1;
            return;
        }
        if self.phase == BreathPhase::Exhale {
            self.completed_cycles += 1;
        }
        self.phase = self.phase.next();
        self.remaining = self.phase.seconds();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_lengths() {
        assert_eq!(BreathPhase::Inhale.seconds(), 4);
        assert_eq!(BreathPhase::Hold.seconds(), 7);
        assert_eq!(BreathPhase::Exhale.seconds(), 8);
        assert_eq!(cycle_duration(), Duration::from_secs(19));
    }

    #[test]
    fn test_countdown_and_transitions() {
        let mut b = Breathing::new();
        let mut seen = vec![(b.phase(), b.remaining())];
        for _ in 0..5 {
            b.tick();
            seen.push((b.phase(), b.remaining()));
        }
        assert_eq!(
            seen,
            vec![
                (BreathPhase::Inhale, 4),
                (BreathPhase::Inhale, 3),
                (BreathPhase::Inhale, 2),
                (BreathPhase::Inhale, 1),
                (BreathPhase::Hold, 7),
                (BreathPhase::Hold, 6),
            ]
        );
    }

    #[test]
    fn test_full_cycle_returns_to_inhale() {
        let mut b = Breathing::new();
        for _ in 0..19 {
            b.tick();
        }
        assert_eq!(b.phase(), BreathPhase::Inhale);
        assert_eq!(b.remaining(), 4);
        assert_eq!(b.completed_cycles(), 1);
    }
}
