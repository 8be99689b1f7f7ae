/// Lowest level the breathing animation reaches.
pub const BREATH_FLOOR: u16 = 50;

/// Duty written to an indicator that should stay dark.
pub const IDLE_DUTY: u16 = 0;

/// 10-bit PWM duty for a brightness percentage.
pub fn duty_ceiling(light: u8) -> u16 {
    u16::from(light) * 10 + 23
}

/// Triangle-wave level generator driving the breathing indicators.
#[derive(Debug, Clone)]
pub struct LedAnimator {
    level: u16,
    rising: bool,
    active: bool,
}

impl Default for LedAnimator {
    fn default() -> Self {
        Self {
            level: BREATH_FLOOR,
            rising: true,
            active: false,
        }
    }
}

impl LedAnimator {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn level(&self) -> u16 {
        self.level
    }

    /// Returns `true` if the animator was idle and is now running.
    pub fn start(&mut self) -> bool {
        if self.active {
            return false;
        }
        self.level = BREATH_FLOOR;
        self.rising = true;
        self.active = true;
        true
    }

    /// Returns `true` if the animator was running.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    /// Moves one step towards the current bound and returns the level that
    /// was current before the step.
    pub fn advance(&mut self, ceiling: u16) -> u16 {
        let shown = self.level;
        if self.rising {
            self.level = self.level.saturating_add(1);
            if self.level >= ceiling {
                self.rising = false;
            }
        } else {
            self.level = self.level.saturating_sub(1);
            if self.level <= BREATH_FLOOR {
                self.rising = true;
            }
        }
        shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_scales_brightness() {
        assert_eq!(duty_ceiling(0), 23);
        assert_eq!(duty_ceiling(50), 523);
        assert_eq!(duty_ceiling(100), 1023);
    }

    #[test]
    fn breathes_between_floor_and_ceiling() {
        let ceiling = 60;
        let mut animator = LedAnimator::default();
        assert!(animator.start());

        let levels: Vec<u16> = (0..40).map(|_| animator.advance(ceiling)).collect();

        let peak = levels.iter().position(|&level| level == ceiling).unwrap();
        assert_eq!(peak, 10);
        assert!(levels[..=peak].windows(2).all(|w| w[1] == w[0] + 1));

        let trough = peak + levels[peak..].iter().position(|&l| l == BREATH_FLOOR).unwrap();
        assert_eq!(trough, 20);
        assert!(levels[peak..=trough].windows(2).all(|w| w[1] + 1 == w[0]));

        // Second cycle repeats the first.
        assert_eq!(levels[trough..=trough + 10], levels[..=peak]);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut animator = LedAnimator::default();

        assert!(animator.start());
        assert!(!animator.start());
        animator.advance(1023);
        animator.advance(1023);
        assert_eq!(animator.level(), BREATH_FLOOR + 2);

        assert!(animator.stop());
        assert!(!animator.stop());
        assert!(!animator.is_active());

        assert!(animator.start());
        assert_eq!(animator.level(), BREATH_FLOOR);
    }
}
