/// Small state tracker for movement modes.
///
/// Holds the current and previous state plus the time spent in the current
/// one. Deciding *when* to switch is up to the owner; the machine only
/// records switches.
#[derive(Debug, Clone)]
pub struct StateMachine<S: Copy + PartialEq> {
    state: S,
    previous: S,
    /// Seconds in the current state.
    elapsed: f32,
    entered: bool,
}

impl<S: Copy + PartialEq> StateMachine<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            previous: initial,
            elapsed: 0.0,
            entered: true,
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn previous(&self) -> S {
        self.previous
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Switches to `next` if it differs from the current state. Returns
    /// whether a switch happened.
    pub fn go(&mut self, next: S) -> bool {
        if self.state == next {
            return false;
        }
        self.previous = std::mem::replace(&mut self.state, next);
        self.elapsed = 0.0;
        self.entered = true;
        true
    }

    /// Advances the in-state timer. Call once per step after transitions.
    pub fn tick(&mut self, dt: f32) {
        self.elapsed += dt;
        self.entered = false;
    }

    /// True until the first `tick` after a switch.
    pub fn just_entered(&self) -> bool {
        self.entered
    }

    /// Back to `initial` with a fresh timer.
    pub fn reset(&mut self, initial: S) {
        *self = Self::new(initial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Mode {
        A,
        B,
    }

    #[test]
    fn switching_resets_timer() {
        let mut fsm = StateMachine::new(Mode::A);
        fsm.tick(0.5);
        assert!(!fsm.go(Mode::A));
        assert_eq!(fsm.elapsed(), 0.5);
        assert!(fsm.go(Mode::B));
        assert!(fsm.just_entered());
        assert_eq!(fsm.previous(), Mode::A);
        assert_eq!(fsm.elapsed(), 0.0);
        fsm.tick(0.25);
        assert!(!fsm.just_entered());
        assert_eq!(fsm.state(), Mode::B);
    }
}
