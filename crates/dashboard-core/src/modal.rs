use std::time::{Duration, Instant};

pub const DEFAULT_MODAL_TRANSITION: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalPhase {
    Closed,
    Open,
    Closing { until: Instant },
}

/// Open/close bookkeeping for a modal with a closing transition.
#[derive(Debug, Clone)]
pub struct ModalState {
    transition: Duration,
    phase: ModalPhase,
}

impl Default for ModalState {
    fn default() -> Self {
        Self::new(DEFAULT_MODAL_TRANSITION)
    }
}

impl ModalState {
    pub fn new(transition: Duration) -> Self {
        Self {
            transition,
            phase: ModalPhase::Closed,
        }
    }

    pub fn phase(&self) -> ModalPhase {
        self.phase
    }

    /// Still mounted, including while the closing transition plays.
    pub fn is_open(&self) -> bool {
        !matches!(self.phase, ModalPhase::Closed)
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.phase, ModalPhase::Closing { .. })
    }

    pub fn open(&mut self) {
        self.phase = ModalPhase::Open;
    }

    pub fn close(&mut self, now: Instant) {
        if self.phase == ModalPhase::Open {
            self.phase = ModalPhase::Closing {
                until: now + self.transition,
            };
        }
    }

    pub fn close_immediately(&mut self) {
        self.phase = ModalPhase::Closed;
    }

    /// Returns true when the closing transition finished on this call.
    pub fn advance(&mut self, now: Instant) -> bool {
        match self.phase {
            ModalPhase::Closing { until } if until <= now => {
                self.phase = ModalPhase::Closed;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_plays_transition_then_closes() {
        let start = Instant::now();
        let mut modal = ModalState::default();
        modal.open();
        modal.close(start);

        assert!(modal.is_open());
        assert!(modal.is_closing());
        assert!(!modal.advance(start + Duration::from_millis(299)));
        assert!(modal.advance(start + DEFAULT_MODAL_TRANSITION));
        assert!(!modal.is_open());
    }

    #[test]
    fn close_immediately_skips_transition() {
        let mut modal = ModalState::default();
        modal.open();
        modal.close_immediately();
        assert_eq!(modal.phase(), ModalPhase::Closed);
    }

    #[test]
    fn closing_a_closed_modal_does_nothing() {
        let mut modal = ModalState::default();
        modal.close(Instant::now());
        assert_eq!(modal.phase(), ModalPhase::Closed);
    }
}
