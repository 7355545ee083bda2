//! Navigation state machine for the assessment wizard.
//!
//! Pure function of (position, action) → (position, optional event). The
//! machine is total: every operation keeps the position inside the phase
//! and step bounds, so there is no error path once it is constructed.

use crate::phases::{validate_phases, Phase, PhaseConfigError, Step};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `(phase, step)` pointer into the phase tree
///
/// Ordering is traversal order, so the furthest position is the max.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub phase: usize,
    pub step: usize,
}

impl Position {
    pub const START: Position = Position { phase: 0, step: 0 };

    pub fn new(phase: usize, step: usize) -> Self {
        Self { phase, step }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.phase, self.step)
    }
}

/// Emitted by `go_next` when the position changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moved {
    pub from: Position,
    pub to: Position,
}

/// Where a fresh machine starts
///
/// Precedence: synthesis flag, then explicit position, then `(0, 0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub start_at_synthesis: bool,
    pub initial_position: Option<Position>,
}

/// Navigation over a validated phase tree
#[derive(Debug, Clone)]
pub struct Navigator {
    phases: Arc<[Phase]>,
    position: Position,
}

impl Navigator {
    pub fn new(phases: Arc<[Phase]>, start: StartOptions) -> Result<Self, PhaseConfigError> {
        validate_phases(&phases)?;
        let mut nav = Self {
            phases,
            position: Position::START,
        };
        nav.position = nav.resolve_start(start);
        Ok(nav)
    }

    /// Initial position for the given options
    pub fn resolve_start(&self, start: StartOptions) -> Position {
        if start.start_at_synthesis {
            self.synthesis_position()
        } else if let Some(pos) = start.initial_position {
            self.clamp(pos)
        } else {
            Position::START
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn position(&self) -> Position {
        self.position
    }

    fn last_phase(&self) -> usize {
        self.phases.len() - 1
    }

    fn last_step_of(&self, phase: usize) -> usize {
        self.phases[phase].steps.len() - 1
    }

    /// First step of the synthesis phase
    pub fn synthesis_position(&self) -> Position {
        Position::new(self.last_phase(), 0)
    }

    /// Bring any position back inside bounds
    pub fn clamp(&self, pos: Position) -> Position {
        let phase = pos.phase.min(self.last_phase());
        let step = pos.step.min(self.last_step_of(phase));
        Position::new(phase, step)
    }

    pub fn go_next(&mut self) -> Option<Moved> {
        let from = self.position;
        let to = if from.step < self.last_step_of(from.phase) {
            Position::new(from.phase, from.step + 1)
        } else if from.phase < self.last_phase() {
            Position::new(from.phase + 1, 0)
        } else {
            return None;
        };
        self.position = to;
        Some(Moved { from, to })
    }

    pub fn go_back(&mut self) -> Option<Moved> {
        let from = self.position;
        let to = if from.step > 0 {
            Position::new(from.phase, from.step - 1)
        } else if from.phase > 0 {
            Position::new(from.phase - 1, self.last_step_of(from.phase - 1))
        } else {
            return None;
        };
        self.position = to;
        Some(Moved { from, to })
    }

    /// Unconditional jump; out-of-range input is clamped
    pub fn set_phase_and_step(&mut self, phase: usize, step: usize) -> Position {
        self.position = self.clamp(Position::new(phase, step));
        self.position
    }

    pub fn current_phase_data(&self) -> &Phase {
        &self.phases[self.position.phase]
    }

    pub fn current_step_data(&self) -> &Step {
        &self.current_phase_data().steps[self.position.step]
    }

    pub fn total_steps(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    /// 1-based linear index of a position
    pub fn linear_step(&self, pos: Position) -> usize {
        let before: usize = self.phases[..pos.phase].iter().map(|p| p.steps.len()).sum();
        before + pos.step + 1
    }

    pub fn current_total_step(&self) -> usize {
        self.linear_step(self.position)
    }

    pub fn is_first_step(&self) -> bool {
        self.position == Position::START
    }

    pub fn is_last_step(&self) -> bool {
        self.position.phase == self.last_phase()
            && self.position.step == self.last_step_of(self.position.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::default_phases;

    fn nav() -> Navigator {
        Navigator::new(default_phases().into(), StartOptions::default()).unwrap()
    }

    #[test]
    fn test_start_precedence() {
        let phases: Arc<[Phase]> = default_phases().into();

        let both = StartOptions {
            start_at_synthesis: true,
            initial_position: Some(Position::new(1, 2)),
        };
        let n = Navigator::new(phases.clone(), both).unwrap();
        assert_eq!(n.position(), Position::new(3, 0));

        let resume = StartOptions {
            start_at_synthesis: false,
            initial_position: Some(Position::new(1, 2)),
        };
        let n = Navigator::new(phases.clone(), resume).unwrap();
        assert_eq!(n.position(), Position::new(1, 2));

        let n = Navigator::new(phases, StartOptions::default()).unwrap();
        assert_eq!(n.position(), Position::START);
    }

    #[test]
    fn test_next_crosses_phase_boundary() {
        let mut n = nav();
        n.set_phase_and_step(0, 3);
        let moved = n.go_next().unwrap();
        assert_eq!(moved.from, Position::new(0, 3));
        assert_eq!(moved.to, Position::new(1, 0));
    }

    #[test]
    fn test_back_lands_on_last_step_of_previous_phase() {
        let mut n = nav();
        n.set_phase_and_step(3, 0);
        n.go_back();
        assert_eq!(n.position(), Position::new(2, 4));
    }

    #[test]
    fn test_terminal_and_initial_noops() {
        let mut n = nav();
        assert!(n.go_back().is_none());
        assert!(n.is_first_step());

        n.set_phase_and_step(3, 0);
        assert!(n.is_last_step());
        assert!(n.go_next().is_none());
        assert_eq!(n.position(), Position::new(3, 0));
    }

    #[test]
    fn test_out_of_range_jump_is_clamped() {
        let mut n = nav();
        assert_eq!(n.set_phase_and_step(99, 99), Position::new(3, 0));
        assert_eq!(n.set_phase_and_step(1, 99), Position::new(1, 4));
    }

    #[test]
    fn test_linear_progress() {
        let mut n = nav();
        assert_eq!(n.total_steps(), 15);
        assert_eq!(n.current_total_step(), 1);
        n.set_phase_and_step(1, 0);
        assert_eq!(n.current_total_step(), 5);
        n.set_phase_and_step(3, 0);
        assert_eq!(n.current_total_step(), 15);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let empty: Arc<[Phase]> = Vec::new().into();
        assert!(Navigator::new(empty, StartOptions::default()).is_err());
    }
}
