//! Step clock - sample-accurate step dispatch
//!
//! The scheduler runs inside the host's audio callback. For every buffer it
//! finds the step boundaries that fall inside `[start, start + nframes)` and
//! hands each one to the [`StepTrigger`] with its offset into the buffer.
//! Boundaries are computed from the absolute frame counter, never from a
//! per-buffer position, so the result does not depend on how the host
//! chunks time into buffers.

use std::ops::Range;

use tracing::error;

use super::trigger::{StepTick, StepTrigger};
use crate::io::MidiBuffer;
use crate::timing::StepGrid;

/// Mutable clock state, owned by the audio thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerState {
    /// Frames processed since playback started
    pub frames_elapsed: u64,
    /// Step boundaries dispatched so far
    pub step_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Inside the burn-in window, buffers are consumed without dispatching
    WarmingUp,
    Running,
}

/// Internal inconsistency detected while dispatching a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// A computed boundary landed before the start of the buffer
    BoundaryBeforeBuffer { boundary: u64, start: u64 },
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::BoundaryBeforeBuffer { boundary, start } => write!(
                f,
                "step boundary {} precedes buffer start {}",
                boundary, start
            ),
        }
    }
}

impl std::error::Error for SchedulerError {}

pub struct StepScheduler {
    grid: StepGrid,
    burn_in_frames: u64,
    state: SchedulerState,
}

impl StepScheduler {
    pub fn new(grid: StepGrid, burn_in_frames: u64) -> Self {
        Self::with_state(grid, burn_in_frames, SchedulerState::default())
    }

    /// Start from an existing clock position
    pub fn with_state(grid: StepGrid, burn_in_frames: u64, state: SchedulerState) -> Self {
        Self {
            grid,
            burn_in_frames,
            state,
        }
    }

    pub fn grid(&self) -> &StepGrid {
        &self.grid
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        if self.state.frames_elapsed < self.burn_in_frames {
            Phase::WarmingUp
        } else {
            Phase::Running
        }
    }

    pub fn is_warming_up(&self) -> bool {
        self.phase() == Phase::WarmingUp
    }

    /// Consume one buffer of `nframes`, dispatching every step boundary inside it.
    ///
    /// Returns the indices of the steps dispatched. On an internal error the
    /// rest of the buffer is skipped, but the frame counter still advances so
    /// the next buffer lines up with the host clock.
    pub fn process_buffer<T: StepTrigger + ?Sized>(
        &mut self,
        nframes: u32,
        out: &mut MidiBuffer<'_>,
        trigger: &mut T,
    ) -> Result<Range<u64>, SchedulerError> {
        let start = self.state.frames_elapsed;
        let first_step = self.state.step_index;

        // Phase is decided once, at the top of the buffer
        let result = match self.phase() {
            Phase::WarmingUp => Ok(()),
            Phase::Running => self.dispatch(start, nframes, out, trigger),
        };

        self.state.frames_elapsed = start.saturating_add(nframes as u64);
        result.map(|()| first_step..self.state.step_index)
    }

    fn dispatch<T: StepTrigger + ?Sized>(
        &mut self,
        start: u64,
        nframes: u32,
        out: &mut MidiBuffer<'_>,
        trigger: &mut T,
    ) -> Result<(), SchedulerError> {
        let end = start.saturating_add(nframes as u64);
        // A boundary sitting exactly on `start` was not reachable from the
        // previous buffer, so it is dispatched here at offset 0. Frame 0 is
        // the origin, not a boundary crossing.
        let mut boundary = self.grid.first_boundary_after(start.saturating_sub(1));

        loop {
            if boundary < start {
                let err = SchedulerError::BoundaryBeforeBuffer { boundary, start };
                error!(%err, step = self.state.step_index, "step clock inconsistency, skipping buffer");
                return Err(err);
            }
            if boundary >= end {
                return Ok(());
            }

            let tick = StepTick {
                index: self.state.step_index,
                offset: (boundary - start) as u32,
                buffer_len: nframes,
            };
            trigger.on_step(tick, out);

            self.state.step_index += 1;
            boundary = self.grid.next_boundary(boundary);
        }
    }
}
