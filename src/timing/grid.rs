use std::num::NonZeroU32;

use super::tempo::{Tempo, TempoError};

/// How step boundaries are laid onto the frame timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimingMode {
    /// Fixed integer step length from [`frames_per_step`](super::frames_per_step).
    /// Drifts against the nominal tempo over long sessions.
    #[default]
    Truncated,
    /// Step `k` lands on `ceil(k * sample_rate * 60 / (bpm * ppq))`.
    /// Individual steps jitter by at most one frame but never accumulate drift.
    Exact,
}

/// Absolute frame positions of step boundaries
///
/// Frame 0 is always a boundary. Both variants answer the same two questions
/// so the scheduler does not care which one it runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGrid {
    Truncated { frames_per_step: u64 },
    /// Step length as the reduced fraction `numerator / denominator` frames
    Exact { numerator: u64, denominator: u64 },
}

impl StepGrid {
    pub fn new(tempo: &Tempo, mode: TimingMode) -> Result<Self, TempoError> {
        // Validates inputs and guarantees at least one frame per step in both modes
        let frames_per_step = tempo.frames_per_step()?;

        match mode {
            TimingMode::Truncated => Ok(StepGrid::Truncated {
                frames_per_step: frames_per_step as u64,
            }),
            TimingMode::Exact => {
                let numerator = tempo.sample_rate as u64 * 60;
                let denominator = tempo.bpm as u64 * tempo.ppq as u64;
                let gcd = gcd(numerator, denominator);
                Ok(StepGrid::Exact {
                    numerator: numerator / gcd,
                    denominator: denominator / gcd,
                })
            }
        }
    }

    /// Grid with a fixed step length
    pub fn truncated(frames_per_step: NonZeroU32) -> Self {
        StepGrid::Truncated {
            frames_per_step: frames_per_step.get() as u64,
        }
    }

    /// Nominal step length in whole frames
    pub fn frames_per_step(&self) -> u64 {
        match *self {
            StepGrid::Truncated { frames_per_step } => frames_per_step,
            StepGrid::Exact {
                numerator,
                denominator,
            } => numerator / denominator,
        }
    }

    /// First boundary strictly after `frame`.
    ///
    /// Truncated arithmetic wraps like the host's frame counter would; the
    /// scheduler treats a result below `frame` as an internal error.
    #[inline]
    pub fn first_boundary_after(&self, frame: u64) -> u64 {
        match *self {
            StepGrid::Truncated { frames_per_step } => {
                (frame - frame % frames_per_step).wrapping_add(frames_per_step)
            }
            StepGrid::Exact {
                numerator,
                denominator,
            } => {
                let step = (frame as u128 * denominator as u128) / numerator as u128 + 1;
                exact_boundary(step, numerator, denominator)
            }
        }
    }

    /// Boundary following `boundary`, which must itself be a boundary
    #[inline]
    pub fn next_boundary(&self, boundary: u64) -> u64 {
        match *self {
            StepGrid::Truncated { frames_per_step } => boundary.wrapping_add(frames_per_step),
            // Steps are at least one frame long, so the step after the one
            // ending at `boundary` is the first one strictly past it.
            StepGrid::Exact { .. } => self.first_boundary_after(boundary),
        }
    }
}

#[inline]
fn exact_boundary(step: u128, numerator: u64, denominator: u64) -> u64 {
    let denominator = denominator as u128;
    let frame = (step * numerator as u128 + denominator - 1) / denominator;
    u64::try_from(frame).unwrap_or(u64::MAX)
}

const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let temp = b;
        b = a % b;
        a = temp;
    }
    a
}
