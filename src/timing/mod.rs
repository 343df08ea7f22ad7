//! Tempo to frame-grid conversion.
//!
//! Everything here is pure arithmetic: no allocation, safe to call from the
//! audio thread.

pub mod grid;
pub mod tempo;

pub use grid::{StepGrid, TimingMode};
pub use tempo::{frames_per_step, Tempo, TempoError};
