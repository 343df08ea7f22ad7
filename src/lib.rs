pub mod driver; // Engine lifecycle and stop signalling
pub mod engine; // Step clock
pub mod host; // Host audio engine backends
pub mod io;
pub mod timing; // Tempo to frame conversion

pub use driver::{run_driver, DriverConfig, DriverError, DriverResult, StopSignal};
pub use engine::{StepScheduler, StepTick, StepTrigger};
pub use io::{write_note_event, EventSink, MidiBuffer};
pub use timing::{frames_per_step, StepGrid, Tempo, TimingMode};

/// Frames consumed at stream start before any step is dispatched.
/// Some hosts drop MIDI events written right after activation.
pub const DEFAULT_BURN_IN_FRAMES: u64 = 8000;

pub const MAX_BLOCK_SIZE: usize = 2048;

/// Event capacity of the per-callback output buffer
pub const MAX_EVENTS_PER_BLOCK: usize = 256;
