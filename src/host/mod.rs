//! Host audio engine abstraction.
//!
//! The driver talks to the host only through [`AudioEngine`]: query the
//! sample rate, register callbacks, activate, deactivate. Backends own the
//! real-time thread and call the registered [`ProcessHandler`] once per
//! buffer.

#[cfg(feature = "rtrb")]
pub mod cpal_backend;
#[cfg(feature = "rtrb")]
pub mod midi_out;
#[cfg(feature = "rtrb")]
pub mod offline;

#[cfg(feature = "rtrb")]
pub use cpal_backend::CpalEngine;
#[cfg(feature = "rtrb")]
pub use midi_out::{list_midi_ports, MidiForwarder, TimedEvent};
#[cfg(feature = "rtrb")]
pub use offline::{CapturedEvent, OfflineEngine};

use crate::io::MidiBuffer;

/// Result of one callback, as reported back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
    /// This callback failed; the host keeps running
    Failed,
}

impl ProcessStatus {
    /// Host status code: 0 ok, non-zero failure
    pub fn code(self) -> i32 {
        match self {
            ProcessStatus::Continue => 0,
            ProcessStatus::Failed => -1,
        }
    }
}

/// Per-buffer callback, run on the host's real-time thread
pub trait ProcessHandler: Send {
    fn process(&mut self, nframes: u32, out: &mut MidiBuffer<'_>) -> ProcessStatus;
}

/// Overrun notification. Must not block.
pub trait XrunHandler: Send {
    fn on_xrun(&mut self) -> ProcessStatus;
}

/// Lifecycle step of an engine, used for errors and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStage {
    RegisterProcess,
    RegisterXrun,
    Activate,
    Deactivate,
}

impl std::fmt::Display for EngineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineStage::RegisterProcess => "process callback registration",
            EngineStage::RegisterXrun => "xrun callback registration",
            EngineStage::Activate => "activation",
            EngineStage::Deactivate => "deactivation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// `activate` called with no process handler registered
    MissingProcessHandler,
    AlreadyActive,
    NotActive,
    /// Failure forced through fault injection
    Injected(EngineStage),
    /// Error reported by the audio or MIDI backend
    Backend { stage: EngineStage, message: String },
}

impl EngineError {
    pub(crate) fn backend(stage: EngineStage, err: impl std::fmt::Display) -> Self {
        EngineError::Backend {
            stage,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingProcessHandler => write!(f, "no process callback registered"),
            EngineError::AlreadyActive => write!(f, "engine is already active"),
            EngineError::NotActive => write!(f, "engine is not active"),
            EngineError::Injected(stage) => write!(f, "injected failure during {}", stage),
            EngineError::Backend { stage, message } => {
                write!(f, "backend error during {}: {}", stage, message)
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Host audio engine
pub trait AudioEngine {
    /// Live sample rate in frames per second
    fn sample_rate(&self) -> u32;

    fn set_process_handler(&mut self, handler: Box<dyn ProcessHandler>)
        -> Result<(), EngineError>;

    fn set_xrun_handler(&mut self, handler: Box<dyn XrunHandler>) -> Result<(), EngineError>;

    /// Start calling the process handler
    fn activate(&mut self) -> Result<(), EngineError>;

    /// Stop calling the process handler. No callback runs after this returns.
    fn deactivate(&mut self) -> Result<(), EngineError>;
}
