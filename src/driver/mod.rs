//! Driver lifecycle - wires the step clock into a host engine.
//!
//! [`run_driver`] derives the step grid from the engine's sample rate,
//! registers the process and xrun callbacks, activates the engine, parks the
//! calling thread until a [`StopSignal`] fires, then deactivates. The first
//! failing stage ends the run; deactivation is only attempted after a
//! successful activation.

mod stop;

pub use stop::StopSignal;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::{StepScheduler, StepTrigger};
use crate::host::{AudioEngine, EngineError, ProcessHandler, ProcessStatus, XrunHandler};
use crate::io::MidiBuffer;
use crate::timing::{StepGrid, Tempo, TempoError, TimingMode};
use crate::DEFAULT_BURN_IN_FRAMES;

/// Playback settings for one driver run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverConfig {
    pub bpm: u32,
    pub ppq: u32,
    /// Frames to consume before the first step is dispatched
    pub burn_in_frames: u64,
    pub timing: TimingMode,
}

impl DriverConfig {
    pub fn new(bpm: u32, ppq: u32) -> Self {
        Self {
            bpm,
            ppq,
            burn_in_frames: DEFAULT_BURN_IN_FRAMES,
            timing: TimingMode::default(),
        }
    }

    pub fn burn_in_frames(mut self, frames: u64) -> Self {
        self.burn_in_frames = frames;
        self
    }

    pub fn timing(mut self, timing: TimingMode) -> Self {
        self.timing = timing;
        self
    }
}

/// Driver result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DriverResult {
    Ok = 0,
    CallbackRegistrationFailed = 1,
    ActivateFailed = 2,
    DeactivateFailed = 3,
}

impl DriverResult {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Exit code for a tempo rejected before the engine is touched
pub const INVALID_TEMPO_EXIT_CODE: i32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    InvalidTempo(TempoError),
    CallbackRegistration(EngineError),
    Activate(EngineError),
    Deactivate(EngineError),
}

impl DriverError {
    /// Result code for engine failures; `None` for configuration errors
    pub fn result(&self) -> Option<DriverResult> {
        match self {
            DriverError::InvalidTempo(_) => None,
            DriverError::CallbackRegistration(_) => Some(DriverResult::CallbackRegistrationFailed),
            DriverError::Activate(_) => Some(DriverResult::ActivateFailed),
            DriverError::Deactivate(_) => Some(DriverResult::DeactivateFailed),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.result()
            .map_or(INVALID_TEMPO_EXIT_CODE, DriverResult::code)
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::InvalidTempo(err) => write!(f, "invalid tempo: {}", err),
            DriverError::CallbackRegistration(err) => {
                write!(f, "failed to register engine callback: {}", err)
            }
            DriverError::Activate(err) => write!(f, "failed to activate engine: {}", err),
            DriverError::Deactivate(err) => write!(f, "failed to deactivate engine: {}", err),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::InvalidTempo(err) => Some(err),
            DriverError::CallbackRegistration(err)
            | DriverError::Activate(err)
            | DriverError::Deactivate(err) => Some(err),
        }
    }
}

/// Map a driver outcome to its result code
pub fn result_code(result: &Result<(), DriverError>) -> i32 {
    match result {
        Ok(()) => DriverResult::Ok.code(),
        Err(err) => err.exit_code(),
    }
}

/// Process callback: the scheduler plus the sequencing logic it drives
struct StepProcessor<T> {
    scheduler: StepScheduler,
    trigger: T,
}

impl<T: StepTrigger> ProcessHandler for StepProcessor<T> {
    fn process(&mut self, nframes: u32, out: &mut MidiBuffer<'_>) -> ProcessStatus {
        match self
            .scheduler
            .process_buffer(nframes, out, &mut self.trigger)
        {
            Ok(_) => ProcessStatus::Continue,
            Err(_) => ProcessStatus::Failed,
        }
    }
}

/// Counts overruns; the host is responsible for recovering from them
struct XrunLogger {
    count: Arc<AtomicU64>,
}

impl XrunHandler for XrunLogger {
    fn on_xrun(&mut self) -> ProcessStatus {
        let total = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(total, "xrun");
        ProcessStatus::Continue
    }
}

/// Run the step clock on `engine` until `stop` is requested.
///
/// Blocks the calling thread. `trigger` is moved onto the engine's real-time
/// thread and called once per step boundary.
pub fn run_driver<E, T>(
    engine: &mut E,
    config: &DriverConfig,
    trigger: T,
    stop: &StopSignal,
) -> Result<(), DriverError>
where
    E: AudioEngine + ?Sized,
    T: StepTrigger + 'static,
{
    let tempo = Tempo::new(engine.sample_rate(), config.bpm, config.ppq);
    let grid = StepGrid::new(&tempo, config.timing).map_err(DriverError::InvalidTempo)?;

    info!(
        sample_rate = tempo.sample_rate,
        bpm = tempo.bpm,
        ppq = tempo.ppq,
        frames_per_step = grid.frames_per_step(),
        exact_frames_per_step = tempo.exact_frames_per_step(),
        timing = ?config.timing,
        burn_in_frames = config.burn_in_frames,
        "starting step clock"
    );

    let processor = StepProcessor {
        scheduler: StepScheduler::new(grid, config.burn_in_frames),
        trigger,
    };
    engine
        .set_process_handler(Box::new(processor))
        .map_err(DriverError::CallbackRegistration)?;

    let xruns = Arc::new(AtomicU64::new(0));
    engine
        .set_xrun_handler(Box::new(XrunLogger {
            count: Arc::clone(&xruns),
        }))
        .map_err(DriverError::CallbackRegistration)?;

    engine.activate().map_err(DriverError::Activate)?;
    info!("engine active, waiting for stop request");

    stop.wait();

    engine.deactivate().map_err(DriverError::Deactivate)?;
    info!(xruns = xruns.load(Ordering::Relaxed), "engine deactivated");
    Ok(())
}
