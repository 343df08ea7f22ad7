//! Simulated host engine.
//!
//! Drives the process handler from its own thread with a fixed block size,
//! either as fast as possible or paced to wall-clock time, and captures the
//! events it writes. Every lifecycle stage can be made to fail, which is what
//! the driver tests use to exercise error paths without audio hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::debug;

use super::{AudioEngine, EngineError, EngineStage, ProcessHandler, ProcessStatus, XrunHandler};
use crate::driver::StopSignal;
use crate::io::{EventStore, RawEvent};
use crate::{MAX_BLOCK_SIZE, MAX_EVENTS_PER_BLOCK};

/// Event written by the process handler, stamped with its absolute frame
pub type CapturedEvent = super::midi_out::TimedEvent;

type Handlers = (Box<dyn ProcessHandler>, Option<Box<dyn XrunHandler>>);

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    failed_blocks: AtomicU64,
    xruns: AtomicU64,
}

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<Handlers>,
}

pub struct OfflineEngine {
    sample_rate: u32,
    block_size: u32,
    max_blocks: Option<u64>,
    paced: bool,
    capture_capacity: usize,
    fail_at: Option<EngineStage>,
    on_finished: Option<StopSignal>,
    process: Option<Box<dyn ProcessHandler>>,
    xrun: Option<Box<dyn XrunHandler>>,
    worker: Option<Worker>,
    captured: Option<Consumer<CapturedEvent>>,
    counters: Arc<Counters>,
    history: Vec<EngineStage>,
}

impl OfflineEngine {
    /// Block size is clamped to `1..=MAX_BLOCK_SIZE`
    pub fn new(sample_rate: u32, block_size: u32) -> Self {
        Self {
            sample_rate,
            block_size: block_size.clamp(1, MAX_BLOCK_SIZE as u32),
            max_blocks: None,
            paced: false,
            capture_capacity: 4096,
            fail_at: None,
            on_finished: None,
            process: None,
            xrun: None,
            worker: None,
            captured: None,
            counters: Arc::new(Counters::default()),
            history: Vec::new(),
        }
    }

    /// Stop rendering after `blocks` callbacks
    pub fn max_blocks(mut self, blocks: u64) -> Self {
        self.max_blocks = Some(blocks);
        self
    }

    /// Sleep for each block's duration, like a real device would
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Ring buffer size for captured events; overflow is reported as an xrun
    pub fn capture_capacity(mut self, capacity: usize) -> Self {
        self.capture_capacity = capacity.max(1);
        self
    }

    /// Make `stage` fail with [`EngineError::Injected`]
    pub fn fail_at(mut self, stage: EngineStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Request a stop once `max_blocks` have been rendered
    pub fn on_finished(mut self, stop: StopSignal) -> Self {
        self.on_finished = Some(stop);
        self
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Lifecycle calls received so far, in order
    pub fn history(&self) -> &[EngineStage] {
        &self.history
    }

    pub fn frames_rendered(&self) -> u64 {
        self.counters.frames.load(Ordering::Acquire)
    }

    /// Callbacks whose process handler reported a failure
    pub fn failed_blocks(&self) -> u64 {
        self.counters.failed_blocks.load(Ordering::Acquire)
    }

    pub fn xruns(&self) -> u64 {
        self.counters.xruns.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Take every captured event produced so far. Each activation starts a
    /// fresh capture ring.
    pub fn drain_events(&mut self) -> Vec<CapturedEvent> {
        let mut events = Vec::new();
        if let Some(rx) = self.captured.as_mut() {
            while let Ok(event) = rx.pop() {
                events.push(event);
            }
        }
        events
    }

    fn enter(&mut self, stage: EngineStage) -> Result<(), EngineError> {
        self.history.push(stage);
        if self.fail_at == Some(stage) {
            return Err(EngineError::Injected(stage));
        }
        Ok(())
    }
}

impl AudioEngine for OfflineEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_process_handler(
        &mut self,
        handler: Box<dyn ProcessHandler>,
    ) -> Result<(), EngineError> {
        self.enter(EngineStage::RegisterProcess)?;
        if self.is_active() {
            return Err(EngineError::AlreadyActive);
        }
        self.process = Some(handler);
        Ok(())
    }

    fn set_xrun_handler(&mut self, handler: Box<dyn XrunHandler>) -> Result<(), EngineError> {
        self.enter(EngineStage::RegisterXrun)?;
        if self.is_active() {
            return Err(EngineError::AlreadyActive);
        }
        self.xrun = Some(handler);
        Ok(())
    }

    fn activate(&mut self) -> Result<(), EngineError> {
        self.enter(EngineStage::Activate)?;
        if self.is_active() {
            return Err(EngineError::AlreadyActive);
        }
        let process = self
            .process
            .take()
            .ok_or(EngineError::MissingProcessHandler)?;

        let (tx, rx) = RingBuffer::new(self.capture_capacity);
        self.captured = Some(rx);

        let running = Arc::new(AtomicBool::new(true));
        let render = Render {
            block_size: self.block_size,
            block_duration: Duration::from_secs_f64(
                self.block_size as f64 / self.sample_rate.max(1) as f64,
            ),
            max_blocks: self.max_blocks,
            paced: self.paced,
            on_finished: self.on_finished.clone(),
            counters: Arc::clone(&self.counters),
            running: Arc::clone(&running),
        };
        let xrun = self.xrun.take();

        let handle = thread::Builder::new()
            .name("stepclock-offline".into())
            .spawn(move || render.run(process, xrun, tx))
            .map_err(|e| EngineError::backend(EngineStage::Activate, e))?;

        self.worker = Some(Worker { running, handle });
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), EngineError> {
        self.enter(EngineStage::Deactivate)?;
        let worker = self.worker.take().ok_or(EngineError::NotActive)?;
        worker.running.store(false, Ordering::Release);

        let (process, xrun) = worker.handle.join().map_err(|_| {
            EngineError::backend(EngineStage::Deactivate, "render thread panicked")
        })?;
        // Handlers come back so the engine can be activated again
        self.process = Some(process);
        self.xrun = xrun;
        Ok(())
    }
}

impl Drop for OfflineEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.running.store(false, Ordering::Release);
            let _ = worker.handle.join();
        }
    }
}

/// Render loop state moved onto the worker thread
struct Render {
    block_size: u32,
    block_duration: Duration,
    max_blocks: Option<u64>,
    paced: bool,
    on_finished: Option<StopSignal>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
}

impl Render {
    fn run(
        self,
        mut process: Box<dyn ProcessHandler>,
        mut xrun: Option<Box<dyn XrunHandler>>,
        mut tx: Producer<CapturedEvent>,
    ) -> Handlers {
        let mut store = EventStore::with_capacity(MAX_EVENTS_PER_BLOCK);
        let mut frame = self.counters.frames.load(Ordering::Acquire);
        let mut blocks: u64 = 0;
        let started = Instant::now();

        while self.running.load(Ordering::Acquire) {
            if self.max_blocks.is_some_and(|max| blocks >= max) {
                debug!(blocks, "offline render finished");
                if let Some(stop) = &self.on_finished {
                    stop.request_stop();
                }
                break;
            }

            let status = {
                let mut out = store.buffer(self.block_size);
                process.process(self.block_size, &mut out)
            };
            if status == ProcessStatus::Failed {
                self.counters.failed_blocks.fetch_add(1, Ordering::AcqRel);
            }

            if !capture(&mut tx, frame, store.events()) {
                self.counters.xruns.fetch_add(1, Ordering::AcqRel);
                if let Some(handler) = xrun.as_mut() {
                    handler.on_xrun();
                }
            }

            frame += self.block_size as u64;
            blocks += 1;
            self.counters.frames.store(frame, Ordering::Release);

            if self.paced {
                let due = started + self.block_duration.mul_f64(blocks as f64);
                if let Some(wait) = due.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }
        }

        (process, xrun)
    }
}

/// Push a block's events; false if any were lost to a full ring
fn capture(tx: &mut Producer<CapturedEvent>, frame: u64, events: &[RawEvent]) -> bool {
    let mut complete = true;
    for event in events {
        let captured = CapturedEvent {
            frame: frame + event.offset as u64,
            event: *event,
        };
        if tx.push(captured).is_err() {
            complete = false;
        }
    }
    complete
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{write_note_event, MidiBuffer, NOTE_ON};

    /// Writes a note at the start of every block
    struct EveryBlock;

    impl ProcessHandler for EveryBlock {
        fn process(&mut self, _nframes: u32, out: &mut MidiBuffer<'_>) -> ProcessStatus {
            match write_note_event(out, 0, NOTE_ON, 1, 60, 100) {
                Ok(()) => ProcessStatus::Continue,
                Err(_) => ProcessStatus::Failed,
            }
        }
    }

    struct CountXruns(Arc<AtomicU64>);

    impl XrunHandler for CountXruns {
        fn on_xrun(&mut self) -> ProcessStatus {
            self.0.fetch_add(1, Ordering::Relaxed);
            ProcessStatus::Continue
        }
    }

    fn run_to_completion(engine: &mut OfflineEngine, stop: &StopSignal) {
        engine.activate().unwrap();
        stop.wait();
        engine.deactivate().unwrap();
    }

    #[test]
    fn test_renders_requested_blocks() {
        let stop = StopSignal::new();
        let mut engine = OfflineEngine::new(48_000, 128)
            .max_blocks(10)
            .on_finished(stop.clone());
        engine.set_process_handler(Box::new(EveryBlock)).unwrap();

        run_to_completion(&mut engine, &stop);

        assert_eq!(engine.frames_rendered(), 1280);
        let frames: Vec<u64> = engine.drain_events().iter().map(|e| e.frame).collect();
        assert_eq!(frames, (0..10).map(|b| b * 128).collect::<Vec<_>>());
        assert_eq!(
            engine.history(),
            &[
                EngineStage::RegisterProcess,
                EngineStage::Activate,
                EngineStage::Deactivate
            ]
        );
    }

    #[test]
    fn test_full_capture_ring_reports_xrun() {
        let stop = StopSignal::new();
        let xruns = Arc::new(AtomicU64::new(0));
        let mut engine = OfflineEngine::new(48_000, 64)
            .max_blocks(5)
            .capture_capacity(2)
            .on_finished(stop.clone());
        engine.set_process_handler(Box::new(EveryBlock)).unwrap();
        engine
            .set_xrun_handler(Box::new(CountXruns(Arc::clone(&xruns))))
            .unwrap();

        run_to_completion(&mut engine, &stop);

        assert_eq!(engine.drain_events().len(), 2);
        assert_eq!(engine.xruns(), 3);
        assert_eq!(xruns.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_injected_failure() {
        let mut engine = OfflineEngine::new(48_000, 64).fail_at(EngineStage::Activate);
        engine.set_process_handler(Box::new(EveryBlock)).unwrap();
        assert_eq!(
            engine.activate(),
            Err(EngineError::Injected(EngineStage::Activate))
        );
        assert!(!engine.is_active());
    }

    #[test]
    fn test_activate_requires_process_handler() {
        let mut engine = OfflineEngine::new(48_000, 64);
        assert_eq!(engine.activate(), Err(EngineError::MissingProcessHandler));
        assert_eq!(engine.deactivate(), Err(EngineError::NotActive));
    }

    #[test]
    fn test_can_reactivate_and_continue_clock() {
        let stop = StopSignal::new();
        let mut engine = OfflineEngine::new(48_000, 100)
            .max_blocks(3)
            .on_finished(stop.clone());
        engine.set_process_handler(Box::new(EveryBlock)).unwrap();

        run_to_completion(&mut engine, &stop);
        stop.reset();
        run_to_completion(&mut engine, &stop);

        assert_eq!(engine.frames_rendered(), 600);
        let frames: Vec<u64> = engine.drain_events().iter().map(|e| e.frame).collect();
        assert_eq!(frames, vec![300, 400, 500]);
    }

    #[test]
    fn test_block_size_clamped() {
        assert_eq!(OfflineEngine::new(48_000, 0).block_size(), 1);
        assert_eq!(
            OfflineEngine::new(48_000, 1 << 20).block_size(),
            MAX_BLOCK_SIZE as u32
        );
    }
}
