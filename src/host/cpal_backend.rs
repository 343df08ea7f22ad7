//! cpal-backed host engine.
//!
//! cpal exposes no MIDI ports, so the output stream is used purely as a
//! clock: the data callback writes silence, runs the process handler over
//! the frame count, and ships any events to a [`MidiForwarder`]. MIDI timing
//! is therefore accurate to the buffer, with intra-buffer offsets carried in
//! the event timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::RingBuffer;
use tracing::{info, warn};

use super::midi_out::{MidiForwarder, TimedEvent};
use super::{AudioEngine, EngineError, EngineStage, ProcessHandler, XrunHandler};
use crate::io::EventStore;
use crate::MAX_EVENTS_PER_BLOCK;

/// Events that may sit between the audio thread and the MIDI thread
const MIDI_QUEUE_CAPACITY: usize = 4096;

pub struct CpalEngine {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    midi_port: Option<usize>,
    process: Option<Box<dyn ProcessHandler>>,
    xrun: Option<Box<dyn XrunHandler>>,
    stream: Option<cpal::Stream>,
    forwarder: Option<MidiForwarder>,
    dropped: Arc<AtomicU64>,
}

impl CpalEngine {
    /// Open the default output device
    pub fn new() -> Result<Self, EngineError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            EngineError::backend(EngineStage::Activate, "no default output device available")
        })?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::backend(EngineStage::Activate, e))?;

        if let Ok(name) = device.name() {
            info!(device = %name, sample_rate = config.sample_rate().0, "opened output device");
        }

        Ok(Self {
            device,
            config,
            midi_port: None,
            process: None,
            xrun: None,
            stream: None,
            forwarder: None,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Forward events to the MIDI output port at `index` (see `list_midi_ports`)
    pub fn midi_port(mut self, index: usize) -> Self {
        self.midi_port = Some(index);
        self
    }

    /// Events lost because the MIDI queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn build_stream(
        &self,
        mut handler: Box<dyn ProcessHandler>,
        mut xrun: Option<Box<dyn XrunHandler>>,
        mut tx: rtrb::Producer<TimedEvent>,
    ) -> Result<cpal::Stream, EngineError> {
        if self.config.sample_format() != cpal::SampleFormat::F32 {
            return Err(EngineError::backend(
                EngineStage::Activate,
                format!("unsupported sample format {:?}", self.config.sample_format()),
            ));
        }

        let channels = self.config.channels() as usize;
        let dropped = Arc::clone(&self.dropped);
        let mut store = EventStore::with_capacity(MAX_EVENTS_PER_BLOCK);
        let mut frame: u64 = 0;

        let stream = self
            .device
            .build_output_stream(
                &self.config.clone().into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill(0.0);
                    let nframes = (data.len() / channels) as u32;

                    // Failures are logged by the scheduler; cpal has no
                    // per-callback status to report them to.
                    {
                        let mut out = store.buffer(nframes);
                        handler.process(nframes, &mut out);
                    }

                    for event in store.events() {
                        let timed = TimedEvent {
                            frame: frame + event.offset as u64,
                            event: *event,
                        };
                        if tx.push(timed).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    frame += nframes as u64;
                },
                move |err| {
                    warn!(%err, "output stream error");
                    if let Some(xrun) = xrun.as_mut() {
                        xrun.on_xrun();
                    }
                },
                None,
            )
            .map_err(|e| EngineError::backend(EngineStage::Activate, e))?;

        Ok(stream)
    }
}

impl AudioEngine for CpalEngine {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    fn set_process_handler(
        &mut self,
        handler: Box<dyn ProcessHandler>,
    ) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        self.process = Some(handler);
        Ok(())
    }

    fn set_xrun_handler(&mut self, handler: Box<dyn XrunHandler>) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        self.xrun = Some(handler);
        Ok(())
    }

    fn activate(&mut self) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        let handler = self
            .process
            .take()
            .ok_or(EngineError::MissingProcessHandler)?;

        let (tx, rx) = RingBuffer::<TimedEvent>::new(MIDI_QUEUE_CAPACITY);
        let xrun = self.xrun.take();
        let forwarder = MidiForwarder::spawn(rx, self.midi_port)?;
        let stream = self.build_stream(handler, xrun, tx)?;
        stream
            .play()
            .map_err(|e| EngineError::backend(EngineStage::Activate, e))?;

        self.forwarder = Some(forwarder);
        self.stream = Some(stream);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), EngineError> {
        let stream = self.stream.take().ok_or(EngineError::NotActive)?;
        let paused = stream
            .pause()
            .map_err(|e| EngineError::backend(EngineStage::Deactivate, e));
        // Dropping the stream joins the audio callback
        drop(stream);

        if let Some(mut forwarder) = self.forwarder.take() {
            forwarder.stop();
        }

        let dropped = self.dropped_events();
        if dropped > 0 {
            warn!(dropped, "MIDI events dropped on a full queue");
        }
        paused
    }
}
