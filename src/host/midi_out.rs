//! MIDI output using midir.
//!
//! The audio thread never touches the MIDI port. Events produced in the
//! process callback are pushed into an rtrb ring buffer and a forwarder
//! thread drains it into the port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use midir::{MidiOutput, MidiOutputConnection};
use rtrb::Consumer;
use tracing::{debug, info, warn};

use super::{EngineError, EngineStage};
use crate::io::{MidiEvent, RawEvent};

const CLIENT_NAME: &str = "stepclock";
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Event stamped with its absolute frame position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub frame: u64,
    pub event: RawEvent,
}

/// Names of the available MIDI output ports
pub fn list_midi_ports() -> Result<Vec<String>, EngineError> {
    let midi_out =
        MidiOutput::new(CLIENT_NAME).map_err(|e| EngineError::backend(EngineStage::Activate, e))?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

fn connect(port_index: usize) -> Result<MidiOutputConnection, EngineError> {
    let midi_out =
        MidiOutput::new(CLIENT_NAME).map_err(|e| EngineError::backend(EngineStage::Activate, e))?;
    let ports = midi_out.ports();
    let port = ports.get(port_index).ok_or_else(|| {
        EngineError::backend(
            EngineStage::Activate,
            format!("no MIDI output port with index {}", port_index),
        )
    })?;
    let name = midi_out.port_name(port).unwrap_or_default();

    let connection = midi_out
        .connect(port, CLIENT_NAME)
        .map_err(|e| EngineError::backend(EngineStage::Activate, e))?;
    info!(port = %name, "connected MIDI output");
    Ok(connection)
}

/// Background thread draining timed events into a MIDI port
pub struct MidiForwarder {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MidiForwarder {
    /// Start forwarding. With no port, events are only logged.
    pub fn spawn(rx: Consumer<TimedEvent>, port_index: Option<usize>) -> Result<Self, EngineError> {
        let connection = port_index.map(connect).transpose()?;
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("stepclock-midi".into())
            .spawn(move || forward(rx, connection, flag))
            .map_err(|e| EngineError::backend(EngineStage::Activate, e))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Flush what is queued and stop the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("MIDI forwarder thread panicked");
            }
        }
    }
}

impl Drop for MidiForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(
    mut rx: Consumer<TimedEvent>,
    mut connection: Option<MidiOutputConnection>,
    running: Arc<AtomicBool>,
) {
    loop {
        // Read the flag before draining so a stop never loses queued events
        let keep_running = running.load(Ordering::Acquire);

        while let Ok(timed) = rx.pop() {
            let bytes = timed.event.bytes();
            match connection.as_mut() {
                Some(conn) => {
                    if let Err(err) = conn.send(bytes) {
                        warn!(%err, frame = timed.frame, "failed to send MIDI event");
                    }
                }
                None => debug!(frame = timed.frame, event = ?MidiEvent::from_bytes(bytes), "MIDI event"),
            }
        }

        if !keep_running {
            break;
        }
        thread::sleep(IDLE_POLL);
    }

    if let Some(conn) = connection {
        conn.close();
    }
}
