//! Call-scoped MIDI output buffer.
//!
//! An [`EventStore`] is allocated once, before the audio thread starts. Each
//! callback borrows it as a [`MidiBuffer`], which can only be written through
//! [`EventSink::reserve`]. The borrow ends with the callback, so nothing can
//! hold on to the buffer past its validity window.

use tracing::warn;

use super::midi::status_byte;

/// Largest payload a single event may reserve
pub const MAX_EVENT_SIZE: usize = 3;

/// Payload size of a note-on/note-off message
pub const NOTE_EVENT_SIZE: usize = 3;

/// One timed event inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Frame offset from the start of the buffer
    pub offset: u32,
    size: u8,
    data: [u8; MAX_EVENT_SIZE],
}

impl RawEvent {
    const EMPTY: RawEvent = RawEvent {
        offset: 0,
        size: 0,
        data: [0; MAX_EVENT_SIZE],
    };

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }
}

/// Why an event could not be reserved. Nothing is written on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Buffer already holds `capacity` events
    BufferFull { capacity: usize },
    /// Offset lies outside the current buffer
    OffsetOutOfRange { offset: u32, nframes: u32 },
    /// Offset precedes an event already in the buffer
    OutOfOrder { offset: u32, last: u32 },
    EventTooLarge { size: usize },
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::BufferFull { capacity } => {
                write!(f, "MIDI buffer full ({} events)", capacity)
            }
            WriteError::OffsetOutOfRange { offset, nframes } => write!(
                f,
                "event offset {} outside buffer of {} frames",
                offset, nframes
            ),
            WriteError::OutOfOrder { offset, last } => write!(
                f,
                "event offset {} precedes previous event at {}",
                offset, last
            ),
            WriteError::EventTooLarge { size } => write!(
                f,
                "event of {} bytes exceeds the {} byte limit",
                size, MAX_EVENT_SIZE
            ),
        }
    }
}

impl std::error::Error for WriteError {}

/// Reservation capability over an output buffer
pub trait EventSink {
    /// Reserve `size` zeroed bytes for an event at `offset`
    fn reserve(&mut self, offset: u32, size: usize) -> Result<&mut [u8], WriteError>;
}

/// Preallocated event storage reused across callbacks
#[derive(Debug)]
pub struct EventStore {
    events: Vec<RawEvent>,
    len: usize,
    nframes: u32,
}

impl EventStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: vec![RawEvent::EMPTY; capacity],
            len: 0,
            nframes: 0,
        }
    }

    /// Clear the store and hand it out for one buffer of `nframes`
    pub fn buffer(&mut self, nframes: u32) -> MidiBuffer<'_> {
        self.len = 0;
        self.nframes = nframes;
        MidiBuffer { store: self }
    }

    /// Events written during the last callback, in offset order
    pub fn events(&self) -> &[RawEvent] {
        &self.events[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }
}

/// Output buffer handle, valid for a single callback
#[derive(Debug)]
pub struct MidiBuffer<'a> {
    store: &'a mut EventStore,
}

impl MidiBuffer<'_> {
    /// Length of the buffer in frames
    pub fn nframes(&self) -> u32 {
        self.store.nframes
    }

    pub fn len(&self) -> usize {
        self.store.len
    }

    pub fn is_empty(&self) -> bool {
        self.store.len == 0
    }

    pub fn events(&self) -> &[RawEvent] {
        self.store.events()
    }
}

impl EventSink for MidiBuffer<'_> {
    fn reserve(&mut self, offset: u32, size: usize) -> Result<&mut [u8], WriteError> {
        let store = &mut *self.store;

        if size > MAX_EVENT_SIZE {
            return Err(WriteError::EventTooLarge { size });
        }
        if offset >= store.nframes {
            return Err(WriteError::OffsetOutOfRange {
                offset,
                nframes: store.nframes,
            });
        }
        if store.len == store.events.len() {
            return Err(WriteError::BufferFull {
                capacity: store.events.len(),
            });
        }
        if let Some(last) = store.events[..store.len].last() {
            if offset < last.offset {
                return Err(WriteError::OutOfOrder {
                    offset,
                    last: last.offset,
                });
            }
        }

        let event = &mut store.events[store.len];
        store.len += 1;
        *event = RawEvent {
            offset,
            size: size as u8,
            data: [0; MAX_EVENT_SIZE],
        };
        Ok(&mut event.data[..size])
    }
}

/// Write a three-byte channel message at `offset`.
///
/// `command` is the high nibble (e.g. [`NOTE_ON`](super::NOTE_ON)),
/// `channel` is 1-based and wraps outside 1-16. Note and velocity are
/// written verbatim. A failed reservation is logged and the event dropped;
/// the buffer is left as it was.
pub fn write_note_event<S: EventSink + ?Sized>(
    sink: &mut S,
    offset: u32,
    command: u8,
    channel: u8,
    note: u8,
    velocity: u8,
) -> Result<(), WriteError> {
    let event = sink
        .reserve(offset, NOTE_EVENT_SIZE)
        .inspect_err(|err| warn!(%err, offset, "dropped MIDI event"))?;
    event[0] = status_byte(command, channel);
    event[1] = note;
    event[2] = velocity;
    Ok(())
}

/// Status code for a write: 0 on success, -1 on failure
pub fn write_status(result: &Result<(), WriteError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
