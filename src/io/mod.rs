// Purpose - MIDI wire format and the per-callback output buffer

pub mod buffer;
pub mod midi;

pub use buffer::{
    write_note_event, write_status, EventSink, EventStore, MidiBuffer, RawEvent, WriteError,
};
pub use midi::{MidiEvent, NOTE_OFF, NOTE_ON};
