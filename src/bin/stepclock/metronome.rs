//! Metronome - the simplest sequencing logic worth driving.
//!
//! Plays one note per step, accenting the first step of every quarter note.
//! The previous note is released at the same offset before the next one
//! starts, so note-offs always precede note-ons in the buffer.

use stepclock::io::midi::midi_note_name;
use stepclock::io::{write_note_event, MidiBuffer, NOTE_OFF, NOTE_ON};
use stepclock::{StepTick, StepTrigger};
use tracing::trace;

pub struct Metronome {
    channel: u8,
    note: u8,
    velocity: u8,
    accent_velocity: u8,
    ppq: u64,
    /// Pattern length in steps; `None` runs forever
    length: Option<u64>,
    looping: bool,
    sounding: Option<u8>,
}

impl Metronome {
    pub fn new(channel: u8, note: u8, velocity: u8, ppq: u32) -> Self {
        Self {
            channel,
            note,
            velocity,
            accent_velocity: velocity.saturating_add(27).min(127),
            ppq: ppq.max(1) as u64,
            length: None,
            looping: true,
            sounding: None,
        }
    }

    /// Play `steps` steps, then either start over or fall silent
    pub fn length(mut self, steps: u64, looping: bool) -> Self {
        self.length = Some(steps.max(1));
        self.looping = looping;
        self
    }

    /// Position within the pattern, or `None` once a one-shot has finished
    fn position(&self, index: u64) -> Option<u64> {
        match self.length {
            None => Some(index),
            Some(len) if self.looping => Some(index % len),
            Some(len) if index < len => Some(index),
            Some(_) => None,
        }
    }

    fn release(&mut self, offset: u32, out: &mut MidiBuffer<'_>) {
        if let Some(note) = self.sounding.take() {
            // A dropped note-off is logged by the writer
            let _ = write_note_event(out, offset, NOTE_OFF, self.channel, note, 0);
        }
    }
}

impl StepTrigger for Metronome {
    fn on_step(&mut self, tick: StepTick, out: &mut MidiBuffer<'_>) {
        self.release(tick.offset, out);

        let Some(position) = self.position(tick.index) else {
            return;
        };
        let velocity = if position % self.ppq == 0 {
            self.accent_velocity
        } else {
            self.velocity
        };

        if write_note_event(out, tick.offset, NOTE_ON, self.channel, self.note, velocity).is_ok() {
            self.sounding = Some(self.note);
            trace!(step = tick.index, offset = tick.offset, velocity, "click");
        }
    }
}

/// One-line description for the startup log
pub fn describe(metronome: &Metronome) -> String {
    format!(
        "{} on channel {}, accent every {} steps",
        midi_note_name(metronome.note),
        metronome.channel,
        metronome.ppq
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepclock::io::EventStore;

    fn tick(index: u64, offset: u32) -> StepTick {
        StepTick {
            index,
            offset,
            buffer_len: 256,
        }
    }

    #[test]
    fn test_releases_before_next_note() {
        let mut metronome = Metronome::new(1, 60, 100, 4);
        let mut store = EventStore::with_capacity(8);
        {
            let mut out = store.buffer(256);
            metronome.on_step(tick(0, 10), &mut out);
            metronome.on_step(tick(1, 200), &mut out);
        }

        let bytes: Vec<(u32, Vec<u8>)> = store
            .events()
            .iter()
            .map(|e| (e.offset, e.bytes().to_vec()))
            .collect();
        assert_eq!(
            bytes,
            vec![
                (10, vec![0x90, 60, 127]),
                (200, vec![0x80, 60, 0]),
                (200, vec![0x90, 60, 100]),
            ]
        );
    }

    #[test]
    fn test_accents_quarter_notes() {
        let mut metronome = Metronome::new(2, 37, 90, 2);
        let mut store = EventStore::with_capacity(16);
        {
            let mut out = store.buffer(256);
            for i in 0..4 {
                metronome.on_step(tick(i, i as u32 * 10), &mut out);
            }
        }

        let velocities: Vec<u8> = store
            .events()
            .iter()
            .filter(|e| e.bytes()[0] == 0x91)
            .map(|e| e.bytes()[2])
            .collect();
        assert_eq!(velocities, vec![117, 90, 117, 90]);
    }

    #[test]
    fn test_one_shot_falls_silent() {
        let mut metronome = Metronome::new(1, 60, 100, 4).length(2, false);
        let mut store = EventStore::with_capacity(8);
        {
            let mut out = store.buffer(256);
            for i in 0..4 {
                metronome.on_step(tick(i, i as u32), &mut out);
            }
        }

        // on, off+on, off, nothing
        assert_eq!(store.events().len(), 4);
        assert_eq!(store.events()[3].bytes()[0], 0x80);
    }

    #[test]
    fn test_looping_pattern_restarts_accent() {
        let metronome = Metronome::new(1, 60, 100, 4).length(3, true);
        assert_eq!(metronome.position(3), Some(0));
        assert_eq!(metronome.position(7), Some(1));
    }
}
