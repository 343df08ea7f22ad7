/// Note-off command nibble
pub const NOTE_OFF: u8 = 0x8;
/// Note-on command nibble
pub const NOTE_ON: u8 = 0x9;
pub const CONTROL_CHANGE: u8 = 0xB;
pub const PROGRAM_CHANGE: u8 = 0xC;
pub const PITCH_BEND: u8 = 0xE;

/// Pack a command nibble and a 1-based channel into a status byte.
///
/// Channels outside 1-16 wrap modulo 16 (0 becomes 16, 17 becomes 1).
#[inline]
pub fn status_byte(command: u8, channel: u8) -> u8 {
    (command << 4) | (channel.wrapping_sub(1) & 0x0F)
}

/// Channel voice message decoded from raw bytes. Channels are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: i16 },
    ProgramChange { channel: u8, program: u8 },
}

impl MidiEvent {
    /// Decode a channel voice message; `None` for anything else or short input
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        let channel = (status & 0x0F) + 1;
        let data = |i: usize| bytes.get(i).copied();

        let event = match status >> 4 {
            NOTE_OFF => MidiEvent::NoteOff {
                channel,
                key: data(1)?,
                velocity: data(2)?,
            },
            NOTE_ON => MidiEvent::NoteOn {
                channel,
                key: data(1)?,
                velocity: data(2)?,
            },
            CONTROL_CHANGE => MidiEvent::ControlChange {
                channel,
                controller: data(1)?,
                value: data(2)?,
            },
            PROGRAM_CHANGE => MidiEvent::ProgramChange {
                channel,
                program: data(1)?,
            },
            PITCH_BEND => {
                let lsb = data(1)? as i16 & 0x7F;
                let msb = data(2)? as i16 & 0x7F;
                MidiEvent::PitchBend {
                    channel,
                    value: ((msb << 7) | lsb) - 8192,
                }
            }
            _ => return None,
        };
        Some(event)
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ProgramChange { channel, .. } => channel,
        }
    }
}

/// Note name for logs, e.g. 60 -> "C4"
pub fn midi_note_name(note: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", NAMES[(note % 12) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_byte() {
        assert_eq!(status_byte(NOTE_ON, 1), 0x90);
        assert_eq!(status_byte(NOTE_ON, 16), 0x9F);
        assert_eq!(status_byte(NOTE_OFF, 10), 0x89);
    }

    #[test]
    fn test_status_byte_wraps_channel() {
        assert_eq!(status_byte(NOTE_ON, 0), 0x9F);
        assert_eq!(status_byte(NOTE_ON, 17), 0x90);
        assert_eq!(status_byte(NOTE_ON, 18), 0x91);
    }

    #[test]
    fn test_decode_notes() {
        assert_eq!(
            MidiEvent::from_bytes(&[0x90, 60, 100]),
            Some(MidiEvent::NoteOn {
                channel: 1,
                key: 60,
                velocity: 100
            })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0x8F, 60, 0]),
            Some(MidiEvent::NoteOff {
                channel: 16,
                key: 60,
                velocity: 0
            })
        );
    }

    #[test]
    fn test_decode_pitch_bend_center() {
        assert_eq!(
            MidiEvent::from_bytes(&[0xE0, 0x00, 0x40]),
            Some(MidiEvent::PitchBend {
                channel: 1,
                value: 0
            })
        );
    }

    #[test]
    fn test_decode_rejects_short_and_system() {
        assert_eq!(MidiEvent::from_bytes(&[]), None);
        assert_eq!(MidiEvent::from_bytes(&[0x90, 60]), None);
        assert_eq!(MidiEvent::from_bytes(&[0xF8, 0, 0]), None);
    }

    #[test]
    fn test_note_names() {
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(69), "A4");
        assert_eq!(midi_note_name(0), "C-1");
    }
}
