/// Tempo parameters for one playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tempo {
    /// Host sample rate in frames per second
    pub sample_rate: u32,
    /// Beats (quarter notes) per minute
    pub bpm: u32,
    /// Pulses (steps) per quarter note
    pub ppq: u32,
}

impl Tempo {
    pub fn new(sample_rate: u32, bpm: u32, ppq: u32) -> Self {
        Self {
            sample_rate,
            bpm,
            ppq,
        }
    }

    /// Frames between two steps, truncated twice (see [`frames_per_step`])
    pub fn frames_per_step(&self) -> Result<u32, TempoError> {
        frames_per_step(self.sample_rate, self.bpm, self.ppq)
    }

    /// Real-valued step length, for diagnostics only
    pub fn exact_frames_per_step(&self) -> f64 {
        (self.sample_rate as f64 * 60.0) / (self.bpm as f64 * self.ppq as f64)
    }

    pub(crate) fn validate(&self) -> Result<(), TempoError> {
        if self.sample_rate == 0 {
            return Err(TempoError::ZeroSampleRate);
        }
        if self.bpm == 0 {
            return Err(TempoError::ZeroBpm);
        }
        if self.ppq == 0 {
            return Err(TempoError::ZeroPpq);
        }
        Ok(())
    }
}

/// Convert a tempo into the number of frames per sequencer step.
///
/// Samples-per-beat is computed in floating point and truncated, then divided
/// by `ppq` with integer division, so the result carries two truncations.
/// Long sessions drift relative to the true tempo; use
/// [`TimingMode::Exact`](super::TimingMode::Exact) when that matters.
pub fn frames_per_step(sample_rate: u32, bpm: u32, ppq: u32) -> Result<u32, TempoError> {
    Tempo::new(sample_rate, bpm, ppq).validate()?;

    let beats_per_second = bpm as f64 / 60.0;
    let samples_per_beat = (sample_rate as f64 / beats_per_second) as u32;
    let frames = samples_per_beat / ppq;

    if frames == 0 {
        return Err(TempoError::StepTooShort {
            sample_rate,
            bpm,
            ppq,
        });
    }

    Ok(frames)
}

/// Invalid tempo configuration, detected before playback starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoError {
    ZeroSampleRate,
    ZeroBpm,
    ZeroPpq,
    /// The tempo yields less than one frame per step
    StepTooShort { sample_rate: u32, bpm: u32, ppq: u32 },
}

impl std::fmt::Display for TempoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TempoError::ZeroSampleRate => write!(f, "sample rate must be greater than zero"),
            TempoError::ZeroBpm => write!(f, "bpm must be greater than zero"),
            TempoError::ZeroPpq => write!(f, "ppq must be greater than zero"),
            TempoError::StepTooShort {
                sample_rate,
                bpm,
                ppq,
            } => write!(
                f,
                "{} bpm at {} ppq is shorter than one frame per step at {} Hz",
                bpm, ppq, sample_rate
            ),
        }
    }
}

impl std::error::Error for TempoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_tempos() {
        // 120 bpm = 2 beats/s, 48000 / 2 = 24000 frames per beat
        assert_eq!(frames_per_step(48_000, 120, 4), Ok(6000));
        assert_eq!(frames_per_step(48_000, 120, 1), Ok(24_000));
        assert_eq!(frames_per_step(44_100, 60, 1), Ok(44_100));
    }

    #[test]
    fn test_double_truncation() {
        // 22050 / 24 = 918.75, truncated
        assert_eq!(frames_per_step(44_100, 120, 24), Ok(918));

        // 48000 / 1.5 = 32000 frames per beat, 32000 / 96 = 333.33
        assert_eq!(frames_per_step(48_000, 90, 96), Ok(333));

        // 44100 / (130 / 60) = 20353.8 -> 20353, then / 4 = 5088.25 -> 5088
        assert_eq!(frames_per_step(44_100, 130, 4), Ok(5088));
    }

    #[test]
    fn test_matches_formula_across_range() {
        for &sample_rate in &[22_050u32, 44_100, 48_000, 96_000] {
            for bpm in (30..=300).step_by(7) {
                for &ppq in &[1u32, 2, 3, 4, 8, 24, 96] {
                    let samples_per_beat = (sample_rate as f64 / (bpm as f64 / 60.0)) as u32;
                    let expected = samples_per_beat / ppq;
                    let frames = frames_per_step(sample_rate, bpm, ppq).unwrap();
                    assert!(frames > 0);
                    assert_eq!(frames, expected);
                }
            }
        }
    }

    #[test]
    fn test_rejects_zero_inputs() {
        assert_eq!(frames_per_step(0, 120, 4), Err(TempoError::ZeroSampleRate));
        assert_eq!(frames_per_step(48_000, 0, 4), Err(TempoError::ZeroBpm));
        assert_eq!(frames_per_step(48_000, 120, 0), Err(TempoError::ZeroPpq));
    }

    #[test]
    fn test_rejects_sub_frame_steps() {
        // 1 Hz at 120 bpm: half a frame per beat
        assert!(matches!(
            frames_per_step(1, 120, 4),
            Err(TempoError::StepTooShort { .. })
        ));
    }

    #[test]
    fn test_exact_frames_per_step() {
        let tempo = Tempo::new(44_100, 120, 24);
        assert!((tempo.exact_frames_per_step() - 918.75).abs() < 1e-9);
    }
}
